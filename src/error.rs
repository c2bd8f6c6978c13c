//! Crate-wide error type.
use crate::json_path::JsonType;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value that has no place in the object/array/scalar model (null, float).
    #[error("{found} is not a valid json type (expected object, array, string, integer or boolean)")]
    MalformedJsonType { found: &'static str },

    #[error("expected json {expected}, got {found}")]
    UnexpectedJsonType { expected: JsonType, found: JsonType },

    #[error("expected json {expected} at `{path}`, got {found}")]
    UnexpectedJsonTypeAt { path: String, expected: JsonType, found: JsonType },

    #[error("right json has keys missing from left json under `{path}`: {keys:?}")]
    UnexpectedKeys { path: String, keys: Vec<String> },

    #[error("json arrays under `{path}` differ in length: {left} and {right}")]
    ArrayLengthMismatch { path: String, left: usize, right: usize },

    #[error("value at `{path}` is a json {left} on the left and a json {right} on the right")]
    JsonTypeMismatch { path: String, left: JsonType, right: JsonType },

    #[error("empty json path")]
    EmptyPath,

    #[error("no value at `{path}`")]
    PathNotFound { path: String },

    #[error("cannot expand empty flat json under `{path}`")]
    EmptyFlatJson { path: String },

    #[error("multiple json values for flat key `{path}`")]
    AmbiguousFlatJson { path: String },

    #[error("mixed object keys and array indices under `{path}`")]
    MixedPathSegments { path: String },

    #[error("unknown field type `{0}`")]
    UnknownFieldType(String),

    #[error("invalid specification for field `{name}`: {message}")]
    InvalidFieldSpec { name: String, message: String },

    #[error("duplicated field name `{0}`")]
    DuplicateFieldName(String),

    #[error("field `{0}` must be specified")]
    MissingRequiredField(String),

    #[error("unknown search field `{0}`")]
    UnknownQueryField(String),

    #[error("invalid criteria: {0}")]
    InvalidCriteriaValue(String),

    #[error("search field `{name}`: {source}")]
    Field {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("document version {found} is incompatible with engine version {engine}")]
    IncompatibleVersion { found: String, engine: String },

    #[error("invalid version `{0}`, expected `major.minor[.patch]`")]
    InvalidVersion(String),

    #[error("display string {0} matches no known template signature")]
    AmbiguousTemplateSignature(String),

    #[error("invalid display string: {0}")]
    InvalidTemplate(String),

    #[error("invalid placeholder in display string: {0}")]
    InvalidPlaceholder(String),

    #[error("display string key `{0}` is missing from the item")]
    TemplateKeyMissing(String),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("at JSON path {path} → {message}")]
    Deserialize { path: String, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Attach the name of the search field that produced this error.
    pub fn in_field(self, name: impl Into<String>) -> Self {
        Error::Field { name: name.into(), source: Box::new(self) }
    }
}
