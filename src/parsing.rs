//! Loading of SAJE documents.
//!
//! A document is a json object holding a format `version`, an optional
//! `name`, the nested `fields` list (search fields grouped the way they are
//! laid out on screen), the `data` records and an optional `display_string`.
//! Each field entry carries both the field definition and presentation
//! settings; the latter are split off into a [`FieldSpec`].
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::{self, CriteriaMap, Database};
use crate::display::{DisplayCache, DisplayTemplate};
use crate::error::{Error, Result};
use crate::field::{Comparison, Criteria, Field, FieldKind, FieldQuery, Operator};
use crate::json_path::Scalar;
use crate::prefs::Preferences;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

const DOCUMENT_KEYS: &[&str] = &["version", "name", "fields", "data", "display_string"];
const GUI_KEYS: &[&str] = &["name", "listed", "comparison", "operator", "case", "modes"];

// ————————————————————————————————————————————————————————————————————————————
// VERSION
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: Option<u64>,
}

impl Version {
    pub fn engine() -> Version {
        // the package version is always `major.minor.patch`
        ENGINE_VERSION.parse().unwrap_or(Version { major: 0, minor: 0, patch: None })
    }

    /// Same major, and an engine minor at least as recent as the document's.
    pub fn is_readable_by(&self, engine: &Version) -> bool {
        self.major == engine.major && self.minor <= engine.minor
    }
}

impl FromStr for Version {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion(s.to_owned());
        let mut parts = s.trim().split('.');
        let mut number = |required: bool| -> Result<Option<u64>> {
            match parts.next() {
                Some(part) => part.parse().map(Some).map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(None),
            }
        };
        let major = number(true)?.ok_or_else(invalid)?;
        let minor = number(true)?.ok_or_else(invalid)?;
        let patch = number(false)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Version { major, minor, patch })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }
        Ok(())
    }
}

pub fn check_version(found: &str) -> Result<Version> {
    let version: Version = found.parse()?;
    let engine = Version::engine();
    if version.is_readable_by(&engine) {
        Ok(version)
    } else {
        Err(Error::IncompatibleVersion { found: version.to_string(), engine: engine.to_string() })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// FIELD SPECS & LAYOUT
// ————————————————————————————————————————————————————————————————————————————

/// Nested grouping of field names, mirroring the `fields` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Layout {
    Field(String),
    Group(Vec<Layout>),
}

/// Presentation settings of one field, and the defaults its criteria use.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldSpec {
    pub name: String,
    /// Values suggested for an integer field.
    pub listed: Vec<i64>,
    pub comparison: Option<Comparison>,
    pub operator: Option<Operator>,
    pub case_sensitive: Option<bool>,
    /// `None` means the field is shown whatever the selected modes.
    pub modes: Option<IndexSet<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Modes {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct GuiSettings {
    name: String,
    #[serde(default)]
    listed: Vec<i64>,
    comparison: Option<Comparison>,
    operator: Option<Operator>,
    case: Option<bool>,
    modes: Option<Modes>,
}

impl FieldSpec {
    /// Split a raw field entry into its presentation settings and the
    /// remaining field definition.
    pub fn split(raw: &Map<String, Value>) -> Result<(FieldSpec, Map<String, Value>)> {
        let mut definition = raw.clone();
        let mut gui = Map::new();
        for key in GUI_KEYS {
            if let Some(value) = definition.shift_remove(*key) {
                gui.insert((*key).to_owned(), value);
            }
        }
        let label = gui.get("name").and_then(Value::as_str).unwrap_or("<unnamed>").to_owned();
        let settings: GuiSettings = crate::path_de::from_value_with_path(Value::Object(gui))
            .map_err(|err| Error::InvalidFieldSpec { name: label, message: err.to_string() })?;
        let modes = settings.modes.map(|modes| match modes {
            Modes::One(mode) => IndexSet::from([mode]),
            Modes::Many(modes) => modes.into_iter().collect(),
        });
        let spec = FieldSpec {
            name: settings.name,
            listed: settings.listed,
            comparison: settings.comparison,
            operator: settings.operator,
            case_sensitive: settings.case,
            modes,
        };
        Ok((spec, definition))
    }

    /// Turn the json a caller supplies for this field into typed criteria.
    ///
    /// Accepts a bare value (scalar, array, integer or text) or an object with
    /// `value`/`values` plus optional `operator`, `comparison`, `case`,
    /// `accept_missing` and `invert`. Omitted settings come from this spec,
    /// then from `prefs`.
    pub fn decode_criteria(&self, field: &Field, value: &Value, prefs: &Preferences) -> Result<FieldQuery> {
        let options = value.as_object();

        let criteria = match &field.kind {
            FieldKind::Option(opt) if opt.multi_selection => {
                let Value::Array(items) = operand(value, "values")? else {
                    return Err(Error::InvalidCriteriaValue("expected an array of values".to_owned()));
                };
                let values = items.iter().map(Scalar::from_value).collect::<Result<IndexSet<_>>>()?;
                let operator = setting(options, "operator")?.or(self.operator).unwrap_or(Operator::Or);
                Criteria::Multi { values, operator }
            }
            FieldKind::Option(_) => Criteria::Single(Scalar::from_value(operand(value, "value")?)?),
            FieldKind::Integer(_) => {
                let found = operand(value, "value")?;
                let value = found
                    .as_i64()
                    .ok_or_else(|| Error::InvalidCriteriaValue(format!("expected an integer, got {found}")))?;
                let comparison = setting(options, "comparison")?.or(self.comparison).unwrap_or_default();
                Criteria::Integer { value, comparison }
            }
            FieldKind::Text => {
                let values = match operand(value, "values")? {
                    Value::String(text) => text.lines().filter(|l| !l.is_empty()).map(str::to_owned).collect(),
                    Value::Array(items) => items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_owned)
                                .ok_or_else(|| Error::InvalidCriteriaValue(format!("expected a string, got {item}")))
                        })
                        .collect::<Result<Vec<_>>>()?,
                    other => return Err(Error::InvalidCriteriaValue(format!("expected text, got {other}"))),
                };
                let operator = setting(options, "operator")?.or(self.operator).unwrap_or(Operator::Or);
                let case_sensitive =
                    setting(options, "case")?.or(self.case_sensitive).unwrap_or(prefs.case_sensitive);
                Criteria::Text { values, operator, case_sensitive }
            }
        };
        Ok(FieldQuery {
            criteria,
            accept_missing: setting(options, "accept_missing")?.unwrap_or(prefs.accept_missing),
            invert: setting(options, "invert")?.unwrap_or(false),
        })
    }
}

/// The bare criteria value, or member `key` of its object form.
fn operand<'v>(value: &'v Value, key: &str) -> Result<&'v Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .ok_or_else(|| Error::InvalidCriteriaValue(format!("missing `{key}`"))),
        _ => Ok(value),
    }
}

fn setting<T: DeserializeOwned>(options: Option<&Map<String, Value>>, key: &str) -> Result<Option<T>> {
    match options.and_then(|map| map.get(key)) {
        None => Ok(None),
        Some(value) => crate::path_de::from_value_with_path(value.clone())
            .map(Some)
            .map_err(|err| Error::InvalidCriteriaValue(format!("`{key}`: {err}"))),
    }
}

type Collected = IndexMap<String, (FieldSpec, Map<String, Value>)>;

fn parse_nested_fields(items: &[Value], collected: &mut Collected) -> Result<Vec<Layout>> {
    let mut layout = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Array(nested) => layout.push(Layout::Group(parse_nested_fields(nested, collected)?)),
            Value::Object(raw) => {
                let (spec, definition) = FieldSpec::split(raw)?;
                if collected.contains_key(&spec.name) {
                    return Err(Error::DuplicateFieldName(spec.name));
                }
                layout.push(Layout::Field(spec.name.clone()));
                collected.insert(spec.name.clone(), (spec, definition));
            }
            other => log::warn!("ignored entry {other} in `fields`: expected a field or a group of fields"),
        }
    }
    Ok(layout)
}

// ————————————————————————————————————————————————————————————————————————————
// PARSED FILE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug)]
pub struct ParsedFile {
    pub name: String,
    pub version: Version,
    pub display: DisplayTemplate,
    pub layout: Vec<Layout>,
    pub specs: IndexMap<String, FieldSpec>,
    pub database: Database,
    /// Every mode tag declared by a field, in declaration order.
    pub modes: IndexSet<String>,
    cache: DisplayCache,
}

/// Validate and decode a loaded document. `fallback_name` is used when the
/// document has no `name` (usually the file stem).
pub fn parse_file(doc: &Value, fallback_name: &str) -> Result<ParsedFile> {
    let Value::Object(doc) = doc else {
        return Err(Error::MalformedDocument("document must be a json object".to_owned()));
    };
    let version = match doc.get("version") {
        Some(Value::String(version)) => check_version(version)?,
        Some(other) => return Err(Error::InvalidVersion(other.to_string())),
        None => return Err(Error::MalformedDocument("missing `version`".to_owned())),
    };
    for key in doc.keys().filter(|k| !DOCUMENT_KEYS.contains(&k.as_str())) {
        log::warn!("unused key `{key}` in document");
    }
    let name = match doc.get("name") {
        None | Some(Value::Null) => fallback_name.to_owned(),
        Some(Value::String(name)) => name.clone(),
        Some(other) => return Err(Error::MalformedDocument(format!("`name` must be a string, got {other}"))),
    };
    let Some(Value::Array(field_list)) = doc.get("fields") else {
        return Err(Error::MalformedDocument("`fields` must be a json array".to_owned()));
    };
    let data = doc
        .get("data")
        .ok_or_else(|| Error::MalformedDocument("missing `data`".to_owned()))?;

    let records = database::records_from_json(data)?;
    let mut collected = Collected::new();
    let layout = parse_nested_fields(field_list, &mut collected)?;

    let mut specs = IndexMap::with_capacity(collected.len());
    let mut fields = IndexMap::with_capacity(collected.len());
    for (name, (spec, definition)) in collected {
        let field = Field::from_json(&name, &Value::Object(definition), &records)?;
        fields.insert(name.clone(), field);
        specs.insert(name, spec);
    }
    let modes: IndexSet<String> = specs
        .values()
        .filter_map(|spec| spec.modes.as_ref())
        .flatten()
        .cloned()
        .collect();
    let display = match doc.get("display_string") {
        Some(spec) => DisplayTemplate::from_json(spec)?,
        None => DisplayTemplate::Default,
    };
    let database = Database::new(records, fields)?;
    log::info!("loaded `{name}` (format {version}): {} records, {} fields", database.len(), specs.len());

    Ok(ParsedFile {
        name,
        version,
        display,
        layout,
        specs,
        cache: DisplayCache::new(database.len()),
        database,
        modes,
    })
}

impl ParsedFile {
    /// Display string of the record at `index`, rendered once and cached.
    pub fn render(&self, index: usize) -> Option<Cow<'_, str>> {
        let record = self.database.record(index)?;
        Some(self.cache.get_or_render(index, || self.display.format(record)))
    }

    pub fn render_all(&self, indices: &[usize]) -> Vec<Cow<'_, str>> {
        indices.iter().filter_map(|&index| self.render(index)).collect()
    }

    /// Fields shown for the selected modes. Fields without modes are always shown.
    pub fn visible_fields(&self, selected: &IndexSet<String>) -> Vec<&str> {
        self.specs
            .iter()
            .filter(|(_, spec)| match &spec.modes {
                None => true,
                Some(modes) => !modes.is_disjoint(selected),
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Decode a `{field name: criteria json}` map for this document.
    pub fn decode_query(&self, criteria: &Map<String, Value>, prefs: &Preferences) -> Result<CriteriaMap> {
        criteria
            .iter()
            .map(|(name, value)| {
                let (Some(field), Some(spec)) = (self.database.field(name), self.specs.get(name)) else {
                    return Err(Error::UnknownQueryField(name.clone()));
                };
                let query = spec.decode_criteria(field, value, prefs).map_err(|e| e.in_field(name))?;
                Ok((name.clone(), query))
            })
            .collect()
    }

    pub fn search(&self, criteria: &CriteriaMap, operator: Operator) -> Result<Vec<usize>> {
        self.database.search_indices(criteria, operator)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine_version(minor_offset: i64) -> String {
        let engine = Version::engine();
        format!("{}.{}", engine.major, engine.minor as i64 + minor_offset)
    }

    fn document() -> Value {
        json!({
            "version": engine_version(0),
            "name": "Library",
            "fields": [
                {"type": "Text", "name": "Title", "key": "title", "case": false},
                [
                    {"type": "Option", "name": "Genre", "key": "genre", "values": ["sf", "fantasy"],
                     "operator": "or", "modes": "fiction"},
                    {"type": "Integer", "name": "Pages", "key": "pages", "min": 0, "max": 2000,
                     "comparison": ">=", "listed": [100, 500], "modes": ["fiction", "essay"]},
                ],
                {"type": "Option", "name": "Tags", "key": "tags", "multi_selection": true, "modes": ["essay"]},
            ],
            "data": [
                {"title": "Dune", "genre": "sf", "pages": 612, "tags": ["desert", "politics"]},
                {"title": "The Hobbit", "genre": "fantasy", "pages": 310, "tags": ["dragons"]},
            ],
            "display_string": "{title} ({pages}p)",
        })
    }

    #[test]
    fn parses_fields_layout_and_modes() {
        let parsed = parse_file(&document(), "fallback").unwrap();
        assert_eq!(parsed.name, "Library");
        assert_eq!(
            parsed.layout,
            vec![
                Layout::Field("Title".into()),
                Layout::Group(vec![Layout::Field("Genre".into()), Layout::Field("Pages".into())]),
                Layout::Field("Tags".into()),
            ]
        );
        assert_eq!(serde_json::to_value(&parsed.layout).unwrap(), json!(["Title", ["Genre", "Pages"], "Tags"]));
        assert_eq!(parsed.modes.iter().collect::<Vec<_>>(), ["fiction", "essay"]);

        let pages = &parsed.specs["Pages"];
        assert_eq!(pages.comparison, Some(Comparison::Geq));
        assert_eq!(pages.listed, vec![100, 500]);
        assert_eq!(parsed.specs["Title"].case_sensitive, Some(false));
        assert!(parsed.specs["Title"].modes.is_none());

        let FieldKind::Option(tags) = &parsed.database.fields()["Tags"].kind else { panic!("Tags is an option field") };
        assert_eq!(tags.values.len(), 3);
    }

    #[test]
    fn name_falls_back() {
        let mut doc = document();
        doc.as_object_mut().unwrap().remove("name");
        assert_eq!(parse_file(&doc, "books").unwrap().name, "books");
    }

    #[test]
    fn version_gate() {
        let mut doc = document();
        doc["version"] = json!(engine_version(1));
        assert!(matches!(parse_file(&doc, "x"), Err(Error::IncompatibleVersion { .. })));

        let engine = Version::engine();
        doc["version"] = json!(format!("{}.0", engine.major + 1));
        assert!(matches!(parse_file(&doc, "x"), Err(Error::IncompatibleVersion { .. })));

        doc["version"] = json!(format!("{}.0.7", engine.major));
        assert!(parse_file(&doc, "x").is_ok());

        doc["version"] = json!("one.two");
        assert!(matches!(parse_file(&doc, "x"), Err(Error::InvalidVersion(_))));

        doc.as_object_mut().unwrap().remove("version");
        assert!(matches!(parse_file(&doc, "x"), Err(Error::MalformedDocument(_))));
    }

    #[test]
    fn versions_parse() {
        assert_eq!("1.2".parse::<Version>().unwrap(), Version { major: 1, minor: 2, patch: None });
        assert_eq!("1.2.3".parse::<Version>().unwrap().to_string(), "1.2.3");
        assert!("1".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
    }

    #[test]
    fn duplicate_names_are_fatal() {
        let mut doc = document();
        doc["fields"] = json!([
            {"type": "Text", "name": "Title", "key": "title"},
            [{"type": "Text", "name": "Title", "key": "subtitle"}],
        ]);
        assert!(matches!(parse_file(&doc, "x"), Err(Error::DuplicateFieldName(n)) if n == "Title"));
    }

    #[test]
    fn bad_field_specs_are_fatal() {
        let mut doc = document();
        doc["fields"] = json!([{"type": "Colour", "name": "C", "key": "c"}]);
        assert!(matches!(parse_file(&doc, "x"), Err(Error::UnknownFieldType(_))));

        doc["fields"] = json!([{"type": "Text", "key": "c"}]);
        assert!(matches!(parse_file(&doc, "x"), Err(Error::InvalidFieldSpec { .. })));
    }

    #[test]
    fn renders_are_cached_per_record() {
        let parsed = parse_file(&document(), "x").unwrap();
        assert_eq!(parsed.render(0).unwrap(), "Dune (612p)");
        assert_eq!(parsed.cache.get(0), Some("Dune (612p)"));
        assert_eq!(parsed.cache.get(1), None);
        assert_eq!(parsed.render_all(&[1, 0, 9]), vec!["The Hobbit (310p)", "Dune (612p)"]);
        assert!(parsed.render(9).is_none());
    }

    #[test]
    fn visible_fields_follow_modes() {
        let parsed = parse_file(&document(), "x").unwrap();
        let essay = IndexSet::from(["essay".to_string()]);
        assert_eq!(parsed.visible_fields(&essay), ["Title", "Pages", "Tags"]);
        let fiction = IndexSet::from(["fiction".to_string()]);
        assert_eq!(parsed.visible_fields(&fiction), ["Title", "Genre", "Pages"]);
        assert_eq!(parsed.visible_fields(&IndexSet::new()), ["Title"]);
    }

    #[test]
    fn criteria_decode_with_defaults() {
        let parsed = parse_file(&document(), "x").unwrap();
        let prefs = Preferences::default();
        let query = parsed
            .decode_query(
                json!({
                    "Pages": 300,
                    "Title": "hobbit\n\nring",
                    "Tags": {"values": ["dragons"], "accept_missing": false},
                    "Genre": {"value": "fantasy", "invert": true},
                })
                .as_object()
                .unwrap(),
                &prefs,
            )
            .unwrap();

        assert_eq!(query["Pages"].criteria, Criteria::Integer { value: 300, comparison: Comparison::Geq });
        assert_eq!(
            query["Title"].criteria,
            Criteria::Text { values: vec!["hobbit".into(), "ring".into()], operator: Operator::Or, case_sensitive: false }
        );
        assert!(!query["Tags"].accept_missing);
        assert!(matches!(&query["Tags"].criteria, Criteria::Multi { operator: Operator::Or, .. }));
        assert!(query["Genre"].invert);

        let err = parsed.decode_query(json!({"Pages": "many"}).as_object().unwrap(), &prefs).unwrap_err();
        assert!(matches!(err, Error::Field { name, .. } if name == "Pages"));
        let err = parsed.decode_query(json!({"Author": "x"}).as_object().unwrap(), &prefs).unwrap_err();
        assert!(matches!(err, Error::UnknownQueryField(_)));
    }

    #[test]
    fn search_then_render() {
        let parsed = parse_file(&document(), "x").unwrap();
        let query = parsed
            .decode_query(json!({"Title": {"values": ["DUNE"]}}).as_object().unwrap(), &Preferences::default())
            .unwrap();
        let hits = parsed.search(&query, Operator::And).unwrap();
        assert_eq!(parsed.render_all(&hits), vec!["Dune (612p)"]);
    }
}
