//! Display strings: a small recursive template language turning one record
//! into the text shown for it in a result list.
//!
//! The variant of a template is guessed from the shape of its JSON form:
//!
//! - `null` (or absent): the record pretty-printed as JSON
//! - a string: a format string with `{dotted.path}` placeholders. A
//!   placeholder may carry a `:` format spec limited to fill, alignment and
//!   width (`{pages:>5}`, `{title:*^20}`); integers align right by default,
//!   other values left. Signs, precision and type letters are not supported.
//! - another scalar: a format string made of its text, kept as is by `to_json`
//! - an array: the concatenation of its elements
//! - an object: the first signature whose keys are all present, checked in
//!   the order table, forall, if_key, if_json_type
//!
//! Rendering never fails. An error inside one template node is rendered in
//! place of that node's output, together with the offending item and the
//! node's own definition.
use std::borrow::Cow;

use indexmap::IndexMap;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::json_path::{self, JsonType, Path, Scalar};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayTemplate {
    Default,
    Literal(Literal),
    Concat(Vec<DisplayTemplate>),
    /// Pick a template by the scalar found at `key`; `""` is the fallback.
    Table { key: Path, table: IndexMap<String, DisplayTemplate> },
    /// Render every element of an array.
    ForEach { key: Option<Path>, template: Box<DisplayTemplate>, separator: String },
    IfKeyPresent { key: Path, template: Box<DisplayTemplate> },
    /// Pick a template by the json type of the value at `key`, rendered against that value.
    TypeDispatch {
        key: Path,
        value: Box<DisplayTemplate>,
        array: Box<DisplayTemplate>,
        object: Box<DisplayTemplate>,
    },
}

/// Format string, split once into text and placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    source: Scalar,
    pieces: Vec<Piece>,
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Placeholder { name: String, spec: Option<FormatSpec> },
}

/// `[[fill]align][width]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct FormatSpec {
    fill: char,
    align: Option<Align>,
    width: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Right,
    Center,
}

// ————————————————————————————————————————————————————————————————————————————
// DECODING
// ————————————————————————————————————————————————————————————————————————————

type Decoder = fn(&Map<String, Value>) -> Result<DisplayTemplate>;

/// Object signatures in priority order: (required keys, optional keys, decoder).
const SIGNATURES: &[(&[&str], &[&str], Decoder)] = &[
    (&["key", "table"], &[], decode_table),
    (&["forall", "display_string"], &["separator"], decode_for_each),
    (&["if_key", "display_string"], &[], decode_if_key),
    (&["if_json_type", "json_value", "json_array", "json_object"], &[], decode_type_dispatch),
];

impl DisplayTemplate {
    pub fn from_json(value: &Value) -> Result<DisplayTemplate> {
        match value {
            Value::Null => Ok(DisplayTemplate::Default),
            Value::String(source) => Ok(DisplayTemplate::Literal(Literal::parse(source)?)),
            Value::Array(items) => items.iter().map(DisplayTemplate::from_json).collect::<Result<Vec<_>>>().map(DisplayTemplate::Concat),
            Value::Object(map) => {
                for (required, optional, decode) in SIGNATURES {
                    if required.iter().all(|k| map.contains_key(*k)) {
                        for extra in map.keys().filter(|k| !required.contains(&k.as_str()) && !optional.contains(&k.as_str())) {
                            log::warn!("unused key `{extra}` in display string");
                        }
                        return decode(map);
                    }
                }
                Err(Error::AmbiguousTemplateSignature(value.to_string()))
            }
            scalar => Ok(DisplayTemplate::Literal(Literal::from_scalar(Scalar::from_value(scalar)?)?)),
        }
    }

    pub fn to_json(&self) -> Value {
        let object = |pairs: Vec<(&str, Value)>| {
            Value::Object(pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect())
        };
        match self {
            DisplayTemplate::Default => Value::Null,
            DisplayTemplate::Literal(literal) => literal.source.to_value(),
            DisplayTemplate::Concat(parts) => parts.iter().map(DisplayTemplate::to_json).collect(),
            DisplayTemplate::Table { key, table } => object(vec![
                ("key", Value::from(key.to_string())),
                ("table", Value::Object(table.iter().map(|(k, t)| (k.clone(), t.to_json())).collect())),
            ]),
            DisplayTemplate::ForEach { key, template, separator } => {
                let mut pairs = vec![
                    ("forall", key.as_ref().map_or(Value::Null, |k| Value::from(k.to_string()))),
                    ("display_string", template.to_json()),
                ];
                if !separator.is_empty() {
                    pairs.push(("separator", Value::from(separator.as_str())));
                }
                object(pairs)
            }
            DisplayTemplate::IfKeyPresent { key, template } => object(vec![
                ("if_key", Value::from(key.to_string())),
                ("display_string", template.to_json()),
            ]),
            DisplayTemplate::TypeDispatch { key, value, array, object: obj } => object(vec![
                ("if_json_type", Value::from(key.to_string())),
                ("json_value", value.to_json()),
                ("json_array", array.to_json()),
                ("json_object", obj.to_json()),
            ]),
        }
    }
}

fn key_path(map: &Map<String, Value>, name: &str) -> Result<Path> {
    match map.get(name) {
        Some(Value::String(key)) => Ok(Path::from(key.as_str())),
        other => Err(Error::InvalidTemplate(format!(
            "`{name}` must be a string key, got {}",
            other.map_or("nothing".to_owned(), Value::to_string)
        ))),
    }
}

fn sub_template(map: &Map<String, Value>, name: &str) -> Result<Box<DisplayTemplate>> {
    let value = map.get(name).unwrap_or(&Value::Null);
    DisplayTemplate::from_json(value).map(Box::new)
}

fn decode_table(map: &Map<String, Value>) -> Result<DisplayTemplate> {
    let key = key_path(map, "key")?;
    let Some(Value::Object(entries)) = map.get("table") else {
        return Err(Error::InvalidTemplate("`table` must be a json object".to_owned()));
    };
    if !entries.contains_key("") {
        return Err(Error::InvalidTemplate(
            "`table` requires a default display string under the empty key".to_owned(),
        ));
    }
    let table: IndexMap<String, DisplayTemplate> = entries
        .iter()
        .map(|(k, v)| Ok((k.clone(), DisplayTemplate::from_json(v)?)))
        .collect::<Result<_>>()?;
    Ok(DisplayTemplate::Table { key, table })
}

fn decode_for_each(map: &Map<String, Value>) -> Result<DisplayTemplate> {
    let key = match map.get("forall") {
        None | Some(Value::Null) => None,
        Some(_) => Some(key_path(map, "forall")?),
    };
    let separator = match map.get("separator") {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => return Err(Error::InvalidTemplate(format!("`separator` must be a string, got {other}"))),
    };
    Ok(DisplayTemplate::ForEach { key, template: sub_template(map, "display_string")?, separator })
}

fn decode_if_key(map: &Map<String, Value>) -> Result<DisplayTemplate> {
    Ok(DisplayTemplate::IfKeyPresent {
        key: key_path(map, "if_key")?,
        template: sub_template(map, "display_string")?,
    })
}

fn decode_type_dispatch(map: &Map<String, Value>) -> Result<DisplayTemplate> {
    Ok(DisplayTemplate::TypeDispatch {
        key: key_path(map, "if_json_type")?,
        value: sub_template(map, "json_value")?,
        array: sub_template(map, "json_array")?,
        object: sub_template(map, "json_object")?,
    })
}

// ————————————————————————————————————————————————————————————————————————————
// RENDERING
// ————————————————————————————————————————————————————————————————————————————

impl DisplayTemplate {
    /// Render `record`. Failures are rendered inline instead of returned.
    pub fn format(&self, record: &Value) -> String {
        match self.try_format(record) {
            Ok(out) => out,
            Err(err) => self.error_payload(record, &err),
        }
    }

    fn try_format(&self, record: &Value) -> Result<String> {
        match self {
            DisplayTemplate::Default => Ok(serde_json::to_string_pretty(record)?),
            DisplayTemplate::Literal(literal) => literal.render(record),
            DisplayTemplate::Concat(parts) => Ok(parts.iter().map(|t| t.format(record)).collect()),
            DisplayTemplate::Table { key, table } => {
                let chosen = json_path::get(record, key)
                    .ok()
                    .and_then(|v| Scalar::from_value(v).ok())
                    .and_then(|scalar| table.get(&scalar.to_string()))
                    .or_else(|| table.get(""))
                    .ok_or_else(|| Error::InvalidTemplate("table has no default display string".to_owned()))?;
                Ok(chosen.format(record))
            }
            DisplayTemplate::ForEach { key, template, separator } => {
                let items = match (record, key) {
                    (Value::Array(items), _) => items,
                    (Value::Object(_), Some(key)) => match json_path::get(record, key) {
                        Ok(Value::Array(items)) => items,
                        Ok(other) => {
                            return Err(Error::UnexpectedJsonType {
                                expected: JsonType::Array,
                                found: JsonType::of(other)?,
                            });
                        }
                        Err(_) => return Ok(String::new()),
                    },
                    (Value::Object(_), None) => {
                        return Err(Error::InvalidTemplate("`forall` needs a key to iterate over an object".to_owned()));
                    }
                    (other, _) => {
                        return Err(Error::UnexpectedJsonType {
                            expected: JsonType::Array,
                            found: JsonType::of(other)?,
                        });
                    }
                };
                let rendered: Vec<String> = items.iter().map(|item| template.format(item)).collect();
                Ok(rendered.join(separator.as_str()))
            }
            DisplayTemplate::IfKeyPresent { key, template } => {
                if json_path::has(record, key) {
                    Ok(template.format(record))
                } else {
                    Ok(String::new())
                }
            }
            DisplayTemplate::TypeDispatch { key, value, array, object } => {
                let found = json_path::get(record, key).map_err(|_| Error::TemplateKeyMissing(key.to_string()))?;
                let branch = match JsonType::of(found)? {
                    JsonType::Scalar => value,
                    JsonType::Array => array,
                    JsonType::Object => object,
                };
                Ok(branch.format(found))
            }
        }
    }

    fn error_payload(&self, record: &Value, err: &Error) -> String {
        let item = serde_json::to_string_pretty(record).unwrap_or_else(|_| record.to_string());
        let template = self.to_json();
        let source = serde_json::to_string_pretty(&template).unwrap_or_else(|_| template.to_string());
        format!("<error: {err}>\nitem: {item}\ndisplay_string: {source}\n")
    }
}

// `{{`, `}}`, `{name}`, or a stray brace
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").expect("placeholder pattern is valid"));

impl Literal {
    pub fn parse(source: &str) -> Result<Literal> {
        Literal::from_scalar(Scalar::from(source))
    }

    /// Format string made of the scalar's text; the scalar itself is kept as
    /// the literal's source.
    pub fn from_scalar(scalar: Scalar) -> Result<Literal> {
        let text = scalar.to_string();
        let pieces = Literal::split(&text)?;
        Ok(Literal { source: scalar, pieces })
    }

    fn split(source: &str) -> Result<Vec<Piece>> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            text.push_str(&source[last..whole.start()]);
            last = whole.end();
            match (whole.as_str(), caps.get(1)) {
                ("{{", _) => text.push('{'),
                ("}}", _) => text.push('}'),
                (_, Some(inner)) if !inner.as_str().is_empty() => {
                    if !text.is_empty() {
                        pieces.push(Piece::Text(std::mem::take(&mut text)));
                    }
                    let (name, spec) = match inner.as_str().split_once(':') {
                        Some((name, spec)) => {
                            let spec = FormatSpec::parse(spec).ok_or_else(|| {
                                Error::InvalidPlaceholder(format!("unsupported format spec `{spec}` in {source:?}"))
                            })?;
                            (name, Some(spec))
                        }
                        None => (inner.as_str(), None),
                    };
                    if name.is_empty() {
                        return Err(Error::InvalidPlaceholder(format!("unnamed placeholder in {source:?}")));
                    }
                    pieces.push(Piece::Placeholder { name: name.to_owned(), spec });
                }
                (_, Some(_)) => {
                    return Err(Error::InvalidPlaceholder(format!("empty placeholder in {source:?}")));
                }
                (stray, None) => {
                    return Err(Error::InvalidPlaceholder(format!("single `{stray}` in {source:?}")));
                }
            }
        }
        text.push_str(&source[last..]);
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        Ok(pieces)
    }

    pub fn source(&self) -> &Scalar {
        &self.source
    }

    /// Objects and arrays expose their flattened leaves under dot-joined
    /// paths (`{0}`, `{author.name}`); a scalar is exposed as `{value}`.
    pub fn render(&self, record: &Value) -> Result<String> {
        let names: IndexMap<String, Scalar> = match JsonType::of(record)? {
            JsonType::Scalar => [("value".to_owned(), Scalar::from_value(record)?)].into_iter().collect(),
            JsonType::Object | JsonType::Array => json_path::flatten(record)?
                .into_iter()
                .map(|(path, scalar)| (path.to_string(), scalar))
                .collect(),
        };
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Placeholder { name, spec } => {
                    let value = names.get(name).ok_or_else(|| Error::TemplateKeyMissing(name.clone()))?;
                    match spec {
                        Some(spec) => out.push_str(&spec.apply(value)),
                        None => out.push_str(&value.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}

impl Align {
    fn from_char(c: char) -> Option<Align> {
        match c {
            '<' => Some(Align::Left),
            '>' => Some(Align::Right),
            '^' => Some(Align::Center),
            _ => None,
        }
    }
}

impl FormatSpec {
    fn parse(spec: &str) -> Option<FormatSpec> {
        let chars: Vec<char> = spec.chars().collect();
        let (fill, align, width) = match chars.as_slice() {
            [fill, align, rest @ ..] if Align::from_char(*align).is_some() => (*fill, Align::from_char(*align), rest),
            [align, rest @ ..] if Align::from_char(*align).is_some() => (' ', Align::from_char(*align), rest),
            rest => (' ', None, rest),
        };
        if !width.iter().all(char::is_ascii_digit) {
            return None;
        }
        let width = match width {
            [] => 0,
            digits => digits.iter().collect::<String>().parse().ok()?,
        };
        Some(FormatSpec { fill, align, width })
    }

    fn apply(&self, value: &Scalar) -> String {
        let text = value.to_string();
        let pad = self.width.saturating_sub(text.chars().count());
        if pad == 0 {
            return text;
        }
        let align = self.align.unwrap_or(match value {
            Scalar::Int(_) => Align::Right,
            _ => Align::Left,
        });
        let (before, after) = match align {
            Align::Left => (0, pad),
            Align::Right => (pad, 0),
            Align::Center => (pad / 2, pad - pad / 2),
        };
        let fill = |n: usize| std::iter::repeat_n(self.fill, n).collect::<String>();
        format!("{}{text}{}", fill(before), fill(after))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CACHE
// ————————————————————————————————————————————————————————————————————————————

/// Rendered display strings, one write-once slot per record position.
///
/// Records are never modified after loading, so a slot is never invalidated.
#[derive(Debug, Default)]
pub struct DisplayCache {
    slots: Vec<OnceCell<String>>,
}

impl DisplayCache {
    pub fn new(len: usize) -> Self {
        DisplayCache { slots: (0..len).map(|_| OnceCell::new()).collect() }
    }

    /// Cached string for `index`, computing it with `render` on first use.
    /// Positions outside the cache are rendered every time.
    pub fn get_or_render<F>(&self, index: usize, render: F) -> Cow<'_, str>
    where
        F: FnOnce() -> String,
    {
        match self.slots.get(index) {
            Some(slot) => Cow::Borrowed(slot.get_or_init(render).as_str()),
            None => Cow::Owned(render()),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index).and_then(OnceCell::get).map(String::as_str)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
