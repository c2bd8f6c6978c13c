//! Typed search fields.
//!
//! A [`Field`] is a named predicate over one location of a record. The three
//! kinds (option, integer, text) each accept their own shape of [`Criteria`];
//! a record without a value at the field's key passes or fails according to
//! the query's `accept_missing` flag.
use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::json_path::{self, Path, Scalar};

// ————————————————————————————————————————————————————————————————————————————
// OPERATORS
// ————————————————————————————————————————————————————————————————————————————

/// How several boolean outcomes combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    /// all must hold (`and`, `all`)
    #[default]
    And,
    /// at least one must hold (`or`, `any`)
    Or,
}

impl Operator {
    pub fn apply<I: IntoIterator<Item = bool>>(self, outcomes: I) -> bool {
        let mut outcomes = outcomes.into_iter();
        match self {
            Operator::And => outcomes.all(|x| x),
            Operator::Or => outcomes.any(|x| x),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::And => "and",
            Operator::Or => "or",
        }
    }
}

impl FromStr for Operator {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "and" | "all" => Ok(Operator::And),
            "or" | "any" => Ok(Operator::Or),
            _ => Err(Error::InvalidCriteriaValue(format!("unknown operator `{s}`"))),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> String {
        op.as_str().to_owned()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `record_value <comparison> criteria_value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Comparison {
    Lt,
    Leq,
    #[default]
    Eq,
    Neq,
    Geq,
    Gt,
}

impl Comparison {
    pub fn apply(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Leq => lhs <= rhs,
            Comparison::Eq => lhs == rhs,
            Comparison::Neq => lhs != rhs,
            Comparison::Geq => lhs >= rhs,
            Comparison::Gt => lhs > rhs,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::Lt => "lt",
            Comparison::Leq => "leq",
            Comparison::Eq => "eq",
            Comparison::Neq => "neq",
            Comparison::Geq => "geq",
            Comparison::Gt => "gt",
        }
    }
}

impl FromStr for Comparison {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lt" | "<" => Ok(Comparison::Lt),
            "leq" | "<=" => Ok(Comparison::Leq),
            "eq" | "=" | "==" => Ok(Comparison::Eq),
            "neq" | "!=" => Ok(Comparison::Neq),
            "geq" | ">=" => Ok(Comparison::Geq),
            "gt" | ">" => Ok(Comparison::Gt),
            _ => Err(Error::InvalidCriteriaValue(format!("unknown comparison `{s}`"))),
        }
    }
}

impl TryFrom<String> for Comparison {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Comparison> for String {
    fn from(cmp: Comparison) -> String {
        cmp.as_str().to_owned()
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CRITERIA
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// One value of a single-selection option field.
    Single(Scalar),
    /// Several values of a multi-selection option field.
    Multi { values: IndexSet<Scalar>, operator: Operator },
    Integer { value: i64, comparison: Comparison },
    /// Substrings searched for in a text value.
    Text { values: Vec<String>, operator: Operator, case_sensitive: bool },
}

impl Criteria {
    fn describe(&self) -> &'static str {
        match self {
            Criteria::Single(_) => "single option",
            Criteria::Multi { .. } => "multiple option",
            Criteria::Integer { .. } => "integer",
            Criteria::Text { .. } => "text",
        }
    }
}

/// Criteria for one field plus the per-query switches that go with them.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldQuery {
    pub criteria: Criteria,
    pub accept_missing: bool,
    pub invert: bool,
}

impl FieldQuery {
    pub fn new(criteria: Criteria) -> Self {
        FieldQuery { criteria, accept_missing: true, invert: false }
    }

    pub fn accept_missing(mut self, accept_missing: bool) -> Self {
        self.accept_missing = accept_missing;
        self
    }

    pub fn invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }
}

// ————————————————————————————————————————————————————————————————————————————
// FIELDS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: Path,
    pub optional: bool,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Option(OptionField),
    Integer(IntegerField),
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionField {
    /// Closed universe of legal criteria values.
    pub values: IndexSet<Scalar>,
    pub multi_selection: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegerField {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Option(_) => "Option",
            FieldKind::Integer(_) => "Integer",
            FieldKind::Text => "Text",
        }
    }
}

impl Field {
    pub fn new(key: impl Into<Path>, kind: FieldKind) -> Self {
        Field { key: key.into(), optional: true, kind }
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    /// Fails if `criteria` cannot be used with this field.
    pub fn validate(&self, criteria: &Criteria) -> Result<()> {
        match (&self.kind, criteria) {
            (FieldKind::Option(opt), Criteria::Single(value)) => {
                if opt.multi_selection {
                    return Err(Error::InvalidCriteriaValue(
                        "this field takes a set of values".to_owned(),
                    ));
                }
                if !opt.values.contains(value) {
                    return Err(Error::InvalidCriteriaValue(format!(
                        "invalid value {value}, must be one of {}",
                        list_scalars(opt.values.iter())
                    )));
                }
                Ok(())
            }
            (FieldKind::Option(opt), Criteria::Multi { values, .. }) => {
                if !opt.multi_selection {
                    return Err(Error::InvalidCriteriaValue(
                        "this field takes a single value".to_owned(),
                    ));
                }
                let unknown: Vec<&Scalar> = values.iter().filter(|v| !opt.values.contains(*v)).collect();
                if !unknown.is_empty() {
                    return Err(Error::InvalidCriteriaValue(format!(
                        "invalid values {}, must be included in {}",
                        list_scalars(unknown.into_iter()),
                        list_scalars(opt.values.iter())
                    )));
                }
                Ok(())
            }
            (FieldKind::Integer(bounds), Criteria::Integer { value, .. }) => {
                if let Some(min) = bounds.min.filter(|min| value < min) {
                    return Err(Error::InvalidCriteriaValue(format!("invalid value {value}, must be >= {min}")));
                }
                if let Some(max) = bounds.max.filter(|max| value > max) {
                    return Err(Error::InvalidCriteriaValue(format!("invalid value {value}, must be <= {max}")));
                }
                Ok(())
            }
            (FieldKind::Text, Criteria::Text { .. }) => Ok(()),
            (kind, criteria) => Err(Error::InvalidCriteriaValue(format!(
                "{} criteria cannot be used on a {} field",
                criteria.describe(),
                kind.type_name()
            ))),
        }
    }

    /// Test a value already extracted from a record.
    pub fn test(&self, value: &Value, criteria: &Criteria) -> Result<bool> {
        self.validate(criteria)?;
        Ok(self.matches(value, criteria))
    }

    /// Test `record`: a missing value yields `query.accept_missing`.
    pub fn compare(&self, record: &Value, query: &FieldQuery) -> Result<bool> {
        self.validate(&query.criteria)?;
        Ok(self.compare_validated(record, query))
    }

    pub(crate) fn compare_validated(&self, record: &Value, query: &FieldQuery) -> bool {
        match json_path::get(record, &self.key) {
            Ok(value) => self.matches(value, &query.criteria) != query.invert,
            Err(_) => query.accept_missing,
        }
    }

    fn matches(&self, value: &Value, criteria: &Criteria) -> bool {
        match criteria {
            Criteria::Single(expected) => match value {
                Value::Array(_) | Value::Object(_) => member_set(value).contains(expected),
                _ => Scalar::from_value(value).is_ok_and(|found| &found == expected),
            },
            Criteria::Multi { values, operator } => {
                let found = member_set(value);
                let shared = values.iter().filter(|v| found.contains(*v)).count();
                match operator {
                    Operator::And => shared == values.len(),
                    Operator::Or => shared > 0,
                }
            }
            Criteria::Integer { value: expected, comparison } => match value.as_i64() {
                Some(found) => comparison.apply(found, *expected),
                None => {
                    log::debug!("value {value} at `{}` is not an integer", self.key);
                    false
                }
            },
            Criteria::Text { values, operator, case_sensitive } => match value.as_str() {
                Some(text) if *case_sensitive => operator.apply(values.iter().map(|sub| text.contains(sub.as_str()))),
                Some(text) => {
                    let text = text.to_lowercase();
                    operator.apply(values.iter().map(|sub| text.contains(&sub.to_lowercase())))
                }
                None => {
                    log::debug!("value {value} at `{}` is not a string", self.key);
                    false
                }
            },
        }
    }
}

/// Scalars held by `value`: itself, or the scalar members of an array/object.
fn member_set(value: &Value) -> IndexSet<Scalar> {
    match value {
        Value::Array(items) => items.iter().filter_map(|v| Scalar::from_value(v).ok()).collect(),
        Value::Object(map) => map.values().filter_map(|v| Scalar::from_value(v).ok()).collect(),
        scalar => Scalar::from_value(scalar).into_iter().collect(),
    }
}

fn list_scalars<'a>(values: impl Iterator<Item = &'a Scalar>) -> String {
    let items: Vec<String> = values.map(|v| v.to_value().to_string()).collect();
    format!("{{{}}}", items.join(", "))
}

// ————————————————————————————————————————————————————————————————————————————
// JSON FORM
// ————————————————————————————————————————————————————————————————————————————

fn default_optional() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionSpec {
    key: Path,
    #[serde(default = "default_optional")]
    optional: bool,
    values: Option<Vec<Value>>,
    #[serde(default)]
    multi_selection: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IntegerSpec {
    key: Path,
    #[serde(default = "default_optional")]
    optional: bool,
    min: Option<i64>,
    max: Option<i64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TextSpec {
    key: Path,
    #[serde(default = "default_optional")]
    optional: bool,
}

impl Field {
    /// Decode a field from its JSON form, dispatching on the `type` key.
    ///
    /// `records` is the data the field will search; an option field that lists
    /// no `values` takes every scalar found at its key as its universe.
    pub fn from_json(name: &str, spec: &Value, records: &[Value]) -> Result<Field> {
        let invalid = |message: String| Error::InvalidFieldSpec { name: name.to_owned(), message };
        let Value::Object(map) = spec else {
            return Err(invalid("must be a json object".to_owned()));
        };
        let mut map = map.clone();
        let type_name = match map.shift_remove("type") {
            Some(Value::String(t)) => t,
            Some(other) => return Err(invalid(format!("`type` must be a string, got {other}"))),
            None => return Err(invalid("must have key `type`".to_owned())),
        };
        let attrs = Value::Object(map);
        let decode_error = |err: Error| invalid(err.to_string());

        match type_name.as_str() {
            "Option" => {
                let spec: OptionSpec = crate::path_de::from_value_with_path(attrs).map_err(decode_error)?;
                let values = match spec.values {
                    Some(values) => values
                        .iter()
                        .map(Scalar::from_value)
                        .collect::<Result<IndexSet<_>>>()
                        .map_err(decode_error)?,
                    None => collect_values(records, &spec.key),
                };
                let kind = FieldKind::Option(OptionField { values, multi_selection: spec.multi_selection });
                Ok(Field { key: spec.key, optional: spec.optional, kind })
            }
            "Integer" => {
                let spec: IntegerSpec = crate::path_de::from_value_with_path(attrs).map_err(decode_error)?;
                if let (Some(min), Some(max)) = (spec.min, spec.max) {
                    if min > max {
                        return Err(invalid(format!("min ({min}) is greater than max ({max})")));
                    }
                }
                let kind = FieldKind::Integer(IntegerField { min: spec.min, max: spec.max });
                Ok(Field { key: spec.key, optional: spec.optional, kind })
            }
            "Text" => {
                let spec: TextSpec = crate::path_de::from_value_with_path(attrs).map_err(decode_error)?;
                Ok(Field { key: spec.key, optional: spec.optional, kind: FieldKind::Text })
            }
            _ => Err(Error::UnknownFieldType(type_name)),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), Value::from(self.kind.type_name()));
        out.insert("key".into(), Value::from(self.key.to_string()));
        out.insert("optional".into(), Value::Bool(self.optional));
        match &self.kind {
            FieldKind::Option(opt) => {
                out.insert("values".into(), opt.values.iter().map(Scalar::to_value).collect());
                if opt.multi_selection {
                    out.insert("multi_selection".into(), Value::Bool(true));
                }
            }
            FieldKind::Integer(bounds) => {
                if let Some(min) = bounds.min {
                    out.insert("min".into(), Value::from(min));
                }
                if let Some(max) = bounds.max {
                    out.insert("max".into(), Value::from(max));
                }
            }
            FieldKind::Text => {}
        }
        Value::Object(out)
    }
}

fn collect_values(records: &[Value], key: &Path) -> IndexSet<Scalar> {
    records
        .iter()
        .filter_map(|record| json_path::get(record, key).ok())
        .flat_map(member_set)
        .collect()
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn colors(multi_selection: bool) -> Field {
        let values = ["red", "blue", "green"].into_iter().map(Scalar::from).collect();
        Field::new("color", FieldKind::Option(OptionField { values, multi_selection }))
    }

    fn size() -> Field {
        Field::new("size", FieldKind::Integer(IntegerField { min: Some(0), max: Some(10) }))
    }

    fn multi(values: &[&str], operator: Operator) -> Criteria {
        Criteria::Multi { values: values.iter().copied().map(Scalar::from).collect(), operator }
    }

    fn text(values: &[&str], operator: Operator, case_sensitive: bool) -> Criteria {
        Criteria::Text { values: values.iter().map(|s| s.to_string()).collect(), operator, case_sensitive }
    }

    #[test]
    fn missing_value_follows_accept_missing_for_every_kind() {
        let record = json!({"other": 1});
        let cases = [
            (colors(false), Criteria::Single(Scalar::from("red"))),
            (colors(true), multi(&["red"], Operator::Or)),
            (size(), Criteria::Integer { value: 5, comparison: Comparison::Gt }),
            (Field::new("title", FieldKind::Text), text(&["x"], Operator::Or, false)),
        ];
        for (field, criteria) in cases {
            let query = FieldQuery::new(criteria);
            assert!(field.compare(&record, &query).unwrap());
            assert!(!field.compare(&record, &query.clone().accept_missing(false)).unwrap());
            // inversion never applies to missing values
            assert!(field.compare(&record, &query.invert(true)).unwrap());
        }
    }

    #[test]
    fn single_option_matches_scalars_and_collections() {
        let field = colors(false);
        let red = Criteria::Single(Scalar::from("red"));
        assert!(field.test(&json!("red"), &red).unwrap());
        assert!(!field.test(&json!("blue"), &red).unwrap());
        assert!(field.test(&json!(["blue", "red"]), &red).unwrap());
        assert!(field.test(&json!({"a": "red"}), &red).unwrap());
        let err = field.test(&json!("red"), &Criteria::Single(Scalar::from("pink")));
        assert!(matches!(err, Err(Error::InvalidCriteriaValue(_))));
    }

    #[test]
    fn multi_option_and_or() {
        let field = colors(true);
        let value = json!(["red", "blue"]);
        assert!(field.test(&value, &multi(&["red", "green"], Operator::Or)).unwrap());
        assert!(!field.test(&value, &multi(&["red", "green"], Operator::And)).unwrap());
        assert!(field.test(&value, &multi(&["red", "blue"], Operator::And)).unwrap());
        assert!(!field.test(&value, &multi(&["green"], Operator::Or)).unwrap());
        // a scalar record value acts as a one-element set
        assert!(field.test(&json!("red"), &multi(&["red", "green"], Operator::Or)).unwrap());
        assert!(!field.test(&json!("red"), &multi(&["red", "green"], Operator::And)).unwrap());
    }

    #[test]
    fn selection_mode_is_fixed_by_the_field() {
        assert!(colors(true).validate(&Criteria::Single(Scalar::from("red"))).is_err());
        assert!(colors(false).validate(&multi(&["red"], Operator::Or)).is_err());
        assert!(matches!(
            colors(true).validate(&multi(&["red", "pink"], Operator::Or)),
            Err(Error::InvalidCriteriaValue(_))
        ));
    }

    #[test]
    fn integer_comparisons_and_bounds() {
        let field = size();
        let gt5 = Criteria::Integer { value: 5, comparison: Comparison::Gt };
        assert!(field.test(&json!(7), &gt5).unwrap());
        assert!(!field.test(&json!(3), &gt5).unwrap());
        assert!(!field.test(&json!("7"), &gt5).unwrap());

        let out_of_range = Criteria::Integer { value: 15, comparison: Comparison::Gt };
        assert!(matches!(field.test(&json!(7), &out_of_range), Err(Error::InvalidCriteriaValue(_))));
        let below = Criteria::Integer { value: -1, comparison: Comparison::Eq };
        assert!(field.test(&json!(7), &below).is_err());

        let table = [
            (Comparison::Lt, false),
            (Comparison::Leq, true),
            (Comparison::Eq, true),
            (Comparison::Neq, false),
            (Comparison::Geq, true),
            (Comparison::Gt, false),
        ];
        for (comparison, expected) in table {
            let criteria = Criteria::Integer { value: 4, comparison };
            assert_eq!(field.test(&json!(4), &criteria).unwrap(), expected, "{comparison}");
        }
    }

    #[test]
    fn text_any_all_and_case() {
        let field = Field::new("title", FieldKind::Text);
        let value = json!("The Rust Programming Language");
        assert!(field.test(&value, &text(&["Rust", "Python"], Operator::Or, true)).unwrap());
        assert!(!field.test(&value, &text(&["Rust", "Python"], Operator::And, true)).unwrap());
        assert!(!field.test(&value, &text(&["rust"], Operator::Or, true)).unwrap());
        assert!(field.test(&value, &text(&["rust", "LANGUAGE"], Operator::And, false)).unwrap());
        assert!(!field.test(&json!(12), &text(&["1"], Operator::Or, false)).unwrap());
    }

    #[test]
    fn mismatched_criteria_kind_is_rejected() {
        let err = size().validate(&text(&["a"], Operator::Or, false)).unwrap_err();
        assert!(err.to_string().contains("Integer"));
    }

    #[test]
    fn invert_negates_present_values() {
        let field = size();
        let query = FieldQuery::new(Criteria::Integer { value: 5, comparison: Comparison::Gt }).invert(true);
        assert!(!field.compare(&json!({"size": 7}), &query).unwrap());
        assert!(field.compare(&json!({"size": 2}), &query).unwrap());
    }

    #[test]
    fn operators_and_comparisons_parse_aliases() {
        assert_eq!("ALL".parse::<Operator>().unwrap(), Operator::And);
        assert_eq!("any".parse::<Operator>().unwrap(), Operator::Or);
        assert_eq!(">=".parse::<Comparison>().unwrap(), Comparison::Geq);
        assert_eq!("==".parse::<Comparison>().unwrap(), Comparison::Eq);
        assert!("xor".parse::<Operator>().is_err());
        let op: Operator = serde_json::from_value(json!("Or")).unwrap();
        assert_eq!(op, Operator::Or);
        assert_eq!(serde_json::to_value(Comparison::Neq).unwrap(), json!("neq"));
    }

    #[test]
    fn from_json_dispatches_on_type() {
        let records = vec![json!({"tags": ["a", "b"]}), json!({"tags": ["b", "c"]}), json!({})];

        let field = Field::from_json("Tags", &json!({"type": "Option", "key": "tags", "multi_selection": true}), &records).unwrap();
        let FieldKind::Option(opt) = &field.kind else { panic!("expected an option field") };
        assert!(opt.multi_selection);
        assert_eq!(opt.values.iter().map(|v| v.to_string()).collect::<Vec<_>>(), ["a", "b", "c"]);

        let field = Field::from_json("Pages", &json!({"type": "Integer", "key": "pages", "min": 1, "optional": false}), &records).unwrap();
        assert!(!field.optional);
        assert_eq!(field.kind, FieldKind::Integer(IntegerField { min: Some(1), max: None }));
        assert_eq!(field.to_json(), json!({"type": "Integer", "key": "pages", "optional": false, "min": 1}));

        let unknown = Field::from_json("X", &json!({"type": "Date", "key": "d"}), &records);
        assert!(matches!(unknown, Err(Error::UnknownFieldType(t)) if t == "Date"));

        let bad = Field::from_json("X", &json!({"type": "Text", "key": "d", "colour": 1}), &records);
        assert!(matches!(bad, Err(Error::InvalidFieldSpec { name, .. }) if name == "X"));

        let inverted = Field::from_json("X", &json!({"type": "Integer", "key": "n", "min": 3, "max": 1}), &records);
        assert!(inverted.is_err());
    }
}
