//! Records plus the named fields used to search them.
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::field::{Field, FieldQuery, Operator};
use crate::json_path::JsonType;

/// Field name → criteria for that field.
pub type CriteriaMap = IndexMap<String, FieldQuery>;

#[derive(Debug, Clone, Default)]
pub struct Database {
    records: Vec<Value>,
    fields: IndexMap<String, Field>,
}

impl Database {
    /// Every record must be a json object.
    pub fn new(records: Vec<Value>, fields: IndexMap<String, Field>) -> Result<Self> {
        for record in &records {
            JsonType::Object.check(record)?;
        }
        Ok(Database { records, fields })
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&Value> {
        self.records.get(index)
    }

    pub fn fields(&self) -> &IndexMap<String, Field> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records passing the query, in input order.
    ///
    /// Each named field is tested on every record and the outcomes are
    /// combined with `operator`.
    pub fn search(&self, criteria: &CriteriaMap, operator: Operator) -> Result<Vec<&Value>> {
        let hits = self.search_indices(criteria, operator)?;
        Ok(hits.into_iter().map(|i| &self.records[i]).collect())
    }

    /// Same as [`Database::search`], returning record positions.
    pub fn search_indices(&self, criteria: &CriteriaMap, operator: Operator) -> Result<Vec<usize>> {
        let checks = self.check_query(criteria)?;
        let hits = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                operator.apply(checks.iter().map(|(field, query)| field.compare_validated(record, query)))
            })
            .map(|(index, _)| index)
            .collect();
        Ok(hits)
    }

    fn check_query<'a>(&'a self, criteria: &'a CriteriaMap) -> Result<Vec<(&'a Field, &'a FieldQuery)>> {
        for (name, field) in &self.fields {
            if !field.optional && !criteria.contains_key(name) {
                return Err(Error::MissingRequiredField(name.clone()));
            }
        }
        let mut checks = Vec::with_capacity(criteria.len());
        for (name, query) in criteria {
            let field = self
                .fields
                .get(name)
                .ok_or_else(|| Error::UnknownQueryField(name.clone()))?;
            field.validate(&query.criteria).map_err(|e| e.in_field(name))?;
            checks.push((field, query));
        }
        Ok(checks)
    }

    // ——————————————————————————————————————————————————————————————————————
    // JSON FORM
    // ——————————————————————————————————————————————————————————————————————

    /// Decode `{"data": [...] | {...}, "fields": {name: spec}}`.
    pub fn from_json(doc: &Value) -> Result<Database> {
        let Value::Object(doc) = doc else {
            return Err(Error::MalformedDocument("json database must be a json object".to_owned()));
        };
        let data = doc
            .get("data")
            .ok_or_else(|| Error::MalformedDocument("json database has no `data` member".to_owned()))?;
        let fields = doc
            .get("fields")
            .ok_or_else(|| Error::MalformedDocument("json database has no `fields` member".to_owned()))?;
        for name in doc.keys().filter(|k| !matches!(k.as_str(), "data" | "fields")) {
            log::warn!("unused key `{name}` in json database");
        }
        let Value::Object(fields) = fields else {
            return Err(Error::MalformedDocument("`fields` must map field names to specifications".to_owned()));
        };
        let records = records_from_json(data)?;
        let fields = fields
            .iter()
            .map(|(name, spec)| Ok((name.clone(), Field::from_json(name, spec, &records)?)))
            .collect::<Result<IndexMap<_, _>>>()?;
        Ok(Database { records, fields })
    }

    pub fn to_json(&self) -> Value {
        let fields: Map<String, Value> =
            self.fields.iter().map(|(name, field)| (name.clone(), field.to_json())).collect();
        let mut out = Map::new();
        out.insert("fields".into(), Value::Object(fields));
        out.insert("data".into(), Value::Array(self.records.clone()));
        Value::Object(out)
    }
}

/// Records of a `data` member: an array, or an object whose values are the
/// records. Entries that are not json objects are skipped with a warning.
pub(crate) fn records_from_json(data: &Value) -> Result<Vec<Value>> {
    let entries: Vec<(String, &Value)> = match data {
        Value::Array(items) => items.iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        _ => {
            return Err(Error::MalformedDocument(
                "`data` must be a json array or object".to_owned(),
            ));
        }
    };
    let mut records = Vec::with_capacity(entries.len());
    for (name, entry) in entries {
        if entry.is_object() {
            records.push(entry.clone());
        } else {
            log::warn!("invalid data element {name}: should be a json object, was ignored");
        }
    }
    Ok(records)
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Comparison, Criteria};
    use crate::json_path::Scalar;
    use serde_json::json;

    fn books() -> Database {
        Database::from_json(&json!({
            "fields": {
                "Genre": {"type": "Option", "key": "genre", "values": ["sf", "fantasy", "essay"]},
                "Pages": {"type": "Integer", "key": "pages", "min": 0, "max": 2000},
                "Title": {"type": "Text", "key": "title"},
            },
            "data": [
                {"title": "Dune", "genre": "sf", "pages": 612},
                {"title": "The Hobbit", "genre": "fantasy", "pages": 310},
                {"title": "Hyperion", "genre": "sf", "pages": 482},
                {"title": "Untitled draft"},
            ],
        }))
        .unwrap()
    }

    fn titles(records: Vec<&Value>) -> Vec<&str> {
        records.iter().map(|r| r["title"].as_str().unwrap()).collect()
    }

    fn genre(value: &str) -> FieldQuery {
        FieldQuery::new(Criteria::Single(Scalar::from(value))).accept_missing(false)
    }

    fn pages(value: i64, comparison: Comparison) -> FieldQuery {
        FieldQuery::new(Criteria::Integer { value, comparison }).accept_missing(false)
    }

    #[test]
    fn and_requires_every_field() {
        let db = books();
        let criteria: CriteriaMap =
            [("Genre".to_string(), genre("sf")), ("Pages".to_string(), pages(500, Comparison::Gt))].into_iter().collect();
        assert_eq!(titles(db.search(&criteria, Operator::And).unwrap()), ["Dune"]);
    }

    #[test]
    fn or_requires_any_field() {
        let db = books();
        let criteria: CriteriaMap =
            [("Genre".to_string(), genre("fantasy")), ("Pages".to_string(), pages(600, Comparison::Geq))].into_iter().collect();
        assert_eq!(titles(db.search(&criteria, Operator::Or).unwrap()), ["Dune", "The Hobbit"]);
    }

    #[test]
    fn empty_query_returns_everything_in_order() {
        let db = books();
        let all = db.search(&CriteriaMap::new(), Operator::And).unwrap();
        assert_eq!(titles(all), ["Dune", "The Hobbit", "Hyperion", "Untitled draft"]);
    }

    #[test]
    fn accept_missing_keeps_records_without_the_key() {
        let db = books();
        let criteria: CriteriaMap = [("Genre".to_string(), genre("sf").accept_missing(true))].into_iter().collect();
        assert_eq!(db.search_indices(&criteria, Operator::And).unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn query_preconditions() {
        let mut db = books();
        let unknown: CriteriaMap = [("Author".to_string(), genre("sf"))].into_iter().collect();
        assert!(matches!(db.search(&unknown, Operator::And), Err(Error::UnknownQueryField(n)) if n == "Author"));

        let invalid: CriteriaMap = [("Pages".to_string(), pages(5000, Comparison::Lt))].into_iter().collect();
        let err = db.search(&invalid, Operator::And).unwrap_err();
        assert!(matches!(&err, Error::Field { name, source } if name == "Pages" && matches!(**source, Error::InvalidCriteriaValue(_))));

        if let Some(field) = db.fields.get_mut("Title") {
            field.optional = false;
        }
        assert!(matches!(db.search(&CriteriaMap::new(), Operator::And), Err(Error::MissingRequiredField(n)) if n == "Title"));
    }

    #[test]
    fn object_data_and_non_object_records() {
        let db = Database::from_json(&json!({
            "fields": {},
            "data": {"a": {"n": 1}, "b": 3, "c": {"n": 2}},
        }))
        .unwrap();
        assert_eq!(db.len(), 2);
        assert!(Database::from_json(&json!({"fields": {}, "data": "nope"})).is_err());
        assert!(Database::from_json(&json!({"data": []})).is_err());
    }

    #[test]
    fn to_json_round_trips() {
        let db = books();
        let again = Database::from_json(&db.to_json()).unwrap();
        assert_eq!(again.fields(), db.fields());
        assert_eq!(again.records(), db.records());
    }

    #[test]
    fn new_rejects_non_object_records() {
        assert!(Database::new(vec![json!([1, 2])], IndexMap::new()).is_err());
    }
}
