//! Path lookups, flat views and side-by-side comparison of JSON records.
//!
//! Records are plain `serde_json::Value`s restricted to three kinds: objects,
//! arrays and scalars (string, integer, boolean). `null` and floats do not
//! classify and are reported as [`Error::MalformedJsonType`].
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const DEFAULT_SEPARATOR: char = '.';

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonType {
    Object,
    Array,
    Scalar,
}

/// A leaf value: the only JSON scalars a record may hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Location inside a JSON value, usually written as `a.b.0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<Segment>);

// ————————————————————————————————————————————————————————————————————————————
// CLASSIFICATION
// ————————————————————————————————————————————————————————————————————————————

impl JsonType {
    pub fn of(value: &Value) -> Result<JsonType> {
        match value {
            Value::Object(_) => Ok(JsonType::Object),
            Value::Array(_) => Ok(JsonType::Array),
            Value::String(_) | Value::Bool(_) => Ok(JsonType::Scalar),
            Value::Number(n) if n.is_i64() => Ok(JsonType::Scalar),
            Value::Number(n) if n.is_u64() => Err(Error::MalformedJsonType { found: "out of range integer" }),
            Value::Number(_) => Err(Error::MalformedJsonType { found: "float" }),
            Value::Null => Err(Error::MalformedJsonType { found: "null" }),
        }
    }

    /// Fails unless `value` classifies as `self`.
    pub fn check(self, value: &Value) -> Result<()> {
        let found = JsonType::of(value)?;
        if found == self {
            Ok(())
        } else {
            Err(Error::UnexpectedJsonType { expected: self, found })
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonType::Object => f.write_str("object"),
            JsonType::Array => f.write_str("array"),
            JsonType::Scalar => f.write_str("value"),
        }
    }
}

impl Scalar {
    pub fn from_value(value: &Value) -> Result<Scalar> {
        match value {
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::String(s) => Ok(Scalar::Str(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Scalar::Int(i)),
                None if n.is_u64() => Err(Error::MalformedJsonType { found: "out of range integer" }),
                None => Err(Error::MalformedJsonType { found: "float" }),
            },
            other => Err(Error::UnexpectedJsonType {
                expected: JsonType::Scalar,
                found: JsonType::of(other)?,
            }),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Str(s) => Value::String(s.clone()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Scalar::Str(s) => Value::String(s),
            other => other.to_value(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_owned())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// PATHS
// ————————————————————————————————————————————————————————————————————————————

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    /// Split `source` on `separator`. Every piece is kept as an object key;
    /// lookups reinterpret keys as indices when they meet an array.
    pub fn parse_with(source: &str, separator: char) -> Self {
        if source.is_empty() {
            return Path::root();
        }
        Path(source.split(separator).map(|s| Segment::Key(s.to_owned())).collect())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment);
        Path(segments)
    }

    pub fn joined(&self, separator: char) -> String {
        let mut out = String::new();
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            match segment {
                Segment::Key(key) => out.push_str(key),
                Segment::Index(index) => out.push_str(&index.to_string()),
            }
        }
        out
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Path(segments)
    }
}

impl From<&str> for Path {
    fn from(source: &str) -> Self {
        Path::parse_with(source, DEFAULT_SEPARATOR)
    }
}

impl FromStr for Path {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Path::from(s))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined(DEFAULT_SEPARATOR))
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Ok(Path::from(source.as_str()))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// LOOKUP
// ————————————————————————————————————————————————————————————————————————————

/// Value at `path`. Fails when any segment is absent; no coercion besides
/// reading a numeric key as an array index.
pub fn get<'a>(root: &'a Value, path: &Path) -> Result<&'a Value> {
    if path.is_empty() {
        return Err(Error::EmptyPath);
    }
    let mut current = root;
    for segment in path.segments() {
        let next = match (current, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key),
            (Value::Array(items), Segment::Index(index)) => items.get(*index),
            (Value::Array(items), Segment::Key(key)) => {
                key.parse::<usize>().ok().and_then(|index| items.get(index))
            }
            _ => None,
        };
        current = next.ok_or_else(|| Error::PathNotFound { path: path.to_string() })?;
    }
    Ok(current)
}

pub fn has(root: &Value, path: &Path) -> bool {
    get(root, path).is_ok()
}

/// [`get`], failing unless the value found classifies as `expected`.
pub fn get_typed<'a>(root: &'a Value, path: &Path, expected: JsonType) -> Result<&'a Value> {
    let value = get(root, path)?;
    expected.check(value).map_err(|err| match err {
        Error::UnexpectedJsonType { expected, found } => {
            Error::UnexpectedJsonTypeAt { path: path.to_string(), expected, found }
        }
        other => other,
    })?;
    Ok(value)
}

// ————————————————————————————————————————————————————————————————————————————
// COMPARISON
// ————————————————————————————————————————————————————————————————————————————

/// Which differences between two values are errors rather than reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
    /// Fail when the right value has object keys the left lacks, or arrays
    /// of different lengths.
    pub strict_keys: bool,
    /// Fail when a shared location holds different json types.
    pub strict_types: bool,
}

/// One location reached on both sides of a [`compare`].
#[derive(Debug, Clone, PartialEq)]
pub enum Alignment<'a> {
    /// Scalars on both sides.
    Common { path: Path, left: &'a Value, right: &'a Value },
    /// Different json types on each side.
    Differ { path: Path, left: &'a Value, right: &'a Value },
}

/// Walk `left` and `right` together and report every shared scalar location
/// and every location whose json types differ, in the right value's order.
///
/// Object keys missing from either side and array elements beyond the
/// shorter array are skipped unless `options.strict_keys` is set.
pub fn compare<'a>(left: &'a Value, right: &'a Value, options: CompareOptions) -> Result<Vec<Alignment<'a>>> {
    compare_with(
        left,
        right,
        options,
        |path, left, right| Some(Alignment::Common { path: path.clone(), left, right }),
        |path, left, right| Some(Alignment::Differ { path: path.clone(), left, right }),
    )
}

/// [`compare`] with caller supplied callbacks for common scalars and type
/// differences; `None` results are dropped.
pub fn compare_with<'a, T, C, D>(
    left: &'a Value,
    right: &'a Value,
    options: CompareOptions,
    mut on_common: C,
    mut on_differ: D,
) -> Result<Vec<T>>
where
    C: FnMut(&Path, &'a Value, &'a Value) -> Option<T>,
    D: FnMut(&Path, &'a Value, &'a Value) -> Option<T>,
{
    struct Walk<'w, C, D> {
        options: CompareOptions,
        on_common: &'w mut C,
        on_differ: &'w mut D,
    }

    impl<'w, C, D> Walk<'w, C, D> {
        fn visit<'a, T>(&mut self, out: &mut Vec<T>, path: Path, left: &'a Value, right: &'a Value) -> Result<()>
        where
            C: FnMut(&Path, &'a Value, &'a Value) -> Option<T>,
            D: FnMut(&Path, &'a Value, &'a Value) -> Option<T>,
        {
            match (JsonType::of(left)?, JsonType::of(right)?, left, right) {
                (JsonType::Scalar, JsonType::Scalar, _, _) => out.extend((self.on_common)(&path, left, right)),
                (_, _, Value::Array(l_items), Value::Array(r_items)) => {
                    if self.options.strict_keys && l_items.len() != r_items.len() {
                        return Err(Error::ArrayLengthMismatch {
                            path: path.to_string(),
                            left: l_items.len(),
                            right: r_items.len(),
                        });
                    }
                    for (index, (l, r)) in l_items.iter().zip(r_items).enumerate() {
                        self.visit(out, path.child(Segment::Index(index)), l, r)?;
                    }
                }
                (_, _, Value::Object(l_map), Value::Object(r_map)) => {
                    if self.options.strict_keys {
                        let extra: Vec<String> = r_map.keys().filter(|k| !l_map.contains_key(*k)).cloned().collect();
                        if !extra.is_empty() {
                            return Err(Error::UnexpectedKeys { path: path.to_string(), keys: extra });
                        }
                    }
                    for (key, r) in r_map {
                        if let Some(l) = l_map.get(key) {
                            self.visit(out, path.child(Segment::Key(key.clone())), l, r)?;
                        }
                    }
                }
                (l_type, r_type, _, _) if self.options.strict_types => {
                    return Err(Error::JsonTypeMismatch { path: path.to_string(), left: l_type, right: r_type });
                }
                _ => out.extend((self.on_differ)(&path, left, right)),
            }
            Ok(())
        }
    }

    let mut out = Vec::new();
    let mut walk = Walk { options, on_common: &mut on_common, on_differ: &mut on_differ };
    walk.visit(&mut out, Path::root(), left, right)?;
    Ok(out)
}

// ————————————————————————————————————————————————————————————————————————————
// FLAT VIEW
// ————————————————————————————————————————————————————————————————————————————

/// Every leaf of `root` with its full path, depth first, in key/array order.
pub fn flatten(root: &Value) -> Result<Vec<(Path, Scalar)>> {
    fn walk(out: &mut Vec<(Path, Scalar)>, path: Path, value: &Value) -> Result<()> {
        match value {
            Value::Object(map) => {
                for (key, sub) in map {
                    walk(out, path.child(Segment::Key(key.clone())), sub)?;
                }
            }
            Value::Array(items) => {
                for (index, sub) in items.iter().enumerate() {
                    walk(out, path.child(Segment::Index(index)), sub)?;
                }
            }
            scalar => out.push((path, Scalar::from_value(scalar)?)),
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(&mut out, Path::root(), root)?;
    Ok(out)
}

/// Inverse of [`flatten`]: groups leaves by their first segment and recurses.
pub fn expand<I>(flat: I) -> Result<Value>
where
    I: IntoIterator<Item = (Path, Scalar)>,
{
    let entries = flat.into_iter().map(|(path, scalar)| (path.0, scalar)).collect();
    expand_level(entries, &Path::root())
}

type FlatEntries = Vec<(Vec<Segment>, Scalar)>;

fn expand_level(mut entries: FlatEntries, prefix: &Path) -> Result<Value> {
    if entries.is_empty() {
        return Err(Error::EmptyFlatJson { path: prefix.to_string() });
    }
    if entries.iter().any(|(segments, _)| segments.is_empty()) {
        if entries.len() > 1 {
            return Err(Error::AmbiguousFlatJson { path: prefix.to_string() });
        }
        let (_, scalar) = entries.remove(0);
        return Ok(scalar.into_value());
    }
    let mixed = || Error::MixedPathSegments { path: prefix.to_string() };
    let keyed = matches!(entries[0].0[0], Segment::Key(_));

    if keyed {
        let mut groups: IndexMap<String, FlatEntries> = IndexMap::new();
        for (mut segments, scalar) in entries {
            match segments.remove(0) {
                Segment::Key(key) => groups.entry(key).or_default().push((segments, scalar)),
                Segment::Index(_) => return Err(mixed()),
            }
        }
        let mut map = Map::new();
        for (key, group) in groups {
            let value = expand_level(group, &prefix.child(Segment::Key(key.clone())))?;
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    } else {
        let mut groups: BTreeMap<usize, FlatEntries> = BTreeMap::new();
        for (mut segments, scalar) in entries {
            match segments.remove(0) {
                Segment::Index(index) => groups.entry(index).or_default().push((segments, scalar)),
                Segment::Key(_) => return Err(mixed()),
            }
        }
        // indices must be exactly 0..n; the first gap is an empty element
        let gap = groups.keys().enumerate().find_map(|(position, &index)| (index != position).then_some(position));
        if let Some(missing) = gap {
            return Err(Error::EmptyFlatJson { path: prefix.child(Segment::Index(missing)).to_string() });
        }
        let items = groups
            .into_iter()
            .map(|(index, group)| expand_level(group, &prefix.child(Segment::Index(index))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Array(items))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
