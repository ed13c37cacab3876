// Generic row representation shared by all source drivers and the reducer.
use chrono::NaiveDateTime;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::cmp::Ordering;

/// Reserved leading column naming the source a row was fetched from.
pub const SOURCE_COLUMN: &str = "_source";

/// Tagged value union for everything that crosses a driver boundary.
///
/// Engine-native representations (decimals, BSON types, JSON scalars) are
/// normalized into this set before rows leave their driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Checked integer view. Floats are accepted only when they carry no
    /// fractional part; everything else is rejected by the caller.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Ordering used by min/max folding. Numeric variants compare across
    /// Int/Float; other variants only compare within their own kind.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Deep equality for join keys: numeric variants match across Int/Float.
    pub fn key_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => false,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => serializer.serialize_str(&ts.to_string()),
        }
    }
}

/// Ordered list of (column name, value) pairs.
///
/// Field order is the order columns were produced in; lookups are by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Inserts a field before all existing ones. Used for the reserved
    /// source-identity column.
    pub fn prepend(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(0, (name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Renames a field in place; no-op when the field is absent.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some((name, _)) = self.fields.iter_mut().find(|(n, _)| n == from) {
            *name = to.to_string();
        }
    }

    /// Merges fields from `other`, skipping names already present so join
    /// keys are never duplicated.
    pub fn merge(&mut self, other: &Row) {
        for (name, value) in &other.fields {
            if self.get(name).is_none() {
                self.fields.push((name.clone(), value.clone()));
            }
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
