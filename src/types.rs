//! Dynamic row values, the type map, and the hexify transform.
//!
//! `Value` replaces `myyrakle-mysql-binlog-rs`'s `CellValue`: a tagged variant per spec
//! design note §9, narrowed to what a MySQL-to-PostgreSQL row value
//! actually needs (no JSON variant, collapsed integer widths).

use std::collections::{HashMap, HashSet};

/// A single decoded column value, independent of MySQL's wire width.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(String),
    Str(String),
    Bytes(Vec<u8>),
    DateTime(chrono::NaiveDateTime),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Lowercase-hex-encode a `Bytes` value. A no-op on every other
    /// variant, including `Null` — applying it twice is the identity,
    /// satisfying the hexify idempotence invariant.
    pub fn hexify(self) -> Value {
        match self {
            Value::Bytes(bytes) => Value::Str(hex_lower(&bytes)),
            other => other,
        }
    }

    /// Render as a `serde_json::Value`, the wire format the staging
    /// table stores `event_data` in. `Bytes` renders as its hex string
    /// rather than a JSON array of numbers — staged rows are always
    /// hexified by the time they reach the target (spec §3 invariant),
    /// but this keeps the conversion total regardless.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::UInt(u) => serde_json::Value::from(*u),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(d) => serde_json::Value::String(d.clone()),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(hex_lower(b)),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_string()),
            Value::Date(d) => serde_json::Value::String(d.to_string()),
            Value::Time(t) => serde_json::Value::String(t.to_string()),
        }
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// The declared MySQL type of a single column, as reported by
/// `information_schema.COLUMNS.DATA_TYPE` (e.g. `"varchar"`, `"blob"`,
/// `"bit"`, `"int"`).
pub type DeclaredType = String;

/// `table -> column -> declared type`. Sole authority at decode time for
/// deciding whether a value must be hex-encoded (spec §3 invariant).
#[derive(Debug, Clone, Default)]
pub struct TypeMap {
    tables: HashMap<String, HashMap<String, DeclaredType>>,
}

impl TypeMap {
    pub fn new() -> Self {
        TypeMap {
            tables: HashMap::new(),
        }
    }

    pub fn insert_table(&mut self, table: impl Into<String>, columns: HashMap<String, DeclaredType>) {
        self.tables.insert(table.into(), columns);
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<&DeclaredType> {
        self.tables.get(table).and_then(|cols| cols.get(column))
    }

    pub fn contains_column(&self, table: &str, column: &str) -> bool {
        self.column_type(table, column).is_some()
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }
}

/// A configured set of declared type names whose non-null values are
/// lowercase-hex-encoded before leaving the CDC engine. Empty is legal.
#[derive(Debug, Clone, Default)]
pub struct HexifySet(HashSet<String>);

impl HexifySet {
    pub fn new(types: impl IntoIterator<Item = String>) -> Self {
        HexifySet(types.into_iter().collect())
    }

    pub fn contains(&self, declared_type: &str) -> bool {
        self.0.contains(declared_type)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }
}

/// Apply the hexify rule for a single column: if `declared_type` is in
/// `hexify` and the value is non-null, hex-encode it. The type map is
/// consulted by the caller; this function only implements the rule
/// itself so it can be unit tested in isolation (spec §8.2).
pub fn apply_hexify(value: Value, declared_type: Option<&str>, hexify: &HexifySet) -> Value {
    match (declared_type, &value) {
        (Some(t), Value::Bytes(_)) if hexify.contains(t) => value.hexify(),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hexify_is_idempotent() {
        let hexify = HexifySet::new(["blob".to_string()]);
        let once = apply_hexify(Value::Bytes(vec![0x0a, 0x0b]), Some("blob"), &hexify);
        assert_eq!(once, Value::Str("0a0b".to_string()));

        // Applying again treats the already-hexified Str as opaque —
        // hexify only ever touches Bytes, so a second pass is a no-op.
        let twice = apply_hexify(once.clone(), Some("blob"), &hexify);
        assert_eq!(once, twice);
    }

    #[test]
    fn hexify_leaves_null_alone() {
        let hexify = HexifySet::new(["blob".to_string()]);
        let value = apply_hexify(Value::Null, Some("blob"), &hexify);
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn hexify_ignores_types_outside_the_set() {
        let hexify = HexifySet::new(["blob".to_string()]);
        let value = apply_hexify(Value::Bytes(vec![0xff]), Some("varchar"), &hexify);
        assert_eq!(value, Value::Bytes(vec![0xff]));
    }

    #[test]
    fn type_map_completeness() {
        let mut map = TypeMap::new();
        let mut cols = HashMap::new();
        cols.insert("id".to_string(), "int".to_string());
        map.insert_table("t", cols);
        assert!(map.contains_column("t", "id"));
        assert!(!map.contains_column("t", "missing"));
    }
}
