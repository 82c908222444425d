//! The data that flows between agents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload key holding the variant records.
pub const RECORDS_KEY: &str = "records";

// ---------------------------------------------------------------------------
// Payload: string-keyed map passed from stage to stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// A payload holding only `records`.
    pub fn from_records(records: Vec<VariantRecord>) -> Self {
        let mut payload = Self::new();
        payload.set_records(records);
        payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for `key`, or `None` when absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `records` is present and is an array.
    pub fn has_records(&self) -> bool {
        matches!(self.0.get(RECORDS_KEY), Some(Value::Array(_)))
    }

    /// The object entries of `records`. Non-object entries are skipped.
    pub fn records(&self) -> Vec<VariantRecord> {
        match self.0.get(RECORDS_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned().map(VariantRecord::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_records(&mut self, records: Vec<VariantRecord>) {
        let items = records.into_iter().map(|r| Value::Object(r.0)).collect();
        self.0.insert(RECORDS_KEY.to_string(), Value::Array(items));
    }

    /// Shallow merge: every top-level key of `other` replaces the key of the
    /// same name. Keys absent from `other` are preserved. Returns the merged
    /// keys in order.
    pub fn merge(&mut self, other: Payload) -> Vec<String> {
        let mut keys = Vec::with_capacity(other.len());
        for (key, value) in other.0 {
            keys.push(key.clone());
            self.0.insert(key, value);
        }
        keys
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// VariantRecord: one creative variant row
// ---------------------------------------------------------------------------

/// A variant row: string-keyed fields with arbitrary JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantRecord(Map<String, Value>);

impl VariantRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Text form of a scalar field. Numbers and booleans are rendered;
    /// `null`, arrays, and objects yield `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Text form with surrounding whitespace removed; blank values yield `None`.
    pub fn trimmed(&self, field: &str) -> Option<String> {
        self.text(field)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// A field is blank when it is absent, `null`, or a whitespace-only string.
    pub fn is_blank(&self, field: &str) -> bool {
        match self.0.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }
    }

    pub fn variant_id(&self) -> Option<String> {
        self.text("variant_id")
    }

    /// Identifier used in messages; `?` when the record has none.
    pub fn display_id(&self) -> String {
        self.variant_id().unwrap_or_else(|| "?".to_string())
    }

    /// Whether the record carries an approval, see [`parse_approved`].
    pub fn approved(&self) -> bool {
        parse_approved(self.0.get("approved"))
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for VariantRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<VariantRecord> for Value {
    fn from(record: VariantRecord) -> Self {
        Value::Object(record.0)
    }
}

/// Coerce an `approved` field to a boolean.
///
/// Booleans pass through. Strings are approved when they equal `true`
/// (any case) or `1`. Numbers are approved when non-zero. Absent and `null`
/// are not approved; arrays and objects are.
pub fn parse_approved(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> VariantRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn approved_coercion() {
        assert!(parse_approved(Some(&json!(true))));
        assert!(parse_approved(Some(&json!("TRUE"))));
        assert!(parse_approved(Some(&json!("True"))));
        assert!(parse_approved(Some(&json!("1"))));
        assert!(parse_approved(Some(&json!(1))));
        assert!(!parse_approved(Some(&json!("yes"))));
        assert!(!parse_approved(Some(&json!("0"))));
        assert!(!parse_approved(Some(&json!("false"))));
        assert!(!parse_approved(Some(&json!(""))));
        assert!(!parse_approved(Some(&json!(false))));
        assert!(!parse_approved(Some(&json!(0))));
        assert!(!parse_approved(Some(&Value::Null)));
        assert!(!parse_approved(None));
    }

    #[test]
    fn blank_fields() {
        let r = record(json!({"a": "  ", "b": null, "c": "x", "d": 0}));
        assert!(r.is_blank("a"));
        assert!(r.is_blank("b"));
        assert!(r.is_blank("missing"));
        assert!(!r.is_blank("c"));
        assert!(!r.is_blank("d"));
    }

    #[test]
    fn text_renders_scalars() {
        let r = record(json!({"variant_id": 42, "approved": true, "tags": ["a"]}));
        assert_eq!(r.variant_id().as_deref(), Some("42"));
        assert_eq!(r.text("approved").as_deref(), Some("true"));
        assert_eq!(r.text("tags"), None);
        assert_eq!(r.display_id(), "42");
        assert_eq!(VariantRecord::new().display_id(), "?");
    }

    #[test]
    fn merge_replaces_whole_keys() {
        let mut base = Payload::new()
            .with("records", json!([{"variant_id": "a"}, {"variant_id": "b"}]))
            .with("datasetVersion", "v1")
            .with("nested", json!({"keep": 1, "replace": 2}));
        let update = Payload::new()
            .with("records", json!([{"variant_id": "a"}]))
            .with("nested", json!({"replace": 3}));

        let merged = base.merge(update);
        assert_eq!(merged, vec!["nested".to_string(), "records".to_string()]);
        assert_eq!(base.records().len(), 1);
        assert_eq!(base.get_str("datasetVersion"), Some("v1"));
        // Nested objects are replaced, not deep-merged.
        assert_eq!(base.get("nested"), Some(&json!({"replace": 3})));
    }

    #[test]
    fn records_skip_non_objects() {
        let payload = Payload::new().with("records", json!([{"variant_id": "a"}, 5, "x"]));
        assert!(payload.has_records());
        assert_eq!(payload.records().len(), 1);

        let payload = Payload::new().with("records", "not a list");
        assert!(!payload.has_records());
        assert!(payload.records().is_empty());
    }

    #[test]
    fn payload_is_transparent_json_object() {
        let payload = Payload::from_records(vec![VariantRecord::new().with("variant_id", "v1")]);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"records": [{"variant_id": "v1"}]}));
    }
}
