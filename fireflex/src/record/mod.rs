// Records - the flat `{id, ...fields}` shape exchanged with the local store

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record as materialized from a snapshot: its key plus its own fields.
/// Serializes flat, e.g. `{"id": "post_a", "message": "Post A"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Build a record from a child key and its value. Objects contribute
    /// their fields; primitives are wrapped as `{id, value}`.
    pub fn from_snapshot(key: &str, value: &Value) -> Self {
        let fields = match value {
            Value::Object(map) => {
                let mut fields = map.clone();
                fields.remove("id");
                fields
            }
            other => {
                let mut fields = Map::new();
                fields.insert("value".into(), other.clone());
                fields
            }
        };

        Record {
            id: key.to_string(),
            fields,
        }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Overwrite fields present in `fields`, leaving the others intact.
    pub fn merge(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            if key != "id" {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Replace every field value with null, keeping the keys.
    pub fn nullify(&mut self) {
        for value in self.fields.values_mut() {
            *value = Value::Null;
        }
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), Value::String(self.id.clone()));
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }
}

/// Per-call adapter options, as passed along with a write or lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterOptions {
    /// Collection path override for this record.
    pub path: Option<String>,
    /// Extra path/value pairs written in the same atomic update.
    /// Keys may contain `:id` / `:innerReferencePath` placeholders.
    pub include: Map<String, Value>,
}

impl AdapterOptions {
    pub fn at_path(path: impl Into<String>) -> Self {
        AdapterOptions {
            path: Some(path.into()),
            include: Map::new(),
        }
    }

    pub fn include(mut self, path: impl Into<String>, value: Value) -> Self {
        self.include.insert(path.into(), value);
        self
    }
}

/// The state of a record being saved: its identity plus the changed attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub model: String,
    pub id: String,
    pub changed: Map<String, Value>,
    pub options: AdapterOptions,
}

impl RecordSnapshot {
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        RecordSnapshot {
            model: model.into(),
            id: id.into(),
            changed: Map::new(),
            options: AdapterOptions::default(),
        }
    }

    pub fn attr(mut self, name: &str, value: Value) -> Self {
        self.changed.insert(name.to_string(), value);
        self
    }

    pub fn with_options(mut self, options: AdapterOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_object_snapshot() {
        let record = Record::from_snapshot("post_a", &json!({ "message": "Post A", "timestamp": 12345 }));
        assert_eq!(record.id, "post_a");
        assert_eq!(record.get("message"), Some(&json!("Post A")));
        assert_eq!(
            record.to_json(),
            json!({ "id": "post_a", "message": "Post A", "timestamp": 12345 })
        );
    }

    #[test]
    fn test_from_primitive_snapshot() {
        let record = Record::from_snapshot("post_a", &json!(true));
        assert_eq!(record.to_json(), json!({ "id": "post_a", "value": true }));
    }

    #[test]
    fn test_stored_id_field_is_ignored() {
        let record = Record::from_snapshot("real", &json!({ "id": "fake", "name": "x" }));
        assert_eq!(record.id, "real");
        assert!(record.get("id").is_none());
    }

    #[test]
    fn test_serializes_flat() {
        let record = Record::new("user_a").with_field("name", json!("User A"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({ "id": "user_a", "name": "User A" }));

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_merge_and_nullify() {
        let mut record = Record::from_snapshot("a", &json!({ "name": "A", "age": 3 }));
        let patch = json!({ "age": 4, "id": "ignored" });
        record.merge(patch.as_object().unwrap());
        assert_eq!(record.to_json(), json!({ "id": "a", "name": "A", "age": 4 }));

        record.nullify();
        assert_eq!(record.to_json(), json!({ "id": "a", "name": null, "age": null }));
    }
}
