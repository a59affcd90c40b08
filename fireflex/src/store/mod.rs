use crate::record::Record;
use std::collections::HashMap;

/// The application's local record cache, fed by the adapter.
///
/// `push` is called once per realtime value event carrying data;
/// `unload_record` when the record vanished upstream and is not being saved.
pub trait LocalStore {
    /// Turn a raw `{id, ...}` record into the store's canonical shape.
    fn normalize(&self, _model: &str, record: Record) -> Record {
        record
    }

    fn push(&mut self, model: &str, record: Record);

    fn peek_record(&self, model: &str, id: &str) -> Option<Record>;

    /// True while a local save of the record is in flight.
    fn is_saving(&self, model: &str, id: &str) -> bool;

    fn unload_record(&mut self, model: &str, id: &str);
}

#[derive(Debug, Clone)]
struct Entry {
    record: Record,
    saving: bool,
}

/// In-memory `LocalStore`. Counts pushes so callers can observe how many
/// merges the realtime side produced.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<(String, String), Entry>,
    pushes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Flag a record as mid-save. Unknown records are ignored.
    pub fn set_saving(&mut self, model: &str, id: &str, saving: bool) {
        if let Some(entry) = self.entries.get_mut(&key(model, id)) {
            entry.saving = saving;
        }
    }

    pub fn push_count(&self) -> usize {
        self.pushes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every loaded record of `model`, sorted by id.
    pub fn records(&self, model: &str) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .entries
            .iter()
            .filter(|((m, _), _)| m == model)
            .map(|(_, entry)| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

fn key(model: &str, id: &str) -> (String, String) {
    (model.to_string(), id.to_string())
}

impl LocalStore for MemoryStore {
    fn push(&mut self, model: &str, record: Record) {
        self.pushes += 1;
        let saving = self.is_saving(model, &record.id);
        self.entries
            .insert(key(model, &record.id), Entry { record, saving });
    }

    fn peek_record(&self, model: &str, id: &str) -> Option<Record> {
        self.entries.get(&key(model, id)).map(|e| e.record.clone())
    }

    fn is_saving(&self, model: &str, id: &str) -> bool {
        self.entries
            .get(&key(model, id))
            .map(|e| e.saving)
            .unwrap_or(false)
    }

    fn unload_record(&mut self, model: &str, id: &str) {
        self.entries.remove(&key(model, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_and_peek() {
        let mut store = MemoryStore::new();
        store.push("post", Record::new("post_a").with_field("message", json!("Post A")));
        store.push("post", Record::new("post_a").with_field("message", json!("Edited")));

        assert_eq!(store.push_count(), 2);
        assert_eq!(store.len(), 1);
        let record = store.peek_record("post", "post_a").unwrap();
        assert_eq!(record.get("message"), Some(&json!("Edited")));
        assert!(store.peek_record("user", "post_a").is_none());
    }

    #[test]
    fn test_saving_flag_survives_push() {
        let mut store = MemoryStore::new();
        store.push("post", Record::new("post_a"));
        store.set_saving("post", "post_a", true);
        store.push("post", Record::new("post_a").with_field("message", json!("x")));
        assert!(store.is_saving("post", "post_a"));

        store.set_saving("post", "post_a", false);
        assert!(!store.is_saving("post", "post_a"));
    }

    #[test]
    fn test_unload() {
        let mut store = MemoryStore::new();
        store.push("post", Record::new("post_a"));
        store.push("post", Record::new("post_b"));
        store.unload_record("post", "post_a");
        let ids: Vec<String> = store.records("post").into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["post_b"]);
    }
}
