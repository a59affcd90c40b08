// Live query results - tracked queries, their listeners and shared collections

use crate::adapter::{Adapter, Route};
use crate::backend::{Backend, EventKind, EventPayload, ListenerHandle};
use crate::error::{FireflexError, Result};
use crate::path_template;
use crate::query::{self, Limit, Query, QueryDescriptor, Reference};
use crate::record::{AdapterOptions, Record};
use crate::store::LocalStore;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The ordered result list of a tracked query. Clones share the same list,
/// which keeps changing as child events arrive.
#[derive(Debug, Clone)]
pub struct LiveCollection {
    cache_id: String,
    items: Rc<RefCell<Vec<Record>>>,
}

impl LiveCollection {
    pub(crate) fn new(cache_id: &str, records: Vec<Record>) -> Self {
        LiveCollection {
            cache_id: cache_id.to_string(),
            items: Rc::new(RefCell::new(records)),
        }
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.borrow().iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.items.borrow().iter().find(|r| r.id == id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.borrow().iter().map(|r| r.id.clone()).collect()
    }

    pub fn to_vec(&self) -> Vec<Record> {
        self.items.borrow().clone()
    }

    /// Load more: widen the page bound by `count` and resubscribe.
    pub fn next<B: Backend, S: LocalStore>(&self, adapter: &mut Adapter<B, S>, count: u32) -> Result<LiveCollection> {
        adapter.next(&self.cache_id, count)
    }

    /// Stop listening. The collection keeps its current contents.
    pub fn off<B: Backend, S: LocalStore>(&self, adapter: &mut Adapter<B, S>) -> Result<()> {
        adapter.off(&self.cache_id)
    }

    /// Insert unless already present: at the head for limitToLast
    /// queries, at the tail otherwise.
    pub(crate) fn insert(&self, record: Record, limit: Option<Limit>) -> bool {
        let mut items = self.items.borrow_mut();
        if items.iter().any(|r| r.id == record.id) {
            return false;
        }
        match limit {
            Some(Limit::Last(_)) => items.insert(0, record),
            _ => items.push(record),
        }
        true
    }

    pub(crate) fn merge(&self, id: &str, record: &Record) -> bool {
        let mut items = self.items.borrow_mut();
        match items.iter_mut().find(|r| r.id == id) {
            Some(existing) => {
                existing.merge(&record.fields);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&self, id: &str) -> bool {
        let mut items = self.items.borrow_mut();
        let before = items.len();
        items.retain(|r| r.id != id);
        items.len() != before
    }

    pub(crate) fn clear(&self) {
        self.items.borrow_mut().clear();
    }
}

/// A single record kept current by a value listener (`watch`).
#[derive(Debug, Clone)]
pub struct LiveRecord {
    record: Rc<RefCell<Record>>,
}

impl LiveRecord {
    pub(crate) fn new(record: Record) -> Self {
        LiveRecord {
            record: Rc::new(RefCell::new(record)),
        }
    }

    pub fn get(&self) -> Record {
        self.record.borrow().clone()
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.record.borrow().get(name).cloned()
    }

    pub(crate) fn merge(&self, record: &Record) {
        self.record.borrow_mut().merge(&record.fields);
    }

    pub(crate) fn nullify(&self) {
        self.record.borrow_mut().nullify();
    }
}

/// What `query` hands back: a plain list, or a live collection when the
/// descriptor carries a cache id.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Static(Vec<Record>),
    Live(LiveCollection),
}

impl QueryResult {
    pub fn records(&self) -> Vec<Record> {
        match self {
            QueryResult::Static(records) => records.clone(),
            QueryResult::Live(collection) => collection.to_vec(),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        match self {
            QueryResult::Static(records) => records.len(),
            QueryResult::Live(collection) => collection.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_live(&self) -> Option<&LiveCollection> {
        match self {
            QueryResult::Live(collection) => Some(collection),
            QueryResult::Static(_) => None,
        }
    }
}

/// A tracked query: its descriptor, the compiled query the listeners are
/// attached to, the listener handles and the collection they feed.
#[derive(Debug)]
pub struct LiveQuery {
    pub model: String,
    pub descriptor: QueryDescriptor,
    pub query: Query,
    pub(crate) handles: Vec<ListenerHandle>,
    pub collection: LiveCollection,
}

impl LiveQuery {
    /// True while the child listeners are attached.
    pub fn is_listening(&self) -> bool {
        !self.handles.is_empty()
    }
}

/// Tracked queries by cache id.
#[derive(Debug, Default)]
pub struct LiveQueryTable {
    queries: HashMap<String, LiveQuery>,
}

impl LiveQueryTable {
    pub fn get(&self, cache_id: &str) -> Option<&LiveQuery> {
        self.queries.get(cache_id)
    }

    pub(crate) fn get_mut(&mut self, cache_id: &str) -> Option<&mut LiveQuery> {
        self.queries.get_mut(cache_id)
    }

    pub fn contains(&self, cache_id: &str) -> bool {
        self.queries.contains_key(cache_id)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub(crate) fn insert(&mut self, cache_id: &str, live: LiveQuery) {
        self.queries.insert(cache_id.to_string(), live);
    }

    pub(crate) fn remove(&mut self, cache_id: &str) -> Option<LiveQuery> {
        self.queries.remove(cache_id)
    }

    pub(crate) fn drain(&mut self) -> Vec<LiveQuery> {
        self.queries.drain().map(|(_, live)| live).collect()
    }
}

impl<B: Backend, S: LocalStore> Adapter<B, S> {
    /// Run a query. A tracked cache id is a cache hit: the existing live
    /// collection comes back without touching the backend.
    pub fn query(&mut self, model: &str, descriptor: &QueryDescriptor) -> Result<QueryResult> {
        if let Some(cache_id) = &descriptor.cache_id {
            if let Some(live) = self.live_queries.get(cache_id) {
                log::debug!("query {cache_id}: cache hit");
                return Ok(QueryResult::Live(live.collection.clone()));
            }
        }
        self.run_query(model, descriptor)
    }

    /// Re-run a query, detaching the previous listener set for its cache id
    /// first. The result is a fresh collection.
    pub fn requery(&mut self, model: &str, descriptor: &QueryDescriptor) -> Result<QueryResult> {
        if let Some(cache_id) = &descriptor.cache_id {
            if self.live_queries.contains(cache_id) {
                self.off(cache_id)?;
                self.live_queries.remove(cache_id);
            }
        }
        self.run_query(model, descriptor)
    }

    /// Widen a tracked query's page bound by `count`, then reattach its
    /// listeners so the newly revealed children arrive as additions.
    pub fn next(&mut self, cache_id: &str, count: u32) -> Result<LiveCollection> {
        self.off(cache_id)?;

        let live = self
            .live_queries
            .get_mut(cache_id)
            .ok_or_else(|| FireflexError::UntrackedQuery(cache_id.to_string()))?;
        if let Some(limit) = live.descriptor.limit {
            live.descriptor.limit = Some(limit.widened(count));
        }
        live.query = query::compile(Reference::new(&live.query.path), &live.descriptor);
        let compiled = live.query.clone();
        let collection = live.collection.clone();

        let handles = self.listen_children(cache_id, &compiled)?;
        if let Some(live) = self.live_queries.get_mut(cache_id) {
            live.handles = handles;
        }
        self.flush();
        Ok(collection)
    }

    /// Detach a tracked query's listeners. It stays tracked, so `next`
    /// can resume it and `query` still returns its collection.
    pub fn off(&mut self, cache_id: &str) -> Result<()> {
        let live = self
            .live_queries
            .get_mut(cache_id)
            .ok_or_else(|| FireflexError::UntrackedQuery(cache_id.to_string()))?;
        let handles = std::mem::take(&mut live.handles);
        for handle in handles {
            self.detach(&handle);
        }
        Ok(())
    }

    pub fn live_query(&self, cache_id: &str) -> Option<&LiveQuery> {
        self.live_queries.get(cache_id)
    }

    pub(crate) fn query_path(&self, model: &str, descriptor: &QueryDescriptor) -> String {
        let path = match &descriptor.path {
            Some(path) => path.clone(),
            None => path_template::resolve_path(model, None, None),
        };
        path_template::normalize_path(&path)
    }

    fn run_query(&mut self, model: &str, descriptor: &QueryDescriptor) -> Result<QueryResult> {
        let path = self.query_path(model, descriptor);
        let compiled = query::compile(Reference::new(&path), descriptor);
        let snapshot = self.backend.get(&compiled)?;

        let mut records = Vec::with_capacity(snapshot.children.len());
        for (key, value) in &snapshot.children {
            if let Some(record) = self.materialize_child(model, descriptor, &path, key, value)? {
                records.push(record);
            }
        }

        let cache_id = match &descriptor.cache_id {
            Some(cache_id) if !self.config.server_rendering => cache_id.clone(),
            _ => {
                self.flush();
                return Ok(QueryResult::Static(records));
            }
        };

        let collection = LiveCollection::new(&cache_id, records);
        let handles = self.listen_children(&cache_id, &compiled)?;
        self.live_queries.insert(
            &cache_id,
            LiveQuery {
                model: model.to_string(),
                descriptor: descriptor.clone(),
                query: compiled,
                handles,
                collection: collection.clone(),
            },
        );
        log::debug!("query {cache_id}: tracking {} records at {path}", collection.len());

        self.flush();
        Ok(QueryResult::Live(collection))
    }

    /// Turn one child of a query result into a record. Reference queries
    /// resolve the key against the model's own collection and skip keys
    /// with nothing behind them.
    fn materialize_child(
        &mut self,
        model: &str,
        descriptor: &QueryDescriptor,
        query_path: &str,
        key: &str,
        value: &Value,
    ) -> Result<Option<Record>> {
        if descriptor.is_reference {
            return match self.find_record(model, key, &AdapterOptions::default()) {
                Ok(record) => Ok(Some(record)),
                Err(e) if e.is_not_found() => {
                    log::warn!("reference {query_path}/{key}: {e}");
                    Ok(None)
                }
                Err(e) => Err(e),
            };
        }

        let record_path = path_template::child_path(query_path, key);
        let record = self.materialize(key, &record_path, value);
        self.ensure_subscribed(model, key, &record_path)?;
        if self.config.server_rendering {
            self.push_record(model, record.clone());
        }
        Ok(Some(record))
    }

    fn listen_children(&mut self, cache_id: &str, compiled: &Query) -> Result<Vec<ListenerHandle>> {
        let mut handles = Vec::with_capacity(EventKind::CHILD_KINDS.len());
        for kind in EventKind::CHILD_KINDS {
            match self.backend.listen(compiled, kind) {
                Ok(handle) => {
                    self.routes.insert(
                        handle.id,
                        Route::LiveQuery {
                            cache_id: cache_id.to_string(),
                        },
                    );
                    handles.push(handle);
                }
                Err(e) => {
                    for handle in &handles {
                        self.detach(handle);
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    pub(crate) fn handle_child_event(&mut self, cache_id: &str, kind: EventKind, payload: EventPayload) {
        let Some(live) = self.live_queries.get(cache_id) else {
            return;
        };
        let collection = live.collection.clone();
        let model = live.model.clone();
        let descriptor = live.descriptor.clone();
        let query_path = live.query.path.clone();

        let snapshot = match payload {
            EventPayload::Snapshot(snapshot) => snapshot,
            EventPayload::Cancelled(message) => {
                log::warn!("query {cache_id}: {kind} listener cancelled: {message}");
                if let Some(live) = self.live_queries.get_mut(cache_id) {
                    let handles = std::mem::take(&mut live.handles);
                    for handle in handles {
                        self.detach(&handle);
                    }
                }
                collection.clear();
                return;
            }
        };
        let key = snapshot.key().to_string();

        match kind {
            EventKind::ChildAdded => {
                if collection.contains(&key) {
                    return;
                }
                match self.materialize_child(&model, &descriptor, &query_path, &key, &snapshot.value) {
                    Ok(Some(record)) => {
                        collection.insert(record, descriptor.limit);
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("query {cache_id}: could not add {key}: {e}"),
                }
            }
            EventKind::ChildChanged => {
                // Index entries of a reference query carry no record data
                if !descriptor.is_reference {
                    let record = self.materialize(&key, &snapshot.path, &snapshot.value);
                    collection.merge(&key, &record);
                }
            }
            EventKind::ChildRemoved => {
                collection.remove(&key);
            }
            EventKind::Value => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> Record {
        Record::new(id)
    }

    #[test]
    fn test_insert_anchors() {
        let first = LiveCollection::new("a", vec![record("1")]);
        first.insert(record("2"), Some(Limit::First(2)));
        first.insert(record("3"), None);
        assert_eq!(first.ids(), vec!["1", "2", "3"]);

        let last = LiveCollection::new("b", vec![record("1")]);
        last.insert(record("2"), Some(Limit::Last(2)));
        assert_eq!(last.ids(), vec!["2", "1"]);
    }

    #[test]
    fn test_insert_skips_present_ids() {
        let collection = LiveCollection::new("a", vec![record("1")]);
        assert!(!collection.insert(record("1").with_field("x", json!(1)), None));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.get("1").unwrap().get("x"), None);
    }

    #[test]
    fn test_merge_in_place() {
        let collection = LiveCollection::new("a", vec![
            record("1").with_field("name", json!("one")).with_field("n", json!(1)),
            record("2"),
        ]);
        assert!(collection.merge("1", &record("1").with_field("name", json!("uno"))));
        assert!(!collection.merge("9", &record("9")));
        assert_eq!(collection.ids(), vec!["1", "2"]);
        assert_eq!(
            collection.get("1").unwrap().to_json(),
            json!({ "id": "1", "name": "uno", "n": 1 })
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let collection = LiveCollection::new("a", vec![record("1"), record("2")]);
        assert!(collection.remove("1"));
        assert!(!collection.remove("1"));
        assert_eq!(collection.ids(), vec!["2"]);
        collection.clear();
        assert!(collection.is_empty());
    }

    #[test]
    fn test_clones_share_items() {
        let collection = LiveCollection::new("a", Vec::new());
        let view = collection.clone();
        collection.insert(record("1"), None);
        assert_eq!(view.ids(), vec!["1"]);
        assert_eq!(view.cache_id(), "a");
    }

    #[test]
    fn test_live_record_nullify() {
        let live = LiveRecord::new(record("u").with_field("name", json!("U")));
        live.merge(&record("u").with_field("age", json!(3)));
        assert_eq!(live.field("age"), Some(json!(3)));
        live.nullify();
        assert_eq!(live.get().to_json(), json!({ "id": "u", "name": null, "age": null }));
    }
}
