use crate::backend::{Backend, EventKind, ListenerEvent, ListenerHandle, ListenerId};
use crate::config::{AdapterConfig, IdStrategy};
use crate::error::{FireflexError, Result};
use crate::fanout::{self, Fanout};
use crate::live_query::{LiveQueryTable, LiveRecord, QueryResult};
use crate::path_template;
use crate::query::{self, LegacyQuery, Query, QueryDescriptor, Reference};
use crate::record::{AdapterOptions, Record, RecordSnapshot};
use crate::registry::{ListenerRegistry, PathTracker};
use crate::store::LocalStore;
use std::collections::HashMap;

/// Where the events of one listener are delivered.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Route {
    Record { model: String, id: String, path: String },
    List { model: String, path: String },
    LiveQuery { cache_id: String },
    Watch { listener_id: String },
}

pub(crate) struct Watch {
    pub(crate) handle: Option<ListenerHandle>,
    pub(crate) record: LiveRecord,
}

/// The record adapter: maps record operations and queries onto a realtime
/// backend and keeps a local store synchronized with it.
///
/// Everything runs on the caller's thread. Backend events are processed by
/// `flush`, which every operation calls before returning; call it directly
/// to pick up writes made by other clients.
pub struct Adapter<B: Backend, S: LocalStore> {
    pub(crate) backend: B,
    pub(crate) store: S,
    pub(crate) config: AdapterConfig,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) record_paths: PathTracker,
    pub(crate) live_queries: LiveQueryTable,
    pub(crate) watches: HashMap<String, Watch>,
    pub(crate) routes: HashMap<ListenerId, Route>,
    flushing: bool,
}

impl<B: Backend, S: LocalStore> Adapter<B, S> {
    pub fn new(backend: B, store: S, config: AdapterConfig) -> Self {
        Adapter {
            backend,
            store,
            config,
            listeners: ListenerRegistry::new(),
            record_paths: PathTracker::new(),
            live_queries: LiveQueryTable::default(),
            watches: HashMap::new(),
            routes: HashMap::new(),
            flushing: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn live_queries(&self) -> &LiveQueryTable {
        &self.live_queries
    }

    // --- Event pump ---

    /// Deliver every queued backend event, including events produced while
    /// handling earlier ones. Nested calls from inside a handler return
    /// immediately; the outer loop picks up what they would have seen.
    pub fn flush(&mut self) {
        if self.flushing {
            return;
        }
        self.flushing = true;
        loop {
            let events = self.backend.drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.dispatch(event);
            }
        }
        self.flushing = false;
    }

    fn dispatch(&mut self, event: ListenerEvent) {
        let Some(route) = self.routes.get(&event.listener).cloned() else {
            log::debug!("dropping {} event for detached listener {}", event.kind, event.listener);
            return;
        };

        match route {
            Route::Record { model, id, path } => {
                self.handle_record_event(event.listener, &model, &id, &path, event.payload)
            }
            Route::List { model, path } => {
                self.handle_list_event(event.listener, &model, &path, event.payload)
            }
            Route::LiveQuery { cache_id } => {
                self.handle_child_event(&cache_id, event.kind, event.payload)
            }
            Route::Watch { listener_id } => {
                self.handle_watch_event(event.listener, &listener_id, event.payload)
            }
        }
    }

    // --- Record operations ---

    /// Where (model, id) lives: the explicit path if given, else the path
    /// it was last fetched or written at, else its default collection.
    pub fn record_path(&self, model: &str, id: &str, explicit: Option<&str>) -> String {
        if explicit.is_none() {
            if let Some(path) = self.record_paths.path_of(model, id) {
                return path.to_string();
            }
        }
        path_template::normalize_path(&path_template::resolve_path(model, Some(id), explicit))
    }

    /// Fetch one record and keep it synchronized.
    pub fn find_record(&mut self, model: &str, id: &str, options: &AdapterOptions) -> Result<Record> {
        let record_path = self.record_path(model, id, options.path.as_deref());
        let snapshot = self.backend.get(&Query::at(&record_path))?;
        if !snapshot.exists() {
            return Err(FireflexError::NotFound {
                model: model.to_string(),
                id: id.to_string(),
            });
        }

        let record = self.materialize(id, &record_path, &snapshot.value);
        self.ensure_subscribed(model, id, &record_path)?;
        if self.config.server_rendering {
            self.push_record(model, record.clone());
        }
        self.flush();
        Ok(record)
    }

    /// Fetch every record of a model and follow additions to its collection.
    /// An empty collection is an empty list.
    pub fn find_all(&mut self, model: &str) -> Result<Vec<Record>> {
        let collection_path = path_template::normalize_path(&path_template::resolve_path(model, None, None));
        let snapshot = self.backend.get(&Query::at(&collection_path))?;

        let mut records = Vec::with_capacity(snapshot.children.len());
        for (id, value) in &snapshot.children {
            let record_path = path_template::child_path(&collection_path, id);
            let record = self.materialize(id, &record_path, value);
            self.ensure_subscribed(model, id, &record_path)?;
            if self.config.server_rendering {
                self.push_record(model, record.clone());
            }
            records.push(record);
        }

        self.ensure_list_subscribed(model, &collection_path)?;
        self.flush();
        Ok(records)
    }

    /// First record matching a query, forced to a single result.
    pub fn query_record(&mut self, model: &str, descriptor: &QueryDescriptor) -> Result<Record> {
        let mut descriptor = descriptor.clone();
        query::force_single(&mut descriptor);

        let path = self.query_path(model, &descriptor);
        let compiled = query::compile(Reference::new(&path), &descriptor);
        let snapshot = self.backend.get(&compiled)?;

        let Some((id, _)) = snapshot.children.first() else {
            return Err(FireflexError::NoMatch {
                model: model.to_string(),
            });
        };

        let options = match &descriptor.path {
            Some(_) if !descriptor.is_reference => AdapterOptions::at_path(path.clone()),
            _ => AdapterOptions::default(),
        };
        let id = id.clone();
        self.find_record(model, &id, &options)
    }

    /// Save a new record with one atomic write.
    pub fn create_record(&mut self, snapshot: &RecordSnapshot) -> Result<()> {
        self.update_record(snapshot)
    }

    /// Write the changed attributes plus any extra pairs in one atomic
    /// update, then keep the record synchronized.
    pub fn update_record(&mut self, snapshot: &RecordSnapshot) -> Result<()> {
        let record_path = self.record_path(&snapshot.model, &snapshot.id, snapshot.options.path.as_deref());
        let vars = fanout::record_vars(&snapshot.id, &record_path);
        let write = fanout::build_update(&record_path, &snapshot.changed, &snapshot.options.include, &vars);

        self.backend.update(&write)?;
        self.ensure_subscribed(&snapshot.model, &snapshot.id, &record_path)?;
        self.flush();
        Ok(())
    }

    /// Null the record path and any extra pairs in one atomic update.
    pub fn delete_record(&mut self, model: &str, id: &str, options: &AdapterOptions) -> Result<()> {
        let record_path = self.record_path(model, id, options.path.as_deref());
        let vars = fanout::record_vars(id, &record_path);
        let write = fanout::build_delete(&record_path, &options.include, &vars);

        self.backend.update(&write)?;
        self.flush();
        Ok(())
    }

    /// Query using the deprecated `(listenerId, path, options)` shape.
    pub fn query_legacy(&mut self, model: &str, request: &LegacyQuery) -> Result<QueryResult> {
        let descriptor = QueryDescriptor::from_legacy(&request.listener_id, &request.path, &request.options)?;
        self.query(model, &descriptor)
    }

    // --- Utility surface ---

    /// Apply a raw multi-path update.
    pub fn update(&mut self, write: &Fanout) -> Result<()> {
        self.backend.update(write)?;
        self.flush();
        Ok(())
    }

    /// One-shot list of the records under `path`. Nothing is tracked.
    pub fn fetch_all(&self, path: &str) -> Result<Vec<Record>> {
        let path = path_template::normalize_path(path);
        let snapshot = self.backend.get(&Query::at(&path))?;
        Ok(snapshot
            .children
            .iter()
            .map(|(id, value)| self.materialize(id, &path_template::child_path(&path, id), value))
            .collect())
    }

    pub fn is_record_existing(&self, path: &str) -> Result<bool> {
        Ok(self.backend.get(&Query::at(path))?.exists())
    }

    /// A new id for a record under `path`.
    pub fn generate_id(&self, path: &str) -> String {
        match self.config.id_strategy {
            IdStrategy::Push => self.backend.push_key(path),
            other => other.generate(),
        }
    }

    /// Follow the record at `path`. One live record per listener id;
    /// deletion or a revoked listener sets every field to null.
    pub fn watch(&mut self, listener_id: &str, path: &str) -> Result<LiveRecord> {
        if let Some(watched) = self.watches.get(listener_id) {
            return Ok(watched.record.clone());
        }

        let path = path_template::normalize_path(path);
        let snapshot = self.backend.get(&Query::at(&path))?;
        let id = snapshot.key().to_string();
        let record = if snapshot.exists() {
            self.materialize(&id, &path, &snapshot.value)
        } else {
            Record::new(id)
        };
        let live = LiveRecord::new(record);
        if self.config.server_rendering {
            return Ok(live);
        }

        let handle = self.backend.listen(&Query::at(&path), EventKind::Value)?;
        self.routes.insert(
            handle.id,
            Route::Watch {
                listener_id: listener_id.to_string(),
            },
        );
        self.watches.insert(
            listener_id.to_string(),
            Watch {
                handle: Some(handle),
                record: live.clone(),
            },
        );
        self.flush();
        Ok(live)
    }

    /// Stop following a watched record. Returns false for unknown ids.
    pub fn unwatch(&mut self, listener_id: &str) -> bool {
        match self.watches.remove(listener_id) {
            Some(watched) => {
                if let Some(handle) = watched.handle {
                    self.detach(&handle);
                }
                true
            }
            None => false,
        }
    }

    /// Detach every listener and forget all tracked state.
    pub fn teardown(&mut self) {
        let mut handles = self.listeners.drain();
        for live in self.live_queries.drain() {
            handles.extend(live.handles);
        }
        for (_, watched) in self.watches.drain() {
            handles.extend(watched.handle);
        }

        for handle in &handles {
            self.backend.unlisten(handle);
        }
        self.routes.clear();
        self.record_paths.clear();
        // Anything still queued belongs to listeners that no longer exist
        self.backend.drain_events();
        log::debug!("teardown: detached {} listeners", handles.len());
    }
}
