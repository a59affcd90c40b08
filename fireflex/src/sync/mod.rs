// Record synchronization - value listeners feeding the local store

use crate::adapter::{Adapter, Route};
use crate::backend::{Backend, DataSnapshot, EventKind, EventPayload, ListenerHandle, ListenerId};
use crate::error::Result;
use crate::path_template;
use crate::query::Query;
use crate::record::Record;
use crate::store::LocalStore;
use serde_json::Value;

impl<B: Backend, S: LocalStore> Adapter<B, S> {
    /// Keep the record at `record_path` synchronized into the local store.
    /// Opens at most one value listener per path; in server-rendering mode
    /// only the path is remembered.
    pub(crate) fn ensure_subscribed(&mut self, model: &str, id: &str, record_path: &str) -> Result<()> {
        let record_path = path_template::normalize_path(record_path);
        self.record_paths.track(model, id, &record_path);

        if self.config.server_rendering || self.listeners.is_registered(&record_path, EventKind::Value) {
            return Ok(());
        }

        let handle = self.backend.listen(&Query::at(&record_path), EventKind::Value)?;
        self.routes.insert(
            handle.id,
            Route::Record {
                model: model.to_string(),
                id: id.to_string(),
                path: record_path.clone(),
            },
        );
        self.listeners.register(&record_path, EventKind::Value, handle);
        log::debug!("subscribed {model} {id} at {record_path}");
        Ok(())
    }

    /// Subscribe every record that shows up under a collection.
    pub(crate) fn ensure_list_subscribed(&mut self, model: &str, collection_path: &str) -> Result<()> {
        let collection_path = path_template::normalize_path(collection_path);
        if self.config.server_rendering
            || self.listeners.is_registered(&collection_path, EventKind::ChildAdded)
        {
            return Ok(());
        }

        let handle = self
            .backend
            .listen(&Query::at(&collection_path), EventKind::ChildAdded)?;
        self.routes.insert(
            handle.id,
            Route::List {
                model: model.to_string(),
                path: collection_path.clone(),
            },
        );
        self.listeners
            .register(&collection_path, EventKind::ChildAdded, handle);
        Ok(())
    }

    /// Build the record for `id` from a snapshot value, adding the inner
    /// reference path field when one is configured.
    pub(crate) fn materialize(&self, id: &str, record_path: &str, value: &Value) -> Record {
        let mut record = Record::from_snapshot(id, value);
        if let Some(field) = &self.config.inner_reference_path_name {
            record.fields.insert(
                field.clone(),
                Value::String(path_template::inner_reference_path(record_path)),
            );
        }
        record
    }

    pub(crate) fn push_record(&mut self, model: &str, record: Record) {
        let record = self.store.normalize(model, record);
        self.store.push(model, record);
    }

    fn unload_unless_saving(&mut self, model: &str, id: &str) {
        if self.store.peek_record(model, id).is_none() {
            return;
        }
        if self.store.is_saving(model, id) {
            log::debug!("{model} {id} vanished upstream while saving, keeping it");
            return;
        }
        self.store.unload_record(model, id);
        log::debug!("unloaded {model} {id}");
    }

    pub(crate) fn handle_record_event(
        &mut self,
        listener: ListenerId,
        model: &str,
        id: &str,
        path: &str,
        payload: EventPayload,
    ) {
        match payload {
            EventPayload::Snapshot(snapshot) if snapshot.exists() => {
                let record = self.materialize(id, path, &snapshot.value);
                self.push_record(model, record);
            }
            EventPayload::Snapshot(_) => self.unload_unless_saving(model, id),
            EventPayload::Cancelled(message) => {
                log::warn!("{model} {id}: value listener cancelled: {message}");
                // A revoked listener is gone; a later lookup may subscribe again
                self.listeners.unregister(path, EventKind::Value);
                self.routes.remove(&listener);
                self.unload_unless_saving(model, id);
            }
        }
    }

    pub(crate) fn handle_list_event(&mut self, listener: ListenerId, model: &str, path: &str, payload: EventPayload) {
        match payload {
            EventPayload::Snapshot(snapshot) => {
                let id = snapshot.key().to_string();
                if let Err(e) = self.ensure_subscribed(model, &id, &snapshot.path) {
                    log::warn!("{model} {id}: could not subscribe: {e}");
                }
            }
            EventPayload::Cancelled(message) => {
                log::warn!("{path}: child_added listener cancelled: {message}");
                self.listeners.unregister(path, EventKind::ChildAdded);
                self.routes.remove(&listener);
            }
        }
    }

    pub(crate) fn handle_watch_event(&mut self, listener: ListenerId, watch_id: &str, payload: EventPayload) {
        let Some(watched) = self.watches.get(watch_id) else {
            return;
        };
        let live = watched.record.clone();

        match payload {
            EventPayload::Snapshot(DataSnapshot { path, value, .. }) if !value.is_null() => {
                let id = live.get().id;
                live.merge(&self.materialize(&id, &path, &value));
            }
            EventPayload::Snapshot(_) => live.nullify(),
            EventPayload::Cancelled(message) => {
                log::warn!("watch {watch_id}: listener cancelled: {message}");
                if let Some(watched) = self.watches.get_mut(watch_id) {
                    watched.handle = None;
                }
                self.routes.remove(&listener);
                live.nullify();
            }
        }
    }

    /// Detach one listener and forget where its events go.
    pub(crate) fn detach(&mut self, handle: &ListenerHandle) {
        handle.cancel(&self.backend);
        self.routes.remove(&handle.id);
    }
}
