use super::{Backend, DataSnapshot, EventKind, EventPayload, ListenerEvent, ListenerHandle, ListenerId};
use crate::error::{FireflexError, Result};
use crate::fanout::Fanout;
use crate::path_template;
use crate::query::{Limit, OrderBy, Query};
use crate::transform;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::mpsc;

type ClientId = u64;

/// An in-process realtime database over a JSON tree.
///
/// Clones share the same tree, so a test (or a second client) can write
/// through one handle while an adapter owns another. Each handle has its
/// own event queue: a listener's events go to the handle that attached it
/// and are handed out by that handle's `drain_events`.
pub struct MemoryBackend {
    inner: Rc<RefCell<Inner>>,
    client: ClientId,
    event_rx: mpsc::Receiver<ListenerEvent>,
}

struct Inner {
    root: Value,
    listeners: BTreeMap<ListenerId, ActiveListener>,
    next_listener: ListenerId,
    queues: HashMap<ClientId, mpsc::Sender<ListenerEvent>>,
    next_client: ClientId,
    write_failure: Option<String>,
    writes: Vec<Fanout>,
}

struct ActiveListener {
    owner: ClientId,
    query: Query,
    kind: EventKind,
    last: ListenerState,
}

/// What a listener last saw, used to diff after each write.
enum ListenerState {
    Value(Value),
    Window(Vec<(String, Value)>),
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::from_json(Value::Object(Map::new()))
    }

    /// Start from an existing tree, e.g. a fixture.
    pub fn from_json(root: Value) -> Self {
        let root = match root {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self::attach(Rc::new(RefCell::new(Inner {
            root,
            listeners: BTreeMap::new(),
            next_listener: 1,
            queues: HashMap::new(),
            next_client: 1,
            write_failure: None,
            writes: Vec::new(),
        })))
    }

    /// A new handle on `inner` with its own event queue.
    fn attach(inner: Rc<RefCell<Inner>>) -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        let client = {
            let mut shared = inner.borrow_mut();
            let client = shared.next_client;
            shared.next_client += 1;
            shared.queues.insert(client, event_tx);
            client
        };
        MemoryBackend {
            inner,
            client,
            event_rx,
        }
    }

    /// The whole tree.
    pub fn export(&self) -> Value {
        self.inner.borrow().root.clone()
    }

    /// The value at a path, Null when absent.
    pub fn value_at(&self, path: &str) -> Value {
        let inner = self.inner.borrow();
        node_at(&inner.root, &path_template::segments(path))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Convenience single-path write (`ref.child(path).set(value)`).
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        let mut fanout = Fanout::new();
        fanout.set(path_template::normalize_path(path), value);
        self.update(&fanout)
    }

    /// Convenience delete (`ref.child(path).remove()`).
    pub fn remove(&self, path: &str) -> Result<()> {
        self.set(path, Value::Null)
    }

    /// Make every following write fail with `message` (None to recover).
    pub fn fail_writes(&self, message: Option<&str>) {
        self.inner.borrow_mut().write_failure = message.map(|m| m.to_string());
    }

    /// Revoke every listener attached at `path`, as the server does on a
    /// permission change. Each one receives a `Cancelled` event.
    pub fn cancel_listeners(&self, path: &str, message: &str) -> usize {
        let path = path_template::normalize_path(path);
        let mut inner = self.inner.borrow_mut();
        let revoked: Vec<(ClientId, ListenerId, EventKind)> = inner
            .listeners
            .iter()
            .filter(|(_, l)| l.query.path == path)
            .map(|(id, l)| (l.owner, *id, l.kind))
            .collect();

        for (owner, id, kind) in &revoked {
            inner.listeners.remove(id);
            inner.emit(*owner, *id, *kind, EventPayload::Cancelled(message.to_string()));
        }
        revoked.len()
    }

    /// Every fan-out applied so far, in order.
    pub fn writes(&self) -> Vec<Fanout> {
        self.inner.borrow().writes.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Number of attached listeners of `kind` at `path`.
    pub fn listeners_at(&self, path: &str, kind: EventKind) -> usize {
        let path = path_template::normalize_path(path);
        self.inner
            .borrow()
            .listeners
            .values()
            .filter(|l| l.query.path == path && l.kind == kind)
            .count()
    }
}

impl Clone for MemoryBackend {
    fn clone(&self) -> Self {
        Self::attach(Rc::clone(&self.inner))
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        let client = self.client;
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.queues.remove(&client);
            inner.listeners.retain(|_, l| l.owner != client);
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, query: &Query) -> Result<DataSnapshot> {
        Ok(snapshot(&self.inner.borrow().root, query))
    }

    fn listen(&self, query: &Query, kind: EventKind) -> Result<ListenerHandle> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_listener;
        inner.next_listener += 1;

        let last = match kind {
            EventKind::Value => {
                let snap = snapshot(&inner.root, query);
                let value = snap.value.clone();
                inner.emit(self.client, id, kind, EventPayload::Snapshot(snap));
                ListenerState::Value(value)
            }
            _ => {
                let window = evaluate(&inner.root, query);
                if kind == EventKind::ChildAdded {
                    for (key, value) in &window {
                        let child = DataSnapshot::leaf(&path_template::child_path(&query.path, key), value.clone());
                        inner.emit(self.client, id, kind, EventPayload::Snapshot(child));
                    }
                }
                ListenerState::Window(window)
            }
        };

        inner.listeners.insert(
            id,
            ActiveListener {
                owner: self.client,
                query: query.clone(),
                kind,
                last,
            },
        );
        log::debug!("memory backend: attached {kind} listener {id} at {}", query.path);

        Ok(ListenerHandle {
            id,
            path: query.path.clone(),
            kind,
        })
    }

    fn unlisten(&self, handle: &ListenerHandle) {
        if self.inner.borrow_mut().listeners.remove(&handle.id).is_some() {
            log::debug!(
                "memory backend: detached {} listener {} at {}",
                handle.kind,
                handle.id,
                handle.path
            );
        }
    }

    fn update(&self, fanout: &Fanout) -> Result<()> {
        let mut inner = self.inner.borrow_mut();

        if let Some(message) = &inner.write_failure {
            return Err(FireflexError::Backend(message.clone()));
        }
        check_overlaps(fanout)?;

        let now = chrono::Utc::now().timestamp_millis();
        for (path, value) in fanout.iter() {
            let value = transform::resolve_server_values(value.clone(), now);
            write_node(&mut inner.root, &path_template::segments(path), value);
        }
        inner.writes.push(fanout.clone());
        inner.notify_listeners();
        Ok(())
    }

    fn drain_events(&self) -> Vec<ListenerEvent> {
        self.event_rx.try_iter().collect()
    }
}

impl Inner {
    fn emit(&self, owner: ClientId, listener: ListenerId, kind: EventKind, payload: EventPayload) {
        // Queues of dropped handles are gone; their events go nowhere
        if let Some(queue) = self.queues.get(&owner) {
            let _ = queue.send(ListenerEvent {
                listener,
                kind,
                payload,
            });
        }
    }

    /// Diff every listener against the current tree and queue what changed.
    fn notify_listeners(&mut self) {
        let mut pending = Vec::new();

        for (id, listener) in self.listeners.iter_mut() {
            match &mut listener.last {
                ListenerState::Value(last) => {
                    let snap = snapshot(&self.root, &listener.query);
                    if snap.value != *last {
                        *last = snap.value.clone();
                        pending.push((listener.owner, *id, listener.kind, snap));
                    }
                }
                ListenerState::Window(last) => {
                    let window = evaluate(&self.root, &listener.query);
                    let before: HashMap<&str, &Value> =
                        last.iter().map(|(k, v)| (k.as_str(), v)).collect();
                    let after: HashMap<&str, &Value> =
                        window.iter().map(|(k, v)| (k.as_str(), v)).collect();

                    let child = |key: &str, value: &Value| {
                        DataSnapshot::leaf(&path_template::child_path(&listener.query.path, key), value.clone())
                    };

                    match listener.kind {
                        EventKind::ChildAdded => {
                            for (key, value) in &window {
                                if !before.contains_key(key.as_str()) {
                                    pending.push((listener.owner, *id, listener.kind, child(key.as_str(), value)));
                                }
                            }
                        }
                        EventKind::ChildRemoved => {
                            for (key, value) in last.iter() {
                                if !after.contains_key(key.as_str()) {
                                    pending.push((listener.owner, *id, listener.kind, child(key.as_str(), value)));
                                }
                            }
                        }
                        EventKind::ChildChanged => {
                            for (key, value) in &window {
                                if let Some(old) = before.get(key.as_str()) {
                                    if *old != value {
                                        pending.push((listener.owner, *id, listener.kind, child(key.as_str(), value)));
                                    }
                                }
                            }
                        }
                        EventKind::Value => {}
                    }

                    *last = window;
                }
            }
        }

        for (owner, id, kind, snap) in pending {
            self.emit(owner, id, kind, EventPayload::Snapshot(snap));
        }
    }
}

/// Reject updates where one path is an ancestor of another.
fn check_overlaps(fanout: &Fanout) -> Result<()> {
    let paths: Vec<String> = fanout
        .iter()
        .map(|(p, _)| path_template::normalize_path(p))
        .collect();

    for (i, a) in paths.iter().enumerate() {
        for b in paths.iter().skip(i + 1) {
            if is_ancestor(a, b) || is_ancestor(b, a) {
                return Err(FireflexError::Backend(format!(
                    "Path {a} is an ancestor of {b} in the same update"
                )));
            }
        }
    }
    Ok(())
}

fn is_ancestor(a: &str, b: &str) -> bool {
    a == b || a == "/" || b.starts_with(&format!("{a}/"))
}

fn node_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segments {
        node = node.as_object()?.get(*seg)?;
    }
    Some(node)
}

/// Set (or with Null, delete) the value at `segments`, creating parents as
/// needed and pruning parents left empty by a delete.
fn write_node(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = match value {
            Value::Null => Value::Object(Map::new()),
            other => prune(other),
        };
        return;
    };

    if value.is_null() {
        if let Some(map) = node.as_object_mut() {
            if rest.is_empty() {
                map.remove(*first);
            } else if let Some(child) = map.get_mut(*first) {
                write_node(child, rest, Value::Null);
                if is_empty_node(child) {
                    map.remove(*first);
                }
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Some(map) = node.as_object_mut() {
        if rest.is_empty() {
            let value = prune(value);
            if is_empty_node(&value) {
                map.remove(*first);
            } else {
                map.insert(first.to_string(), value);
            }
        } else {
            let child = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            write_node(child, rest, value);
        }
    }
}

/// Drop null members and empty objects, as the server never stores them.
fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !is_empty_node(v))
                .collect(),
        ),
        other => other,
    }
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Snapshot of a query: the raw node for unconstrained queries, otherwise
/// the filtered window as an object.
fn snapshot(root: &Value, query: &Query) -> DataSnapshot {
    let node = node_at(root, &path_template::segments(&query.path))
        .cloned()
        .unwrap_or(Value::Null);
    let children = evaluate(root, query);

    let value = if !query.is_constrained() {
        node
    } else if children.is_empty() {
        Value::Null
    } else {
        Value::Object(children.iter().cloned().collect())
    };

    DataSnapshot {
        path: query.path.clone(),
        value,
        children,
    }
}

/// The ordered, filtered, limited children of a query's location.
fn evaluate(root: &Value, query: &Query) -> Vec<(String, Value)> {
    let Some(Value::Object(map)) = node_at(root, &path_template::segments(&query.path)) else {
        return Vec::new();
    };

    let mut items: Vec<(String, Value)> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    items.sort_by(|a, b| compare_items(&query.order_by, a, b));

    items.retain(|item| {
        let cmp = |bound: &Value| compare_to_bound(&query.order_by, item, bound);
        query.start_at.as_ref().map_or(true, |b| cmp(b) != Ordering::Less)
            && query.end_at.as_ref().map_or(true, |b| cmp(b) != Ordering::Greater)
            && query.equal_to.as_ref().map_or(true, |b| cmp(b) == Ordering::Equal)
    });

    match query.limit {
        Some(Limit::First(n)) => items.truncate(n as usize),
        Some(Limit::Last(n)) => {
            let n = n as usize;
            if items.len() > n {
                items.drain(..items.len() - n);
            }
        }
        None => {}
    }

    items
}

fn sort_value<'a>(order_by: &OrderBy, value: &'a Value) -> &'a Value {
    match order_by {
        OrderBy::Child(name) => value.get(name).unwrap_or(&Value::Null),
        _ => value,
    }
}

fn compare_items(order_by: &OrderBy, a: &(String, Value), b: &(String, Value)) -> Ordering {
    match order_by {
        OrderBy::Key => compare_keys(&a.0, &b.0),
        _ => compare_values(sort_value(order_by, &a.1), sort_value(order_by, &b.1))
            .then_with(|| compare_keys(&a.0, &b.0)),
    }
}

fn compare_to_bound(order_by: &OrderBy, item: &(String, Value), bound: &Value) -> Ordering {
    match order_by {
        OrderBy::Key => {
            let bound = match bound {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            compare_keys(&item.0, &bound)
        }
        _ => compare_values(sort_value(order_by, &item.1), bound),
    }
}

/// Integer-like keys sort first, numerically; other keys lexicographically.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (parse_int_key(a), parse_int_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn parse_int_key(key: &str) -> Option<i64> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    key.parse::<i32>().ok().map(i64::from)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

/// null < false < true < numbers < strings < objects.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match type_rank(a).cmp(&type_rank(b)) {
        Ordering::Equal => match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
        other => other,
    }
}
