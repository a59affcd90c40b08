// Realtime backend interface - one-shot reads, listeners, atomic multi-path writes

pub mod memory;

use crate::error::Result;
use crate::fanout::Fanout;
use crate::path_template;
use crate::query::Query;
use serde_json::Value;
use std::fmt;

pub use memory::MemoryBackend;

/// The kind of realtime notification a listener receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Value,
    ChildAdded,
    ChildChanged,
    ChildRemoved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Value => "value",
            EventKind::ChildAdded => "child_added",
            EventKind::ChildChanged => "child_changed",
            EventKind::ChildRemoved => "child_removed",
        }
    }

    /// The three child-level kinds a live query listens to.
    pub const CHILD_KINDS: [EventKind; 3] = [
        EventKind::ChildAdded,
        EventKind::ChildChanged,
        EventKind::ChildRemoved,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ListenerId = u64;

/// Detach handle for one attached listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    pub id: ListenerId,
    pub path: String,
    pub kind: EventKind,
}

impl ListenerHandle {
    /// Detach the listener. Events already queued are not recalled.
    pub fn cancel<B: Backend + ?Sized>(&self, backend: &B) {
        backend.unlisten(self);
    }
}

/// The data at a location (or a query window over it) at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    pub path: String,
    /// Null when nothing is stored there.
    pub value: Value,
    /// Children in query order.
    pub children: Vec<(String, Value)>,
}

impl DataSnapshot {
    /// Snapshot of a single child location.
    pub fn leaf(path: &str, value: Value) -> Self {
        let children = match &value {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };
        DataSnapshot {
            path: path_template::normalize_path(path),
            value,
            children,
        }
    }

    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Last path segment, empty for the root.
    pub fn key(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }
}

/// What a listener was told.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Snapshot(DataSnapshot),
    /// The backend revoked the listener; no further events follow.
    Cancelled(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerEvent {
    pub listener: ListenerId,
    pub kind: EventKind,
    pub payload: EventPayload,
}

/// A realtime JSON-tree database.
///
/// Listeners never call back into the caller; their events are queued and
/// handed out by `drain_events`, in the order the backend produced them.
pub trait Backend {
    /// One-shot read of a query (`once('value')`).
    fn get(&self, query: &Query) -> Result<DataSnapshot>;

    /// Attach a listener (`on(kind)`).
    fn listen(&self, query: &Query, kind: EventKind) -> Result<ListenerHandle>;

    /// Detach a listener (`off(kind, cb)`). Unknown handles are ignored.
    fn unlisten(&self, handle: &ListenerHandle);

    /// Apply every path of the fan-out atomically.
    fn update(&self, fanout: &Fanout) -> Result<()>;

    /// Take all events produced since the last call.
    fn drain_events(&self) -> Vec<ListenerEvent>;

    /// Mint a new child key under `path` (`push().key`).
    fn push_key(&self, _path: &str) -> String {
        crate::config::push_id()
    }
}
