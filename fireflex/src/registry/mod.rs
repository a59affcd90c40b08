// Listener deduplication and record path tracking

use crate::backend::{EventKind, ListenerHandle};
use crate::path_template;
use std::collections::HashMap;

/// At most one realtime listener per (path, event kind).
///
/// Entries are never dropped by ordinary lookups; they live until the
/// owning adapter is torn down, or until the backend revokes them.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    entries: HashMap<(String, EventKind), ListenerHandle>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        ListenerRegistry::default()
    }

    pub fn is_registered(&self, path: &str, kind: EventKind) -> bool {
        self.entries
            .contains_key(&(path_template::normalize_path(path), kind))
    }

    /// Record the listener for (path, kind). Returns false, keeping the
    /// existing entry, when one is already registered.
    pub fn register(&mut self, path: &str, kind: EventKind, handle: ListenerHandle) -> bool {
        let key = (path_template::normalize_path(path), kind);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, handle);
        true
    }

    pub fn unregister(&mut self, path: &str, kind: EventKind) -> Option<ListenerHandle> {
        self.entries
            .remove(&(path_template::normalize_path(path), kind))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empty the table, handing back every handle so the caller can detach it.
    pub fn drain(&mut self) -> Vec<ListenerHandle> {
        self.entries.drain().map(|(_, handle)| handle).collect()
    }
}

/// Remembers where each (model, id) lives once it has been fetched or
/// written, so later writes and deletes reuse a path override.
#[derive(Debug, Default)]
pub struct PathTracker {
    paths: HashMap<(String, String), String>,
}

impl PathTracker {
    pub fn new() -> Self {
        PathTracker::default()
    }

    pub fn track(&mut self, model: &str, id: &str, record_path: &str) {
        self.paths.insert(
            (model.to_string(), id.to_string()),
            path_template::normalize_path(record_path),
        );
    }

    pub fn path_of(&self, model: &str, id: &str) -> Option<&str> {
        self.paths
            .get(&(model.to_string(), id.to_string()))
            .map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64, path: &str, kind: EventKind) -> ListenerHandle {
        ListenerHandle {
            id,
            path: path.to_string(),
            kind,
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ListenerRegistry::new();
        assert!(!registry.is_registered("/posts/post_a", EventKind::Value));

        assert!(registry.register("posts/post_a", EventKind::Value, handle(1, "/posts/post_a", EventKind::Value)));
        assert!(!registry.register("/posts/post_a", EventKind::Value, handle(2, "/posts/post_a", EventKind::Value)));
        assert_eq!(registry.len(), 1);

        // The first handle is kept
        let kept = registry.unregister("/posts/post_a", EventKind::Value).unwrap();
        assert_eq!(kept.id, 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_kinds_are_distinct() {
        let mut registry = ListenerRegistry::new();
        registry.register("/posts", EventKind::ChildAdded, handle(1, "/posts", EventKind::ChildAdded));
        assert!(registry.is_registered("/posts", EventKind::ChildAdded));
        assert!(!registry.is_registered("/posts", EventKind::Value));
    }

    #[test]
    fn test_drain_returns_handles() {
        let mut registry = ListenerRegistry::new();
        registry.register("/a", EventKind::Value, handle(1, "/a", EventKind::Value));
        registry.register("/b", EventKind::Value, handle(2, "/b", EventKind::Value));
        let mut ids: Vec<u64> = registry.drain().into_iter().map(|h| h.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_path_tracker() {
        let mut tracker = PathTracker::new();
        assert_eq!(tracker.path_of("comment", "comment_a"), None);
        tracker.track("comment", "comment_a", "comments/post_a/comment_a");
        assert_eq!(tracker.path_of("comment", "comment_a"), Some("/comments/post_a/comment_a"));
        tracker.clear();
        assert_eq!(tracker.path_of("comment", "comment_a"), None);
    }
}
