// Fan-out writes - one atomic multi-path update per save or delete

use crate::path_template::{self, TemplateVars};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A multi-path write: path -> value, null meaning delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fanout {
    writes: BTreeMap<String, Value>,
}

impl Fanout {
    pub fn new() -> Self {
        Fanout::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.writes.insert(path.into(), value);
        self
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.writes.get(path)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.writes.iter()
    }

    /// Shallow-merge extra pairs; later keys win.
    pub fn extend(&mut self, pairs: impl IntoIterator<Item = (String, Value)>) -> &mut Self {
        self.writes.extend(pairs);
        self
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.writes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Fanout {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Fanout {
            writes: iter.into_iter().collect(),
        }
    }
}

/// Variables available to extra-pair keys for a record at `record_path`.
pub fn record_vars(id: &str, record_path: &str) -> TemplateVars {
    path_template::vars([
        ("id", id),
        (
            "innerReferencePath",
            path_template::inner_reference_path(record_path).as_str(),
        ),
    ])
}

/// Write object for saving a record: every changed attribute under
/// `record_path`, then the extra pairs with placeholders rendered.
pub fn build_update(
    record_path: &str,
    changed: &Map<String, Value>,
    include: &Map<String, Value>,
    vars: &TemplateVars,
) -> Fanout {
    let record_path = path_template::normalize_path(record_path);
    let mut fanout: Fanout = changed
        .iter()
        .filter(|(attr, _)| attr.as_str() != "id")
        .map(|(attr, value)| (format!("{record_path}/{attr}"), value.clone()))
        .collect();

    fanout.extend(render_pairs(include, vars));
    fanout
}

/// Write object for deleting a record: the record path nulled plus the
/// extra pairs (typically nulling index entries too).
pub fn build_delete(record_path: &str, include: &Map<String, Value>, vars: &TemplateVars) -> Fanout {
    let mut fanout = Fanout::new();
    fanout.set(path_template::normalize_path(record_path), Value::Null);
    fanout.extend(render_pairs(include, vars));
    fanout
}

fn render_pairs<'a>(
    include: &'a Map<String, Value>,
    vars: &'a TemplateVars,
) -> impl Iterator<Item = (String, Value)> + 'a {
    include
        .iter()
        .map(move |(key, value)| (path_template::render(key, vars), value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_update_writes_changed_attributes() {
        let fanout = build_update(
            "posts/post_c",
            &obj(json!({ "message": "Message", "timestamp": 12345 })),
            &Map::new(),
            &TemplateVars::new(),
        );

        assert_eq!(
            fanout.to_json(),
            json!({
                "/posts/post_c/message": "Message",
                "/posts/post_c/timestamp": 12345
            })
        );
    }

    #[test]
    fn test_update_merges_include() {
        let fanout = build_update(
            "/posts/post_c",
            &obj(json!({ "message": "Message" })),
            &obj(json!({
                "/userFeeds/user_a/post_c": true,
                "/userFeeds/user_b/post_c": true
            })),
            &record_vars("post_c", "/posts/post_c"),
        );

        assert_eq!(
            fanout.to_json(),
            json!({
                "/posts/post_c/message": "Message",
                "/userFeeds/user_a/post_c": true,
                "/userFeeds/user_b/post_c": true
            })
        );
    }

    #[test]
    fn test_include_placeholders_are_rendered() {
        let fanout = build_update(
            "/comments/post_a/comment_c",
            &obj(json!({ "message": "Hi" })),
            &obj(json!({
                "/userComments/user_b/:id": true,
                "/postCommentCount/:innerReferencePath/:id": 1
            })),
            &record_vars("comment_c", "/comments/post_a/comment_c"),
        );

        assert_eq!(fanout.get("/userComments/user_b/comment_c"), Some(&json!(true)));
        assert_eq!(fanout.get("/postCommentCount/post_a/comment_c"), Some(&json!(1)));
        assert_eq!(fanout.len(), 3);
    }

    #[test]
    fn test_delete_nulls_record_and_keeps_include() {
        let fanout = build_delete(
            "posts/post_a",
            &obj(json!({ "/users/user_a": null })),
            &record_vars("post_a", "/posts/post_a"),
        );

        assert_eq!(
            fanout.to_json(),
            json!({ "/posts/post_a": null, "/users/user_a": null })
        );
    }

    #[test]
    fn test_empty_update() {
        let fanout = build_update("/posts/a", &Map::new(), &Map::new(), &TemplateVars::new());
        assert!(fanout.is_empty());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut fanout = Fanout::new();
        fanout.set("/a", json!(1)).set("/b", Value::Null);
        let value = serde_json::to_value(&fanout).unwrap();
        assert_eq!(value, json!({ "/a": 1, "/b": null }));
    }
}
