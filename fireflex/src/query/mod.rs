// Query descriptors and their compilation into backend queries

use crate::error::{FireflexError, Result};
use crate::path_template::{self, TemplateVars};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort order of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum OrderBy {
    /// `orderBy: "id"`
    #[default]
    Key,
    /// `orderBy: ".value"`
    Value,
    /// `orderBy: "<attribute>"`
    Child(String),
}

impl OrderBy {
    pub fn parse(field: &str) -> Self {
        match field {
            "id" => OrderBy::Key,
            ".value" => OrderBy::Value,
            other => OrderBy::Child(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderBy::Key => "id",
            OrderBy::Value => ".value",
            OrderBy::Child(name) => name,
        }
    }
}

/// Page bound anchored to either end of the sorted results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    First(u32),
    Last(u32),
}

impl Limit {
    pub fn count(&self) -> u32 {
        match self {
            Limit::First(n) | Limit::Last(n) => *n,
        }
    }

    /// Widen the bound by `by` without changing its anchor.
    pub fn widened(&self, by: u32) -> Limit {
        match self {
            Limit::First(n) => Limit::First(n.saturating_add(by)),
            Limit::Last(n) => Limit::Last(n.saturating_add(by)),
        }
    }
}

/// What an application asks for. Deserializes from the camelCase option
/// object (`orderBy`, `equalTo`, `limitToLast`, `cacheId`, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptor", into = "RawDescriptor")]
pub struct QueryDescriptor {
    /// Path override; the model's collection path when unset.
    pub path: Option<String>,
    /// Child keys under `path` name records stored at the model's own path.
    pub is_reference: bool,
    pub order_by: OrderBy,
    pub start_at: Option<Value>,
    pub end_at: Option<Value>,
    pub equal_to: Option<Value>,
    pub limit: Option<Limit>,
    /// Live-tracking identifier; untracked when unset.
    pub cache_id: Option<String>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        QueryDescriptor::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn reference(mut self) -> Self {
        self.is_reference = true;
        self
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = OrderBy::parse(field);
        self
    }

    pub fn start_at(mut self, value: impl Into<Value>) -> Self {
        self.start_at = Some(value.into());
        self
    }

    pub fn end_at(mut self, value: impl Into<Value>) -> Self {
        self.end_at = Some(value.into());
        self
    }

    pub fn equal_to(mut self, value: impl Into<Value>) -> Self {
        self.equal_to = Some(value.into());
        self
    }

    pub fn limit_to_first(mut self, n: u32) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    pub fn limit_to_last(mut self, n: u32) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    pub fn cache_id(mut self, id: impl Into<String>) -> Self {
        self.cache_id = Some(id.into());
        self
    }

    /// Render `$id` / `:name` placeholders in the cache id and path.
    pub fn with_vars(mut self, vars: &TemplateVars) -> Self {
        self.cache_id = self.cache_id.map(|c| path_template::render(&c, vars));
        self.path = self.path.map(|p| path_template::render(&p, vars));
        self
    }

    /// Translate the deprecated positional call shape
    /// `(listenerId, path, options)` into a descriptor.
    pub fn from_legacy(listener_id: &str, path: &str, options: &Value) -> Result<Self> {
        let mut descriptor: QueryDescriptor = if options.is_null() {
            QueryDescriptor::default()
        } else {
            serde_json::from_value(options.clone())
                .map_err(|e| FireflexError::InvalidQuery(e.to_string()))?
        };
        descriptor.cache_id = Some(listener_id.to_string());
        descriptor.path = Some(path.to_string());
        Ok(descriptor)
    }

    /// Parse a descriptor from its JSON option object.
    pub fn from_json(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| FireflexError::InvalidQuery(e.to_string()))
    }
}

/// The deprecated positional query call: `(listenerId, path, options)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyQuery {
    pub listener_id: String,
    pub path: String,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_reference: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    order_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    equal_to: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit_to_first: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit_to_last: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache_id: Option<String>,
}

impl TryFrom<RawDescriptor> for QueryDescriptor {
    type Error = String;

    fn try_from(raw: RawDescriptor) -> std::result::Result<Self, Self::Error> {
        let limit = match (raw.limit_to_first, raw.limit_to_last) {
            (Some(_), Some(_)) => {
                return Err("limitToFirst and limitToLast cannot be combined".to_string())
            }
            (Some(n), None) => Some(Limit::First(n)),
            (None, Some(n)) => Some(Limit::Last(n)),
            (None, None) => None,
        };

        Ok(QueryDescriptor {
            path: raw.path,
            is_reference: raw.is_reference,
            order_by: raw.order_by.as_deref().map(OrderBy::parse).unwrap_or_default(),
            start_at: raw.start_at,
            end_at: raw.end_at,
            equal_to: raw.equal_to,
            limit,
            cache_id: raw.cache_id,
        })
    }
}

impl From<QueryDescriptor> for RawDescriptor {
    fn from(d: QueryDescriptor) -> Self {
        let (limit_to_first, limit_to_last) = match d.limit {
            Some(Limit::First(n)) => (Some(n), None),
            Some(Limit::Last(n)) => (None, Some(n)),
            None => (None, None),
        };
        RawDescriptor {
            path: d.path,
            is_reference: d.is_reference,
            order_by: Some(d.order_by.as_str().to_string()),
            start_at: d.start_at,
            end_at: d.end_at,
            equal_to: d.equal_to,
            limit_to_first,
            limit_to_last,
            cache_id: d.cache_id,
        }
    }
}

/// An unordered location in the tree (`child(path)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    path: String,
}

impl Reference {
    pub fn new(path: &str) -> Self {
        Reference {
            path: path_template::normalize_path(path),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn order_by_key(self) -> Query {
        self.order(OrderBy::Key)
    }

    pub fn order_by_value(self) -> Query {
        self.order(OrderBy::Value)
    }

    pub fn order_by_child(self, name: &str) -> Query {
        self.order(OrderBy::Child(name.to_string()))
    }

    fn order(self, order_by: OrderBy) -> Query {
        Query {
            path: self.path,
            order_by,
            start_at: None,
            end_at: None,
            equal_to: None,
            limit: None,
        }
    }

    /// The whole location, unconstrained (what value listeners attach to).
    pub fn into_query(self) -> Query {
        self.order_by_key()
    }
}

/// A concrete, ordered and filtered query against one location.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub path: String,
    pub order_by: OrderBy,
    pub start_at: Option<Value>,
    pub end_at: Option<Value>,
    pub equal_to: Option<Value>,
    pub limit: Option<Limit>,
}

impl Query {
    /// Shorthand for an unconstrained query at `path`.
    pub fn at(path: &str) -> Self {
        Reference::new(path).into_query()
    }

    pub fn start_at(mut self, value: Value) -> Self {
        self.start_at = Some(value);
        self
    }

    pub fn end_at(mut self, value: Value) -> Self {
        self.end_at = Some(value);
        self
    }

    pub fn equal_to(mut self, value: Value) -> Self {
        self.equal_to = Some(value);
        self
    }

    pub fn limit_to_first(mut self, n: u32) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    pub fn limit_to_last(mut self, n: u32) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    /// True when a range or page bound narrows the location.
    pub fn is_constrained(&self) -> bool {
        self.start_at.is_some()
            || self.end_at.is_some()
            || self.equal_to.is_some()
            || self.limit.is_some()
    }
}

/// Force a single result: an existing page bound is set to 1, otherwise
/// `limitToFirst: 1` is added.
pub fn force_single(descriptor: &mut QueryDescriptor) {
    descriptor.limit = Some(match descriptor.limit {
        Some(Limit::Last(_)) => Limit::Last(1),
        _ => Limit::First(1),
    });
}

/// Compile a descriptor against a reference. Range bounds are forwarded
/// as given (startAt, endAt, equalTo), then the page bound.
pub fn compile(reference: Reference, descriptor: &QueryDescriptor) -> Query {
    let mut query = match &descriptor.order_by {
        OrderBy::Key => reference.order_by_key(),
        OrderBy::Value => reference.order_by_value(),
        OrderBy::Child(name) => reference.order_by_child(name),
    };

    if let Some(v) = &descriptor.start_at {
        query = query.start_at(v.clone());
    }
    if let Some(v) = &descriptor.end_at {
        query = query.end_at(v.clone());
    }
    if let Some(v) = &descriptor.equal_to {
        query = query.equal_to(v.clone());
    }
    match descriptor.limit {
        Some(Limit::First(n)) => query = query.limit_to_first(n),
        Some(Limit::Last(n)) => query = query.limit_to_last(n),
        None => {}
    }

    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_default_order_is_key() {
        let query = compile(Reference::new("posts"), &QueryDescriptor::new());
        assert_eq!(query.order_by, OrderBy::Key);
        assert_eq!(query.path, "/posts");
        assert!(!query.is_constrained());
    }

    #[test]
    fn test_order_by_variants() {
        let by_value = compile(Reference::new("scores"), &QueryDescriptor::new().order_by(".value"));
        assert_eq!(by_value.order_by, OrderBy::Value);

        let by_child = compile(Reference::new("posts"), &QueryDescriptor::new().order_by("timestamp"));
        assert_eq!(by_child.order_by, OrderBy::Child("timestamp".into()));
    }

    #[test]
    fn test_bounds_are_forwarded() {
        let descriptor = QueryDescriptor::new()
            .order_by("timestamp")
            .start_at(10)
            .end_at(20)
            .equal_to(15)
            .limit_to_last(5);
        let query = compile(Reference::new("posts"), &descriptor);
        assert_eq!(query.start_at, Some(json!(10)));
        assert_eq!(query.end_at, Some(json!(20)));
        assert_eq!(query.equal_to, Some(json!(15)));
        assert_eq!(query.limit, Some(Limit::Last(5)));
    }

    #[test]
    fn test_force_single_defaults_to_first() {
        let mut descriptor = QueryDescriptor::new().equal_to("post_a");
        force_single(&mut descriptor);
        assert_eq!(descriptor.limit, Some(Limit::First(1)));
    }

    #[test]
    fn test_force_single_overwrites_existing_bound() {
        let mut first = QueryDescriptor::new().limit_to_first(10);
        force_single(&mut first);
        assert_eq!(first.limit, Some(Limit::First(1)));

        let mut last = QueryDescriptor::new().limit_to_last(10);
        force_single(&mut last);
        assert_eq!(last.limit, Some(Limit::Last(1)));
    }

    #[test]
    fn test_widen_limit() {
        assert_eq!(Limit::First(1).widened(2), Limit::First(3));
        assert_eq!(Limit::Last(4).widened(1), Limit::Last(5));
        assert_eq!(Limit::Last(4).count(), 4);
    }

    #[test]
    fn test_descriptor_from_json() {
        let descriptor = QueryDescriptor::from_json(&json!({
            "orderBy": "timestamp",
            "startAt": 100,
            "limitToLast": 2,
            "cacheId": "feed",
            "path": "/userFeeds/user_a",
            "isReference": true
        }))
        .unwrap();

        assert_eq!(
            descriptor,
            QueryDescriptor::new()
                .order_by("timestamp")
                .start_at(100)
                .limit_to_last(2)
                .cache_id("feed")
                .path("/userFeeds/user_a")
                .reference()
        );
    }

    #[test]
    fn test_descriptor_rejects_both_limits() {
        let result = QueryDescriptor::from_json(&json!({ "limitToFirst": 1, "limitToLast": 1 }));
        assert!(matches!(result, Err(FireflexError::InvalidQuery(_))));
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let value = serde_json::to_value(QueryDescriptor::new().limit_to_first(2).cache_id("foo")).unwrap();
        assert_eq!(
            value,
            json!({ "orderBy": "id", "limitToFirst": 2, "cacheId": "foo" })
        );
    }

    #[test]
    fn test_with_vars() {
        let vars = path_template::vars([("id", "user_a")]);
        let descriptor = QueryDescriptor::new()
            .cache_id("feed_$id")
            .path("/userFeeds/$id")
            .with_vars(&vars);
        assert_eq!(descriptor.cache_id.as_deref(), Some("feed_user_a"));
        assert_eq!(descriptor.path.as_deref(), Some("/userFeeds/user_a"));
    }

    #[test]
    fn test_from_legacy() {
        let descriptor =
            QueryDescriptor::from_legacy("comments_post_a", "/comments/post_a", &json!({ "limitToFirst": 5 }))
                .unwrap();
        assert_eq!(descriptor.cache_id.as_deref(), Some("comments_post_a"));
        assert_eq!(descriptor.path.as_deref(), Some("/comments/post_a"));
        assert_eq!(descriptor.limit, Some(Limit::First(5)));

        let bare = QueryDescriptor::from_legacy("x", "/x", &Value::Null).unwrap();
        assert_eq!(bare.limit, None);
    }
}
