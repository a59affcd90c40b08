// Path resolution - model names to collection paths, placeholder templates

use heck::ToLowerCamelCase;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Named values substituted into `:name` / `$name` placeholders.
pub type TemplateVars = HashMap<String, String>;

/// A path (or cache id) containing `:name` or `$name` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    pub raw: String,
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Placeholder(String),
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[:$]([A-Za-z_][A-Za-z0-9_]*)").expect("valid placeholder regex"))
}

impl PathTemplate {
    pub fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                segments.push(PathSegment::Literal(template[last..whole.start()].to_string()));
            }
            segments.push(PathSegment::Placeholder(caps[1].to_string()));
            last = whole.end();
        }

        if last < template.len() {
            segments.push(PathSegment::Literal(template[last..].to_string()));
        }

        PathTemplate {
            raw: template.to_string(),
            segments,
        }
    }

    /// Names of all placeholders, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                PathSegment::Placeholder(name) => Some(name.as_str()),
                PathSegment::Literal(_) => None,
            })
            .collect()
    }

    /// Substitute known placeholders. Unknown ones are kept verbatim so keys
    /// that legitimately contain ':' survive.
    pub fn render(&self, vars: &TemplateVars) -> String {
        let mut out = String::with_capacity(self.raw.len());
        let mut cursor = 0;

        for caps in placeholder_regex().captures_iter(&self.raw) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&self.raw[cursor..whole.start()]);
            match vars.get(&caps[1]) {
                Some(value) => out.push_str(value),
                None => out.push_str(whole.as_str()),
            }
            cursor = whole.end();
        }
        out.push_str(&self.raw[cursor..]);
        out
    }
}

/// Render a template string in one go.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    PathTemplate::parse(template).render(vars)
}

/// Build a `TemplateVars` map from pairs.
pub fn vars<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> TemplateVars {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Resolve the backend path for a model, optionally for one record.
/// e.g. ("blog-post", Some("a"), None) -> "blogPosts/a"
pub fn resolve_path(model: &str, id: Option<&str>, explicit_path: Option<&str>) -> String {
    let base = match explicit_path {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => collection_name(model),
    };

    match id {
        Some(id) if !id.is_empty() => format!("{}/{}", base.trim_end_matches('/'), id),
        _ => base,
    }
}

/// Camelized plural form of a model name.
/// e.g. "post" -> "posts", "blog-post" -> "blogPosts", "user_feed" -> "userFeeds"
pub fn collection_name(model: &str) -> String {
    pluralize(model).to_lower_camel_case()
}

const UNCOUNTABLE: &[&str] = &[
    "equipment",
    "information",
    "rice",
    "money",
    "species",
    "series",
    "fish",
    "sheep",
    "jeans",
    "police",
];

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("child", "children"),
    ("sex", "sexes"),
    ("move", "moves"),
    ("zombie", "zombies"),
];

/// Pluralize the last word of a (possibly dasherized/underscored) name.
pub fn pluralize(word: &str) -> String {
    let split_at = word
        .rfind(|c: char| c == '-' || c == '_' || c == ' ' || c == '/')
        .map(|i| i + 1)
        .unwrap_or(0);
    let (head, last) = word.split_at(split_at);
    let lower = last.to_lowercase();

    if lower.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }

    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return format!("{head}{plural}");
    }
    if IRREGULAR.iter().any(|(_, plural)| *plural == lower) {
        return word.to_string();
    }

    let plural = if lower.ends_with("ss")
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{last}es")
    } else if lower.ends_with('s') {
        last.to_string()
    } else if lower.ends_with('y') && !ends_with_vowel_y(&lower) {
        format!("{}ies", &last[..last.len() - 1])
    } else if lower.ends_with("fe") {
        format!("{}ves", &last[..last.len() - 2])
    } else if lower.ends_with("lf") || lower.ends_with("rf") {
        format!("{}ves", &last[..last.len() - 1])
    } else {
        format!("{last}s")
    };

    format!("{head}{plural}")
}

fn ends_with_vowel_y(word: &str) -> bool {
    let mut chars = word.chars().rev();
    chars.next();
    matches!(chars.next(), Some('a' | 'e' | 'i' | 'o' | 'u'))
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical form used for registry keys and fan-out keys: leading '/',
/// no trailing '/', no empty segments. The root is "/".
pub fn normalize_path(path: &str) -> String {
    format!("/{}", segments(path).join("/"))
}

/// Join a child key onto a path in canonical form.
pub fn child_path(path: &str, key: &str) -> String {
    let parent = normalize_path(path);
    if parent == "/" {
        format!("/{key}")
    } else {
        format!("{parent}/{key}")
    }
}

/// Segments between the collection root and the record id.
/// e.g. "/comments/post_a/comment_a" -> "post_a"
pub fn inner_reference_path(record_path: &str) -> String {
    let segs = segments(record_path);
    if segs.len() <= 2 {
        return String::new();
    }
    segs[1..segs.len() - 1].join("/")
}
