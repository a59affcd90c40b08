use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// Adapter settings, usually parsed from a `fireflex.yaml` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Extra field carrying the path between collection root and record id.
    /// Not added to records when unset.
    #[serde(default)]
    pub inner_reference_path_name: Option<String>,
    /// Server-rendering mode: no realtime listeners, no tracked queries.
    #[serde(default)]
    pub server_rendering: bool,
    #[serde(default)]
    pub id_strategy: IdStrategy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            inner_reference_path_name: None,
            server_rendering: false,
            id_strategy: IdStrategy::Push,
        }
    }
}

impl AdapterConfig {
    /// Parse a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse a YAML config string. An empty document yields the defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(AdapterConfig::default());
        }
        let config: AdapterConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

/// How `generate_id` mints record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// 20-char chronologically sortable push key
    #[default]
    Push,
    Ulid,
    Uuid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Push => push_id(),
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

/// Alphabet of push keys, in ASCII order so keys sort by creation time.
const PUSH_CHARS: [char; 64] = [
    '-', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', '_', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p',
    'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

static LAST_PUSH: Mutex<Option<(i64, Vec<usize>)>> = Mutex::new(None);

/// Generate a push key: 8 chars of millisecond timestamp followed by 12
/// random chars. Keys minted within the same millisecond increment the
/// random part so they still sort in creation order.
pub fn push_id() -> String {
    let now = chrono::Utc::now().timestamp_millis();

    let mut time_chars = ['-'; 8];
    let mut ts = now;
    for slot in time_chars.iter_mut().rev() {
        *slot = PUSH_CHARS[(ts % 64) as usize];
        ts /= 64;
    }

    let random = {
        let mut last = LAST_PUSH.lock().unwrap_or_else(|e| e.into_inner());
        let digits = match last.take() {
            Some((ts, mut digits)) if ts == now => {
                increment(&mut digits);
                digits
            }
            _ => nanoid::nanoid!(12, &PUSH_CHARS)
                .chars()
                .map(|c| PUSH_CHARS.iter().position(|p| *p == c).unwrap_or(0))
                .collect(),
        };
        *last = Some((now, digits.clone()));
        digits
    };

    time_chars
        .iter()
        .copied()
        .chain(random.into_iter().map(|i| PUSH_CHARS[i]))
        .collect()
}

fn increment(digits: &mut [usize]) {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AdapterConfig::default();
        assert_eq!(config.inner_reference_path_name, None);
        assert!(!config.server_rendering);
        assert_eq!(config.id_strategy, IdStrategy::Push);
    }

    #[test]
    fn test_parse_yaml() {
        let config = AdapterConfig::from_yaml_str(
            "inner_reference_path_name: _innerReferencePath\nserver_rendering: true\nid_strategy: ulid\n",
        )
        .unwrap();
        assert_eq!(
            config.inner_reference_path_name.as_deref(),
            Some("_innerReferencePath")
        );
        assert!(config.server_rendering);
        assert_eq!(config.id_strategy, IdStrategy::Ulid);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = AdapterConfig::from_yaml_str("  \n").unwrap();
        assert_eq!(config, AdapterConfig::default());
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let result = AdapterConfig::from_yaml_str("id_strategy: sequential");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id_strategy: nanoid").unwrap();
        let config = AdapterConfig::load(file.path()).unwrap();
        assert_eq!(config.id_strategy, IdStrategy::Nanoid);
    }

    #[test]
    fn test_push_ids_are_sortable() {
        let ids: Vec<String> = (0..50).map(|_| push_id()).collect();
        for id in &ids {
            assert_eq!(id.len(), 20);
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
    }

    #[test]
    fn test_strategies_generate_distinct_ids() {
        for strategy in [IdStrategy::Push, IdStrategy::Ulid, IdStrategy::Uuid, IdStrategy::Nanoid] {
            let a = strategy.generate();
            let b = strategy.generate();
            assert!(!a.is_empty());
            assert_ne!(a, b);
        }
    }
}
