use thiserror::Error;

#[derive(Error, Debug)]
pub enum FireflexError {
    #[error("Record {id} for type {model} not found")]
    NotFound { model: String, id: String },

    #[error("No record matches the query for type {model}")]
    NoMatch { model: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Query '{0}' is not tracked")]
    UntrackedQuery(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FireflexError {
    /// True for the "nothing there" family (point lookup or point query).
    pub fn is_not_found(&self) -> bool {
        matches!(self, FireflexError::NotFound { .. } | FireflexError::NoMatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, FireflexError>;
