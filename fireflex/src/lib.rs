pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod fanout;
pub mod live_query;
pub mod path_template;
pub mod query;
pub mod record;
pub mod registry;
pub mod store;
mod sync;
pub mod transform;

pub use adapter::Adapter;
pub use backend::{Backend, EventKind, ListenerHandle, MemoryBackend};
pub use config::{AdapterConfig, IdStrategy};
pub use error::{FireflexError, Result};
pub use fanout::Fanout;
pub use live_query::{LiveCollection, LiveRecord, QueryResult};
pub use query::{LegacyQuery, QueryDescriptor};
pub use record::{AdapterOptions, Record, RecordSnapshot};
pub use store::{LocalStore, MemoryStore};
