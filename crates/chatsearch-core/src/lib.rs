//! All logic for searching an exported chat history, independent of the CLI.
//!
//! The export stays where the user keeps it. chatsearch stores only its config and
//! the index in its own app data directory (see [app_data]).

pub mod app_data;
pub mod config;
pub mod embedding;
pub mod export;
pub mod index;
pub mod ollama;
pub mod openai;
pub mod search;
pub mod store;
pub mod tokens;

pub use app_data::{app_data_dir, default_index_path};
pub use config::{load_config, save_config, Config, ConfigError, Provider};
pub use embedding::{EmbeddingBackend, EmbeddingClient, EmbeddingError, ProviderBackend};
pub use export::{extract_segments, parse_export, read_export, Conversation, ParseError, Segment};
pub use index::{build_index, build_index_from_file, IndexError, IndexSummary};
pub use search::{rank, search, SearchError, SearchHit, SearchOptions, SearchOutcome};
pub use store::{diff, merge, IndexStore, IndexedRecord, StoreError};
