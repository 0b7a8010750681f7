//! Core of the loci semantic file index: persistent per-container storage,
//! the incremental indexing engine, the filesystem watcher, the hybrid
//! retrieval pipeline, and the command surface external shells consume.

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod retrieval;
pub mod storage;

pub use commands::{Engine, SearchRequest, SearchResult};
pub use error::RetrieverError;
pub use events::{Event, EventBus};
