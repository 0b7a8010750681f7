//! Embedding and reranking providers.
//!
//! Two provider kinds implement [`EmbeddingProvider`]: a local ONNX model
//! served by fastembed, and a remote HTTP endpoint. Which one a container uses
//! is fixed at container creation through its [`ProviderIdentity`].
//!
//! The local model is a process-wide resource: it is loaded lazily on first
//! use, cached for the process lifetime, and its `embed` calls are serialized
//! behind a lock and executed on the blocking pool.

pub mod config;
pub mod error;
pub mod provider;
pub mod remote;
pub mod rerank;
pub mod testing;

pub use config::{EmbedConfig, ProviderIdentity, ProviderKind, RemoteConfig};
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, LocalProvider, l2_normalize, EMBED_BATCH_SIZE};
pub use remote::RemoteProvider;
pub use rerank::{load_reranker, safe_rerank, RERANK_SNIPPET_BYTES};
