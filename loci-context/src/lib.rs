pub mod text;

// Re-export the chunking surface for external use
pub use text::{
    ChunkConfig, ChunkKind, TextChunk, TextChunker, config_for_extension, kind_for_extension,
    HARD_CAP_BYTES,
};
