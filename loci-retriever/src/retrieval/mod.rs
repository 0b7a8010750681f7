pub mod indexing_engine;
pub mod pipeline;
pub mod watcher;
