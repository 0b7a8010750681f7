use serde::Serialize;
use tokio::sync::broadcast;

/// Side-channel events consumed by external collaborators (UI, MCP).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    IndexingProgress {
        current: usize,
        total: usize,
        path: String,
    },
    IndexingComplete {
        message: String,
    },
    ModelLoaded,
    ModelLoadError {
        reason: String,
    },
}

/// Broadcast bus for [`Event`]s. Cloning is cheap; slow subscribers lag and
/// drop rather than backpressure indexing.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Send an event; a bus with no subscribers swallows it.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn progress(&self, current: usize, total: usize, path: impl Into<String>) {
        self.emit(Event::IndexingProgress {
            current,
            total,
            path: path.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
