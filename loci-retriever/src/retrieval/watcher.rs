//! Filesystem watcher: debounced platform events in, index commands out.
//!
//! The notify debouncer coalesces bursts per path over a 500 ms window. Its
//! callback reduces raw events to [`IndexCommand`]s (a rename is a remove of
//! the old path plus an upsert of the new one), drops anything outside the
//! watched roots or matched by ignore rules, and pushes the rest onto a
//! bounded channel — the channel is the backpressure. The dispatch loop on
//! the other end retries `Busy` with exponential backoff up to a cap, then
//! drops the event; the next periodic rescan recovers it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_full::notify::{self, EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::RetrieverError;
use crate::retrieval::indexing_engine::LOCAL_IGNORE_FILE;

/// Debounce window for filesystem event bursts.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Initial retry delay when the indexer reports `Busy`.
pub const BACKOFF_START: Duration = Duration::from_millis(500);

/// Events still busy after backing off this long are dropped.
pub const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Commands the watcher feeds the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCommand {
    Upsert(PathBuf),
    Remove(PathBuf),
}

/// Keeps the platform watcher alive; dropping it stops event delivery.
pub struct WatcherHandle {
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
}

fn build_gitignore(roots: &[PathBuf]) -> Option<ignore::gitignore::Gitignore> {
    let first = roots.first()?;
    let mut builder = ignore::gitignore::GitignoreBuilder::new(first);
    for root in roots {
        for name in [".gitignore", LOCAL_IGNORE_FILE] {
            let file = root.join(name);
            if file.exists() {
                let _ = builder.add(file);
            }
        }
    }
    builder.build().ok()
}

fn in_scope(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Start watching `roots`, sending reduced commands to `tx`.
///
/// Returns `None` when there is nothing to watch or the platform watcher
/// cannot be created.
pub fn spawn_watcher(
    roots: &[PathBuf],
    tx: mpsc::Sender<IndexCommand>,
) -> Option<WatcherHandle> {
    if roots.is_empty() {
        return None;
    }

    let gitignore = build_gitignore(roots);
    let scope: Vec<PathBuf> = roots.to_vec();

    let mut debouncer = new_debouncer(
        DEBOUNCE_WINDOW,
        None,
        move |result: DebounceEventResult| {
            let Ok(events) = result else { return };
            for event in &events {
                let ignored = |p: &Path| {
                    gitignore
                        .as_ref()
                        .is_some_and(|gi| gi.matched_path_or_any_parents(p, false).is_ignore())
                };
                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => {
                        for path in &event.paths {
                            if !in_scope(path, &scope) || ignored(path) {
                                continue;
                            }
                            // Rename delivery lands here too: the old path no
                            // longer exists, the new one does.
                            let command = if path.is_file() {
                                IndexCommand::Upsert(path.clone())
                            } else if path.exists() {
                                continue;
                            } else {
                                IndexCommand::Remove(path.clone())
                            };
                            if tx.blocking_send(command).is_err() {
                                return;
                            }
                        }
                    }
                    EventKind::Remove(_) => {
                        for path in &event.paths {
                            if !in_scope(path, &scope) || ignored(path) {
                                continue;
                            }
                            if tx.blocking_send(IndexCommand::Remove(path.clone())).is_err() {
                                return;
                            }
                        }
                    }
                    _ => {}
                }
            }
        },
    )
    .ok()?;

    for root in roots {
        if let Err(e) = debouncer.watch(root, RecursiveMode::Recursive) {
            warn!("cannot watch {}: {e}", root.display());
        }
    }

    Some(WatcherHandle {
        _debouncer: debouncer,
    })
}

/// Consume commands, retrying `Busy` with exponential backoff up to
/// [`BACKOFF_CAP`], then dropping the command.
pub async fn run_dispatch<H, Fut>(mut rx: mpsc::Receiver<IndexCommand>, mut handle: H)
where
    H: FnMut(IndexCommand) -> Fut,
    Fut: std::future::Future<Output = Result<(), RetrieverError>>,
{
    while let Some(command) = rx.recv().await {
        let mut delay = BACKOFF_START;
        loop {
            match handle(command.clone()).await {
                Ok(()) => break,
                Err(RetrieverError::Busy(_)) if delay <= BACKOFF_CAP => {
                    debug!("indexer busy, requeueing {command:?} in {delay:?}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(RetrieverError::Busy(container)) => {
                    warn!("dropping {command:?}: '{container}' still busy after backoff");
                    break;
                }
                Err(e) => {
                    warn!("watcher command {command:?} failed: {e}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn scope_filtering() {
        let roots = vec![PathBuf::from("/watched/a"), PathBuf::from("/watched/b")];
        assert!(in_scope(Path::new("/watched/a/sub/file.rs"), &roots));
        assert!(!in_scope(Path::new("/elsewhere/file.rs"), &roots));
    }

    #[tokio::test]
    async fn dispatch_retries_busy_then_succeeds() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(IndexCommand::Upsert(PathBuf::from("/f")))
            .await
            .unwrap();
        drop(tx);

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        tokio::time::pause();
        let dispatch = run_dispatch(rx, move |_cmd| {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RetrieverError::Busy("c".into()))
                } else {
                    Ok(())
                }
            }
        });
        dispatch.await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dispatch_drops_after_backoff_cap() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(IndexCommand::Remove(PathBuf::from("/f")))
            .await
            .unwrap();
        drop(tx);

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        tokio::time::pause();
        run_dispatch(rx, move |_cmd| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(RetrieverError::Busy("c".into()))
            }
        })
        .await;

        // 0.5, 1, 2, 4, 8 second delays, then the drop
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn dispatch_swallows_other_errors() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(IndexCommand::Upsert(PathBuf::from("/f")))
            .await
            .unwrap();
        tx.send(IndexCommand::Upsert(PathBuf::from("/g")))
            .await
            .unwrap();
        drop(tx);

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        run_dispatch(rx, move |_cmd| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(RetrieverError::StoreFailure("boom".into()))
            }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
