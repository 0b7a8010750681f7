//! Indexing engine behavior: skip accounting, cancellation at batch
//! boundaries, per-file atomic replacement, and the busy guard.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loci_context::TextChunker;
use loci_embed::testing::HashEmbedProvider;
use loci_embed::{EmbeddingProvider, ProviderIdentity};
use loci_retriever::config::IndexingOptions;
use loci_retriever::events::EventBus;
use loci_retriever::retrieval::indexing_engine::Indexer;
use loci_retriever::storage::Store;
use loci_retriever::RetrieverError;

const DIM: usize = 32;

fn identity() -> ProviderIdentity {
    ProviderIdentity::local("hash-test", DIM)
}

async fn open_container(
    store: &Store,
) -> loci_retriever::storage::ContainerStore {
    store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap()
}

#[tokio::test]
async fn per_file_failures_are_counted_not_fatal() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    std::fs::write(tree.path().join("good.md"), "useful words live here").unwrap();
    std::fs::write(tree.path().join("tool.exe"), [0u8, 1, 2, 3]).unwrap();
    std::fs::write(tree.path().join("empty.txt"), "").unwrap();

    let store = Store::open(data.path()).await.unwrap();
    let container = open_container(&store).await;
    let provider = HashEmbedProvider::new(DIM);
    let indexer = Indexer::new(EventBus::default());

    let summary = indexer
        .index_root(
            "Default",
            &container,
            &provider,
            &IndexingOptions::default(),
            tree.path(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.files_skipped, 2);
    assert!(summary.fragments_written >= 1);
}

#[tokio::test]
async fn indexed_fragments_match_chunker_output() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    let body = "# One\n\nalpha beta gamma.\n\n# Two\n\ndelta epsilon zeta.\n".repeat(30);
    let file = tree.path().join("doc.md");
    std::fs::write(&file, &body).unwrap();

    let store = Store::open(data.path()).await.unwrap();
    let container = open_container(&store).await;
    let provider = HashEmbedProvider::new(DIM);
    let indexer = Indexer::new(EventBus::default());

    indexer
        .index_root(
            "Default",
            &container,
            &provider,
            &IndexingOptions::default(),
            tree.path(),
            None,
        )
        .await
        .unwrap();

    let expected = TextChunker::new().chunk(&body, "md");
    let stored = container
        .fragments_for_path(&file.to_string_lossy())
        .await
        .unwrap();

    assert_eq!(stored.len(), expected.len());
    for (fragment, chunk) in stored.iter().zip(&expected) {
        assert_eq!(fragment.ordinal as usize, chunk.sequence);
        assert_eq!(fragment.offset_start as usize, chunk.start);
        assert_eq!(fragment.offset_end as usize, chunk.end);
        assert!(fragment.text.ends_with(&chunk.text));
        assert_eq!(fragment.vector.len(), DIM);
    }
}

#[tokio::test]
async fn cancellation_stops_before_any_commit() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    for i in 0..5 {
        std::fs::write(tree.path().join(format!("f{i}.md")), "some body text").unwrap();
    }

    let store = Store::open(data.path()).await.unwrap();
    let container = open_container(&store).await;
    let provider = HashEmbedProvider::new(DIM);
    let indexer = Indexer::new(EventBus::default());

    let cancel = AtomicBool::new(true);
    let summary = indexer
        .index_root(
            "Default",
            &container,
            &provider,
            &IndexingOptions::default(),
            tree.path(),
            Some(&cancel),
        )
        .await
        .unwrap();

    assert_eq!(summary.files_indexed, 0);
    assert_eq!(container.count_fragments().await.unwrap(), 0);
}

/// Provider that parks inside `embed_passages` long enough for a second job
/// to collide with the first.
struct SlowProvider {
    inner: HashEmbedProvider,
    delay: Duration,
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn embed_passages(
        &self,
        texts: Vec<String>,
    ) -> loci_embed::Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed_passages(texts).await
    }

    async fn embed_query(&self, query: &str) -> loci_embed::Result<Vec<f32>> {
        self.inner.embed_query(query).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn identity(&self) -> ProviderIdentity {
        self.inner.identity()
    }
}

#[tokio::test]
async fn concurrent_jobs_on_one_container_report_busy() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    std::fs::write(tree.path().join("slow.md"), "document under a slow provider").unwrap();

    let store = Arc::new(Store::open(data.path()).await.unwrap());
    let container = Arc::new(open_container(&store).await);
    let indexer = Arc::new(Indexer::new(EventBus::default()));

    let slow = SlowProvider {
        inner: HashEmbedProvider::new(DIM),
        delay: Duration::from_secs(2),
    };

    let first = {
        let indexer = Arc::clone(&indexer);
        let container = Arc::clone(&container);
        let tree = tree.path().to_path_buf();
        tokio::spawn(async move {
            indexer
                .index_root(
                    "Default",
                    &container,
                    &slow,
                    &IndexingOptions::default(),
                    &tree,
                    None,
                )
                .await
        })
    };

    // Give the first job time to take the slot and park in embedding.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let provider = HashEmbedProvider::new(DIM);
    let target = tree.path().join("slow.md");
    let second = indexer
        .index_single(
            "Default",
            &container,
            &provider,
            &IndexingOptions::default(),
            &target,
        )
        .await;
    assert!(matches!(second, Err(RetrieverError::Busy(_))));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.files_indexed, 1);
}

#[tokio::test]
async fn index_single_skips_unchanged_files() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    let file = tree.path().join("note.md");
    std::fs::write(&file, "a stable file").unwrap();

    let store = Store::open(data.path()).await.unwrap();
    let container = open_container(&store).await;
    let provider = HashEmbedProvider::new(DIM);
    let indexer = Indexer::new(EventBus::default());
    let options = IndexingOptions::default();

    let wrote = indexer
        .index_single("Default", &container, &provider, &options, &file)
        .await
        .unwrap();
    assert!(wrote);

    let wrote_again = indexer
        .index_single("Default", &container, &provider, &options, &file)
        .await
        .unwrap();
    assert!(!wrote_again, "unchanged mtime should be a no-op");
}
