//! Store-level invariants: membership agreement between the vector and FTS
//! indexes, idempotent upserts and deletes, and clean container teardown.

use loci_context::ChunkKind;
use loci_embed::ProviderIdentity;
use loci_retriever::storage::{fragment_id, AnnotationRecord, Fragment, FragmentFilter, Store};

const DIM: usize = 8;

fn identity() -> ProviderIdentity {
    ProviderIdentity::local("hash-test", DIM)
}

fn unit_vector(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

fn fragment(path: &str, ordinal: i64, text: &str, seed: usize) -> Fragment {
    Fragment {
        id: fragment_id(path, ordinal),
        path: path.to_string(),
        ordinal,
        offset_start: 0,
        offset_end: text.len() as i64,
        text: text.to_string(),
        vector: unit_vector(seed),
        kind: ChunkKind::Doc,
        language: Some("txt".to_string()),
        mtime: 1_700_000_000,
    }
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    let fragments = vec![
        fragment("/a.txt", 0, "alpha body", 0),
        fragment("/a.txt", 1, "beta body", 1),
    ];
    container.upsert_fragments(&fragments).await.unwrap();
    container.upsert_fragments(&fragments).await.unwrap();

    assert_eq!(container.count_fragments().await.unwrap(), 2);
    assert_eq!(container.count_files().await.unwrap(), 1);

    // FTS agrees on membership
    let hits = container.fts_search("\"alpha\"", 10, &FragmentFilter::default()).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/a.txt");

    // ANN agrees too
    let dense = container.ann_search(&unit_vector(0), 10, &FragmentFilter::default()).await.unwrap();
    assert_eq!(dense.len(), 2);
}

#[tokio::test]
async fn delete_by_path_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    container
        .upsert_fragments(&[
            fragment("/a.txt", 0, "alpha content", 0),
            fragment("/b.txt", 0, "bravo content", 1),
        ])
        .await
        .unwrap();

    assert_eq!(container.delete_by_path("/a.txt").await.unwrap(), 1);
    assert_eq!(container.delete_by_path("/a.txt").await.unwrap(), 0);

    assert_eq!(container.count_files().await.unwrap(), 1);
    assert!(container
        .fts_search("\"alpha\"", 10, &FragmentFilter::default())
        .await
        .unwrap()
        .is_empty());
    let dense = container.ann_search(&unit_vector(0), 10, &FragmentFilter::default()).await.unwrap();
    assert!(dense.iter().all(|h| h.path != "/a.txt"));
}

#[tokio::test]
async fn replace_swaps_file_fragments_completely() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    container
        .upsert_fragments(&[
            fragment("/a.txt", 0, "old first", 0),
            fragment("/a.txt", 1, "old second", 1),
            fragment("/a.txt", 2, "old third", 2),
        ])
        .await
        .unwrap();

    let replacement = vec![fragment("/a.txt", 0, "new only", 3)];
    container
        .replace_file_fragments("/a.txt", &replacement)
        .await
        .unwrap();

    let fragments = container.fragments_for_path("/a.txt").await.unwrap();
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].text, "new only");
    assert!(container
        .fts_search("\"old\"", 10, &FragmentFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        container
            .fts_search("\"new\"", 10, &FragmentFilter::default())
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn scan_file_records_reports_newest_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    let mut early = fragment("/a.txt", 0, "one", 0);
    early.mtime = 100;
    let mut late = fragment("/a.txt", 1, "two", 1);
    late.mtime = 200;
    container.upsert_fragments(&[early, late]).await.unwrap();

    let records = container.scan_file_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].mtime, 200);
}

#[tokio::test]
async fn dimension_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    let mut bad = fragment("/a.txt", 0, "short vector", 0);
    bad.vector = vec![1.0, 0.0];
    let err = container.upsert_fragments(&[bad]).await.unwrap_err();
    assert!(matches!(
        err,
        loci_retriever::RetrieverError::ProviderMismatch { expected: 8, actual: 2 }
    ));
}

#[tokio::test]
async fn drop_container_leaves_no_tables_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Scratch", &identity(), &[])
        .await
        .unwrap();
    container
        .upsert_fragments(&[fragment("/a.txt", 0, "content", 0)])
        .await
        .unwrap();
    container
        .add_annotation(
            &AnnotationRecord {
                id: "ann_1".into(),
                path: "/a.txt".into(),
                note: "note".into(),
                source: "user".into(),
                created_at: 0,
            },
            &unit_vector(5),
        )
        .await
        .unwrap();
    drop(container);

    assert!(store.container_exists("Scratch").await.unwrap());
    store.drop_container("Scratch").await.unwrap();
    assert!(!store.container_exists("Scratch").await.unwrap());

    let tables = store.all_table_names().await.unwrap();
    assert!(tables.iter().all(|t| !t.contains("Scratch")));
}

#[tokio::test]
async fn reopening_rebuilds_the_ann_index() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(dir.path()).await.unwrap();
        let container = store
            .open_container("Default", &identity(), &[])
            .await
            .unwrap();
        container
            .upsert_fragments(&[fragment("/a.txt", 0, "persisted", 0)])
            .await
            .unwrap();
    }

    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();
    let hits = container
        .ann_search(&unit_vector(0), 5, &FragmentFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/a.txt");
}

#[tokio::test]
async fn dimension_change_on_open_rebuilds_the_container() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    {
        let container = store
            .open_container("Default", &identity(), &[])
            .await
            .unwrap();
        container
            .upsert_fragments(&[fragment("/a.txt", 0, "old world", 0)])
            .await
            .unwrap();
    }

    let wider = ProviderIdentity::local("hash-test", 16);
    let container = store.open_container("Default", &wider, &[]).await.unwrap();
    assert_eq!(container.count_fragments().await.unwrap(), 0);
    assert_eq!(container.dimension(), 16);
}

#[tokio::test]
async fn annotations_round_trip_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    let record = AnnotationRecord {
        id: "ann_42".into(),
        path: "/project/main.rs".into(),
        note: "entry point, be careful".into(),
        source: "agent".into(),
        created_at: 1_700_000_123,
    };
    container
        .add_annotation(&record, &unit_vector(3))
        .await
        .unwrap();

    let all = container.list_annotations(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "ann_42");

    let scoped = container
        .list_annotations(Some("/project/main.rs"))
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);

    let hits = container
        .search_annotations(&unit_vector(3), 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].1 > 0.95);

    container.delete_annotation("ann_42").await.unwrap();
    let err = container.delete_annotation("ann_42").await.unwrap_err();
    assert!(matches!(err, loci_retriever::RetrieverError::NotFound(_)));
    assert!(container.list_annotations(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn annotations_survive_file_deletion() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    container
        .upsert_fragments(&[fragment("/a.txt", 0, "body", 0)])
        .await
        .unwrap();
    container
        .add_annotation(
            &AnnotationRecord {
                id: "ann_1".into(),
                path: "/a.txt".into(),
                note: "still here".into(),
                source: "user".into(),
                created_at: 0,
            },
            &unit_vector(2),
        )
        .await
        .unwrap();

    container.delete_by_path("/a.txt").await.unwrap();
    let notes = container.list_annotations(Some("/a.txt")).await.unwrap();
    assert_eq!(notes.len(), 1);
}

#[tokio::test]
async fn filtered_dense_search_widens_past_closer_non_matches() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    // Eight exact matches under /a dominate the unfiltered window; the only
    // /b fragment is strictly farther from the query.
    let mut fragments = Vec::new();
    for i in 0..8 {
        fragments.push(fragment(&format!("/a/file{i}.txt"), 0, "near duplicate", 0));
    }
    let mut farther = fragment("/b/target.md", 0, "the one that matters", 0);
    farther.vector = vec![0.0; DIM];
    farther.vector[0] = 0.8;
    farther.vector[1] = 0.6;
    fragments.push(farther);
    container.upsert_fragments(&fragments).await.unwrap();

    let filter = FragmentFilter::new(Some("/b"), None);
    let hits = container
        .ann_search(&unit_vector(0), 2, &filter)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/b/target.md");

    // and the unfiltered window is unchanged by the widening logic
    let unfiltered = container
        .ann_search(&unit_vector(0), 2, &FragmentFilter::default())
        .await
        .unwrap();
    assert_eq!(unfiltered.len(), 2);
    assert!(unfiltered.iter().all(|h| h.path.starts_with("/a/")));
}

#[tokio::test]
async fn filtered_fts_window_is_cut_after_the_predicate() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    // Stronger BM25 matches under /a would fill a small unfiltered window.
    let mut fragments = Vec::new();
    for i in 0..8 {
        fragments.push(fragment(
            &format!("/a/noise{i}.txt"),
            0,
            "token token token token",
            i,
        ));
    }
    fragments.push(fragment(
        "/b/signal.md",
        0,
        "a single token in much longer surrounding filler text",
        8,
    ));
    container.upsert_fragments(&fragments).await.unwrap();

    let exts = vec!["md".to_string()];
    let filter = FragmentFilter::new(None, Some(&exts));
    let hits = container.fts_search("\"token\"", 2, &filter).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/b/signal.md");

    let by_prefix = FragmentFilter::new(Some("/b/"), None);
    let hits = container
        .fts_search("\"token\"", 2, &by_prefix)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/b/signal.md");
}

#[tokio::test]
async fn fts_ranks_stronger_matches_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let container = store
        .open_container("Default", &identity(), &[])
        .await
        .unwrap();

    container
        .upsert_fragments(&[
            fragment("/dense.txt", 0, "parser parser parser grammar", 0),
            fragment("/sparse.txt", 0, "a parser appears once in much longer filler text here", 1),
        ])
        .await
        .unwrap();

    let hits = container
        .fts_search("\"parser\"", 10, &FragmentFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].path, "/dense.txt");
    assert!(hits[0].score >= hits[1].score);
}
