//! SQLite-backed store: one fragment table, FTS5 shadow table, and
//! annotations table per container, plus the in-memory ANN indexes that are
//! rebuilt from the tables on open.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use loci_context::ChunkKind;
use loci_embed::ProviderIdentity;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use super::ann::AnnIndex;
use super::{AnnotationRecord, DenseHit, Fragment, FileRecord, FragmentFilter, LexicalHit};
use crate::error::RetrieverError;

/// Sidecar recording what a container's table was built with.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    identity: ProviderIdentity,
    roots: Vec<PathBuf>,
}

/// Shared database handle; containers open their tables through it.
pub struct Store {
    pool: SqlitePool,
    data_dir: PathBuf,
}

/// Container names become table names; anything outside `[A-Za-z0-9_]` is
/// hex-escaped so distinct names never collide.
pub fn table_name(container: &str) -> String {
    let sanitized: String = container
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_string()
            } else {
                format!("{:02x}", c as u32)
            }
        })
        .collect();
    format!("c_{sanitized}")
}

impl Store {
    pub async fn open(data_dir: &Path) -> Result<Self, RetrieverError> {
        std::fs::create_dir_all(data_dir)?;
        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("loci.db"))
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self {
            pool,
            data_dir: data_dir.to_path_buf(),
        })
    }

    fn sidecar_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{table}.meta.json"))
    }

    /// Open (creating if needed) the container's tables and rebuild its ANN
    /// indexes from the stored rows.
    ///
    /// A surviving sidecar with a different vector dimension means the caller
    /// asked for a rebuild: the old tables are dropped first.
    pub async fn open_container(
        &self,
        container: &str,
        identity: &ProviderIdentity,
        roots: &[PathBuf],
    ) -> Result<ContainerStore, RetrieverError> {
        let table = table_name(container);
        let sidecar_path = self.sidecar_path(&table);

        if sidecar_path.exists() {
            let content = std::fs::read_to_string(&sidecar_path).unwrap_or_default();
            if let Ok(sidecar) = serde_json::from_str::<Sidecar>(&content) {
                if sidecar.identity.dimension != 0
                    && sidecar.identity.dimension != identity.dimension
                {
                    warn!(
                        "container '{container}' dimension changed ({} -> {}), rebuilding",
                        sidecar.identity.dimension, identity.dimension
                    );
                    self.drop_container(container).await?;
                }
            }
        }

        create_tables(&self.pool, &table).await?;

        let sidecar = Sidecar {
            identity: identity.clone(),
            roots: roots.to_vec(),
        };
        std::fs::write(
            &sidecar_path,
            serde_json::to_string_pretty(&sidecar)
                .map_err(|e| RetrieverError::StoreFailure(e.to_string()))?,
        )?;

        let store = ContainerStore {
            pool: self.pool.clone(),
            fts_table: format!("{table}_fts"),
            annotations_table: format!("{table}_annotations"),
            table,
            dimension: identity.dimension,
            ann: Mutex::new(AnnIndex::new(identity.dimension)),
            note_ann: Mutex::new(AnnIndex::new(identity.dimension)),
        };
        store.rebuild_ann_indexes().await?;
        Ok(store)
    }

    /// Drop the container's backing tables and sidecar. Nothing derived from
    /// the container survives.
    pub async fn drop_container(&self, container: &str) -> Result<(), RetrieverError> {
        let table = table_name(container);
        for name in [
            format!("{table}_fts"),
            format!("{table}_annotations"),
            table.clone(),
        ] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
                .execute(&self.pool)
                .await?;
        }
        let _ = std::fs::remove_file(self.sidecar_path(&table));
        info!("dropped container '{container}'");
        Ok(())
    }

    /// Whether the container has a backing table at all.
    pub async fn container_exists(&self, container: &str) -> Result<bool, RetrieverError> {
        let table = table_name(container);
        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(&table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// All user table names; used by invariant tests.
    pub async fn all_table_names(&self) -> Result<Vec<String>, RetrieverError> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }
}

async fn create_tables(pool: &SqlitePool, table: &str) -> Result<(), RetrieverError> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            fragment_id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            offset_start INTEGER NOT NULL,
            offset_end INTEGER NOT NULL,
            text TEXT NOT NULL,
            vector BLOB NOT NULL,
            chunk_kind TEXT NOT NULL,
            language TEXT,
            mtime INTEGER NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_path ON {table}(path)"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_mtime ON {table}(mtime)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {table}_fts USING fts5(fragment_id UNINDEXED, path UNINDEXED, ordinal UNINDEXED, text)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table}_annotations (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            note TEXT NOT NULL,
            source TEXT NOT NULL,
            vector BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(vector).to_vec()
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// LIKE patterns for a filter, rendered as SQL predicates ahead of a LIMIT.
fn filter_clause(filter: &FragmentFilter<'_>, column: &str) -> (String, Vec<String>) {
    let mut clause = String::new();
    let mut binds = Vec::new();

    if let Some(prefix) = filter.path_prefix {
        clause.push_str(&format!(" AND {column} LIKE ? ESCAPE '\\'"));
        binds.push(format!("{}%", escape_like(prefix)));
    }
    if let Some(extensions) = filter.extensions {
        if !extensions.is_empty() {
            let alternatives = extensions
                .iter()
                .map(|_| format!("{column} LIKE ? ESCAPE '\\'"))
                .collect::<Vec<_>>()
                .join(" OR ");
            clause.push_str(&format!(" AND ({alternatives})"));
            for ext in extensions {
                binds.push(format!("%.{}", escape_like(ext.trim_start_matches('.'))));
            }
        }
    }
    (clause, binds)
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(blob)
}

/// One container's open tables plus its ANN indexes.
pub struct ContainerStore {
    pool: SqlitePool,
    table: String,
    fts_table: String,
    annotations_table: String,
    dimension: usize,
    ann: Mutex<AnnIndex>,
    note_ann: Mutex<AnnIndex>,
}

impl ContainerStore {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn rebuild_ann_indexes(&self) -> Result<(), RetrieverError> {
        let rows = sqlx::query(&format!("SELECT fragment_id, vector FROM {}", self.table))
            .fetch_all(&self.pool)
            .await?;
        {
            let mut ann = self.ann.lock().unwrap();
            for row in &rows {
                let id: String = row.get("fragment_id");
                let vector = blob_to_vector(&row.get::<Vec<u8>, _>("vector"));
                if vector.len() == self.dimension {
                    ann.insert(&id, vector)?;
                } else {
                    warn!("fragment {id} has stale dimension {}, skipping", vector.len());
                }
            }
        }

        let notes = sqlx::query(&format!("SELECT id, vector FROM {}", self.annotations_table))
            .fetch_all(&self.pool)
            .await?;
        {
            let mut note_ann = self.note_ann.lock().unwrap();
            for row in &notes {
                let id: String = row.get("id");
                let vector = blob_to_vector(&row.get::<Vec<u8>, _>("vector"));
                if vector.len() == self.dimension {
                    note_ann.insert(&id, vector)?;
                }
            }
        }

        debug!(
            "rebuilt ANN for {}: {} fragments, {} annotations",
            self.table,
            rows.len(),
            notes.len()
        );
        Ok(())
    }

    /// Insert or replace fragments by identifier. The table, the FTS shadow,
    /// and the ANN index are updated together; the SQL side commits in one
    /// transaction.
    pub async fn upsert_fragments(&self, fragments: &[Fragment]) -> Result<(), RetrieverError> {
        for fragment in fragments {
            if fragment.vector.len() != self.dimension {
                return Err(RetrieverError::ProviderMismatch {
                    expected: self.dimension,
                    actual: fragment.vector.len(),
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        for fragment in fragments {
            sqlx::query(&format!(
                r#"
                INSERT OR REPLACE INTO {}
                    (fragment_id, path, ordinal, offset_start, offset_end, text, vector, chunk_kind, language, mtime)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                self.table
            ))
            .bind(&fragment.id)
            .bind(&fragment.path)
            .bind(fragment.ordinal)
            .bind(fragment.offset_start)
            .bind(fragment.offset_end)
            .bind(&fragment.text)
            .bind(vector_to_blob(&fragment.vector))
            .bind(fragment.kind.as_str())
            .bind(&fragment.language)
            .bind(fragment.mtime)
            .execute(&mut *tx)
            .await?;

            sqlx::query(&format!(
                "DELETE FROM {} WHERE fragment_id = ?1",
                self.fts_table
            ))
            .bind(&fragment.id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(&format!(
                "INSERT INTO {} (fragment_id, path, ordinal, text) VALUES (?1, ?2, ?3, ?4)",
                self.fts_table
            ))
            .bind(&fragment.id)
            .bind(&fragment.path)
            .bind(fragment.ordinal)
            .bind(&fragment.text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let mut ann = self.ann.lock().unwrap();
        for fragment in fragments {
            ann.insert(&fragment.id, fragment.vector.clone())?;
        }
        Ok(())
    }

    /// Atomically replace every fragment owned by `path` with a new set.
    ///
    /// Old rows and new rows swap in one transaction, so no reader observes a
    /// partially updated file.
    pub async fn replace_file_fragments(
        &self,
        path: &str,
        fragments: &[Fragment],
    ) -> Result<(), RetrieverError> {
        for fragment in fragments {
            if fragment.vector.len() != self.dimension {
                return Err(RetrieverError::ProviderMismatch {
                    expected: self.dimension,
                    actual: fragment.vector.len(),
                });
            }
        }

        let old_ids: Vec<String> =
            sqlx::query(&format!("SELECT fragment_id FROM {} WHERE path = ?1", self.table))
                .bind(path)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|r| r.get("fragment_id"))
                .collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {} WHERE path = ?1", self.table))
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM {} WHERE path = ?1", self.fts_table))
            .bind(path)
            .execute(&mut *tx)
            .await?;
        for fragment in fragments {
            sqlx::query(&format!(
                r#"
                INSERT INTO {}
                    (fragment_id, path, ordinal, offset_start, offset_end, text, vector, chunk_kind, language, mtime)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                self.table
            ))
            .bind(&fragment.id)
            .bind(&fragment.path)
            .bind(fragment.ordinal)
            .bind(fragment.offset_start)
            .bind(fragment.offset_end)
            .bind(&fragment.text)
            .bind(vector_to_blob(&fragment.vector))
            .bind(fragment.kind.as_str())
            .bind(&fragment.language)
            .bind(fragment.mtime)
            .execute(&mut *tx)
            .await?;
            sqlx::query(&format!(
                "INSERT INTO {} (fragment_id, path, ordinal, text) VALUES (?1, ?2, ?3, ?4)",
                self.fts_table
            ))
            .bind(&fragment.id)
            .bind(&fragment.path)
            .bind(fragment.ordinal)
            .bind(&fragment.text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let mut ann = self.ann.lock().unwrap();
        for id in &old_ids {
            ann.remove(id);
        }
        for fragment in fragments {
            ann.insert(&fragment.id, fragment.vector.clone())?;
        }
        Ok(())
    }

    /// Remove every fragment owned by `path`. Idempotent.
    pub async fn delete_by_path(&self, path: &str) -> Result<usize, RetrieverError> {
        let ids: Vec<String> =
            sqlx::query(&format!("SELECT fragment_id FROM {} WHERE path = ?1", self.table))
                .bind(path)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|r| r.get("fragment_id"))
                .collect();

        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(&format!("DELETE FROM {} WHERE path = ?1", self.table))
            .bind(path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(&format!("DELETE FROM {} WHERE path = ?1", self.fts_table))
            .bind(path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut ann = self.ann.lock().unwrap();
        for id in &ids {
            ann.remove(id);
        }
        Ok(deleted as usize)
    }

    /// k nearest fragments by cosine similarity, best first.
    ///
    /// The filter is applied before the window is cut: a constrained search
    /// widens its fetch until k matching fragments have been found or the
    /// whole index has been seen, so a filtered query is never starved by
    /// non-matching near neighbours.
    pub async fn ann_search(
        &self,
        query: &[f32],
        k: usize,
        filter: &FragmentFilter<'_>,
    ) -> Result<Vec<DenseHit>, RetrieverError> {
        let mut fetch_k = if filter.is_empty() { k } else { k * 4 };

        loop {
            let (hits, exhausted) = {
                let mut ann = self.ann.lock().unwrap();
                let live = ann.len();
                let hits = ann.search(query, fetch_k)?;
                (hits, fetch_k >= live)
            };

            let mut matching: Vec<DenseHit> = self
                .dense_hits_for(hits)
                .await?
                .into_iter()
                .filter(|hit| filter.matches(&hit.path))
                .collect();

            if matching.len() >= k || exhausted {
                matching.truncate(k);
                return Ok(matching);
            }
            fetch_k *= 4;
        }
    }

    /// Resolve raw ANN hits to rows, preserving the similarity order.
    async fn dense_hits_for(
        &self,
        hits: Vec<(String, f32)>,
    ) -> Result<Vec<DenseHit>, RetrieverError> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=hits.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut query_builder = sqlx::query(&format!(
            "SELECT fragment_id, path, ordinal, text FROM {} WHERE fragment_id IN ({placeholders})",
            self.table
        ));
        for (id, _) in &hits {
            query_builder = query_builder.bind(id.clone());
        }
        let rows = query_builder.fetch_all(&self.pool).await?;

        let mut by_id: HashMap<String, (String, i64, String)> = rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>("fragment_id"),
                    (
                        row.get::<String, _>("path"),
                        row.get::<i64, _>("ordinal"),
                        row.get::<String, _>("text"),
                    ),
                )
            })
            .collect();

        Ok(hits
            .into_iter()
            .filter_map(|(id, similarity)| {
                by_id.remove(&id).map(|(path, ordinal, text)| DenseHit {
                    fragment_id: id,
                    path,
                    ordinal,
                    text,
                    similarity,
                })
            })
            .collect())
    }

    /// k best fragments by BM25 for an FTS5 match expression, best first.
    ///
    /// Filter predicates join the WHERE clause ahead of the LIMIT, so the
    /// returned window is drawn from matching paths only.
    pub async fn fts_search(
        &self,
        match_expr: &str,
        k: usize,
        filter: &FragmentFilter<'_>,
    ) -> Result<Vec<LexicalHit>, RetrieverError> {
        let (clause, binds) = filter_clause(filter, "path");
        let sql = format!(
            "SELECT fragment_id, path, ordinal, text, bm25({fts}) AS rank
             FROM {fts} WHERE {fts} MATCH ?{clause} ORDER BY rank LIMIT ?",
            fts = self.fts_table
        );

        let mut query_builder = sqlx::query(&sql).bind(match_expr);
        for pattern in &binds {
            query_builder = query_builder.bind(pattern);
        }
        let rows = query_builder
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| LexicalHit {
                fragment_id: row.get("fragment_id"),
                path: row.get("path"),
                ordinal: row.get("ordinal"),
                text: row.get("text"),
                score: -row.get::<f64, _>("rank") as f32,
            })
            .collect())
    }

    /// (path, newest mtime) for every indexed file.
    pub async fn scan_file_records(&self) -> Result<Vec<FileRecord>, RetrieverError> {
        let rows = sqlx::query(&format!(
            "SELECT path, MAX(mtime) AS mtime FROM {} GROUP BY path ORDER BY path",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| FileRecord {
                path: row.get("path"),
                mtime: row.get("mtime"),
            })
            .collect())
    }

    pub async fn file_mtime(&self, path: &str) -> Result<Option<i64>, RetrieverError> {
        let row = sqlx::query(&format!(
            "SELECT MAX(mtime) AS mtime FROM {} WHERE path = ?1",
            self.table
        ))
        .bind(path)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<Option<i64>, _>("mtime"))
    }

    pub async fn count_fragments(&self) -> Result<usize, RetrieverError> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    pub async fn count_files(&self) -> Result<usize, RetrieverError> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(DISTINCT path) AS n FROM {}",
            self.table
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    /// Sorted, deduplicated paths, optionally filtered.
    pub async fn list_paths(
        &self,
        filter: &FragmentFilter<'_>,
    ) -> Result<Vec<String>, RetrieverError> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT path FROM {} ORDER BY path",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("path"))
            .filter(|p| filter.matches(p))
            .collect())
    }

    /// Files whose newest fragment mtime is at or after `cutoff`.
    pub async fn changed_since(&self, cutoff: i64) -> Result<Vec<FileRecord>, RetrieverError> {
        let rows = sqlx::query(&format!(
            "SELECT path, MAX(mtime) AS mtime FROM {} GROUP BY path HAVING MAX(mtime) >= ?1 ORDER BY path",
            self.table
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| FileRecord {
                path: row.get("path"),
                mtime: row.get("mtime"),
            })
            .collect())
    }

    /// All fragments for a file in ordinal order, vectors included.
    pub async fn fragments_for_path(&self, path: &str) -> Result<Vec<Fragment>, RetrieverError> {
        let rows = sqlx::query(&format!(
            "SELECT fragment_id, path, ordinal, offset_start, offset_end, text, vector, chunk_kind, language, mtime
             FROM {} WHERE path = ?1 ORDER BY ordinal",
            self.table
        ))
        .bind(path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Fragment {
                id: row.get("fragment_id"),
                path: row.get("path"),
                ordinal: row.get("ordinal"),
                offset_start: row.get("offset_start"),
                offset_end: row.get("offset_end"),
                text: row.get("text"),
                vector: blob_to_vector(&row.get::<Vec<u8>, _>("vector")),
                kind: ChunkKind::parse(&row.get::<String, _>("chunk_kind"))
                    .unwrap_or(ChunkKind::Doc),
                language: row.get("language"),
                mtime: row.get("mtime"),
            })
            .collect())
    }

    /// Store a note with its embedding.
    pub async fn add_annotation(
        &self,
        record: &AnnotationRecord,
        vector: &[f32],
    ) -> Result<(), RetrieverError> {
        if vector.len() != self.dimension {
            return Err(RetrieverError::ProviderMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {} (id, path, note, source, vector, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            self.annotations_table
        ))
        .bind(&record.id)
        .bind(&record.path)
        .bind(&record.note)
        .bind(&record.source)
        .bind(vector_to_blob(vector))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        self.note_ann.lock().unwrap().insert(&record.id, vector.to_vec())?;
        Ok(())
    }

    pub async fn delete_annotation(&self, id: &str) -> Result<(), RetrieverError> {
        let deleted = sqlx::query(&format!(
            "DELETE FROM {} WHERE id = ?1",
            self.annotations_table
        ))
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if deleted == 0 {
            return Err(RetrieverError::NotFound(format!("annotation {id}")));
        }
        self.note_ann.lock().unwrap().remove(id);
        Ok(())
    }

    /// Annotations, newest first, optionally scoped to one path.
    pub async fn list_annotations(
        &self,
        path: Option<&str>,
    ) -> Result<Vec<AnnotationRecord>, RetrieverError> {
        let rows = match path {
            Some(path) => {
                sqlx::query(&format!(
                    "SELECT id, path, note, source, created_at FROM {} WHERE path = ?1 ORDER BY created_at DESC",
                    self.annotations_table
                ))
                .bind(path)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT id, path, note, source, created_at FROM {} ORDER BY created_at DESC",
                    self.annotations_table
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| AnnotationRecord {
                id: row.get("id"),
                path: row.get("path"),
                note: row.get("note"),
                source: row.get("source"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Dense search over annotation vectors.
    pub async fn search_annotations(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(AnnotationRecord, f32)>, RetrieverError> {
        let hits = {
            let mut note_ann = self.note_ann.lock().unwrap();
            note_ann.search(query, k)?
        };
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(hits.len());
        for (id, similarity) in hits {
            let row = sqlx::query(&format!(
                "SELECT id, path, note, source, created_at FROM {} WHERE id = ?1",
                self.annotations_table
            ))
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                results.push((
                    AnnotationRecord {
                        id: row.get("id"),
                        path: row.get("path"),
                        note: row.get("note"),
                        source: row.get("source"),
                        created_at: row.get("created_at"),
                    },
                    similarity,
                ));
            }
        }
        Ok(results)
    }
}
