use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domains::schema::{SchemaDescription, TableInfo};
use crate::error::{Result, TableTalkError};
use crate::interfaces::providers::LlmProvider;

const VECTORS_FILE: &str = "vectors.bin";
const TEXTS_FILE: &str = "texts.json";
const TABLES_FILE: &str = "tables.json";

/// Fraction-of-work callback for index rebuilds. Reported values are
/// monotonically increasing and end at 1.0.
pub type ProgressCallback = Box<dyn Fn(f32) + Send + Sync>;

/// Per-table metadata stored alongside each vector. `info` is the full
/// normalized table description so the staleness fingerprint can be
/// recomputed from persisted state alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table: String,
    pub columns: Vec<String>,
    pub info: TableInfo,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub text: String,
    pub metadata: TableMetadata,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct TableHit {
    pub table: String,
    pub score: f32,
    pub description: String,
}

/// The three parallel arrays. Array position is the join key; the arrays are
/// only ever replaced together.
#[derive(Debug, Default)]
struct IndexRecords {
    texts: Vec<String>,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<TableMetadata>,
}

/// Semantic index over one schema namespace: one L2-normalized vector per
/// table, persisted as a vector/text/metadata trio under `dir`.
pub struct SchemaIndex {
    dir: PathBuf,
    embedder: Arc<dyn LlmProvider>,
    model: Option<String>,
    fallback_model: Option<String>,
    records: RwLock<IndexRecords>,
}

impl SchemaIndex {
    /// Open the index for a schema namespace, loading any persisted arrays.
    /// Unreadable or inconsistent files are treated as no index at all.
    pub fn open(
        dir: impl Into<PathBuf>,
        embedder: Arc<dyn LlmProvider>,
        model: Option<String>,
        fallback_model: Option<String>,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
        let records = load_records(&dir).unwrap_or_default();
        Ok(Self {
            dir,
            embedder,
            model,
            fallback_model,
            records: RwLock::new(records),
        })
    }

    /// Whether a persisted index exists for this namespace.
    pub fn exists(&self) -> bool {
        [VECTORS_FILE, TEXTS_FILE, TABLES_FILE]
            .iter()
            .all(|name| self.dir.join(name).exists())
    }

    /// Rebuild the index from a schema snapshot: synthesize one description
    /// per table, embed them in one batch, normalize, then replace and
    /// persist the trio as a unit.
    pub async fn build(
        &self,
        schema: &SchemaDescription,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let table_count = schema.tables.len();
        let total_steps = (table_count + 2) as f32;
        let report = |step: usize| {
            if let Some(callback) = progress {
                callback((step as f32 / total_steps).min(1.0));
            }
        };

        let mut texts = Vec::with_capacity(table_count);
        let mut metadata = Vec::with_capacity(table_count);
        for (i, table) in schema.tables.iter().enumerate() {
            texts.push(table.embedding_text());
            metadata.push(TableMetadata {
                table: table.name.clone(),
                columns: table.column_summaries(),
                info: table.clone(),
            });
            report(i + 1);
        }

        let mut vectors = self.embed_batch(texts.clone()).await?;
        for vector in &mut vectors {
            l2_normalize(vector);
        }
        report(table_count + 1);

        let new_records = IndexRecords {
            texts,
            vectors,
            metadata,
        };
        self.persist(&new_records)?;
        let mut guard = self.records.write().await;
        *guard = new_records;
        if let Some(callback) = progress {
            callback(1.0);
        }
        info!(tables = table_count, dir = %self.dir.display(), "schema index rebuilt");
        Ok(())
    }

    /// Exact-equality staleness check between the given schema and the
    /// schema implied by the stored metadata. Any difference, however small,
    /// means the whole index must be rebuilt.
    pub async fn is_stale(&self, schema: &SchemaDescription) -> Result<bool> {
        if !self.exists() {
            return Ok(true);
        }
        let guard = self.records.read().await;
        let stored = SchemaDescription {
            tables: guard.metadata.iter().map(|m| m.info.clone()).collect(),
        };
        Ok(stored.fingerprint()? != schema.fingerprint()?)
    }

    /// Cosine similarity search over all stored vectors. Both sides are
    /// pre-normalized, so the score is a plain dot product. Ties keep the
    /// original array order; results below `threshold` are discarded.
    pub async fn search(&self, query: &str, k: usize, threshold: f32) -> Result<Vec<SearchHit>> {
        let guard = self.records.read().await;
        if guard.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_vectors = self.embed_batch(vec![query.to_string()]).await?;
        let mut query_vector = query_vectors
            .pop()
            .ok_or_else(|| TableTalkError::Embedding("no embedding for query".to_string()))?;
        l2_normalize(&mut query_vector);

        let mut scored: Vec<(usize, f32)> = guard
            .vectors
            .iter()
            .map(|vector| dot(&query_vector, vector))
            .enumerate()
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let hits = scored
            .into_iter()
            .take(k)
            .filter(|(_, score)| *score >= threshold)
            .map(|(i, score)| SearchHit {
                text: guard.texts[i].clone(),
                metadata: guard.metadata[i].clone(),
                score,
            })
            .collect();
        Ok(hits)
    }

    /// Table-level view of `search`: every record is scored, hits are
    /// grouped by table keeping the maximum score, and tables come back in
    /// descending score order.
    pub async fn table_search(&self, query: &str, min_score: f32) -> Result<Vec<TableHit>> {
        let record_count = self.records.read().await.vectors.len();
        let hits = self.search(query, record_count, min_score).await?;

        let mut tables: Vec<TableHit> = Vec::new();
        for hit in hits {
            if tables.iter().any(|t| t.table == hit.metadata.table) {
                continue;
            }
            tables.push(TableHit {
                table: hit.metadata.table.clone(),
                score: hit.score,
                description: hit.text,
            });
        }
        Ok(tables)
    }

    /// Drop the persisted trio and the in-memory arrays (schema teardown).
    pub async fn delete(&self) -> Result<()> {
        for name in [VECTORS_FILE, TEXTS_FILE, TABLES_FILE] {
            let path = self.dir.join(name);
            if path.exists() {
                fs::remove_file(&path).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
            }
        }
        let mut guard = self.records.write().await;
        *guard = IndexRecords::default();
        Ok(())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let vectors = match self.embedder.embed(texts.clone(), self.model.as_deref()).await {
            Ok(vectors) => vectors,
            Err(primary_err) => match self.fallback_model.as_deref() {
                Some(fallback) => {
                    warn!(
                        error = %primary_err,
                        fallback,
                        "primary embedding model failed, retrying with fallback"
                    );
                    self.embedder
                        .embed(texts, Some(fallback))
                        .await
                        .map_err(|e| TableTalkError::Embedding(e.to_string()))?
                }
                None => return Err(TableTalkError::Embedding(primary_err.to_string())),
            },
        };
        if vectors.len() != expected {
            return Err(TableTalkError::Embedding(format!(
                "embedding count mismatch: expected {expected}, got {}",
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn persist(&self, records: &IndexRecords) -> Result<()> {
        let vectors =
            bincode::serialize(&records.vectors).map_err(|e| TableTalkError::Serialization(e.to_string()))?;
        let texts = serde_json::to_vec_pretty(&records.texts)
            .map_err(|e| TableTalkError::Serialization(e.to_string()))?;
        let metadata = serde_json::to_vec_pretty(&records.metadata)
            .map_err(|e| TableTalkError::Serialization(e.to_string()))?;

        write_atomic(&self.dir.join(VECTORS_FILE), &vectors)?;
        write_atomic(&self.dir.join(TEXTS_FILE), &texts)?;
        write_atomic(&self.dir.join(TABLES_FILE), &metadata)?;
        Ok(())
    }
}

fn load_records(dir: &Path) -> Option<IndexRecords> {
    let vectors_path = dir.join(VECTORS_FILE);
    let texts_path = dir.join(TEXTS_FILE);
    let tables_path = dir.join(TABLES_FILE);
    if !vectors_path.exists() || !texts_path.exists() || !tables_path.exists() {
        return None;
    }

    let result = (|| -> Result<IndexRecords> {
        let vectors: Vec<Vec<f32>> = bincode::deserialize(
            &fs::read(&vectors_path).map_err(|e| TableTalkError::Runtime(e.to_string()))?,
        )
        .map_err(|e| TableTalkError::Serialization(e.to_string()))?;
        let texts: Vec<String> = serde_json::from_slice(
            &fs::read(&texts_path).map_err(|e| TableTalkError::Runtime(e.to_string()))?,
        )
        .map_err(|e| TableTalkError::Serialization(e.to_string()))?;
        let metadata: Vec<TableMetadata> = serde_json::from_slice(
            &fs::read(&tables_path).map_err(|e| TableTalkError::Runtime(e.to_string()))?,
        )
        .map_err(|e| TableTalkError::Serialization(e.to_string()))?;

        if texts.len() != vectors.len() || texts.len() != metadata.len() {
            return Err(TableTalkError::Runtime(format!(
                "index arrays out of alignment: {} texts, {} vectors, {} metadata",
                texts.len(),
                vectors.len(),
                metadata.len()
            )));
        }
        Ok(IndexRecords {
            texts,
            vectors,
            metadata,
        })
    })();

    match result {
        Ok(records) => {
            debug!(records = records.texts.len(), "loaded persisted schema index");
            Some(records)
        }
        Err(e) => {
            warn!(error = %e, "persisted schema index unreadable, treating as absent");
            None
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
    Ok(())
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
