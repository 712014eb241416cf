use crate::config::EmbeddingOptions;
use crate::embeddings::{embed_in_batches, Embedder, RetryPolicy};
use crate::error::{IndexError, SearchError};
use crate::models::{Chunk, DocumentRecord, DocumentUpdate, IndexedVector, RetrievedPassage};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default)]
struct IndexState {
    entries: Vec<IndexedVector>,
    documents: BTreeMap<String, DocumentRecord>,
}

impl IndexState {
    fn remove_document(&mut self, source_document: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.chunk.source_document != source_document);
        self.documents.remove(source_document);
        before - self.entries.len()
    }

    fn append(&mut self, entries: Vec<IndexedVector>) {
        let now = Utc::now();
        for entry in &entries {
            let record = self
                .documents
                .entry(entry.chunk.source_document.clone())
                .or_insert_with(|| DocumentRecord {
                    source_document: entry.chunk.source_document.clone(),
                    checksum: None,
                    chunk_count: 0,
                    ingested_at: now,
                });
            record.chunk_count += 1;
        }
        self.entries.extend(entries);
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    model_id: &'a str,
    dimensions: usize,
    documents: Vec<&'a DocumentRecord>,
    entries: &'a [IndexedVector],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    model_id: String,
    dimensions: usize,
    documents: Vec<DocumentRecord>,
    entries: Vec<IndexedVector>,
}

pub struct PersistentVectorIndex {
    embedder: Arc<dyn Embedder>,
    options: EmbeddingOptions,
    path: Option<PathBuf>,
    state: RwLock<IndexState>,
}

impl PersistentVectorIndex {
    pub fn in_memory(embedder: Arc<dyn Embedder>, options: EmbeddingOptions) -> Self {
        Self {
            embedder,
            options,
            path: None,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub async fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        options: EmbeddingOptions,
    ) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                validate_snapshot(&snapshot, embedder.as_ref())?;
                info!(
                    path = %path.display(),
                    entries = snapshot.entries.len(),
                    documents = snapshot.documents.len(),
                    "loaded vector index"
                );
                IndexState {
                    entries: snapshot.entries,
                    documents: snapshot
                        .documents
                        .into_iter()
                        .map(|record| (record.source_document.clone(), record))
                        .collect(),
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => IndexState::default(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            embedder,
            options,
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn documents(&self) -> Vec<DocumentRecord> {
        self.state.read().await.documents.values().cloned().collect()
    }

    pub async fn document(&self, source_document: &str) -> Option<DocumentRecord> {
        self.state.read().await.documents.get(source_document).cloned()
    }

    pub async fn entries(&self) -> Vec<IndexedVector> {
        self.state.read().await.entries.clone()
    }

    /// Removes the document's previous chunks and stores `update.chunks` in one commit.
    pub async fn replace_document(&self, update: DocumentUpdate) -> Result<usize, IndexError> {
        if let Some(stray) = update
            .chunks
            .iter()
            .find(|chunk| chunk.source_document != update.source_document)
        {
            return Err(IndexError::InvalidArgument(format!(
                "chunk from {} passed in update for {}",
                stray.source_document, update.source_document
            )));
        }

        let entries = self.embed_chunks(&update.chunks).await?;
        let written = entries.len();

        let mut state = self.state.write().await;
        let mut next = state.clone();
        let removed = next.remove_document(&update.source_document);
        next.append(entries);
        if let Some(record) = next.documents.get_mut(&update.source_document) {
            record.checksum = update.checksum.clone();
        }
        self.commit(&mut state, next).await?;

        info!(
            document = %update.source_document,
            removed,
            written,
            "replaced document in index"
        );
        Ok(written)
    }

    pub async fn reset(&self) -> Result<usize, IndexError> {
        let mut state = self.state.write().await;
        let removed = state.entries.len();
        self.commit(&mut state, IndexState::default()).await?;
        info!(removed, "vector index reset");
        Ok(removed)
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<IndexedVector>, IndexError> {
        if let Some(empty) = chunks.iter().find(|chunk| chunk.text.is_empty()) {
            return Err(IndexError::InvalidArgument(format!(
                "chunk {} of {} has no text",
                empty.sequence_index, empty.source_document
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embed_in_batches(self.embedder.as_ref(), &texts, &self.options).await?;

        let expected = self.dimensions();
        chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                if vector.len() != expected {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                Ok(IndexedVector {
                    id: Uuid::new_v4(),
                    vector,
                    chunk: chunk.clone(),
                })
            })
            .collect()
    }

    async fn commit(&self, current: &mut IndexState, next: IndexState) -> Result<(), IndexError> {
        if let Some(path) = &self.path {
            let snapshot = SnapshotRef {
                version: FORMAT_VERSION,
                model_id: self.model_id(),
                dimensions: self.dimensions(),
                documents: next.documents.values().collect(),
                entries: &next.entries,
            };
            let bytes = serde_json::to_vec(&snapshot)?;

            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let staging = staging_path(path);
            let mut file = tokio::fs::File::create(&staging).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            // No await between rename and swap.
            std::fs::rename(&staging, path)?;
        }

        *current = next;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PersistentVectorIndex {
    async fn add(&self, chunks: &[Chunk]) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let entries = self.embed_chunks(chunks).await?;
        let written = entries.len();

        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.append(entries);
        self.commit(&mut state, next).await?;

        info!(written, total = state.entries.len(), "added chunks to index");
        Ok(written)
    }

    async fn remove(&self, source_document: &str) -> Result<usize, IndexError> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(source_document)
            && !state
                .entries
                .iter()
                .any(|entry| entry.chunk.source_document == source_document)
        {
            return Ok(0);
        }

        let mut next = state.clone();
        let removed = next.remove_document(source_document);
        self.commit(&mut state, next).await?;

        info!(document = %source_document, removed, "removed document from index");
        Ok(removed)
    }

    async fn search(
        &self,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, SearchError> {
        if top_k == 0 {
            return Err(SearchError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if self.is_empty().await {
            return Ok(Vec::new());
        }

        let policy = RetryPolicy::from(self.options);
        let query = policy
            .run("embed_query", || self.embedder.embed(query_text))
            .await?;
        if query.len() != self.dimensions() {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions(),
                actual: query.len(),
            });
        }

        let state = self.state.read().await;
        let mut scored: Vec<(f64, &IndexedVector)> = state
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&query, &entry.vector), entry))
            .collect();
        scored.sort_by(|left, right| rank(*left, *right));
        scored.truncate(top_k);

        debug!(
            candidates = state.entries.len(),
            returned = scored.len(),
            best = scored.first().map(|(score, _)| *score),
            "vector search"
        );

        Ok(scored
            .into_iter()
            .map(|(similarity_score, entry)| RetrievedPassage {
                chunk: entry.chunk.clone(),
                similarity_score,
            })
            .collect())
    }
}

/// `dot(a, b) / (‖a‖ · ‖b‖)`, defined as 0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

fn rank(left: (f64, &IndexedVector), right: (f64, &IndexedVector)) -> Ordering {
    right
        .0
        .total_cmp(&left.0)
        .then_with(|| left.1.chunk.sequence_index.cmp(&right.1.chunk.sequence_index))
        .then_with(|| left.1.chunk.source_document.cmp(&right.1.chunk.source_document))
}

fn validate_snapshot(snapshot: &Snapshot, embedder: &dyn Embedder) -> Result<(), IndexError> {
    if snapshot.version != FORMAT_VERSION {
        return Err(IndexError::UnsupportedFormat(snapshot.version));
    }
    if snapshot.model_id != embedder.model_id() {
        return Err(IndexError::ModelMismatch {
            stored: snapshot.model_id.clone(),
            configured: embedder.model_id().to_string(),
        });
    }
    if snapshot.dimensions != embedder.dimensions() {
        return Err(IndexError::DimensionMismatch {
            expected: embedder.dimensions(),
            actual: snapshot.dimensions,
        });
    }
    if let Some(entry) = snapshot
        .entries
        .iter()
        .find(|entry| entry.vector.len() != snapshot.dimensions)
    {
        return Err(IndexError::DimensionMismatch {
            expected: snapshot.dimensions,
            actual: entry.vector.len(),
        });
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
