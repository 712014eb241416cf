use crate::chunking::chunk;
use crate::config::ChunkingConfig;
use crate::extractor::{is_supported, TextExtractor};
use crate::index::PersistentVectorIndex;
use crate::models::DocumentUpdate;
use crate::IngestError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionOptions {
    pub chunking: ChunkingConfig,
    /// Re-index documents even when their checksum is unchanged.
    pub force: bool,
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() && is_supported(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn source_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    Indexed { chunks: usize },
    Unchanged,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub path: PathBuf,
    pub source_document: Option<String>,
    #[serde(flatten)]
    pub status: IngestStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub documents: Vec<DocumentOutcome>,
}

impl IngestionReport {
    pub fn indexed(&self) -> usize {
        self.count(|status| matches!(status, IngestStatus::Indexed { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|status| matches!(status, IngestStatus::Unchanged))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, IngestStatus::Failed { .. }))
    }

    pub fn chunks_written(&self) -> usize {
        self.documents
            .iter()
            .map(|outcome| match outcome.status {
                IngestStatus::Indexed { chunks } => chunks,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, predicate: impl Fn(&IngestStatus) -> bool) -> usize {
        self.documents
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

pub async fn ingest_paths(
    index: &PersistentVectorIndex,
    extractor: &dyn TextExtractor,
    paths: &[PathBuf],
    options: &IngestionOptions,
) -> Result<IngestionReport, IngestError> {
    options.chunking.validate()?;

    let mut report = IngestionReport::default();
    for path in paths {
        let source_document = source_name(path).ok();
        let status = match ingest_one(index, extractor, path, options).await {
            Ok(status) => status,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping document");
                IngestStatus::Failed {
                    reason: error.to_string(),
                }
            }
        };
        report.documents.push(DocumentOutcome {
            path: path.clone(),
            source_document,
            status,
        });
    }

    info!(
        indexed = report.indexed(),
        unchanged = report.unchanged(),
        failed = report.failed(),
        chunks = report.chunks_written(),
        "ingestion finished"
    );
    Ok(report)
}

pub async fn ingest_folder(
    index: &PersistentVectorIndex,
    extractor: &dyn TextExtractor,
    folder: &Path,
    options: &IngestionOptions,
) -> Result<IngestionReport, IngestError> {
    let files = discover_documents(folder);
    if files.is_empty() {
        return Err(IngestError::Extraction(format!(
            "no supported documents found in {}",
            folder.display()
        )));
    }
    ingest_paths(index, extractor, &files, options).await
}

async fn ingest_one(
    index: &PersistentVectorIndex,
    extractor: &dyn TextExtractor,
    path: &Path,
    options: &IngestionOptions,
) -> Result<IngestStatus, IngestError> {
    let source_document = source_name(path)?;
    let checksum = digest_file(path)?;

    if !options.force {
        let known = index
            .document(&source_document)
            .await
            .and_then(|record| record.checksum);
        if known.as_deref() == Some(checksum.as_str()) {
            info!(document = %source_document, "document unchanged");
            return Ok(IngestStatus::Unchanged);
        }
    }

    let extracted = extractor.extract(path)?;
    let chunks = chunk(
        &extracted.text,
        &source_document,
        &extracted.pages,
        options.chunking,
    )?;
    let written = index
        .replace_document(DocumentUpdate {
            source_document,
            checksum: Some(checksum),
            chunks,
        })
        .await?;

    Ok(IngestStatus::Indexed { chunks: written })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingOptions;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::extractor::FileExtractor;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn index() -> PersistentVectorIndex {
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new(32));
        PersistentVectorIndex::in_memory(embedder, EmbeddingOptions::default())
    }

    #[test]
    fn discover_documents_is_recursive_and_filtered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        fs::write(nested.join("b.txt"), "text")?;
        fs::write(nested.join("c.xlsx"), "ignored")?;

        let files = discover_documents(base);
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|pair| pair[0] <= pair[1]));
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn ingestion_fails_without_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = ingest_folder(
            &index(),
            &FileExtractor,
            dir.path(),
            &IngestionOptions::default(),
        )
        .await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_document_does_not_abort_batch() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(
            dir.path().join("vacation.txt"),
            "Employees receive twenty five days of paid vacation each year.",
        )?;

        let index = index();
        let report =
            ingest_folder(&index, &FileExtractor, dir.path(), &IngestionOptions::default())
                .await?;

        assert_eq!(report.indexed(), 1);
        assert_eq!(report.failed(), 1);
        let failed = report
            .documents
            .iter()
            .find(|outcome| matches!(outcome.status, IngestStatus::Failed { .. }))
            .and_then(|outcome| outcome.source_document.as_deref());
        assert_eq!(failed, Some("unreadable.pdf"));
        assert!(index.document("vacation.txt").await.is_some());
        assert!(index.document("unreadable.pdf").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unchanged_documents_are_skipped_unless_forced(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("leave.txt");
        fs::write(&path, "Sick leave is reported to your manager before nine.")?;
        let paths = vec![path.clone()];
        let index = index();

        let first = ingest_paths(&index, &FileExtractor, &paths, &IngestionOptions::default()).await?;
        let second =
            ingest_paths(&index, &FileExtractor, &paths, &IngestionOptions::default()).await?;
        let forced = ingest_paths(
            &index,
            &FileExtractor,
            &paths,
            &IngestionOptions {
                force: true,
                ..IngestionOptions::default()
            },
        )
        .await?;

        assert_eq!(first.indexed(), 1);
        assert_eq!(second.unchanged(), 1);
        assert_eq!(forced.indexed(), 1);
        assert_eq!(index.len().await, first.chunks_written());

        fs::write(&path, "Sick leave is reported to HR before ten.")?;
        let edited =
            ingest_paths(&index, &FileExtractor, &paths, &IngestionOptions::default()).await?;
        assert_eq!(edited.indexed(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_format_is_reported_per_document() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let path = dir.path().join("handbook.docx");
        fs::write(&path, b"PK")?;

        let report = ingest_paths(
            &index(),
            &FileExtractor,
            &[path],
            &IngestionOptions::default(),
        )
        .await?;
        assert_eq!(report.failed(), 1);
        Ok(())
    }
}
