use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use policy_rag_core::{
    discover_documents, ingest_paths, no_context_message, CharacterNgramEmbedder, ChunkingConfig,
    ConversationConfig, ConversationContext, Embedder, EmbeddingOptions, FileExtractor,
    HttpEmbedder, IngestStatus, IngestionOptions, Language, PersistentVectorIndex, RagConfig,
    Retrieval, RetrievalEngine, RetrievalOptions, VectorIndex, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "policy-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Where the vector index snapshot is stored
    #[arg(long, env = "POLICY_RAG_INDEX", default_value = "policy-index.json")]
    index_path: PathBuf,

    /// OpenAI-compatible embeddings endpoint; the local trigram embedder is used when unset
    #[arg(long, env = "POLICY_RAG_EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding model name sent to the endpoint
    #[arg(long, env = "POLICY_RAG_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Vector dimensionality produced by the embedder
    #[arg(long, env = "POLICY_RAG_EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Bearer token for the embeddings endpoint
    #[arg(long, env = "POLICY_RAG_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Chunk length in characters
    #[arg(long, env = "POLICY_RAG_CHUNK_SIZE", default_value = "500")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "POLICY_RAG_CHUNK_OVERLAP", default_value = "50")]
    chunk_overlap: usize,

    /// Passages retrieved per question
    #[arg(long, env = "POLICY_RAG_TOP_K", default_value = "5")]
    top_k: usize,

    /// Minimum cosine similarity for a passage to be used [default: 0.7, or 0.45 with the local embedder]
    #[arg(long, env = "POLICY_RAG_RELEVANCE_THRESHOLD")]
    relevance_threshold: Option<f64>,

    /// Response language (swedish or english)
    #[arg(long, env = "POLICY_RAG_LANGUAGE", default_value = "swedish")]
    language: Language,

    /// Conversation turns kept in the prompt
    #[arg(long, env = "POLICY_RAG_HISTORY_LIMIT", default_value = "4")]
    history_limit: usize,

    /// Per-call embedding timeout in seconds
    #[arg(long, env = "POLICY_RAG_TIMEOUT_SECS", default_value = "30")]
    timeout_secs: u64,

    /// Retries for transient embedding failures
    #[arg(long, env = "POLICY_RAG_EMBED_RETRIES", default_value = "3")]
    embed_retries: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index policy documents.
    Ingest {
        /// Folder searched recursively for pdf, txt and md files.
        #[arg(long, conflicts_with = "file")]
        folder: Option<PathBuf>,
        /// Individual documents to ingest.
        #[arg(long)]
        file: Vec<PathBuf>,
        /// Re-index documents whose checksum has not changed.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Drop one document from the index.
    Remove {
        /// File name the document was indexed under.
        source_document: String,
    },
    /// Delete every indexed document.
    Reset,
    /// Show indexed documents and chunk counts.
    Stats,
    /// Print the most similar passages without applying the threshold.
    Search {
        #[arg(long)]
        query: String,
    },
    /// Retrieve relevant passages and print the grounded prompt.
    Ask {
        #[arg(long)]
        question: String,
    },
}

impl Cli {
    fn config(&self, embedder: &dyn Embedder) -> anyhow::Result<RagConfig> {
        let relevance_threshold = self
            .relevance_threshold
            .unwrap_or_else(|| RetrievalOptions::for_embedder(embedder).relevance_threshold);
        let config = RagConfig {
            chunking: ChunkingConfig::new(self.chunk_size, self.chunk_overlap),
            retrieval: RetrievalOptions::new(self.top_k, relevance_threshold),
            conversation: ConversationConfig {
                history_limit: self.history_limit,
                language: self.language,
            },
            embedding: EmbeddingOptions {
                timeout: Duration::from_secs(self.timeout_secs),
                max_retries: self.embed_retries,
                ..EmbeddingOptions::default()
            },
        };
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        match &self.embedding_url {
            Some(url) => Ok(Arc::new(
                HttpEmbedder::new(
                    url,
                    self.embedding_model.clone(),
                    self.embedding_dimensions,
                    self.embedding_api_key.clone(),
                )
                .context("invalid embedding endpoint")?,
            )),
            None => Ok(Arc::new(CharacterNgramEmbedder::new(
                self.embedding_dimensions,
            ))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let embedder = cli.embedder()?;
    let config = cli.config(embedder.as_ref())?;
    let index = PersistentVectorIndex::open(&cli.index_path, embedder, config.embedding)
        .await
        .with_context(|| format!("failed to open index {}", cli.index_path.display()))?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %cli.index_path.display(),
        model = index.model_id(),
        "policy-rag boot"
    );

    match cli.command {
        Command::Ingest {
            folder,
            file,
            force,
        } => {
            let paths = match folder {
                Some(folder) => {
                    let found = discover_documents(&folder);
                    if found.is_empty() {
                        anyhow::bail!("no supported documents found in {}", folder.display());
                    }
                    found
                }
                None if file.is_empty() => anyhow::bail!("pass --folder or at least one --file"),
                None => file,
            };

            let options = IngestionOptions {
                chunking: config.chunking,
                force,
            };
            let report = ingest_paths(&index, &FileExtractor, &paths, &options).await?;

            for outcome in &report.documents {
                match &outcome.status {
                    IngestStatus::Indexed { chunks } => {
                        println!("indexed   {} ({chunks} chunks)", outcome.path.display())
                    }
                    IngestStatus::Unchanged => {
                        println!("unchanged {}", outcome.path.display())
                    }
                    IngestStatus::Failed { reason } => {
                        warn!(path = %outcome.path.display(), %reason, "document skipped");
                        println!("failed    {}: {reason}", outcome.path.display())
                    }
                }
            }
            println!(
                "{} indexed, {} unchanged, {} failed; {} chunks written; {} chunks in index",
                report.indexed(),
                report.unchanged(),
                report.failed(),
                report.chunks_written(),
                index.len().await
            );
        }
        Command::Remove { source_document } => {
            let removed = index.remove(&source_document).await?;
            println!("removed {removed} chunks of {source_document}");
        }
        Command::Reset => {
            let removed = index.reset().await?;
            println!("index cleared ({removed} chunks removed)");
        }
        Command::Stats => {
            let documents = index.documents().await;
            println!(
                "model={} dimensions={} documents={} chunks={}",
                index.model_id(),
                index.dimensions(),
                documents.len(),
                index.len().await
            );
            for record in documents {
                println!(
                    "{}  chunks={}  ingested_at={}",
                    record.source_document,
                    record.chunk_count,
                    record.ingested_at.to_rfc3339()
                );
            }
        }
        Command::Search { query } => {
            let hits = index.search(&query, config.retrieval.top_k).await?;
            if hits.is_empty() {
                println!("index is empty");
            }
            for hit in hits {
                println!(
                    "score={:.4} source={} page={} chunk={}",
                    hit.similarity_score,
                    hit.chunk.source_document,
                    hit.chunk.page_label().unwrap_or_else(|| "-".to_string()),
                    hit.chunk.chunk_id
                );
                println!("  {}", hit.chunk.text);
            }
        }
        Command::Ask { question } => {
            let engine = RetrievalEngine::new(index);
            let session = ConversationContext::new(config.conversation);

            match engine.retrieve(&question, config.retrieval).await? {
                Retrieval::NoRelevantContext { cause } => {
                    info!(?cause, "no relevant policy context");
                    println!("{}", no_context_message(session.language(), &cause));
                }
                Retrieval::Passages { passages } => {
                    for passage in &passages {
                        println!(
                            "score={:.4} source={} page={}",
                            passage.similarity_score,
                            passage.chunk.source_document,
                            passage.chunk.page_label().unwrap_or_else(|| "-".to_string())
                        );
                    }
                    let prompt = session.build_prompt(&question, &passages);
                    println!("{}", serde_json::to_string_pretty(&prompt)?);
                }
            }
        }
    }

    Ok(())
}
