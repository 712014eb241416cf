pub mod chunking;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod traits;

pub use chunking::{chunk, expected_chunk_count, normalize_whitespace, Chunker, PageMap};
pub use config::{
    ChunkingConfig, ConversationConfig, EmbeddingOptions, Language, RagConfig, RetrievalOptions,
};
pub use conversation::{no_context_message, ConversationContext};
pub use embeddings::{
    embed_in_batches, CharacterNgramEmbedder, Embedder, HttpEmbedder, RetryPolicy,
    CHARACTER_NGRAM_RELEVANCE_THRESHOLD, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{AnswerError, ConfigError, EmbeddingError, IndexError, IngestError, SearchError};
pub use extractor::{ExtractedDocument, FileExtractor, PageText, TextExtractor};
pub use index::{cosine_similarity, PersistentVectorIndex};
pub use ingest::{
    discover_documents, ingest_folder, ingest_paths, DocumentOutcome, IngestStatus,
    IngestionOptions, IngestionReport,
};
pub use models::{
    Chunk, Citation, ConversationTurn, DocumentRecord, DocumentUpdate, IndexedVector,
    NoContextReason, PromptMessage, PromptPayload, Retrieval, RetrievedPassage, Role,
};
pub use orchestrator::{AssistantReply, PolicyAssistant};
pub use retrieval::RetrievalEngine;
pub use traits::{AnswerService, VectorIndex};
