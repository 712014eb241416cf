use crate::embeddings::Embedder;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_BOUNDARY_LOOKBACK: usize = 20;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_HISTORY_LIMIT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    /// How far a window end may move back to land on whitespace.
    pub boundary_lookback: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            boundary_lookback: DEFAULT_BOUNDARY_LOOKBACK,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            ..Self::default()
        }
    }

    pub fn with_boundary_lookback(mut self, lookback: usize) -> Self {
        self.boundary_lookback = lookback;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::NotPositive("chunk_size"));
        }
        if self.overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    pub(crate) fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub relevance_threshold: f64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
        }
    }
}

impl RetrievalOptions {
    pub fn new(top_k: usize, relevance_threshold: f64) -> Self {
        Self {
            top_k,
            relevance_threshold,
        }
    }

    pub fn for_embedder(embedder: &dyn Embedder) -> Self {
        Self {
            relevance_threshold: embedder.relevance_threshold(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::NotPositive("top_k"));
        }
        if !self.relevance_threshold.is_finite() || !(-1.0..=1.0).contains(&self.relevance_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.relevance_threshold));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Swedish,
    English,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swedish => f.write_str("swedish"),
            Self::English => f.write_str("english"),
        }
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "swedish" | "svenska" | "sv" => Ok(Self::Swedish),
            "english" | "en" => Ok(Self::English),
            other => Err(ConfigError::UnknownLanguage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub history_limit: usize,
    pub language: Language,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            language: Language::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingOptions {
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub base_backoff: Duration,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            batch_size: 32,
            max_concurrent_batches: 4,
        }
    }
}

impl EmbeddingOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::NotPositive("embedding timeout"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::NotPositive("batch_size"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::NotPositive("max_concurrent_batches"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalOptions,
    pub conversation: ConversationConfig,
    pub embedding: EmbeddingOptions,
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.embedding.validate()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
