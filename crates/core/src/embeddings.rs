use crate::config::{EmbeddingOptions, DEFAULT_RELEVANCE_THRESHOLD};
use crate::error::{ConfigError, EmbeddingError};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Trigram vectors of related passages land around 0.5 to 0.65.
pub const CHARACTER_NGRAM_RELEVANCE_THRESHOLD: f64 = 0.45;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn relevance_threshold(&self) -> f64 {
        DEFAULT_RELEVANCE_THRESHOLD
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for std::sync::Arc<T> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn relevance_threshold(&self) -> f64 {
        (**self).relevance_threshold()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(texts).await
    }
}

#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    model_id: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("char-trigram-{dimensions}"),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn relevance_threshold(&self) -> f64 {
        CHARACTER_NGRAM_RELEVANCE_THRESHOLD
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vectorize(text))
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
    ) -> Result<Self, ConfigError> {
        if dimensions == 0 {
            return Err(ConfigError::NotPositive("embedding dimensions"));
        }
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            dimensions,
            client: Client::new(),
        })
    }

    fn backend(&self) -> String {
        self.endpoint.host_str().unwrap_or("embedding-service").to_string()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_connect() {
                EmbeddingError::Unavailable(error.to_string())
            } else {
                EmbeddingError::Http(error)
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(EmbeddingError::Unavailable(format!(
                "{} returned {status}",
                self.backend()
            )));
        }
        if !status.is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: self.backend(),
                details: status.to_string(),
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        order_by_index(payload.data, texts.len(), self.dimensions)
    }
}

fn order_by_index(
    data: Vec<EmbeddingDatum>,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: data.len(),
        });
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, datum) in data.into_iter().enumerate() {
        let index = datum.index.unwrap_or(position);
        if datum.embedding.len() != dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimensions,
                actual: datum.embedding.len(),
            });
        }
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(datum.embedding),
            _ => {
                return Err(EmbeddingError::BackendResponse {
                    backend: "embedding-service".to_string(),
                    details: format!("duplicate or out-of-range index {index}"),
                })
            }
        }
    }

    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(EmbeddingError::CountMismatch {
            expected,
            actual: 0,
        })
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub timeout: Duration,
}

impl From<EmbeddingOptions> for RetryPolicy {
    fn from(value: EmbeddingOptions) -> Self {
        Self {
            max_retries: value.max_retries,
            base_backoff: value.base_backoff,
            timeout: value.timeout,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(1u32 << attempt.min(16))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, EmbeddingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EmbeddingError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(EmbeddingError::Timeout(self.timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "embedding call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    options: &EmbeddingOptions,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let policy = RetryPolicy::from(*options);
    let calls: Vec<_> = texts
        .chunks(options.batch_size.max(1))
        .map(|batch| policy.run("embed_batch", move || embedder.embed_batch(batch)))
        .collect();
    let batches: Vec<Vec<Vec<f32>>> = stream::iter(calls)
        .buffered(options.max_concurrent_batches.max(1))
        .try_collect()
        .await?;

    let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
    if vectors.len() != texts.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: texts.len(),
            actual: vectors.len(),
        });
    }
    for vector in &vectors {
        if vector.len() != embedder.dimensions() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: embedder.dimensions(),
                actual: vector.len(),
            });
        }
    }
    Ok(vectors)
}
