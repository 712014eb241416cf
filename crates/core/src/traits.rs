use crate::{AnswerError, Chunk, IndexError, PromptPayload, RetrievedPassage, SearchError};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, chunks: &[Chunk]) -> Result<usize, IndexError>;

    async fn remove(&self, source_document: &str) -> Result<usize, IndexError>;

    /// At most `top_k` passages ordered by descending similarity.
    async fn search(
        &self,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, SearchError>;
}

#[async_trait]
impl<T: VectorIndex + ?Sized> VectorIndex for Arc<T> {
    async fn add(&self, chunks: &[Chunk]) -> Result<usize, IndexError> {
        (**self).add(chunks).await
    }

    async fn remove(&self, source_document: &str) -> Result<usize, IndexError> {
        (**self).remove(source_document).await
    }

    async fn search(
        &self,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, SearchError> {
        (**self).search(query_text, top_k).await
    }
}

#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn answer(&self, prompt: &PromptPayload) -> Result<String, AnswerError>;
}
