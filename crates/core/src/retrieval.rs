use crate::config::RetrievalOptions;
use crate::error::SearchError;
use crate::models::{NoContextReason, Retrieval, RetrievedPassage};
use crate::traits::VectorIndex;
use tracing::{debug, info};

pub struct RetrievalEngine<V>
where
    V: VectorIndex,
{
    index: V,
}

impl<V> RetrievalEngine<V>
where
    V: VectorIndex,
{
    pub fn new(index: V) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub async fn retrieve(
        &self,
        question: &str,
        options: RetrievalOptions,
    ) -> Result<Retrieval, SearchError> {
        if question.trim().is_empty() {
            return Err(SearchError::InvalidArgument("question is empty".to_string()));
        }
        options
            .validate()
            .map_err(|error| SearchError::InvalidArgument(error.to_string()))?;

        let candidates = self.index.search(question, options.top_k).await?;
        if candidates.is_empty() {
            info!("no indexed passages to retrieve from");
            return Ok(Retrieval::NoRelevantContext {
                cause: NoContextReason::EmptyIndex,
            });
        }

        let best_score = candidates
            .iter()
            .map(|passage| passage.similarity_score)
            .fold(f64::NEG_INFINITY, f64::max);
        let candidate_count = candidates.len();
        let passages: Vec<RetrievedPassage> = candidates
            .into_iter()
            .filter(|passage| passage.similarity_score >= options.relevance_threshold)
            .collect();

        debug!(
            candidates = candidate_count,
            kept = passages.len(),
            threshold = options.relevance_threshold,
            best_score,
            "relevance filter applied"
        );

        if passages.is_empty() {
            info!(
                best_score,
                threshold = options.relevance_threshold,
                "no passage met the relevance threshold"
            );
            return Ok(Retrieval::NoRelevantContext {
                cause: NoContextReason::BelowThreshold {
                    best_score,
                    threshold: options.relevance_threshold,
                },
            });
        }

        Ok(Retrieval::Passages { passages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeVectorIndex {
        hits: Vec<RetrievedPassage>,
        requested_top_k: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl VectorIndex for FakeVectorIndex {
        async fn add(&self, chunks: &[Chunk]) -> Result<usize, IndexError> {
            Ok(chunks.len())
        }

        async fn remove(&self, _source_document: &str) -> Result<usize, IndexError> {
            Ok(0)
        }

        async fn search(
            &self,
            _query_text: &str,
            top_k: usize,
        ) -> Result<Vec<RetrievedPassage>, SearchError> {
            if let Ok(mut calls) = self.requested_top_k.lock() {
                calls.push(top_k);
            }
            Ok(self.hits.iter().take(top_k).cloned().collect())
        }
    }

    fn passage(index: u64, score: f64) -> RetrievedPassage {
        RetrievedPassage {
            chunk: Chunk {
                chunk_id: format!("chunk-{index}"),
                source_document: "handbook.pdf".to_string(),
                text: format!("passage {index}"),
                page_number: Some(1),
                page_end: Some(1),
                sequence_index: index,
                char_start: 0,
            },
            similarity_score: score,
        }
    }

    fn engine(scores: &[f64]) -> RetrievalEngine<FakeVectorIndex> {
        RetrievalEngine::new(FakeVectorIndex {
            hits: scores
                .iter()
                .enumerate()
                .map(|(i, score)| passage(i as u64, *score))
                .collect(),
            ..FakeVectorIndex::default()
        })
    }

    #[tokio::test]
    async fn passages_below_threshold_are_dropped() {
        let engine = engine(&[0.91, 0.75, 0.7, 0.69, 0.2]);
        let outcome = engine
            .retrieve("how much vacation?", RetrievalOptions::new(5, 0.7))
            .await
            .unwrap();

        let scores: Vec<f64> = outcome
            .passages()
            .iter()
            .map(|passage| passage.similarity_score)
            .collect();
        assert_eq!(scores, vec![0.91, 0.75, 0.7]);
    }

    #[tokio::test]
    async fn all_below_threshold_is_no_relevant_context() {
        let engine = engine(&[0.5, 0.3]);
        let outcome = engine
            .retrieve("parking rules", RetrievalOptions::default())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Retrieval::NoRelevantContext {
                cause: NoContextReason::BelowThreshold {
                    best_score: 0.5,
                    threshold: 0.7
                }
            }
        );
        assert!(!outcome.is_grounded());
    }

    #[tokio::test]
    async fn empty_index_is_reported_separately() {
        let engine = engine(&[]);
        let outcome = engine
            .retrieve("anything", RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Retrieval::NoRelevantContext {
                cause: NoContextReason::EmptyIndex
            }
        );
    }

    #[tokio::test]
    async fn options_are_passed_per_call() {
        let engine = engine(&[0.9, 0.8, 0.7]);
        engine
            .retrieve("q", RetrievalOptions::new(2, 0.0))
            .await
            .unwrap();
        engine
            .retrieve("q", RetrievalOptions::new(7, 0.0))
            .await
            .unwrap();

        let calls = engine.index().requested_top_k.lock().unwrap().clone();
        assert_eq!(calls, vec![2, 7]);
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected() {
        let engine = engine(&[0.9]);
        assert!(matches!(
            engine.retrieve("   ", RetrievalOptions::default()).await,
            Err(SearchError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.retrieve("q", RetrievalOptions::new(0, 0.7)).await,
            Err(SearchError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.retrieve("q", RetrievalOptions::new(3, 2.0)).await,
            Err(SearchError::InvalidArgument(_))
        ));
    }
}
