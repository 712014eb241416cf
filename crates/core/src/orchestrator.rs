use crate::config::RetrievalOptions;
use crate::conversation::{no_context_message, ConversationContext};
use crate::models::{Citation, Retrieval, Role};
use crate::retrieval::RetrievalEngine;
use crate::traits::{AnswerService, VectorIndex};
use crate::AnswerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub text: String,
    pub citations: Vec<Citation>,
    /// False when the reply is the fixed "no information" message.
    pub grounded: bool,
}

pub struct PolicyAssistant<V, A>
where
    V: VectorIndex,
    A: AnswerService,
{
    retrieval: RetrievalEngine<V>,
    answers: A,
    options: RetrievalOptions,
    answer_timeout: Duration,
}

impl<V, A> PolicyAssistant<V, A>
where
    V: VectorIndex,
    A: AnswerService,
{
    pub fn new(index: V, answers: A) -> Self {
        Self {
            retrieval: RetrievalEngine::new(index),
            answers,
            options: RetrievalOptions::default(),
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
        }
    }

    pub fn with_options(mut self, options: RetrievalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout = timeout;
        self
    }

    pub fn retrieval(&self) -> &RetrievalEngine<V> {
        &self.retrieval
    }

    pub async fn ask(
        &self,
        session: &mut ConversationContext,
        question: &str,
    ) -> Result<AssistantReply, AnswerError> {
        let retrieval = self.retrieval.retrieve(question, self.options).await?;

        let reply = match retrieval {
            Retrieval::NoRelevantContext { cause } => {
                info!(?cause, "answering without policy context");
                AssistantReply {
                    text: no_context_message(session.language(), &cause).to_string(),
                    citations: Vec::new(),
                    grounded: false,
                }
            }
            Retrieval::Passages { passages } => {
                let prompt = session.build_prompt(question, &passages);
                let text = tokio::time::timeout(self.answer_timeout, self.answers.answer(&prompt))
                    .await
                    .map_err(|_| {
                        warn!(timeout = ?self.answer_timeout, "answering service timed out");
                        AnswerError::Timeout(self.answer_timeout)
                    })??;
                AssistantReply {
                    text,
                    citations: prompt.citations,
                    grounded: true,
                }
            }
        };

        session.append_turn(Role::User, question.trim());
        session.append_turn(Role::Assistant, reply.text.clone());
        Ok(reply)
    }
}
