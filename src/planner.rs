//! Retrieval planner: decides once per request whether to retrieve, from
//! which collection, and how many passages.
//!
//! Non-adaptive requests always retrieve. Adaptive requests ask the
//! configured [`PromptClassifier`]. The collection is only checked for
//! existence when retrieval will actually run.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rag_gateway_core::classify::{KeywordClassifier, PromptClassifier, Verdict};
use rag_gateway_core::prompt::PromptEnvelope;
use rag_gateway_core::{RagError, Result};

use crate::config::{PlannerConfig, RetrievalConfig};
use crate::generation::GenerationClient;
use crate::registry::CollectionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalDecision {
    pub should_retrieve: bool,
    pub collection: String,
    pub top_k: usize,
    pub reason: String,
}

pub struct RetrievalPlanner {
    classifier: Arc<dyn PromptClassifier>,
    registry: Arc<CollectionRegistry>,
    default_collection: String,
    top_k: usize,
}

impl RetrievalPlanner {
    pub fn new(
        classifier: Arc<dyn PromptClassifier>,
        registry: Arc<CollectionRegistry>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            classifier,
            registry,
            default_collection: retrieval.default_collection.clone(),
            top_k: retrieval.top_k,
        }
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    pub async fn plan(
        &self,
        prompt: &str,
        requested_collection: Option<&str>,
        adaptive: bool,
    ) -> Result<RetrievalDecision> {
        let collection = requested_collection
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_collection)
            .to_string();

        let verdict = if adaptive {
            self.classifier.classify(prompt).await?
        } else {
            Verdict::retrieve("non-adaptive")
        };

        if verdict.retrieve && self.registry.get(&collection).await?.is_none() {
            return Err(RagError::collection_not_found(collection));
        }

        Ok(RetrievalDecision {
            should_retrieve: verdict.retrieve,
            collection,
            top_k: self.top_k,
            reason: verdict.reason,
        })
    }
}

const ROUTE_PROMPT: &str = "You are a router for a career guidance and university admissions assistant.\n\
Decide whether answering the user's message requires looking up facts in the knowledge base \
(admission scores, programs, tuition, careers, universities) or whether it is small talk.\n\
Reply with exactly one word: yes or no.\n\nMessage: ";

/// Asks the generation provider whether a prompt needs the knowledge base.
///
/// Uses temperature 0 and a tiny token budget. Any failure or unclear
/// answer falls back to retrieving.
pub struct LlmRouteClassifier {
    generation: GenerationClient,
}

impl LlmRouteClassifier {
    pub fn new(generation: GenerationClient) -> Self {
        Self { generation }
    }
}

#[async_trait]
impl PromptClassifier for LlmRouteClassifier {
    fn name(&self) -> &str {
        "llm"
    }

    async fn classify(&self, prompt: &str) -> Result<Verdict> {
        let envelope = PromptEnvelope::new(format!("{}{}", ROUTE_PROMPT, prompt), 0.0, 5);
        let answer = match self
            .generation
            .complete(envelope, &CancellationToken::new())
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "route classifier failed, defaulting to retrieval");
                return Ok(Verdict::retrieve("classifier unavailable"));
            }
        };

        let answer = answer.trim().to_lowercase();
        if answer.starts_with("no") || answer.starts_with("không") {
            Ok(Verdict::skip("llm: no"))
        } else if answer.starts_with("yes") || answer.starts_with("có") {
            Ok(Verdict::retrieve("llm: yes"))
        } else {
            Ok(Verdict::retrieve("llm: unclear"))
        }
    }
}

/// Build the classifier selected by `planner.classifier`.
pub fn create_classifier(
    config: &PlannerConfig,
    generation: &GenerationClient,
) -> Result<Arc<dyn PromptClassifier>> {
    match config.classifier.as_str() {
        "keyword" => Ok(Arc::new(KeywordClassifier::new(
            config.greetings.iter().cloned(),
            config.domain_keywords.iter().cloned(),
            config.default_retrieve,
        ))),
        "llm" => Ok(Arc::new(LlmRouteClassifier::new(generation.clone()))),
        other => Err(RagError::Configuration(format!(
            "Unknown planner classifier: {}",
            other
        ))),
    }
}
