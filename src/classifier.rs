//! Label classification used by the automatic post-summary hook.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::completion::{
    CompletionClient, CompletionError, ValidateResponse, check_unit_interval, complete_structured,
};
use crate::prompts;

/// Errors raised while classifying a document against candidate labels.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Nothing to classify.
    #[error("Document text cannot be empty for classification")]
    EmptyText,
    /// No candidate labels were supplied.
    #[error("Candidate labels must be provided for classification")]
    NoLabels,
    /// The model chose a label outside the candidate list.
    #[error("Classifier returned unknown label '{0}'")]
    UnknownLabel(String),
    /// Completion request failed.
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Outcome of a label classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    /// Chosen candidate label.
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Short explanation.
    pub reasoning: Option<String>,
    /// Labels that were offered.
    pub candidate_labels: Vec<String>,
}

/// Assigns one of a fixed set of labels to a document.
#[async_trait]
pub trait DocumentClassifier: Send + Sync {
    /// Pick the best label in `labels` for `text`.
    async fn classify(
        &self,
        text: &str,
        labels: &[String],
    ) -> Result<ClassificationResult, ClassifierError>;

    /// Identifier recorded alongside each decision.
    fn version(&self) -> String;
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LabelVerdict {
    label: String,
    confidence: f64,
    #[serde(default)]
    reason: Option<String>,
}

impl ValidateResponse for LabelVerdict {
    fn validate(&self) -> Result<(), String> {
        check_unit_interval("confidence", self.confidence)
    }
}

/// [`DocumentClassifier`] backed by a structured completion.
pub struct LlmLabelClassifier {
    completion: Arc<dyn CompletionClient>,
    model: String,
    provider: &'static str,
}

impl LlmLabelClassifier {
    /// Classify with `model` through `completion`; `provider` prefixes the version string.
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        provider: &'static str,
        model: impl Into<String>,
    ) -> Self {
        Self {
            completion,
            model: model.into(),
            provider,
        }
    }
}

fn render_request(text: &str, labels: &[String]) -> String {
    let formatted: Vec<String> = labels.iter().map(|label| format!("- {label}")).collect();
    format!(
        "Labels:\n{}\n\nDocument:\n{}",
        formatted.join("\n"),
        text.trim()
    )
}

#[async_trait]
impl DocumentClassifier for LlmLabelClassifier {
    async fn classify(
        &self,
        text: &str,
        labels: &[String],
    ) -> Result<ClassificationResult, ClassifierError> {
        if text.trim().is_empty() {
            return Err(ClassifierError::EmptyText);
        }
        if labels.is_empty() {
            return Err(ClassifierError::NoLabels);
        }

        tracing::debug!(model = %self.model, labels = labels.len(), "Classifying document");
        let (verdict, _) = complete_structured::<LabelVerdict>(
            self.completion.as_ref(),
            &self.model,
            prompts::LABEL_CLASSIFICATION,
            render_request(text, labels),
        )
        .await?;

        let wanted = verdict.label.trim();
        let label = labels
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| ClassifierError::UnknownLabel(verdict.label.clone()))?;

        Ok(ClassificationResult {
            label,
            confidence: verdict.confidence,
            reasoning: verdict.reason,
            candidate_labels: labels.to_vec(),
        })
    }

    fn version(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionRequest, CompletionResponse};

    struct Reply(&'static str);

    #[async_trait]
    impl CompletionClient for Reply {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            assert!(request.user_content.contains("- invoice"));
            Ok(CompletionResponse {
                content: self.0.to_string(),
                model: request.model,
                usage: None,
            })
        }
    }

    fn labels() -> Vec<String> {
        vec!["invoice".into(), "contract".into()]
    }

    #[tokio::test]
    async fn label_is_normalized_to_candidate() {
        let classifier = LlmLabelClassifier::new(
            Arc::new(Reply(r#"{"label":"Invoice","confidence":0.8,"reason":"amount due"}"#)),
            "openai",
            "gpt-4.1-mini",
        );
        let result = classifier.classify("Amount due", &labels()).await.expect("classify");
        assert_eq!(result.label, "invoice");
        assert_eq!(result.reasoning.as_deref(), Some("amount due"));
        assert_eq!(classifier.version(), "openai:gpt-4.1-mini");
    }

    #[tokio::test]
    async fn unknown_label_and_empty_inputs_are_rejected() {
        let classifier = LlmLabelClassifier::new(
            Arc::new(Reply(r#"{"label":"memo","confidence":0.8}"#)),
            "openai",
            "m",
        );
        assert!(matches!(
            classifier.classify("text", &labels()).await,
            Err(ClassifierError::UnknownLabel(label)) if label == "memo"
        ));
        assert!(matches!(
            classifier.classify("  ", &labels()).await,
            Err(ClassifierError::EmptyText)
        ));
        assert!(matches!(
            classifier.classify("text", &[]).await,
            Err(ClassifierError::NoLabels)
        ));
    }
}
