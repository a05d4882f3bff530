//! Diagnostic assistant facade over the LLM service
//!
//! Three capabilities, all stateless: revise the hypothesis tree, generate
//! the next reply, summarize a finished dialog. Prompt assembly lives here;
//! session bookkeeping stays in `crate::session`.

use crate::exchange::{format_history, ExchangePair};
use crate::hypothesis::Tree;
use crate::llm::{CompletionRequest, LlmError, LlmService};
use crate::prompts;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const HYPOTHESIS_TEMPERATURE: f32 = 0.3;
const REPLY_TEMPERATURE: f32 = 0.7;

/// Model capabilities the session orchestrator depends on.
/// A trait seam so orchestrator tests can script the model.
#[async_trait]
pub trait DiagnosisModel: Send + Sync {
    /// Raw model text expected to carry a revised hypothesis tree
    async fn generate_hypotheses(
        &self,
        history: &[ExchangePair],
        user_message: &str,
        tree: &Tree,
    ) -> Result<String, LlmError>;

    /// User-facing reply, given the post-merge tree
    async fn generate_reply(
        &self,
        history: &[ExchangePair],
        user_message: &str,
        tree: &Tree,
    ) -> Result<String, LlmError>;

    /// Final summary over the whole dialog
    async fn generate_summary(&self, history: &[ExchangePair]) -> Result<String, LlmError>;
}

/// Production assistant backed by an `LlmService`
pub struct Assistant {
    service: Arc<dyn LlmService>,
}

impl Assistant {
    pub fn new(service: Arc<dyn LlmService>) -> Self {
        Self { service }
    }
}

fn tree_json(tree: &Tree) -> String {
    serde_json::to_string(&Value::Object(tree.clone())).unwrap_or_else(|_| "{}".to_string())
}

#[async_trait]
impl DiagnosisModel for Assistant {
    async fn generate_hypotheses(
        &self,
        history: &[ExchangePair],
        user_message: &str,
        tree: &Tree,
    ) -> Result<String, LlmError> {
        let prompt = prompts::hypothesis_prompt(
            &format_history(history),
            user_message,
            &tree_json(tree),
        );
        let request = CompletionRequest::with_system(prompts::HYPOTHESIS_SYSTEM_PROMPT, prompt)
            .temperature(HYPOTHESIS_TEMPERATURE);

        let response = self.service.complete(&request).await?;
        Ok(response.content)
    }

    async fn generate_reply(
        &self,
        history: &[ExchangePair],
        user_message: &str,
        tree: &Tree,
    ) -> Result<String, LlmError> {
        let prompt =
            prompts::main_prompt(&format_history(history), user_message, &tree_json(tree));
        let request = CompletionRequest::with_system(prompts::MAIN_SYSTEM_PROMPT, prompt)
            .temperature(REPLY_TEMPERATURE);

        let response = self.service.complete(&request).await?;
        Ok(response.content)
    }

    async fn generate_summary(&self, history: &[ExchangePair]) -> Result<String, LlmError> {
        let request =
            CompletionRequest::system_only(prompts::summary_prompt(&format_history(history)));

        let response = self.service.complete(&request).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, Usage};
    use std::sync::Mutex;

    /// Records requests and echoes a canned reply
    struct RecordingService {
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmService for RecordingService {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(CompletionResponse {
                content: "ok".to_string(),
                usage: Usage::default(),
            })
        }

        fn model_id(&self) -> &str {
            "recording"
        }
    }

    fn assistant() -> (Assistant, Arc<RecordingService>) {
        let service = Arc::new(RecordingService {
            requests: Mutex::new(Vec::new()),
        });
        (Assistant::new(service.clone()), service)
    }

    #[tokio::test]
    async fn test_reply_request_carries_history_and_tree() {
        let (assistant, service) = assistant();
        let history = vec![ExchangePair {
            user: "станок встал".into(),
            bot: "что было перед остановкой?".into(),
        }];
        let mut tree = Tree::new();
        tree.insert("title".into(), serde_json::json!("диагностика"));

        assistant
            .generate_reply(&history, "был щелчок", &tree)
            .await
            .unwrap();

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let body = &requests[0].messages[1].content;
        assert!(body.contains("станок встал"));
        assert!(body.contains("был щелчок"));
        assert!(body.contains("диагностика"));
        assert_eq!(requests[0].temperature, Some(REPLY_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_summary_is_single_system_message() {
        let (assistant, service) = assistant();
        let history = vec![ExchangePair {
            user: "a".into(),
            bot: "b".into(),
        }];

        assistant.generate_summary(&history).await.unwrap();

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 1);
        assert!(requests[0].messages[0].content.contains("Пользователь: a"));
        assert!(requests[0].temperature.is_none());
    }
}
