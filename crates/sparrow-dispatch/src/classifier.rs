use serde::{Deserialize, Serialize};

use sparrow_ai::{complete_structured, ChatRequest, LlmClient, Message};

use crate::prompts::CLASSIFY_PROMPT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Closed set of request-type tags produced by classification.
pub enum RequestType {
    FeatureRequest,
    BugReport,
    GeneralRequest,
    AiConversation,
    Conversation,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::FeatureRequest => "feature_request",
            RequestType::BugReport => "bug_report",
            RequestType::GeneralRequest => "general_request",
            RequestType::AiConversation => "ai_conversation",
            RequestType::Conversation => "conversation",
        }
    }

    /// Types that open the "create an issue?" PM flow.
    pub fn is_pm_request(&self) -> bool {
        matches!(
            self,
            RequestType::FeatureRequest | RequestType::BugReport | RequestType::GeneralRequest
        )
    }
}

#[derive(Debug, Deserialize)]
struct Classification {
    request_type: RequestType,
}

const CLASSIFICATION_SHAPE_HINT: &str = "{\"request_type\": \"feature_request\" | \
\"bug_report\" | \"general_request\" | \"ai_conversation\" | \"conversation\"}";

/// Buckets raw message text into one of the request-type tags.
///
/// Any failure (provider error or malformed output) collapses to `None`,
/// which callers must treat as plain conversation rather than propagate.
pub async fn classify_request(
    client: &dyn LlmClient,
    model: &str,
    text: &str,
) -> Option<RequestType> {
    let request = ChatRequest::new(
        model,
        vec![Message::system(CLASSIFY_PROMPT), Message::user(text)],
    );
    match complete_structured::<Classification>(client, request, CLASSIFICATION_SHAPE_HINT).await {
        Ok(classification) => Some(classification.request_type),
        Err(error) => {
            tracing::warn!(%error, "request classification failed; treating as conversation");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use sparrow_ai::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, SparrowAiError};

    use super::{classify_request, RequestType};

    struct StaticJsonClient(&'static str);

    #[async_trait]
    impl LlmClient for StaticJsonClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, SparrowAiError> {
            Ok(ChatResponse {
                message: Message::assistant(self.0),
                finish_reason: Some("stop".to_string()),
                usage: ChatUsage::default(),
            })
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, SparrowAiError> {
            Err(SparrowAiError::HttpStatus {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn functional_classification_parses_request_type_tag() {
        let client = StaticJsonClient("{\"request_type\":\"bug_report\"}");
        let tag = classify_request(&client, "stub-model", "the login page crashes").await;
        assert_eq!(tag, Some(RequestType::BugReport));
        assert!(tag.map(|value| value.is_pm_request()).unwrap_or(false));
    }

    #[tokio::test]
    async fn functional_classification_is_deterministic_for_a_fixed_provider() {
        let client = StaticJsonClient("{\"request_type\":\"feature_request\"}");
        let first = classify_request(&client, "stub-model", "please add dark mode").await;
        let second = classify_request(&client, "stub-model", "please add dark mode").await;
        assert_eq!(first, second);
        assert_eq!(first, Some(RequestType::FeatureRequest));
    }

    #[tokio::test]
    async fn regression_provider_failure_collapses_to_none() {
        let tag = classify_request(&FailingClient, "stub-model", "anything").await;
        assert_eq!(tag, None);
    }

    #[test]
    fn unit_pm_request_covers_exactly_three_tags() {
        assert!(RequestType::FeatureRequest.is_pm_request());
        assert!(RequestType::BugReport.is_pm_request());
        assert!(RequestType::GeneralRequest.is_pm_request());
        assert!(!RequestType::AiConversation.is_pm_request());
        assert!(!RequestType::Conversation.is_pm_request());
    }
}
