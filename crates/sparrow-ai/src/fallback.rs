use std::sync::Arc;

use async_trait::async_trait;

use crate::{ChatRequest, ChatResponse, LlmClient, SparrowAiError};

pub type FallbackEventSink = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Primary client with a single designated fallback backend.
///
/// On a primary failure the request is re-issued exactly once against the
/// fallback route; a second failure is returned to the caller, who renders
/// it as an apology rather than crashing the event handler.
pub struct FallbackClient {
    primary: ClientRoute,
    fallback: ClientRoute,
    event_sink: Option<FallbackEventSink>,
}

#[derive(Clone)]
/// Public struct `ClientRoute` used across Sparrow components.
pub struct ClientRoute {
    pub label: String,
    pub model: String,
    pub client: Arc<dyn LlmClient>,
}

impl FallbackClient {
    pub fn new(primary: ClientRoute, fallback: ClientRoute) -> Self {
        Self {
            primary,
            fallback,
            event_sink: None,
        }
    }

    pub fn with_event_sink(mut self, event_sink: FallbackEventSink) -> Self {
        self.event_sink = Some(event_sink);
        self
    }

    fn emit_fallback_event(&self, error: &SparrowAiError) {
        let Some(sink) = &self.event_sink else {
            return;
        };
        sink(serde_json::json!({
            "type": "provider_fallback",
            "from": format!("{}/{}", self.primary.label, self.primary.model),
            "to": format!("{}/{}", self.fallback.label, self.fallback.model),
            "error": error.to_string(),
        }));
    }
}

#[async_trait]
impl LlmClient for FallbackClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, SparrowAiError> {
        let mut primary_request = request.clone();
        primary_request.model = self.primary.model.clone();

        match self.primary.client.complete(primary_request).await {
            Ok(response) => Ok(response),
            Err(error) => {
                tracing::warn!(
                    from_route = %self.primary.label,
                    to_route = %self.fallback.label,
                    %error,
                    "primary provider failed, switching to fallback"
                );
                self.emit_fallback_event(&error);

                let mut fallback_request = request;
                fallback_request.model = self.fallback.model.clone();
                self.fallback.client.complete(fallback_request).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{ClientRoute, FallbackClient, FallbackEventSink};
    use crate::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, SparrowAiError};

    #[derive(Clone)]
    struct MockLlmClient {
        responses: Arc<Mutex<VecDeque<Result<ChatResponse, SparrowAiError>>>>,
        observed_models: Arc<Mutex<Vec<String>>>,
    }

    impl MockLlmClient {
        fn new(responses: Vec<Result<ChatResponse, SparrowAiError>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.into())),
                observed_models: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn observed_models(&self) -> Vec<String> {
            self.observed_models
                .lock()
                .expect("observed models lock")
                .clone()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, SparrowAiError> {
            self.observed_models
                .lock()
                .expect("observed models lock")
                .push(request.model);

            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| {
                    Err(SparrowAiError::InvalidResponse(
                        "no mock response configured".to_string(),
                    ))
                })
        }
    }

    fn assistant_text_response(text: &str) -> ChatResponse {
        ChatResponse {
            message: Message::assistant(text),
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage::default(),
        }
    }

    fn test_request() -> ChatRequest {
        ChatRequest::new("placeholder-model", vec![Message::user("hello")])
    }

    fn router(primary: &MockLlmClient, fallback: &MockLlmClient) -> FallbackClient {
        FallbackClient::new(
            ClientRoute {
                label: "groq".to_string(),
                model: "llama3-70b-8192".to_string(),
                client: Arc::new(primary.clone()),
            },
            ClientRoute {
                label: "openai".to_string(),
                model: "gpt-4-turbo".to_string(),
                client: Arc::new(fallback.clone()),
            },
        )
    }

    #[tokio::test]
    async fn functional_primary_success_never_touches_fallback() {
        let primary = MockLlmClient::new(vec![Ok(assistant_text_response("primary ok"))]);
        let fallback = MockLlmClient::new(vec![Ok(assistant_text_response("unexpected"))]);

        let response = router(&primary, &fallback)
            .complete(test_request())
            .await
            .expect("primary should answer");

        assert_eq!(response.message.text_content(), "primary ok");
        assert_eq!(primary.observed_models(), vec!["llama3-70b-8192"]);
        assert!(fallback.observed_models().is_empty());
    }

    #[tokio::test]
    async fn functional_fallback_answers_exactly_once_after_primary_error() {
        let primary = MockLlmClient::new(vec![Err(SparrowAiError::HttpStatus {
            status: 500,
            body: "boom".to_string(),
        })]);
        let fallback = MockLlmClient::new(vec![Ok(assistant_text_response("fallback ok"))]);

        let events = Arc::new(Mutex::new(Vec::<Value>::new()));
        let events_sink = events.clone();
        let sink: FallbackEventSink =
            Arc::new(move |event| events_sink.lock().expect("events lock").push(event));

        let response = router(&primary, &fallback)
            .with_event_sink(sink)
            .complete(test_request())
            .await
            .expect("fallback should answer");

        assert_eq!(response.message.text_content(), "fallback ok");
        assert_eq!(primary.observed_models(), vec!["llama3-70b-8192"]);
        assert_eq!(fallback.observed_models(), vec!["gpt-4-turbo"]);

        let events = events.lock().expect("events lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "provider_fallback");
        assert_eq!(events[0]["from"], "groq/llama3-70b-8192");
        assert_eq!(events[0]["to"], "openai/gpt-4-turbo");
    }

    #[tokio::test]
    async fn regression_fallback_failure_is_returned_without_retrying_primary() {
        let primary = MockLlmClient::new(vec![Err(SparrowAiError::HttpStatus {
            status: 429,
            body: "rate limited".to_string(),
        })]);
        let fallback = MockLlmClient::new(vec![Err(SparrowAiError::HttpStatus {
            status: 503,
            body: "unavailable".to_string(),
        })]);

        let error = router(&primary, &fallback)
            .complete(test_request())
            .await
            .expect_err("both routes failed");

        assert!(matches!(
            error,
            SparrowAiError::HttpStatus { status: 503, .. }
        ));
        assert_eq!(primary.observed_models().len(), 1);
        assert_eq!(fallback.observed_models().len(), 1);
    }
}
