use std::sync::Arc;

use sparrow_ai::{complete_structured, ChatRequest, LlmClient, Message, SparrowAiError};
use sparrow_index::DocumentIndex;

use crate::prompts::system_prompt_for;
use crate::tickets::{TicketBatch, TICKET_SHAPE_HINT};
use crate::{IssueTicket, RequestType};

/// Fixed user-facing text posted when both providers failed.
pub const NO_RESPONSE_APOLOGY: &str =
    "Sorry, I couldn't reach my language models just now. Please try again in a moment.";

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Shapes prompts and drives completions through the provider table.
///
/// The held client is the fallback-routing client, so the one-shot failover
/// policy applies to every mode uniformly.
pub struct Dispatcher {
    client: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Direct mode: prefix the request-type system prompt and complete.
    ///
    /// `None` means both providers failed; the caller posts the apology.
    pub async fn respond(
        &self,
        history: Vec<Message>,
        request_type: Option<RequestType>,
    ) -> Option<String> {
        let mut messages = vec![Message::system(system_prompt_for(request_type))];
        messages.extend(history);

        let mut request = ChatRequest::new(self.model.clone(), messages);
        request.temperature = Some(self.temperature);

        match self.client.complete(request).await {
            Ok(response) => {
                let text = response.message.text_content();
                if text.trim().is_empty() {
                    tracing::warn!("dispatcher received an empty completion");
                    None
                } else {
                    Some(text)
                }
            }
            Err(error) => {
                tracing::error!(%error, "dispatch failed on both primary and fallback");
                None
            }
        }
    }

    /// Retrieval mode: run the thread's document index first and fold the
    /// retrieved snippet into the history as an extra user turn.
    ///
    /// A retrieval failure degrades to direct mode; the user still gets an
    /// answer, just without document context.
    pub async fn respond_with_retrieval(
        &self,
        index: &dyn DocumentIndex,
        conversation_handle: &str,
        mut history: Vec<Message>,
        request_type: Option<RequestType>,
        user_text: &str,
    ) -> Option<String> {
        let retrieval = async {
            index
                .add_user_message(conversation_handle, user_text)
                .await?;
            index.run_retrieval(conversation_handle).await
        }
        .await;

        match retrieval {
            Ok(snippet) if !snippet.trim().is_empty() => {
                history.push(Message::user(format!(
                    "Context retrieved from documents attached to this thread:\n{snippet}"
                )));
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "document retrieval failed; answering without context");
            }
        }

        self.respond(history, request_type).await
    }

    /// Structured mode: extract issue tickets from a thread transcript.
    pub async fn extract_tickets(
        &self,
        transcript: &[Message],
    ) -> Result<Vec<IssueTicket>, SparrowAiError> {
        let rendered = transcript
            .iter()
            .map(|message| {
                let speaker = match message.role {
                    sparrow_ai::MessageRole::Assistant => "sparrow",
                    _ => "user",
                };
                format!("{speaker}: {}", message.text_content())
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                Message::system(
                    "Extract the actionable issue tickets discussed in this Slack thread. \
                     Produce one ticket per distinct request or problem.",
                ),
                Message::user(rendered),
            ],
        );
        let batch: TicketBatch =
            complete_structured(self.client.as_ref(), request, TICKET_SHAPE_HINT).await?;
        Ok(batch.tickets)
    }

    /// One-phrase title for a voice-memo transcript.
    pub async fn title_for_transcript(&self, transcript: &str) -> Option<String> {
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                Message::system("Your job is to create a single short phrase title for a voice memo."),
                Message::user(transcript),
            ],
        );
        match self.client.complete(request).await {
            Ok(response) => {
                let title = response.message.text_content().trim().to_string();
                (!title.is_empty()).then_some(title)
            }
            Err(error) => {
                tracing::warn!(%error, "transcript title generation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use sparrow_ai::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, SparrowAiError};
    use sparrow_index::{DocumentIndex, IndexError};

    use super::{Dispatcher, NO_RESPONSE_APOLOGY};
    use crate::{IssueType, RequestType, GENERAL_PROMPT, PROJECT_MANAGER_PROMPT};

    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, ()>>>,
        requests_seen: Arc<Mutex<Vec<ChatRequest>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<&str, ()>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|reply| reply.map(str::to_string))
                        .collect(),
                ),
                requests_seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, SparrowAiError> {
            self.requests_seen
                .lock()
                .expect("requests lock")
                .push(request);
            match self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or(Err(()))
            {
                Ok(reply) => Ok(ChatResponse {
                    message: Message::assistant(reply),
                    finish_reason: Some("stop".to_string()),
                    usage: ChatUsage::default(),
                }),
                Err(()) => Err(SparrowAiError::HttpStatus {
                    status: 500,
                    body: "scripted failure".to_string(),
                }),
            }
        }
    }

    struct StubIndex {
        snippet: Result<&'static str, ()>,
    }

    #[async_trait]
    impl DocumentIndex for StubIndex {
        async fn create_index(&self, _name: &str) -> Result<String, IndexError> {
            Ok("vs_stub".to_string())
        }

        async fn upload_document(
            &self,
            _file_name: &str,
            _bytes: Vec<u8>,
        ) -> Result<String, IndexError> {
            Ok("file_stub".to_string())
        }

        async fn attach_document(
            &self,
            _index_id: &str,
            _file_id: &str,
        ) -> Result<(), IndexError> {
            Ok(())
        }

        async fn create_conversation(&self) -> Result<String, IndexError> {
            Ok("th_stub".to_string())
        }

        async fn attach_index(
            &self,
            _conversation_id: &str,
            _index_id: &str,
        ) -> Result<(), IndexError> {
            Ok(())
        }

        async fn add_user_message(
            &self,
            _conversation_id: &str,
            _text: &str,
        ) -> Result<(), IndexError> {
            Ok(())
        }

        async fn run_retrieval(&self, conversation_id: &str) -> Result<String, IndexError> {
            self.snippet
                .map(str::to_string)
                .map_err(|()| IndexError::RunTimedOut {
                    run_id: format!("run-{conversation_id}"),
                    waited_ms: 42,
                })
        }
    }

    fn dispatcher(replies: Vec<Result<&str, ()>>) -> (Dispatcher, Arc<Mutex<Vec<ChatRequest>>>) {
        let client = ScriptedClient::new(replies);
        let requests_seen = client.requests_seen.clone();
        (
            Dispatcher::new(Arc::new(client), "stub-model"),
            requests_seen,
        )
    }

    #[tokio::test]
    async fn functional_direct_mode_prefixes_request_type_prompt() {
        let (dispatcher, requests_seen) = dispatcher(vec![Ok("happy to help")]);
        let reply = dispatcher
            .respond(
                vec![Message::user("the login is broken")],
                Some(RequestType::BugReport),
            )
            .await
            .expect("reply");

        assert_eq!(reply, "happy to help");
        let requests = requests_seen.lock().expect("requests lock");
        assert_eq!(requests[0].messages[0].text_content(), PROJECT_MANAGER_PROMPT);
    }

    #[tokio::test]
    async fn unit_unknown_request_type_uses_the_general_prompt() {
        let (dispatcher, requests_seen) = dispatcher(vec![Ok("hello")]);
        dispatcher
            .respond(vec![Message::user("hi sparrow")], None)
            .await
            .expect("reply");
        let requests = requests_seen.lock().expect("requests lock");
        assert_eq!(requests[0].messages[0].text_content(), GENERAL_PROMPT);
    }

    #[tokio::test]
    async fn functional_provider_failure_collapses_to_none_for_apology() {
        let (dispatcher, _requests) = dispatcher(vec![Err(())]);
        let reply = dispatcher
            .respond(vec![Message::user("hello")], None)
            .await;
        assert_eq!(reply, None);
        assert!(!NO_RESPONSE_APOLOGY.is_empty());
    }

    #[tokio::test]
    async fn functional_retrieval_mode_folds_snippet_into_history() {
        let (dispatcher, requests_seen) = dispatcher(vec![Ok("summarized answer")]);
        let index = StubIndex {
            snippet: Ok("the design doc says X"),
        };

        let reply = dispatcher
            .respond_with_retrieval(
                &index,
                "th_1",
                vec![Message::user("what does the doc say?")],
                None,
                "what does the doc say?",
            )
            .await
            .expect("reply");

        assert_eq!(reply, "summarized answer");
        let requests = requests_seen.lock().expect("requests lock");
        let folded = requests[0]
            .messages
            .iter()
            .any(|message| message.text_content().contains("the design doc says X"));
        assert!(folded, "retrieved snippet must appear as an extra user turn");
    }

    #[tokio::test]
    async fn regression_retrieval_timeout_degrades_to_direct_mode() {
        let (dispatcher, requests_seen) = dispatcher(vec![Ok("plain answer")]);
        let index = StubIndex { snippet: Err(()) };

        let reply = dispatcher
            .respond_with_retrieval(
                &index,
                "th_1",
                vec![Message::user("what does the doc say?")],
                None,
                "what does the doc say?",
            )
            .await
            .expect("reply");

        assert_eq!(reply, "plain answer");
        let requests = requests_seen.lock().expect("requests lock");
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn functional_ticket_extraction_parses_structured_batch() {
        let (dispatcher, _requests) = dispatcher(vec![Ok(
            "{\"tickets\":[{\"type\":\"new_feature\",\"summary\":\"dark mode\",\
             \"description\":\"users want a dark theme\",\"action_items\":[\"design pass\"]}]}",
        )]);

        let tickets = dispatcher
            .extract_tickets(&[
                Message::user("can we get dark mode?"),
                Message::assistant("sure, tell me more"),
            ])
            .await
            .expect("tickets");

        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].issue_type, IssueType::NewFeature);
        assert_eq!(tickets[0].summary, "dark mode");
    }
}
