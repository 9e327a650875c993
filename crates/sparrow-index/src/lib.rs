//! External document-index (vectorstore) client for Sparrow.
//!
//! Wraps an assistants-style HTTP API: index and conversation lifecycle,
//! document registration, and retrieval runs polled under an explicit
//! deadline with capped exponential backoff.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::sleep;

const DEFAULT_INDEX_LIFESPAN_DAYS: u64 = 3;

#[derive(Debug, Error)]
/// Enumerates supported `IndexError` values.
pub enum IndexError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("index service returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("retrieval run {run_id} did not complete within {waited_ms}ms")]
    RunTimedOut { run_id: String, waited_ms: u64 },
    #[error("retrieval run {run_id} ended in terminal status {status}")]
    RunFailed { run_id: String, status: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Bounded-backoff polling policy for retrieval runs.
pub struct RunPollPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub deadline_ms: u64,
}

impl Default for RunPollPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 4_000,
            deadline_ms: 60_000,
        }
    }
}

impl RunPollPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let shift = attempt.min(6);
        self.initial_delay_ms
            .saturating_mul(1_u64 << shift)
            .min(self.max_delay_ms.max(1))
    }
}

#[async_trait]
/// Trait contract for `DocumentIndex` behavior.
pub trait DocumentIndex: Send + Sync {
    /// Creates a new document index, returning its opaque handle.
    async fn create_index(&self, name: &str) -> Result<String, IndexError>;

    /// Uploads raw document bytes, returning the provider file handle.
    async fn upload_document(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, IndexError>;

    /// Registers an uploaded document with an index.
    async fn attach_document(&self, index_id: &str, file_id: &str) -> Result<(), IndexError>;

    /// Creates a persistent provider-side conversation, returning its handle.
    async fn create_conversation(&self) -> Result<String, IndexError>;

    /// Points a conversation's retrieval tooling at an index.
    async fn attach_index(&self, conversation_id: &str, index_id: &str) -> Result<(), IndexError>;

    /// Appends a user turn to a conversation.
    async fn add_user_message(&self, conversation_id: &str, text: &str) -> Result<(), IndexError>;

    /// Starts a retrieval run, polls it to completion under the policy's
    /// deadline, and returns the assistant's retrieved answer text.
    async fn run_retrieval(&self, conversation_id: &str) -> Result<String, IndexError>;
}

#[derive(Debug, Clone)]
/// Public struct `DocumentIndexConfig` used across Sparrow components.
pub struct DocumentIndexConfig {
    pub api_base: String,
    pub api_key: String,
    pub assistant_id: String,
    pub index_lifespan_days: u64,
    pub request_timeout_ms: u64,
    pub poll: RunPollPolicy,
}

impl DocumentIndexConfig {
    pub fn new(api_key: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            assistant_id: assistant_id.into(),
            index_lifespan_days: DEFAULT_INDEX_LIFESPAN_DAYS,
            request_timeout_ms: 30_000,
            poll: RunPollPolicy::default(),
        }
    }
}

/// Assistants-API-backed `DocumentIndex` implementation.
pub struct HttpDocumentIndex {
    client: reqwest::Client,
    config: DocumentIndexConfig,
}

impl HttpDocumentIndex {
    pub fn new(config: DocumentIndexConfig) -> Result<Self, IndexError> {
        if config.api_key.trim().is_empty() {
            return Err(IndexError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| IndexError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        let mut normalized = config;
        normalized.api_base = normalized.api_base.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config: normalized,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, IndexError> {
        let response = self
            .client
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .await?;
        decode_json_response(response).await
    }

    async fn get_json(&self, path: &str) -> Result<Value, IndexError> {
        let response = self.client.get(self.url(path)).send().await?;
        decode_json_response(response).await
    }

    async fn poll_run(&self, conversation_id: &str, run_id: &str) -> Result<(), IndexError> {
        let policy = self.config.poll;
        let mut waited_ms: u64 = 0;
        let mut attempt: u32 = 0;

        loop {
            let run = self
                .get_json(&format!("/threads/{conversation_id}/runs/{run_id}"))
                .await?;
            let status = run
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            match status {
                "completed" => return Ok(()),
                "queued" | "in_progress" | "cancelling" => {}
                terminal => {
                    return Err(IndexError::RunFailed {
                        run_id: run_id.to_string(),
                        status: terminal.to_string(),
                    })
                }
            }

            let delay_ms = policy.delay_for_attempt(attempt);
            if waited_ms.saturating_add(delay_ms) > policy.deadline_ms {
                return Err(IndexError::RunTimedOut {
                    run_id: run_id.to_string(),
                    waited_ms,
                });
            }
            sleep(std::time::Duration::from_millis(delay_ms)).await;
            waited_ms = waited_ms.saturating_add(delay_ms);
            attempt = attempt.saturating_add(1);
        }
    }

    async fn latest_assistant_text(&self, conversation_id: &str) -> Result<String, IndexError> {
        let listing = self
            .get_json(&format!(
                "/threads/{conversation_id}/messages?order=desc&limit=8"
            ))
            .await?;
        let messages = listing
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                IndexError::InvalidResponse("message listing carries no data array".to_string())
            })?;

        for message in messages {
            if message.get("role").and_then(Value::as_str) != Some("assistant") {
                continue;
            }
            let Some(parts) = message.get("content").and_then(Value::as_array) else {
                continue;
            };
            let text = parts
                .iter()
                .filter_map(|part| {
                    part.get("text")
                        .and_then(|text| text.get("value"))
                        .and_then(Value::as_str)
                })
                .collect::<Vec<_>>()
                .join("\n");
            if !text.trim().is_empty() {
                return Ok(text);
            }
        }

        Err(IndexError::InvalidResponse(
            "retrieval run produced no assistant message".to_string(),
        ))
    }
}

#[async_trait]
impl DocumentIndex for HttpDocumentIndex {
    async fn create_index(&self, name: &str) -> Result<String, IndexError> {
        let payload = json!({
            "name": name,
            "expires_after": {
                "anchor": "last_active_at",
                "days": self.config.index_lifespan_days.max(1),
            },
        });
        let created = self.post_json("/vector_stores", &payload).await?;
        extract_id(&created, "vector store")
    }

    async fn upload_document(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, IndexError> {
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let response = self
            .client
            .post(self.url("/files"))
            .multipart(form)
            .send()
            .await?;
        let uploaded = decode_json_response(response).await?;
        extract_id(&uploaded, "file upload")
    }

    async fn attach_document(&self, index_id: &str, file_id: &str) -> Result<(), IndexError> {
        self.post_json(
            &format!("/vector_stores/{index_id}/files"),
            &json!({ "file_id": file_id }),
        )
        .await?;
        Ok(())
    }

    async fn create_conversation(&self) -> Result<String, IndexError> {
        let created = self.post_json("/threads", &json!({})).await?;
        extract_id(&created, "thread")
    }

    async fn attach_index(&self, conversation_id: &str, index_id: &str) -> Result<(), IndexError> {
        self.post_json(
            &format!("/threads/{conversation_id}"),
            &json!({
                "tool_resources": {
                    "file_search": { "vector_store_ids": [index_id] },
                },
            }),
        )
        .await?;
        Ok(())
    }

    async fn add_user_message(&self, conversation_id: &str, text: &str) -> Result<(), IndexError> {
        self.post_json(
            &format!("/threads/{conversation_id}/messages"),
            &json!({ "role": "user", "content": text }),
        )
        .await?;
        Ok(())
    }

    async fn run_retrieval(&self, conversation_id: &str) -> Result<String, IndexError> {
        let run = self
            .post_json(
                &format!("/threads/{conversation_id}/runs"),
                &json!({
                    "assistant_id": self.config.assistant_id,
                    "tools": [{ "type": "file_search" }],
                }),
            )
            .await?;
        let run_id = extract_id(&run, "run")?;

        tracing::debug!(conversation_id, %run_id, "polling retrieval run");
        self.poll_run(conversation_id, &run_id).await?;
        self.latest_assistant_text(conversation_id).await
    }
}

async fn decode_json_response(response: reqwest::Response) -> Result<Value, IndexError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(IndexError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}

fn extract_id(payload: &Value, operation: &str) -> Result<String, IndexError> {
    payload
        .get("id")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| IndexError::InvalidResponse(format!("{operation} response missing id")))
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{
        DocumentIndex, DocumentIndexConfig, HttpDocumentIndex, IndexError, RunPollPolicy,
    };

    fn test_index(base: &str, poll: RunPollPolicy) -> HttpDocumentIndex {
        let mut config = DocumentIndexConfig::new("sk-test", "asst_test");
        config.api_base = base.to_string();
        config.poll = poll;
        HttpDocumentIndex::new(config).expect("index client")
    }

    fn fast_poll() -> RunPollPolicy {
        RunPollPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 4,
            deadline_ms: 200,
        }
    }

    #[test]
    fn unit_poll_policy_backoff_is_capped() {
        let policy = RunPollPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            deadline_ms: 60_000,
        };
        assert_eq!(policy.delay_for_attempt(0), 100);
        assert_eq!(policy.delay_for_attempt(1), 200);
        assert_eq!(policy.delay_for_attempt(2), 400);
        assert_eq!(policy.delay_for_attempt(5), 1_000);
        assert_eq!(policy.delay_for_attempt(20), 1_000);
    }

    #[tokio::test]
    async fn functional_index_and_document_lifecycle_round_trips() {
        let server = MockServer::start();
        let create_store = server.mock(|when, then| {
            when.method(POST).path("/vector_stores");
            then.status(200).json_body(json!({ "id": "vs_1" }));
        });
        let upload = server.mock(|when, then| {
            when.method(POST).path("/files");
            then.status(200).json_body(json!({ "id": "file_1" }));
        });
        let attach = server.mock(|when, then| {
            when.method(POST).path("/vector_stores/vs_1/files");
            then.status(200).json_body(json!({ "id": "vsf_1" }));
        });

        let index = test_index(&server.base_url(), fast_poll());
        let index_id = index.create_index("sparrow-C1-10.0").await.expect("index");
        let file_id = index
            .upload_document("notes.md", b"hello".to_vec())
            .await
            .expect("upload");
        index
            .attach_document(&index_id, &file_id)
            .await
            .expect("attach");

        create_store.assert();
        upload.assert();
        attach.assert();
        assert_eq!(index_id, "vs_1");
        assert_eq!(file_id, "file_1");
    }

    #[tokio::test]
    async fn functional_retrieval_run_polls_until_completed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads/th_1/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path("/threads/th_1/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "completed" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/th_1/messages");
            then.status(200).json_body(json!({
                "data": [{
                    "role": "assistant",
                    "content": [{ "type": "text", "text": { "value": "retrieved snippet" } }],
                }],
            }));
        });

        let index = test_index(&server.base_url(), fast_poll());
        let snippet = index.run_retrieval("th_1").await.expect("retrieval");

        poll.assert();
        assert_eq!(snippet, "retrieved snippet");
    }

    #[tokio::test]
    async fn regression_run_that_never_completes_times_out_at_deadline() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads/th_1/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/th_1/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "in_progress" }));
        });

        let index = test_index(
            &server.base_url(),
            RunPollPolicy {
                initial_delay_ms: 2,
                max_delay_ms: 8,
                deadline_ms: 20,
            },
        );
        let error = index.run_retrieval("th_1").await.expect_err("deadline");

        assert!(matches!(error, IndexError::RunTimedOut { .. }));
    }

    #[tokio::test]
    async fn regression_failed_run_status_is_terminal_not_retried() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads/th_1/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path("/threads/th_1/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "failed" }));
        });

        let index = test_index(&server.base_url(), fast_poll());
        let error = index.run_retrieval("th_1").await.expect_err("failed run");

        poll.assert_hits(1);
        assert!(matches!(
            error,
            IndexError::RunFailed { ref status, .. } if status == "failed"
        ));
    }
}
