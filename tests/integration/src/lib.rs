//! Shared fixtures for Sparrow cross-crate integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sparrow_ai::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, SparrowAiError};

/// Scripted chat client: pops one reply (or failure) per completion call and
/// records every request it sees.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    replies: Arc<Mutex<VecDeque<Result<String, u16>>>>,
    requests_seen: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Result<&str, u16>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(
                replies
                    .into_iter()
                    .map(|reply| reply.map(str::to_string))
                    .collect(),
            )),
            requests_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests_seen.lock().expect("requests lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.requests_seen.lock().expect("requests lock").len()
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
            .unwrap_or(Err(599))
        {
            Ok(reply) => Ok(ChatResponse {
                message: Message::assistant(reply),
                finish_reason: Some("stop".to_string()),
                usage: ChatUsage::default(),
            }),
            Err(status) => Err(SparrowAiError::HttpStatus {
                status,
                body: "scripted failure".to_string(),
            }),
        }
    }
}
