use serde::de::DeserializeOwned;

use crate::{ChatRequest, LlmClient, Message, SparrowAiError};

/// Schema-validated completion: forces JSON output shaped by `shape_hint`
/// and deserializes it into `T`.
///
/// A malformed payload earns one corrective re-ask before the error is
/// surfaced to the caller.
pub async fn complete_structured<T: DeserializeOwned>(
    client: &dyn LlmClient,
    request: ChatRequest,
    shape_hint: &str,
) -> Result<T, SparrowAiError> {
    let mut shaped = request;
    shaped.json_mode = true;
    shaped.messages.insert(
        0,
        Message::system(format!(
            "Respond with a single JSON object matching exactly this shape:\n{shape_hint}"
        )),
    );

    let response = client.complete(shaped.clone()).await?;
    let raw = response.message.text_content();
    match parse_json_payload::<T>(&raw) {
        Ok(value) => Ok(value),
        Err(parse_error) => {
            tracing::debug!(%parse_error, "structured payload malformed, re-asking once");
            shaped.messages.push(Message::assistant(raw));
            shaped.messages.push(Message::user(format!(
                "That was not valid JSON for the requested shape ({parse_error}). \
                 Respond again with only the JSON object."
            )));
            let retried = client.complete(shaped).await?;
            parse_json_payload::<T>(&retried.message.text_content()).map_err(|error| {
                SparrowAiError::InvalidResponse(format!(
                    "structured completion did not match declared shape: {error}"
                ))
            })
        }
    }
}

fn parse_json_payload<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str::<T>(strip_code_fences(raw))
}

/// Models occasionally wrap JSON in markdown fences despite instructions.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let without_lang = without_open
        .split_once('\n')
        .map(|(_, rest)| rest)
        .unwrap_or(without_open);
    without_lang.strip_suffix("```").unwrap_or(without_lang).trim()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde::Deserialize;

    use super::{complete_structured, strip_code_fences};
    use crate::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, SparrowAiError};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        label: String,
        score: u32,
    }

    struct ScriptedClient {
        replies: Mutex<VecDeque<String>>,
        requests_seen: Arc<Mutex<Vec<ChatRequest>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
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
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_default();
            Ok(ChatResponse {
                message: Message::assistant(reply),
                finish_reason: Some("stop".to_string()),
                usage: ChatUsage::default(),
            })
        }
    }

    fn test_request() -> ChatRequest {
        ChatRequest::new("stub-model", vec![Message::user("classify this")])
    }

    #[test]
    fn unit_strip_code_fences_handles_fenced_and_bare_payloads() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn functional_structured_completion_parses_first_reply() {
        let client = ScriptedClient::new(vec!["{\"label\":\"bug_report\",\"score\":9}"]);
        let verdict: Verdict = complete_structured(
            &client,
            test_request(),
            "{\"label\": string, \"score\": integer}",
        )
        .await
        .expect("structured parse");

        assert_eq!(
            verdict,
            Verdict {
                label: "bug_report".to_string(),
                score: 9
            }
        );
        let requests = client.requests_seen.lock().expect("requests lock");
        assert_eq!(requests.len(), 1);
        assert!(requests[0].json_mode);
    }

    #[tokio::test]
    async fn functional_malformed_payload_is_re_asked_once() {
        let client = ScriptedClient::new(vec![
            "sorry, here you go: label bug",
            "{\"label\":\"bug_report\",\"score\":3}",
        ]);
        let verdict: Verdict = complete_structured(
            &client,
            test_request(),
            "{\"label\": string, \"score\": integer}",
        )
        .await
        .expect("second attempt should parse");

        assert_eq!(verdict.label, "bug_report");
        assert_eq!(
            client.requests_seen.lock().expect("requests lock").len(),
            2
        );
    }

    #[tokio::test]
    async fn regression_two_malformed_payloads_surface_invalid_response() {
        let client = ScriptedClient::new(vec!["not json", "still not json"]);
        let error = complete_structured::<Verdict>(
            &client,
            test_request(),
            "{\"label\": string, \"score\": integer}",
        )
        .await
        .expect_err("should fail after re-ask");

        assert!(matches!(error, SparrowAiError::InvalidResponse(_)));
    }
}
