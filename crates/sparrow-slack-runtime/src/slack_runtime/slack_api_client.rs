//! Slack Web API client helpers used by the Sparrow runtime flows.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::slack_helpers::{
    is_retryable_slack_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

#[derive(Debug, Clone, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    #[serde(default)]
    message_ts: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackRepliesResponse {
    ok: bool,
    #[serde(default)]
    messages: Vec<SlackHistoryMessage>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct SlackHistoryMessage {
    #[serde(default)]
    pub(super) user: Option<String>,
    #[serde(default)]
    pub(super) text: Option<String>,
    #[serde(default)]
    pub(super) ts: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackFileInfoResponse {
    ok: bool,
    file: Option<SlackFileInfo>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct SlackFileInfo {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: Option<String>,
    #[serde(default)]
    pub(super) filetype: Option<String>,
    #[serde(default)]
    pub(super) mimetype: Option<String>,
    #[serde(default)]
    pub(super) url_private: Option<String>,
    #[serde(default)]
    pub(super) permalink_public: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOkResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackGetUploadUrlExternalResponse {
    ok: bool,
    upload_url: Option<String>,
    file_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub(super) struct SlackPostedMessage {
    pub(super) channel: String,
    pub(super) ts: String,
}

#[derive(Clone)]
pub(super) struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
    user_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub(super) fn new(
        api_base: String,
        app_token: String,
        bot_token: String,
        user_token: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("Sparrow-slack-bot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_token: app_token.trim().to_string(),
            bot_token: bot_token.trim().to_string(),
            user_token: user_token.trim().to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    pub(super) async fn resolve_bot_user_id(&self) -> Result<String> {
        let response: SlackAuthTestResponse = self
            .request_json("auth.test", || {
                self.http
                    .post(format!("{}/auth.test", self.api_base))
                    .bearer_auth(&self.bot_token)
            })
            .await?;

        if !response.ok {
            bail!(
                "slack auth.test failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }

        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))
    }

    pub(super) async fn open_socket_connection(&self) -> Result<String> {
        let response: SlackOpenSocketResponse = self
            .request_json("apps.connections.open", || {
                self.http
                    .post(format!("{}/apps.connections.open", self.api_base))
                    .bearer_auth(&self.app_token)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack apps.connections.open failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack apps.connections.open did not return url"))
    }

    pub(super) async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<SlackPostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;

        if !response.ok {
            bail!(
                "slack chat.postMessage failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }

        Ok(SlackPostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    pub(super) async fn post_message_with_blocks(
        &self,
        channel: &str,
        text: &str,
        blocks: &Value,
    ) -> Result<SlackPostedMessage> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "blocks": blocks,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack chat.postMessage failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(SlackPostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    /// Posts the yes/no issue prompt visible only to the triggering user.
    /// Returns the ephemeral message ts used for context correlation.
    pub(super) async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        blocks: &Value,
    ) -> Result<String> {
        let payload = json!({
            "channel": channel,
            "user": user,
            "text": text,
            "blocks": blocks,
        });
        let response: SlackChatMessageResponse = self
            .request_json("chat.postEphemeral", || {
                self.http
                    .post(format!("{}/chat.postEphemeral", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack chat.postEphemeral failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .message_ts
            .or(response.ts)
            .ok_or_else(|| anyhow!("slack chat.postEphemeral response missing message_ts"))
    }

    pub(super) async fn conversations_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Vec<SlackHistoryMessage>> {
        let response: SlackRepliesResponse = self
            .request_json("conversations.replies", || {
                self.http
                    .get(format!("{}/conversations.replies", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .query(&[("channel", channel), ("ts", ts)])
            })
            .await?;
        if !response.ok {
            bail!(
                "slack conversations.replies failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(response.messages)
    }

    pub(super) async fn file_info(&self, file_id: &str) -> Result<SlackFileInfo> {
        let response: SlackFileInfoResponse = self
            .request_json("files.info", || {
                self.http
                    .get(format!("{}/files.info", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .query(&[("file", file_id)])
            })
            .await?;
        if !response.ok {
            bail!(
                "slack files.info failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .file
            .ok_or_else(|| anyhow!("slack files.info response missing file"))
    }

    /// Grants temporary public access to a hosted file. Requires the user
    /// token; the grant must be paired with `revoke_public_url`.
    pub(super) async fn share_public_url(&self, file_id: &str) -> Result<()> {
        let response: SlackOkResponse = self
            .request_json("files.sharedPublicURL", || {
                self.http
                    .post(format!("{}/files.sharedPublicURL", self.api_base))
                    .bearer_auth(&self.user_token)
                    .json(&json!({ "file": file_id }))
            })
            .await?;
        if !response.ok {
            let error = response.error.unwrap_or_else(|| "unknown error".to_string());
            // Slack reports an already-public file as an error; treat as granted.
            if error != "already_public" {
                bail!("slack files.sharedPublicURL failed: {error}");
            }
        }
        Ok(())
    }

    pub(super) async fn revoke_public_url(&self, file_id: &str) -> Result<()> {
        let response: SlackOkResponse = self
            .request_json("files.revokePublicURL", || {
                self.http
                    .post(format!("{}/files.revokePublicURL", self.api_base))
                    .bearer_auth(&self.user_token)
                    .json(&json!({ "file": file_id }))
            })
            .await?;
        if !response.ok {
            bail!(
                "slack files.revokePublicURL failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    pub(super) async fn upload_file_v2(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        filename: &str,
        bytes: &[u8],
        initial_comment: Option<&str>,
    ) -> Result<()> {
        if filename.trim().is_empty() {
            bail!("slack files upload requires non-empty filename");
        }
        let file_size = bytes.len();
        if file_size == 0 {
            bail!("slack files upload requires non-empty payload");
        }

        let get_upload: SlackGetUploadUrlExternalResponse = self
            .request_json("files.getUploadURLExternal", || {
                self.http
                    .post(format!("{}/files.getUploadURLExternal", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&json!({
                        "filename": filename,
                        "length": file_size,
                    }))
            })
            .await?;
        if !get_upload.ok {
            bail!(
                "slack files.getUploadURLExternal failed: {}",
                get_upload
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let upload_url = get_upload
            .upload_url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack files.getUploadURLExternal missing upload_url"))?;
        let file_id = get_upload
            .file_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack files.getUploadURLExternal missing file_id"))?;

        let upload_response = self
            .http
            .post(upload_url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/octet-stream",
            )
            .body(bytes.to_vec())
            .send()
            .await
            .context("failed to upload file payload to slack external upload URL")?;
        if !upload_response.status().is_success() {
            let status = upload_response.status();
            let body = upload_response.text().await.unwrap_or_default();
            bail!(
                "slack external upload failed: status={} body={}",
                status,
                truncate_for_error(&body, 320)
            );
        }

        let mut complete_payload = json!({
            "files": [{ "id": file_id, "title": filename }],
            "channel_id": channel,
        });
        if let Some(thread_ts) = thread_ts.map(str::trim).filter(|value| !value.is_empty()) {
            complete_payload["thread_ts"] = Value::String(thread_ts.to_string());
        }
        if let Some(initial_comment) = initial_comment
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            complete_payload["initial_comment"] = Value::String(initial_comment.to_string());
        }

        let complete: SlackOkResponse = self
            .request_json("files.completeUploadExternal", || {
                self.http
                    .post(format!("{}/files.completeUploadExternal", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&complete_payload)
            })
            .await?;
        if !complete.ok {
            bail!(
                "slack files.completeUploadExternal failed: {}",
                complete
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }

        Ok(())
    }

    pub(super) async fn open_view(&self, trigger_id: &str, view: &Value) -> Result<()> {
        let response: SlackOkResponse = self
            .request_json("views.open", || {
                self.http
                    .post(format!("{}/views.open", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&json!({ "trigger_id": trigger_id, "view": view }))
            })
            .await?;
        if !response.ok {
            bail!(
                "slack views.open failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    /// Replies through an interaction/command response_url.
    pub(super) async fn respond(
        &self,
        response_url: &str,
        text: &str,
        delete_original: bool,
    ) -> Result<()> {
        let payload = json!({
            "text": text,
            "response_type": "ephemeral",
            "delete_original": delete_original,
        });
        let response = self
            .http
            .post(response_url)
            .json(&payload)
            .send()
            .await
            .context("failed to post to slack response_url")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                "slack response_url post failed: status={} body={}",
                status,
                truncate_for_error(&body, 320)
            );
        }
        Ok(())
    }

    pub(super) async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.bot_token)
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.bytes().await?.to_vec());
                    }
                    let retry_after = parse_retry_after(response.headers());
                    if attempt < self.retry_max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    bail!("slack file download failed with status {}", status.as_u16());
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error).context("slack file download request failed");
                }
            }
        }
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header(
                    "x-sparrow-retry-attempt",
                    attempt.saturating_sub(1).to_string(),
                )
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed = response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode slack {operation}"))?;
                        return Ok(parsed);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "slack api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("slack api {operation} request failed"));
                }
            }
        }
    }
}
