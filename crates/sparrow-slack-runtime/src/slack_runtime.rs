//! Socket Mode loop and event routing for the Sparrow Slack bot.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use sparrow_ai::{LlmClient, Message};
use sparrow_core::current_unix_timestamp_ms;
use sparrow_dispatch::{classify_request, Dispatcher, RequestType, NO_RESPONSE_APOLOGY};
use sparrow_index::DocumentIndex;
use sparrow_jira::JiraClient;
use sparrow_store::{SparrowStore, UserRecord};
use sparrow_voice::{SttProvider, TtsProvider, TtsRequest};

use crate::mrkdwn::render_mrkdwn;
use crate::slack_helpers::truncate_for_slack;

mod blocks;
mod file_pipeline;
mod slack_api_client;
mod slack_state_store;


pub use file_pipeline::{FileArtifact, FileKind, FilePipelineOutput};

use blocks::{issue_prompt_blocks, onboarding_message_blocks, onboarding_modal, ISSUE_PROMPT_TEXT};
use file_pipeline::FilePipeline;
use slack_api_client::SlackApiClient;
use slack_state_store::{JsonlEventLog, SlackBotStateStore};

const SLACK_STATE_SCHEMA_VERSION: u32 = 1;
const SLACK_MESSAGE_LIMIT_CHARS: usize = 38_000;
const TICKET_REACTION: &str = "ebl";

/// Message subtypes the router never responds to.
const IGNORED_MESSAGE_SUBTYPES: [&str; 5] = [
    "message_deleted",
    "message_changed",
    "channel_join",
    "bot_add",
    "bot_message",
];

#[derive(Clone)]
/// Runtime configuration for the Sparrow Slack bot loop.
pub struct SlackBotRuntimeConfig {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<SparrowStore>,
    pub document_index: Arc<dyn DocumentIndex>,
    pub stt: Arc<dyn SttProvider>,
    pub tts: Arc<dyn TtsProvider>,
    /// Multimodal client used for vision descriptions of image uploads.
    pub vision_client: Arc<dyn LlmClient>,
    pub vision_model: String,
    pub jira: Option<Arc<JiraClient>>,
    pub api_base: String,
    pub app_token: String,
    pub bot_token: String,
    /// User-scoped token required by the public-URL grant/revoke calls.
    pub user_token: String,
    pub bot_user_id: Option<String>,
    pub state_dir: PathBuf,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub processed_event_cap: usize,
    pub max_event_age_seconds: u64,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct SlackSocketEnvelope {
    envelope_id: String,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SlackEventFile {
    pub(crate) id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MessageEvent {
    key: String,
    channel_id: String,
    user_id: String,
    text: String,
    ts: String,
    thread_ts: Option<String>,
    files: Vec<SlackEventFile>,
    occurred_unix_ms: u64,
}

impl MessageEvent {
    /// Thread anchor: the reply thread for threaded messages, otherwise the
    /// message itself becomes the thread root.
    fn anchor_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(self.ts.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReactionEvent {
    key: String,
    reaction: String,
    channel_id: String,
    item_ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CommandEvent {
    key: String,
    command: String,
    text: String,
    user_id: String,
    channel_id: String,
    response_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockActionEvent {
    key: String,
    action_id: String,
    user_id: String,
    channel_id: String,
    container_message_ts: String,
    response_url: String,
    trigger_id: String,
}

#[derive(Debug, Clone, PartialEq)]
struct ViewSubmissionEvent {
    key: String,
    callback_id: String,
    user_id: String,
    values: Value,
}

#[derive(Debug, Clone, PartialEq)]
enum SparrowEvent {
    Message(MessageEvent),
    ReactionAdded(ReactionEvent),
    SlashCommand(CommandEvent),
    BlockAction(BlockActionEvent),
    ViewSubmission(ViewSubmissionEvent),
}

impl SparrowEvent {
    fn key(&self) -> &str {
        match self {
            SparrowEvent::Message(event) => &event.key,
            SparrowEvent::ReactionAdded(event) => &event.key,
            SparrowEvent::SlashCommand(event) => &event.key,
            SparrowEvent::BlockAction(event) => &event.key,
            SparrowEvent::ViewSubmission(event) => &event.key,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SparrowEvent::Message(_) => "message",
            SparrowEvent::ReactionAdded(_) => "reaction_added",
            SparrowEvent::SlashCommand(_) => "slash_command",
            SparrowEvent::BlockAction(_) => "block_action",
            SparrowEvent::ViewSubmission(_) => "view_submission",
        }
    }
}

/// Runs the Slack bot loop until interrupted.
pub async fn run_slack_bot(config: SlackBotRuntimeConfig) -> Result<()> {
    let mut runtime = SlackBotRuntime::new(config).await?;
    runtime.run().await
}

struct SlackBotRuntime {
    config: SlackBotRuntimeConfig,
    slack_client: SlackApiClient,
    state_store: SlackBotStateStore,
    inbound_log: JsonlEventLog,
    outbound_log: JsonlEventLog,
    bot_user_id: String,
}

impl SlackBotRuntime {
    async fn new(config: SlackBotRuntimeConfig) -> Result<Self> {
        let state_dir = config.state_dir.clone();
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("failed to create {}", state_dir.display()))?;

        let slack_client = SlackApiClient::new(
            config.api_base.clone(),
            config.app_token.clone(),
            config.bot_token.clone(),
            config.user_token.clone(),
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?;

        let bot_user_id = match config.bot_user_id.clone() {
            Some(user_id) if !user_id.trim().is_empty() => user_id.trim().to_string(),
            _ => slack_client.resolve_bot_user_id().await?,
        };

        let state_store =
            SlackBotStateStore::load(state_dir.join("state.json"), config.processed_event_cap)?;
        let inbound_log = JsonlEventLog::open(state_dir.join("inbound-events.jsonl"))?;
        let outbound_log = JsonlEventLog::open(state_dir.join("outbound-events.jsonl"))?;

        Ok(Self {
            config,
            slack_client,
            state_store,
            inbound_log,
            outbound_log,
            bot_user_id,
        })
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            let socket_url = match self.slack_client.open_socket_connection().await {
                Ok(url) => url,
                Err(error) => {
                    tracing::error!(%error, "failed to open socket connection");
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            tracing::info!("sparrow shutdown requested");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                    continue;
                }
            };

            tracing::info!("sparrow socket connected");
            if let Err(error) = self.run_socket_session(&socket_url).await {
                tracing::error!(%error, "socket session error");
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("sparrow shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn run_socket_session(&mut self, socket_url: &str) -> Result<()> {
        let (stream, _response) = connect_async(socket_url)
            .await
            .with_context(|| "failed to connect slack socket mode websocket")?;
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return Ok(());
                }
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(());
                    };
                    let message = message_result.context("failed reading slack websocket message")?;
                    let Some(envelope) = parse_socket_envelope(message)? else {
                        continue;
                    };
                    // Ack first: an unacked envelope is redelivered by Slack,
                    // and handling may take several provider round-trips.
                    self.ack_envelope(&mut sink, &envelope.envelope_id).await?;
                    if let Err(error) = self.handle_envelope(&envelope).await {
                        tracing::error!(
                            envelope_id = %envelope.envelope_id,
                            %error,
                            "event handling failed"
                        );
                    }
                }
            }
        }
    }

    async fn ack_envelope<S>(&self, sink: &mut S, envelope_id: &str) -> Result<()>
    where
        S: futures_util::Sink<WsMessage> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let ack = json!({ "envelope_id": envelope_id }).to_string();
        sink.send(WsMessage::Text(ack.into()))
            .await
            .context("failed to send slack socket ack")
    }

    async fn handle_envelope(&mut self, envelope: &SlackSocketEnvelope) -> Result<()> {
        let now_unix_ms = current_unix_timestamp_ms();
        let Some(event) = normalize_socket_envelope(envelope, &self.bot_user_id)? else {
            return Ok(());
        };
        self.handle_event(event, now_unix_ms).await
    }

    async fn handle_event(&mut self, event: SparrowEvent, now_unix_ms: u64) -> Result<()> {
        if self.state_store.contains(event.key()) {
            tracing::debug!(key = event.key(), "duplicate delivery skipped");
            return Ok(());
        }
        if self.state_store.mark_processed(event.key()) {
            self.state_store.save()?;
        }

        if let SparrowEvent::Message(message) = &event {
            if event_is_stale(message, self.config.max_event_age_seconds, now_unix_ms) {
                tracing::debug!(key = %message.key, "stale message skipped");
                return Ok(());
            }
        }

        self.inbound_log.append(&json!({
            "timestamp_unix_ms": now_unix_ms,
            "event_key": event.key(),
            "kind": event.kind(),
        }))?;

        match event {
            SparrowEvent::Message(message) => self.handle_message(message, now_unix_ms).await,
            SparrowEvent::ReactionAdded(reaction) => self.handle_reaction_added(reaction).await,
            SparrowEvent::SlashCommand(command) => self.handle_slash_command(command).await,
            SparrowEvent::BlockAction(action) => self.handle_block_action(action, now_unix_ms).await,
            SparrowEvent::ViewSubmission(view) => self.handle_view_submission(view, now_unix_ms),
        }
    }

    /// Routing: thread replies continue only where the bot already
    /// participates (or is mentioned); channel-root messages are classified
    /// first, and a PM-type request opens the issue prompt instead of a
    /// conversational reply. Everything else stays silent.
    async fn handle_message(&mut self, event: MessageEvent, now_unix_ms: u64) -> Result<()> {
        if event.user_id == self.bot_user_id {
            return Ok(());
        }

        let mention = format!("<@{}>", self.bot_user_id);
        let mentioned = event.text.contains(&mention);

        if event.thread_ts.is_some() {
            if mentioned {
                tracing::info!(channel = %event.channel_id, "handling threaded mention");
                return self.handle_direct_message(event, None).await;
            }
            if self
                .bot_already_in_thread(&event.channel_id, event.anchor_ts())
                .await?
            {
                tracing::info!(channel = %event.channel_id, "handling thread message");
                return self.handle_thread_message(event).await;
            }
            return Ok(());
        }

        let request_type = if event.text.trim().is_empty() {
            None
        } else {
            classify_request(
                self.config.dispatcher.client().as_ref(),
                self.config.dispatcher.model(),
                &event.text,
            )
            .await
        };
        tracing::info!(request_type = ?request_type, "classified channel message");

        if request_type.map(|tag| tag.is_pm_request()).unwrap_or(false) {
            return self.handle_pm_request(&event, now_unix_ms).await;
        }
        if mentioned {
            tracing::info!(channel = %event.channel_id, "handling direct message");
            return self.handle_direct_message(event, request_type).await;
        }

        Ok(())
    }

    async fn handle_direct_message(
        &mut self,
        event: MessageEvent,
        request_type: Option<RequestType>,
    ) -> Result<()> {
        let pipeline_output = self.ingest_attachments(&event).await;
        let history = vec![Message::user(format_user_message(
            &event.text,
            &self.bot_user_id,
            &pipeline_output.artifacts,
        ))];
        self.respond_in_thread(&event, history, &pipeline_output, request_type)
            .await
    }

    async fn handle_thread_message(&mut self, event: MessageEvent) -> Result<()> {
        let replies = self
            .slack_client
            .conversations_replies(&event.channel_id, event.anchor_ts())
            .await?;
        let mut history = Vec::new();
        for reply in &replies {
            let text = reply.text.clone().unwrap_or_default();
            if text.is_empty() || reply.ts.as_deref() == Some(event.ts.as_str()) {
                continue;
            }
            if reply.user.as_deref() == Some(self.bot_user_id.as_str()) {
                history.push(Message::assistant(text));
            } else {
                history.push(Message::user(text));
            }
        }

        let pipeline_output = self.ingest_attachments(&event).await;
        history.push(Message::user(format_user_message(
            &event.text,
            &self.bot_user_id,
            &pipeline_output.artifacts,
        )));
        self.respond_in_thread(&event, history, &pipeline_output, None)
            .await
    }

    async fn ingest_attachments(&self, event: &MessageEvent) -> FilePipelineOutput {
        if event.files.is_empty() {
            return FilePipelineOutput::default();
        }
        let pipeline = FilePipeline {
            slack_client: &self.slack_client,
            vision_client: &self.config.vision_client,
            vision_model: &self.config.vision_model,
            stt: &self.config.stt,
            index: &self.config.document_index,
            store: &self.config.store,
        };
        pipeline
            .process_files(
                &event.channel_id,
                event.anchor_ts(),
                &event.text,
                &event.files,
            )
            .await
    }

    async fn respond_in_thread(
        &mut self,
        event: &MessageEvent,
        history: Vec<Message>,
        pipeline_output: &FilePipelineOutput,
        request_type: Option<RequestType>,
    ) -> Result<()> {
        let record = self
            .config
            .store
            .find_thread(&event.channel_id, event.anchor_ts())?;

        let retrieval_handle = record.as_ref().and_then(|record| {
            (record.index_handle.is_some() && record.file_count > 0 || pipeline_output.indexed)
                .then(|| record.conversation_handle.clone())
                .flatten()
        });

        let user_text = strip_mention(&event.text, &self.bot_user_id);
        let reply = match retrieval_handle {
            Some(conversation_handle) => {
                self.config
                    .dispatcher
                    .respond_with_retrieval(
                        self.config.document_index.as_ref(),
                        &conversation_handle,
                        history,
                        request_type,
                        &user_text,
                    )
                    .await
            }
            None => self.config.dispatcher.respond(history, request_type).await,
        };

        // The bot always posts *something*, even when every provider failed.
        let body = match reply.as_deref() {
            Some(text) => render_mrkdwn(text),
            None => NO_RESPONSE_APOLOGY.to_string(),
        };
        let posted = self
            .slack_client
            .post_message(
                &event.channel_id,
                &truncate_for_slack(&body, SLACK_MESSAGE_LIMIT_CHARS),
                Some(event.anchor_ts()),
            )
            .await?;
        self.outbound_log.append(&json!({
            "timestamp_unix_ms": current_unix_timestamp_ms(),
            "event_key": event.key,
            "channel_id": posted.channel,
            "posted_ts": posted.ts,
            "status": if reply.is_some() { "replied" } else { "apologized" },
        }))?;

        if pipeline_output.speech_mode && reply.is_some() {
            self.upload_speech_reply(event, &body, pipeline_output).await;
        }

        Ok(())
    }

    /// Voice-memo niceties: synthesize the reply and upload it next to the
    /// text. Failures only log; the text reply already landed.
    async fn upload_speech_reply(
        &self,
        event: &MessageEvent,
        reply_text: &str,
        pipeline_output: &FilePipelineOutput,
    ) {
        let synthesized = match self
            .config
            .tts
            .synthesize(TtsRequest::new(reply_text))
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "speech synthesis failed");
                return;
            }
        };

        let transcript = pipeline_output
            .artifacts
            .iter()
            .find(|artifact| artifact.upload_type == "audio")
            .map(|artifact| artifact.content.as_str())
            .unwrap_or(reply_text);
        let title = self
            .config
            .dispatcher
            .title_for_transcript(transcript)
            .await
            .unwrap_or_else(|| "Sparrow reply".to_string());

        if let Err(error) = self
            .slack_client
            .upload_file_v2(
                &event.channel_id,
                Some(event.anchor_ts()),
                "sparrow-reply.mp3",
                &synthesized.audio_bytes,
                Some(&title),
            )
            .await
        {
            tracing::warn!(%error, "speech upload failed");
        }
    }

    async fn handle_pm_request(&mut self, event: &MessageEvent, now_unix_ms: u64) -> Result<()> {
        let ephemeral_ts = self
            .slack_client
            .post_ephemeral(
                &event.channel_id,
                &event.user_id,
                ISSUE_PROMPT_TEXT,
                &issue_prompt_blocks(),
            )
            .await?;
        self.config.store.put_prompt_context(
            &ephemeral_ts,
            &event.channel_id,
            &event.ts,
            now_unix_ms,
        )?;
        self.outbound_log.append(&json!({
            "timestamp_unix_ms": now_unix_ms,
            "event_key": event.key,
            "channel_id": event.channel_id,
            "kind": "issue_prompt",
            "ephemeral_ts": ephemeral_ts,
        }))?;
        Ok(())
    }

    async fn handle_reaction_added(&mut self, event: ReactionEvent) -> Result<()> {
        if event.reaction != TICKET_REACTION {
            return Ok(());
        }

        let replies = self
            .slack_client
            .conversations_replies(&event.channel_id, &event.item_ts)
            .await?;
        let transcript = replies
            .iter()
            .filter_map(|reply| {
                let text = reply.text.clone()?;
                if text.is_empty() {
                    return None;
                }
                if reply.user.as_deref() == Some(self.bot_user_id.as_str()) {
                    Some(Message::assistant(text))
                } else {
                    Some(Message::user(text))
                }
            })
            .collect::<Vec<_>>();

        let tickets = match self.config.dispatcher.extract_tickets(&transcript).await {
            Ok(tickets) => tickets,
            Err(error) => {
                tracing::error!(%error, "ticket extraction failed");
                self.slack_client
                    .post_message(&event.channel_id, NO_RESPONSE_APOLOGY, Some(&event.item_ts))
                    .await?;
                return Ok(());
            }
        };

        let mut lines = vec![format!("Extracted {} ticket(s) from this thread:", tickets.len())];
        for ticket in &tickets {
            lines.push(format!(
                "- [{}] *{}*: {}",
                ticket.issue_type.as_str(),
                ticket.summary,
                ticket.description
            ));
            if let Some(jira) = self.config.jira.as_ref() {
                match jira.create_issue(ticket).await {
                    Ok(created) => lines.push(format!("    filed as <{}|{}>", created.url, created.key)),
                    Err(error) => {
                        tracing::error!(%error, summary = %ticket.summary, "jira issue creation failed");
                        lines.push("    (couldn't file this one in Jira)".to_string());
                    }
                }
            }
        }

        self.slack_client
            .post_message(
                &event.channel_id,
                &truncate_for_slack(&lines.join("\n"), SLACK_MESSAGE_LIMIT_CHARS),
                Some(&event.item_ts),
            )
            .await?;
        Ok(())
    }

    async fn handle_slash_command(&mut self, event: CommandEvent) -> Result<()> {
        match event.command.as_str() {
            "/sparrow" => {
                let request = event.text.trim();
                if request.is_empty() {
                    self.slack_client
                        .respond(&event.response_url, "Usage: /sparrow <request>", false)
                        .await?;
                    return Ok(());
                }
                let reply = self
                    .config
                    .dispatcher
                    .respond(vec![Message::user(request.to_string())], None)
                    .await;
                let body = match reply.as_deref() {
                    Some(text) => render_mrkdwn(text),
                    None => NO_RESPONSE_APOLOGY.to_string(),
                };
                self.slack_client
                    .post_message(
                        &event.channel_id,
                        &truncate_for_slack(&body, SLACK_MESSAGE_LIMIT_CHARS),
                        None,
                    )
                    .await?;
            }
            "/opinion" => {
                let opinion = event.text.trim();
                let body = if opinion.is_empty() {
                    "Usage: /opinion <your opinion>".to_string()
                } else {
                    format!("Your opinion: {opinion}")
                };
                self.slack_client
                    .post_message(&event.channel_id, &body, None)
                    .await?;
            }
            "/learn" => {
                let posted = self
                    .slack_client
                    .post_message(
                        &event.channel_id,
                        &format!("<@{}> started a learning session!", event.user_id),
                        None,
                    )
                    .await?;
                self.slack_client
                    .post_message(
                        &event.channel_id,
                        "Could you tell me more about your project?",
                        Some(&posted.ts),
                    )
                    .await?;
            }
            "/onboard" => {
                self.slack_client
                    .post_message_with_blocks(
                        &event.channel_id,
                        "Welcome! Learn more about what we do and onboard with us.",
                        &onboarding_message_blocks(),
                    )
                    .await?;
            }
            other => {
                self.slack_client
                    .respond(
                        &event.response_url,
                        &format!("Unknown command {other}"),
                        false,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_block_action(
        &mut self,
        event: BlockActionEvent,
        now_unix_ms: u64,
    ) -> Result<()> {
        match event.action_id.as_str() {
            "create_jira_yes" => {
                let origin_ts = self
                    .config
                    .store
                    .take_prompt_context(&event.container_message_ts, now_unix_ms)?;
                match origin_ts {
                    Some(origin_ts) => {
                        self.slack_client
                            .post_message(
                                &event.channel_id,
                                &format!(
                                    "<@{}>, could you describe the request in more detail?",
                                    event.user_id
                                ),
                                Some(&origin_ts),
                            )
                            .await?;
                        self.slack_client
                            .respond(
                                &event.response_url,
                                "Great, let's discuss your request in the thread above!",
                                true,
                            )
                            .await?;
                    }
                    None => {
                        // Context expired or the process restarted since the
                        // prompt was posted.
                        self.slack_client
                            .respond(
                                &event.response_url,
                                "That prompt has expired. Mention me again if you'd like help!",
                                true,
                            )
                            .await?;
                    }
                }
            }
            "create_jira_no" => {
                self.slack_client
                    .respond(
                        &event.response_url,
                        &format!(
                            "No worries! If you need anything, just mention <@{}>.",
                            self.bot_user_id
                        ),
                        true,
                    )
                    .await?;
            }
            "start_onboarding" => {
                self.slack_client
                    .open_view(&event.trigger_id, &onboarding_modal())
                    .await?;
            }
            other => {
                tracing::warn!(action_id = other, "unhandled block action");
            }
        }
        Ok(())
    }

    fn handle_view_submission(&mut self, event: ViewSubmissionEvent, now_unix_ms: u64) -> Result<()> {
        if event.callback_id != "onboarding_modal" {
            tracing::warn!(callback_id = %event.callback_id, "unhandled view submission");
            return Ok(());
        }

        let name = view_input(&event.values, "customer_name_block", "customer_name");
        let company = view_input(&event.values, "company_name_block", "company_name");
        let email = view_input(&event.values, "email_block", "email");

        self.config.store.upsert_user(
            &UserRecord {
                slack_user_id: event.user_id.clone(),
                name: name.unwrap_or_default(),
                email: email.unwrap_or_default(),
                metadata: company.map(|company| json!({ "company": company })),
            },
            now_unix_ms,
        )?;
        tracing::info!(user_id = %event.user_id, "onboarding submission stored");
        Ok(())
    }

    async fn bot_already_in_thread(&self, channel_id: &str, thread_ts: &str) -> Result<bool> {
        let replies = self
            .slack_client
            .conversations_replies(channel_id, thread_ts)
            .await?;
        Ok(replies
            .iter()
            .any(|message| message.user.as_deref() == Some(self.bot_user_id.as_str())))
    }
}

fn view_input(values: &Value, block_id: &str, action_id: &str) -> Option<String> {
    values
        .get(block_id)
        .and_then(|block| block.get(action_id))
        .and_then(|input| input.get("value"))
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn strip_mention(text: &str, bot_user_id: &str) -> String {
    text.replace(&format!("<@{bot_user_id}>"), "")
        .trim()
        .to_string()
}

/// Renders the user turn: mention-stripped text plus any inline artifacts.
fn format_user_message(text: &str, bot_user_id: &str, artifacts: &[FileArtifact]) -> String {
    let mut message = strip_mention(text, bot_user_id);
    if !artifacts.is_empty() {
        message.push_str("\nUser uploaded file contents:\n");
        for artifact in artifacts {
            message.push_str(&format!("{}: {}\n", artifact.upload_type, artifact.content));
        }
    }
    message
}

fn parse_socket_envelope(message: WsMessage) -> Result<Option<SlackSocketEnvelope>> {
    match message {
        WsMessage::Text(text) => {
            let envelope = serde_json::from_str::<SlackSocketEnvelope>(&text)
                .context("failed to parse slack socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Binary(bytes) => {
            let text =
                String::from_utf8(bytes.to_vec()).context("invalid utf-8 slack socket payload")?;
            let envelope = serde_json::from_str::<SlackSocketEnvelope>(&text)
                .context("failed to parse slack socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(None),
        WsMessage::Close(_) => Ok(None),
        WsMessage::Frame(_) => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct SlackEventCallbackEnvelope {
    #[serde(rename = "type")]
    callback_type: String,
    #[serde(default)]
    event_time: u64,
    event: Value,
}

fn normalize_socket_envelope(
    envelope: &SlackSocketEnvelope,
    bot_user_id: &str,
) -> Result<Option<SparrowEvent>> {
    match envelope.envelope_type.as_str() {
        "events_api" => normalize_events_api_payload(envelope, bot_user_id),
        "slash_commands" => Ok(normalize_slash_command(envelope)),
        "interactive" => Ok(normalize_interactive_payload(envelope)),
        _ => Ok(None),
    }
}

fn normalize_events_api_payload(
    envelope: &SlackSocketEnvelope,
    bot_user_id: &str,
) -> Result<Option<SparrowEvent>> {
    let callback = serde_json::from_value::<SlackEventCallbackEnvelope>(envelope.payload.clone())
        .context("failed to decode slack event callback payload")?;
    if callback.callback_type != "event_callback" {
        return Ok(None);
    }

    let event = callback.event;
    let occurred_unix_ms = callback.event_time.saturating_mul(1000);
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

    match event_type {
        // `app_mention` is normalized into the same key space as `message`
        // so the duplicate delivery of a mention collapses in the dedupe
        // cache instead of producing two replies.
        "message" | "app_mention" => {
            if let Some(subtype) = event.get("subtype").and_then(Value::as_str) {
                if IGNORED_MESSAGE_SUBTYPES.contains(&subtype) {
                    return Ok(None);
                }
            }
            let Some(user_id) = non_empty_str(&event, "user") else {
                return Ok(None);
            };
            if user_id == bot_user_id {
                return Ok(None);
            }
            let Some(channel_id) = non_empty_str(&event, "channel") else {
                return Ok(None);
            };
            let Some(ts) = non_empty_str(&event, "ts") else {
                return Ok(None);
            };
            let files = event
                .get("files")
                .and_then(Value::as_array)
                .map(|files| {
                    files
                        .iter()
                        .filter_map(|file| non_empty_str(file, "id"))
                        .map(|id| SlackEventFile { id })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            Ok(Some(SparrowEvent::Message(MessageEvent {
                key: format!("message:{channel_id}:{ts}"),
                channel_id,
                user_id,
                text: event
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                ts,
                thread_ts: non_empty_str(&event, "thread_ts"),
                files,
                occurred_unix_ms,
            })))
        }
        "reaction_added" => {
            let Some(reaction) = non_empty_str(&event, "reaction") else {
                return Ok(None);
            };
            let Some(user_id) = non_empty_str(&event, "user") else {
                return Ok(None);
            };
            let item = event.get("item").cloned().unwrap_or_default();
            let Some(channel_id) = non_empty_str(&item, "channel") else {
                return Ok(None);
            };
            let Some(item_ts) = non_empty_str(&item, "ts") else {
                return Ok(None);
            };
            Ok(Some(SparrowEvent::ReactionAdded(ReactionEvent {
                key: format!("reaction:{channel_id}:{item_ts}:{reaction}:{user_id}"),
                reaction,
                channel_id,
                item_ts,
            })))
        }
        _ => Ok(None),
    }
}

fn normalize_slash_command(envelope: &SlackSocketEnvelope) -> Option<SparrowEvent> {
    let payload = &envelope.payload;
    let command = non_empty_str(payload, "command")?;
    let user_id = non_empty_str(payload, "user_id")?;
    let channel_id = non_empty_str(payload, "channel_id")?;
    Some(SparrowEvent::SlashCommand(CommandEvent {
        key: format!("command:{}", envelope.envelope_id),
        command,
        text: payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        user_id,
        channel_id,
        response_url: payload
            .get("response_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }))
}

fn normalize_interactive_payload(envelope: &SlackSocketEnvelope) -> Option<SparrowEvent> {
    let payload = &envelope.payload;
    let payload_type = payload.get("type").and_then(Value::as_str)?;
    let user_id = payload
        .get("user")
        .and_then(|user| user.get("id"))
        .and_then(Value::as_str)?
        .to_string();

    match payload_type {
        "block_actions" => {
            let action = payload.get("actions").and_then(|actions| actions.get(0))?;
            let action_id = non_empty_str(action, "action_id")?;
            let channel_id = payload
                .get("channel")
                .and_then(|channel| channel.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let container_message_ts = payload
                .get("container")
                .and_then(|container| container.get("message_ts"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(SparrowEvent::BlockAction(BlockActionEvent {
                key: format!("action:{}", envelope.envelope_id),
                action_id,
                user_id,
                channel_id,
                container_message_ts,
                response_url: payload
                    .get("response_url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                trigger_id: payload
                    .get("trigger_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }))
        }
        "view_submission" => {
            let view = payload.get("view")?;
            let callback_id = non_empty_str(view, "callback_id")?;
            let values = view
                .get("state")
                .and_then(|state| state.get("values"))
                .cloned()
                .unwrap_or_default();
            Some(SparrowEvent::ViewSubmission(ViewSubmissionEvent {
                key: format!("view:{}", envelope.envelope_id),
                callback_id,
                user_id,
                values,
            }))
        }
        _ => None,
    }
}

fn non_empty_str(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn event_is_stale(event: &MessageEvent, max_event_age_seconds: u64, now_unix_ms: u64) -> bool {
    if max_event_age_seconds == 0 {
        return false;
    }
    let max_age_ms = max_event_age_seconds.saturating_mul(1000);
    now_unix_ms.saturating_sub(event.occurred_unix_ms) > max_age_ms
}
