//! CLI argument model and client wiring for the `sparrow` binary.
//!
//! Configuration is environment-first: every flag carries an `env` attribute
//! so deployments configure the bot the way the hosting platform expects.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use sparrow_ai::{
    AnthropicClient, AnthropicConfig, ClientRoute, FallbackClient, LlmClient, ModelRef,
    OpenAiClient, OpenAiConfig, Provider,
};

#[derive(Debug, Parser)]
#[command(name = "sparrow", about = "Slack assistant bridging chat to LLM providers", version)]
/// Public struct `Cli` used across Sparrow components.
pub struct Cli {
    #[arg(
        long,
        env = "SLACK_APP_TOKEN",
        help = "App-level token (xapp-...) used to open Socket Mode connections"
    )]
    pub slack_app_token: String,

    #[arg(
        long,
        env = "SLACK_BOT_TOKEN",
        help = "Bot token (xoxb-...) used for Web API calls"
    )]
    pub slack_bot_token: String,

    #[arg(
        long,
        env = "SLACK_USER_TOKEN",
        help = "User token (xoxp-...) required by public file URL grant/revoke"
    )]
    pub slack_user_token: String,

    #[arg(
        long,
        env = "SLACK_API_BASE",
        default_value = "https://slack.com/api",
        help = "Slack Web API base URL"
    )]
    pub slack_api_base: String,

    #[arg(
        long,
        env = "SPARROW_MODEL",
        default_value = "groq/llama3-70b-8192",
        help = "Primary chat model in provider/model format (openai, anthropic, groq, together)"
    )]
    pub model: String,

    #[arg(
        long,
        env = "SPARROW_FALLBACK_MODEL",
        default_value = "openai/gpt-4-turbo",
        help = "Designated fallback model tried once after a primary provider failure"
    )]
    pub fallback_model: String,

    #[arg(
        long,
        env = "SPARROW_VISION_MODEL",
        default_value = "claude-3-haiku-20240307",
        help = "Anthropic multimodal model used for image descriptions"
    )]
    pub vision_model: String,

    #[arg(long, env = "OPENAI_API_KEY", help = "OpenAI API key (chat, voice, document index)")]
    pub openai_api_key: String,

    #[arg(long, env = "ANTHROPIC_API_KEY", help = "Anthropic API key (chat, vision)")]
    pub anthropic_api_key: String,

    #[arg(long, env = "GROQ_API_KEY", help = "Groq API key")]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "TOGETHER_API_KEY", help = "Together API key")]
    pub together_api_key: Option<String>,

    #[arg(
        long,
        env = "SPARROW_ASSISTANT_ID",
        help = "Assistant id used for document-index retrieval runs"
    )]
    pub assistant_id: Option<String>,

    #[arg(
        long,
        env = "SPARROW_STATE_DIR",
        default_value = "sparrow-state",
        help = "Directory holding the event state file, logs, and database"
    )]
    pub state_dir: std::path::PathBuf,

    #[arg(long, env = "JIRA_INSTANCE_URL", help = "Jira instance base URL")]
    pub jira_instance_url: Option<String>,

    #[arg(long, env = "JIRA_USERNAME", help = "Jira account email")]
    pub jira_username: Option<String>,

    #[arg(long, env = "JIRA_API_TOKEN", help = "Jira API token")]
    pub jira_api_token: Option<String>,

    #[arg(
        long,
        env = "JIRA_PROJECT_KEY",
        default_value = "SPRW",
        help = "Project key new issues are filed under"
    )]
    pub jira_project_key: String,

    #[arg(
        long,
        env = "SPARROW_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        help = "Per-request timeout for outbound HTTP calls"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long,
        env = "SPARROW_MAX_RETRIES",
        default_value_t = 2,
        help = "Retry attempts for retryable provider and Slack API failures"
    )]
    pub max_retries: usize,

    #[arg(
        long,
        env = "SPARROW_RETRY_BASE_DELAY_MS",
        default_value_t = 200,
        help = "Base delay for exponential retry backoff"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long,
        env = "SPARROW_PROCESSED_EVENT_CAP",
        default_value_t = 1_024,
        help = "Cap on remembered processed-event keys"
    )]
    pub processed_event_cap: usize,

    #[arg(
        long,
        env = "SPARROW_MAX_EVENT_AGE_SECONDS",
        default_value_t = 3_600,
        help = "Events older than this are dropped instead of answered"
    )]
    pub max_event_age_seconds: u64,

    #[arg(
        long,
        env = "SPARROW_RECONNECT_DELAY_MS",
        default_value_t = 5_000,
        help = "Delay before reopening a dropped Socket Mode connection"
    )]
    pub reconnect_delay_ms: u64,
}

impl Cli {
    fn api_key_for(&self, provider: Provider) -> Result<String> {
        let key = match provider {
            Provider::OpenAi => Some(self.openai_api_key.clone()),
            Provider::Anthropic => Some(self.anthropic_api_key.clone()),
            Provider::Groq => self.groq_api_key.clone(),
            Provider::Together => self.together_api_key.clone(),
        };
        match key {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!("no API key configured for provider '{provider}'"),
        }
    }
}

/// Builds the concrete client for one provider route.
pub fn build_chat_client(cli: &Cli, provider: Provider) -> Result<Arc<dyn LlmClient>> {
    let api_key = cli.api_key_for(provider)?;
    let client: Arc<dyn LlmClient> = match provider {
        Provider::Anthropic => Arc::new(
            AnthropicClient::new(AnthropicConfig {
                api_base: provider.default_api_base().to_string(),
                api_key,
                request_timeout_ms: cli.request_timeout_ms,
                max_retries: cli.max_retries,
                retry_jitter: true,
            })
            .with_context(|| format!("failed to create {provider} client"))?,
        ),
        Provider::OpenAi | Provider::Groq | Provider::Together => Arc::new(
            OpenAiClient::new(OpenAiConfig {
                api_base: provider.default_api_base().to_string(),
                api_key,
                request_timeout_ms: cli.request_timeout_ms,
                max_retries: cli.max_retries,
                retry_jitter: true,
            })
            .with_context(|| format!("failed to create {provider} client"))?,
        ),
    };
    Ok(client)
}

/// Primary route plus the single designated fallback route.
pub fn build_dispatch_client(cli: &Cli) -> Result<(Arc<dyn LlmClient>, ModelRef)> {
    let primary = ModelRef::parse(&cli.model)
        .with_context(|| format!("failed to parse --model '{}'", cli.model))?;
    let fallback = ModelRef::parse(&cli.fallback_model)
        .with_context(|| format!("failed to parse --fallback-model '{}'", cli.fallback_model))?;

    let primary_client = build_chat_client(cli, primary.provider)?;
    let fallback_client = build_chat_client(cli, fallback.provider)?;

    let routed = FallbackClient::new(
        ClientRoute {
            label: primary.provider.to_string(),
            model: primary.model.clone(),
            client: primary_client,
        },
        ClientRoute {
            label: fallback.provider.to_string(),
            model: fallback.model.clone(),
            client: fallback_client,
        },
    )
    .with_event_sink(Arc::new(|event| {
        tracing::warn!(event = %event, "provider fallback engaged");
    }));

    Ok((Arc::new(routed), primary))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    fn base_args() -> Vec<&'static str> {
        vec![
            "sparrow",
            "--slack-app-token",
            "xapp-1",
            "--slack-bot-token",
            "xoxb-1",
            "--slack-user-token",
            "xoxp-1",
            "--openai-api-key",
            "sk-openai",
            "--anthropic-api-key",
            "sk-ant",
        ]
    }

    #[test]
    fn unit_cli_defaults_are_populated() {
        let cli = Cli::try_parse_from(base_args()).expect("parse");
        assert_eq!(cli.model, "groq/llama3-70b-8192");
        assert_eq!(cli.fallback_model, "openai/gpt-4-turbo");
        assert_eq!(cli.slack_api_base, "https://slack.com/api");
        assert_eq!(cli.max_retries, 2);
        assert!(cli.jira_instance_url.is_none());
    }

    #[test]
    fn unit_missing_provider_key_is_an_error() {
        let cli = Cli::try_parse_from(base_args()).expect("parse");
        assert!(super::build_chat_client(&cli, sparrow_ai::Provider::Groq).is_err());
        assert!(super::build_chat_client(&cli, sparrow_ai::Provider::OpenAi).is_ok());
    }
}
