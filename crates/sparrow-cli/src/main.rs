use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use sparrow_cli::{build_chat_client, build_dispatch_client, Cli};
use sparrow_dispatch::Dispatcher;
use sparrow_index::{DocumentIndex, DocumentIndexConfig, HttpDocumentIndex};
use sparrow_jira::{JiraClient, JiraConfig};
use sparrow_slack_runtime::{run_slack_bot, SlackBotRuntimeConfig};
use sparrow_store::SparrowStore;
use sparrow_voice::{OpenAiVoiceConfig, OpenAiVoiceProvider};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let (chat_client, primary) = build_dispatch_client(&cli)?;
    let dispatcher = Arc::new(Dispatcher::new(chat_client, primary.model.clone()));

    let vision_client = build_chat_client(&cli, sparrow_ai::Provider::Anthropic)?;

    let store = Arc::new(
        SparrowStore::open(cli.state_dir.join("sparrow.db")).context("failed to open store")?,
    );

    let mut index_config = DocumentIndexConfig::new(
        cli.openai_api_key.clone(),
        cli.assistant_id.clone().unwrap_or_default(),
    );
    index_config.request_timeout_ms = cli.request_timeout_ms;
    let document_index: Arc<dyn DocumentIndex> = Arc::new(
        HttpDocumentIndex::new(index_config).context("failed to create document index client")?,
    );

    let voice = Arc::new(
        OpenAiVoiceProvider::new(OpenAiVoiceConfig {
            api_key: cli.openai_api_key.clone(),
            timeout_ms: cli.request_timeout_ms,
            ..OpenAiVoiceConfig::default()
        })
        .context("failed to create voice provider")?,
    );

    let jira = build_jira_client(&cli)?;

    let config = SlackBotRuntimeConfig {
        dispatcher,
        store,
        document_index,
        stt: voice.clone(),
        tts: voice,
        vision_client,
        vision_model: cli.vision_model.clone(),
        jira,
        api_base: cli.slack_api_base.clone(),
        app_token: cli.slack_app_token.clone(),
        bot_token: cli.slack_bot_token.clone(),
        user_token: cli.slack_user_token.clone(),
        bot_user_id: None,
        state_dir: cli.state_dir.clone(),
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.max_retries.max(1),
        retry_base_delay_ms: cli.retry_base_delay_ms,
        processed_event_cap: cli.processed_event_cap,
        max_event_age_seconds: cli.max_event_age_seconds,
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
    };

    tracing::info!(model = %cli.model, fallback = %cli.fallback_model, "starting sparrow");
    run_slack_bot(config).await
}

fn build_jira_client(cli: &Cli) -> Result<Option<Arc<JiraClient>>> {
    let (Some(instance_url), Some(username), Some(api_token)) = (
        cli.jira_instance_url.clone(),
        cli.jira_username.clone(),
        cli.jira_api_token.clone(),
    ) else {
        tracing::info!("jira credentials not configured; ticket filing disabled");
        return Ok(None);
    };

    let client = JiraClient::new(JiraConfig {
        instance_url,
        username,
        api_token,
        project_key: cli.jira_project_key.clone(),
        request_timeout_ms: cli.request_timeout_ms,
    })
    .context("failed to create jira client")?;
    Ok(Some(Arc::new(client)))
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
