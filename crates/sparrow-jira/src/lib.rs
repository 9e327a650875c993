//! Issue-tracker REST client: turns extracted tickets into Jira issues.

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use sparrow_dispatch::{IssueTicket, IssueType};

#[derive(Debug, Error)]
/// Enumerates supported `JiraError` values.
pub enum JiraError {
    #[error("jira configuration incomplete: {0}")]
    IncompleteConfig(&'static str),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("jira returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
/// Public struct `JiraConfig` used across Sparrow components.
pub struct JiraConfig {
    pub instance_url: String,
    pub username: String,
    pub api_token: String,
    pub project_key: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Key and browse URL of a created issue.
pub struct CreatedIssue {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct JiraCreateResponse {
    key: String,
}

#[derive(Debug, Clone)]
/// Public struct `JiraClient` used across Sparrow components.
pub struct JiraClient {
    http: reqwest::Client,
    config: JiraConfig,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Result<Self, JiraError> {
        if config.instance_url.trim().is_empty() {
            return Err(JiraError::IncompleteConfig("instance_url"));
        }
        if config.username.trim().is_empty() {
            return Err(JiraError::IncompleteConfig("username"));
        }
        if config.api_token.trim().is_empty() {
            return Err(JiraError::IncompleteConfig("api_token"));
        }
        if config.project_key.trim().is_empty() {
            return Err(JiraError::IncompleteConfig("project_key"));
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        let mut normalized = config;
        normalized.instance_url = normalized
            .instance_url
            .trim()
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            config: normalized,
        })
    }

    /// Creates one Jira issue from an extracted ticket.
    pub async fn create_issue(&self, ticket: &IssueTicket) -> Result<CreatedIssue, JiraError> {
        let description = render_issue_description(ticket);
        let payload = json!({
            "fields": {
                "project": { "key": self.config.project_key },
                "summary": ticket.summary,
                "description": description,
                "issuetype": { "name": jira_issue_type_name(ticket.issue_type) },
            },
        });

        let response = self
            .http
            .post(format!("{}/rest/api/2/issue", self.config.instance_url))
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(JiraError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let created: JiraCreateResponse = serde_json::from_str(&body)
            .map_err(|error| JiraError::InvalidResponse(format!("create issue: {error}")))?;
        tracing::info!(key = %created.key, "created jira issue");
        Ok(CreatedIssue {
            url: format!("{}/browse/{}", self.config.instance_url, created.key),
            key: created.key,
        })
    }
}

fn jira_issue_type_name(issue_type: IssueType) -> &'static str {
    match issue_type {
        IssueType::NewFeature => "New Feature",
        IssueType::Bug => "Bug",
        IssueType::Improvement => "Improvement",
    }
}

fn render_issue_description(ticket: &IssueTicket) -> String {
    if ticket.action_items.is_empty() {
        return ticket.description.clone();
    }
    let items = ticket
        .action_items
        .iter()
        .map(|item| format!("* {item}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\nAction items:\n{items}", ticket.description)
}
