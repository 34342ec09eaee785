use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use tally_agent::context::HistorySource;
use tally_agent::runtime::{ProgressMarker, ReplySink};
use tally_core::event::{ChatMessage, Role};

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("slack api `{method}` returned error: {reason}")]
    Api { method: &'static str, reason: String },
    #[error("slack transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Web API client. One instance per process; reqwest pools connections
/// internally.
pub struct SlackApiClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
}

#[derive(Deserialize)]
struct ApiEnvelope {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    rest: Value,
}

impl SlackApiClient {
    pub fn new(bot_token: SecretString, timeout: Duration) -> Result<Self, SlackError> {
        Self::with_base_url(bot_token, timeout, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        bot_token: SecretString,
        timeout: Duration,
        base_url: impl Into<String>,
    ) -> Result<Self, SlackError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_owned(), bot_token })
    }

    async fn call(&self, method: &'static str, payload: Value) -> Result<Value, SlackError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&payload)
            .send()
            .await?;

        let envelope: ApiEnvelope = response.json().await?;
        if !envelope.ok {
            return Err(SlackError::Api {
                method,
                reason: envelope.error.unwrap_or_else(|| "unspecified".to_owned()),
            });
        }
        Ok(envelope.rest)
    }

    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: &str,
    ) -> Result<(), SlackError> {
        self.call(
            "chat.postMessage",
            json!({ "channel": channel, "text": text, "thread_ts": thread_ts }),
        )
        .await?;
        Ok(())
    }

    pub async fn add_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), SlackError> {
        let result = self
            .call("reactions.add", json!({ "channel": channel, "timestamp": ts, "name": name }))
            .await;
        match result {
            Err(SlackError::Api { reason, .. }) if reason == "already_reacted" => Ok(()),
            other => other.map(|_| ()),
        }
    }

    pub async fn remove_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), SlackError> {
        let result = self
            .call("reactions.remove", json!({ "channel": channel, "timestamp": ts, "name": name }))
            .await;
        match result {
            Err(SlackError::Api { reason, .. }) if reason == "no_reaction" => Ok(()),
            other => other.map(|_| ()),
        }
    }

    pub async fn fetch_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, SlackError> {
        let payload = self
            .call(
                "conversations.replies",
                json!({ "channel": channel, "ts": thread_ts, "limit": limit + 1 }),
            )
            .await?;
        Ok(history_from_value(&payload, limit))
    }
}

/// Converts a `conversations.replies` payload into pipeline history, newest
/// messages kept when over `limit`. The newest requester message is dropped:
/// it is the question currently being answered and travels separately.
pub fn history_from_value(payload: &Value, limit: usize) -> Vec<ChatMessage> {
    let Some(raw_messages) = payload.get("messages").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut messages: Vec<ChatMessage> = raw_messages
        .iter()
        .filter(|message| message.get("subtype").is_none())
        .filter_map(|message| {
            let text = message.get("text").and_then(Value::as_str)?;
            if text.trim().is_empty() {
                return None;
            }
            let role = if message.get("bot_id").is_some() {
                Role::Assistant
            } else {
                Role::Requester
            };
            let timestamp = message
                .get("ts")
                .and_then(Value::as_str)
                .and_then(parse_slack_ts)
                .unwrap_or_else(Utc::now);
            Some(ChatMessage::new(role, text, timestamp))
        })
        .collect();

    if matches!(messages.last(), Some(last) if last.role == Role::Requester) {
        messages.pop();
    }
    if messages.len() > limit {
        messages.drain(..messages.len() - limit);
    }
    messages
}

fn parse_slack_ts(ts: &str) -> Option<DateTime<Utc>> {
    let seconds: f64 = ts.parse().ok()?;
    DateTime::from_timestamp(seconds.trunc() as i64, 0)
}

#[async_trait]
impl ReplySink for SlackApiClient {
    async fn post(&self, channel: &str, text: &str, thread_ts: &str) -> anyhow::Result<()> {
        self.post_message(channel, text, thread_ts).await?;
        debug!(channel, thread_id = thread_ts, "posted reply");
        Ok(())
    }

    async fn mark(&self, channel: &str, ts: &str, marker: ProgressMarker) -> anyhow::Result<()> {
        self.add_reaction(channel, ts, marker.emoji()).await?;
        Ok(())
    }

    async fn unmark(&self, channel: &str, ts: &str, marker: ProgressMarker) -> anyhow::Result<()> {
        self.remove_reaction(channel, ts, marker.emoji()).await?;
        Ok(())
    }
}

#[async_trait]
impl HistorySource for SlackApiClient {
    async fn fetch_history(
        &self,
        channel: &str,
        thread_ts: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        Ok(self.fetch_replies(channel, thread_ts, limit).await?)
    }
}
