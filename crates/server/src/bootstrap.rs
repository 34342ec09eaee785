use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use tally_agent::context::{ContextStore, HistorySource};
use tally_agent::grounding::SnapshotSource;
use tally_agent::llm::{HttpLlmClient, LlmClient, LlmError};
use tally_agent::retry::{ResilientInvoker, RetryPolicy};
use tally_agent::runtime::{Orchestrator, OrchestratorParts, ReplySink};
use tally_core::admission::{BudgetLedger, RateLimiter};
use tally_core::cache::ResponseCache;
use tally_core::config::{AppConfig, ConfigError, LoadOptions};
use tally_core::gate::EventGate;
use tally_core::sanitize::InputSanitizer;

use tally_slack::client::{SlackApiClient, SlackError};

pub struct Application {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").field("config", &self.config).finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("slack client construction failed: {0}")]
    Slack(#[from] SlackError),
    #[error("llm client construction failed: {0}")]
    Llm(#[from] LlmError),
    #[error("http client construction failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A numeric data endpoint fetched over plain GET; the response body is
/// included verbatim in the prompt's grounding block.
struct HttpSnapshotSource {
    name: String,
    url: String,
    http: reqwest::Client,
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> anyhow::Result<String> {
        let response = self.http.get(&self.url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!("starting application bootstrap");

    let slack = Arc::new(SlackApiClient::new(
        config.slack.bot_token.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    )?);

    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
        config.llm.base_url.clone(),
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    )?);

    let policy = RetryPolicy {
        max_attempts: config.llm.max_retries,
        base_delay: Duration::from_millis(config.llm.base_delay_ms),
        max_delay: Duration::from_millis(config.llm.max_delay_ms),
    };

    let snapshot_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.grounding.timeout_secs))
        .build()?;
    let sources: Vec<Arc<dyn SnapshotSource>> = config
        .grounding
        .sources
        .iter()
        .map(|source| {
            Arc::new(HttpSnapshotSource {
                name: source.name.clone(),
                url: source.url.clone(),
                http: snapshot_http.clone(),
            }) as Arc<dyn SnapshotSource>
        })
        .collect();

    let orchestrator = Orchestrator::new(OrchestratorParts {
        gate: EventGate::new(Duration::from_secs(config.dedup.sweep_interval_secs)),
        sanitizer: InputSanitizer::new(config.limits.max_message_len),
        limiter: RateLimiter::new(
            config.limits.rate_max_per_window,
            chrono::Duration::seconds(config.limits.rate_window_secs as i64),
            config.limits.rate_warn_fraction,
        ),
        budget: BudgetLedger::new(
            config.limits.daily_budget_usd,
            config.limits.price_per_million_usd,
        ),
        cache: ResponseCache::new(
            config.cache.max_entries,
            Duration::from_secs(config.cache.short_ttl_secs),
            Duration::from_secs(config.cache.long_ttl_secs),
            Duration::from_secs(config.cache.default_ttl_secs),
        ),
        context: ContextStore::new(
            config.context.max_messages,
            chrono::Duration::seconds(config.context.idle_ttl_secs as i64),
        ),
        invoker: ResilientInvoker::new(llm, policy),
        sources,
        grounding_timeout: Duration::from_secs(config.grounding.timeout_secs),
        system_prompt: config.llm.system_prompt.clone(),
        worst_case_tokens: config.limits.worst_case_tokens,
        sink: slack.clone() as Arc<dyn ReplySink>,
        history: slack as Arc<dyn HistorySource>,
    });

    info!(
        model = %config.llm.model,
        grounding_sources = config.grounding.sources.len(),
        "application bootstrap complete"
    );

    Ok(Application { config, orchestrator: Arc::new(orchestrator) })
}
