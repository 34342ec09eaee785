use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// One structured numeric snapshot rendered for prompt inclusion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroundingSnapshot {
    pub source: String,
    pub rendered: String,
}

#[derive(Debug, Error)]
pub enum GroundingError {
    #[error("grounding fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("grounding source `{name}` failed: {reason}")]
    Source { name: String, reason: String },
}

/// A read-only external source of numeric grounding data.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> anyhow::Result<String>;
}

/// Fetches every source concurrently and awaits the batch under one shared
/// timeout. On timeout the whole batch fails: partial context could produce
/// a misleadingly confident answer, so no partial results are used. In-flight
/// fetches are abandoned, not cancelled; their eventual results are dropped.
pub async fn fetch_grounding(
    sources: &[Arc<dyn SnapshotSource>],
    shared_timeout: Duration,
) -> Result<Vec<GroundingSnapshot>, GroundingError> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let handles: Vec<_> = sources
        .iter()
        .map(|source| {
            let source = Arc::clone(source);
            let name = source.name().to_owned();
            (name, tokio::spawn(async move { source.fetch().await }))
        })
        .collect();

    let gather = async {
        let mut snapshots = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(rendered)) => {
                    debug!(source = %name, "grounding snapshot fetched");
                    snapshots.push(GroundingSnapshot { source: name, rendered });
                }
                Ok(Err(error)) => {
                    return Err(GroundingError::Source { name, reason: error.to_string() })
                }
                Err(join_error) => {
                    return Err(GroundingError::Source { name, reason: join_error.to_string() })
                }
            }
        }
        Ok(snapshots)
    };

    match tokio::time::timeout(shared_timeout, gather).await {
        Ok(result) => result,
        Err(_) => Err(GroundingError::Timeout(shared_timeout)),
    }
}

/// Renders the snapshot set as a block appended to the system prompt.
pub fn render_block(snapshots: &[GroundingSnapshot]) -> Option<String> {
    if snapshots.is_empty() {
        return None;
    }
    let mut block = String::from("Current data:\n");
    for snapshot in snapshots {
        block.push_str(&format!("[{}]\n{}\n", snapshot.source, snapshot.rendered));
    }
    Some(block)
}
