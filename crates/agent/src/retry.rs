use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::llm::{GenerationReply, GenerationRequest, LlmClient, LlmError};

/// Retry policy for provider calls. The decision logic is pure so backoff
/// behavior is testable without elapsed time; only the invoker sleeps.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before jitter: `base × 2^attempt`, capped.
    /// `attempt` is zero-based (the delay after the first failure uses 0).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        let delay_ms =
            (self.base_delay.as_millis() as u64).saturating_mul(multiplier).min(self.max_delay.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }

    /// `None` means give up: either the error is not retryable or attempts
    /// are exhausted. `Some(delay)` includes random jitter of up to half the
    /// base delay, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, error: &LlmError) -> Option<Duration> {
        if !error.is_retryable() || attempt + 1 >= self.max_attempts {
            return None;
        }

        let jitter_ms = if self.base_delay.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64 / 2)
        };
        let delay = self.backoff(attempt) + Duration::from_millis(jitter_ms);
        Some(delay.min(self.max_delay))
    }
}

/// A successful invocation along with how many attempts it took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationReply {
    pub reply: GenerationReply,
    pub attempts: u32,
}

/// Wraps an [`LlmClient`] with the retry policy. The backoff sleep blocks
/// only the current unit of work; no shared lock is held while waiting.
pub struct ResilientInvoker<C> {
    client: C,
    policy: RetryPolicy,
}

impl<C> ResilientInvoker<C>
where
    C: LlmClient,
{
    pub fn new(client: C, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<InvocationReply, LlmError> {
        let mut attempt = 0;
        loop {
            match self.client.generate(request).await {
                Ok(reply) => return Ok(InvocationReply { reply, attempts: attempt + 1 }),
                Err(error) => match self.policy.delay_for(attempt, &error) {
                    Some(delay) => {
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "provider call failed; retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(error),
                },
            }
        }
    }
}
