use chrono::{DateTime, Utc};
use thiserror::Error;

/// Every way a pipeline run can end without a generated answer reaching the
/// requester. Each variant maps to exactly one user-facing message; raw
/// provider or internal error text never crosses that boundary.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("validation failed: {reason}")]
    Validation { reason: String, user_message: String },
    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },
    #[error("daily budget exhausted")]
    BudgetExceeded,
    #[error("grounding data unavailable: {0}")]
    GroundingUnavailable(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl PipelineError {
    /// The one message the requester sees. `correlation_id` is an opaque
    /// reference operators can match against logs; it carries no internal
    /// detail.
    pub fn user_message(&self, correlation_id: &str, now: DateTime<Utc>) -> String {
        match self {
            Self::Validation { user_message, .. } => user_message.clone(),
            Self::RateLimited { reset_at } => {
                let minutes = (*reset_at - now).num_seconds().max(0) / 60 + 1;
                format!(
                    "You're sending requests faster than I can handle. Please try again in about {minutes} minute{}.",
                    if minutes == 1 { "" } else { "s" }
                )
            }
            Self::BudgetExceeded => {
                "You've reached today's usage limit for assistant answers. The limit resets within 24 hours.".to_owned()
            }
            Self::GroundingUnavailable(_) => {
                "The fund data I need is temporarily unavailable. Please try again in a moment.".to_owned()
            }
            Self::Generation(_) | Self::Unknown(_) => format!(
                "Something went wrong while preparing your answer. Please try again. (ref {correlation_id})"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::PipelineError;

    #[test]
    fn rate_limit_message_carries_reset_eta() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp");
        let error = PipelineError::RateLimited { reset_at: now + Duration::seconds(90) };
        let message = error.user_message("ab12cd34", now);
        assert!(message.contains("2 minutes"), "unexpected message: {message}");
    }

    #[test]
    fn generation_failures_expose_only_the_correlation_id() {
        let error = PipelineError::Generation("connection reset by provider".to_owned());
        let message = error.user_message("ab12cd34", Utc::now());
        assert!(message.contains("ab12cd34"));
        assert!(!message.contains("connection reset"));
    }

    #[test]
    fn budget_message_offers_no_override() {
        let message = PipelineError::BudgetExceeded.user_message("ref", Utc::now());
        assert!(message.contains("usage limit"));
    }
}
