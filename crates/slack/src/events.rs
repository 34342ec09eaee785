use serde::Deserialize;
use thiserror::Error;

use tally_core::event::{EventKind, InboundEvent};

/// What the webhook handler should do with one parsed payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookDispatch {
    /// Echo the challenge back verbatim; sent once when the endpoint is
    /// registered.
    Challenge(String),
    /// Hand the event to the pipeline.
    Event(InboundEvent),
    /// Acknowledge and do nothing: bot echoes, edits, and payload shapes
    /// tally does not answer.
    Ignored,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    challenge: Option<String>,
    event: Option<RawEvent>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<String>,
    user: Option<String>,
    text: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
    channel_type: Option<String>,
}

/// Parses one Events API request body. Anything the pipeline cannot answer
/// maps to [`WebhookDispatch::Ignored`]; only malformed json is an error.
pub fn parse_payload(body: &str) -> Result<WebhookDispatch, PayloadError> {
    let envelope: Envelope = serde_json::from_str(body)?;

    match envelope.kind.as_str() {
        "url_verification" => Ok(envelope
            .challenge
            .map(WebhookDispatch::Challenge)
            .unwrap_or(WebhookDispatch::Ignored)),
        "event_callback" => Ok(envelope.event.map(dispatch_event).unwrap_or(WebhookDispatch::Ignored)),
        _ => Ok(WebhookDispatch::Ignored),
    }
}

fn dispatch_event(raw: RawEvent) -> WebhookDispatch {
    // Bot-authored messages and subtypes (edits, deletes, joins) would loop
    // or answer noise.
    if raw.bot_id.is_some() || raw.subtype.is_some() {
        return WebhookDispatch::Ignored;
    }

    let (Some(channel), Some(user), Some(text), Some(ts)) =
        (raw.channel, raw.user, raw.text, raw.ts)
    else {
        return WebhookDispatch::Ignored;
    };

    let kind = match raw.kind.as_str() {
        "app_mention" => EventKind::AppMention,
        "message" if raw.channel_type.as_deref() == Some("im") => EventKind::DirectMessage,
        _ => EventKind::Unsupported,
    };

    let text = match kind {
        EventKind::AppMention => strip_leading_mention(&text).to_owned(),
        _ => text,
    };

    WebhookDispatch::Event(InboundEvent {
        channel,
        requester: user,
        text,
        ts,
        thread_ts: raw.thread_ts,
        kind,
    })
}

/// Drops the `<@U…>` token mentions start with, so the pipeline sees only
/// the question.
fn strip_leading_mention(text: &str) -> &str {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<@") {
        if let Some(end) = rest.find('>') {
            return rest[end + 1..].trim_start();
        }
    }
    trimmed
}
