use chrono::{DateTime, Utc};

/// Kind of inbound chat event tally knows how to answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    AppMention,
    DirectMessage,
    Unsupported,
}

/// One inbound chat event. Transient: exists only for the duration of a
/// single delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub channel: String,
    pub requester: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub kind: EventKind,
}

impl InboundEvent {
    /// Dedup identity: channel + primary timestamp + thread timestamp when
    /// present. Two deliveries sharing this key are the same event.
    pub fn dedup_key(&self) -> String {
        match &self.thread_ts {
            Some(thread_ts) => format!("{}:{}:{}", self.channel, self.ts, thread_ts),
            None => format!("{}:{}", self.channel, self.ts),
        }
    }

    /// Timestamp of the thread root this event belongs to. Replies carry the
    /// root in `thread_ts`; a fresh message is its own root.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// Conversation-memory key for this event's thread.
    pub fn thread_key(&self) -> String {
        format!("{}:{}", self.channel, self.thread_root())
    }

    /// True for follow-up messages inside an existing thread. Follow-ups
    /// bypass the response cache: a cached answer ignores thread context.
    pub fn is_thread_reply(&self) -> bool {
        matches!(&self.thread_ts, Some(thread_ts) if thread_ts != &self.ts)
    }
}

/// Author side of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Requester,
    Assistant,
}

/// One message in a conversation thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { role, content: content.into(), timestamp }
    }
}
