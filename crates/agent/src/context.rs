use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use tally_core::event::{ChatMessage, Role};

/// Fixed vocabulary scanned in evicted requester messages to build the
/// one-line topical summary.
const DOMAIN_KEYWORDS: &[&str] = &[
    "aum",
    "assets",
    "performance",
    "returns",
    "allocation",
    "holdings",
    "exposure",
    "fees",
    "inflows",
    "outflows",
    "redemptions",
    "subscriptions",
    "benchmark",
    "nav",
    "liquidity",
    "risk",
];

/// External, durable source of a thread's prior messages: the chat
/// platform's own history API. Consulted only when local memory is empty.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(
        &self,
        channel: &str,
        thread_ts: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessage>>;
}

struct ThreadContext {
    messages: VecDeque<ChatMessage>,
    topics: BTreeSet<&'static str>,
    evicted: bool,
    last_updated: DateTime<Utc>,
}

impl ThreadContext {
    fn summary(&self) -> Option<String> {
        if !self.evicted {
            return None;
        }
        if self.topics.is_empty() {
            Some("general fund questions".to_owned())
        } else {
            Some(self.topics.iter().copied().collect::<Vec<_>>().join(", "))
        }
    }

    /// Messages oldest-first. A summary, when present, is surfaced as two
    /// synthetic leading messages so prompt construction downstream needs
    /// no special casing.
    fn render(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 2);
        if let Some(summary) = self.summary() {
            messages.push(ChatMessage::new(
                Role::Requester,
                format!("Earlier in this conversation we discussed: {summary}."),
                self.last_updated,
            ));
            messages.push(ChatMessage::new(
                Role::Assistant,
                "Understood. I'll keep that earlier discussion in mind.",
                self.last_updated,
            ));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }
}

/// Per-thread conversation memory, bounded to N messages with summarization
/// of the evicted prefix. Local memory is a best-effort cache; the recovery
/// path against the platform's own history is what survives cold starts.
pub struct ContextStore {
    max_messages: usize,
    idle_ttl: Duration,
    threads: Mutex<HashMap<String, ThreadContext>>,
}

impl ContextStore {
    pub fn new(max_messages: usize, idle_ttl: Duration) -> Self {
        Self { max_messages, idle_ttl, threads: Mutex::new(HashMap::new()) }
    }

    pub fn read(&self, thread_key: &str) -> Vec<ChatMessage> {
        self.read_at(thread_key, Utc::now())
    }

    /// Returns the thread's messages oldest-first, or empty when the thread
    /// is unknown or idle past its TTL.
    pub fn read_at(&self, thread_key: &str, now: DateTime<Utc>) -> Vec<ChatMessage> {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(thread) = threads.get(thread_key) else {
            return Vec::new();
        };

        if now - thread.last_updated >= self.idle_ttl {
            threads.remove(thread_key);
            return Vec::new();
        }

        threads[thread_key].render()
    }

    pub fn append(&self, thread_key: &str, role: Role, content: &str) {
        self.append_at(thread_key, role, content, Utc::now());
    }

    pub fn append_at(&self, thread_key: &str, role: Role, content: &str, now: DateTime<Utc>) {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        let thread = threads.entry(thread_key.to_owned()).or_insert_with(|| ThreadContext {
            messages: VecDeque::new(),
            topics: BTreeSet::new(),
            evicted: false,
            last_updated: now,
        });

        thread.messages.push_back(ChatMessage::new(role, content, now));
        thread.last_updated = now;

        while thread.messages.len() > self.max_messages {
            let Some(evicted) = thread.messages.pop_front() else {
                break;
            };
            thread.evicted = true;
            if evicted.role == Role::Requester {
                let lowered = evicted.content.to_lowercase();
                for keyword in DOMAIN_KEYWORDS {
                    if lowered.contains(keyword) {
                        thread.topics.insert(keyword);
                    }
                }
            }
        }
    }

    /// Local memory first; when empty, rehydrate from the platform's own
    /// thread history. A history failure degrades to an empty context rather
    /// than failing the request.
    pub async fn read_with_fallback(
        &self,
        thread_key: &str,
        channel: &str,
        thread_ts: &str,
        history: &dyn HistorySource,
    ) -> Vec<ChatMessage> {
        let local = self.read(thread_key);
        if !local.is_empty() {
            return local;
        }

        let recovered = match history.fetch_history(channel, thread_ts, self.max_messages).await {
            Ok(messages) => messages,
            Err(error) => {
                warn!(
                    thread_id = thread_key,
                    error = %error,
                    "history recovery failed; continuing with empty context"
                );
                return Vec::new();
            }
        };
        if recovered.is_empty() {
            return Vec::new();
        }

        info!(
            thread_id = thread_key,
            recovered = recovered.len(),
            "rehydrated thread memory from platform history"
        );

        let now = Utc::now();
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the lock: an append may have landed while the
        // history fetch was in flight, and the recovered prefix must not
        // overwrite it.
        if let Some(thread) = threads.get(thread_key) {
            if !thread.messages.is_empty() {
                return thread.render();
            }
        }
        threads.insert(
            thread_key.to_owned(),
            ThreadContext {
                messages: recovered.iter().cloned().collect(),
                topics: BTreeSet::new(),
                evicted: false,
                last_updated: now,
            },
        );
        recovered
    }

    /// Number of threads currently held in local memory.
    pub fn threads(&self) -> usize {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
