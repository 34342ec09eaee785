use thiserror::Error;

/// Ordered abuse-pattern table. Each entry is a (label, lowercase substring)
/// pair; the first match wins. Adding or removing a pattern never touches
/// control flow.
pub const SUSPICIOUS_PATTERNS: &[(&str, &str)] = &[
    ("instruction_override", "ignore previous instructions"),
    ("instruction_override", "ignore all previous instructions"),
    ("instruction_override", "disregard your instructions"),
    ("instruction_override", "forget your instructions"),
    ("role_prefix_injection", "system:"),
    ("role_prefix_injection", "assistant:"),
    ("role_prefix_injection", "[system]"),
    ("role_prefix_injection", "you are now"),
    ("markup_injection", "<script"),
    ("markup_injection", "</script"),
    ("markup_injection", "<iframe"),
    ("markup_injection", "javascript:"),
];

/// Phrases rejected outright, matched case-insensitively as substrings.
pub const BLOCKED_PHRASES: &[&str] = &["jailbreak", "dan mode", "developer mode"];

/// Queries shorter than this are never cached; they are usually follow-up
/// fragments whose answer depends on context the cache key cannot see.
pub const MIN_CACHEABLE_LEN: usize = 12;

const IMMEDIACY_MARKERS: &[&str] = &["right now", "this second", "at this moment", "as of now"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message is empty")]
    Empty,
    #[error("message exceeds {max} characters")]
    TooLong { max: usize },
    #[error("message contains blocked phrase `{phrase}`")]
    BlockedPhrase { phrase: &'static str },
    #[error("message matched suspicious pattern `{label}`")]
    SuspiciousPattern { label: &'static str },
}

impl ValidationError {
    /// Reason shown to the requester. Each failure maps to a distinct
    /// message; none of them echo the offending input back.
    pub fn user_message(&self) -> String {
        match self {
            Self::Empty => "I need a question to work with. Try asking about a fund metric, for example \"What's our AUM?\".".to_owned(),
            Self::TooLong { max } => {
                format!("That message is too long for me to process. Please keep it under {max} characters.")
            }
            Self::BlockedPhrase { .. } => {
                "I can't help with that request.".to_owned()
            }
            Self::SuspiciousPattern { .. } => {
                "That message looks like an attempt to change how I operate, so I won't process it.".to_owned()
            }
        }
    }
}

/// Validates and cleans free-text input before it reaches the pipeline.
#[derive(Clone, Debug)]
pub struct InputSanitizer {
    max_len: usize,
}

impl Default for InputSanitizer {
    fn default() -> Self {
        Self { max_len: 2_000 }
    }
}

impl InputSanitizer {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Checks run in a fixed order: emptiness, length, blocked phrases,
    /// suspicious patterns. Only input passing every check is cleaned and
    /// returned.
    pub fn sanitize(&self, raw: &str) -> Result<String, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        if trimmed.chars().count() > self.max_len {
            return Err(ValidationError::TooLong { max: self.max_len });
        }

        let lowered = trimmed.to_lowercase();
        for phrase in BLOCKED_PHRASES {
            if lowered.contains(phrase) {
                return Err(ValidationError::BlockedPhrase { phrase });
            }
        }
        for (label, pattern) in SUSPICIOUS_PATTERNS {
            if lowered.contains(pattern) {
                return Err(ValidationError::SuspiciousPattern { label });
            }
        }

        Ok(clean(trimmed))
    }
}

/// Strips control characters and collapses all whitespace runs to single
/// spaces.
fn clean(text: &str) -> String {
    let without_control: String = text.chars().filter(|ch| !ch.is_control() || *ch == ' ').collect();
    without_control.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Recognizes a plain help request without any text analysis beyond an exact
/// match on the trimmed, lowercased message.
pub fn is_help_request(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "help" | "?" | "hi" | "hello" | "what can you do" | "what can you do?"
    )
}

/// Cache admission policy for query text: very short fragments and queries
/// anchored to the present moment are never cached.
pub fn is_cacheable_query(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_CACHEABLE_LEN {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !IMMEDIACY_MARKERS.iter().any(|marker| lowered.contains(marker))
}
