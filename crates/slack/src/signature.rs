use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Requests older (or newer) than this many seconds are rejected before any
/// signature math happens. Slack recommends five minutes.
pub const REPLAY_WINDOW_SECS: i64 = 300;

const SIGNATURE_PREFIX: &str = "v0=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("request timestamp is {age_secs}s outside the replay window")]
    StaleTimestamp { age_secs: i64 },
    #[error("request timestamp is not a unix epoch value")]
    MalformedTimestamp,
    #[error("signature header is not a v0 hex digest")]
    MalformedSignature,
    #[error("signature does not match request body")]
    Mismatch,
}

/// Computes the `v0` signature Slack expects for a timestamped request body.
pub fn sign(signing_secret: &SecretString, timestamp: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_secret.expose_secret().as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    let digest = mac.finalize().into_bytes();
    format!("{SIGNATURE_PREFIX}{}", hex_encode(&digest))
}

/// Verifies an inbound webhook request. The timestamp check runs first so a
/// replayed capture fails fast; the digest comparison itself is constant
/// time.
pub fn verify(
    signing_secret: &SecretString,
    timestamp: &str,
    body: &str,
    provided: &str,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::MalformedTimestamp)?;
    let age_secs = (now.timestamp() - ts).abs();
    if age_secs > REPLAY_WINDOW_SECS {
        return Err(SignatureError::StaleTimestamp { age_secs });
    }

    let hex_digest = provided
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::MalformedSignature)?;
    let expected = hex_decode(hex_digest).ok_or(SignatureError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(signing_secret.expose_secret().as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&hex[index..index + 2], 16).ok())
        .collect()
}
