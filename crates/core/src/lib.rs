//! Tally Core - request admission and response caching
//!
//! This crate holds the stateful front half of the tally pipeline:
//! - **Event model** (`event`) - inbound chat events and thread identity
//! - **Event Gate** (`gate`) - duplicate-delivery suppression
//! - **Input Sanitizer** (`sanitize`) - free-text validation and abuse patterns
//! - **Admission Controller** (`admission`) - per-requester rate windows and
//!   rolling daily cost budgets
//! - **Response Cache** (`cache`) - TTL-classed answer cache
//!
//! All shared state here is best-effort and in-process only: a cold start
//! silently resets every structure. Conversation memory, the one thing with a
//! recovery path, lives in `tally-agent`.

pub mod admission;
pub mod cache;
pub mod config;
pub mod errors;
pub mod event;
pub mod gate;
pub mod sanitize;
