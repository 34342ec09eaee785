//! Slack Integration - Events API webhook interface
//!
//! This crate provides the Slack interface for tally:
//! - **Signatures** (`signature`) - webhook request authentication with a
//!   replay window
//! - **Events** (`events`) - Events API payload parsing into pipeline events
//! - **Client** (`client`) - Web API calls: replies, reactions, thread history
//!
//! The client implements the pipeline's outbound ports ([`ReplySink`] and
//! [`HistorySource`]), so everything above this crate talks to traits and
//! never to Slack directly.
//!
//! [`ReplySink`]: tally_agent::runtime::ReplySink
//! [`HistorySource`]: tally_agent::context::HistorySource

pub mod client;
pub mod events;
pub mod signature;
