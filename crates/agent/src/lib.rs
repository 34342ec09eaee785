//! Tally Agent - generation pipeline and conversation memory
//!
//! The back half of the tally pipeline:
//! - **LLM client** (`llm`) - provider trait, error classification, HTTP impl
//! - **Resilient invoker** (`retry`) - bounded retries with jittered backoff
//! - **Context Store** (`context`) - per-thread memory with summarization and
//!   recovery from the chat platform's own history
//! - **Grounding** (`grounding`) - concurrent snapshot fetch under one shared
//!   timeout
//! - **Orchestrator** (`runtime`) - the state machine that composes all of it
//!   into one fixed pipeline per inbound event

pub mod context;
pub mod grounding;
pub mod llm;
pub mod retry;
pub mod runtime;
