//! Conversation memory for the GroosHub chat assistant.
//!
//! Long chats are compressed into token-bounded [`summaries`], durable
//! facts about users and projects are merged with confidence scores into
//! [`user_memory`] and [`project_memory`], and everything stored is sealed
//! per organization by [`crypto`]. The [`analyzer`] drives one LLM call per
//! analysis; [`context`] assembles the result into prompt context.

pub mod analyzer;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod llm;
pub mod merge;
pub mod model;
pub mod project_memory;
pub mod retry;
pub mod storage;
pub mod summaries;
pub mod tokens;
pub mod user_memory;

pub use error::{GroosHubError, Result};
