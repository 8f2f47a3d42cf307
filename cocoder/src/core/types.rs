//! Conversation and result types shared across the crate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// System turn that seeds every new conversation.
pub const SYSTEM_PROMPT: &str = "You are an AI assistant that helps people find information.";

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Read-only snapshot of a session's counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStats {
    /// Provider requests issued, continuations included.
    pub prompt_counter: u32,
    pub session_input_tokens: usize,
    pub session_output_tokens: usize,
}

impl SessionStats {
    pub fn total_tokens(&self) -> usize {
        self.session_input_tokens + self.session_output_tokens
    }
}

/// Task-level accumulator threaded through every prompt/response cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    /// Absolute paths of files written, in write order (rewrites repeat).
    pub generated_files: Vec<PathBuf>,
    pub notes: Vec<String>,
    pub stats: SessionStats,
    /// Workspace files supplied in answer to `files-requested` outcomes.
    pub requested_files_served: usize,
    /// Number of `files-requested` outcomes handled so far.
    pub file_request_rounds: usize,
}
