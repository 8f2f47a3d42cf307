//! Typed failure categories.
//!
//! Functions return `anyhow::Result`; these types are attached as the root
//! cause so callers can classify a failure with `downcast_ref`.

use thiserror::Error;

/// Fatal task-level failures that are not budget, protocol or provider errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// A required parameter is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The model declared an outcome outside the protocol.
    #[error("unexpected outcome: {0}")]
    UnexpectedOutcome(String),
    #[error("generated file {filename} has empty content")]
    EmptyGeneratedFile { filename: String },
    #[error("generated file {filename} resolves outside the output directory")]
    UnsafeOutputPath { filename: String },
}

impl TaskError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// A session safety budget was exhausted. Carries the offending counters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BudgetExceeded {
    #[error("too many prompts in this session ({sent}/{max})")]
    TooManyPrompts { sent: u32, max: u32 },
    #[error("exceeded per-request token limit ({estimated}/{max})")]
    PerRequestTokens { estimated: usize, max: usize },
    #[error("exceeded total token limit for this session ({total}/{max})")]
    TotalTokens { total: usize, max: usize },
}

/// Raw model text could not be decoded into a response.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Header not found")]
    HeaderNotFound,
    #[error("Contents not found")]
    ContentsNotFound,
    #[error("Footer not found")]
    FooterNotFound,
}

/// The model provider returned something the session cannot use.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("completion body is empty")]
    EmptyCompletion,
    #[error("completion is missing usage accounting")]
    MissingUsage,
    #[error("provider returned no choices")]
    NoChoices,
    #[error("provider request failed with status {status}: {body}")]
    Http { status: u16, body: String },
}
