//! Completion session: one logical conversation with a model provider.
//!
//! The session appends turns, enforces the prompt and token budgets before
//! every provider request, and transparently resumes replies that were cut
//! short by the provider's output length limit.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::core::budget::{BudgetState, SessionLimits};
use crate::core::tokens::estimate_request_tokens;
use crate::core::types::{SYSTEM_PROMPT, SessionStats, Turn};
use crate::error::ProviderError;
use crate::io::provider::{CompletionProvider, FinishReason};

/// Assembled reply for one prompt plus the session totals after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPromptResponse {
    pub response: String,
    pub session_input_tokens: usize,
    pub session_output_tokens: usize,
}

pub struct CompletionSession<P> {
    provider: P,
    limits: SessionLimits,
    conversation: Vec<Turn>,
    budget: BudgetState,
}

impl<P: CompletionProvider> CompletionSession<P> {
    /// Start a conversation seeded with the system turn.
    pub fn new(provider: P, limits: SessionLimits) -> Self {
        Self {
            provider,
            limits,
            conversation: vec![Turn::system(SYSTEM_PROMPT)],
            budget: BudgetState::default(),
        }
    }

    /// Send `prompt` and return the complete reply.
    ///
    /// Every provider request, continuations included, counts against
    /// `max_prompts`. The user turn is appended once; while the provider
    /// reports `Length`, the grown conversation is resubmitted without a new
    /// user turn and the fragments are concatenated with no separator.
    pub fn send_prompt(&mut self, prompt: &str) -> Result<SendPromptResponse> {
        let mut response = String::new();
        let mut continuing = false;

        loop {
            self.budget.record_prompt(&self.limits)?;

            if continuing {
                info!(prompt = self.budget.prompts_sent, "continuing truncated response");
            } else {
                self.conversation.push(Turn::user(prompt));
            }

            let estimated = estimate_request_tokens(&self.conversation);
            if let Err(exceeded) = self.budget.check_request(estimated, &self.limits) {
                if !continuing {
                    self.conversation.pop();
                }
                return Err(exceeded.into());
            }
            debug!(
                estimated,
                turns = self.conversation.len(),
                "submitting conversation"
            );

            let completion = self.provider.create_completion(&self.conversation)?;
            let usage = completion.usage.ok_or(ProviderError::MissingUsage)?;
            self.budget
                .record_usage(usage.input_tokens, usage.output_tokens);

            let fragment = completion
                .content
                .filter(|text| !text.is_empty())
                .ok_or(ProviderError::EmptyCompletion)?;
            response.push_str(&fragment);
            self.conversation.push(Turn::assistant(fragment));

            match completion.finish_reason {
                FinishReason::Length => continuing = true,
                FinishReason::Stop => break,
            }
        }

        Ok(SendPromptResponse {
            response,
            session_input_tokens: self.budget.input_tokens,
            session_output_tokens: self.budget.output_tokens,
        })
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            prompt_counter: self.budget.prompts_sent,
            session_input_tokens: self.budget.input_tokens,
            session_output_tokens: self.budget.output_tokens,
        }
    }

    pub fn conversation(&self) -> &[Turn] {
        &self.conversation
    }

    /// Overwrite `path` with the full turn list as a JSON array.
    pub fn save_conversation(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), turns = self.conversation.len(), "saving conversation");
        let mut buf =
            serde_json::to_string_pretty(&self.conversation).context("serialize conversation")?;
        buf.push('\n');
        write_atomic(path, &buf)
    }

    /// Replace the in-memory conversation with the one stored at `path`.
    pub fn load_conversation(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(anyhow!("conversation file {} doesn't exist", path.display()));
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let conversation: Vec<Turn> = serde_json::from_str(&contents)
            .with_context(|| format!("parse conversation {}", path.display()))?;
        debug!(path = %path.display(), turns = conversation.len(), "conversation loaded");
        self.conversation = conversation;
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp conversation {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace conversation {}", path.display()))?;
    Ok(())
}
