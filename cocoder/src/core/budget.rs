//! Session budget arithmetic.
//!
//! Three independent ceilings guard a session: number of provider requests,
//! estimated size of a single request, and cumulative tokens. Checks run
//! before a request is sent; usage is recorded from the provider afterwards.

use serde::{Deserialize, Serialize};

use crate::error::BudgetExceeded;

/// Configured ceilings for one completion session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionLimits {
    pub max_prompts: u32,
    pub max_tokens_per_request: usize,
    pub max_tokens_total: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_prompts: 5,
            max_tokens_per_request: 128_000,
            max_tokens_total: 24_000,
        }
    }
}

/// Counters consumed by a session. Never reset within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetState {
    pub prompts_sent: u32,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl BudgetState {
    /// Count one more provider request.
    ///
    /// The counter moves even when the limit is hit so the error reports the
    /// attempted request number.
    pub fn record_prompt(&mut self, limits: &SessionLimits) -> Result<(), BudgetExceeded> {
        self.prompts_sent += 1;
        if self.prompts_sent > limits.max_prompts {
            return Err(BudgetExceeded::TooManyPrompts {
                sent: self.prompts_sent,
                max: limits.max_prompts,
            });
        }
        Ok(())
    }

    /// Check a pending request of `estimated` tokens against both token ceilings.
    pub fn check_request(
        &self,
        estimated: usize,
        limits: &SessionLimits,
    ) -> Result<(), BudgetExceeded> {
        if estimated > limits.max_tokens_per_request {
            return Err(BudgetExceeded::PerRequestTokens {
                estimated,
                max: limits.max_tokens_per_request,
            });
        }
        let total = self.input_tokens + self.output_tokens + estimated;
        if total > limits.max_tokens_total {
            return Err(BudgetExceeded::TotalTokens {
                total,
                max: limits.max_tokens_total,
            });
        }
        Ok(())
    }

    /// Add provider-reported usage.
    pub fn record_usage(&mut self, input_tokens: usize, output_tokens: usize) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
    }
}
