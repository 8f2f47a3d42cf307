//! Budget-constrained LLM conversation engine for workspace code generation.
//!
//! A task is driven as a loop of prompt/response cycles: the initial prompt is
//! built from workspace files, the model answers in a line-oriented text
//! protocol, and each decoded answer either writes files, asks for more
//! workspace files, or records notes. The crate is split in two layers:
//!
//! - **[`core`]**: Pure logic (protocol codec, budget arithmetic, token
//!   estimation, cost table). No I/O.
//! - **[`io`]**: Side-effecting operations (file collection, provider calls,
//!   session persistence, config, prompt rendering).
//!
//! [`task`] coordinates both to run a task to a terminal outcome.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
