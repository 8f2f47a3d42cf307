//! Diagnostic tracing for the task loop.
//!
//! Progress messages (prompts sent, files generated, token usage) are emitted
//! as `tracing` events. The CLI is the only place a subscriber is installed;
//! library callers bring their own.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` first and falls back to `default_directive` when unset or
/// invalid. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=cocoder=trace cocoder run --task "..." --files "src/**/*.rs"
/// ```
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
