//! Diagnostics for operators of an agent process.
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr. Not part of
//!   the dashboard contract.
//! - **Status surface (`io::status`)**: `status`, `task`, `state.json`, `output.log` and
//!   `attempts.jsonl` under the agent's status directory. Always written, unaffected by
//!   `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=fleet=debug fleet run --agent-id agent-1
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
