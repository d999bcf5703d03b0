//! Tracing subscriber setup for binaries and tests embedding the engine.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"stowage_repo=info"`).
///
/// Returns false if a global subscriber was already installed, so tests may
/// call this repeatedly.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .is_ok()
}
