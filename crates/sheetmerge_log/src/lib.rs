//! `sheetmerge_log` v1:
//! Shared `tracing` subscriber setup.
//!
//! Verbosity follows `RUST_LOG`, e.g. `RUST_LOG=sheetmerge_merge=debug`. When
//! `RUST_LOG` is unset, `info` and above are shown.

use tracing_subscriber::EnvFilter;

/// Default directive used when `RUST_LOG` is not set.
pub const C_LOG_FILTER_DEFAULT: &str = "info";

fn derive_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(C_LOG_FILTER_DEFAULT))
}

/// Install the global fmt subscriber unless one is already present.
///
/// Returns `false` when another subscriber was installed first; safe to call
/// from every test.
pub fn try_setup_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(derive_env_filter())
        .with_test_writer()
        .try_init()
        .is_ok()
}
