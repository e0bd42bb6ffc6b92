//! Opt-in log output for demos, benches and tests.
//!
//! Nothing is installed unless `RUST_LOG` is set, so test output stays quiet
//! by default:
//!
//! ```bash
//! RUST_LOG=tether_core=trace,tether=debug cargo test -- --nocapture
//! ```

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Lines carry the thread name, so dispatcher output (thread
/// `tether-connector` by default) stands apart from callers. Safe to call
/// repeatedly; later calls and calls after another subscriber was installed
/// leave the existing one in place.
pub fn init_tracing() {
    let Ok(filter) = EnvFilter::try_from_default_env() else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
