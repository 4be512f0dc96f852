//! Process-wide tracing setup.
//!
//! Verbosity follows two environment variables so a deployed binary can be
//! made chattier without a rebuild:
//!
//! - `CORTEN_MIN_LOG_LEVEL` raises the floor: `0` keeps info, `1` keeps
//!   only warnings, `2` and above keeps only errors.
//! - `CORTEN_MIN_VLOG_LEVEL` lowers it for debugging: `1` enables debug
//!   events, `2` and above enables trace events. A non-zero vlog level
//!   wins over the floor.

use std::sync::Once;

use tracing::level_filters::LevelFilter;

static INIT: Once = Once::new();

fn env_level(name: &str) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// The level filter implied by the current environment.
pub fn env_filter() -> LevelFilter {
    match env_level("CORTEN_MIN_VLOG_LEVEL") {
        0 => match env_level("CORTEN_MIN_LOG_LEVEL") {
            0 => LevelFilter::INFO,
            1 => LevelFilter::WARN,
            _ => LevelFilter::ERROR,
        },
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global tracing subscriber once.
///
/// Safe to call from every entry point; only the first call installs
/// anything, and an already-installed subscriber (for example one set up
/// by an embedding application) is left in place.
pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(env_filter())
            .with_target(true)
            .try_init();
    });
}
