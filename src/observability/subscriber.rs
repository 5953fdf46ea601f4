//! Diagnostic tracing initialisation.
//!
//! `RUST_LOG` takes precedence; otherwise the `[logging] level` setting
//! applies to this crate and `tower_http`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(level: &str) -> String {
    format!("jscp={level},tower_http={level}")
}

/// Install the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
