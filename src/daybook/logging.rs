//! Subscriber setup for applications embedding daybook.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the host. This helper covers the common case.

use crate::config::DaybookConfig;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a stderr fmt subscriber filtered by `level` (an env-filter
/// directive such as `"info"` or `"daybook=debug"`). Later calls are no-ops,
/// as is calling it after another global subscriber was installed.
pub fn init_tracing(level: &str) {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// [`init_tracing`] with the configured `log_level` (`DAYBOOK_LOG`).
pub fn init_tracing_from_config(config: &DaybookConfig) {
    init_tracing(&config.log_level);
}
