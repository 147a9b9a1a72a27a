use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Once};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber: console output filtered by `RUST_LOG`
/// (default `info`), plus a plain-text copy in `log_file` when given. The log
/// file is truncated when the subscriber is installed. Later calls are no-ops
/// and leave any existing log file alone.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let mut result = Ok(());
    INIT_ONCE.call_once(|| {
        let file = match log_file.map(|path| {
            File::create(path).with_context(|| format!("create log file {}", path.display()))
        }) {
            Some(Ok(f)) => Some(f),
            Some(Err(e)) => {
                result = Err(e);
                None
            }
            None => None,
        };
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let console = fmt::layer().with_writer(std::io::stderr).with_filter(EnvFilter::new(&env_filter));
        let file_layer = file.map(|f| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(f))
                .with_filter(EnvFilter::new(&env_filter))
        });
        let _ = tracing_subscriber::registry().with(console).with(file_layer).try_init();
    });
    result
}

/// Console-only variant for library callers and tests.
pub fn init_tracing_once() {
    INIT_ONCE.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}
