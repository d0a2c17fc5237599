use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SATHIPASALA_LOG";
const DEFAULT_FILTER: &str = "sathipasalad=info";

/// Logs go to stderr; stdout carries the IPC responses.
///
/// `SATHIPASALA_LOG` wins over `RUST_LOG`, which wins over the default.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
