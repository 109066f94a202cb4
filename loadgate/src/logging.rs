use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_FILTER: &str = "warn";

/// Installs the stderr subscriber. `--log-level` wins over `LOADGATE_LOG`, then `RUST_LOG`.
pub fn init_logging(level: Option<&str>) {
    let raw = level
        .map(str::to_string)
        .or_else(|| std::env::var("LOADGATE_LOG").ok())
        .or_else(|| std::env::var("RUST_LOG").ok());

    let filter = raw.map_or_else(
        || EnvFilter::new(DEFAULT_FILTER),
        |value| EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    );

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set global default subscriber: {err}");
    }
}
