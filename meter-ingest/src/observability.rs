use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "meter_ingest=info,meter_client=info";

/// `RUST_LOG` when set, otherwise info for this workspace's crates.
fn env_filter(from_env: Option<String>) -> EnvFilter {
    match from_env {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(DEFAULT_DIRECTIVES),
    }
}

/// Logs go to stderr so that report output on stdout stays machine-readable.
pub fn init_tracing() {
    let filter = env_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
