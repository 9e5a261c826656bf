use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. Filtering follows `RUST_LOG`, falling back
/// to `info`.
pub fn init() {
    init_with_default("info");
}

pub fn init_with_default(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    // a second call (tests, embedding applications) keeps the first subscriber
    if fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}
