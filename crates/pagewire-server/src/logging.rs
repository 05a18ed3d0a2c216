//! Process-wide tracing subscriber.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber on stderr. `RUST_LOG` overrides `level`.
///
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // Audit records own stdout; logs stay on stderr.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
