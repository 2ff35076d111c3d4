//! Tracing subscriber setup
//!
//! Logs go to stderr so stdout stays machine-readable. `RUST_LOG` controls
//! filtering and defaults to `info`.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Compact text by default, JSON lines when
/// `json` is set. Calling twice is a no-op.
pub fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // try_init fails only when a subscriber is already installed (tests)
    let _ = if json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.compact().try_init()
    };
}
