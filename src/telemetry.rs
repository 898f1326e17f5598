//! Telemetry initialization.
//!
//! Structured logging to stderr via `tracing`:
//! - filter from `CROSSROADS_LOG` (falling back to `RUST_LOG`, then `info`);
//! - `CROSSROADS_LOG_FORMAT=json` switches to JSON lines for collectors.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Call once from `main()`; later calls
/// are ignored (useful for tests that race to initialise).
pub fn init() {
    let filter = EnvFilter::try_from_env("CROSSROADS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("CROSSROADS_LOG_FORMAT").is_ok_and(|v| v == "json");

    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}
