use std::fs::File;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Overrides the level derived from the command line, e.g.
/// `REDFISH_EXPORTER_LOG=redfish_exporter=trace,hyper=debug`
pub const LOG_ENV: &str = "REDFISH_EXPORTER_LOG";

fn filter(debug: bool) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(if debug { "debug" } else { "info" }),
    }
}

/// Install the global subscriber. Logs always go to stderr, and to `logfile`
/// as well when one is given. The file is truncated on open.
pub fn init(debug: bool, logfile: Option<&Path>) -> std::io::Result<()> {
    let color = std::io::stderr().is_terminal();
    let stderr = fmt::layer()
        .with_ansi(color)
        .with_writer(std::io::stderr)
        .with_filter(filter(debug));

    let file = match logfile {
        Some(path) => {
            let file = File::create(path)?;

            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter(debug)),
            )
        }
        None => None,
    };

    // a second init only happens in tests, keep the first subscriber
    let _ = tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .try_init();

    Ok(())
}
