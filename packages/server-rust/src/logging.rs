//! Subscriber setup for binaries and integration tests.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
#[must_use]
pub fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("broker_server=debug,broker_core=debug,info")
        } else {
            EnvFilter::new("broker_server=info,broker_core=info,warn")
        }
    })
}

/// Installs a global subscriber writing to stderr, compact or JSON.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(verbose: bool, json: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(default_filter(verbose));
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        registry.with(fmt.json()).try_init()?;
    } else {
        registry.with(fmt.compact()).try_init()?;
    }
    Ok(())
}
