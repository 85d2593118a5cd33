use std::{any::Any, io};

use anyhow::{anyhow, Result};
use tracing_forest::{printer::PrettyPrinter, ForestLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the profiling layer alive; the profile is written out on drop.
pub type LogGuard = Option<Box<dyn Any>>;

/// Initializes the global tracing subscriber.
///
/// Logs go to stderr so that query results are the only thing on stdout.
/// `RUST_LOG` takes precedence over `default_level`. The returned guard must
/// be held until the program exits.
pub fn init_logger(default_level: &str) -> Result<LogGuard> {
    if cfg!(feature = "tracing-profile") || cfg!(feature = "perfetto") {
        use tracing_profile::init_tracing;
        let guard =
            init_tracing().map_err(|err| anyhow!("failed to initialize tracing: {err:?}"))?;
        return Ok(Some(Box::new(guard)));
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let printer = PrettyPrinter::new().writer(io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(ForestLayer::from(printer))
        .try_init()?;
    Ok(None)
}
