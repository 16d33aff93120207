use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use curfew_core::config::Config;
use curfew_core::paths::Paths;
use curfew_daemon::Clock;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // the offset can only be read safely while the process is single-threaded
    let clock = Clock::local();
    let paths = Paths::resolve();
    let config = Config::load_validated(&paths.config)
        .with_context(|| format!("load configuration {}", paths.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "curfew starting");
    if !nix::unistd::geteuid().is_root() {
        warn!("not running as root, privileged operations will fail");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let outcome = runtime.block_on(curfew_daemon::run(paths, config, clock));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    if let Err(err) = &outcome {
        error!(error = ?err, "curfew stopped");
    }
    outcome
}
