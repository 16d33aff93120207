use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{info, warn};

use curfew_core::config::Config;

use crate::error::EnforceError;
use crate::ops::PrivilegedOps;
use crate::{firewall, hosts, sudoers};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub firewall_rules_removed: usize,
    pub warnings: Vec<String>,
}

/// Reverts every OS-level change the daemon made.
///
/// Hosts and sudoers failures abort: they leave the machine restricted.
/// The remaining steps are best-effort and only collect warnings.
pub fn restore_system(
    config: &Config,
    config_path: &Path,
    ops: &dyn PrivilegedOps,
) -> Result<RestoreReport, EnforceError> {
    info!("restoring system changes");
    let mut report = RestoreReport {
        firewall_rules_removed: firewall::clear_rules(ops),
        ..RestoreReport::default()
    };
    info!(removed = report.firewall_rules_removed, "firewall rules cleared");

    hosts::cleanup_hosts(&config.hosts_path, ops)?;
    info!(path = %config.hosts_path.display(), "hosts file restored");

    if config.sudoers.enabled {
        sudoers::restore(&config.sudoers, ops)?;
        info!("sudoers configuration restored");
    }

    if let Err(err) = ops.set_immutable(config_path, false) {
        report.warnings.push(format!("config file still immutable: {err:#}"));
    }
    match fs::remove_file(config_path) {
        Ok(()) => info!(path = %config_path.display(), "config file removed"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => report.warnings.push(format!("could not remove config file: {err}")),
    }
    if let Some(dir) = config_path.parent() {
        // only succeeds when empty
        let _ = fs::remove_dir(dir);
    }

    for warning in &report.warnings {
        warn!("{warning}");
    }
    Ok(report)
}
