use std::fs;
use std::path::Path;

use tracing::{debug, error, warn};

use crate::error::EnforceError;
use crate::ops::PrivilegedOps;

/// Per-tick integrity check: the installed binary must exist, and the
/// protected files get their immutable attribute re-asserted.
pub fn self_heal(
    install_path: &Path,
    config_path: &Path,
    ops: &dyn PrivilegedOps,
) -> Result<(), EnforceError> {
    if !install_path.exists() {
        error!(path = %install_path.display(), "CRITICAL: installed binary was deleted, self-healing failed");
        return Err(EnforceError::BinaryMissing(install_path.to_path_buf()));
    }

    for path in [install_path, config_path] {
        if let Err(err) = ops.set_immutable(path, true) {
            debug!(path = %path.display(), error = %err, "could not re-apply immutable attribute");
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        let running = fs::canonicalize(&exe).unwrap_or(exe);
        let expected = fs::canonicalize(install_path).unwrap_or_else(|_| install_path.to_path_buf());
        if running != expected {
            warn!(
                running = %running.display(),
                expected = %expected.display(),
                "running from unexpected location"
            );
        }
    }
    Ok(())
}
