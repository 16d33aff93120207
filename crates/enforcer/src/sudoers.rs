//! Sudoers writer.
//!
//! One line carries the managed marker. It toggles between the configured
//! allowed and blocked rule text. Every candidate goes through the syntax
//! checker before it replaces the live file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use tracing::{debug, info, warn};

use curfew_core::config::SudoersConfig;
use curfew_core::paths::SUDOERS_MARKER;

use crate::error::EnforceError;
use crate::ops::PrivilegedOps;

const SUDOERS_MODE: u32 = 0o440;

fn managed_line(text: &str) -> String {
    format!("{} {SUDOERS_MARKER}", text.trim())
}

fn is_user_line(line: &str, user: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with(&format!("{user} ")) || trimmed.starts_with(&format!("# {user} "))
}

/// Substitutes the managed line, adopting the user's own line the first time.
pub fn render(contents: &str, settings: &SudoersConfig, allowed: bool) -> String {
    let target = if allowed {
        &settings.allowed_sudoers_line
    } else {
        &settings.blocked_sudoers_line
    };
    let replacement = managed_line(target);

    let mut found = false;
    let mut lines: Vec<String> = contents
        .split('\n')
        .map(|line| {
            if line.contains(SUDOERS_MARKER) || is_user_line(line, &settings.user) {
                found = true;
                replacement.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        if lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines.push(replacement);
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Staging files never take visudo's own `<file>.tmp` lock name.
const STAGING_PREFIX: &str = ".curfew-sudoers.";

/// Stages `contents` in the same directory as `path`, validates the staged
/// copy, then renames it over the live file.
pub fn write_validated(
    path: &Path,
    contents: &str,
    ops: &dyn PrivilegedOps,
) -> Result<(), EnforceError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .permissions(fs::Permissions::from_mode(SUDOERS_MODE))
        .tempfile_in(dir)
        .map_err(|err| EnforceError::write(dir, err))?;
    let staged_path = staged.path().to_path_buf();
    staged
        .write_all(contents.as_bytes())
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|err| EnforceError::write(&staged_path, err))?;

    // dropping `staged` removes the candidate
    ops.validate_sudoers(&staged_path)
        .map_err(|err| EnforceError::SudoersValidation(format!("{err:#}")))?;

    staged
        .persist(path)
        .map_err(|err| EnforceError::write(path, err.error))?;
    fs::set_permissions(path, fs::Permissions::from_mode(SUDOERS_MODE))
        .map_err(|err| EnforceError::write(path, err))
}

/// Puts the allowed or blocked line in place. Returns whether the file changed.
pub fn update(
    settings: &SudoersConfig,
    allowed: bool,
    ops: &dyn PrivilegedOps,
) -> Result<bool, EnforceError> {
    if !settings.is_configured() {
        return Err(EnforceError::SudoersNotConfigured);
    }
    let current =
        fs::read_to_string(&settings.path).map_err(|err| EnforceError::write(&settings.path, err))?;
    let rendered = render(&current, settings, allowed);
    if rendered == current {
        debug!(allowed, "sudoers already up to date");
        return Ok(false);
    }
    write_validated(&settings.path, &rendered, ops)?;
    info!(allowed, path = %settings.path.display(), "sudoers updated");
    Ok(true)
}

/// Copies the live file aside once; an existing backup is never overwritten.
pub fn ensure_backup(settings: &SudoersConfig) -> Result<bool, EnforceError> {
    let backup = settings.backup_path();
    if backup.exists() {
        return Ok(false);
    }
    let contents = fs::read(&settings.path).map_err(|err| EnforceError::write(&settings.path, err))?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(SUDOERS_MODE)
        .open(&backup)
        .map_err(|err| EnforceError::write(&backup, err))?;
    file.write_all(&contents)
        .map_err(|err| EnforceError::write(&backup, err))?;
    info!(backup = %backup.display(), "sudoers backup created");
    Ok(true)
}

/// Puts the original file back from the backup, or falls back to the allowed line
/// when there is no usable backup. The backup is removed afterwards.
pub fn restore(settings: &SudoersConfig, ops: &dyn PrivilegedOps) -> Result<(), EnforceError> {
    let backup = settings.backup_path();
    let restored = match fs::read_to_string(&backup) {
        Ok(original) => match write_validated(&settings.path, &original, ops) {
            Ok(()) => Ok(()),
            Err(EnforceError::SudoersValidation(reason)) => {
                warn!(%reason, "sudoers backup invalid, switching to the allowed line instead");
                update(settings, true, ops).map(|_| ())
            }
            Err(err) => Err(err),
        },
        Err(err) if err.kind() == ErrorKind::NotFound => update(settings, true, ops).map(|_| ()),
        Err(err) => Err(EnforceError::write(&backup, err)),
    };
    restored?;

    match fs::remove_file(&backup) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(backup = %backup.display(), error = %err, "could not remove sudoers backup"),
    }
    Ok(())
}
