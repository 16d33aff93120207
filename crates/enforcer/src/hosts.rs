//! Hosts-file writer.
//!
//! Everything up to the marker line belongs to the user and is preserved.
//! Everything from the marker on is rewritten from the block list.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::net::IpAddr;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use curfew_core::paths::HOSTS_MARKER;

use crate::error::EnforceError;
use crate::ops::PrivilegedOps;

pub const BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsWrite {
    /// Checksum of the managed section as written.
    pub managed_checksum: String,
    pub domains_written: usize,
    pub batches: usize,
}

/// Re-applies the immutable attribute when dropped, whether or not the write succeeded.
struct ImmutableGuard<'a> {
    ops: &'a dyn PrivilegedOps,
    path: &'a Path,
}

impl Drop for ImmutableGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.ops.set_immutable(self.path, true) {
            warn!(path = %self.path.display(), error = %err, "could not re-apply immutable attribute");
        }
    }
}

fn read_existing(path: &Path) -> Result<String, EnforceError> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(EnforceError::write(path, err)),
    }
}

/// Lines before the marker, trailing blank lines removed.
pub fn preserved_prefix(contents: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = contents
        .lines()
        .take_while(|line| line.trim() != HOSTS_MARKER)
        .collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines
}

fn entries_for(domain: &str) -> String {
    format!("127.0.0.1 {domain}\n127.0.0.1 www.{domain}\n::1 {domain}\n::1 www.{domain}\n")
}

pub fn write_hosts(
    path: &Path,
    domains: &[String],
    ops: &dyn PrivilegedOps,
) -> Result<HostsWrite, EnforceError> {
    let existing = read_existing(path)?;
    let prefix = preserved_prefix(&existing);

    if let Err(err) = ops.set_immutable(path, false) {
        debug!(error = %err, "immutable attribute not cleared (may not be set)");
    }
    let _guard = ImmutableGuard { ops, path };

    let file = File::create(path).map_err(|err| EnforceError::write(path, err))?;
    let mut writer = BufWriter::new(file);
    let io_err = |err| EnforceError::write(path, err);

    if !prefix.is_empty() {
        writer.write_all(prefix.join("\n").as_bytes()).map_err(io_err)?;
        writer.write_all(b"\n").map_err(io_err)?;
    }
    writer.write_all(b"\n").map_err(io_err)?;

    let mut hasher = Sha256::new();
    let marker = format!("{HOSTS_MARKER}\n");
    hasher.update(marker.as_bytes());
    writer.write_all(marker.as_bytes()).map_err(io_err)?;

    let hostnames: Vec<&String> = domains
        .iter()
        .filter(|domain| domain.parse::<IpAddr>().is_err())
        .collect();
    let total_batches = hostnames.len().div_ceil(BATCH_SIZE);
    let mut batches = 0;
    for batch in hostnames.chunks(BATCH_SIZE) {
        let mut chunk = String::with_capacity(batch.len() * 64);
        for domain in batch {
            chunk.push_str(&entries_for(domain));
        }
        hasher.update(chunk.as_bytes());
        writer.write_all(chunk.as_bytes()).map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        writer.get_ref().sync_data().map_err(io_err)?;
        batches += 1;
        info!(batch = batches, of = total_batches, "hosts file batch written");
    }
    writer.flush().map_err(io_err)?;

    Ok(HostsWrite {
        managed_checksum: hex::encode(hasher.finalize()),
        domains_written: hostnames.len(),
        batches,
    })
}

/// Strips the managed section and leaves the file mutable.
pub fn cleanup_hosts(path: &Path, ops: &dyn PrivilegedOps) -> Result<(), EnforceError> {
    if let Err(err) = ops.set_immutable(path, false) {
        debug!(error = %err, "immutable attribute not cleared (may not be set)");
    }
    let existing = read_existing(path)?;
    let mut contents = preserved_prefix(&existing).join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(path, contents).map_err(|err| EnforceError::write(path, err))
}
