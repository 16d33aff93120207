use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::paths::HOSTS_MARKER;

/// Which part of a file is fingerprinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumScope {
    Whole,
    /// From the hosts marker line to the end; empty when the marker is absent.
    ManagedSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChecksum {
    pub path: PathBuf,
    pub scope: ChecksumScope,
    pub checksum: String,
    pub exists: bool,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The daemon-owned tail of a hosts file, starting at the marker line.
pub fn managed_section(contents: &str) -> &str {
    let mut offset = 0;
    for line in contents.split_inclusive('\n') {
        if line.trim_end() == HOSTS_MARKER {
            return &contents[offset..];
        }
        offset += line.len();
    }
    ""
}

pub fn managed_section_checksum(contents: &str) -> String {
    sha256_hex(managed_section(contents).as_bytes())
}

impl FileChecksum {
    /// Fingerprints `path` as it is on disk now. A missing file is recorded, not an error.
    pub fn capture(path: &Path, scope: ChecksumScope) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(Self {
                    path: path.to_path_buf(),
                    scope,
                    checksum: String::new(),
                    exists: false,
                });
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", path.display()));
            }
        };
        let checksum = match scope {
            ChecksumScope::Whole => sha256_hex(&bytes),
            ChecksumScope::ManagedSection => {
                managed_section_checksum(&String::from_utf8_lossy(&bytes))
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            scope,
            checksum,
            exists: true,
        })
    }
}
