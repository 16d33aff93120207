use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnforceError {
    #[error("failed to update {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sudoers validation failed, live file left untouched: {0}")]
    SudoersValidation(String),
    #[error("sudoers user and allowed/blocked lines must be configured")]
    SudoersNotConfigured,
    #[error("{what} of {minutes} minutes runs past the representable calendar")]
    DeadlineOutOfRange { what: &'static str, minutes: u64 },
    #[error("installed binary missing at {}", .0.display())]
    BinaryMissing(PathBuf),
}

impl EnforceError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::ArtifactWrite {
            path: path.into(),
            source,
        }
    }

    /// The one condition the daemon cannot continue from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BinaryMissing(_))
    }
}
