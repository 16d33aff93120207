pub mod checksum;
pub mod config;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod paths;
pub mod types;
pub mod window;

pub use checksum::{ChecksumScope, FileChecksum};
pub use config::{Config, DomainRule, ForbiddenProgram, SudoersConfig};
pub use error::ConfigError;
pub use ids::IncidentId;
pub use ipc::{ControlRequest, ControlResponse, ProtocolError};
pub use paths::Paths;
pub use types::{PanicState, TempUnblock, UnblockLogEntry, UninstallLogEntry};
pub use window::{ClockTime, Day, TimeWindow};
