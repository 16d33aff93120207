use thiserror::Error;

/// Reasons a configuration is refused before it is used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("domain name cannot be empty")]
    EmptyDomainName,
    #[error("forbidden program name cannot be empty")]
    EmptyProgramName,
    #[error("invalid time '{0}' (use HH:MM)")]
    InvalidTime(String),
    #[error("unknown weekday '{0}'")]
    InvalidDay(String),
    #[error("time window for {0} must specify at least one day")]
    EmptyDays(String),
    #[error("domain {0} cannot be both absolute and unblockable")]
    ConflictingExemption(String),
    #[error("invalid sudoers settings: {0}")]
    Sudoers(String),
    #[error("{0} must be between 1 and {1}")]
    OutOfRange(&'static str, u64),
    #[error("violation_tracking.max_violations must be at least 1")]
    ZeroViolationThreshold,
}
