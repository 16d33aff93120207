use std::path::PathBuf;

pub const INSTALL_PATH: &str = "/usr/local/bin/curfew";
pub const CONFIG_PATH: &str = "/etc/curfew/config.toml";
pub const SOCKET_PATH: &str = "/run/curfew/curfew.sock";
pub const HOSTS_PATH: &str = "/etc/hosts";
pub const SUDOERS_PATH: &str = "/etc/sudoers";
pub const SERVICE_NAME: &str = "curfew.service";
pub const SERVICE_UNIT_PATH: &str = "/etc/systemd/system/curfew.service";

/// Sentinel line opening the daemon-owned part of the hosts file.
pub const HOSTS_MARKER: &str = "### CURFEW START ###";
/// Trailing comment on the managed sudoers line.
pub const SUDOERS_MARKER: &str = "# CURFEW-MANAGED";
/// Comment attached to every managed firewall rule.
pub const FIREWALL_MARKER: &str = "CURFEW-BLOCK";

/// Fixed locations the daemon works with, overridable through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub config: PathBuf,
    pub install: PathBuf,
    pub socket: PathBuf,
}

impl Paths {
    pub fn resolve() -> Self {
        Self {
            config: env_or("CURFEW_CONFIG", CONFIG_PATH),
            install: env_or("CURFEW_INSTALL_PATH", INSTALL_PATH),
            socket: env_or("CURFEW_SOCKET", SOCKET_PATH),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            config: PathBuf::from(CONFIG_PATH),
            install: PathBuf::from(INSTALL_PATH),
            socket: PathBuf::from(SOCKET_PATH),
        }
    }
}

fn env_or(key: &str, fallback: &str) -> PathBuf {
    match std::env::var_os(key) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(fallback),
    }
}
