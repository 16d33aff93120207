use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths::{HOSTS_PATH, SERVICE_NAME, SERVICE_UNIT_PATH, SUDOERS_PATH};
use crate::window::{ClockTime, TimeWindow};

pub const DEFAULT_ENFORCE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TAMPER_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_FORBIDDEN_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_TEMP_UNBLOCK_MINUTES: u64 = 30;
pub const DEFAULT_MAX_VIOLATIONS: usize = 5;
pub const DEFAULT_VIOLATION_WINDOW_MINUTES: u64 = 60;
/// Upper bound for every minute count taken from config or a command.
pub const MAX_DURATION_MINUTES: u64 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enable_hosts: bool,
    pub enable_firewall: bool,
    pub enable_forbidden_programs: bool,
    pub enable_self_healing: bool,
    pub enforce_interval_seconds: u64,
    pub hosts_path: PathBuf,
    pub log_level: String,
    pub dev: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_command: Option<String>,
    pub sudoers: SudoersConfig,
    pub tamper_detection: TamperConfig,
    pub accountability: AccountabilityConfig,
    pub unblocking: UnblockingConfig,
    pub uninstall: UninstallConfig,
    pub forbidden_programs: ForbiddenProgramsConfig,
    pub violation_tracking: ViolationTrackingConfig,
    pub extension_keywords: ExtensionKeywordsConfig,
    pub domains: Vec<DomainRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    pub name: String,
    /// Never honors temporary unblocks.
    #[serde(default, skip_serializing_if = "is_false")]
    pub absolute: bool,
    /// May be temporarily unblocked through the control socket.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unblockable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub log_blocking: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SudoersConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub user: String,
    pub allowed_sudoers_line: String,
    pub blocked_sudoers_line: String,
    pub time_allowed: Vec<TimeWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TamperConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_command: Option<String>,
    pub service_name: String,
    pub service_unit_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountabilityConfig {
    pub enabled: bool,
    pub partner_email: String,
    pub from_email: String,
    pub api_key: String,
    pub api_base: String,
    pub mail_domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnblockingConfig {
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    pub temp_unblock_minutes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UninstallConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForbiddenProgramsConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    pub programs: Vec<ForbiddenProgram>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbiddenProgram {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_windows: Vec<TimeWindow>,
}

/// Counting of repeated violations (currently: forbidden programs found
/// running) with a command run once the count inside the window is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViolationTrackingConfig {
    pub enabled: bool,
    pub max_violations: usize,
    pub time_window_minutes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub reset_daily: bool,
    pub reset_time: ClockTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionKeywordsConfig {
    pub url_keywords: Vec<String>,
    pub content_keywords: Vec<String>,
    pub whitelist: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_hosts: true,
            enable_firewall: false,
            enable_forbidden_programs: false,
            enable_self_healing: false,
            enforce_interval_seconds: DEFAULT_ENFORCE_INTERVAL_SECS,
            hosts_path: PathBuf::from(HOSTS_PATH),
            log_level: "info".to_string(),
            dev: false,
            notification_command: None,
            sudoers: SudoersConfig::default(),
            tamper_detection: TamperConfig::default(),
            accountability: AccountabilityConfig::default(),
            unblocking: UnblockingConfig::default(),
            uninstall: UninstallConfig::default(),
            forbidden_programs: ForbiddenProgramsConfig::default(),
            violation_tracking: ViolationTrackingConfig::default(),
            extension_keywords: ExtensionKeywordsConfig::default(),
            domains: Vec::new(),
        }
    }
}

impl Default for SudoersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from(SUDOERS_PATH),
            user: String::new(),
            allowed_sudoers_line: String::new(),
            blocked_sudoers_line: String::new(),
            time_allowed: Vec::new(),
        }
    }
}

impl Default for TamperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_seconds: DEFAULT_TAMPER_INTERVAL_SECS,
            alarm_command: None,
            service_name: SERVICE_NAME.to_string(),
            service_unit_path: PathBuf::from(SERVICE_UNIT_PATH),
        }
    }
}

impl Default for AccountabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            partner_email: String::new(),
            from_email: String::new(),
            api_key: String::new(),
            api_base: "https://api.mailgun.net/v3".to_string(),
            mail_domain: String::new(),
        }
    }
}

impl Default for UnblockingConfig {
    fn default() -> Self {
        Self {
            reasons: Vec::new(),
            log_file: None,
            temp_unblock_minutes: DEFAULT_TEMP_UNBLOCK_MINUTES,
        }
    }
}

impl Default for ViolationTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_violations: DEFAULT_MAX_VIOLATIONS,
            time_window_minutes: DEFAULT_VIOLATION_WINDOW_MINUTES,
            command: None,
            reset_daily: true,
            reset_time: ClockTime::MIDNIGHT,
        }
    }
}

impl ViolationTrackingConfig {
    pub fn window(&self) -> time::Duration {
        let minutes = match self.time_window_minutes {
            0 => DEFAULT_VIOLATION_WINDOW_MINUTES,
            value => value.min(MAX_DURATION_MINUTES),
        };
        time::Duration::minutes(minutes as i64)
    }
}

impl Default for ForbiddenProgramsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_seconds: DEFAULT_FORBIDDEN_INTERVAL_SECS,
            programs: Vec::new(),
        }
    }
}

impl DomainRule {
    /// A rule with no windows and no exemptions.
    pub fn permanent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time_windows: Vec::new(),
            absolute: false,
            unblockable: false,
            log_blocking: false,
        }
    }

    pub fn is_time_windowed(&self) -> bool {
        !self.time_windows.is_empty()
    }
}

impl SudoersConfig {
    /// Enough is configured to render either variant of the managed line.
    pub fn is_configured(&self) -> bool {
        !self.user.trim().is_empty()
            && !self.allowed_sudoers_line.trim().is_empty()
            && !self.blocked_sudoers_line.trim().is_empty()
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".curfew.backup");
        PathBuf::from(name)
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parse config TOML")?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let output = toml::to_string_pretty(self).context("render config TOML")?;
        Ok(output)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Loads and validates; a config that fails validation is never returned.
    pub fn load_validated(path: &Path) -> Result<Self> {
        let config = Self::load(path)?;
        config
            .validate()
            .with_context(|| format!("validate config at {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let contents = self.to_toml_string()?;
        fs::write(path, contents).with_context(|| format!("write config at {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for domain in &self.domains {
            if domain.name.trim().is_empty() {
                return Err(ConfigError::EmptyDomainName);
            }
            if domain.absolute && domain.unblockable {
                return Err(ConfigError::ConflictingExemption(domain.name.clone()));
            }
            validate_windows(&domain.name, &domain.time_windows)?;
        }

        if self.sudoers.enabled {
            if self.sudoers.user.trim().is_empty() {
                return Err(ConfigError::Sudoers("user cannot be empty when sudoers is enabled".into()));
            }
            if self.sudoers.allowed_sudoers_line.trim().is_empty() {
                return Err(ConfigError::Sudoers(
                    "allowed_sudoers_line cannot be empty when sudoers is enabled".into(),
                ));
            }
            if self.sudoers.blocked_sudoers_line.trim().is_empty() {
                return Err(ConfigError::Sudoers(
                    "blocked_sudoers_line cannot be empty when sudoers is enabled".into(),
                ));
            }
            validate_windows("sudoers time_allowed", &self.sudoers.time_allowed)?;
        }

        if self.unblocking.temp_unblock_minutes > MAX_DURATION_MINUTES {
            return Err(ConfigError::OutOfRange(
                "unblocking.temp_unblock_minutes",
                MAX_DURATION_MINUTES,
            ));
        }

        if self.violation_tracking.enabled {
            if self.violation_tracking.max_violations == 0 {
                return Err(ConfigError::ZeroViolationThreshold);
            }
            if self.violation_tracking.time_window_minutes > MAX_DURATION_MINUTES {
                return Err(ConfigError::OutOfRange(
                    "violation_tracking.time_window_minutes",
                    MAX_DURATION_MINUTES,
                ));
            }
        }

        if self.enable_forbidden_programs && self.forbidden_programs.enabled {
            for program in &self.forbidden_programs.programs {
                if program.name.trim().is_empty() {
                    return Err(ConfigError::EmptyProgramName);
                }
                validate_windows(&program.name, &program.time_windows)?;
            }
        }

        Ok(())
    }

    pub fn find_domain(&self, name: &str) -> Option<&DomainRule> {
        self.domains.iter().find(|rule| rule.name.eq_ignore_ascii_case(name))
    }

    /// The (usually small) subset of rules whose outcome changes over time.
    pub fn time_windowed_domains(&self) -> Vec<DomainRule> {
        self.domains
            .iter()
            .filter(|rule| rule.is_time_windowed())
            .cloned()
            .collect()
    }

    /// Appends permanent rules for names not already configured; returns the ones added.
    pub fn add_permanent_domains<I, S>(&mut self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut known: HashSet<String> = self
            .domains
            .iter()
            .map(|rule| rule.name.to_ascii_lowercase())
            .collect();
        let mut added = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || !known.insert(name.to_ascii_lowercase()) {
                continue;
            }
            self.domains.push(DomainRule::permanent(name));
            added.push(name.to_string());
        }
        added
    }

    pub fn enforce_interval(&self) -> Duration {
        seconds_or_default(self.enforce_interval_seconds, DEFAULT_ENFORCE_INTERVAL_SECS)
    }

    pub fn tamper_interval(&self) -> Duration {
        seconds_or_default(
            self.tamper_detection.check_interval_seconds,
            DEFAULT_TAMPER_INTERVAL_SECS,
        )
    }

    pub fn forbidden_interval(&self) -> Duration {
        seconds_or_default(
            self.forbidden_programs.check_interval_seconds,
            DEFAULT_FORBIDDEN_INTERVAL_SECS,
        )
    }

    /// Unblock length in minutes; zero falls back to the default.
    pub fn temp_unblock_minutes(&self) -> u64 {
        match self.unblocking.temp_unblock_minutes {
            0 => DEFAULT_TEMP_UNBLOCK_MINUTES,
            value => value.min(MAX_DURATION_MINUTES),
        }
    }

    pub fn temp_unblock_duration(&self) -> time::Duration {
        time::Duration::minutes(self.temp_unblock_minutes() as i64)
    }

    /// Case-insensitive check against the configured reason allow-list.
    /// An empty allow-list accepts any non-empty reason.
    pub fn is_valid_unblock_reason(&self, reason: &str) -> bool {
        if self.unblocking.reasons.is_empty() {
            return !reason.trim().is_empty();
        }
        self.unblocking
            .reasons
            .iter()
            .any(|valid| valid.eq_ignore_ascii_case(reason.trim()))
    }
}

fn validate_windows(owner: &str, windows: &[TimeWindow]) -> Result<(), ConfigError> {
    if windows.iter().any(|window| window.days.is_empty()) {
        return Err(ConfigError::EmptyDays(owner.to_string()));
    }
    Ok(())
}

fn seconds_or_default(value: u64, fallback: u64) -> Duration {
    Duration::from_secs(if value == 0 { fallback } else { value })
}
