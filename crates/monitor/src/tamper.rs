//! Tamper detection against an edge-triggered baseline.
//!
//! A check compares disk state with the baseline; after an alarm the caller
//! re-arms, which replaces the baseline wholesale so an accepted change is
//! reported once rather than on every pass.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use curfew_core::checksum::{ChecksumScope, FileChecksum};
use curfew_core::config::Config;
use curfew_core::paths::Paths;
use enforcer::firewall;
use enforcer::{ArtifactObserver, PrivilegedOps};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TamperFinding {
    FileDeleted(PathBuf),
    FileModified(PathBuf),
    FirewallRulesRemoved { before: usize, now: usize },
    ServiceInactive(String),
}

impl fmt::Display for TamperFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TamperFinding::FileDeleted(path) => write!(f, "File deleted: {}", path.display()),
            TamperFinding::FileModified(path) => write!(f, "File modified: {}", path.display()),
            TamperFinding::FirewallRulesRemoved { before, now } => {
                write!(f, "Firewall rules reduced from {before} to {now}")
            }
            TamperFinding::ServiceInactive(service) => write!(f, "{service} was stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredFile {
    pub path: PathBuf,
    pub scope: ChecksumScope,
}

/// Files watched for a given config: binary, config, hosts (managed section
/// only), sudoers and the service unit.
pub fn monitored_files(paths: &Paths, config: &Config) -> Vec<MonitoredFile> {
    let mut files = vec![
        MonitoredFile { path: paths.install.clone(), scope: ChecksumScope::Whole },
        MonitoredFile { path: paths.config.clone(), scope: ChecksumScope::Whole },
    ];
    if config.enable_hosts {
        files.push(MonitoredFile {
            path: config.hosts_path.clone(),
            scope: ChecksumScope::ManagedSection,
        });
    }
    if config.sudoers.enabled {
        files.push(MonitoredFile { path: config.sudoers.path.clone(), scope: ChecksumScope::Whole });
    }
    files.push(MonitoredFile {
        path: config.tamper_detection.service_unit_path.clone(),
        scope: ChecksumScope::Whole,
    });
    files
}

#[derive(Debug, Clone, Default)]
struct Baseline {
    files: Vec<FileChecksum>,
    firewall_rules: usize,
}

pub struct TamperMonitor {
    files: Vec<MonitoredFile>,
    service: String,
    check_firewall: bool,
    ops: Arc<dyn PrivilegedOps>,
    baseline: Mutex<Baseline>,
}

fn capture(file: &MonitoredFile) -> FileChecksum {
    FileChecksum::capture(&file.path, file.scope).unwrap_or_else(|err| {
        warn!(path = %file.path.display(), error = ?err, "could not checksum monitored file");
        FileChecksum {
            path: file.path.clone(),
            scope: file.scope,
            checksum: String::new(),
            exists: true,
        }
    })
}

impl TamperMonitor {
    /// Builds the monitor and captures the first baseline from disk.
    pub fn new(paths: &Paths, config: &Config, ops: Arc<dyn PrivilegedOps>) -> Self {
        let monitor = Self {
            files: monitored_files(paths, config),
            service: config.tamper_detection.service_name.clone(),
            check_firewall: config.enable_firewall,
            ops,
            baseline: Mutex::new(Baseline::default()),
        };
        monitor.rearm();
        monitor
    }

    fn baseline(&self) -> MutexGuard<'_, Baseline> {
        self.baseline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn firewall_rule_count(&self) -> Option<usize> {
        if !self.check_firewall {
            return None;
        }
        match firewall::count_rules(self.ops.as_ref()) {
            Ok(count) => Some(count),
            Err(err) => {
                debug!(error = ?err, "could not count firewall rules");
                None
            }
        }
    }

    pub fn monitored(&self) -> &[MonitoredFile] {
        &self.files
    }

    /// Compares current disk state with the baseline. The baseline is not touched.
    pub fn check(&self) -> Vec<TamperFinding> {
        let baseline = self.baseline().clone();
        let mut findings = Vec::new();

        for (file, expected) in self.files.iter().zip(&baseline.files) {
            let current = capture(file);
            if expected.exists && !current.exists {
                findings.push(TamperFinding::FileDeleted(file.path.clone()));
            } else if expected.exists && current.checksum != expected.checksum {
                findings.push(TamperFinding::FileModified(file.path.clone()));
            }
        }

        if let Some(now) = self.firewall_rule_count() {
            if now < baseline.firewall_rules {
                findings.push(TamperFinding::FirewallRulesRemoved {
                    before: baseline.firewall_rules,
                    now,
                });
            }
        }

        if !self.ops.service_active(&self.service) {
            findings.push(TamperFinding::ServiceInactive(self.service.clone()));
        }

        if findings.is_empty() {
            debug!("tamper check passed");
        } else {
            warn!(count = findings.len(), "tamper check failed");
        }
        findings
    }

    /// Replaces the baseline with what is on disk now.
    pub fn rearm(&self) {
        let files: Vec<FileChecksum> = self.files.iter().map(capture).collect();
        let firewall_rules = self.firewall_rule_count().unwrap_or(0);
        *self.baseline() = Baseline { files, firewall_rules };
        info!(files = self.files.len(), firewall_rules, "tamper baseline armed");
    }

    pub fn baseline_entry(&self, path: &Path) -> Option<FileChecksum> {
        self.baseline().files.iter().find(|entry| entry.path == path).cloned()
    }
}

impl ArtifactObserver for TamperMonitor {
    fn file_rewritten(&self, path: &Path) {
        let Some(file) = self.files.iter().find(|file| file.path == path) else {
            return;
        };
        let fresh = capture(file);
        let mut baseline = self.baseline();
        if let Some(entry) = baseline.files.iter_mut().find(|entry| entry.path == path) {
            debug!(path = %path.display(), checksum = %fresh.checksum, "baseline refreshed after rewrite");
            *entry = fresh;
        }
    }

    fn firewall_rewritten(&self, rule_count: usize) {
        self.baseline().firewall_rules = rule_count;
    }
}
