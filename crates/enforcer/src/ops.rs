//! The seam between enforcement logic and root-only OS mutation.
//!
//! [`SystemOps`] shells out to the platform tools. [`RecordingOps`] keeps the
//! same state in memory so the rest of the crate runs without root.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use tracing::debug;

use curfew_core::paths::FIREWALL_MARKER;

use crate::command::OsCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub const ALL: [IpFamily; 2] = [IpFamily::V4, IpFamily::V6];

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    pub fn tool(self) -> &'static str {
        match self {
            IpFamily::V4 => "iptables",
            IpFamily::V6 => "ip6tables",
        }
    }

    fn reject_with(self) -> &'static str {
        match self {
            IpFamily::V4 => "icmp-host-unreachable",
            IpFamily::V6 => "icmp6-adm-prohibited",
        }
    }
}

pub trait PrivilegedOps: Send + Sync {
    /// Sets or clears the immutable file attribute.
    fn set_immutable(&self, path: &Path, immutable: bool) -> Result<()>;
    /// Syntax-checks a candidate sudoers file.
    fn validate_sudoers(&self, candidate: &Path) -> Result<()>;
    /// Managed OUTPUT-chain rules of one family, in `-S` form.
    fn managed_rules(&self, family: IpFamily) -> Result<Vec<String>>;
    fn delete_rule(&self, family: IpFamily, rule: &str) -> Result<()>;
    fn add_reject_rule(&self, addr: IpAddr) -> Result<()>;
    /// A and AAAA records; empty on resolution failure.
    fn resolve(&self, domain: &str) -> Vec<IpAddr>;
    fn service_active(&self, service: &str) -> bool;
}

/// Runs the real tools. Requires root.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOps;

impl PrivilegedOps for SystemOps {
    fn set_immutable(&self, path: &Path, immutable: bool) -> Result<()> {
        let flag = if immutable { "+i" } else { "-i" };
        OsCommand::new("chattr", [flag.to_string(), path.display().to_string()]).run()
    }

    fn validate_sudoers(&self, candidate: &Path) -> Result<()> {
        OsCommand::new("visudo", ["-c".to_string(), "-f".to_string(), candidate.display().to_string()])
            .run()
    }

    fn managed_rules(&self, family: IpFamily) -> Result<Vec<String>> {
        let listing = OsCommand::new(family.tool(), ["-S", "OUTPUT"]).output()?;
        Ok(listing
            .lines()
            .filter(|line| line.contains(FIREWALL_MARKER))
            .map(str::to_string)
            .collect())
    }

    fn delete_rule(&self, family: IpFamily, rule: &str) -> Result<()> {
        let spec = rule
            .strip_prefix("-A ")
            .ok_or_else(|| anyhow!("not an append rule: {rule}"))?;
        let mut args = vec!["-D".to_string()];
        args.extend(spec.split_whitespace().map(|part| part.trim_matches('"').to_string()));
        OsCommand::new(family.tool(), args).run()
    }

    fn add_reject_rule(&self, addr: IpAddr) -> Result<()> {
        let family = IpFamily::of(&addr);
        OsCommand::new(
            family.tool(),
            [
                "-I".to_string(),
                "OUTPUT".to_string(),
                "-d".to_string(),
                addr.to_string(),
                "-j".to_string(),
                "REJECT".to_string(),
                "--reject-with".to_string(),
                family.reject_with().to_string(),
                "-m".to_string(),
                "comment".to_string(),
                "--comment".to_string(),
                FIREWALL_MARKER.to_string(),
            ],
        )
        .run()
    }

    fn resolve(&self, domain: &str) -> Vec<IpAddr> {
        match (domain, 0u16).to_socket_addrs() {
            Ok(addrs) => {
                let mut seen = HashSet::new();
                addrs
                    .map(|addr| addr.ip())
                    .filter(|ip| seen.insert(*ip))
                    .collect()
            }
            Err(err) => {
                debug!(domain, error = %err, "resolution failed");
                Vec::new()
            }
        }
    }

    fn service_active(&self, service: &str) -> bool {
        match OsCommand::new("systemctl", ["is-active", service]).output() {
            Ok(output) => output.trim() == "active",
            Err(_) => false,
        }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    immutable: HashSet<PathBuf>,
    rules: HashMap<IpFamily, Vec<String>>,
    resolved: HashMap<String, Vec<IpAddr>>,
    calls: Vec<String>,
    reject_sudoers: bool,
    service_down: bool,
}

/// In-memory stand-in for [`SystemOps`]: remembers attributes and rules,
/// and logs every call.
#[derive(Debug, Default)]
pub struct RecordingOps {
    inner: Mutex<Recorded>,
}

impl RecordingOps {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn with_resolution(self, domain: &str, addrs: &[IpAddr]) -> Self {
        self.with(|state| state.resolved.insert(domain.to_string(), addrs.to_vec()));
        self
    }

    pub fn reject_sudoers(&self, reject: bool) {
        self.with(|state| state.reject_sudoers = reject);
    }

    pub fn set_service_active(&self, active: bool) {
        self.with(|state| state.service_down = !active);
    }

    pub fn is_immutable(&self, path: &Path) -> bool {
        self.with(|state| state.immutable.contains(path))
    }

    pub fn rule_count(&self) -> usize {
        self.with(|state| state.rules.values().map(Vec::len).sum())
    }

    /// Simulates someone flushing a rule behind the daemon's back.
    pub fn drop_rule(&self, family: IpFamily) -> Option<String> {
        self.with(|state| state.rules.get_mut(&family).and_then(Vec::pop))
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|state| state.calls.clone())
    }
}

impl PrivilegedOps for RecordingOps {
    fn set_immutable(&self, path: &Path, immutable: bool) -> Result<()> {
        self.with(|state| {
            let flag = if immutable { "+i" } else { "-i" };
            state.calls.push(format!("chattr {flag} {}", path.display()));
            if immutable {
                state.immutable.insert(path.to_path_buf());
            } else {
                state.immutable.remove(path);
            }
        });
        Ok(())
    }

    fn validate_sudoers(&self, candidate: &Path) -> Result<()> {
        self.with(|state| {
            state.calls.push(format!("visudo -c -f {}", candidate.display()));
            if state.reject_sudoers {
                return Err(anyhow!("{}: syntax error", candidate.display()));
            }
            Ok(())
        })
    }

    fn managed_rules(&self, family: IpFamily) -> Result<Vec<String>> {
        Ok(self.with(|state| state.rules.get(&family).cloned().unwrap_or_default()))
    }

    fn delete_rule(&self, family: IpFamily, rule: &str) -> Result<()> {
        self.with(|state| {
            state.calls.push(format!("{} -D {rule}", family.tool()));
            let rules = state.rules.entry(family).or_default();
            match rules.iter().position(|existing| existing == rule) {
                Some(index) => {
                    rules.remove(index);
                    Ok(())
                }
                None => Err(anyhow!("no such rule: {rule}")),
            }
        })
    }

    fn add_reject_rule(&self, addr: IpAddr) -> Result<()> {
        self.with(|state| {
            let family = IpFamily::of(&addr);
            let rule = format!(
                "-A OUTPUT -d {addr} -m comment --comment {FIREWALL_MARKER} -j REJECT --reject-with {}",
                family.reject_with()
            );
            state.calls.push(format!("{} -I OUTPUT -d {addr}", family.tool()));
            state.rules.entry(family).or_default().push(rule);
        });
        Ok(())
    }

    fn resolve(&self, domain: &str) -> Vec<IpAddr> {
        self.with(|state| state.resolved.get(domain).cloned().unwrap_or_default())
    }

    fn service_active(&self, _service: &str) -> bool {
        self.with(|state| !state.service_down)
    }
}
