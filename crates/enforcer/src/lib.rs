//! Applies the block list to the operating system and keeps a cached
//! snapshot of the last outcome so periodic checks only rewrite artifacts
//! when something actually changed.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::Result;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use curfew_core::checksum::{ChecksumScope, FileChecksum};
use curfew_core::config::Config;
use curfew_core::paths::Paths;
use curfew_core::types::{append_json_line, TempUnblock, UnblockLogEntry};
use policy_engine::{decide, sudo_allowed};

pub mod command;
pub mod error;
pub mod firewall;
pub mod heal;
pub mod hosts;
pub mod ops;
pub mod restore;
pub mod state;
pub mod sudoers;

pub use error::EnforceError;
pub use ops::{PrivilegedOps, RecordingOps, SystemOps};
pub use restore::RestoreReport;
pub use state::{EnforcementSnapshot, EnforcementState};

/// Told about every legitimate rewrite so it can refresh its expectations.
pub trait ArtifactObserver: Send + Sync {
    fn file_rewritten(&self, path: &Path);
    fn firewall_rewritten(&self, rule_count: usize);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Why the hosts/firewall artifacts were rebuilt, if they were.
    pub rebuilt: Option<String>,
    pub sudoers_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnblockOutcome {
    pub accepted: Vec<String>,
    pub rejected: Vec<(String, String)>,
    pub expires_at: OffsetDateTime,
}

pub struct Enforcer {
    paths: Paths,
    /// Config in effect; the full domain list is dropped after each full pass.
    runtime: RwLock<Config>,
    state: Arc<EnforcementState>,
    ops: Arc<dyn PrivilegedOps>,
    observer: RwLock<Option<Arc<dyn ArtifactObserver>>>,
    rewrite_guard: Mutex<()>,
    /// Set once the system has been restored; no pass runs afterwards.
    halted: AtomicBool,
}

impl Enforcer {
    pub fn new(paths: Paths, config: Config, ops: Arc<dyn PrivilegedOps>) -> Self {
        Self {
            paths,
            runtime: RwLock::new(config),
            state: Arc::new(EnforcementState::new()),
            ops,
            observer: RwLock::new(None),
            rewrite_guard: Mutex::new(()),
            halted: AtomicBool::new(false),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn ArtifactObserver>) {
        *self.observer.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(observer);
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn state(&self) -> Arc<EnforcementState> {
        Arc::clone(&self.state)
    }

    pub fn ops(&self) -> Arc<dyn PrivilegedOps> {
        Arc::clone(&self.ops)
    }

    pub fn snapshot(&self) -> EnforcementSnapshot {
        self.state.snapshot()
    }

    pub fn runtime_config(&self) -> Config {
        self.runtime
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.rewrite_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn observer(&self) -> Option<Arc<dyn ArtifactObserver>> {
        self.observer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn notify_file(&self, path: &Path) {
        if let Some(observer) = self.observer() {
            observer.file_rewritten(path);
        }
    }

    /// Full pass at startup: every artifact is rewritten unconditionally.
    pub fn initial_enforcement(&self, config: Config, now: OffsetDateTime) -> Result<(), EnforceError> {
        let _guard = self.guard();
        self.full_pass(config, now)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Runs `f` while no artifact rewrite is in flight, so a reader sees each
    /// managed file either before or after a rewrite, never halfway. Returns
    /// `None` once the system has been restored.
    pub fn quiesced<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let _guard = self.guard();
        if self.is_halted() {
            return None;
        }
        Some(f())
    }

    fn full_pass(&self, mut config: Config, now: OffsetDateTime) -> Result<(), EnforceError> {
        if self.is_halted() {
            debug!("system restored, full pass skipped");
            return Ok(());
        }
        info!(at = %now, "performing full enforcement");
        let windowed = config.time_windowed_domains();
        info!(count = windowed.len(), "cached domains with time windows");

        let expired = self.state.cleanup_expired(now);
        if expired > 0 {
            debug!(expired, "removed expired temporary unblocks");
        }
        let unblocks = self.state.temp_unblocks();
        let (checksum, blocked_count) = self.write_domain_artifacts(&config, &unblocks, now);

        let mut sudoers_locked = false;
        if config.sudoers.enabled {
            let allowed = sudo_allowed(&config.sudoers, now);
            sudoers_locked = !allowed;
            if let Err(err) = sudoers::ensure_backup(&config.sudoers) {
                warn!(error = %err, "could not back up sudoers");
            }
            match sudoers::update(&config.sudoers, allowed, self.ops.as_ref()) {
                Ok(true) => self.notify_file(&config.sudoers.path),
                Ok(false) => {}
                Err(err) => error!(error = %err, "failed to update sudoers"),
            }
        }

        let window_state = state::time_window_state(&windowed, now);
        self.state.update_snapshot(|snapshot| {
            snapshot.time_window_domains = windowed;
            snapshot.last_time_window_state = window_state;
            snapshot.last_temp_unblock_count = unblocks.len();
            if checksum.is_some() {
                snapshot.expected_hosts_checksum = checksum;
            }
            snapshot.last_blocked_count = blocked_count;
            snapshot.last_sudoers_locked = sudoers_locked;
            snapshot.last_enforcement = Some(now);
        });

        let dropped = config.domains.len();
        config.domains = Vec::new();
        let self_heal = config.enable_self_healing;
        *self.runtime.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        info!(dropped, "released full domain list until the next rebuild");

        if self_heal {
            self.self_heal()?;
        }
        info!("full enforcement completed");
        Ok(())
    }

    /// Writes hosts and firewall from `config`. Returns the new managed-section
    /// checksum (when the hosts write succeeded) and the blocked count.
    fn write_domain_artifacts(
        &self,
        config: &Config,
        unblocks: &[TempUnblock],
        now: OffsetDateTime,
    ) -> (Option<String>, usize) {
        let decision = decide(&config.domains, unblocks, now);
        info!(blocked = decision.blocked.len(), "domains to block");

        let mut checksum = None;
        if config.enable_hosts {
            match hosts::write_hosts(&config.hosts_path, &decision.blocked, self.ops.as_ref()) {
                Ok(written) => {
                    debug!(checksum = %&written.managed_checksum[..16], "hosts checksum stored");
                    checksum = Some(written.managed_checksum);
                    self.notify_file(&config.hosts_path);
                }
                Err(err) => error!(error = %err, "failed to update hosts"),
            }
        }

        if config.enable_firewall {
            let report = firewall::apply(self.ops.as_ref(), &decision.blocked);
            if let Some(observer) = self.observer() {
                let count = firewall::count_rules(self.ops.as_ref()).unwrap_or(report.added);
                observer.firewall_rewritten(count);
            }
        }
        (checksum, decision.blocked.len())
    }

    /// Periodic check. Artifacts are only rebuilt when the cached outcome is stale.
    pub fn enforcement_check(&self, now: OffsetDateTime) -> Result<TickReport, EnforceError> {
        if self.is_halted() {
            return Ok(TickReport::default());
        }
        self.state.cleanup_expired(now);
        let snapshot = self.state.snapshot();
        let runtime = self.runtime_config();
        let unblock_count = self.state.temp_unblock_count();
        let mut window_domains = snapshot.time_window_domains.clone();
        let mut window_state = state::time_window_state(&window_domains, now);

        let mut rebuild = None;
        if unblock_count != snapshot.last_temp_unblock_count {
            rebuild = Some("temp unblocks changed".to_string());
        }
        if rebuild.is_none() {
            rebuild = snapshot
                .last_time_window_state
                .iter()
                .find(|(domain, was_blocked)| window_state.get(*domain) != Some(*was_blocked))
                .map(|(domain, _)| format!("time window state changed for {domain}"));
        }
        if rebuild.is_none()
            && window_state
                .keys()
                .any(|domain| !snapshot.last_time_window_state.contains_key(domain))
        {
            rebuild = Some("new domain in time window state".to_string());
        }
        if rebuild.is_none() && runtime.enable_hosts {
            if let Some(expected) = &snapshot.expected_hosts_checksum {
                match FileChecksum::capture(&runtime.hosts_path, ChecksumScope::ManagedSection) {
                    Ok(current) if !current.exists || &current.checksum != expected => {
                        warn!(path = %runtime.hosts_path.display(), "TAMPER DETECTED: hosts file checksum mismatch");
                        rebuild = Some("hosts file tampered".to_string());
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "could not checksum hosts file"),
                }
            }
        }

        let sudoers_locked = runtime.sudoers.enabled && !sudo_allowed(&runtime.sudoers, now);
        let sudoers_due = runtime.sudoers.enabled && sudoers_locked != snapshot.last_sudoers_locked;

        let mut report = TickReport::default();
        let mut rebuilt = None;
        let mut deferred = false;
        if let Some(reason) = rebuild {
            info!(%reason, "hosts update needed");
            match Config::load_validated(&self.paths.config) {
                Ok(fresh) => {
                    let _guard = self.guard();
                    let unblocks = self.state.temp_unblocks();
                    rebuilt = Some(self.write_domain_artifacts(&fresh, &unblocks, now));
                    window_domains = fresh.time_windowed_domains();
                    window_state = state::time_window_state(&window_domains, now);
                    report.rebuilt = Some(reason);
                }
                Err(err) => {
                    error!(error = ?err, "failed to reload config for hosts update");
                    deferred = true;
                }
            }
        }

        let mut sudoers_applied = false;
        if sudoers_due {
            info!(locked = sudoers_locked, "sudoers update needed: lock state changed");
            let _guard = self.guard();
            match sudoers::update(&runtime.sudoers, !sudoers_locked, self.ops.as_ref()) {
                Ok(changed) => {
                    sudoers_applied = true;
                    report.sudoers_changed = changed;
                    if changed {
                        self.notify_file(&runtime.sudoers.path);
                    }
                }
                Err(err) => error!(error = %err, "failed to update sudoers"),
            }
        }

        self.state.update_snapshot(|cached| {
            if let Some((checksum, blocked_count)) = rebuilt {
                if checksum.is_some() {
                    cached.expected_hosts_checksum = checksum;
                }
                cached.last_blocked_count = blocked_count;
                cached.time_window_domains = window_domains;
            }
            // a deferred rebuild keeps the old trigger state so the next tick retries
            if !deferred {
                cached.last_time_window_state = window_state;
                cached.last_temp_unblock_count = unblock_count;
            }
            if sudoers_applied {
                cached.last_sudoers_locked = sudoers_locked;
            }
            cached.last_enforcement = Some(now);
        });

        if runtime.enable_self_healing {
            self.self_heal()?;
        }
        Ok(report)
    }

    /// Reloads the config from disk, keeps runtime-only keyword additions,
    /// and runs a full pass.
    pub fn force_enforcement(&self, now: OffsetDateTime) -> Result<()> {
        info!("forcing full enforcement cycle");
        let mut fresh = Config::load_validated(&self.paths.config)?;
        fresh.extension_keywords = self.runtime_config().extension_keywords;
        let _guard = self.guard();
        self.full_pass(fresh, now)?;
        Ok(())
    }

    pub fn self_heal(&self) -> Result<(), EnforceError> {
        heal::self_heal(&self.paths.install, &self.paths.config, self.ops.as_ref())
    }

    /// Writes the blocked sudoers line regardless of schedule. The cached lock
    /// state is left alone, so the lock holds until the schedule next changes.
    pub fn lock_sudoers(&self) -> Result<bool, EnforceError> {
        let settings = self.runtime_config().sudoers;
        let _guard = self.guard();
        let changed = sudoers::update(&settings, false, self.ops.as_ref())?;
        if changed {
            self.notify_file(&settings.path);
        }
        info!("sudoers access locked");
        Ok(changed)
    }

    /// Appends permanent rules to the config file on disk, then forces a full pass.
    pub fn block_domains(&self, domains: &[String], now: OffsetDateTime) -> Result<Vec<String>> {
        let path = &self.paths.config;
        let mut config = Config::load_validated(path)?;
        let added = config.add_permanent_domains(domains);
        if added.is_empty() {
            info!("all requested domains are already configured");
        } else {
            let _guard = self.guard();
            if let Err(err) = self.ops.set_immutable(path, false) {
                debug!(error = %err, "config immutable attribute not cleared");
            }
            let saved = config.save(path);
            if let Err(err) = self.ops.set_immutable(path, true) {
                warn!(error = %err, "could not re-apply immutable attribute to config");
            }
            saved?;
            self.notify_file(path);
            for domain in &added {
                info!(domain = %domain, "domain added to permanent block list");
            }
        }
        self.force_enforcement(now)?;
        Ok(added)
    }

    /// Grants temporary unblocks. Absolute domains and configured domains that
    /// are not unblockable are refused; unknown names are accepted.
    pub fn unblock_domains(
        &self,
        domains: &[String],
        reason: &str,
        now: OffsetDateTime,
    ) -> Result<UnblockOutcome> {
        let config = Config::load_validated(&self.paths.config)?;
        let expires_at = deadline(now, config.temp_unblock_minutes(), "temporary unblock")?;
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for domain in domains {
            match config.find_domain(domain) {
                Some(rule) if rule.absolute => {
                    rejected.push((domain.clone(), "absolute domains cannot be unblocked".to_string()));
                }
                Some(rule) if !rule.unblockable => {
                    rejected.push((domain.clone(), "domain is not unblockable".to_string()));
                }
                _ => accepted.push(domain.clone()),
            }
        }
        for (domain, why) in &rejected {
            warn!(domain = %domain, reason = %why, "unblock refused");
        }
        if accepted.is_empty() {
            return Ok(UnblockOutcome { accepted, rejected, expires_at });
        }

        self.state
            .add_temp_unblocks(accepted.iter().map(|domain| TempUnblock::new(domain.clone(), expires_at)));
        if let Some(log_file) = &config.unblocking.log_file {
            for domain in &accepted {
                let entry = UnblockLogEntry {
                    unblock_time: now,
                    restore_time: expires_at,
                    reason: reason.to_string(),
                    domain: domain.clone(),
                };
                if let Err(err) = append_json_line(log_file, &entry) {
                    warn!(error = ?err, "could not write unblock log");
                }
            }
        }
        info!(domains = ?accepted, %reason, until = %expires_at, "temporary unblock granted");
        self.force_enforcement(now)?;
        Ok(UnblockOutcome { accepted, rejected, expires_at })
    }

    /// Extends the runtime keyword lists; returns the words that were new.
    pub fn add_keywords(&self, words: &[String]) -> Vec<String> {
        let mut runtime = self.runtime.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let keywords = &mut runtime.extension_keywords;
        let mut added = Vec::new();
        for word in words {
            let word = word.trim();
            if word.is_empty() || keywords.url_keywords.iter().any(|known| known == word) {
                continue;
            }
            keywords.url_keywords.push(word.to_string());
            if !keywords.content_keywords.iter().any(|known| known == word) {
                keywords.content_keywords.push(word.to_string());
            }
            info!(keyword = word, "KEYWORD ADDED");
            added.push(word.to_string());
        }
        added
    }

    pub fn set_panic(&self, minutes: u64, now: OffsetDateTime) -> Result<OffsetDateTime, EnforceError> {
        let until = deadline(now, minutes, "panic mode")?;
        self.state.set_panic_until(until);
        info!(minutes, until = %until, "panic mode entered");
        Ok(until)
    }

    /// Reverts all OS changes and halts later passes. A failed restore
    /// leaves the enforcer running.
    pub fn restore_system(&self) -> Result<RestoreReport, EnforceError> {
        let config = self.runtime_config();
        let _guard = self.guard();
        self.halted.store(true, Ordering::SeqCst);
        let restored = restore::restore_system(&config, &self.paths.config, self.ops.as_ref());
        if restored.is_err() {
            self.halted.store(false, Ordering::SeqCst);
        }
        restored
    }
}

/// `now` plus `minutes`, refusing anything that would overflow.
fn deadline(now: OffsetDateTime, minutes: u64, what: &'static str) -> Result<OffsetDateTime, EnforceError> {
    i64::try_from(minutes)
        .ok()
        .and_then(|minutes| minutes.checked_mul(60))
        .and_then(|seconds| now.checked_add(time::Duration::seconds(seconds)))
        .ok_or(EnforceError::DeadlineOutOfRange { what, minutes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    use curfew_core::checksum::managed_section;
    use curfew_core::config::DomainRule;
    use curfew_core::window::{Day, TimeWindow};
    use time::macros::datetime;
    use time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        hosts: PathBuf,
        config_path: PathBuf,
        ops: Arc<RecordingOps>,
        enforcer: Enforcer,
    }

    fn fixture(config: impl FnOnce(&mut Config)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        fs::write(&hosts, "127.0.0.1 localhost\n").unwrap();
        let install = dir.path().join("curfew");
        fs::write(&install, b"binary").unwrap();
        let config_path = dir.path().join("config.toml");

        let mut cfg = Config {
            hosts_path: hosts.clone(),
            ..Config::default()
        };
        cfg.domains.push(DomainRule::permanent("example.com"));
        let mut work = DomainRule::permanent("work.com");
        work.unblockable = true;
        work.time_windows.push(TimeWindow::new("09:00", "17:00", &Day::WEEKDAYS).unwrap());
        cfg.domains.push(work);
        let mut social = DomainRule::permanent("social.com");
        social.unblockable = true;
        cfg.domains.push(social);
        let mut casino = DomainRule::permanent("casino.com");
        casino.absolute = true;
        cfg.domains.push(casino);
        config(&mut cfg);
        cfg.save(&config_path).unwrap();

        let ops = Arc::new(RecordingOps::new());
        let paths = Paths {
            config: config_path.clone(),
            install,
            socket: dir.path().join("curfew.sock"),
        };
        let enforcer = Enforcer::new(paths, cfg, ops.clone());
        Fixture { _dir: dir, hosts, config_path, ops, enforcer }
    }

    fn hosts_section(path: &Path) -> String {
        managed_section(&fs::read_to_string(path).unwrap()).to_string()
    }

    #[derive(Default)]
    struct Seen(StdMutex<Vec<PathBuf>>);

    impl ArtifactObserver for Seen {
        fn file_rewritten(&self, path: &Path) {
            self.0.lock().unwrap().push(path.to_path_buf());
        }
        fn firewall_rewritten(&self, _rule_count: usize) {}
    }

    #[test]
    fn initial_pass_writes_hosts_and_drops_domains() {
        let fx = fixture(|_| {});
        let seen = Arc::new(Seen::default());
        fx.enforcer.set_observer(seen.clone());
        let monday_morning = datetime!(2024-01-01 10:00 UTC);

        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), monday_morning).unwrap();
        let section = hosts_section(&fx.hosts);
        assert!(section.contains("127.0.0.1 work.com"));
        assert!(section.contains("::1 www.casino.com"));

        let snapshot = fx.enforcer.snapshot();
        assert_eq!(snapshot.time_window_domains.len(), 1);
        assert_eq!(snapshot.last_time_window_state.get("work.com"), Some(&true));
        assert_eq!(snapshot.last_blocked_count, 4);
        assert!(snapshot.expected_hosts_checksum.is_some());
        assert!(fx.enforcer.runtime_config().domains.is_empty());
        assert!(fx.ops.is_immutable(&fx.hosts));
        assert_eq!(seen.0.lock().unwrap().as_slice(), &[fx.hosts.clone()]);
    }

    #[test]
    fn steady_ticks_do_not_rewrite() {
        let fx = fixture(|_| {});
        let start = datetime!(2024-01-01 10:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), start).unwrap();
        let calls = fx.ops.calls().len();

        let report = fx.enforcer.enforcement_check(start + Duration::minutes(1)).unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(fx.ops.calls().len(), calls);
    }

    #[test]
    fn window_transition_triggers_rebuild() {
        let fx = fixture(|_| {});
        let start = datetime!(2024-01-01 16:59 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), start).unwrap();
        assert!(hosts_section(&fx.hosts).contains(" work.com"));

        let report = fx.enforcer.enforcement_check(datetime!(2024-01-01 17:01 UTC)).unwrap();
        assert_eq!(report.rebuilt.as_deref(), Some("time window state changed for work.com"));
        assert!(!hosts_section(&fx.hosts).contains(" work.com"));
        assert_eq!(fx.enforcer.snapshot().last_blocked_count, 3);
    }

    #[test]
    fn tampered_hosts_section_is_rewritten() {
        let fx = fixture(|_| {});
        let start = datetime!(2024-01-01 18:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), start).unwrap();
        let original = fs::read_to_string(&fx.hosts).unwrap();
        fs::write(&fx.hosts, original.replace("127.0.0.1 example.com\n", "")).unwrap();

        let report = fx.enforcer.enforcement_check(start + Duration::minutes(1)).unwrap();
        assert_eq!(report.rebuilt.as_deref(), Some("hosts file tampered"));
        assert_eq!(fs::read_to_string(&fx.hosts).unwrap(), original);
    }

    #[test]
    fn edits_above_marker_are_not_tamper() {
        let fx = fixture(|_| {});
        let start = datetime!(2024-01-01 18:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), start).unwrap();
        let original = fs::read_to_string(&fx.hosts).unwrap();
        fs::write(&fx.hosts, format!("192.168.1.2 nas\n{original}")).unwrap();

        let report = fx.enforcer.enforcement_check(start + Duration::minutes(1)).unwrap();
        assert_eq!(report.rebuilt, None);
    }

    #[test]
    fn unblock_respects_exemption_flags() {
        let fx = fixture(|_| {});
        let t0 = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), t0).unwrap();

        let names = ["social.com", "casino.com", "example.com", "elsewhere.net"].map(String::from);
        let outcome = fx.enforcer.unblock_domains(&names, "work", t0).unwrap();
        assert_eq!(outcome.accepted, vec!["social.com".to_string(), "elsewhere.net".to_string()]);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.expires_at, t0 + Duration::minutes(30));

        let during = hosts_section(&fx.hosts);
        assert!(!during.contains(" social.com"));
        assert!(during.contains(" casino.com"));

        // the tick after expiry notices the count change and blocks again
        fx.enforcer.enforcement_check(t0 + Duration::minutes(31)).unwrap();
        assert!(hosts_section(&fx.hosts).contains(" social.com"));
    }

    #[test]
    fn unblock_is_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("unblocks.jsonl");
        let journal_path = journal.clone();
        let fx = fixture(move |cfg| cfg.unblocking.log_file = Some(journal_path));
        let t0 = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), t0).unwrap();

        fx.enforcer.unblock_domains(&["social.com".to_string()], "work", t0).unwrap();
        let stats = curfew_core::types::unblock_stats(&journal, t0).unwrap();
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn block_persists_to_config_file() {
        let fx = fixture(|_| {});
        let now = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), now).unwrap();

        let added = fx
            .enforcer
            .block_domains(&["new.org".to_string(), "example.com".to_string()], now)
            .unwrap();
        assert_eq!(added, vec!["new.org".to_string()]);
        assert!(Config::load(&fx.config_path).unwrap().find_domain("new.org").is_some());
        assert!(hosts_section(&fx.hosts).contains("127.0.0.1 new.org"));
        assert!(fx.ops.is_immutable(&fx.config_path));
    }

    #[test]
    fn force_keeps_runtime_keywords() {
        let fx = fixture(|_| {});
        let now = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), now).unwrap();
        assert_eq!(fx.enforcer.add_keywords(&["poker".to_string(), " ".to_string()]), vec!["poker"]);
        assert!(fx.enforcer.add_keywords(&["poker".to_string()]).is_empty());

        fx.enforcer.force_enforcement(now).unwrap();
        let keywords = fx.enforcer.runtime_config().extension_keywords;
        assert_eq!(keywords.url_keywords, vec!["poker".to_string()]);
        assert_eq!(keywords.content_keywords, vec!["poker".to_string()]);
    }

    #[test]
    fn invalid_config_on_disk_keeps_previous_state() {
        let fx = fixture(|_| {});
        let now = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), now).unwrap();
        let before = fx.enforcer.snapshot().last_enforcement;
        fs::write(&fx.config_path, "[[domains]]\nname = \"\"\n").unwrap();

        assert!(fx.enforcer.force_enforcement(now + Duration::minutes(5)).is_err());
        assert_eq!(fx.enforcer.snapshot().last_enforcement, before);
    }

    #[test]
    fn failed_reload_retries_window_transition() {
        let fx = fixture(|_| {});
        let start = datetime!(2024-01-01 16:59 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), start).unwrap();
        let good = fs::read_to_string(&fx.config_path).unwrap();
        fs::write(&fx.config_path, "[[domains]]\nname = \"\"\n").unwrap();

        let report = fx.enforcer.enforcement_check(datetime!(2024-01-01 17:01 UTC)).unwrap();
        assert_eq!(report.rebuilt, None);
        assert!(hosts_section(&fx.hosts).contains(" work.com"));
        assert_eq!(fx.enforcer.snapshot().last_time_window_state.get("work.com"), Some(&true));

        fs::write(&fx.config_path, good).unwrap();
        let report = fx.enforcer.enforcement_check(datetime!(2024-01-01 17:02 UTC)).unwrap();
        assert_eq!(report.rebuilt.as_deref(), Some("time window state changed for work.com"));
        assert!(!hosts_section(&fx.hosts).contains(" work.com"));
    }

    #[test]
    fn rewrites_wait_for_quiesced_readers() {
        let fx = fixture(|_| {});
        let now = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), now).unwrap();

        let order = StdMutex::new(Vec::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        std::thread::scope(|scope| {
            let (enforcer, order) = (&fx.enforcer, &order);
            scope.spawn(move || {
                enforcer
                    .quiesced(|| {
                        entered_tx.send(()).unwrap();
                        std::thread::sleep(std::time::Duration::from_millis(200));
                        order.lock().unwrap().push("read");
                    })
                    .unwrap();
            });
            entered_rx.recv().unwrap();
            enforcer
                .block_domains(&["news.com".to_string()], now + Duration::minutes(1))
                .unwrap();
            order.lock().unwrap().push("rewrite");
        });

        assert_eq!(*order.lock().unwrap(), vec!["read", "rewrite"]);
        assert!(hosts_section(&fx.hosts).contains(" news.com"));
    }

    #[test]
    fn quiesced_reader_stops_after_restore() {
        let fx = fixture(|_| {});
        let now = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), now).unwrap();
        assert_eq!(fx.enforcer.quiesced(|| 7), Some(7));

        fx.enforcer.restore_system().unwrap();
        assert_eq!(fx.enforcer.quiesced(|| 7), None);
    }

    #[test]
    fn sudoers_follows_schedule_and_lock() {
        let fx = fixture(|cfg| {
            cfg.sudoers.enabled = true;
            cfg.sudoers.user = "alice".into();
            cfg.sudoers.allowed_sudoers_line = "alice ALL=(ALL:ALL) ALL".into();
            cfg.sudoers.blocked_sudoers_line = "alice ALL=(ALL) /usr/bin/true".into();
            cfg.sudoers
                .time_allowed
                .push(TimeWindow::new("18:00", "20:00", &Day::ALL).unwrap());
        });
        let sudoers_path = fx.config_path.with_file_name("sudoers");
        fs::write(&sudoers_path, "root ALL=(ALL) ALL\nalice ALL=(ALL:ALL) ALL\n").unwrap();
        let mut cfg = Config::load(&fx.config_path).unwrap();
        cfg.sudoers.path = sudoers_path.clone();
        cfg.save(&fx.config_path).unwrap();

        let evening = datetime!(2024-01-01 19:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), evening).unwrap();
        assert!(!fx.enforcer.snapshot().last_sudoers_locked);
        assert!(cfg.sudoers.backup_path().exists());

        fx.enforcer.lock_sudoers().unwrap();
        assert!(fs::read_to_string(&sudoers_path).unwrap().contains("/usr/bin/true # CURFEW-MANAGED"));
        // the lock is not undone while the schedule still says allowed
        let report = fx.enforcer.enforcement_check(evening + Duration::minutes(1)).unwrap();
        assert!(!report.sudoers_changed);

        let night = datetime!(2024-01-01 21:00 UTC);
        fx.enforcer.enforcement_check(night).unwrap();
        assert!(fx.enforcer.snapshot().last_sudoers_locked);
    }

    #[test]
    fn deleted_binary_stops_enforcement() {
        let fx = fixture(|cfg| cfg.enable_self_healing = true);
        let now = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), now).unwrap();
        fs::remove_file(&fx.enforcer.paths().install).unwrap();

        let err = fx.enforcer.enforcement_check(now + Duration::minutes(1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn restore_halts_later_passes() {
        let fx = fixture(|_| {});
        let now = datetime!(2024-01-06 12:00 UTC);
        fx.enforcer.initial_enforcement(Config::load(&fx.config_path).unwrap(), now).unwrap();

        fx.enforcer.restore_system().unwrap();
        assert_eq!(fs::read_to_string(&fx.hosts).unwrap(), "127.0.0.1 localhost\n");
        assert!(!fx.config_path.exists());

        fx.enforcer.enforcement_check(now + Duration::minutes(40)).unwrap();
        assert_eq!(fs::read_to_string(&fx.hosts).unwrap(), "127.0.0.1 localhost\n");
    }

    #[test]
    fn panic_deadline() {
        let fx = fixture(|_| {});
        let now = datetime!(2024-01-06 12:00 UTC);
        let until = fx.enforcer.set_panic(15, now).unwrap();
        assert_eq!(until, now + Duration::minutes(15));
        assert!(fx.enforcer.state().panic_state().is_active(now));
    }

    #[test]
    fn oversized_panic_is_refused_without_touching_state() {
        let fx = fixture(|_| {});
        let now = datetime!(2024-01-06 12:00 UTC);
        for minutes in [u64::MAX, i64::MAX as u64, 1_000_000_000_000] {
            let err = fx.enforcer.set_panic(minutes, now).unwrap_err();
            assert!(matches!(err, EnforceError::DeadlineOutOfRange { minutes: m, .. } if m == minutes));
            assert!(!err.is_fatal());
        }
        assert!(!fx.enforcer.state().panic_state().is_active(now));
    }
}
