use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use time::OffsetDateTime;

use curfew_core::config::DomainRule;
use curfew_core::types::{PanicState, TempUnblock};
use curfew_core::window::first_active;

/// Last-known enforcement outcome, used to detect change cheaply.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnforcementSnapshot {
    /// Only the rules whose outcome varies with the clock.
    pub time_window_domains: Vec<DomainRule>,
    pub last_time_window_state: BTreeMap<String, bool>,
    pub last_temp_unblock_count: usize,
    pub expected_hosts_checksum: Option<String>,
    pub last_sudoers_locked: bool,
    pub last_enforcement: Option<OffsetDateTime>,
    pub last_blocked_count: usize,
}

/// Window-derived blocked flag per cached domain at `now`.
pub fn time_window_state(rules: &[DomainRule], now: OffsetDateTime) -> BTreeMap<String, bool> {
    rules
        .iter()
        .map(|rule| (rule.name.clone(), first_active(&rule.time_windows, now).is_some()))
        .collect()
}

/// Shared mutable enforcement state. Each concern has its own lock and no
/// lock is held across I/O.
#[derive(Debug, Default)]
pub struct EnforcementState {
    snapshot: RwLock<EnforcementSnapshot>,
    temp_unblocks: RwLock<Vec<TempUnblock>>,
    panic: RwLock<PanicState>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EnforcementState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EnforcementSnapshot {
        read(&self.snapshot).clone()
    }

    pub fn update_snapshot(&self, f: impl FnOnce(&mut EnforcementSnapshot)) {
        let mut guard = write(&self.snapshot);
        f(&mut *guard);
    }

    pub fn temp_unblocks(&self) -> Vec<TempUnblock> {
        read(&self.temp_unblocks).clone()
    }

    pub fn temp_unblock_count(&self) -> usize {
        read(&self.temp_unblocks).len()
    }

    /// Adds or extends exemptions; an existing entry for the same domain is replaced.
    pub fn add_temp_unblocks(&self, unblocks: impl IntoIterator<Item = TempUnblock>) {
        let mut current = write(&self.temp_unblocks);
        for unblock in unblocks {
            current.retain(|existing| !existing.matches(&unblock.domain));
            current.push(unblock);
        }
    }

    pub fn cleanup_expired(&self, now: OffsetDateTime) -> usize {
        let mut unblocks = write(&self.temp_unblocks);
        policy_engine::cleanup_expired(&mut unblocks, now)
    }

    pub fn panic_state(&self) -> PanicState {
        *read(&self.panic)
    }

    pub fn set_panic_until(&self, until: OffsetDateTime) {
        write(&self.panic).panic_until = Some(until);
    }
}
