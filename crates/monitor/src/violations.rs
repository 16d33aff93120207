//! Violation ledger.
//!
//! Every recorded violation is counted against a sliding window. Once the
//! count reaches the configured maximum, each further violation breaches
//! again until the ledger is cleared at the daily reset time.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use time::{Duration, OffsetDateTime, Time};
use tracing::{debug, info, warn};

use curfew_core::config::ViolationTrackingConfig;
use curfew_core::window::ClockTime;

use crate::forbidden::KillReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    ForbiddenProgram,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::ForbiddenProgram => f.write_str("forbidden_program"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub at: OffsetDateTime,
    pub kind: ViolationKind,
    /// What was caught, e.g. the program filter.
    pub target: String,
    pub detail: String,
}

impl Violation {
    /// One violation per filter that killed something in a sweep.
    pub fn forbidden_program(report: &KillReport, at: OffsetDateTime) -> Self {
        Self {
            at,
            kind: ViolationKind::ForbiddenProgram,
            target: report.filter.clone(),
            detail: report.killed.join(", "),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.kind, self.target, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdBreach {
    /// Violations inside the window, oldest first.
    pub recent: Vec<Violation>,
    pub max_violations: usize,
    pub window_minutes: u64,
}

impl ThresholdBreach {
    pub fn count(&self) -> usize {
        self.recent.len()
    }
}

struct Ledger {
    violations: Vec<Violation>,
    last_reset: OffsetDateTime,
}

pub struct ViolationTracker {
    settings: ViolationTrackingConfig,
    ledger: Mutex<Ledger>,
}

impl ViolationTracker {
    pub fn new(settings: ViolationTrackingConfig, now: OffsetDateTime) -> Self {
        Self {
            settings,
            ledger: Mutex::new(Ledger {
                violations: Vec::new(),
                last_reset: now,
            }),
        }
    }

    pub fn settings(&self) -> &ViolationTrackingConfig {
        &self.settings
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn window_minutes(&self) -> u64 {
        self.settings.window().whole_minutes().unsigned_abs()
    }

    fn recent(ledger: &Ledger, cutoff: OffsetDateTime) -> Vec<Violation> {
        ledger
            .violations
            .iter()
            .filter(|violation| violation.at > cutoff)
            .cloned()
            .collect()
    }

    fn cutoff(&self, now: OffsetDateTime) -> OffsetDateTime {
        now.checked_sub(self.settings.window())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Adds `violation` to the ledger. Returns the breach when the count
    /// inside the window has reached the maximum.
    pub fn record(&self, violation: Violation) -> Option<ThresholdBreach> {
        if !self.settings.enabled {
            return None;
        }
        info!(
            kind = %violation.kind,
            target = %violation.target,
            detail = %violation.detail,
            "VIOLATION RECORDED"
        );
        let cutoff = self.cutoff(violation.at);
        let recent = {
            let mut ledger = self.ledger();
            ledger.violations.push(violation);
            Self::recent(&ledger, cutoff)
        };
        debug!(
            recent = recent.len(),
            max = self.settings.max_violations,
            "checked violation threshold"
        );
        if recent.len() < self.settings.max_violations {
            return None;
        }
        warn!(
            recent = recent.len(),
            max = self.settings.max_violations,
            window_minutes = self.window_minutes(),
            "VIOLATION THRESHOLD EXCEEDED"
        );
        Some(ThresholdBreach {
            recent,
            max_violations: self.settings.max_violations,
            window_minutes: self.window_minutes(),
        })
    }

    pub fn recent_count(&self, now: OffsetDateTime) -> usize {
        Self::recent(&self.ledger(), self.cutoff(now)).len()
    }

    pub fn total(&self) -> usize {
        self.ledger().violations.len()
    }

    pub fn last_reset(&self) -> OffsetDateTime {
        self.ledger().last_reset
    }

    /// Clears the ledger when the daily reset time has come round since the
    /// last reset. Returns how many violations were dropped, or `None` when
    /// no reset was due.
    pub fn reset_if_due(&self, now: OffsetDateTime) -> Option<usize> {
        if !self.settings.enabled || !self.settings.reset_daily {
            return None;
        }
        let boundary = last_occurrence(now, self.settings.reset_time);
        let mut ledger = self.ledger();
        if ledger.last_reset >= boundary {
            return None;
        }
        let cleared = ledger.violations.len();
        ledger.violations.clear();
        ledger.last_reset = now;
        if cleared > 0 {
            info!(cleared, reset_time = %self.settings.reset_time, "daily violation reset");
        }
        Some(cleared)
    }
}

/// Latest moment at or before `now` showing `at` on the wall clock.
fn last_occurrence(now: OffsetDateTime, at: ClockTime) -> OffsetDateTime {
    let time = Time::from_hms(at.hour(), at.minute(), 0).unwrap_or(Time::MIDNIGHT);
    let today = now.replace_time(time);
    if today > now {
        today.checked_sub(Duration::DAY).unwrap_or(today)
    } else {
        today
    }
}
