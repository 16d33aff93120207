//! Domain blocking rules.
//!
//! Precedence per rule:
//! - a non-absolute rule with an unexpired temporary unblock is allowed
//! - a rule without windows is always blocked
//! - otherwise the rule is blocked while one of its windows is active

use std::collections::HashSet;

use time::OffsetDateTime;
use tracing::debug;

use curfew_core::config::DomainRule;
use curfew_core::types::TempUnblock;
use curfew_core::window::first_active;

use crate::decision::{BlockDecision, RuleOutcome};

pub const REASON_TEMP_UNBLOCKED: &str = "temporarily unblocked";
pub const REASON_PERMANENT: &str = "always blocked (permanent)";
pub const REASON_UNBLOCKABLE: &str = "always blocked (can be temporarily unblocked)";
pub const REASON_OUTSIDE_WINDOWS: &str = "not blocked (outside time windows)";
pub const REASON_NO_RULE: &str = "not blocked (no matching rule)";

/// Unexpired unblock for `domain`, if one exists.
pub fn active_unblock<'a>(
    unblocks: &'a [TempUnblock],
    domain: &str,
    now: OffsetDateTime,
) -> Option<&'a TempUnblock> {
    unblocks
        .iter()
        .filter(|unblock| unblock.matches(domain) && unblock.is_active(now))
        .max_by_key(|unblock| unblock.expires_at)
}

pub fn is_temp_unblocked(unblocks: &[TempUnblock], domain: &str, now: OffsetDateTime) -> bool {
    active_unblock(unblocks, domain, now).is_some()
}

/// Drops unblocks whose deadline has passed; returns how many were removed.
pub fn cleanup_expired(unblocks: &mut Vec<TempUnblock>, now: OffsetDateTime) -> usize {
    let before = unblocks.len();
    unblocks.retain(|unblock| unblock.is_active(now));
    before - unblocks.len()
}

pub fn evaluate_rule(rule: &DomainRule, unblocks: &[TempUnblock], now: OffsetDateTime) -> RuleOutcome {
    if !rule.absolute {
        if let Some(unblock) = active_unblock(unblocks, &rule.name, now) {
            let until = unblock.expires_at.to_offset(now.offset());
            return RuleOutcome::allowed(format!(
                "{REASON_TEMP_UNBLOCKED} until {:02}:{:02}",
                until.hour(),
                until.minute()
            ));
        }
    }

    if rule.time_windows.is_empty() {
        if rule.unblockable && !rule.absolute {
            return RuleOutcome::blocked(REASON_UNBLOCKABLE);
        }
        return RuleOutcome::blocked(REASON_PERMANENT);
    }

    match first_active(&rule.time_windows, now) {
        Some(window) => RuleOutcome::blocked(format!("blocked by time window {window}")),
        None => RuleOutcome::allowed(REASON_OUTSIDE_WINDOWS),
    }
}

pub fn decide(rules: &[DomainRule], unblocks: &[TempUnblock], now: OffsetDateTime) -> BlockDecision {
    let mut decision = BlockDecision::default();
    let mut seen = HashSet::new();

    for rule in rules {
        let key = rule.name.to_ascii_lowercase();
        if !seen.insert(key) {
            continue;
        }
        let outcome = evaluate_rule(rule, unblocks, now);
        if rule.log_blocking {
            debug!("DOMAIN STATUS: {} -> {}", rule.name, outcome.reason);
        }

        if outcome.blocked {
            if rule.time_windows.is_empty() {
                decision.always_blocked += 1;
            } else {
                decision.window_blocked += 1;
            }
            decision.blocked.push(rule.name.clone());
        } else if outcome.reason.starts_with(REASON_TEMP_UNBLOCKED) {
            decision.temp_unblocked += 1;
        }
        decision.reasons.insert(rule.name.clone(), outcome.reason);
    }

    debug!(
        total_blocked = decision.blocked.len(),
        always = decision.always_blocked,
        windowed = decision.window_blocked,
        temp_unblocked = decision.temp_unblocked,
        "domain evaluation complete"
    );
    decision
}

/// Single-domain view of [`decide`]; the first rule with a matching name wins.
pub fn blocking_reason(
    rules: &[DomainRule],
    unblocks: &[TempUnblock],
    domain: &str,
    now: OffsetDateTime,
) -> String {
    rules
        .iter()
        .find(|rule| rule.name.eq_ignore_ascii_case(domain))
        .map(|rule| evaluate_rule(rule, unblocks, now).reason)
        .unwrap_or_else(|| REASON_NO_RULE.to_string())
}

/// Whether a reason string describes a blocked domain.
pub fn reason_is_blocking(reason: &str) -> bool {
    !(reason.starts_with("not blocked") || reason.starts_with(REASON_TEMP_UNBLOCKED))
}
