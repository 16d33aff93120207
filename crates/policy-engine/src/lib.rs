//! Decisions over the configured rule sets: which domains are blocked,
//! whether sudo is allowed, which programs must not run.
//!
//! Everything here is pure; callers pass in the rules, the live exemptions
//! and the instant to evaluate.

mod decision;
pub mod rules;

pub use decision::{BlockDecision, RuleOutcome};
pub use rules::domains::{
    active_unblock, blocking_reason, cleanup_expired, decide, evaluate_rule, is_temp_unblocked,
    reason_is_blocking,
};
pub use rules::process::{forbidden_now, is_protected, matches_process, program_forbidden};
pub use rules::sudo::sudo_allowed;
