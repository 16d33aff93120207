use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Verdict for a single rule at a single instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub blocked: bool,
    pub reason: String,
}

impl RuleOutcome {
    pub(crate) fn blocked(reason: impl Into<String>) -> Self {
        Self {
            blocked: true,
            reason: reason.into(),
        }
    }

    pub(crate) fn allowed(reason: impl Into<String>) -> Self {
        Self {
            blocked: false,
            reason: reason.into(),
        }
    }
}

/// Aggregate verdict over a rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDecision {
    /// Blocked names in configuration order, without duplicates.
    pub blocked: Vec<String>,
    pub reasons: BTreeMap<String, String>,
    pub always_blocked: usize,
    pub window_blocked: usize,
    pub temp_unblocked: usize,
}

impl BlockDecision {
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.blocked.iter().any(|name| name.eq_ignore_ascii_case(domain))
    }
}
