use std::net::IpAddr;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::ops::{IpFamily, PrivilegedOps};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallReport {
    pub cleared: usize,
    pub added: usize,
    pub failed: usize,
    pub unresolved: Vec<String>,
}

/// Removes every marker-tagged rule in both families. Best-effort.
pub fn clear_rules(ops: &dyn PrivilegedOps) -> usize {
    let mut cleared = 0;
    for family in IpFamily::ALL {
        let rules = match ops.managed_rules(family) {
            Ok(rules) => rules,
            Err(err) => {
                warn!(tool = family.tool(), error = %err, "could not list firewall rules");
                continue;
            }
        };
        for rule in rules {
            match ops.delete_rule(family, &rule) {
                Ok(()) => cleared += 1,
                Err(err) => debug!(tool = family.tool(), rule = %rule, error = %err, "rule not removed"),
            }
        }
    }
    cleared
}

pub fn count_rules(ops: &dyn PrivilegedOps) -> Result<usize> {
    let mut total = 0;
    for family in IpFamily::ALL {
        total += ops.managed_rules(family)?.len();
    }
    Ok(total)
}

/// Replaces the managed rules with reject rules for `entries`.
/// IP literals are rejected directly; names are resolved first.
pub fn apply(ops: &dyn PrivilegedOps, entries: &[String]) -> FirewallReport {
    let mut report = FirewallReport {
        cleared: clear_rules(ops),
        ..FirewallReport::default()
    };

    for entry in entries {
        let addrs = match entry.parse::<IpAddr>() {
            Ok(addr) => vec![addr],
            Err(_) => {
                let resolved = ops.resolve(entry);
                if resolved.is_empty() {
                    report.unresolved.push(entry.clone());
                }
                resolved
            }
        };
        for addr in addrs {
            match ops.add_reject_rule(addr) {
                Ok(()) => report.added += 1,
                Err(err) => {
                    report.failed += 1;
                    debug!(entry = %entry, %addr, error = %err, "failed to add firewall rule");
                }
            }
        }
    }

    info!(
        cleared = report.cleared,
        added = report.added,
        failed = report.failed,
        unresolved = report.unresolved.len(),
        "firewall rules updated"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::RecordingOps;

    #[test]
    fn replaces_managed_rules() {
        let v4: IpAddr = "93.184.216.34".parse().unwrap();
        let v6: IpAddr = "2606:2800:220:1::1".parse().unwrap();
        let ops = RecordingOps::new().with_resolution("example.com", &[v4, v6]);

        let first = apply(&ops, &["example.com".to_string(), "10.1.2.3".to_string()]);
        assert_eq!(first.added, 3);
        assert_eq!(ops.rule_count(), 3);

        let second = apply(&ops, &["nowhere.invalid".to_string()]);
        assert_eq!(second.cleared, 3);
        assert_eq!(second.added, 0);
        assert_eq!(second.unresolved, vec!["nowhere.invalid".to_string()]);
        assert_eq!(count_rules(&ops).unwrap(), 0);
    }
}
