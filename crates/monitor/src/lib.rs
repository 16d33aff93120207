//! Watchers that run beside the enforcement loop. `tamper` guards the
//! protected artifacts; `forbidden` kills banned programs and its kills
//! feed the `violations` ledger.

pub mod forbidden;
pub mod tamper;
pub mod violations;

pub use forbidden::{ForbiddenSweeper, KillReport, ProcessKiller, SigKill};
pub use tamper::{monitored_files, MonitoredFile, TamperFinding, TamperMonitor};
pub use violations::{ThresholdBreach, Violation, ViolationKind, ViolationTracker};
