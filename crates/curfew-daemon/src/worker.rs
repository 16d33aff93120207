//! The single enforcement worker. Every pass that can rewrite an artifact
//! goes through this queue, so passes never overlap.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use alerts::Alerts;
use enforcer::{EnforceError, Enforcer, UnblockOutcome};

use crate::Clock;

pub const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Tick,
    Reload,
    Block(Vec<String>),
    Unblock { domains: Vec<String>, reason: String },
    Panic(u64),
    Lock,
    AddKeywords(Vec<String>),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Tick => "tick",
            Job::Reload => "reload",
            Job::Block(_) => "block",
            Job::Unblock { .. } => "unblock",
            Job::Panic(_) => "panic",
            Job::Lock => "lock",
            Job::AddKeywords(_) => "add-keyword",
        }
    }
}

pub fn channel() -> (mpsc::Sender<Job>, mpsc::Receiver<Job>) {
    mpsc::channel(QUEUE_DEPTH)
}

enum Done {
    Quiet,
    Unblocked { outcome: UnblockOutcome, reason: String },
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<EnforceError>().is_some_and(EnforceError::is_fatal)
}

fn execute(enforcer: &Enforcer, job: Job, now: time::OffsetDateTime) -> Result<Done> {
    match job {
        Job::Tick => {
            let report = enforcer.enforcement_check(now)?;
            if let Some(reason) = report.rebuilt {
                info!(%reason, "artifacts rebuilt");
            }
        }
        Job::Reload => {
            enforcer.force_enforcement(now)?;
            info!("configuration reloaded");
        }
        Job::Block(domains) => {
            let added = enforcer.block_domains(&domains, now)?;
            info!(added = added.len(), "block request applied");
        }
        Job::Unblock { domains, reason } => {
            let outcome = enforcer.unblock_domains(&domains, &reason, now)?;
            if outcome.accepted.is_empty() {
                warn!(rejected = outcome.rejected.len(), "all unblock requests rejected");
                return Ok(Done::Quiet);
            }
            return Ok(Done::Unblocked { outcome, reason });
        }
        Job::Panic(minutes) => {
            enforcer.set_panic(minutes, now)?;
        }
        Job::Lock => {
            enforcer.lock_sudoers()?;
        }
        Job::AddKeywords(words) => {
            let added = enforcer.add_keywords(&words);
            debug!(added = added.len(), "keywords extended");
        }
    }
    Ok(Done::Quiet)
}

/// Drains the queue until every sender is gone. Returns an error only for
/// conditions the daemon cannot continue from.
pub async fn run(
    enforcer: Arc<Enforcer>,
    alerts: Arc<Alerts>,
    clock: Clock,
    mut jobs: mpsc::Receiver<Job>,
) -> Result<()> {
    while let Some(job) = jobs.recv().await {
        let name = job.name();
        let now = clock.now();
        let worker = Arc::clone(&enforcer);
        let done = tokio::task::spawn_blocking(move || execute(&worker, job, now))
            .await
            .with_context(|| format!("{name} job panicked"))?;
        match done {
            Ok(Done::Quiet) => {}
            Ok(Done::Unblocked { outcome, reason }) => {
                alerts.unblocked(&outcome.accepted, &reason, outcome.expires_at).await;
            }
            Err(err) if is_fatal(&err) => {
                error!(job = name, error = ?err, "fatal enforcement failure");
                return Err(err);
            }
            Err(err) => error!(job = name, error = ?err, "enforcement job failed"),
        }
    }
    Ok(())
}
