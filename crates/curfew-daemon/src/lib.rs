//! The curfew daemon: wires the enforcer, the watchers and the control
//! socket into one tokio runtime.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use alerts::Alerts;
use curfew_core::config::Config;
use curfew_core::paths::Paths;
use enforcer::{Enforcer, PrivilegedOps, SystemOps};
use monitor::{ForbiddenSweeper, SigKill, TamperMonitor, ViolationTracker};

pub mod ipc;
pub mod status;
pub mod tasks;
pub mod worker;

use worker::Job;

/// Wall clock in the local offset captured at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    offset: UtcOffset,
}

impl Clock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Reads the local offset. Call before any other thread exists.
    pub fn local() -> Self {
        Self::new(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
    }

    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// State shared by the control socket handlers and the periodic tasks.
pub struct Daemon {
    pub paths: Paths,
    pub clock: Clock,
    pub started_at: OffsetDateTime,
    pub enforcer: Arc<Enforcer>,
    pub alerts: Arc<Alerts>,
    pub violations: Arc<ViolationTracker>,
    jobs: mpsc::Sender<Job>,
    exit: mpsc::Sender<i32>,
}

impl Daemon {
    pub fn new(
        paths: Paths,
        clock: Clock,
        enforcer: Arc<Enforcer>,
        alerts: Arc<Alerts>,
        violations: Arc<ViolationTracker>,
        jobs: mpsc::Sender<Job>,
        exit: mpsc::Sender<i32>,
    ) -> Self {
        Self {
            paths,
            clock,
            started_at: clock.now(),
            enforcer,
            alerts,
            violations,
            jobs,
            exit,
        }
    }

    /// Queues a command effect, waiting for room if the queue is full.
    pub async fn submit(&self, job: Job) {
        let name = job.name();
        if self.jobs.send(job).await.is_err() {
            warn!(job = name, "enforcement worker is gone, job dropped");
        }
    }

    /// Queues a periodic tick unless one is already backed up.
    pub fn submit_tick(&self) {
        if let Err(err) = self.jobs.try_send(Job::Tick) {
            tracing::debug!(error = %err, "tick skipped");
        }
    }

    pub async fn request_exit(&self, code: i32) {
        let _ = self.exit.send(code).await;
    }
}

fn task_result(joined: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => bail!("a daemon task stopped unexpectedly"),
        Ok(Err(err)) => Err(err),
        Err(err) => Err(err).context("daemon task panicked"),
    }
}

/// Runs until uninstall completes (`Ok`) or a task fails fatally (`Err`).
pub async fn run(paths: Paths, config: Config, clock: Clock) -> Result<()> {
    let ops: Arc<dyn PrivilegedOps> = Arc::new(SystemOps);
    let enforcer = Arc::new(Enforcer::new(paths.clone(), config.clone(), Arc::clone(&ops)));
    let alerts = Arc::new(Alerts::new(&config)?);
    let violations = Arc::new(ViolationTracker::new(config.violation_tracking.clone(), clock.now()));

    info!(
        config = %paths.config.display(),
        domains = config.domains.len(),
        "starting curfew daemon"
    );
    {
        let enforcer = Arc::clone(&enforcer);
        let initial = config.clone();
        let now = clock.now();
        tokio::task::spawn_blocking(move || enforcer.initial_enforcement(initial, now))
            .await
            .context("initial enforcement task")??;
    }

    let (jobs_tx, jobs_rx) = worker::channel();
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let daemon = Arc::new(Daemon::new(
        paths.clone(),
        clock,
        Arc::clone(&enforcer),
        Arc::clone(&alerts),
        Arc::clone(&violations),
        jobs_tx,
        exit_tx,
    ));
    let listener = ipc::bind(&paths.socket)?;

    let mut running = JoinSet::new();
    running.spawn(worker::run(Arc::clone(&enforcer), Arc::clone(&alerts), clock, jobs_rx));
    running.spawn(tasks::ticker(Arc::clone(&daemon), config.enforce_interval()));

    if config.tamper_detection.enabled {
        let (monitor_paths, monitor_config) = (paths.clone(), config.clone());
        let monitor = tokio::task::spawn_blocking(move || {
            TamperMonitor::new(&monitor_paths, &monitor_config, ops)
        })
        .await
        .context("arm tamper monitor")?;
        let monitor = Arc::new(monitor);
        enforcer.set_observer(monitor.clone());
        running.spawn(tasks::tamper_loop(
            monitor,
            Arc::clone(&enforcer),
            Arc::clone(&alerts),
            clock,
            config.tamper_interval(),
        ));
    }

    if config.enable_forbidden_programs && config.forbidden_programs.enabled {
        let sweeper = Arc::new(ForbiddenSweeper::new(Box::new(SigKill)));
        running.spawn(tasks::forbidden_loop(
            sweeper,
            config.forbidden_programs.programs.clone(),
            Arc::clone(&violations),
            Arc::clone(&alerts),
            clock,
            config.forbidden_interval(),
        ));
    }

    if config.violation_tracking.enabled && config.violation_tracking.reset_daily {
        running.spawn(tasks::violation_reset_loop(Arc::clone(&violations), clock));
    }

    running.spawn(tasks::signal_loop(Arc::clone(&alerts), clock));
    running.spawn(ipc::serve(listener, Arc::clone(&daemon)));
    info!(socket = %paths.socket.display(), "daemon ready");

    tokio::select! {
        Some(code) = exit_rx.recv() => {
            info!(code, "uninstall complete, exiting");
            Ok(())
        }
        Some(joined) = running.join_next() => task_result(joined),
    }
}
