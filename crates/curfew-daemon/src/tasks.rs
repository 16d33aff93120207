//! Periodic background tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

use alerts::{format_timestamp, Alerts};
use curfew_core::config::ForbiddenProgram;
use curfew_core::ids::IncidentId;
use enforcer::Enforcer;
use monitor::{ForbiddenSweeper, TamperMonitor, Violation, ViolationTracker};

use crate::{Clock, Daemon};

const VIOLATION_RESET_PERIOD: Duration = Duration::from_secs(60);

/// First tick one period from now; late ticks are skipped, not bunched.
fn every(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

pub async fn ticker(daemon: Arc<Daemon>, period: Duration) -> Result<()> {
    let mut ticker = every(period);
    loop {
        ticker.tick().await;
        daemon.submit_tick();
    }
}

/// Checks run with the enforcer quiesced so a legitimate rewrite is never
/// caught halfway. Stops checking once the system has been restored.
pub async fn tamper_loop(
    monitor: Arc<TamperMonitor>,
    enforcer: Arc<Enforcer>,
    alerts: Arc<Alerts>,
    clock: Clock,
    period: Duration,
) -> Result<()> {
    let mut ticker = every(period);
    loop {
        ticker.tick().await;
        let (checker, gate) = (Arc::clone(&monitor), Arc::clone(&enforcer));
        let findings = tokio::task::spawn_blocking(move || gate.quiesced(|| checker.check()))
            .await
            .context("tamper check panicked")?
            .unwrap_or_default();
        if findings.is_empty() {
            continue;
        }

        let incident = IncidentId::new();
        let reasons: Vec<String> = findings.iter().map(ToString::to_string).collect();
        alerts.tamper(&reasons, incident, clock.now()).await;

        let (rearm, gate) = (Arc::clone(&monitor), Arc::clone(&enforcer));
        tokio::task::spawn_blocking(move || gate.quiesced(|| rearm.rearm()))
            .await
            .context("tamper re-arm panicked")?;
    }
}

pub async fn forbidden_loop(
    sweeper: Arc<ForbiddenSweeper>,
    programs: Vec<ForbiddenProgram>,
    violations: Arc<ViolationTracker>,
    alerts: Arc<Alerts>,
    clock: Clock,
    period: Duration,
) -> Result<()> {
    let programs = Arc::new(programs);
    info!(programs = programs.len(), "forbidden program monitoring started");
    let mut ticker = every(period);
    loop {
        ticker.tick().await;
        let now = clock.now();
        let (sweep, list) = (Arc::clone(&sweeper), Arc::clone(&programs));
        let reports = tokio::task::spawn_blocking(move || sweep.sweep(&list, now))
            .await
            .context("forbidden program sweep panicked")?;
        for report in reports {
            alerts.programs_killed(&report.filter, &report.killed, now).await;
            if let Some(breach) = violations.record(Violation::forbidden_program(&report, now)) {
                let recent: Vec<String> = breach
                    .recent
                    .iter()
                    .map(|violation| format!("{violation} at {}", format_timestamp(violation.at)))
                    .collect();
                alerts
                    .violation_threshold(&recent, breach.max_violations, breach.window_minutes, now)
                    .await;
            }
        }
    }
}

pub async fn violation_reset_loop(violations: Arc<ViolationTracker>, clock: Clock) -> Result<()> {
    let mut ticker = every(VIOLATION_RESET_PERIOD);
    loop {
        ticker.tick().await;
        violations.reset_if_due(clock.now());
    }
}

/// Termination signals are reported, never obeyed.
pub async fn signal_loop(alerts: Arc<Alerts>, clock: Clock) -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("trap SIGTERM")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("trap SIGINT")?;
    let mut hangup = signal(SignalKind::hangup()).context("trap SIGHUP")?;
    let mut quit = signal(SignalKind::quit()).context("trap SIGQUIT")?;
    loop {
        let name = tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
            _ = hangup.recv() => "SIGHUP",
            _ = quit.recv() => "SIGQUIT",
        };
        warn!(signal = name, "termination attempt ignored");
        alerts.termination_attempt(name, clock.now()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use curfew_core::config::{Config, ViolationTrackingConfig};
    use monitor::ProcessKiller;
    use time::UtcOffset;

    struct Pretend;

    impl ProcessKiller for Pretend {
        fn kill(&self, _pid: i32) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn repeated_kills_run_violation_command() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let steam = proc_root.join("200");
        fs::create_dir_all(&steam).unwrap();
        fs::write(steam.join("comm"), "steam\n").unwrap();
        fs::write(steam.join("cmdline"), "/usr/bin/steam").unwrap();
        let marker = dir.path().join("locked");

        let mut config = Config::default();
        config.violation_tracking = ViolationTrackingConfig {
            enabled: true,
            max_violations: 2,
            command: Some(format!("touch {}", marker.display())),
            ..ViolationTrackingConfig::default()
        };
        let clock = Clock::new(UtcOffset::UTC);
        let tracker = Arc::new(ViolationTracker::new(config.violation_tracking.clone(), clock.now()));
        let sweeper = Arc::new(ForbiddenSweeper::with_root(proc_root.clone(), 999, Box::new(Pretend)));
        let programs = vec![ForbiddenProgram { name: "steam".into(), time_windows: Vec::new() }];

        let sweeping = tokio::spawn(forbidden_loop(
            sweeper,
            programs,
            Arc::clone(&tracker),
            Arc::new(Alerts::new(&config).unwrap()),
            clock,
            Duration::from_millis(20),
        ));
        for _ in 0..250 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        sweeping.abort();

        assert!(marker.exists(), "violation command never ran");
        assert!(tracker.total() >= 2);
    }
}
