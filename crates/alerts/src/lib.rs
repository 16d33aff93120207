//! Outbound alerts: desktop notifications, accountability e-mail and the
//! alarm and violation commands.

use anyhow::Result;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use curfew_core::config::Config;
use curfew_core::ids::IncidentId;

pub mod alarm;
pub mod email;
pub mod notify;

pub use email::{EmailLimiter, EmailOutcome, Mailer};
pub use notify::Urgency;

const STAMP: &[FormatItem<'static>] = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(STAMP).unwrap_or_else(|_| at.to_string())
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.whole_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn bullet_list(title: &str, items: &[String]) -> String {
    let mut body = format!("{title}\n\n");
    for item in items {
        body.push_str("  - ");
        body.push_str(item);
        body.push('\n');
    }
    body.push_str("\nThis is an automated alert from curfew.");
    body
}

pub fn tamper_email_body(reasons: &[String], incident: IncidentId, at: OffsetDateTime) -> String {
    bullet_list(
        &format!("Tampering was detected at {} (incident {incident}):", format_timestamp(at)),
        reasons,
    )
}

pub fn violation_email_body(
    recent: &[String],
    max_violations: usize,
    window_minutes: u64,
    command: Option<&str>,
    at: OffsetDateTime,
) -> String {
    let mut title = format!(
        "The violation threshold was exceeded at {}.\nViolations: {}/{max_violations} (in last {window_minutes} minutes)\n",
        format_timestamp(at),
        recent.len()
    );
    if let Some(command) = command {
        title.push_str(&format!("Command executed: {command}\n"));
    }
    title.push_str("Recent violations:");
    bullet_list(&title, recent)
}

/// Alert channels configured at startup.
pub struct Alerts {
    notification_command: Option<String>,
    alarm_command: Option<String>,
    violation_command: Option<String>,
    mailer: Mailer,
}

impl Alerts {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            notification_command: config.notification_command.clone(),
            alarm_command: config.tamper_detection.alarm_command.clone(),
            violation_command: config.violation_tracking.command.clone(),
            mailer: Mailer::new(config.accountability.clone(), config.dev)?,
        })
    }

    pub async fn notify(&self, title: &str, message: &str, urgency: Urgency) {
        notify::send_notification(self.notification_command.as_deref(), title, message, urgency).await;
    }

    pub async fn email(&self, subject: &str, body: &str) {
        self.mailer.send_logged(subject, body).await;
    }

    /// Full tamper path: notification, e-mail, then the alarm command.
    pub async fn tamper(&self, reasons: &[String], incident: IncidentId, at: OffsetDateTime) {
        warn!(%incident, ?reasons, "raising tamper alarm");
        self.notify("Curfew Security Alert", "System tampering detected!", Urgency::Critical)
            .await;
        self.email("CURFEW ALERT: Tampering Detected", &tamper_email_body(reasons, incident, at))
            .await;
        if let Some(command) = &self.alarm_command {
            match alarm::run_alarm(command, reasons, incident).await {
                Ok(status) => info!(%incident, %status, "alarm command finished"),
                Err(err) => warn!(%incident, error = ?err, "alarm command failed"),
            }
        }
    }

    pub async fn programs_killed(&self, filter: &str, killed: &[String], at: OffsetDateTime) {
        for name in killed {
            self.notify("Curfew Alert", &format!("Terminated forbidden program: {name}"), Urgency::Normal)
                .await;
        }
        let body = bullet_list(
            &format!(
                "Forbidden programs were terminated at {}.\nFilter: {filter}\nTerminated processes:",
                format_timestamp(at)
            ),
            killed,
        );
        self.email("CURFEW ALERT: Forbidden Programs Terminated", &body).await;
    }

    /// The critical notification and the violation command go first; the e-mail follows.
    /// `recent` holds one line per violation inside the window.
    pub async fn violation_threshold(
        &self,
        recent: &[String],
        max_violations: usize,
        window_minutes: u64,
        at: OffsetDateTime,
    ) {
        let count = recent.len();
        self.notify(
            "Curfew Alert",
            &format!("Violation threshold exceeded: {count}/{max_violations}"),
            Urgency::Critical,
        )
        .await;
        if let Some(command) = &self.violation_command {
            match alarm::run_violation_command(command, count, max_violations, window_minutes).await {
                Ok(status) => info!(count, %status, "violation command finished"),
                Err(err) => warn!(count, error = ?err, "violation command failed"),
            }
        }
        let body = violation_email_body(
            recent,
            max_violations,
            window_minutes,
            self.violation_command.as_deref(),
            at,
        );
        self.email("CURFEW ALERT: Violation Threshold Exceeded", &body).await;
    }

    pub async fn termination_attempt(&self, signal: &str, at: OffsetDateTime) {
        let body = bullet_list(
            &format!("Someone attempted to stop curfew at {}:", format_timestamp(at)),
            &[format!("received {signal}")],
        );
        self.email("CURFEW ALERT: Termination Attempt", &body).await;
    }

    pub async fn unblocked(&self, domains: &[String], reason: &str, until: OffsetDateTime) {
        let body = bullet_list(
            &format!(
                "Temporary unblock granted until {} (reason: {reason}):",
                format_timestamp(until)
            ),
            domains,
        );
        self.email("CURFEW ALERT: Temporary Unblock", &body).await;
    }

    pub async fn uninstalled(&self, reason: &str, at: OffsetDateTime) {
        let body = bullet_list(
            &format!("curfew was uninstalled at {}:", format_timestamp(at)),
            &[format!("reason: {reason}")],
        );
        self.email("CURFEW ALERT: Uninstalled", &body).await;
    }
}
