use std::process::ExitStatus;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

use curfew_core::ids::IncidentId;

pub const MESSAGE_ENV: &str = "CURFEW_TAMPER_MESSAGE";
pub const REASONS_ENV: &str = "CURFEW_TAMPER_REASONS";
pub const INCIDENT_ENV: &str = "CURFEW_TAMPER_INCIDENT";

pub const VIOLATION_COUNT_ENV: &str = "CURFEW_VIOLATION_COUNT";
pub const MAX_VIOLATIONS_ENV: &str = "CURFEW_MAX_VIOLATIONS";
pub const TIME_WINDOW_ENV: &str = "CURFEW_TIME_WINDOW";
pub const VIOLATION_TRIGGERED_ENV: &str = "CURFEW_VIOLATION_TRIGGERED";

pub fn alarm_message(reasons: &[String]) -> String {
    let mut message = String::from("CURFEW TAMPER DETECTED:\n");
    for reason in reasons {
        message.push_str("  - ");
        message.push_str(reason);
        message.push('\n');
    }
    message
}

/// Runs the alarm command with the findings passed through the environment.
pub async fn run_alarm(command: &str, reasons: &[String], incident: IncidentId) -> Result<ExitStatus> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| anyhow!("alarm command is empty"))?;
    Command::new(program)
        .args(parts)
        .env(MESSAGE_ENV, alarm_message(reasons))
        .env(REASONS_ENV, reasons.join("; "))
        .env(INCIDENT_ENV, incident.to_string())
        .status()
        .await
        .with_context(|| format!("run alarm command {program}"))
}

/// Runs the violation command with the tally in the environment. `DISPLAY`
/// is set so screen lockers can reach the local session.
pub async fn run_violation_command(
    command: &str,
    count: usize,
    max_violations: usize,
    window_minutes: u64,
) -> Result<ExitStatus> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| anyhow!("violation command is empty"))?;
    Command::new(program)
        .args(parts)
        .env(VIOLATION_COUNT_ENV, count.to_string())
        .env(MAX_VIOLATIONS_ENV, max_violations.to_string())
        .env(TIME_WINDOW_ENV, window_minutes.to_string())
        .env(VIOLATION_TRIGGERED_ENV, "true")
        .env("DISPLAY", ":0")
        .status()
        .await
        .with_context(|| format!("run violation command {program}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn message_lists_each_reason() {
        let reasons = vec!["File deleted: /usr/local/bin/curfew".to_string(), "curfew.service was stopped".to_string()];
        assert_eq!(
            alarm_message(&reasons),
            "CURFEW TAMPER DETECTED:\n  - File deleted: /usr/local/bin/curfew\n  - curfew.service was stopped\n"
        );
    }

    #[tokio::test]
    async fn alarm_sees_environment() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("alarm.sh");
        let out = dir.path().join("out");
        fs::write(
            &script,
            format!("#!/bin/sh\nprintf '%s|%s' \"$CURFEW_TAMPER_REASONS\" \"$CURFEW_TAMPER_INCIDENT\" > {}\n", out.display()),
        )
        .unwrap();
        let incident = IncidentId::new();
        let reasons = vec!["a".to_string(), "b".to_string()];

        let status = run_alarm(&format!("sh {}", script.display()), &reasons, incident).await.unwrap();
        assert!(status.success());
        assert_eq!(fs::read_to_string(&out).unwrap(), format!("a; b|{incident}"));
    }

    #[tokio::test]
    async fn empty_command_is_an_error() {
        assert!(run_alarm("  ", &[], IncidentId::new()).await.is_err());
        assert!(run_violation_command("", 1, 1, 60).await.is_err());
    }

    #[tokio::test]
    async fn violation_command_sees_tally() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("lock.sh");
        let out = dir.path().join("out");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s/%s in %s %s %s' \"$CURFEW_VIOLATION_COUNT\" \"$CURFEW_MAX_VIOLATIONS\" \"$CURFEW_TIME_WINDOW\" \"$CURFEW_VIOLATION_TRIGGERED\" \"$DISPLAY\" > {}\n",
                out.display()
            ),
        )
        .unwrap();

        let status = run_violation_command(&format!("sh {}", script.display()), 6, 5, 60).await.unwrap();
        assert!(status.success());
        assert_eq!(fs::read_to_string(&out).unwrap(), "6/5 in 60 true :0");
    }
}
