use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Urgency::Normal => "dialog-warning",
            Urgency::Critical => "dialog-error",
        }
    }
}

/// Splits the configured template into arguments, then fills `{title}`,
/// `{message}`, `{urgency}` and `{icon}` inside each argument.
pub fn render_command(template: &str, title: &str, message: &str, urgency: Urgency) -> Vec<String> {
    template
        .split_whitespace()
        .map(|part| {
            part.replace("{title}", title)
                .replace("{message}", message)
                .replace("{urgency}", urgency.as_str())
                .replace("{icon}", urgency.icon())
        })
        .collect()
}

/// Runs the desktop notification command. Failures are only logged.
pub async fn send_notification(template: Option<&str>, title: &str, message: &str, urgency: Urgency) {
    let Some(template) = template else {
        return;
    };
    let argv = render_command(template, title, message, urgency);
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    let result = Command::new(program)
        .args(args)
        .env("DISPLAY", ":0")
        .status()
        .await;
    match result {
        Ok(status) if status.success() => debug!(title, "notification sent"),
        Ok(status) => debug!(title, %status, "notification command failed"),
        Err(err) => debug!(title, error = %err, "notification command did not start"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_stay_inside_their_argument() {
        let argv = render_command(
            "notify-send -u {urgency} -i {icon} {title} {message}",
            "Curfew Alert",
            "Terminated forbidden program: steam",
            Urgency::Normal,
        );
        assert_eq!(
            argv,
            vec![
                "notify-send",
                "-u",
                "normal",
                "-i",
                "dialog-warning",
                "Curfew Alert",
                "Terminated forbidden program: steam",
            ]
        );
    }

    #[tokio::test]
    async fn missing_command_is_ignored() {
        send_notification(None, "t", "m", Urgency::Critical).await;
        send_notification(Some("   "), "t", "m", Urgency::Critical).await;
    }
}
