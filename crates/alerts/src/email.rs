//! Accountability e-mail through a Mailgun-compatible HTTP API.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use curfew_core::config::AccountabilityConfig;

pub const EMAIL_COOLDOWN: Duration = Duration::from_secs(15 * 60);
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-subject cooldown.
#[derive(Debug)]
pub struct EmailLimiter {
    cooldown: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl Default for EmailLimiter {
    fn default() -> Self {
        Self::new(EMAIL_COOLDOWN)
    }
}

impl EmailLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Claims the slot for `subject` at `now`; false while the cooldown runs.
    pub fn try_acquire(&self, subject: &str, now: Instant) -> bool {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = last_sent.get(subject) {
            if now.saturating_duration_since(*previous) < self.cooldown {
                return false;
            }
        }
        last_sent.insert(subject.to_string(), now);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailOutcome {
    Disabled,
    DevSkipped,
    RateLimited,
    Sent,
}

pub struct Mailer {
    settings: AccountabilityConfig,
    dev: bool,
    limiter: EmailLimiter,
    client: reqwest::Client,
}

impl Mailer {
    pub fn new(settings: AccountabilityConfig, dev: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("build e-mail HTTP client")?;
        Ok(Self {
            settings,
            dev,
            limiter: EmailLimiter::default(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/messages",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.mail_domain
        )
    }

    pub async fn send(&self, subject: &str, body: &str) -> Result<EmailOutcome> {
        if !self.settings.enabled {
            return Ok(EmailOutcome::Disabled);
        }
        if self.dev {
            info!(subject, "dev mode, e-mail not sent");
            return Ok(EmailOutcome::DevSkipped);
        }
        if !self.limiter.try_acquire(subject, Instant::now()) {
            info!(subject, "e-mail rate limited");
            return Ok(EmailOutcome::RateLimited);
        }

        info!(
            from = %self.settings.from_email,
            to = %self.settings.partner_email,
            subject,
            "sending accountability e-mail"
        );
        let form = [
            ("from", self.settings.from_email.as_str()),
            ("to", self.settings.partner_email.as_str()),
            ("subject", subject),
            ("text", body),
        ];
        let response = self
            .client
            .post(self.endpoint())
            .basic_auth("api", Some(&self.settings.api_key))
            .form(&form)
            .send()
            .await
            .context("send e-mail request")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("e-mail API returned {status}: {detail}");
        }
        Ok(EmailOutcome::Sent)
    }

    /// Sends and logs the failure instead of returning it.
    pub async fn send_logged(&self, subject: &str, body: &str) {
        if let Err(err) = self.send(subject, body).await {
            warn!(subject, error = ?err, "failed to send e-mail");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_is_per_subject() {
        let limiter = EmailLimiter::new(Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.try_acquire("tamper", start));
        assert!(!limiter.try_acquire("tamper", start + Duration::from_secs(59)));
        assert!(limiter.try_acquire("unblock", start + Duration::from_secs(1)));
        assert!(limiter.try_acquire("tamper", start + Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn disabled_and_dev_mode_never_send() {
        let mailer = Mailer::new(AccountabilityConfig::default(), false).unwrap();
        assert_eq!(mailer.send("s", "b").await.unwrap(), EmailOutcome::Disabled);

        let settings = AccountabilityConfig {
            enabled: true,
            ..AccountabilityConfig::default()
        };
        let dev = Mailer::new(settings, true).unwrap();
        assert_eq!(dev.send("s", "b").await.unwrap(), EmailOutcome::DevSkipped);
    }

    #[test]
    fn endpoint_joins_base_and_domain() {
        let settings = AccountabilityConfig {
            api_base: "https://api.example.test/v3/".into(),
            mail_domain: "mg.example.test".into(),
            ..AccountabilityConfig::default()
        };
        let mailer = Mailer::new(settings, false).unwrap();
        assert_eq!(mailer.endpoint(), "https://api.example.test/v3/mg.example.test/messages");
    }
}
