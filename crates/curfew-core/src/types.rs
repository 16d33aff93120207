use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// In-memory exemption for one domain. Never written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempUnblock {
    pub domain: String,
    pub expires_at: OffsetDateTime,
}

impl TempUnblock {
    pub fn new(domain: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            domain: domain.into(),
            expires_at,
        }
    }

    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }

    pub fn matches(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanicState {
    pub panic_until: Option<OffsetDateTime>,
}

impl PanicState {
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.panic_until.is_some_and(|until| now < until)
    }

    pub fn remaining(&self, now: OffsetDateTime) -> Option<time::Duration> {
        self.panic_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }
}

/// One line of the unblock journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnblockLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub unblock_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub restore_time: OffsetDateTime,
    pub reason: String,
    pub domain: String,
}

/// One line of the uninstall journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnblockStats {
    pub total: usize,
    pub today: usize,
}

pub fn append_json_line<T: Serialize>(path: &Path, entry: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(entry).context("serialize log entry")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append to log {}", path.display()))?;
    Ok(())
}

/// Reads a JSONL journal, skipping lines that do not parse. A missing file is empty.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path).with_context(|| format!("open log {}", path.display()))?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read log {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str(&line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

pub fn unblock_stats(path: &Path, now: OffsetDateTime) -> Result<UnblockStats> {
    let entries: Vec<UnblockLogEntry> = read_json_lines(path)?;
    let today = now.date();
    Ok(UnblockStats {
        total: entries.len(),
        today: entries
            .iter()
            .filter(|entry| entry.unblock_time.to_offset(now.offset()).date() == today)
            .count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn temp_unblock_expires_at_its_deadline() {
        let unblock = TempUnblock::new("Social.com", datetime!(2024-01-01 12:30 UTC));
        assert!(unblock.is_active(datetime!(2024-01-01 12:29:59 UTC)));
        assert!(!unblock.is_active(datetime!(2024-01-01 12:30 UTC)));
        assert!(unblock.matches("social.com"));
    }

    #[test]
    fn panic_remaining() {
        let state = PanicState { panic_until: Some(datetime!(2024-01-01 10:10 UTC)) };
        let now = datetime!(2024-01-01 10:00 UTC);
        assert!(state.is_active(now));
        assert_eq!(state.remaining(now), Some(time::Duration::minutes(10)));
        assert_eq!(state.remaining(datetime!(2024-01-01 11:00 UTC)), None);
        assert!(!PanicState::default().is_active(now));
    }

    #[test]
    fn journal_appends_and_counts_today() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("unblocks.jsonl");
        let entry = |at: OffsetDateTime| UnblockLogEntry {
            unblock_time: at,
            restore_time: at + time::Duration::minutes(30),
            reason: "work".into(),
            domain: "social.com".into(),
        };
        append_json_line(&path, &entry(datetime!(2024-01-01 09:00 UTC))).unwrap();
        append_json_line(&path, &entry(datetime!(2024-01-02 09:00 UTC))).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"not json\n")
            .unwrap();

        let stats = unblock_stats(&path, datetime!(2024-01-02 18:00 UTC)).unwrap();
        assert_eq!(stats, UnblockStats { total: 2, today: 1 });
        let missing = unblock_stats(&dir.path().join("none.jsonl"), datetime!(2024-01-02 18:00 UTC));
        assert_eq!(missing.unwrap(), UnblockStats::default());
    }
}
