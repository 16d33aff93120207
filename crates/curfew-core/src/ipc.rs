use std::fmt;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::config::MAX_DURATION_MINUTES;
use crate::paths::SOCKET_PATH;

/// Terminates the multi-line `status` and `info` replies.
pub const END_MARKER: &str = "END";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// One control command, as sent on the wire: `action[:payload[:payload2]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Status,
    Info,
    Reload,
    Block { domains: Vec<String> },
    Unblock { domains: Vec<String>, reason: String },
    Panic { minutes: u64 },
    Lock,
    AddKeywords { words: Vec<String> },
    Uninstall { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown action")]
    UnknownAction(String),
    #[error("Invalid format. Use '{0}'")]
    InvalidFormat(&'static str),
    #[error("Reason required. Use 'unblock:domains:reason'")]
    MissingReason,
    #[error("Reason cannot be empty")]
    EmptyReason,
    #[error("Invalid minutes value. Must be a positive integer")]
    InvalidMinutes(String),
    #[error("Panic duration too long. Maximum is {} minutes", MAX_DURATION_MINUTES)]
    PanicTooLong(u64),
    #[error("No {0} given")]
    EmptyList(&'static str),
}

/// A single reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Ok(String),
    Error(String),
    Completed(String),
}

impl ControlRequest {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let (action, payload) = match line.split_once(':') {
            Some((action, payload)) => (action.trim(), Some(payload.trim())),
            None => (line, None),
        };

        match action {
            "status" => Ok(Self::Status),
            "info" => Ok(Self::Info),
            "reload" => Ok(Self::Reload),
            "lock" => Ok(Self::Lock),
            "block" => {
                let payload = payload.ok_or(ProtocolError::InvalidFormat("block:domains"))?;
                Ok(Self::Block { domains: split_list(payload, "domains")? })
            }
            "unblock" => {
                let payload =
                    payload.ok_or(ProtocolError::InvalidFormat("unblock:domains:reason"))?;
                let (domains, reason) =
                    payload.split_once(':').ok_or(ProtocolError::MissingReason)?;
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(ProtocolError::EmptyReason);
                }
                Ok(Self::Unblock {
                    domains: split_list(domains, "domains")?,
                    reason: reason.to_string(),
                })
            }
            "panic" => {
                let payload = payload.ok_or(ProtocolError::InvalidFormat("panic:minutes"))?;
                match payload.parse::<u64>() {
                    Ok(minutes) if minutes > MAX_DURATION_MINUTES => {
                        Err(ProtocolError::PanicTooLong(minutes))
                    }
                    Ok(minutes) if minutes > 0 => Ok(Self::Panic { minutes }),
                    _ => Err(ProtocolError::InvalidMinutes(payload.to_string())),
                }
            }
            "add-keyword" => {
                let payload =
                    payload.ok_or(ProtocolError::InvalidFormat("add-keyword:keywords"))?;
                Ok(Self::AddKeywords { words: split_list(payload, "keywords")? })
            }
            "uninstall" => {
                let payload = payload.ok_or(ProtocolError::InvalidFormat("uninstall:reason"))?;
                if payload.is_empty() {
                    return Err(ProtocolError::EmptyReason);
                }
                Ok(Self::Uninstall { reason: payload.to_string() })
            }
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Info => "info",
            Self::Reload => "reload",
            Self::Block { .. } => "block",
            Self::Unblock { .. } => "unblock",
            Self::Panic { .. } => "panic",
            Self::Lock => "lock",
            Self::AddKeywords { .. } => "add-keyword",
            Self::Uninstall { .. } => "uninstall",
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Self::Block { domains } => format!("block:{}", domains.join(",")),
            Self::Unblock { domains, reason } => {
                format!("unblock:{}:{}", domains.join(","), reason)
            }
            Self::Panic { minutes } => format!("panic:{minutes}"),
            Self::AddKeywords { words } => format!("add-keyword:{}", words.join(",")),
            Self::Uninstall { reason } => format!("uninstall:{reason}"),
            other => other.action().to_string(),
        }
    }

    /// Replies to these stream several lines and finish with [`END_MARKER`].
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Status | Self::Info)
    }
}

impl ControlResponse {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("OK:") {
            return Some(Self::Ok(rest.trim_start().to_string()));
        }
        if let Some(rest) = line.strip_prefix("ERROR:") {
            return Some(Self::Error(rest.trim_start().to_string()));
        }
        if let Some(rest) = line.strip_prefix("COMPLETED:") {
            return Some(Self::Completed(rest.trim_start().to_string()));
        }
        None
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error(_))
    }
}

impl fmt::Display for ControlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(message) => write!(f, "OK: {message}"),
            Self::Error(message) => write!(f, "ERROR: {message}"),
            Self::Completed(message) => write!(f, "COMPLETED: {message}"),
        }
    }
}

impl From<ProtocolError> for ControlResponse {
    fn from(err: ProtocolError) -> Self {
        Self::Error(err.to_string())
    }
}

fn split_list(payload: &str, what: &'static str) -> Result<Vec<String>, ProtocolError> {
    let items: Vec<String> = payload
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err(ProtocolError::EmptyList(what));
    }
    Ok(items)
}

pub fn resolve_socket_path() -> PathBuf {
    match std::env::var("CURFEW_SOCKET") {
        Ok(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(SOCKET_PATH),
    }
}

/// Sends one command and collects the reply lines (without the trailing `END`).
pub fn send_request(socket_path: &Path, request: &ControlRequest) -> Result<Vec<String>> {
    let stream = UnixStream::connect(socket_path)
        .with_context(|| format!("connect to daemon at {}", socket_path.display()))?;
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    let mut writer = BufWriter::new(stream.try_clone()?);
    writer.write_all(request.to_line().as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).context("read daemon reply")? == 0 {
            break;
        }
        let line = line.trim_end().to_string();
        if request.is_streaming() {
            if line == END_MARKER {
                break;
            }
            lines.push(line);
            continue;
        }

        let acknowledged = matches!(ControlResponse::parse(&line), Some(ControlResponse::Ok(_)));
        lines.push(line);
        // uninstall follows its ack with a completion (or failure) line
        let awaiting_completion = matches!(request, ControlRequest::Uninstall { .. })
            && acknowledged
            && lines.len() == 1;
        if !awaiting_completion {
            break;
        }
    }
    Ok(lines)
}
