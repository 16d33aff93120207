//! Line-oriented control socket. Replies are written before the requested
//! effect is queued, so clients never wait on an enforcement pass.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use curfew_core::ipc::{ControlRequest, ControlResponse};
use curfew_core::types::{append_json_line, UninstallLogEntry};

use crate::status::{render_info, render_status};
use crate::worker::Job;
use crate::Daemon;

pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir {}", parent.display()))?;
    }
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .with_context(|| format!("remove stale socket {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("bind socket {}", socket_path.display()))?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("set socket permissions {}", socket_path.display()))?;
    Ok(listener)
}

pub async fn serve(listener: UnixListener, daemon: Arc<Daemon>) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await.context("accept control connection")?;
        if let Err(err) = check_peer_uid(&stream) {
            warn!(error = ?err, "rejected control connection");
            continue;
        }
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, daemon).await {
                debug!(error = ?err, "control connection closed with error");
            }
        });
    }
}

fn check_peer_uid(stream: &UnixStream) -> Result<()> {
    let cred = stream.peer_cred().context("read peer credentials")?;
    let current = nix::unistd::geteuid().as_raw();
    if cred.uid() != current {
        bail!("unauthorized peer uid {}", cred.uid());
    }
    Ok(())
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn reply(writer: &mut OwnedWriteHalf, response: ControlResponse) -> Result<()> {
    write_line(writer, &response.to_string()).await
}

async fn handle_connection(stream: UnixStream, daemon: Arc<Daemon>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request = match ControlRequest::parse(&line) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "malformed control request");
                reply(&mut writer, ControlResponse::from(err)).await?;
                continue;
            }
        };
        info!(action = request.action(), "control request");
        if !dispatch(request, &daemon, &mut writer).await? {
            break;
        }
    }
    Ok(())
}

/// Returns `false` once the connection should be closed.
async fn dispatch(request: ControlRequest, daemon: &Daemon, writer: &mut OwnedWriteHalf) -> Result<bool> {
    match request {
        ControlRequest::Status => {
            let config = daemon.enforcer.runtime_config();
            let state = daemon.enforcer.state();
            let lines = render_status(
                &daemon.enforcer.snapshot(),
                &state.temp_unblocks(),
                state.panic_state(),
                config.sudoers.enabled,
                &daemon.violations,
                daemon.clock.now(),
            );
            for line in lines {
                write_line(writer, &line).await?;
            }
        }
        ControlRequest::Info => {
            let lines = render_info(&daemon.enforcer.runtime_config(), &daemon.enforcer.snapshot());
            for line in lines {
                write_line(writer, &line).await?;
            }
        }
        ControlRequest::Reload => {
            reply(writer, ControlResponse::Ok("Reload request received".into())).await?;
            daemon.submit(Job::Reload).await;
        }
        ControlRequest::Block { domains } => {
            reply(writer, ControlResponse::Ok("Block request received".into())).await?;
            daemon.submit(Job::Block(domains)).await;
        }
        ControlRequest::Unblock { domains, reason } => {
            let config = daemon.enforcer.runtime_config();
            if !config.is_valid_unblock_reason(&reason) {
                let message = format!(
                    "Invalid reason '{reason}'. Valid reasons: {}",
                    config.unblocking.reasons.join(", ")
                );
                reply(writer, ControlResponse::Error(message)).await?;
                return Ok(true);
            }
            reply(writer, ControlResponse::Ok("Unblock request received".into())).await?;
            daemon.submit(Job::Unblock { domains, reason }).await;
        }
        ControlRequest::Panic { minutes } => {
            reply(writer, ControlResponse::Ok(format!("Entering panic mode for {minutes} minutes")))
                .await?;
            daemon.submit(Job::Panic(minutes)).await;
        }
        ControlRequest::Lock => {
            reply(writer, ControlResponse::Ok("Lock request received".into())).await?;
            daemon.submit(Job::Lock).await;
        }
        ControlRequest::AddKeywords { words } => {
            reply(writer, ControlResponse::Ok("Add keyword request received".into())).await?;
            daemon.submit(Job::AddKeywords(words)).await;
        }
        ControlRequest::Uninstall { reason } => {
            reply(writer, ControlResponse::Ok("Uninstall request received".into())).await?;
            return uninstall(reason, daemon, writer).await;
        }
    }
    Ok(true)
}

async fn uninstall(reason: String, daemon: &Daemon, writer: &mut OwnedWriteHalf) -> Result<bool> {
    let now = daemon.clock.now();
    warn!(%reason, "UNINSTALL REQUESTED");
    if let Some(log_file) = daemon.enforcer.runtime_config().uninstall.log_file {
        let entry = UninstallLogEntry { timestamp: now, reason: reason.clone() };
        if let Err(err) = append_json_line(&log_file, &entry) {
            warn!(log = %log_file.display(), error = ?err, "failed to journal uninstall");
        }
    }
    daemon.alerts.uninstalled(&reason, now).await;

    let enforcer = Arc::clone(&daemon.enforcer);
    let restored = tokio::task::spawn_blocking(move || enforcer.restore_system())
        .await
        .context("restore task panicked")?;
    match restored {
        Ok(report) => {
            info!(?report, "system changes restored");
            if let Err(err) = fs::remove_file(&daemon.paths.socket) {
                debug!(error = %err, "socket already gone");
            }
            reply(writer, ControlResponse::Completed("System changes restored".into())).await?;
            daemon.request_exit(0).await;
            Ok(false)
        }
        Err(err) => {
            error!(error = %err, "restore failed, daemon keeps running");
            reply(writer, ControlResponse::Error(format!("Failed to restore system: {err}"))).await?;
            Ok(true)
        }
    }
}
