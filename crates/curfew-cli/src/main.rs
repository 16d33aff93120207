use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use curfew_core::ipc::{resolve_socket_path, send_request, ControlRequest, ControlResponse};

#[derive(Parser, Debug)]
#[command(name = "curfewctl", version, about = "Talk to the running curfew daemon")]
struct Cli {
    /// Control socket (defaults to $CURFEW_SOCKET or /run/curfew/curfew.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runtime state: blocked count, temporary unblocks, panic mode
    Status,
    /// Loaded configuration summary
    Info,
    /// Re-read the config file and rebuild every artifact
    Reload,
    /// Permanently block more domains
    Block {
        #[arg(required = true, value_delimiter = ',')]
        domains: Vec<String>,
    },
    /// Temporarily lift blocks on unblockable domains
    Unblock {
        #[arg(long, short)]
        reason: String,
        #[arg(required = true, value_delimiter = ',')]
        domains: Vec<String>,
    },
    /// Enter panic mode for the given number of minutes
    Panic {
        minutes: u64,
    },
    /// Revoke sudo access now
    Lock,
    /// Add browser-extension URL keywords
    AddKeyword {
        #[arg(required = true, value_delimiter = ',')]
        keywords: Vec<String>,
    },
    /// Undo all system changes and stop the daemon
    Uninstall {
        #[arg(long, short)]
        reason: String,
    },
}

impl Commands {
    fn into_request(self) -> ControlRequest {
        match self {
            Commands::Status => ControlRequest::Status,
            Commands::Info => ControlRequest::Info,
            Commands::Reload => ControlRequest::Reload,
            Commands::Block { domains } => ControlRequest::Block { domains },
            Commands::Unblock { reason, domains } => ControlRequest::Unblock { domains, reason },
            Commands::Panic { minutes } => ControlRequest::Panic { minutes },
            Commands::Lock => ControlRequest::Lock,
            Commands::AddKeyword { keywords } => ControlRequest::AddKeywords { words: keywords },
            Commands::Uninstall { reason } => ControlRequest::Uninstall { reason },
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(resolve_socket_path);
    let request = cli.command.into_request();

    let lines = send_request(&socket, &request)?;
    let mut failed = false;
    for line in &lines {
        if let Some(ControlResponse::Error(_)) = ControlResponse::parse(line) {
            failed = true;
        }
        println!("{line}");
    }
    if lines.is_empty() && !request.is_streaming() {
        eprintln!("daemon closed the connection without replying");
        failed = true;
    }
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
