use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use alerts::Alerts;
use curfew_core::config::{Config, DomainRule};
use curfew_core::ipc::{send_request, ControlRequest};
use curfew_core::paths::Paths;
use curfew_daemon::{ipc, worker, Clock, Daemon};
use enforcer::{Enforcer, RecordingOps};
use monitor::ViolationTracker;
use time::UtcOffset;

struct Harness {
    dir: tempfile::TempDir,
    socket: PathBuf,
    config_path: PathBuf,
    exit: mpsc::Receiver<i32>,
}

async fn start(configure: impl FnOnce(&mut Config, &Path)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let hosts = dir.path().join("hosts");
    fs::write(&hosts, "127.0.0.1 localhost\n").unwrap();
    let install = dir.path().join("curfew");
    fs::write(&install, b"binary").unwrap();
    let config_path = dir.path().join("config.toml");

    let mut config = Config { hosts_path: hosts, ..Config::default() };
    config.domains.push(DomainRule::permanent("example.com"));
    configure(&mut config, dir.path());
    config.save(&config_path).unwrap();

    let paths = Paths {
        config: config_path.clone(),
        install,
        socket: dir.path().join("run").join("curfew.sock"),
    };
    let clock = Clock::new(UtcOffset::UTC);
    let enforcer = Arc::new(Enforcer::new(paths.clone(), config.clone(), Arc::new(RecordingOps::new())));
    enforcer.initial_enforcement(config.clone(), clock.now()).unwrap();
    let alerts = Arc::new(Alerts::new(&config).unwrap());
    let violations = Arc::new(ViolationTracker::new(config.violation_tracking.clone(), clock.now()));

    let (jobs_tx, jobs_rx) = worker::channel();
    let (exit_tx, exit_rx) = mpsc::channel(1);
    let daemon = Arc::new(Daemon::new(
        paths.clone(),
        clock,
        Arc::clone(&enforcer),
        Arc::clone(&alerts),
        violations,
        jobs_tx,
        exit_tx,
    ));
    let listener = ipc::bind(&paths.socket).unwrap();
    tokio::spawn(worker::run(enforcer, alerts, clock, jobs_rx));
    tokio::spawn(ipc::serve(listener, daemon));

    Harness { dir, socket: paths.socket, config_path, exit: exit_rx }
}

async fn request(socket: &PathBuf, request: ControlRequest) -> Vec<String> {
    let socket = socket.clone();
    tokio::task::spawn_blocking(move || send_request(&socket, &request))
        .await
        .unwrap()
        .unwrap()
}

/// Polls the config file while the worker applies a queued job.
async fn reaches_config(config_path: &Path, domain: &str) -> bool {
    for _ in 0..100 {
        let found = Config::load(config_path)
            .map(|on_disk| on_disk.find_domain(domain).is_some())
            .unwrap_or(false);
        if found {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn status_streams_until_end() {
    let harness = start(|_, _| {}).await;
    let lines = request(&harness.socket, ControlRequest::Status).await;
    assert_eq!(lines[0], "RUNTIME STATUS");
    assert!(lines.contains(&"Service Status: Running".to_string()));
    assert!(lines.contains(&"Currently Blocked Domains: 1".to_string()));

    let info = request(&harness.socket, ControlRequest::Info).await;
    assert_eq!(info[0], "CONFIGURATION INFO");
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_line_keeps_connection_open() {
    let harness = start(|_, _| {}).await;
    let socket = harness.socket.clone();
    let lines = tokio::task::spawn_blocking(move || {
        let mut stream = UnixStream::connect(&socket).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream.write_all(b"bogus\npanic:abc\nstatus\n").unwrap();
        let mut lines = Vec::new();
        for line in BufReader::new(stream).lines() {
            let line = line.unwrap();
            let done = line == "END";
            lines.push(line);
            if done {
                break;
            }
        }
        lines
    })
    .await
    .unwrap();

    assert_eq!(lines[0], "ERROR: Unknown action");
    assert_eq!(lines[1], "ERROR: Invalid minutes value. Must be a positive integer");
    assert_eq!(lines[2], "RUNTIME STATUS");
    assert_eq!(lines.last().map(String::as_str), Some("END"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unblock_reason_must_be_allowed() {
    let harness = start(|config, _| {
        config.unblocking.reasons = vec!["work".into(), "school".into()];
    })
    .await;
    let lines = request(
        &harness.socket,
        ControlRequest::Unblock { domains: vec!["example.com".into()], reason: "boredom".into() },
    )
    .await;
    assert_eq!(lines, vec!["ERROR: Invalid reason 'boredom'. Valid reasons: work, school".to_string()]);

    let lines = request(
        &harness.socket,
        ControlRequest::Unblock { domains: vec!["example.com".into()], reason: "Work".into() },
    )
    .await;
    assert_eq!(lines, vec!["OK: Unblock request received".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn block_is_acknowledged_then_persisted() {
    let harness = start(|_, _| {}).await;
    let lines = request(&harness.socket, ControlRequest::Block { domains: vec!["news.com".into()] }).await;
    assert_eq!(lines, vec!["OK: Block request received".to_string()]);

    assert!(
        reaches_config(&harness.config_path, "news.com").await,
        "blocked domain never reached the config file"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_panic_is_refused_and_worker_survives() {
    let harness = start(|_, _| {}).await;
    let lines = request(&harness.socket, ControlRequest::Panic { minutes: 1_000_000_000_000 }).await;
    assert_eq!(lines, vec!["ERROR: Panic duration too long. Maximum is 527040 minutes".to_string()]);
    let lines = request(&harness.socket, ControlRequest::Panic { minutes: u64::MAX }).await;
    assert_eq!(lines, vec!["ERROR: Panic duration too long. Maximum is 527040 minutes".to_string()]);

    let lines = request(&harness.socket, ControlRequest::Panic { minutes: 527_040 }).await;
    assert_eq!(lines, vec!["OK: Entering panic mode for 527040 minutes".to_string()]);
    request(&harness.socket, ControlRequest::Block { domains: vec!["news.com".into()] }).await;
    assert!(
        reaches_config(&harness.config_path, "news.com").await,
        "worker stopped after the panic request"
    );

    let status = request(&harness.socket, ControlRequest::Status).await;
    assert!(status.contains(&"PANIC MODE ACTIVE".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn uninstall_restores_then_exits() {
    let mut harness = start(|config, dir| {
        config.uninstall.log_file = Some(dir.join("uninstall.log"));
    })
    .await;
    let log_file = harness.dir.path().join("uninstall.log");

    let lines = request(&harness.socket, ControlRequest::Uninstall { reason: "moving out".into() }).await;
    assert_eq!(
        lines,
        vec![
            "OK: Uninstall request received".to_string(),
            "COMPLETED: System changes restored".to_string(),
        ]
    );
    assert_eq!(harness.exit.recv().await, Some(0));
    assert!(!harness.socket.exists());
    assert!(!harness.config_path.exists());
    assert!(fs::read_to_string(log_file).unwrap().contains("moving out"));
}
