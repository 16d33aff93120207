//! Forbidden-program sweeper: scans `/proc` and kills matching processes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use curfew_core::config::ForbiddenProgram;
use policy_engine::{forbidden_now, is_protected, matches_process};

pub const PROC_ROOT: &str = "/proc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    /// Short name from `comm`.
    pub name: String,
    /// Basename of the first `cmdline` argument, when readable.
    pub command: Option<String>,
}

impl ProcessEntry {
    pub fn label(&self) -> &str {
        self.command.as_deref().unwrap_or(&self.name)
    }
}

pub trait ProcessKiller: Send + Sync {
    fn kill(&self, pid: i32) -> Result<()>;
}

/// Sends SIGKILL.
#[derive(Debug, Default, Clone, Copy)]
pub struct SigKill;

impl ProcessKiller for SigKill {
    fn kill(&self, pid: i32) -> Result<()> {
        kill(Pid::from_raw(pid), Signal::SIGKILL).with_context(|| format!("SIGKILL {pid}"))
    }
}

fn read_command(dir: &Path) -> Option<String> {
    let raw = fs::read(dir.join("cmdline")).ok()?;
    let first = raw.split(|byte| *byte == 0).next()?;
    if first.is_empty() {
        return None;
    }
    let arg0 = String::from_utf8_lossy(first);
    let base = Path::new(arg0.as_ref()).file_name()?.to_string_lossy().into_owned();
    Some(base)
}

/// Every numeric entry under `proc_root` whose `comm` can be read.
pub fn list_processes(proc_root: &Path) -> Vec<ProcessEntry> {
    let Ok(entries) = fs::read_dir(proc_root) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let pid = entry.file_name().to_str()?.parse::<i32>().ok()?;
            let dir: PathBuf = entry.path();
            let name = fs::read_to_string(dir.join("comm")).ok()?.trim().to_string();
            Some(ProcessEntry {
                pid,
                name,
                command: read_command(&dir),
            })
        })
        .collect()
}

/// Processes caught by `filter`. Pid 1, `self_pid` and protected names are skipped.
pub fn matching<'a>(processes: &'a [ProcessEntry], filter: &str, self_pid: i32) -> Vec<&'a ProcessEntry> {
    processes
        .iter()
        .filter(|process| process.pid != 1 && process.pid != self_pid)
        .filter(|process| {
            let by_name = matches_process(filter, &process.name);
            let by_command = process
                .command
                .as_deref()
                .is_some_and(|command| matches_process(filter, command));
            let protected = is_protected(&process.name)
                || process
                    .command
                    .as_deref()
                    .is_some_and(is_protected);
            (by_name || by_command) && !protected
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillReport {
    pub filter: String,
    /// `name (PID: n)` for each process killed.
    pub killed: Vec<String>,
}

pub struct ForbiddenSweeper {
    proc_root: PathBuf,
    self_pid: i32,
    killer: Box<dyn ProcessKiller>,
}

impl ForbiddenSweeper {
    pub fn new(killer: Box<dyn ProcessKiller>) -> Self {
        Self::with_root(PROC_ROOT, std::process::id() as i32, killer)
    }

    pub fn with_root(proc_root: impl Into<PathBuf>, self_pid: i32, killer: Box<dyn ProcessKiller>) -> Self {
        Self {
            proc_root: proc_root.into(),
            self_pid,
            killer,
        }
    }

    /// One pass: kills every process matched by a program forbidden at `now`.
    /// Only filters that killed something are reported.
    pub fn sweep(&self, programs: &[ForbiddenProgram], now: OffsetDateTime) -> Vec<KillReport> {
        let active = forbidden_now(programs, now);
        if active.is_empty() {
            return Vec::new();
        }
        let processes = list_processes(&self.proc_root);
        debug!(processes = processes.len(), programs = active.len(), "checking for forbidden programs");

        let mut reports = Vec::new();
        for program in active {
            let mut killed = Vec::new();
            for process in matching(&processes, &program.name, self.self_pid) {
                match self.killer.kill(process.pid) {
                    Ok(()) => {
                        info!(
                            name = process.label(),
                            pid = process.pid,
                            filter = %program.name,
                            "KILLED FORBIDDEN PROGRAM"
                        );
                        killed.push(format!("{} (PID: {})", process.label(), process.pid));
                    }
                    Err(err) => warn!(pid = process.pid, error = ?err, "could not kill forbidden program"),
                }
            }
            if !killed.is_empty() {
                reports.push(KillReport {
                    filter: program.name.clone(),
                    killed,
                });
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use curfew_core::window::{Day, TimeWindow};
    use time::macros::datetime;

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<i32>>>);

    impl ProcessKiller for Recorder {
        fn kill(&self, pid: i32) -> Result<()> {
            self.0.lock().unwrap().push(pid);
            Ok(())
        }
    }

    fn fake_proc(root: &Path, pid: i32, comm: &str, cmdline: &[&str]) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
        fs::write(dir.join("cmdline"), cmdline.join("\0")).unwrap();
    }

    fn proc_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path(), 1, "systemd", &["/sbin/init"]);
        fake_proc(dir.path(), 200, "steam", &["/usr/bin/steam", "-silent"]);
        fake_proc(dir.path(), 201, "steamwebhelper", &["/opt/steam/steamwebhelper"]);
        fake_proc(dir.path(), 300, "curfew", &["/usr/local/bin/curfew", "steam"]);
        fake_proc(dir.path(), 400, "firefox", &["/usr/lib/firefox/firefox"]);
        fs::create_dir_all(dir.path().join("self")).unwrap();
        dir
    }

    #[test]
    fn lists_numeric_entries_only() {
        let root = proc_tree();
        let mut pids: Vec<i32> = list_processes(root.path()).iter().map(|p| p.pid).collect();
        pids.sort_unstable();
        assert_eq!(pids, vec![1, 200, 201, 300, 400]);
    }

    #[test]
    fn matching_skips_self_init_and_protected() {
        let root = proc_tree();
        let processes = list_processes(root.path());
        let mut pids: Vec<i32> = matching(&processes, "STEAM", 201).iter().map(|p| p.pid).collect();
        pids.sort_unstable();
        assert_eq!(pids, vec![200]);
        assert!(matching(&processes, "init", 999).is_empty());
    }

    #[test]
    fn sweep_kills_only_during_windows() {
        let root = proc_tree();
        let recorder = Recorder::default();
        let sweeper = ForbiddenSweeper::with_root(root.path(), 999, Box::new(recorder.clone()));
        let programs = vec![ForbiddenProgram {
            name: "firefox".into(),
            time_windows: vec![TimeWindow::new("22:00", "06:00", &Day::ALL).unwrap()],
        }];

        assert!(sweeper.sweep(&programs, datetime!(2024-01-01 12:00 UTC)).is_empty());
        let reports = sweeper.sweep(&programs, datetime!(2024-01-02 01:00 UTC));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].killed, vec!["firefox (PID: 400)".to_string()]);
        assert_eq!(*recorder.0.lock().unwrap(), vec![400]);
    }
}
