// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawns and supervises the single managed child: places it in its own
//! process group at spawn time, probes liveness without blocking, and
//! terminates it with an escalating SIGTERM -> poll -> SIGKILL protocol.

use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::Instant;

const GRACE_PERIOD: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("a child process is already running")]
    AlreadyRunning,
    #[error("no active session log to redirect output to: {0}")]
    NoLog(String),
    #[error("fork/exec failed: {0}")]
    Exec(#[source] std::io::Error),
    #[error("spawned child has no pid")]
    NoPid,
}

/// Outcome of [`ChildProcess::terminate`], also used verbatim as the
/// session log footer's `Shutdown Method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    Graceful,
    ForceKilled,
    NotRunning,
}

impl TerminationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationOutcome::Graceful => "Graceful termination",
            TerminationOutcome::ForceKilled => "Force killed",
            TerminationOutcome::NotRunning => "Not running",
        }
    }
}

struct Running {
    child: Child,
    pid: i32,
}

/// Owns at most one live child. `pid_flag` is shared with the
/// [`crate::watchdog::NetworkWatchdog`] so it can validate a pid is still
/// the one it was armed for before signalling it (spec: "guarded by the
/// same pid validity check used elsewhere to avoid signalling an unrelated
/// process that has since reused the pid").
pub struct ChildProcess {
    state: tokio::sync::Mutex<Option<Running>>,
    pid_flag: Arc<AtomicI32>,
}

impl ChildProcess {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(None),
            pid_flag: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Shared pid-validity cell: 0 means "no live child believed valid".
    pub fn pid_flag(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.pid_flag)
    }

    /// `["<binary>", "-c", <config_path>]`, stdout/stderr redirected to
    /// `log_handle`, placed in its own process group (pgid == pid).
    pub async fn spawn(
        &self,
        binary_path: &Path,
        config_path: &Path,
        log_handle: File,
    ) -> Result<i32, SpawnError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Err(SpawnError::AlreadyRunning);
        }

        let stderr_handle = log_handle
            .try_clone()
            .map_err(|e| SpawnError::NoLog(e.to_string()))?;

        let mut cmd = Command::new(binary_path);
        cmd.arg("-c")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_handle))
            .stderr(Stdio::from(stderr_handle))
            .kill_on_drop(false);
        cmd.as_std_mut().process_group(0);

        let child = cmd.spawn().map_err(SpawnError::Exec)?;
        let pid = child.id().ok_or(SpawnError::NoPid)? as i32;

        self.pid_flag.store(pid, Ordering::SeqCst);
        *guard = Some(Running { child, pid });
        Ok(pid)
    }

    /// Currently-tracked pid, if a child has been spawned and not yet
    /// reaped.
    pub async fn pid(&self) -> Option<i32> {
        let guard = self.state.lock().await;
        guard.as_ref().map(|r| r.pid)
    }

    /// Non-blocking liveness probe. Reaps the zombie (and forgets the
    /// child) the moment termination is observed; subsequent calls return
    /// `false`.
    pub async fn is_alive(&self) -> bool {
        let mut guard = self.state.lock().await;
        let Some(running) = guard.as_mut() else {
            return false;
        };

        match running.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_status)) => {
                self.pid_flag.store(0, Ordering::SeqCst);
                *guard = None;
                false
            }
            Err(_) => {
                self.pid_flag.store(0, Ordering::SeqCst);
                *guard = None;
                false
            }
        }
    }

    /// SIGTERM the process group, poll for up to [`GRACE_PERIOD`], then
    /// SIGKILL and block-wait for the reap. Idempotent: a second call
    /// after termination returns [`TerminationOutcome::NotRunning`].
    pub async fn terminate(&self) -> TerminationOutcome {
        let Some(pid) = self.pid().await else {
            return TerminationOutcome::NotRunning;
        };
        if !self.is_alive().await {
            return TerminationOutcome::NotRunning;
        }

        send_group_signal(pid, Signal::SIGTERM);

        let deadline = Instant::now() + GRACE_PERIOD;
        while Instant::now() < deadline {
            if !self.is_alive().await {
                return TerminationOutcome::Graceful;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if !self.is_alive().await {
            return TerminationOutcome::Graceful;
        }

        send_group_signal(pid, Signal::SIGKILL);
        let mut guard = self.state.lock().await;
        if let Some(mut running) = guard.take() {
            let _ = running.child.wait().await;
        }
        self.pid_flag.store(0, Ordering::SeqCst);
        TerminationOutcome::ForceKilled
    }
}

impl Default for ChildProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Best-effort safety net only: the owning Session is expected to
        // `.terminate().await` before dropping (spec invariant: never leave
        // a process group orphaned). `try_lock` here can't await, so a
        // child still alive under contention is merely SIGKILLed, not
        // gracefully escalated or reaped.
        if let Ok(guard) = self.state.try_lock() {
            if let Some(running) = guard.as_ref() {
                send_group_signal(running.pid, Signal::SIGKILL);
            }
        }
    }
}

fn send_group_signal(pid: i32, signal: Signal) {
    // Negative pid targets the whole process group (spec: signal the
    // subtree atomically). ESRCH means it's already gone -- not an error
    // worth surfacing.
    let _ = kill(Pid::from_raw(-pid), signal);
}

#[cfg(test)]
#[path = "child_process_tests.rs"]
mod tests;
