// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parses a command line, validates state, executes, and produces a
//! structured reply. All command executions are serialized by a single
//! mutex -- the same mutex that guards the active [`Session`] -- so that
//! no command observes an intermediate state while another is mid-flight
//! (spec: "Blocking under a held mutex" is intentional here).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use argus_core::paths::normalize_config_name;
use argus_core::{ChildLocator, Config, ConfigDirectory, DispatchError, LifecycleState, StateMachine};
use argus_engine::{ChildProcess, NetworkWatchdog, SessionLog};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::audit::CommandAudit;
use crate::session::Session;

/// Delay between spawning the child and the first liveness probe.
const STARTUP_PROBE_DELAY: Duration = Duration::from_millis(500);

/// Identifies this supervisor to clients probing with `whoami:`.
const IMPLEMENTATION_NAME: &str = "argus";

struct SessionSlot {
    session: Option<Session>,
    /// Retained after teardown so `state:` can still report `log_file`
    /// for the most recent session while idle (spec §4.5).
    last_log_path: Option<PathBuf>,
}

/// The single-newline-terminated reply envelope (spec §4.5/§6).
#[derive(Debug, Serialize)]
pub struct Reply {
    #[serde(rename = "CMD")]
    pub cmd: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Reply {
    fn ok(cmd: impl Into<String>, result: Value) -> Self {
        Self {
            cmd: cmd.into(),
            result: Some(result),
            error: None,
        }
    }

    pub(crate) fn err(cmd: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            cmd: cmd.into(),
            result: None,
            error: Some(error.to_string()),
        }
    }

    /// Newline-terminated wire form. Serialization of this struct cannot
    /// realistically fail (no non-UTF8 bytes, no cyclic structures), but
    /// the fallback keeps the contract "always exactly one reply line".
    pub fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(s) => format!("{s}\n"),
            Err(_) => {
                "{\"CMD\":\"unknown\",\"result\":null,\"error\":\"internal serialization error\"}\n"
                    .to_string()
            }
        }
    }
}

enum SpinUpFailure {
    Dead { log_path: PathBuf },
    Error(DispatchError),
}

/// Owns the lifecycle state and the at-most-one [`Session`], and
/// coordinates the external collaborators (binary/config resolution,
/// audit sink) the core consumes.
pub struct Dispatcher {
    state: StateMachine,
    slot: Mutex<SessionSlot>,
    config: Config,
    child_locator: Arc<dyn ChildLocator>,
    config_dir: Arc<dyn ConfigDirectory>,
    audit: Arc<dyn CommandAudit>,
}

impl Dispatcher {
    pub fn new(
        config: Config,
        child_locator: Arc<dyn ChildLocator>,
        config_dir: Arc<dyn ConfigDirectory>,
        audit: Arc<dyn CommandAudit>,
    ) -> Self {
        Self {
            state: StateMachine::new(),
            slot: Mutex::new(SessionSlot {
                session: None,
                last_log_path: None,
            }),
            config,
            child_locator,
            config_dir,
            audit,
        }
    }

    pub fn current_state(&self) -> LifecycleState {
        self.state.current()
    }

    /// Parse and execute one command line, returning the structured reply.
    /// `line` may or may not carry its trailing terminator.
    pub async fn dispatch(&self, line: &str) -> Reply {
        let mut slot = self.slot.lock().await;
        let trimmed = line.trim_end_matches(['\n', '\r']);

        let Some((cmd_name, rest)) = trimmed.split_once(':') else {
            self.audit.record("unknown", "parse_error").await;
            return Reply::err("unknown", DispatchError::ParseError);
        };

        let args: Vec<&str> = rest
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();

        let result = match cmd_name {
            "spin_up" => self.handle_spin_up(&mut slot, args.first().copied()).await,
            "spin_down" => self.handle_spin_down(&mut slot).await,
            "state" => self.handle_state(&mut slot).await,
            "available_confs" => self.handle_available_confs(),
            "whoami" => self.handle_whoami(),
            other => Err(DispatchError::UnknownCommand(other.to_string())),
        };

        match result {
            Ok(value) => {
                self.audit.record(cmd_name, "ok").await;
                Reply::ok(cmd_name, value)
            }
            Err(e) => {
                self.audit.record(cmd_name, "error").await;
                Reply::err(cmd_name, e)
            }
        }
    }

    /// Drives any live session through the same terminate-and-finalize
    /// path as `spin_down`, unconditionally. Used by the process-level
    /// SIGINT/SIGTERM handler and by test teardown -- never leaves a
    /// child process group orphaned (spec invariant 5).
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.session.take() {
            let _ = self.state.transition_to(LifecycleState::Stopping);
            let (log_path, _reason) = self.terminate_and_finalize(session).await;
            slot.last_log_path = Some(log_path);
            let _ = self.state.transition_to(LifecycleState::Idle);
        }
    }

    async fn handle_spin_up(
        &self,
        slot: &mut SessionSlot,
        config_arg: Option<&str>,
    ) -> Result<Value, DispatchError> {
        if self.state.current() != LifecycleState::Idle {
            return Err(DispatchError::AlreadyRunning);
        }

        let raw_name = config_arg.ok_or_else(|| DispatchError::MissingArgument {
            command: "spin_up".to_string(),
        })?;

        let normalized = normalize_config_name(raw_name);
        let config_path = self
            .config_dir
            .resolve(&normalized)
            .ok_or_else(|| DispatchError::ConfigNotFound(normalized.clone()))?;

        self.state.transition_to(LifecycleState::Starting)?;

        match self.spawn_and_probe(&normalized, &config_path).await {
            Ok((session, pid)) => {
                if self.state.transition_to(LifecycleState::Running).is_err() {
                    // Unreachable under single-mutex serialization (this
                    // dispatcher is the sole writer of `state`), but fail
                    // closed rather than report "running" against an
                    // unrecorded transition: tear the session back down
                    // the same way every other spin_up error path does
                    // (§7: finalize the log, drop the Session, Idle).
                    let (log_path, _reason) = self.terminate_and_finalize(session).await;
                    slot.last_log_path = Some(log_path);
                    let _ = self.state.transition_to(LifecycleState::Idle);
                    return Err(DispatchError::InternalError(
                        "could not record Starting -> Running transition".to_string(),
                    ));
                }
                let result = json!({
                    "status": "running",
                    "config": normalized,
                    "pid": pid,
                    "log_file": session.log_path,
                });
                slot.session = Some(session);
                Ok(result)
            }
            Err(SpinUpFailure::Dead { log_path }) => {
                let _ = self.state.transition_to(LifecycleState::Idle);
                slot.last_log_path = Some(log_path.clone());
                Err(DispatchError::StartupFailed { log_path })
            }
            Err(SpinUpFailure::Error(e)) => {
                let _ = self.state.transition_to(LifecycleState::Idle);
                Err(e)
            }
        }
    }

    async fn spawn_and_probe(
        &self,
        normalized: &str,
        config_path: &Path,
    ) -> Result<(Session, i32), SpinUpFailure> {
        let binary_path = self.child_locator.resolve().ok_or_else(|| {
            SpinUpFailure::Error(DispatchError::SpawnError(
                "managed binary not found".to_string(),
            ))
        })?;
        let version = self.child_locator.version_string();

        let log = SessionLog::new();
        let log_path = log
            .create(&self.config.logs_dir(), normalized, config_path, &version)
            .map_err(|e| SpinUpFailure::Error(DispatchError::LogIoError(e.to_string())))?;

        let log_handle = match log.handle() {
            Ok(handle) => handle,
            Err(e) => {
                let _ = log.finalize("Process failed to start");
                return Err(SpinUpFailure::Error(DispatchError::LogIoError(e.to_string())));
            }
        };

        let child = ChildProcess::new();
        let pid = match child.spawn(&binary_path, config_path, log_handle).await {
            Ok(pid) => pid,
            Err(e) => {
                let _ = log.finalize("Process failed to start");
                return Err(SpinUpFailure::Error(DispatchError::SpawnError(e.to_string())));
            }
        };

        sleep(STARTUP_PROBE_DELAY).await;

        if !child.is_alive().await {
            let _ = log.finalize("Process died during startup");
            return Err(SpinUpFailure::Dead { log_path });
        }

        let watchdog = NetworkWatchdog::arm(log_path.clone(), pid, child.pid_flag());

        let started_at = SystemTime::now();
        let started_at_unix = started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let session = Session {
            config_name: normalized.to_string(),
            config_path: config_path.to_path_buf(),
            started_at,
            started_at_unix,
            log_path,
            log,
            child,
            watchdog,
        };

        Ok((session, pid))
    }

    async fn handle_spin_down(&self, slot: &mut SessionSlot) -> Result<Value, DispatchError> {
        if self.state.current() != LifecycleState::Running {
            return Err(DispatchError::NotRunning);
        }
        let Some(session) = slot.session.take() else {
            return Err(DispatchError::NotRunning);
        };

        self.state.transition_to(LifecycleState::Stopping)?;

        let previous_config = session.config_name.clone();
        let (log_path, _reason) = self.terminate_and_finalize(session).await;
        slot.last_log_path = Some(log_path.clone());

        // Fail-safe rather than fail-open (spec §7): always forced to
        // Idle, even though this transition is expected to succeed.
        let _ = self.state.transition_to(LifecycleState::Idle);

        Ok(json!({
            "status": "stopped",
            "previous_config": previous_config,
            "log_file": log_path,
        }))
    }

    async fn handle_state(&self, slot: &mut SessionSlot) -> Result<Value, DispatchError> {
        if self.state.current() == LifecycleState::Running {
            let alive = match slot.session.as_ref() {
                Some(session) => session.child.is_alive().await,
                None => false,
            };

            if !alive {
                if let Some(session) = slot.session.take() {
                    let network_drop = session.watchdog.network_drop_detected();
                    let reason = if network_drop {
                        "Network drop detected - auto-terminated"
                    } else {
                        "Process died unexpectedly"
                    };
                    session.watchdog.stop_and_join().await;
                    let _ = session.log.finalize(reason);
                    slot.last_log_path = Some(session.log_path.clone());
                }
                let _ = self.state.transition_to(LifecycleState::Idle);
            }
        }

        if self.state.current() == LifecycleState::Running {
            let session = slot.session.as_ref().ok_or_else(|| {
                DispatchError::InternalError("running state with no session".to_string())
            })?;
            let pid = session.child.pid().await;
            return Ok(json!({
                "running": true,
                "config": session.config_name,
                "pid": pid,
                "log_file": session.log_path,
            }));
        }

        Ok(json!({
            "running": false,
            "config": Value::Null,
            "pid": Value::Null,
            "log_file": slot.last_log_path,
        }))
    }

    fn handle_available_confs(&self) -> Result<Value, DispatchError> {
        let mut configs = self.config_dir.list();
        configs.sort();
        Ok(json!({
            "count": configs.len(),
            "configs": configs,
        }))
    }

    fn handle_whoami(&self) -> Result<Value, DispatchError> {
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "implementation": IMPLEMENTATION_NAME,
        }))
    }

    /// `terminate()` the child, join the watchdog, and write the log
    /// footer. Returns the log path and the termination reason used as
    /// the footer's `Shutdown Method`.
    async fn terminate_and_finalize(&self, session: Session) -> (PathBuf, String) {
        let outcome = session.child.terminate().await;
        session.watchdog.stop_and_join().await;
        let reason = outcome.as_str();
        let _ = session.log.finalize(reason);
        (session.log_path, reason.to_string())
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
