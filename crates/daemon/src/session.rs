// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bundle of state alive for one child lifetime: config metadata, the
//! session log, the managed child, and its watchdog.

use std::path::PathBuf;
use std::time::SystemTime;

use argus_engine::{ChildProcess, NetworkWatchdog, SessionLog};

/// Created by a successful `spin_up`, destroyed on teardown. Owned
/// exclusively by the [`crate::dispatcher::Dispatcher`]; the watchdog
/// holds only a pid/log-path back-reference, never this struct.
pub struct Session {
    pub config_name: String,
    pub config_path: PathBuf,
    pub started_at: SystemTime,
    pub started_at_unix: i64,
    pub log_path: PathBuf,
    pub log: SessionLog,
    pub child: ChildProcess,
    pub watchdog: NetworkWatchdog,
}

impl Session {
    /// Seconds this session's child has been alive, for diagnostics only
    /// -- not part of any wire reply.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }
}
