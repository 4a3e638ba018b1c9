// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session log file: header immediately on create, footer and close on
//! `finalize`. The same file handle the header/footer are written through
//! is also handed to the child process as its inherited stdout/stderr, so
//! every write -- ours and the child's -- lands in one append-only stream.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("could not create session log at {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no active session log")]
    NoActiveLog,
    #[error("failed to write to session log: {0}")]
    Write(#[source] std::io::Error),
}

struct OpenLog {
    path: PathBuf,
    file: File,
}

/// Timestamped per-session log file with a fixed header/footer.
pub struct SessionLog {
    open: Mutex<Option<OpenLog>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(None),
        }
    }

    /// Allocate `log_path`, open it append-only, write the header, and
    /// return the path. Fails with [`LogError::Create`] if the file cannot
    /// be created.
    pub fn create(
        &self,
        logs_dir: &Path,
        config_name: &str,
        config_path: &Path,
        child_version_string: &str,
    ) -> Result<PathBuf, LogError> {
        std::fs::create_dir_all(logs_dir).map_err(|source| LogError::Create {
            path: logs_dir.to_path_buf(),
            source,
        })?;

        let now = SystemTime::now();
        let unix_seconds = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let log_path = argus_core::paths::session_log_path(logs_dir, unix_seconds, config_name);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|source| LogError::Create {
                path: log_path.clone(),
                source,
            })?;

        let header = render_header(config_name, config_path, child_version_string, unix_seconds);
        file.write_all(header.as_bytes()).map_err(LogError::Write)?;
        file.flush().map_err(LogError::Write)?;

        let mut guard = self.open.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(OpenLog {
            path: log_path.clone(),
            file,
        });

        Ok(log_path)
    }

    /// A handle suitable for inheritance as the child's stdout/stderr.
    /// Fails with [`LogError::NoActiveLog`] if no log is open.
    pub fn handle(&self) -> Result<File, LogError> {
        let guard = self.open.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(open) => open.file.try_clone().map_err(LogError::Write),
            None => Err(LogError::NoActiveLog),
        }
    }

    /// Path of the active log, or an empty path when none is open.
    pub fn current_path(&self) -> PathBuf {
        let guard = self.open.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|o| o.path.clone()).unwrap_or_default()
    }

    /// Write the footer and close the handle. Idempotent no-op when no log
    /// is open -- every code path (success, spawn failure, watchdog trip,
    /// shutdown) can call this unconditionally.
    pub fn finalize(&self, reason: &str) -> Result<(), LogError> {
        let mut guard = self.open.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut open) = guard.take() else {
            return Ok(());
        };

        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let footer = render_footer(reason, unix_seconds);
        open.file.write_all(footer.as_bytes()).map_err(LogError::Write)?;
        open.file.flush().map_err(LogError::Write)?;
        // `open.file` drops here, closing the handle.
        Ok(())
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

fn format_timestamp(unix_seconds: i64) -> String {
    use chrono::{TimeZone, Utc};
    Utc.timestamp_opt(unix_seconds, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn render_header(
    config_name: &str,
    config_path: &Path,
    child_version_string: &str,
    unix_seconds: i64,
) -> String {
    format!(
        "================================================================================\n\
         WireProxy Server Log\n\
         ================================================================================\n\
         Start Time: {start_time}\n\
         Unix Timestamp: {unix_seconds}\n\
         Configuration: {config_name}\n\
         WireProxy Version: {child_version_string}\n\
         Configuration File: {config_path}\n\
         \n\
         Process Output:\n\
         ================================================================================\n",
        start_time = format_timestamp(unix_seconds),
        config_path = config_path.display(),
    )
}

fn render_footer(reason: &str, unix_seconds: i64) -> String {
    format!(
        "\n\
         ================================================================================\n\
         WireProxy Server Teardown\n\
         ================================================================================\n\
         Stop Time: {stop_time}\n\
         Unix Timestamp: {unix_seconds}\n\
         Status: Initiating shutdown\n\
         Shutdown Method: {reason}\n\
         Final Status: Process terminated\n\
         ================================================================================\n\
         End of log\n\
         ================================================================================\n",
        stop_time = format_timestamp(unix_seconds),
    )
}

#[cfg(test)]
#[path = "session_log_tests.rs"]
mod tests;
