// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Passive log-tailing worker that watches a session's log for sustained
//! network failure and preemptively terminates the child.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::task::JoinHandle;

const STARTUP_DELAY: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const THRESHOLD: u32 = 5;

const PATTERNS: [&str; 2] = ["network is unreachable", "can't assign requested address"];

fn is_network_failure(line: &str) -> bool {
    PATTERNS.iter().any(|p| line.contains(p))
}

/// Tails a session log from end-of-file and counts consecutive matches of
/// a sustained-network-failure pattern. `ERROR:`-prefixed lines that don't
/// match are deliberately not treated as resets -- only lines that are
/// neither a match nor `ERROR:`-prefixed reset the counter. This biases
/// the detector toward sustained failure over a single spurious line.
pub struct NetworkWatchdog {
    stop: Arc<AtomicBool>,
    drop_flag: Arc<AtomicBool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl NetworkWatchdog {
    /// Spawn the tailing task against `log_path`, guarding SIGTERM dispatch
    /// with `pid_flag`: the stored pid is compared to `child_pid` before
    /// signalling, so a pid the kernel has since reused is never hit.
    pub fn arm(log_path: PathBuf, child_pid: i32, pid_flag: Arc<AtomicI32>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let drop_flag = Arc::new(AtomicBool::new(false));

        let task_stop = Arc::clone(&stop);
        let task_drop_flag = Arc::clone(&drop_flag);
        let handle = tokio::spawn(Self::run(
            log_path,
            child_pid,
            pid_flag,
            task_stop,
            task_drop_flag,
        ));

        Self {
            stop,
            drop_flag,
            handle: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    /// Whether the threshold has fired for this session.
    pub fn network_drop_detected(&self) -> bool {
        self.drop_flag.load(Ordering::SeqCst)
    }

    /// Raise the stop flag and join the tailing task. Takes at most one
    /// poll interval to observe the flag.
    pub async fn stop_and_join(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle.await;
        }
    }

    async fn run(
        log_path: PathBuf,
        child_pid: i32,
        pid_flag: Arc<AtomicI32>,
        stop: Arc<AtomicBool>,
        drop_flag: Arc<AtomicBool>,
    ) {
        tokio::time::sleep(STARTUP_DELAY).await;

        let Ok(file) = File::open(&log_path) else {
            return;
        };
        let mut reader = BufReader::new(file);
        if reader.seek(SeekFrom::End(0)).is_err() {
            return;
        }

        let mut consecutive = 0u32;
        let mut raw = Vec::new();

        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }

            raw.clear();
            match reader.read_until(b'\n', &mut raw) {
                Ok(0) => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Ok(_) => {
                    // A raw tunnel binary can emit a non-UTF-8 byte; decode
                    // lossily rather than treating that as a read error, so
                    // a single bad byte can't blind the detector.
                    let line = String::from_utf8_lossy(&raw);
                    if is_network_failure(&line) {
                        consecutive += 1;
                        if consecutive >= THRESHOLD {
                            drop_flag.store(true, Ordering::SeqCst);
                            if pid_flag.load(Ordering::SeqCst) == child_pid {
                                let _ = kill(Pid::from_raw(-child_pid), Signal::SIGTERM);
                            }
                            return;
                        }
                    } else if !line.trim_start().starts_with("ERROR:") {
                        consecutive = 0;
                    }
                }
                Err(_) => return,
            }
        }
    }
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
