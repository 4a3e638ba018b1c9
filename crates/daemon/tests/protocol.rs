// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Black-box integration tests that drive the real TCP wire protocol
//! end-to-end, per the spec's concrete scenarios and boundary behaviors.
//! Each test spins up an in-process daemon (dispatcher + server) bound
//! to an ephemeral loopback port, backed by `/bin/sh` standing in for
//! the managed binary: the "config" a test resolves is itself an
//! executable script (shebang + chmod +x), since `ChildProcess::spawn`'s
//! `["<bin>", "-c", <config_path>]` convention happens to coincide with
//! `/bin/sh -c <command>` -- the same trick `argus-engine`'s own unit
//! tests use.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use argus_core::{Config, FixedChildLocator, FsConfigDirectory};
use argus_daemon::{Dispatcher, NoopAudit, TcpServer};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

fn write_script(path: &Path, body: &str) {
    let mut f = std::fs::File::create(path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    f.write_all(body.as_bytes()).unwrap();
    let mut perms = f.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

struct TestDaemon {
    _base: TempDir,
    addr: std::net::SocketAddr,
    configs_dir: PathBuf,
}

impl TestDaemon {
    async fn start() -> Self {
        let base = TempDir::new().unwrap();
        let config = Config {
            base_dir: base.path().to_path_buf(),
            port: 0,
        };
        std::fs::create_dir_all(config.configs_dir()).unwrap();
        std::fs::create_dir_all(config.logs_dir()).unwrap();

        let child_locator = Arc::new(FixedChildLocator::new(
            PathBuf::from("/bin/sh"),
            "test-harness",
        ));
        let config_dir = Arc::new(FsConfigDirectory::new(config.configs_dir()));
        let configs_dir = config.configs_dir();

        let dispatcher = Arc::new(Dispatcher::new(
            config,
            child_locator,
            config_dir,
            Arc::new(NoopAudit),
        ));

        let server = TcpServer::bind("127.0.0.1:0", dispatcher).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            server.serve().await;
        });

        Self {
            _base: base,
            addr,
            configs_dir,
        }
    }

    fn write_conf(&self, name: &str, script_body: &str) -> PathBuf {
        let path = self.configs_dir.join(name);
        write_script(&path, script_body);
        path
    }

    async fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Client {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }
}

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn send(&mut self, line: &str) -> Value {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n").await.unwrap();
        }
        let mut reply = String::new();
        self.reader.read_line(&mut reply).await.unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn read_reply(&mut self) -> Value {
        let mut reply = String::new();
        self.reader.read_line(&mut reply).await.unwrap();
        serde_json::from_str(&reply).unwrap()
    }
}

#[tokio::test]
async fn whoami_is_pure() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let r1 = client.send("whoami:\n").await;
    let r2 = client.send("whoami:\n").await;

    assert_eq!(r1["CMD"], "whoami");
    assert_eq!(r1["error"], Value::Null);
    assert!(r1["result"]["version"].is_string());
    assert!(r1["result"]["implementation"].is_string());
    assert_eq!(r1, r2);
}

#[tokio::test]
async fn available_confs_empty_directory() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let reply = client.send("available_confs:\n").await;

    assert_eq!(
        reply,
        serde_json::json!({"CMD":"available_confs","result":{"count":0,"configs":[]},"error":null})
    );
}

#[tokio::test]
async fn available_confs_lists_sorted_names() {
    let daemon = TestDaemon::start().await;
    daemon.write_conf("b.conf", "sleep 5\n");
    daemon.write_conf("a.conf", "sleep 5\n");
    let mut client = daemon.connect().await;

    let reply = client.send("available_confs:\n").await;

    assert_eq!(reply["result"]["count"], 2);
    assert_eq!(reply["result"]["configs"], serde_json::json!(["a.conf", "b.conf"]));
}

#[tokio::test]
async fn state_at_startup_is_idle() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let reply = client.send("state:\n").await;

    assert_eq!(
        reply,
        serde_json::json!({"CMD":"state","result":{"running":false,"config":null,"pid":null,"log_file":null},"error":null})
    );
}

#[tokio::test]
async fn spin_up_missing_config_reports_not_found() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let reply = client.send("spin_up:does-not-exist\n").await;

    assert_eq!(reply["CMD"], "spin_up");
    assert_eq!(reply["result"], Value::Null);
    assert_eq!(reply["error"], "Configuration not found: does-not-exist.conf");
}

#[tokio::test]
async fn spin_down_when_idle_is_rejected() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let reply = client.send("spin_down:\n").await;

    assert_eq!(
        reply,
        serde_json::json!({"CMD":"spin_down","result":null,"error":"WireProxy is not running"})
    );
}

#[tokio::test]
async fn malformed_line_without_colon_is_a_parse_error() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let reply = client.send("hello world\n").await;

    assert_eq!(reply["CMD"], "unknown");
    assert_eq!(reply["result"], Value::Null);
    assert!(reply["error"].as_str().unwrap().contains("malformed"));
}

#[tokio::test]
async fn unrecognized_command_is_echoed_back() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let reply = client.send("frobnicate:\n").await;

    assert_eq!(reply["CMD"], "frobnicate");
    assert_eq!(reply["error"], "unknown command: frobnicate");
}

#[tokio::test]
async fn full_lifecycle_with_a_valid_config() {
    let daemon = TestDaemon::start().await;
    daemon.write_conf("c.conf", "sleep 30\n");
    let mut client = daemon.connect().await;

    let up = client.send("spin_up:c\n").await;
    assert_eq!(up["result"]["status"], "running");
    assert_eq!(up["result"]["config"], "c.conf");
    let pid = up["result"]["pid"].as_i64().unwrap();
    assert!(pid > 0);
    let log_file = up["result"]["log_file"].as_str().unwrap().to_string();

    let st = client.send("state:\n").await;
    assert_eq!(st["result"]["running"], true);
    assert_eq!(st["result"]["pid"], pid);
    assert_eq!(st["result"]["config"], "c.conf");

    let down = client.send("spin_down:\n").await;
    assert_eq!(down["result"]["status"], "stopped");
    assert_eq!(down["result"]["previous_config"], "c.conf");

    let st2 = client.send("state:\n").await;
    assert_eq!(st2["result"]["running"], false);
    assert_eq!(st2["result"]["log_file"], log_file);

    let contents = std::fs::read_to_string(&log_file).unwrap();
    assert!(contents.contains("WireProxy Server Log"));
    assert!(contents.contains("WireProxy Server Teardown"));
    assert!(contents.contains("Shutdown Method: Graceful termination"));
}

#[tokio::test]
async fn config_suffix_is_interchangeable() {
    let daemon = TestDaemon::start().await;
    daemon.write_conf("home.conf", "sleep 30\n");
    let mut client = daemon.connect().await;

    let up = client.send("spin_up:home\n").await;
    assert_eq!(up["result"]["config"], "home.conf");
    client.send("spin_down:\n").await;
}

#[tokio::test]
async fn second_spin_up_while_running_is_rejected() {
    let daemon = TestDaemon::start().await;
    daemon.write_conf("c.conf", "sleep 30\n");
    let mut client = daemon.connect().await;

    let first = client.send("spin_up:c\n").await;
    assert_eq!(first["result"]["status"], "running");

    let second = client.send("spin_up:c\n").await;
    assert_eq!(second["error"], "WireProxy is already running");

    client.send("spin_down:\n").await;
}

#[tokio::test]
async fn child_death_during_startup_probe_is_reported() {
    let daemon = TestDaemon::start().await;
    daemon.write_conf("dies.conf", "exit 1\n");
    let mut client = daemon.connect().await;

    let reply = client.send("spin_up:dies\n").await;

    assert_eq!(reply["result"], Value::Null);
    assert!(reply["error"].as_str().unwrap().contains("startup"));

    let st = client.send("state:\n").await;
    assert_eq!(st["result"]["running"], false);
}

#[tokio::test]
async fn child_death_after_running_is_observed_on_next_state() {
    let daemon = TestDaemon::start().await;
    daemon.write_conf("short.conf", "sleep 1\n");
    let mut client = daemon.connect().await;

    let up = client.send("spin_up:short\n").await;
    assert_eq!(up["result"]["status"], "running");
    let log_file = up["result"]["log_file"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let st = client.send("state:\n").await;
    assert_eq!(st["result"]["running"], false);

    let contents = std::fs::read_to_string(&log_file).unwrap();
    assert!(contents.contains("Shutdown Method: Process died unexpectedly"));
}

#[tokio::test]
async fn sustained_network_errors_trip_the_watchdog() {
    let daemon = TestDaemon::start().await;
    // The watchdog doesn't start tailing until ~1s after spawn (the
    // dispatcher's own 500ms startup probe, then the watchdog's own 500ms
    // startup delay before it opens the log and seeks to EOF) -- anything
    // written before that is invisible to it, since it only tails *new*
    // appends past whatever EOF was at arm time. So the fixture sleeps
    // past that window before producing the five matching lines.
    daemon.write_conf(
        "flaky.conf",
        "sleep 1.3; for i in 1 2 3 4 5; do echo 'network is unreachable'; done; sleep 30\n",
    );
    let mut client = daemon.connect().await;

    let up = client.send("spin_up:flaky\n").await;
    assert_eq!(up["result"]["status"], "running");
    let log_file = up["result"]["log_file"].as_str().unwrap().to_string();

    // Time for the fixture's own pre-sleep, the five lines, and the
    // watchdog's next poll to observe them, plus slack.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let st = client.send("state:\n").await;
    assert_eq!(st["result"]["running"], false);

    let contents = std::fs::read_to_string(&log_file).unwrap();
    assert!(contents.contains("Shutdown Method: Network drop detected - auto-terminated"));
}

#[tokio::test]
async fn partial_line_is_accumulated_across_reads() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    client.write_raw(b"who").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_raw(b"ami:\n").await;

    let reply = client.read_reply().await;
    assert_eq!(reply["CMD"], "whoami");
    assert_eq!(reply["error"], Value::Null);
}
