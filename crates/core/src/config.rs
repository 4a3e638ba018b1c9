// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration and the two external collaborators the core
//! consumes but does not implement: binary resolution and config
//! enumeration ("out of scope").

use std::path::{Path, PathBuf};

/// Default TCP port, overridable for tests via `ARGUS_PORT`.
pub const DEFAULT_PORT: u16 = 23888;

/// Resolved filesystem layout, relative to a base directory
/// (`$HOME/.argus` by default, overridable via `ARGUS_BASE_DIR`).
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub port: u16,
}

impl Config {
    /// Build config from the process environment. `HOME` must resolve;
    /// otherwise falls back to the system temp directory for log storage.
    pub fn from_env() -> Self {
        let base_dir = std::env::var_os("ARGUS_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| match std::env::var_os("HOME") {
                Some(home) => PathBuf::from(home).join(".argus"),
                None => std::env::temp_dir().join(".argus"),
            });

        let port = std::env::var("ARGUS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self { base_dir, port }
    }

    pub fn binary_path(&self) -> PathBuf {
        self.base_dir.join("wireproxy").join("wireproxy")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.base_dir.join("wireproxy_confs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("wp-server-logs")
    }
}

/// Resolves a normalized config name to an on-disk path. Config directory
/// enumeration is an external collaborator's job; the core only needs
/// "does name N resolve to a path P that exists" and "list names".
/// [`FsConfigDirectory`] is the default filesystem-backed implementation a
/// runnable binary needs.
pub trait ConfigDirectory: Send + Sync {
    /// Resolve a normalized (`.conf`-suffixed) name to a path, if it names
    /// a regular file under the configs directory.
    fn resolve(&self, normalized_name: &str) -> Option<PathBuf>;

    /// List available normalized config names, in no particular order.
    fn list(&self) -> Vec<String>;
}

/// Default implementation: `*.conf` files directly under `configs_dir`.
pub struct FsConfigDirectory {
    configs_dir: PathBuf,
}

impl FsConfigDirectory {
    pub fn new(configs_dir: PathBuf) -> Self {
        Self { configs_dir }
    }
}

impl ConfigDirectory for FsConfigDirectory {
    fn resolve(&self, normalized_name: &str) -> Option<PathBuf> {
        let path = self.configs_dir.join(normalized_name);
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    }

    fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.configs_dir) else {
            return Vec::new();
        };

        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.ends_with(".conf"))
            .collect()
    }
}

/// Resolves the managed binary to a filesystem path. Acquisition of the
/// binary itself is an external collaborator's job; the core only needs
/// a path.
pub trait ChildLocator: Send + Sync {
    /// Path to the executable, if it resolves to a regular file.
    fn resolve(&self) -> Option<PathBuf>;

    /// Best-effort version string for this binary, used in session log
    /// headers. Falls back to `"unknown"` when it cannot be determined.
    fn version_string(&self) -> String {
        "unknown".to_string()
    }
}

/// Default implementation: a fixed path supplied at construction.
pub struct FixedChildLocator {
    path: PathBuf,
    version: String,
}

impl FixedChildLocator {
    pub fn new(path: PathBuf, version: impl Into<String>) -> Self {
        Self {
            path,
            version: version.into(),
        }
    }
}

impl ChildLocator for FixedChildLocator {
    fn resolve(&self) -> Option<PathBuf> {
        if self.path.is_file() {
            Some(self.path.clone())
        } else {
            None
        }
    }

    fn version_string(&self) -> String {
        self.version.clone()
    }
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
