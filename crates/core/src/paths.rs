// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure path/name helpers shared by the engine and daemon crates.

use std::path::{Path, PathBuf};

/// Append `.conf` to `name` unless it is already present, so that a config
/// name with and without the suffix refer to the same file.
pub fn normalize_config_name(name: &str) -> String {
    if name.ends_with(".conf") {
        name.to_string()
    } else {
        format!("{name}.conf")
    }
}

/// The config stem used in session log file names: the normalized config
/// name with the `.conf` suffix stripped.
pub fn config_stem(normalized_name: &str) -> &str {
    normalized_name.strip_suffix(".conf").unwrap_or(normalized_name)
}

/// `<logs_dir>/<unix_seconds>_<config_stem>.log`
pub fn session_log_path(logs_dir: &Path, unix_seconds: i64, normalized_config_name: &str) -> PathBuf {
    let stem = config_stem(normalized_config_name);
    logs_dir.join(format!("{unix_seconds}_{stem}.log"))
}
