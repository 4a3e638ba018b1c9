// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reply-facing error taxonomy. Every error surfaced to a TCP client
//! passes through one of these variants; `Display` is the exact short,
//! human-readable string placed in the reply's `error` field.

use std::path::PathBuf;

use thiserror::Error;

use crate::state::TransitionError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed command line")]
    ParseError,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing argument for {command}")]
    MissingArgument { command: String },

    #[error("WireProxy is already running")]
    AlreadyRunning,

    #[error("WireProxy is not running")]
    NotRunning,

    #[error("Configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("internal state transition error: {0}")]
    TransitionError(#[from] TransitionError),

    #[error("failed to start WireProxy: {0}")]
    SpawnError(String),

    #[error("WireProxy exited during startup (see {log_path})", log_path = log_path.display())]
    StartupFailed { log_path: PathBuf },

    #[error("failed to create session log: {0}")]
    LogIoError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}
