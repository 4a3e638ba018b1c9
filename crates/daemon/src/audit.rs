// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher's audit seam -- "a passive sink attached to the
//! dispatcher" (spec: out of scope for the core). No handler consults the
//! audit's return value; it only ever observes.

use async_trait::async_trait;
use tracing::info;

/// Invoked once per dispatched command with the command name and a short
/// outcome tag (`"ok"` or `"error"`).
#[async_trait]
pub trait CommandAudit: Send + Sync {
    async fn record(&self, command: &str, outcome: &str);
}

/// Default: discards everything.
pub struct NoopAudit;

#[async_trait]
impl CommandAudit for NoopAudit {
    async fn record(&self, _command: &str, _outcome: &str) {}
}

/// Logs each command through the ambient `tracing` stack rather than a
/// bespoke audit file -- this is the logging stack, not a new feature.
pub struct TracingAudit;

#[async_trait]
impl CommandAudit for TracingAudit {
    async fn record(&self, command: &str, outcome: &str) {
        info!(command, outcome, "command dispatched");
    }
}
