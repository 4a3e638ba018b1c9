// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle state machine.
//!
//! Exactly one [`LifecycleState`] value exists at any time, globally. The
//! only permitted moves are listed in [`StateMachine::transition_to`]'s
//! match arm; anything else is rejected without changing state.

use std::sync::Mutex;

use thiserror::Error;

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// Mutex-guarded lifecycle state with a validated transition table.
///
/// The table is intentionally small and exhaustive: any pair
/// not listed here fails `transition_to` without mutating state. Holding
/// the mutex for the duration of the check-and-set makes the validate+store
/// pair atomic with respect to concurrent callers.
pub struct StateMachine {
    state: Mutex<LifecycleState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Idle),
        }
    }

    /// Current state. Brief lock hold, not a true lock-free atomic read —
    /// see DESIGN.md for why a plain `Mutex` was chosen over an atomic enum.
    pub fn current(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attempt the given transition. Fails without changing state if `to`
    /// is not reachable from the current state.
    pub fn transition_to(&self, to: LifecycleState) -> Result<(), TransitionError> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let from = *guard;
        if Self::is_valid(from, to) {
            *guard = to;
            Ok(())
        } else {
            Err(TransitionError { from, to })
        }
    }

    fn is_valid(from: LifecycleState, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (from, to),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Idle)
                | (Running, Stopping)
                | (Running, Idle)
                | (Stopping, Idle)
        )
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
