// ABOUTME: Council orchestration: session lifecycle, role assignment, anonymization, and ballots
// ABOUTME: Drives a session from admission to a terminal status across three deliberation modes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # Council Orchestration
//!
//! The orchestrator owns the session state machine: parallel response
//! fan-out, blind peer voting, chaired synthesis, and the rating hand-off,
//! with live events published at every step. Sessions run in independent
//! tasks; a panic or failure in one never affects another.

pub mod ballots;
pub mod labels;
pub mod orchestrator;
pub mod prompts;
pub mod roles;
pub mod service;

pub use orchestrator::{Orchestrator, SessionPlan};
pub use service::{CouncilService, StartedSession};

use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation signal shared by a session's tasks.
///
/// Cloning is cheap; `cancel` is sticky and wakes every waiter.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create an uncancelled token
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation; idempotent
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been signalled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.subscribe().borrow()
    }

    /// Resolve once cancellation is signalled; never resolves otherwise
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender kept alive through self; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_sticky_and_wakes_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        token.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());

        // Idempotent.
        token.cancel();
        assert!(token.is_cancelled());
    }
}
