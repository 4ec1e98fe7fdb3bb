// ABOUTME: Live event envelope and the closed event-kind set published by the orchestrator
// ABOUTME: Subscribers consume these through the topic-keyed event hub
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # Live Events
//!
//! Everything a session emits while running. The kind set is closed; the
//! envelope is what subscribers receive verbatim. Events carry no
//! durability: a late subscriber rehydrates from the session store.

mod hub;

pub use hub::{EventHub, SubscriberId};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of event kinds emitted by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Session entered the responding stage
    #[serde(rename = "council.started")]
    CouncilStarted,
    /// One participant's stream opened
    #[serde(rename = "model.responding")]
    ModelResponding,
    /// One streamed content delta
    #[serde(rename = "model.response_chunk")]
    ModelResponseChunk,
    /// One participant's stream finished
    #[serde(rename = "model.complete")]
    ModelComplete,
    /// Voting stage began
    #[serde(rename = "voting.started")]
    VotingStarted,
    /// One ballot arrived
    #[serde(rename = "voting.received")]
    VotingReceived,
    /// Synthesis stage began
    #[serde(rename = "synthesis.started")]
    SynthesisStarted,
    /// Synthesis text is available
    #[serde(rename = "synthesis.complete")]
    SynthesisComplete,
    /// Terminal: session completed
    #[serde(rename = "council.completed")]
    CouncilCompleted,
    /// Terminal: session failed
    #[serde(rename = "council.failed")]
    CouncilFailed,
    /// Terminal: session cancelled
    #[serde(rename = "council.cancelled")]
    CouncilCancelled,
    /// A tournament produced its champion
    #[serde(rename = "tournament.champion")]
    TournamentChampion,
}

impl EventKind {
    /// Wire name of the event kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CouncilStarted => "council.started",
            Self::ModelResponding => "model.responding",
            Self::ModelResponseChunk => "model.response_chunk",
            Self::ModelComplete => "model.complete",
            Self::VotingStarted => "voting.started",
            Self::VotingReceived => "voting.received",
            Self::SynthesisStarted => "synthesis.started",
            Self::SynthesisComplete => "synthesis.complete",
            Self::CouncilCompleted => "council.completed",
            Self::CouncilFailed => "council.failed",
            Self::CouncilCancelled => "council.cancelled",
            Self::TournamentChampion => "tournament.champion",
        }
    }

    /// Whether this kind closes a session's event stream
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CouncilCompleted | Self::CouncilFailed | Self::CouncilCancelled
        )
    }
}

/// Envelope delivered to session subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilEvent {
    /// Topic: the session this event belongs to
    pub session_id: Uuid,
    /// Event kind
    pub event: EventKind,
    /// Kind-specific payload
    pub data: Value,
}

impl CouncilEvent {
    /// Build an envelope
    #[must_use]
    pub const fn new(session_id: Uuid, event: EventKind, data: Value) -> Self {
        Self {
            session_id,
            event,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde() {
        for kind in [
            EventKind::CouncilStarted,
            EventKind::ModelResponding,
            EventKind::ModelResponseChunk,
            EventKind::ModelComplete,
            EventKind::VotingStarted,
            EventKind::VotingReceived,
            EventKind::SynthesisStarted,
            EventKind::SynthesisComplete,
            EventKind::CouncilCompleted,
            EventKind::CouncilFailed,
            EventKind::CouncilCancelled,
            EventKind::TournamentChampion,
        ] {
            let encoded = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(encoded, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn exactly_three_terminal_kinds() {
        let terminal = [
            EventKind::CouncilCompleted,
            EventKind::CouncilFailed,
            EventKind::CouncilCancelled,
        ];
        for kind in terminal {
            assert!(kind.is_terminal());
        }
        assert!(!EventKind::SynthesisComplete.is_terminal());
        assert!(!EventKind::TournamentChampion.is_terminal());
    }
}
