// ABOUTME: Common data models for council sessions, responses, votes, and ratings
// ABOUTME: Defines the session state machine and the entities persisted by the store
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! Domain entities shared across the store, orchestrator, and HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{DEFAULT_DEBATE_ROUNDS, DEFAULT_RESPONSE_TIMEOUT_SECS};

/// Lifecycle status of a council session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, not yet started
    Pending,
    /// Streaming participant responses
    Responding,
    /// Collecting ranked ballots
    Voting,
    /// Producing the chairperson synthesis
    Synthesizing,
    /// Terminal: finished successfully
    Completed,
    /// Terminal: a stage failed
    Failed,
    /// Terminal: explicitly cancelled
    Cancelled,
}

impl SessionStatus {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Responding => "responding",
            Self::Voting => "voting",
            Self::Synthesizing => "synthesizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the database string form
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "responding" => Some(Self::Responding),
            "voting" => Some(Self::Voting),
            "synthesizing" => Some(Self::Synthesizing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status is terminal
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses from which a transition into `next` is permitted.
    ///
    /// Encodes the session state machine: pending → responding → voting →
    /// synthesizing → completed, with responding allowed to re-enter itself
    /// across debate rounds, and failed/cancelled reachable from any
    /// non-terminal status.
    #[must_use]
    pub const fn preimages(next: Self) -> &'static [Self] {
        match next {
            Self::Pending => &[],
            Self::Responding => &[Self::Pending, Self::Responding],
            Self::Voting => &[Self::Responding],
            Self::Synthesizing => &[Self::Voting],
            Self::Completed => &[Self::Synthesizing],
            Self::Failed | Self::Cancelled => &[
                Self::Pending,
                Self::Responding,
                Self::Voting,
                Self::Synthesizing,
            ],
        }
    }

    /// Whether `self → next` is an allowed transition
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        Self::preimages(next).contains(&self)
    }
}

/// Deliberation mode for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One response round, then voting and synthesis
    Standard,
    /// R response rounds with rebuttal context, voting on the final round
    Debate,
    /// Single-elimination bracket with per-match voting
    Tournament,
}

impl SessionMode {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Debate => "debate",
            Self::Tournament => "tournament",
        }
    }

    /// Parse the database string form
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "standard" => Some(Self::Standard),
            "debate" => Some(Self::Debate),
            "tournament" => Some(Self::Tournament),
            _ => None,
        }
    }
}

/// Configuration snapshot frozen into a session at admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of debate rounds (1..=10)
    pub debate_rounds: u32,
    /// Per-stream inactivity timeout in seconds
    pub response_timeout_secs: u64,
    /// Whether one responder argues against the consensus
    pub enable_devil_advocate: bool,
    /// Whether one model is withdrawn from responding to judge with extra weight
    pub enable_mystery_judge: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debate_rounds: DEFAULT_DEBATE_ROUNDS,
            response_timeout_secs: DEFAULT_RESPONSE_TIMEOUT_SECS,
            enable_devil_advocate: false,
            enable_mystery_judge: false,
        }
    }
}

/// Request to start a new council session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    /// The question put before the council
    pub question: String,
    /// Participating model ids (2..=8, unique)
    pub models: Vec<String>,
    /// Deliberation mode
    #[serde(default)]
    pub mode: Option<SessionMode>,
    /// Optional rating category
    #[serde(default)]
    pub category_id: Option<i64>,
    /// Explicit chairperson override
    #[serde(default)]
    pub chairperson_id: Option<String>,
    /// Debate rounds (defaults to 3)
    #[serde(default)]
    pub debate_rounds: Option<u32>,
    /// Enable the devil's advocate role
    #[serde(default)]
    pub enable_devil_advocate: bool,
    /// Enable the mystery judge role
    #[serde(default)]
    pub enable_mystery_judge: bool,
    /// Per-stream timeout override in seconds (defaults to 60)
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
}

/// A single council deliberation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Globally unique session id
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// The question under deliberation
    pub question: String,
    /// Deliberation mode
    pub mode: SessionMode,
    /// Current lifecycle status
    pub status: SessionStatus,
    /// Optional rating category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    /// Model producing the synthesis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chairperson_id: Option<String>,
    /// Model instructed to argue against consensus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devil_advocate_id: Option<String>,
    /// Model that only votes, with extra weight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mystery_judge_id: Option<String>,
    /// Chairperson synthesis text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
    /// Divergent-voter minority report text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minority_report: Option<String>,
    /// Frozen configuration snapshot
    pub config: SessionConfig,
    /// Responses, loaded on the read path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<SessionResponse>,
    /// Votes, loaded on the read path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<Vote>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Completion time, set on the completed transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One model's contribution in one round of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Row id
    pub id: i64,
    /// Owning session
    pub session_id: Uuid,
    /// Authoring model
    pub model_id: String,
    /// Round number (>= 1)
    pub round: u32,
    /// Response content (possibly partial on stream failure)
    pub content: String,
    /// Stable per-session anonymous label ("Response A", ...)
    pub anonymous_label: String,
    /// Wall-clock time from first prompt to stream end
    pub response_time_ms: i64,
    /// Token count (reported or estimated)
    pub token_count: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Who cast a ballot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoterType {
    /// A participating or judging model
    Model,
    /// The session's owning user
    User,
}

impl VoterType {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::User => "user",
        }
    }

    /// Parse the database string form
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "model" => Some(Self::Model),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// One ranked ballot cast on the responses of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// Row id
    pub id: i64,
    /// Owning session
    pub session_id: Uuid,
    /// Ballot origin
    pub voter_type: VoterType,
    /// Voter identifier (model id or user id)
    pub voter_id: String,
    /// Anonymous labels, best first, duplicate-free
    pub ranked_responses: Vec<String>,
    /// Ballot weight (user weight, 1.0, or judge weight)
    pub weight: f64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Elo-style rating scoped by model and optional category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRating {
    /// Rated model
    pub model_id: String,
    /// Category scope; None means global
    pub category_id: Option<i64>,
    /// Current rating (>= 0)
    pub rating: i64,
    /// Cumulative pairwise wins
    pub wins: i64,
    /// Cumulative pairwise losses
    pub losses: i64,
    /// Cumulative pairwise draws
    pub draws: i64,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl ModelRating {
    /// Total games counted toward the K-factor tier
    #[must_use]
    pub const fn games_played(&self) -> i64 {
        self.wins + self.losses + self.draws
    }
}

/// Append-only rating-change log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EloHistoryEntry {
    /// Row id
    pub id: i64,
    /// Rated model
    pub model_id: String,
    /// Category scope; None means global
    pub category_id: Option<i64>,
    /// Session that caused the change, when applicable
    pub session_id: Option<Uuid>,
    /// Rating before the update
    pub old_rating: i64,
    /// Rating after the update
    pub new_rating: i64,
    /// Signed change
    pub change: i64,
    /// win, loss, or draw, from the aggregate change sign
    pub reason: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Cumulative head-to-head record over a canonically ordered model pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matchup {
    /// Lexicographically smaller model id
    pub model_a_id: String,
    /// Lexicographically larger model id
    pub model_b_id: String,
    /// Category scope; None means global
    pub category_id: Option<i64>,
    /// Wins credited to model A
    pub model_a_wins: i64,
    /// Wins credited to model B
    pub model_b_wins: i64,
    /// Drawn encounters
    pub draws: i64,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry for a model seen at admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Provider-scoped model id
    pub id: String,
    /// Human-readable name
    pub display_name: String,
    /// Provider family ("openai", "anthropic", ...)
    pub provider: String,
}

/// Compact session row for history listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session id
    pub id: Uuid,
    /// The question under deliberation
    pub question: String,
    /// Deliberation mode
    pub mode: SessionMode,
    /// Current lifecycle status
    pub status: SessionStatus,
    /// Number of persisted responses
    pub response_count: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Completion time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
