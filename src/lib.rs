// ABOUTME: Main library entry point for the Council Arena deliberation server
// ABOUTME: Orchestrates multi-model council sessions with live events and Elo-style ratings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

#![deny(unsafe_code)]

//! # Council Arena
//!
//! A server that puts one question before a council of independent LLMs:
//! every participant answers in parallel over streaming connections, the
//! council blind-ranks the anonymized answers, a chairperson synthesizes a
//! consolidated verdict, and an Elo-style rating ledger tracks which models
//! keep winning.
//!
//! ## Architecture
//!
//! - **`council`**: the orchestrator driving each session's state machine
//!   (standard, debate, and tournament modes), role assignment, and ballot
//!   arithmetic
//! - **`database`**: the session store (SQLite, single-writer serializable)
//! - **`events`**: topic-keyed live event fan-out with drop-slowest
//!   backpressure
//! - **`rating`**: pure pairwise-Elo derivation from ranked ballots
//! - **`providers`**: the pluggable model gateway and its per-user client
//!   pool
//! - **`auth`** / **`routes`**: the bearer-credential contract and HTTP
//!   surface
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use council_arena::config::ServerConfig;
//! use council_arena::errors::AppResult;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("council server will listen on {}", config.server_address());
//!     Ok(())
//! }
//! ```

/// Bearer credential validation
pub mod auth;

/// Environment-based configuration
pub mod config;

/// Council orchestration: sessions, roles, labels, ballots
pub mod council;

/// Durable session store over SQLite
pub mod database;

/// Unified error handling with standard error codes
pub mod errors;

/// Live event envelope and topic-keyed fan-out hub
pub mod events;

/// Structured logging setup
pub mod logging;

/// Common data models for sessions, responses, votes, and ratings
pub mod models;

/// Pluggable model provider gateway
pub mod providers;

/// Pairwise Elo rating computation
pub mod rating;

/// HTTP routes
pub mod routes;
