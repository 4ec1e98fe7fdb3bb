// ABOUTME: Provider gateway abstraction for pluggable LLM back-ends
// ABOUTME: Defines the streaming, voting, and synthesis contract the orchestrator consumes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # Provider Gateway Service Provider Interface
//!
//! The orchestrator talks to heterogeneous LLM back-ends through the
//! [`ModelGateway`] trait: list models, stream a prompt as a lazy chunk
//! sequence, request a ranked ballot over anonymized responses, and request
//! the chairperson synthesis. One production implementation targets any
//! OpenAI-compatible chat-completions endpoint.

mod openai_compatible;
mod parsing;
mod pool;
mod sse;

pub use openai_compatible::OpenAiCompatibleGateway;
pub use parsing::parse_ranking;
pub use pool::ClientPool;
pub use sse::{SseEvent, SseLineBuffer};

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::{AppError, AppResult};
use crate::models::ModelInfo;

/// A chunk of a streaming model response
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Content delta for this chunk
    pub delta: String,
    /// Whether this is the final chunk; exactly one chunk per stream sets it
    pub done: bool,
    /// Token count, reported on the final chunk when the back-end knows it
    pub token_count: Option<i64>,
}

/// One-writer, one-reader chunk queue that closes when the stream ends
pub type ChunkReceiver = mpsc::Receiver<Result<StreamChunk, AppError>>;

/// Authenticated caller identity forwarded to the gateway.
///
/// `credential` is the delegated model-provider token from the bearer
/// exchange; the core treats it as opaque.
#[derive(Debug, Clone)]
pub struct UserHandle {
    /// User id from the validated bearer credential
    pub user_id: String,
    /// Opaque provider credential
    pub credential: String,
}

/// Contract between the orchestrator and any LLM back-end
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// List the models available to a user (cached per user with a TTL)
    async fn list_models(&self, user: &UserHandle) -> AppResult<Vec<ModelInfo>>;

    /// Stream a prompt to a model.
    ///
    /// Produces a finite chunk sequence over a bounded queue. The sequence
    /// ends with exactly one `done` chunk on success; an `Err` item reports a
    /// mid-stream failure and terminates the sequence. Dropping the receiver
    /// cancels the stream.
    async fn stream_prompt(
        &self,
        user: &UserHandle,
        model_id: &str,
        prompt: &str,
    ) -> AppResult<ChunkReceiver>;

    /// Ask a model to rank anonymized responses, best first.
    ///
    /// Implementations must recover from an unparsable answer by returning
    /// the labels in their input order; a ranking failure never fails the
    /// overall session.
    async fn request_vote(
        &self,
        user: &UserHandle,
        model_id: &str,
        question: &str,
        responses: &BTreeMap<String, String>,
    ) -> AppResult<Vec<String>>;

    /// Ask the chairperson model for a synthesis over responses and ballots
    async fn request_synthesis(
        &self,
        user: &UserHandle,
        model_id: &str,
        question: &str,
        responses: &BTreeMap<String, String>,
        ballots: &BTreeMap<String, Vec<String>>,
    ) -> AppResult<String>;
}

/// Rough token estimate used when a back-end reports no count
#[must_use]
pub fn estimate_token_count(content: &str) -> i64 {
    // ~4 chars per token for English text
    (content.len() / 4) as i64
}

/// Infer a provider family from a model id
#[must_use]
pub fn infer_provider(model_id: &str) -> &'static str {
    let lowered = model_id.to_ascii_lowercase();
    if ["gpt", "o1", "o3", "o4"].iter().any(|p| lowered.contains(p)) {
        "openai"
    } else if lowered.contains("claude") {
        "anthropic"
    } else if lowered.contains("gemini") {
        "google"
    } else {
        "unknown"
    }
}
