// ABOUTME: Session API: admission validation, role and label assignment, async orchestrator hand-off
// ABOUTME: Also the read path, user ballots, history, and cancellation entry point
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ballots, labels, roles, Orchestrator, SessionPlan};
use crate::config::{
    CouncilConfig, DEFAULT_DEBATE_ROUNDS, DEFAULT_RESPONSE_TIMEOUT_SECS, MAX_DEBATE_ROUNDS,
    MAX_MODELS, MIN_MODELS,
};
use crate::database::{Database, NewSession, NewVote};
use crate::errors::{AppError, AppResult};
use crate::events::EventHub;
use crate::models::{
    ModelInfo, Session, SessionConfig, SessionMode, SessionStatus, SessionSummary, StartRequest,
    VoterType,
};
use crate::providers::{infer_provider, ModelGateway, UserHandle};

/// What admission returns: enough to watch or poll the session
#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    /// The new session's id
    pub session_id: Uuid,
    /// Status at hand-off (always `pending`)
    pub status: SessionStatus,
}

/// Validates start requests, persists the session row, and hands off to the
/// orchestrator; also the read-path surface
#[derive(Clone)]
pub struct CouncilService {
    db: Database,
    gateway: Arc<dyn ModelGateway>,
    orchestrator: Orchestrator,
    config: CouncilConfig,
}

impl CouncilService {
    /// Wire the service over the shared store, hub, and gateway
    #[must_use]
    pub fn new(
        db: Database,
        hub: EventHub,
        gateway: Arc<dyn ModelGateway>,
        config: CouncilConfig,
    ) -> Self {
        let orchestrator = Orchestrator::new(db.clone(), hub, Arc::clone(&gateway), config.clone());
        Self {
            db,
            gateway,
            orchestrator,
            config,
        }
    }

    /// Validate and admit a session, returning as soon as the row is
    /// persisted; the deliberation itself runs in a spawned task.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for validation failures, `Transient` if the
    /// row cannot be persisted.
    pub async fn start_session(
        &self,
        user: &UserHandle,
        request: StartRequest,
    ) -> AppResult<StartedSession> {
        let question = request.question.trim().to_owned();
        let mode = request.mode.unwrap_or(SessionMode::Standard);
        let config = self.validate(&question, &request)?;

        self.register_models(user, &request.models).await?;

        let seed = self.config.role_seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let global_ratings = self.db.global_ratings(&request.models).await?;
        let assignment = roles::assign_roles(
            &request.models,
            config.enable_mystery_judge,
            config.enable_devil_advocate,
            request.chairperson_id.clone(),
            &global_ratings,
            &mut rng,
        );
        let label_map = labels::assign_labels(&assignment.responders, seed);

        let session_id = Uuid::new_v4();
        let seed_row = NewSession {
            id: session_id,
            user_id: user.user_id.clone(),
            question,
            mode,
            category_id: request.category_id,
            chairperson_id: Some(assignment.chairperson.clone()),
            devil_advocate_id: assignment.devil_advocate.clone(),
            mystery_judge_id: assignment.mystery_judge.clone(),
            config,
        };
        self.db.create_session(&seed_row).await?;

        let session = self.db.get_session(session_id).await?;
        info!(
            %session_id,
            user_id = %user.user_id,
            mode = mode.as_str(),
            responders = assignment.responders.len(),
            "session admitted"
        );

        self.orchestrator
            .spawn_session(SessionPlan {
                session,
                responders: assignment.responders,
                labels: label_map,
                user: user.clone(),
                seed,
            })
            .await;

        Ok(StartedSession {
            session_id,
            status: SessionStatus::Pending,
        })
    }

    fn validate(&self, question: &str, request: &StartRequest) -> AppResult<SessionConfig> {
        if question.is_empty() {
            return Err(AppError::invalid_request("question is required"));
        }
        if question.chars().count() > self.config.max_question_len {
            return Err(AppError::invalid_request(format!(
                "question exceeds {} characters",
                self.config.max_question_len
            )));
        }

        if request.models.len() < MIN_MODELS {
            return Err(AppError::invalid_request(format!(
                "at least {MIN_MODELS} models are required"
            )));
        }
        if request.models.len() > MAX_MODELS {
            return Err(AppError::invalid_request(format!(
                "maximum {MAX_MODELS} models allowed"
            )));
        }
        let unique: BTreeSet<&String> = request.models.iter().collect();
        if unique.len() != request.models.len() {
            return Err(AppError::invalid_request("models must be unique"));
        }

        if let Some(chair) = &request.chairperson_id {
            if !request.models.contains(chair) {
                return Err(AppError::invalid_request(
                    "chairperson must be a participating model",
                ));
            }
        }

        let debate_rounds = request.debate_rounds.unwrap_or(DEFAULT_DEBATE_ROUNDS);
        if !(1..=MAX_DEBATE_ROUNDS).contains(&debate_rounds) {
            return Err(AppError::invalid_request(format!(
                "debate_rounds must be between 1 and {MAX_DEBATE_ROUNDS}"
            )));
        }

        let response_timeout_secs = request
            .response_timeout_secs
            .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_SECS);
        if response_timeout_secs == 0 {
            return Err(AppError::invalid_request(
                "response_timeout_secs must be positive",
            ));
        }

        Ok(SessionConfig {
            debate_rounds,
            response_timeout_secs,
            enable_devil_advocate: request.enable_devil_advocate,
            enable_mystery_judge: request.enable_mystery_judge,
        })
    }

    async fn register_models(&self, user: &UserHandle, model_ids: &[String]) -> AppResult<()> {
        // Catalog entries prefer gateway metadata but never block admission
        // on a listing failure.
        let known = match self.gateway.list_models(user).await {
            Ok(models) => models,
            Err(err) => {
                warn!(error = %err, "model listing unavailable, cataloguing by id");
                Vec::new()
            }
        };

        for model_id in model_ids {
            let info = known
                .iter()
                .find(|model| &model.id == model_id)
                .cloned()
                .unwrap_or_else(|| ModelInfo {
                    id: model_id.clone(),
                    display_name: model_id.clone(),
                    provider: infer_provider(model_id).to_owned(),
                });
            self.db.register_model(&info).await?;
        }
        Ok(())
    }

    /// Load a session with joined responses and votes
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    pub async fn get_session(&self, session_id: Uuid) -> AppResult<Session> {
        self.db.get_session(session_id).await
    }

    /// Record the owning user's ranked ballot.
    ///
    /// The ballot must be a duplicate-free subset of the session's labels;
    /// its weight comes from configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an illegal ballot, `Conflict` if the
    /// user already voted, `NotFound` for an unknown session.
    pub async fn submit_user_vote(
        &self,
        user_id: &str,
        session_id: Uuid,
        ranked_responses: Vec<String>,
    ) -> AppResult<()> {
        let assignment = self.db.session_labels(session_id).await?;
        let valid_labels: BTreeSet<String> = assignment.into_values().collect();
        if valid_labels.is_empty() {
            return Err(AppError::conflict("session has no responses to rank yet"));
        }
        if !ballots::validate_ballot(&ranked_responses, &valid_labels) {
            return Err(AppError::invalid_request(
                "ranked_responses must be a duplicate-free subset of the session's labels",
            ));
        }

        self.db
            .append_vote(&NewVote {
                session_id,
                voter_type: VoterType::User,
                voter_id: user_id.to_owned(),
                ranked_responses,
                weight: self.config.user_vote_weight,
            })
            .await?;
        Ok(())
    }

    /// Cancel a running session
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    pub async fn cancel_session(&self, session_id: Uuid) -> AppResult<()> {
        self.orchestrator.cancel_session(session_id).await
    }

    /// Newest-first session history for a user
    ///
    /// # Errors
    ///
    /// Returns `Transient` on store faults.
    pub async fn history(&self, user_id: &str, limit: i64) -> AppResult<Vec<SessionSummary>> {
        self.db.list_sessions(user_id, limit).await
    }

    /// Models available to the caller through the gateway
    ///
    /// # Errors
    ///
    /// Returns `ProviderFailure` if the gateway cannot list models.
    pub async fn list_models(&self, user: &UserHandle) -> AppResult<Vec<ModelInfo>> {
        self.gateway.list_models(user).await
    }
}
