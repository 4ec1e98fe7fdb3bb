// ABOUTME: Session lifecycle state machine: response fan-out, voting, synthesis, rating hand-off
// ABOUTME: Each session runs in its own recovered task; failures and cancels publish exactly one terminal event
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ballots, prompts, CancelToken};
use crate::database::{Database, NewResponse, NewVote};
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::events::{EventHub, EventKind};
use crate::models::{
    Session, SessionMode, SessionResponse, SessionStatus, Vote, VoterType,
};
use crate::providers::{estimate_token_count, ModelGateway, UserHandle};
use crate::{config::CouncilConfig, rating};

/// Everything the orchestrator needs to drive one admitted session
#[derive(Clone)]
pub struct SessionPlan {
    /// The persisted session row, roles already assigned
    pub session: Session,
    /// Responding models (mystery judge excluded)
    pub responders: Vec<String>,
    /// Stable model-to-label assignment for the session
    pub labels: BTreeMap<String, String>,
    /// Caller identity forwarded to the provider gateway
    pub user: UserHandle,
    /// Seed driving tournament bracketing
    pub seed: u64,
}

/// How ballots persist during a voting fan-out
#[derive(Clone, Copy, PartialEq, Eq)]
enum VotePersist {
    /// Duplicate voters are a conflict
    Strict,
    /// Keep only a voter's first ballot row (tournament matches)
    FirstOnly,
}

struct StreamOutcome {
    response: SessionResponse,
    failed: bool,
}

/// Drives sessions from `pending` to a terminal status
#[derive(Clone)]
pub struct Orchestrator {
    db: Database,
    hub: EventHub,
    gateway: Arc<dyn ModelGateway>,
    config: CouncilConfig,
    cancellations: Arc<RwLock<HashMap<Uuid, CancelToken>>>,
}

impl Orchestrator {
    /// Create an orchestrator over the shared store, hub, and gateway
    #[must_use]
    pub fn new(
        db: Database,
        hub: EventHub,
        gateway: Arc<dyn ModelGateway>,
        config: CouncilConfig,
    ) -> Self {
        Self {
            db,
            hub,
            gateway,
            config,
            cancellations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Launch a session task. Returns immediately; progress is observable
    /// through the event hub and the store.
    ///
    /// The task is recovered at its root: a panic inside one session fails
    /// that session and never reaches its siblings.
    pub async fn spawn_session(&self, plan: SessionPlan) {
        let token = CancelToken::new();
        let session_id = plan.session.id;
        {
            let mut registry = self.cancellations.write().await;
            registry.insert(session_id, token.clone());
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let driven = AssertUnwindSafe(orchestrator.drive(plan, token))
                .catch_unwind()
                .await;

            match driven {
                Ok(Ok(())) => info!(%session_id, "session completed"),
                Ok(Err(err)) if err.code == ErrorCode::Cancelled => {
                    info!(%session_id, "session cancelled");
                }
                Ok(Err(err)) => {
                    warn!(%session_id, error = %err, "session failed");
                    orchestrator.fail_session(session_id, &err.message).await;
                }
                Err(_panic) => {
                    error!(%session_id, "session task panicked");
                    orchestrator
                        .fail_session(session_id, "internal error in session task")
                        .await;
                }
            }

            orchestrator.cancellations.write().await.remove(&session_id);
        });
    }

    /// Cancel a session: terminal transition, child-task cancellation, and
    /// the `council.cancelled` event. Idempotent once the session is
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    pub async fn cancel_session(&self, session_id: Uuid) -> AppResult<()> {
        let transitioned = self
            .db
            .try_terminalize(session_id, SessionStatus::Cancelled)
            .await?;

        if transitioned {
            if let Some(token) = self.cancellations.read().await.get(&session_id) {
                token.cancel();
            }
            self.hub
                .publish(session_id, EventKind::CouncilCancelled, Value::Null)
                .await;
            info!(%session_id, "cancellation applied");
        }
        Ok(())
    }

    async fn fail_session(&self, session_id: Uuid, reason: &str) {
        match self
            .db
            .try_terminalize(session_id, SessionStatus::Failed)
            .await
        {
            Ok(true) => {
                self.hub
                    .publish(
                        session_id,
                        EventKind::CouncilFailed,
                        json!({ "reason": reason }),
                    )
                    .await;
            }
            Ok(false) => {
                // Lost the race to cancellation; its terminal event stands.
                debug!(%session_id, "failure after terminal status, suppressing event");
            }
            Err(err) => error!(%session_id, error = %err, "could not record session failure"),
        }
    }

    fn ensure_live(token: &CancelToken) -> AppResult<()> {
        if token.is_cancelled() {
            return Err(AppError::cancelled());
        }
        Ok(())
    }

    async fn drive(&self, plan: SessionPlan, token: CancelToken) -> AppResult<()> {
        let session_id = plan.session.id;

        self.db
            .update_session_status(session_id, SessionStatus::Responding)
            .await?;
        let label_list: Vec<&String> = plan.labels.values().collect();
        self.hub
            .publish(
                session_id,
                EventKind::CouncilStarted,
                json!({
                    "mode": plan.session.mode,
                    "models": plan.responders,
                    "labels": label_list,
                }),
            )
            .await;

        match plan.session.mode {
            SessionMode::Standard => self.run_standard(&plan, &token).await,
            SessionMode::Debate => self.run_debate(&plan, &token).await,
            SessionMode::Tournament => self.run_tournament(&plan, &token).await,
        }
    }

    async fn run_standard(&self, plan: &SessionPlan, token: &CancelToken) -> AppResult<()> {
        let responses = self
            .collect_responses(plan, &plan.responders, 1, &[], token)
            .await?;
        let votes = self.voting_stage(plan, &responses, token).await?;
        self.synthesis_stage(plan, &responses, &votes, token).await?;
        self.apply_rating_update(plan, &votes).await?;
        self.complete_session(plan.session.id).await
    }

    async fn run_debate(&self, plan: &SessionPlan, token: &CancelToken) -> AppResult<()> {
        let rounds = plan.session.config.debate_rounds.max(1);
        let mut all_responses: Vec<SessionResponse> = Vec::new();

        for round in 1..=rounds {
            Self::ensure_live(token)?;
            let responses = self
                .collect_responses(plan, &plan.responders, round, &all_responses, token)
                .await?;
            all_responses.extend(responses);
        }

        // Voting and synthesis operate on the final round only.
        let final_responses: Vec<SessionResponse> = all_responses
            .iter()
            .filter(|response| response.round == rounds)
            .cloned()
            .collect();

        let votes = self.voting_stage(plan, &final_responses, token).await?;
        self.synthesis_stage(plan, &final_responses, &votes, token)
            .await?;
        self.apply_rating_update(plan, &votes).await?;
        self.complete_session(plan.session.id).await
    }

    async fn run_tournament(&self, plan: &SessionPlan, token: &CancelToken) -> AppResult<()> {
        let session_id = plan.session.id;
        let label_to_model = invert_labels(&plan.labels);

        let mut bracket = plan.responders.clone();
        let mut rng = StdRng::seed_from_u64(plan.seed);
        bracket.shuffle(&mut rng);

        let mut aggregated_ballots: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut final_votes: Vec<Vote> = Vec::new();
        let mut match_index = 0u32;
        let mut bracket_round = 1u32;

        while bracket.len() > 1 {
            let mut winners = Vec::new();
            let mut i = 0;
            while i < bracket.len() {
                if i + 1 >= bracket.len() {
                    // Odd participant advances on a bye.
                    debug!(%session_id, model = %bracket[i], "bye into next round");
                    winners.push(bracket[i].clone());
                    break;
                }

                let pair = vec![bracket[i].clone(), bracket[i + 1].clone()];
                match_index += 1;

                let responses = self
                    .collect_responses(plan, &pair, bracket_round, &[], token)
                    .await?;
                let votes = self
                    .collect_votes(plan, &responses, &pair, VotePersist::FirstOnly, token)
                    .await?;

                for vote in &votes {
                    let ranked_models: Vec<String> = vote
                        .ranked_responses
                        .iter()
                        .filter_map(|label| label_to_model.get(label).cloned())
                        .collect();
                    if ranked_models.len() >= 2 {
                        aggregated_ballots
                            .insert(format!("{}#m{match_index}", vote.voter_id), ranked_models);
                    }
                }

                let winner = Self::match_winner(&votes, &label_to_model)
                    .unwrap_or_else(|| pair[0].clone());
                debug!(%session_id, match_index, %winner, "match decided");
                winners.push(winner);
                final_votes = votes;
                i += 2;
            }
            bracket = winners;
            bracket_round += 1;
        }

        let champion = bracket
            .first()
            .cloned()
            .ok_or_else(|| AppError::stage("tournament produced no champion"))?;
        let champion_label = plan
            .labels
            .get(&champion)
            .cloned()
            .ok_or_else(|| AppError::stage(format!("champion {champion} has no label")))?;

        Self::ensure_live(token)?;
        self.hub
            .publish(
                session_id,
                EventKind::TournamentChampion,
                json!({
                    "winner_label": champion_label,
                    "winner_model_id": champion,
                }),
            )
            .await;

        // The per-match ballots are already written; the voting stage here
        // only advances the state machine toward synthesis.
        self.db
            .update_session_status(session_id, SessionStatus::Voting)
            .await?;
        self.hub
            .publish(session_id, EventKind::VotingStarted, Value::Null)
            .await;

        // Final synthesis over the champion's last response.
        let champion_responses: Vec<SessionResponse> = self
            .db
            .list_responses(session_id)
            .await?
            .into_iter()
            .filter(|response| response.model_id == champion)
            .collect();
        let last_response = champion_responses
            .into_iter()
            .max_by_key(|response| response.round)
            .ok_or_else(|| AppError::stage("champion has no recorded response"))?;

        self.synthesis_stage(plan, std::slice::from_ref(&last_response), &final_votes, token)
            .await?;

        if !aggregated_ballots.is_empty() {
            let ballots_ref = &aggregated_ballots;
            self.db
                .compute_rating_update(
                    session_id,
                    plan.session.category_id,
                    ballots_ref,
                    |snapshots| Ok(rating::compute_update(snapshots, ballots_ref)),
                )
                .await?;
        }

        self.complete_session(session_id).await
    }

    fn match_winner(
        votes: &[Vote],
        label_to_model: &BTreeMap<String, String>,
    ) -> Option<String> {
        let consensus = ballots::borda_consensus(votes);
        consensus
            .first()
            .and_then(|label| label_to_model.get(label))
            .cloned()
    }

    /// Fan out one round of streaming prompts and join on every stream.
    ///
    /// A failing stream records its partial buffer and does not abort
    /// siblings; the stage fails only when every participant fails.
    async fn collect_responses(
        &self,
        plan: &SessionPlan,
        models: &[String],
        round: u32,
        prior_rounds: &[SessionResponse],
        token: &CancelToken,
    ) -> AppResult<Vec<SessionResponse>> {
        Self::ensure_live(token)?;

        let mut handles = Vec::with_capacity(models.len());
        for model_id in models {
            let orchestrator = self.clone();
            let plan = plan.clone();
            let model_id = model_id.clone();
            let prompt = prompts::build_response_prompt(
                &plan.session.question,
                plan.session.devil_advocate_id.as_deref() == Some(model_id.as_str()),
                prior_rounds,
            );
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .run_stream(&plan, &model_id, round, &prompt, &token)
                    .await
            }));
        }

        let mut responses = Vec::new();
        let mut failures = 0usize;
        for handle in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    if outcome.failed {
                        failures += 1;
                    }
                    responses.push(outcome.response);
                }
                Ok(Err(err)) => return Err(err),
                Err(join_err) => {
                    warn!(error = %join_err, "stream task aborted");
                    failures += 1;
                }
            }
        }

        Self::ensure_live(token)?;
        if failures >= models.len() {
            return Err(AppError::stage(format!(
                "all {} participants failed in round {round}",
                models.len()
            )));
        }
        Ok(responses)
    }

    async fn run_stream(
        &self,
        plan: &SessionPlan,
        model_id: &str,
        round: u32,
        prompt: &str,
        token: &CancelToken,
    ) -> AppResult<StreamOutcome> {
        let session_id = plan.session.id;
        let label = plan
            .labels
            .get(model_id)
            .cloned()
            .ok_or_else(|| AppError::stage(format!("{model_id} has no label")))?;

        self.hub
            .publish(
                session_id,
                EventKind::ModelResponding,
                json!({ "model_id": model_id, "label": label }),
            )
            .await;

        let started = Instant::now();
        let timeout = Duration::from_secs(plan.session.config.response_timeout_secs.max(1));
        let mut content = String::new();
        let mut reported_tokens = None;
        let mut failed = false;

        match self
            .gateway
            .stream_prompt(&plan.user, model_id, prompt)
            .await
        {
            Err(err) => {
                warn!(%session_id, model_id, error = %err, "stream failed to open");
                failed = true;
            }
            Ok(mut chunks) => loop {
                let next = tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(AppError::cancelled()),
                    next = tokio::time::timeout(timeout, chunks.recv()) => next,
                };
                match next {
                    Err(_elapsed) => {
                        warn!(%session_id, model_id, "stream timed out, keeping partial buffer");
                        failed = true;
                        break;
                    }
                    Ok(None) => {
                        warn!(%session_id, model_id, "stream closed without completion");
                        failed = true;
                        break;
                    }
                    Ok(Some(Err(err))) => {
                        warn!(%session_id, model_id, error = %err, "stream errored mid-flight");
                        failed = true;
                        break;
                    }
                    Ok(Some(Ok(chunk))) => {
                        content.push_str(&chunk.delta);
                        if chunk.token_count.is_some() {
                            reported_tokens = chunk.token_count;
                        }
                        self.hub
                            .publish(
                                session_id,
                                EventKind::ModelResponseChunk,
                                json!({
                                    "label": label,
                                    "content_delta": chunk.delta,
                                    "done": chunk.done,
                                }),
                            )
                            .await;
                        if chunk.done {
                            break;
                        }
                    }
                }
            },
        }

        let response_time_ms =
            i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let token_count = reported_tokens.unwrap_or_else(|| estimate_token_count(&content));

        let new_response = NewResponse {
            session_id,
            model_id: model_id.to_owned(),
            round,
            content,
            anonymous_label: label.clone(),
            response_time_ms,
            token_count,
        };
        let row_id = self.db.append_response(&new_response).await?;

        if !failed {
            self.hub
                .publish(
                    session_id,
                    EventKind::ModelComplete,
                    json!({ "label": label, "response_time_ms": response_time_ms }),
                )
                .await;
        }

        Ok(StreamOutcome {
            response: SessionResponse {
                id: row_id,
                session_id,
                model_id: new_response.model_id,
                round,
                content: new_response.content,
                anonymous_label: label,
                response_time_ms,
                token_count,
                created_at: chrono::Utc::now(),
            },
            failed,
        })
    }

    async fn voting_stage(
        &self,
        plan: &SessionPlan,
        responses: &[SessionResponse],
        token: &CancelToken,
    ) -> AppResult<Vec<Vote>> {
        Self::ensure_live(token)?;
        self.db
            .update_session_status(plan.session.id, SessionStatus::Voting)
            .await?;
        self.hub
            .publish(plan.session.id, EventKind::VotingStarted, Value::Null)
            .await;

        self.collect_votes(plan, responses, &plan.responders, VotePersist::Strict, token)
            .await
    }

    /// Fan out voting requests to all voters over the anonymized map.
    ///
    /// Voter failures and illegal ballots degrade to a missing vote; they
    /// never fail the stage.
    async fn collect_votes(
        &self,
        plan: &SessionPlan,
        responses: &[SessionResponse],
        responding_models: &[String],
        persist: VotePersist,
        token: &CancelToken,
    ) -> AppResult<Vec<Vote>> {
        let anonymized: BTreeMap<String, String> = responses
            .iter()
            .map(|response| (response.anonymous_label.clone(), response.content.clone()))
            .collect();
        let valid_labels: BTreeSet<String> = anonymized.keys().cloned().collect();

        let mut voters: Vec<String> = responding_models.to_vec();
        if let Some(judge) = &plan.session.mystery_judge_id {
            voters.push(judge.clone());
        }

        let mut handles = Vec::with_capacity(voters.len());
        for voter_id in voters {
            let orchestrator = self.clone();
            let plan = plan.clone();
            let anonymized = anonymized.clone();
            let valid_labels = valid_labels.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .run_vote(&plan, &voter_id, &anonymized, &valid_labels, persist, &token)
                    .await
            }));
        }

        let mut votes = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(Some(vote))) => votes.push(vote),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => return Err(err),
                Err(join_err) => warn!(error = %join_err, "vote task aborted"),
            }
        }

        Self::ensure_live(token)?;
        Ok(votes)
    }

    async fn run_vote(
        &self,
        plan: &SessionPlan,
        voter_id: &str,
        anonymized: &BTreeMap<String, String>,
        valid_labels: &BTreeSet<String>,
        persist: VotePersist,
        token: &CancelToken,
    ) -> AppResult<Option<Vote>> {
        let session_id = plan.session.id;

        let ranking = tokio::select! {
            biased;
            () = token.cancelled() => return Err(AppError::cancelled()),
            result = self.gateway.request_vote(
                &plan.user,
                voter_id,
                &plan.session.question,
                anonymized,
            ) => match result {
                Ok(ranking) => ranking,
                Err(err) => {
                    warn!(%session_id, voter_id, error = %err, "voter failed, skipping ballot");
                    return Ok(None);
                }
            },
        };

        if !ballots::validate_ballot(&ranking, valid_labels) {
            warn!(%session_id, voter_id, ?ranking, "discarding illegal ballot");
            return Ok(None);
        }

        let weight = if plan.session.mystery_judge_id.as_deref() == Some(voter_id) {
            self.config.mystery_judge_weight
        } else {
            1.0
        };

        let new_vote = NewVote {
            session_id,
            voter_type: VoterType::Model,
            voter_id: voter_id.to_owned(),
            ranked_responses: ranking.clone(),
            weight,
        };

        let vote_id = match persist {
            VotePersist::Strict => Some(self.db.append_vote(&new_vote).await?),
            VotePersist::FirstOnly => self.db.append_vote_if_first(&new_vote).await?,
        };

        self.hub
            .publish(
                session_id,
                EventKind::VotingReceived,
                json!({ "voter_id": voter_id }),
            )
            .await;

        Ok(Some(Vote {
            id: vote_id.unwrap_or_default(),
            session_id,
            voter_type: VoterType::Model,
            voter_id: voter_id.to_owned(),
            ranked_responses: ranking,
            weight,
            created_at: chrono::Utc::now(),
        }))
    }

    async fn synthesis_stage(
        &self,
        plan: &SessionPlan,
        responses: &[SessionResponse],
        votes: &[Vote],
        token: &CancelToken,
    ) -> AppResult<()> {
        let session_id = plan.session.id;

        Self::ensure_live(token)?;
        self.db
            .update_session_status(session_id, SessionStatus::Synthesizing)
            .await?;
        self.hub
            .publish(session_id, EventKind::SynthesisStarted, Value::Null)
            .await;

        let chairperson = plan
            .session
            .chairperson_id
            .as_deref()
            .ok_or_else(|| AppError::stage("no chairperson assigned"))?;

        let response_map: BTreeMap<String, String> = responses
            .iter()
            .map(|response| (response.anonymous_label.clone(), response.content.clone()))
            .collect();
        let ballot_map: BTreeMap<String, Vec<String>> = votes
            .iter()
            .map(|vote| (vote.voter_id.clone(), vote.ranked_responses.clone()))
            .collect();

        let synthesis = tokio::select! {
            biased;
            () = token.cancelled() => return Err(AppError::cancelled()),
            result = self.gateway.request_synthesis(
                &plan.user,
                chairperson,
                &plan.session.question,
                &response_map,
                &ballot_map,
            ) => result.map_err(|err| AppError::stage(format!("synthesis failed: {}", err.message)))?,
        };

        let minority_report = ballots::detect_minority_report(
            votes,
            self.config.minority_threshold_divisor,
        )
        .and_then(|finding| {
            debug!(
                %session_id,
                voter_id = %finding.voter_id,
                distance = finding.distance,
                "minority report attached"
            );
            response_map.get(&finding.top_label).cloned()
        });

        self.db
            .set_synthesis(session_id, &synthesis, minority_report.as_deref())
            .await?;
        self.hub
            .publish(
                session_id,
                EventKind::SynthesisComplete,
                json!({
                    "synthesis": synthesis,
                    "minority_report": minority_report,
                }),
            )
            .await;
        Ok(())
    }

    async fn apply_rating_update(&self, plan: &SessionPlan, votes: &[Vote]) -> AppResult<()> {
        let label_to_model = invert_labels(&plan.labels);

        let mut rating_ballots: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for vote in votes {
            let ranked_models: Vec<String> = vote
                .ranked_responses
                .iter()
                .filter_map(|label| label_to_model.get(label).cloned())
                .collect();
            if ranked_models.len() >= 2 {
                rating_ballots.insert(vote.voter_id.clone(), ranked_models);
            }
        }

        if rating_ballots.is_empty() {
            debug!(session_id = %plan.session.id, "no usable ballots, skipping rating update");
            return Ok(());
        }

        let ballots_ref = &rating_ballots;
        let changes = self
            .db
            .compute_rating_update(
                plan.session.id,
                plan.session.category_id,
                ballots_ref,
                |snapshots| Ok(rating::compute_update(snapshots, ballots_ref)),
            )
            .await?;
        debug!(session_id = %plan.session.id, models = changes.len(), "ratings updated");
        Ok(())
    }

    async fn complete_session(&self, session_id: Uuid) -> AppResult<()> {
        self.db
            .update_session_status(session_id, SessionStatus::Completed)
            .await?;
        self.hub
            .publish(session_id, EventKind::CouncilCompleted, Value::Null)
            .await;
        Ok(())
    }
}

fn invert_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(model, label)| (label.clone(), model.clone()))
        .collect()
}
