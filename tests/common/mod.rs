// ABOUTME: Shared test harness: scripted stub gateway and session helpers
// ABOUTME: Drives deterministic council scenarios against an in-memory store
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use uuid::Uuid;

use council_arena::config::CouncilConfig;
use council_arena::council::CouncilService;
use council_arena::database::Database;
use council_arena::errors::{AppError, AppResult};
use council_arena::events::{CouncilEvent, EventHub, EventKind};
use council_arena::models::{ModelInfo, SessionStatus};
use council_arena::providers::{ChunkReceiver, ModelGateway, StreamChunk, UserHandle};

/// How a stub model behaves when streamed to
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// One content chunk, then a clean completion
    Content(String),
    /// Different content per call (indexed by call count), for debate rounds
    PerRound(Vec<String>),
    /// A partial chunk followed by a mid-stream error
    ErrorMidway(String),
    /// The stream fails to open at all
    FailOpen,
    /// One chunk, then silence (for timeout and cancellation scenarios)
    Hang(String),
}

/// How a stub voter answers the ranking request
#[derive(Debug, Clone)]
pub enum VoteScript {
    /// A fixed label preference, filtered to the labels actually offered
    Ranking(Vec<&'static str>),
    /// Echo the offered labels in their input order
    InputOrder,
    /// The voting call fails
    Fail,
}

/// Scripted provider gateway for deterministic scenarios
pub struct StubGateway {
    streams: HashMap<String, StreamScript>,
    votes: HashMap<String, VoteScript>,
    default_vote: VoteScript,
    synthesis_fails: bool,
    calls: Mutex<HashMap<String, usize>>,
    gate: Option<Arc<Semaphore>>,
    /// The anonymized map offered to the most recent voter
    pub last_vote_responses: Mutex<Option<BTreeMap<String, String>>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            votes: HashMap::new(),
            default_vote: VoteScript::InputOrder,
            synthesis_fails: false,
            calls: Mutex::new(HashMap::new()),
            gate: None,
            last_vote_responses: Mutex::new(None),
        }
    }

    pub fn with_stream(mut self, model_id: &str, script: StreamScript) -> Self {
        self.streams.insert(model_id.to_owned(), script);
        self
    }

    pub fn with_vote(mut self, model_id: &str, script: VoteScript) -> Self {
        self.votes.insert(model_id.to_owned(), script);
        self
    }

    pub fn with_default_vote(mut self, script: VoteScript) -> Self {
        self.default_vote = script;
        self
    }

    pub fn with_failing_synthesis(mut self) -> Self {
        self.synthesis_fails = true;
        self
    }

    /// Gate every stream open on an explicit permit, so tests can subscribe
    /// to the event hub before any event is published.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }
}

#[async_trait]
impl ModelGateway for StubGateway {
    async fn list_models(&self, _user: &UserHandle) -> AppResult<Vec<ModelInfo>> {
        Ok(self
            .streams
            .keys()
            .map(|id| ModelInfo {
                id: id.clone(),
                display_name: format!("Stub {id}"),
                provider: "stub".into(),
            })
            .collect())
    }

    async fn stream_prompt(
        &self,
        _user: &UserHandle,
        model_id: &str,
        _prompt: &str,
    ) -> AppResult<ChunkReceiver> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let call_index = {
            let mut calls = self.calls.lock().await;
            let counter = calls.entry(model_id.to_owned()).or_insert(0);
            let index = *counter;
            *counter += 1;
            index
        };

        let script = self
            .streams
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| StreamScript::Content(format!("stub output from {model_id}")));

        if matches!(script, StreamScript::FailOpen) {
            return Err(AppError::provider(format!("{model_id} refused the stream")));
        }

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            match script {
                StreamScript::Content(content) => {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            delta: content.clone(),
                            done: false,
                            token_count: None,
                        }))
                        .await;
                    let _ = tx
                        .send(Ok(StreamChunk {
                            delta: String::new(),
                            done: true,
                            token_count: Some((content.len() / 4) as i64),
                        }))
                        .await;
                }
                StreamScript::PerRound(contents) => {
                    let content = contents
                        .get(call_index)
                        .cloned()
                        .unwrap_or_else(|| format!("round {}", call_index + 1));
                    let _ = tx
                        .send(Ok(StreamChunk {
                            delta: content,
                            done: false,
                            token_count: None,
                        }))
                        .await;
                    let _ = tx
                        .send(Ok(StreamChunk {
                            delta: String::new(),
                            done: true,
                            token_count: None,
                        }))
                        .await;
                }
                StreamScript::ErrorMidway(prefix) => {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            delta: prefix,
                            done: false,
                            token_count: None,
                        }))
                        .await;
                    let _ = tx
                        .send(Err(AppError::provider("stub stream broke")))
                        .await;
                }
                StreamScript::Hang(first) => {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            delta: first,
                            done: false,
                            token_count: None,
                        }))
                        .await;
                    // Hold the channel open until the receiver gives up.
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                StreamScript::FailOpen => unreachable!("handled above"),
            }
        });

        Ok(rx)
    }

    async fn request_vote(
        &self,
        _user: &UserHandle,
        model_id: &str,
        _question: &str,
        responses: &BTreeMap<String, String>,
    ) -> AppResult<Vec<String>> {
        let offered: Vec<String> = responses.keys().cloned().collect();
        *self.last_vote_responses.lock().await = Some(responses.clone());
        let script = self
            .votes
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| self.default_vote.clone());

        match script {
            VoteScript::InputOrder => Ok(offered),
            VoteScript::Fail => Err(AppError::provider(format!("{model_id} refused to vote"))),
            VoteScript::Ranking(preferred) => {
                let mut ranking: Vec<String> = preferred
                    .iter()
                    .map(|label| (*label).to_owned())
                    .filter(|label| offered.contains(label))
                    .collect();
                for label in offered {
                    if !ranking.contains(&label) {
                        ranking.push(label);
                    }
                }
                Ok(ranking)
            }
        }
    }

    async fn request_synthesis(
        &self,
        _user: &UserHandle,
        model_id: &str,
        question: &str,
        _responses: &BTreeMap<String, String>,
        _ballots: &BTreeMap<String, Vec<String>>,
    ) -> AppResult<String> {
        if self.synthesis_fails {
            return Err(AppError::provider("stub chairperson refused"));
        }
        Ok(format!("[{model_id}] synthesis of: {question}"))
    }
}

/// Everything a scenario needs, wired over an in-memory store
pub struct TestHarness {
    pub db: Database,
    pub hub: EventHub,
    pub service: CouncilService,
}

/// Fixed seed so roles, labels, and brackets are reproducible
pub const TEST_SEED: u64 = 7;

pub async fn harness(gateway: Arc<dyn ModelGateway>) -> TestHarness {
    harness_with_config(gateway, CouncilConfig {
        role_seed: Some(TEST_SEED),
        ..CouncilConfig::default()
    })
    .await
}

pub async fn harness_with_config(
    gateway: Arc<dyn ModelGateway>,
    config: CouncilConfig,
) -> TestHarness {
    harness_with_buffer(gateway, config, 64).await
}

pub async fn harness_with_buffer(
    gateway: Arc<dyn ModelGateway>,
    config: CouncilConfig,
    event_buffer: usize,
) -> TestHarness {
    let db = Database::new("sqlite::memory:").await.expect("database");
    let hub = EventHub::new(event_buffer);
    let service = CouncilService::new(db.clone(), hub.clone(), gateway, config);
    TestHarness { db, hub, service }
}

pub fn test_user() -> UserHandle {
    UserHandle {
        user_id: "user-1".into(),
        credential: "provider-token".into(),
    }
}

/// Poll the store until the session reaches a terminal status
pub async fn wait_terminal(db: &Database, session_id: Uuid) -> SessionStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = db.session_status(session_id).await.expect("status");
        if status.is_terminal() {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session stuck in {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Drain events until (and including) the first terminal event
pub async fn collect_until_terminal(
    rx: &mut tokio::sync::mpsc::Receiver<CouncilEvent>,
) -> Vec<CouncilEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for a terminal event")
            .expect("event channel closed before a terminal event");
        let terminal = event.event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

pub fn kinds(events: &[CouncilEvent]) -> Vec<EventKind> {
    events.iter().map(|event| event.event).collect()
}
