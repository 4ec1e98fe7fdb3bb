// ABOUTME: OpenAI-compatible provider gateway for local and cloud chat-completions endpoints
// ABOUTME: Streams via SSE and implements the voting and synthesis prompts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # OpenAI-Compatible Gateway
//!
//! Generic [`ModelGateway`] implementation for any OpenAI-compatible
//! chat-completions endpoint (Ollama, vLLM, LocalAI, hosted gateways).
//! Per-user clients come from the [`ClientPool`], carrying each user's
//! delegated credential as the bearer header.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    infer_provider, parse_ranking, ChunkReceiver, ClientPool, ModelGateway, SseEvent,
    SseLineBuffer, StreamChunk, UserHandle,
};
use crate::config::ProviderConfig;
use crate::errors::{AppError, AppResult};
use crate::models::ModelInfo;

/// Capacity of the chunk queue handed to the orchestrator
const CHUNK_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StreamChunkBody {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Gateway over an OpenAI-compatible chat-completions endpoint
pub struct OpenAiCompatibleGateway {
    pool: ClientPool,
    base_url: String,
}

impl OpenAiCompatibleGateway {
    /// Create a gateway with its own per-user client pool
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_owned();
        Self {
            pool: ClientPool::new(config),
            base_url,
        }
    }

    /// Stop the client pool
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Non-streaming completion used by voting and synthesis
    async fn complete(&self, user: &UserHandle, model_id: &str, prompt: &str) -> AppResult<String> {
        let client = self.pool.client_for(user).await?;
        let body = ChatRequest {
            model: model_id,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let response = client
            .post(self.api_url("chat/completions"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::provider(format!("request to {model_id} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::provider(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(AppError::provider(format!(
                "{model_id} returned {status}: {text}"
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| AppError::provider(format!("unparsable response from {model_id}: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if let Some(total) = parsed.usage.and_then(|u| u.total_tokens) {
            debug!(model_id, total_tokens = total, "completion finished");
        }
        Ok(content)
    }
}

#[async_trait]
impl ModelGateway for OpenAiCompatibleGateway {
    async fn list_models(&self, user: &UserHandle) -> AppResult<Vec<ModelInfo>> {
        if let Some(cached) = self.pool.cached_models(&user.user_id).await {
            return Ok(cached);
        }

        let client = self.pool.client_for(user).await?;
        let response = client
            .get(self.api_url("models"))
            .send()
            .await
            .map_err(|e| AppError::provider(format!("model listing failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::provider(format!(
                "model listing returned {status}"
            )));
        }

        let parsed: ModelsResponse = response
            .json()
            .await
            .map_err(|e| AppError::provider(format!("unparsable model listing: {e}")))?;

        let models: Vec<ModelInfo> = parsed
            .data
            .into_iter()
            .map(|entry| ModelInfo {
                display_name: entry.id.clone(),
                provider: infer_provider(&entry.id).to_owned(),
                id: entry.id,
            })
            .collect();

        self.pool.store_models(&user.user_id, models.clone()).await;
        debug!(user_id = %user.user_id, count = models.len(), "models cached");
        Ok(models)
    }

    async fn stream_prompt(
        &self,
        user: &UserHandle,
        model_id: &str,
        prompt: &str,
    ) -> AppResult<ChunkReceiver> {
        let client = self.pool.client_for(user).await?;
        let body = ChatRequest {
            model: model_id,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
        };

        let response = client
            .post(self.api_url("chat/completions"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::provider(format!("stream to {model_id} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::provider(format!(
                "{model_id} returned {status}: {text}"
            )));
        }

        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        let model = model_id.to_owned();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut line_buffer = SseLineBuffer::new();
            let mut content_len = 0usize;
            let mut finished = false;

            'outer: while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AppError::provider(format!(
                                "stream from {model} broke: {e}"
                            ))))
                            .await;
                        return;
                    }
                };

                for event in line_buffer.feed(&bytes) {
                    match event {
                        SseEvent::Done => {
                            finished = true;
                            break 'outer;
                        }
                        SseEvent::Data(json) => {
                            let Ok(parsed) = serde_json::from_str::<StreamChunkBody>(&json) else {
                                warn!(model, "skipping unparsable stream chunk");
                                continue;
                            };
                            for choice in parsed.choices {
                                if let Some(delta) = choice.delta.content {
                                    if !delta.is_empty() {
                                        content_len += delta.len();
                                        let chunk = StreamChunk {
                                            delta,
                                            done: false,
                                            token_count: None,
                                        };
                                        if tx.send(Ok(chunk)).await.is_err() {
                                            // Receiver dropped: cancelled.
                                            return;
                                        }
                                    }
                                }
                                if choice.finish_reason.is_some() {
                                    finished = true;
                                }
                            }
                        }
                    }
                }
            }

            if finished {
                let final_chunk = StreamChunk {
                    delta: String::new(),
                    done: true,
                    token_count: Some((content_len / 4) as i64),
                };
                let _ = tx.send(Ok(final_chunk)).await;
            } else {
                let _ = tx
                    .send(Err(AppError::provider(format!(
                        "stream from {model} ended without completion"
                    ))))
                    .await;
            }
        });

        Ok(rx)
    }

    async fn request_vote(
        &self,
        user: &UserHandle,
        model_id: &str,
        question: &str,
        responses: &BTreeMap<String, String>,
    ) -> AppResult<Vec<String>> {
        let labels: Vec<String> = responses.keys().cloned().collect();
        let prompt = build_vote_prompt(question, responses);

        let answer = self.complete(user, model_id, &prompt).await?;
        let ranking = parse_ranking(&answer, &labels);
        debug!(model_id, ?ranking, "vote collected");
        Ok(ranking)
    }

    async fn request_synthesis(
        &self,
        user: &UserHandle,
        model_id: &str,
        question: &str,
        responses: &BTreeMap<String, String>,
        ballots: &BTreeMap<String, Vec<String>>,
    ) -> AppResult<String> {
        let prompt = build_synthesis_prompt(question, responses, ballots);
        self.complete(user, model_id, &prompt).await
    }
}

fn build_vote_prompt(question: &str, responses: &BTreeMap<String, String>) -> String {
    let mut prompt = format!(
        "You are an expert evaluator assessing responses to a question. Rank the \
         following anonymized responses from best to worst based on accuracy, \
         completeness, clarity, and practical usefulness.\n\nQuestion: {question}\n\n\
         Here are the anonymized responses to evaluate:\n\n"
    );

    for (label, content) in responses {
        let _ = write!(prompt, "--- {label} ---\n{content}\n\n");
    }

    prompt.push_str(
        "Instructions:\n\
         1. Evaluate each response carefully\n\
         2. Return ONLY a comma-separated list of labels ranked from BEST to WORST\n\
         3. Example format: \"Response B, Response A, Response C\"\n\
         4. Do not include any other text, just the ranked list\n\n\
         Your ranking:",
    );
    prompt
}

fn build_synthesis_prompt(
    question: &str,
    responses: &BTreeMap<String, String>,
    ballots: &BTreeMap<String, Vec<String>>,
) -> String {
    let mut prompt = format!(
        "You are the chairperson of an AI council. Your role is to synthesize the \
         discussion and provide a comprehensive answer.\n\n\
         Original Question: {question}\n\n\
         The council members have provided the following responses:\n\n"
    );

    for (label, content) in responses {
        let _ = write!(prompt, "--- {label} ---\n{content}\n\n");
    }

    prompt.push_str("\nCouncil voting results (ranked from best to worst):\n");
    for (voter, ranking) in ballots {
        let _ = writeln!(prompt, "- {voter} ranked: {}", ranking.join(", "));
    }

    prompt.push_str(
        "\nAs the chairperson, provide a synthesis that identifies the consensus view, \
         highlights key insights from the top-ranked responses, notes significant \
         minority opinions, and gives a clear, actionable final answer.\n\nYour synthesis:",
    );
    prompt
}
