// ABOUTME: HTTP routes for session admission, reads, user ballots, cancellation, and the SSE feed
// ABOUTME: Bearer extraction and ownership checks happen here; everything else delegates to the service
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

use crate::auth::AuthManager;
use crate::council::CouncilService;
use crate::errors::{AppError, AppResult};
use crate::events::{CouncilEvent, EventHub};
use crate::models::{Session, StartRequest};
use crate::providers::UserHandle;

/// Shared state handed to every handler
pub struct AppState {
    /// Session API
    pub service: CouncilService,
    /// Live event fan-out
    pub hub: EventHub,
    /// Bearer credential validation
    pub auth: AuthManager,
}

/// Build the application router
#[must_use]
pub fn router(state: Arc<AppState>, frontend_origin: Option<&str>) -> Router {
    let cors = match frontend_origin.and_then(|origin| origin.parse::<HeaderValue>().ok()) {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/models", get(list_models))
        .route("/api/council", post(start_session))
        .route("/api/council/history", get(history))
        .route("/api/council/{id}", get(get_session))
        .route("/api/council/{id}/vote", post(submit_vote))
        .route("/api/council/{id}/cancel", post(cancel_session))
        .route("/api/council/{id}/events", get(session_events))
        .layer(cors)
        .with_state(state)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<UserHandle> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing authorization header"))?;
    state.auth.validate_bearer(value)
}

async fn owned_session(
    state: &AppState,
    user: &UserHandle,
    session_id: Uuid,
) -> AppResult<Session> {
    let session = state.service.get_session(session_id).await?;
    if session.user_id != user.user_id {
        return Err(AppError::unauthorized("not the session owner"));
    }
    Ok(session)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user = authenticate(&state, &headers)?;
    let models = state.service.list_models(&user).await?;
    Ok(Json(models))
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<StartRequest>,
) -> AppResult<impl IntoResponse> {
    let user = authenticate(&state, &headers)?;
    let started = state.service.start_session(&user, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session_id": started.session_id,
            "status": started.status,
            "events_url": format!("/api/council/{}/events", started.session_id),
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
}

async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> AppResult<impl IntoResponse> {
    let user = authenticate(&state, &headers)?;
    let sessions = state
        .service
        .history(&user.user_id, params.limit.unwrap_or(20))
        .await?;
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let user = authenticate(&state, &headers)?;
    let session = owned_session(&state, &user, session_id).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct VoteBody {
    ranked_responses: Vec<String>,
}

async fn submit_vote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Json(body): Json<VoteBody>,
) -> AppResult<impl IntoResponse> {
    let user = authenticate(&state, &headers)?;
    state
        .service
        .submit_user_vote(&user.user_id, session_id, body.ranked_responses)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn cancel_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let user = authenticate(&state, &headers)?;
    owned_session(&state, &user, session_id).await?;
    state.service.cancel_session(session_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// SSE bridge over the event hub.
///
/// The stream ends after the session's terminal event. A subscriber that
/// connects mid-session should first read the session from the store, then
/// follow live events from here.
async fn session_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let user = authenticate(&state, &headers)?;
    owned_session(&state, &user, session_id).await?;

    let (_subscriber, receiver) = state.hub.subscribe(session_id).await;

    let stream = ReceiverStream::new(receiver)
        .scan(false, |finished, envelope: CouncilEvent| {
            if *finished {
                return futures_util::future::ready(None);
            }
            if envelope.event.is_terminal() {
                *finished = true;
            }
            futures_util::future::ready(Some(envelope))
        })
        .map(|envelope| {
            let event = Event::default().event(envelope.event.as_str());
            let event = event
                .json_data(&envelope)
                .unwrap_or_else(|_| Event::default().comment("serialization failure"));
            Ok::<Event, Infallible>(event)
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
