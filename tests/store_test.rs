// ABOUTME: Session store invariants: transition table enforcement, duplicate rejection, ballot hygiene
// ABOUTME: Runs against an in-memory SQLite database
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::Utc;
use uuid::Uuid;

use council_arena::database::{Database, NewResponse, NewSession, NewVote};
use council_arena::errors::ErrorCode;
use council_arena::models::{SessionConfig, SessionMode, SessionStatus, VoterType};

async fn store() -> Database {
    Database::new("sqlite::memory:").await.expect("database")
}

async fn seeded_session(db: &Database) -> Uuid {
    let id = Uuid::new_v4();
    db.create_session(&NewSession {
        id,
        user_id: "user-1".into(),
        question: "Q".into(),
        mode: SessionMode::Standard,
        category_id: None,
        chairperson_id: Some("m1".into()),
        devil_advocate_id: None,
        mystery_judge_id: None,
        config: SessionConfig::default(),
    })
    .await
    .expect("create session");
    id
}

#[tokio::test]
async fn duplicate_session_id_is_a_conflict() {
    let db = store().await;
    let id = seeded_session(&db).await;

    let err = db
        .create_session(&NewSession {
            id,
            user_id: "user-1".into(),
            question: "Q".into(),
            mode: SessionMode::Standard,
            category_id: None,
            chairperson_id: None,
            devil_advocate_id: None,
            mystery_judge_id: None,
            config: SessionConfig::default(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn status_transitions_follow_the_state_machine() {
    let db = store().await;
    let id = seeded_session(&db).await;

    // Skipping a stage is rejected.
    let err = db
        .update_session_status(id, SessionStatus::Voting)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    db.update_session_status(id, SessionStatus::Responding)
        .await
        .unwrap();
    // Debate rounds re-enter responding.
    db.update_session_status(id, SessionStatus::Responding)
        .await
        .unwrap();
    db.update_session_status(id, SessionStatus::Voting)
        .await
        .unwrap();

    // Regression is rejected.
    let err = db
        .update_session_status(id, SessionStatus::Responding)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    db.update_session_status(id, SessionStatus::Synthesizing)
        .await
        .unwrap();
    db.update_session_status(id, SessionStatus::Completed)
        .await
        .unwrap();

    // Terminal is forever.
    let err = db
        .update_session_status(id, SessionStatus::Responding)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
    assert!(!db.try_terminalize(id, SessionStatus::Failed).await.unwrap());

    let session = db.get_session(id).await.unwrap();
    assert!(session.completed_at.is_some());
}

#[tokio::test]
async fn terminalize_is_first_writer_wins() {
    let db = store().await;
    let id = seeded_session(&db).await;

    assert!(db
        .try_terminalize(id, SessionStatus::Cancelled)
        .await
        .unwrap());
    assert!(!db.try_terminalize(id, SessionStatus::Failed).await.unwrap());
    assert_eq!(
        db.session_status(id).await.unwrap(),
        SessionStatus::Cancelled
    );
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let db = store().await;
    let err = db.session_status(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = db
        .update_session_status(Uuid::new_v4(), SessionStatus::Responding)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn duplicate_response_per_round_is_rejected() {
    let db = store().await;
    let id = seeded_session(&db).await;

    let response = NewResponse {
        session_id: id,
        model_id: "m1".into(),
        round: 1,
        content: "x".into(),
        anonymous_label: "Response A".into(),
        response_time_ms: 5,
        token_count: 1,
    };
    db.append_response(&response).await.unwrap();

    let err = db.append_response(&response).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    // Another round is fine, and the label stays with the model.
    db.append_response(&NewResponse {
        round: 2,
        ..response.clone()
    })
    .await
    .unwrap();

    let labels = db.session_labels(id).await.unwrap();
    assert_eq!(labels.get("m1").map(String::as_str), Some("Response A"));
}

#[tokio::test]
async fn duplicate_voter_is_rejected_but_first_only_mode_is_quiet() {
    let db = store().await;
    let id = seeded_session(&db).await;

    let vote = NewVote {
        session_id: id,
        voter_type: VoterType::Model,
        voter_id: "m1".into(),
        ranked_responses: vec!["Response A".into(), "Response B".into()],
        weight: 1.0,
    };
    db.append_vote(&vote).await.unwrap();

    let err = db.append_vote(&vote).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    assert!(db.append_vote_if_first(&vote).await.unwrap().is_none());
    assert_eq!(db.list_votes(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_persisted_ballot_is_discarded_on_load() {
    let db = store().await;
    let id = seeded_session(&db).await;

    db.append_vote(&NewVote {
        session_id: id,
        voter_type: VoterType::Model,
        voter_id: "good".into(),
        ranked_responses: vec!["Response A".into()],
        weight: 1.0,
    })
    .await
    .unwrap();

    // Corrupt rows written around the store's API.
    sqlx::query(
        "INSERT INTO votes (session_id, voter_type, voter_id, ranked_responses, weight, created_at)
         VALUES (?, 'model', 'broken', 'not-json', 1.0, ?)",
    )
    .bind(id.to_string())
    .bind(Utc::now())
    .execute(db.pool())
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO votes (session_id, voter_type, voter_id, ranked_responses, weight, created_at)
         VALUES (?, 'model', 'dupey', '[\"Response A\",\"Response A\"]', 1.0, ?)",
    )
    .bind(id.to_string())
    .bind(Utc::now())
    .execute(db.pool())
    .await
    .unwrap();

    let votes = db.list_votes(id).await.unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].voter_id, "good");
}

#[tokio::test]
async fn synthesis_writes_only_while_synthesizing() {
    let db = store().await;
    let id = seeded_session(&db).await;

    let err = db.set_synthesis(id, "text", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    db.update_session_status(id, SessionStatus::Responding)
        .await
        .unwrap();
    db.update_session_status(id, SessionStatus::Voting)
        .await
        .unwrap();
    db.update_session_status(id, SessionStatus::Synthesizing)
        .await
        .unwrap();

    db.set_synthesis(id, "the verdict", Some("the dissent"))
        .await
        .unwrap();

    let session = db.get_session(id).await.unwrap();
    assert_eq!(session.synthesis.as_deref(), Some("the verdict"));
    assert_eq!(session.minority_report.as_deref(), Some("the dissent"));
}

#[tokio::test]
async fn history_lists_own_sessions_newest_first() {
    let db = store().await;
    let first = seeded_session(&db).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = seeded_session(&db).await;

    // Another user's session stays invisible.
    db.create_session(&NewSession {
        id: Uuid::new_v4(),
        user_id: "someone-else".into(),
        question: "Q".into(),
        mode: SessionMode::Standard,
        category_id: None,
        chairperson_id: None,
        devil_advocate_id: None,
        mystery_judge_id: None,
        config: SessionConfig::default(),
    })
    .await
    .unwrap();

    let history = db.list_sessions("user-1", 20).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second);
    assert_eq!(history[1].id, first);
}
