// ABOUTME: Rating engine persistence: one-transaction updates, history, matchups, atomicity
// ABOUTME: Induces a mid-transaction failure to prove nothing partial commits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;

use uuid::Uuid;

use council_arena::database::{Database, NewSession};
use council_arena::errors::AppError;
use council_arena::models::{SessionConfig, SessionMode};
use council_arena::rating::{self, RatingReason, INITIAL_RATING};

async fn store_with_session() -> (Database, Uuid) {
    let db = Database::new("sqlite::memory:").await.expect("database");
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
    .expect("session");
    (db, id)
}

fn unanimous_ballots() -> BTreeMap<String, Vec<String>> {
    [
        ("m1".to_owned(), vec!["m1".to_owned(), "m2".to_owned(), "m3".to_owned()]),
        ("m2".to_owned(), vec!["m1".to_owned(), "m2".to_owned(), "m3".to_owned()]),
        ("m3".to_owned(), vec!["m1".to_owned(), "m2".to_owned(), "m3".to_owned()]),
    ]
    .into()
}

#[tokio::test]
async fn rating_update_persists_ratings_history_and_matchups() {
    let (db, session_id) = store_with_session().await;
    let ballots = unanimous_ballots();

    let changes = db
        .compute_rating_update(session_id, None, &ballots, |snapshots| {
            Ok(rating::compute_update(snapshots, &ballots))
        })
        .await
        .unwrap();
    assert_eq!(changes.len(), 3);

    let ratings = db.list_ratings(None).await.unwrap();
    assert_eq!(ratings.len(), 3);
    // Strongest first; unanimity puts m1 on top and m3 at the bottom.
    assert_eq!(ratings[0].model_id, "m1");
    assert_eq!(ratings[2].model_id, "m3");
    assert!(ratings[0].rating > INITIAL_RATING);
    assert!(ratings[2].rating < INITIAL_RATING);
    // m1 swept both pairs.
    assert_eq!(ratings[0].wins, 2);
    assert_eq!(ratings[2].losses, 2);

    let history = db.rating_history("m1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_rating, INITIAL_RATING);
    assert_eq!(history[0].reason, RatingReason::Win.as_str());
    assert_eq!(history[0].session_id, Some(session_id));

    let matchup = db.get_matchup("m1", "m2", None).await.unwrap().unwrap();
    assert_eq!(matchup.model_a_wins, 1);
    assert_eq!(matchup.model_b_wins, 0);

    // Reversed argument order resolves the same canonical row.
    let same = db.get_matchup("m2", "m1", None).await.unwrap().unwrap();
    assert_eq!(same.model_a_id, matchup.model_a_id);
}

#[tokio::test]
async fn second_update_accumulates_counters_and_replaces_rating() {
    let (db, session_id) = store_with_session().await;
    let ballots = unanimous_ballots();

    for _ in 0..2 {
        db.compute_rating_update(session_id, None, &ballots, |snapshots| {
            Ok(rating::compute_update(snapshots, &ballots))
        })
        .await
        .unwrap();
    }

    let ratings = db.list_ratings(None).await.unwrap();
    let top = ratings.iter().find(|r| r.model_id == "m1").unwrap();
    assert_eq!(top.wins, 4);
    assert_eq!(top.games_played(), 4);

    let history = db.rating_history("m1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    // The second entry starts from the first entry's outcome: absolute
    // replacement, not an additive upsert.
    let newest = &history[0];
    let oldest = &history[1];
    assert_eq!(newest.old_rating, oldest.new_rating);

    let matchup = db.get_matchup("m1", "m2", None).await.unwrap().unwrap();
    assert_eq!(matchup.model_a_wins, 2);
}

#[tokio::test]
async fn category_scopes_are_independent() {
    let (db, session_id) = store_with_session().await;
    let ballots = unanimous_ballots();

    db.compute_rating_update(session_id, Some(42), &ballots, |snapshots| {
        Ok(rating::compute_update(snapshots, &ballots))
    })
    .await
    .unwrap();

    assert!(db.list_ratings(None).await.unwrap().is_empty());
    assert_eq!(db.list_ratings(Some(42)).await.unwrap().len(), 3);

    let snapshot = db.rating_snapshot("m1", None).await.unwrap();
    assert_eq!(snapshot.rating, INITIAL_RATING);
    assert_eq!(snapshot.games_played, 0);
}

#[tokio::test]
async fn induced_failure_leaves_no_partial_state() {
    let (db, session_id) = store_with_session().await;
    let ballots = unanimous_ballots();

    // Seed real state first.
    db.compute_rating_update(session_id, None, &ballots, |snapshots| {
        Ok(rating::compute_update(snapshots, &ballots))
    })
    .await
    .unwrap();
    let ratings_before = db.list_ratings(None).await.unwrap();
    let history_before = db.rating_history("m1", 10).await.unwrap();
    let matchup_before = db.get_matchup("m1", "m2", None).await.unwrap().unwrap();

    // The compute callback fails mid-transaction.
    let err = db
        .compute_rating_update(session_id, None, &ballots, |_snapshots| {
            Err(AppError::transient("induced failure"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, council_arena::errors::ErrorCode::Transient);

    // Nothing moved: not ratings, not history, not matchups.
    let ratings_after = db.list_ratings(None).await.unwrap();
    assert_eq!(
        ratings_before
            .iter()
            .map(|r| (r.model_id.clone(), r.rating, r.wins, r.losses, r.draws))
            .collect::<Vec<_>>(),
        ratings_after
            .iter()
            .map(|r| (r.model_id.clone(), r.rating, r.wins, r.losses, r.draws))
            .collect::<Vec<_>>()
    );
    assert_eq!(
        db.rating_history("m1", 10).await.unwrap().len(),
        history_before.len()
    );
    let matchup_after = db.get_matchup("m1", "m2", None).await.unwrap().unwrap();
    assert_eq!(matchup_after.model_a_wins, matchup_before.model_a_wins);
}

#[tokio::test]
async fn ballots_with_one_model_are_a_noop() {
    let (db, session_id) = store_with_session().await;
    let ballots: BTreeMap<String, Vec<String>> =
        [("v".to_owned(), vec!["m1".to_owned()])].into();

    let changes = db
        .compute_rating_update(session_id, None, &ballots, |snapshots| {
            Ok(rating::compute_update(snapshots, &ballots))
        })
        .await
        .unwrap();
    assert!(changes.is_empty());
    assert!(db.list_ratings(None).await.unwrap().is_empty());
}
