// ABOUTME: Tournament-mode scenarios: bracket with a bye, champion event, aggregated rating update
// ABOUTME: Exercises per-match voting with first-ballot-only persistence
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use common::{
    collect_until_terminal, harness, test_user, wait_terminal, StreamScript, StubGateway,
    VoteScript,
};
use council_arena::events::EventKind;
use council_arena::models::{SessionMode, SessionStatus, StartRequest};

#[tokio::test]
async fn tournament_with_odd_bracket_gives_a_bye_and_crowns_a_champion() {
    let (stub, gate) = StubGateway::new()
        .with_stream("m1", StreamScript::Content("alpha".into()))
        .with_stream("m2", StreamScript::Content("beta".into()))
        .with_stream("m3", StreamScript::Content("gamma".into()))
        .with_default_vote(VoteScript::Ranking(vec![
            "Response A",
            "Response B",
            "Response C",
        ]))
        .gated();
    let harness = harness(Arc::new(stub)).await;

    let request = StartRequest {
        question: "Q1".into(),
        models: vec!["m1".into(), "m2".into(), "m3".into()],
        mode: Some(SessionMode::Tournament),
        ..StartRequest::default()
    };
    let started = harness
        .service
        .start_session(&test_user(), request)
        .await
        .unwrap();
    let (_id, mut rx) = harness.hub.subscribe(started.session_id).await;
    // Two matches of two streams each.
    gate.add_permits(4);

    assert_eq!(
        wait_terminal(&harness.db, started.session_id).await,
        SessionStatus::Completed
    );

    let events = collect_until_terminal(&mut rx).await;
    let champion_events: Vec<_> = events
        .iter()
        .filter(|e| e.event == EventKind::TournamentChampion)
        .collect();
    assert_eq!(champion_events.len(), 1);

    let champion = champion_events[0];
    let winner_label = champion
        .data
        .get("winner_label")
        .and_then(|v| v.as_str())
        .expect("winner_label");
    let winner_model = champion
        .data
        .get("winner_model_id")
        .and_then(|v| v.as_str())
        .expect("winner_model_id");

    let session = harness.service.get_session(started.session_id).await.unwrap();

    // Two matches in total: 2 responses in bracket round 1 (one model got a
    // bye), 2 in bracket round 2.
    assert_eq!(session.responses.len(), 4);
    assert_eq!(
        session.responses.iter().filter(|r| r.round == 1).count(),
        2
    );
    assert_eq!(
        session.responses.iter().filter(|r| r.round == 2).count(),
        2
    );

    // The champion's label belongs to the champion model.
    let label_to_model: BTreeMap<&str, &str> = session
        .responses
        .iter()
        .map(|r| (r.anonymous_label.as_str(), r.model_id.as_str()))
        .collect();
    assert_eq!(label_to_model[winner_label], winner_model);

    // The champion responded in the final bracket round.
    assert!(session
        .responses
        .iter()
        .any(|r| r.model_id == winner_model && r.round == 2));

    // Synthesis ran over the champion's final response.
    assert!(session.synthesis.is_some());

    // Aggregated ballots drove a rating update.
    let ratings = harness.db.list_ratings(None).await.unwrap();
    assert!(!ratings.is_empty());
    let rated: BTreeSet<&str> = ratings.iter().map(|r| r.model_id.as_str()).collect();
    assert!(rated.contains(winner_model));

    // Each persisted ballot is unique per voter even though some models
    // judged two matches.
    let voters: BTreeSet<&str> = session.votes.iter().map(|v| v.voter_id.as_str()).collect();
    assert_eq!(voters.len(), session.votes.len());
}

#[tokio::test]
async fn two_model_tournament_has_single_match() {
    let stub = Arc::new(
        StubGateway::new()
            .with_stream("m1", StreamScript::Content("alpha".into()))
            .with_stream("m2", StreamScript::Content("beta".into()))
            .with_default_vote(VoteScript::Ranking(vec!["Response A", "Response B"])),
    );
    let harness = harness(stub).await;

    let request = StartRequest {
        question: "Q1".into(),
        models: vec!["m1".into(), "m2".into()],
        mode: Some(SessionMode::Tournament),
        ..StartRequest::default()
    };
    let started = harness
        .service
        .start_session(&test_user(), request)
        .await
        .unwrap();

    assert_eq!(
        wait_terminal(&harness.db, started.session_id).await,
        SessionStatus::Completed
    );

    let session = harness.service.get_session(started.session_id).await.unwrap();
    assert_eq!(session.responses.len(), 2);
    assert!(session.responses.iter().all(|r| r.round == 1));
    assert!(session.synthesis.is_some());

    // The Borda winner under the fixed ballot is Response A's owner.
    let winner = session
        .responses
        .iter()
        .find(|r| r.anonymous_label == "Response A")
        .map(|r| r.model_id.clone())
        .unwrap();
    let matchup = harness
        .db
        .get_matchup("m1", "m2", None)
        .await
        .unwrap()
        .expect("matchup row");
    let winner_wins = if winner == matchup.model_a_id {
        matchup.model_a_wins
    } else {
        matchup.model_b_wins
    };
    assert_eq!(winner_wins, 1);
}
