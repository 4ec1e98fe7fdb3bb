// ABOUTME: Pairwise Elo rating computation derived from ranked ballots
// ABOUTME: Pure and deterministic; persistence happens in the store's rating transaction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # Rating Engine
//!
//! Converts a set of ranked ballots into rating updates for every model named
//! on any ballot. Each ballot contributes a win to every ordered pair it
//! ranks; per-pair scores are averaged over the ballots that rank both
//! members, then pushed through the standard Elo expectation with a
//! games-played / rating tiered K-factor.
//!
//! All iteration runs over sorted structures, so the output is independent of
//! input map order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Rating assigned to a model before its first game
pub const INITIAL_RATING: i64 = 1500;

/// K-factor for models with fewer than 30 games
pub const K_FACTOR_PROVISIONAL: f64 = 25.0;

/// K-factor for established models
pub const K_FACTOR_NORMAL: f64 = 15.0;

/// K-factor for models rated above 2000
pub const K_FACTOR_ELITE: f64 = 10.0;

/// Games below which a model is considered provisional
pub const PROVISIONAL_GAMES: i64 = 30;

/// Rating above which the elite K-factor applies
pub const ELITE_RATING: i64 = 2000;

/// Pair score above which the higher side is a win (below `1 - WIN_THRESHOLD`
/// it is a loss; in between, a draw)
pub const WIN_THRESHOLD: f64 = 0.6;

/// A model's rating state entering an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingSnapshot {
    /// Current rating
    pub rating: i64,
    /// Total games played in this category scope
    pub games_played: i64,
}

impl Default for RatingSnapshot {
    fn default() -> Self {
        Self {
            rating: INITIAL_RATING,
            games_played: 0,
        }
    }
}

/// Reason recorded in the rating history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingReason {
    /// Aggregate rating change was positive
    Win,
    /// Aggregate rating change was negative
    Loss,
    /// Aggregate rating change was zero
    Draw,
}

impl RatingReason {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Draw => "draw",
        }
    }
}

/// One model's rating movement from an update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingChange {
    /// Rated model
    pub model_id: String,
    /// Rating before
    pub old_rating: i64,
    /// Rating after
    pub new_rating: i64,
    /// Signed change
    pub change: i64,
    /// History reason from the aggregate change sign
    pub reason: RatingReason,
}

/// Per-model win/loss/draw increments from one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordDelta {
    /// Pairwise wins gained
    pub wins: i64,
    /// Pairwise losses gained
    pub losses: i64,
    /// Pairwise draws gained
    pub draws: i64,
}

/// Head-to-head outcome of one unordered pair, canonically ordered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairOutcome {
    /// Lexicographically smaller model id
    pub model_a: String,
    /// Lexicographically larger model id
    pub model_b: String,
    /// Winning model, or None for a draw
    pub winner: Option<String>,
}

/// Complete result of a rating computation
#[derive(Debug, Clone, Default)]
pub struct RatingUpdate {
    /// Per-model rating movements, sorted by model id
    pub changes: Vec<RatingChange>,
    /// Per-model win/loss/draw increments
    pub records: BTreeMap<String, RecordDelta>,
    /// Canonically ordered pair outcomes for matchup bookkeeping
    pub pair_outcomes: Vec<PairOutcome>,
    /// Unrounded per-model deltas, exposed for conservation checks
    pub raw_deltas: BTreeMap<String, f64>,
}

/// Expected score of `rating_a` against `rating_b` under the logistic curve
#[must_use]
pub fn expected_score(rating_a: i64, rating_b: i64) -> f64 {
    let diff = (rating_b - rating_a) as f64;
    1.0 / (1.0 + 10_f64.powf(diff / 400.0))
}

/// K-factor for a model given its games played and current rating
#[must_use]
pub const fn k_factor(games_played: i64, rating: i64) -> f64 {
    if games_played < PROVISIONAL_GAMES {
        K_FACTOR_PROVISIONAL
    } else if rating > ELITE_RATING {
        K_FACTOR_ELITE
    } else {
        K_FACTOR_NORMAL
    }
}

/// Compute rating movements for every model named on any ballot.
///
/// `ballots` maps a voter key to its ranked model ids, best first. Models
/// missing from `snapshots` enter at the initial rating with zero games. A
/// ballot that omits some models contributes only to the pairs it fully
/// ranks; each pair's score is averaged over the ballots ranking both of its
/// members.
#[must_use]
pub fn compute_update(
    snapshots: &BTreeMap<String, RatingSnapshot>,
    ballots: &BTreeMap<String, Vec<String>>,
) -> RatingUpdate {
    let models: BTreeSet<&str> = ballots
        .values()
        .flat_map(|ranking| ranking.iter().map(String::as_str))
        .collect();

    if models.len() < 2 {
        return RatingUpdate::default();
    }

    // Pairwise win counts and per-pair ballot counts, keyed (winner, loser)
    // and (a, b) with a < b respectively.
    let mut pair_wins: BTreeMap<(&str, &str), f64> = BTreeMap::new();
    let mut pair_ballots: BTreeMap<(&str, &str), f64> = BTreeMap::new();

    for ranking in ballots.values() {
        for (i, winner) in ranking.iter().enumerate() {
            for loser in &ranking[i + 1..] {
                *pair_wins
                    .entry((winner.as_str(), loser.as_str()))
                    .or_default() += 1.0;
                let key = canonical(winner.as_str(), loser.as_str());
                *pair_ballots.entry(key).or_default() += 1.0;
            }
        }
    }

    let snapshot_of = |model: &str| snapshots.get(model).copied().unwrap_or_default();

    let mut raw_deltas: BTreeMap<String, f64> = BTreeMap::new();
    let mut records: BTreeMap<String, RecordDelta> = BTreeMap::new();
    let mut pair_outcomes = Vec::new();

    let ordered: Vec<&str> = models.iter().copied().collect();
    for (i, &a) in ordered.iter().enumerate() {
        for &b in &ordered[i + 1..] {
            let Some(&voters) = pair_ballots.get(&(a, b)) else {
                continue;
            };

            let score_a = pair_wins.get(&(a, b)).copied().unwrap_or_default() / voters;
            let score_b = pair_wins.get(&(b, a)).copied().unwrap_or_default() / voters;

            let snap_a = snapshot_of(a);
            let snap_b = snapshot_of(b);

            let expected_a = expected_score(snap_a.rating, snap_b.rating);
            let expected_b = 1.0 - expected_a;

            let k_a = k_factor(snap_a.games_played, snap_a.rating);
            let k_b = k_factor(snap_b.games_played, snap_b.rating);

            *raw_deltas.entry(a.to_owned()).or_default() += k_a * (score_a - expected_a);
            *raw_deltas.entry(b.to_owned()).or_default() += k_b * (score_b - expected_b);

            let record_a = records.entry(a.to_owned()).or_default();
            if score_a > WIN_THRESHOLD {
                record_a.wins += 1;
            } else if score_a < 1.0 - WIN_THRESHOLD {
                record_a.losses += 1;
            } else {
                record_a.draws += 1;
            }

            let record_b = records.entry(b.to_owned()).or_default();
            if score_b > WIN_THRESHOLD {
                record_b.wins += 1;
            } else if score_b < 1.0 - WIN_THRESHOLD {
                record_b.losses += 1;
            } else {
                record_b.draws += 1;
            }

            let winner = if score_a > WIN_THRESHOLD {
                Some(a.to_owned())
            } else if score_b > WIN_THRESHOLD {
                Some(b.to_owned())
            } else {
                None
            };
            pair_outcomes.push(PairOutcome {
                model_a: a.to_owned(),
                model_b: b.to_owned(),
                winner,
            });
        }
    }

    let mut changes = Vec::with_capacity(models.len());
    for &model in &ordered {
        let snap = snapshot_of(model);
        let delta = raw_deltas.get(model).copied().unwrap_or_default();
        let new_rating = ((snap.rating as f64 + delta).round() as i64).max(0);
        let change = new_rating - snap.rating;

        let reason = match change.cmp(&0) {
            std::cmp::Ordering::Greater => RatingReason::Win,
            std::cmp::Ordering::Less => RatingReason::Loss,
            std::cmp::Ordering::Equal => RatingReason::Draw,
        };

        changes.push(RatingChange {
            model_id: model.to_owned(),
            old_rating: snap.rating,
            new_rating,
            change,
            reason,
        });
    }

    RatingUpdate {
        changes,
        records,
        pair_outcomes,
        raw_deltas,
    }
}

/// Canonical (smaller, larger) ordering of a model pair
fn canonical<'a>(x: &'a str, y: &'a str) -> (&'a str, &'a str) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}
