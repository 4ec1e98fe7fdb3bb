// ABOUTME: Ballot arithmetic: Borda scoring, consensus ranking, and minority-report detection
// ABOUTME: Divergence uses the Spearman footrule distance against the Borda consensus
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::{BTreeMap, BTreeSet};

use crate::models::Vote;

/// A voter whose ballot diverges enough from consensus to warrant a
/// minority report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinorityFinding {
    /// The divergent voter
    pub voter_id: String,
    /// That voter's top-ranked label
    pub top_label: String,
    /// Footrule distance from the consensus ranking
    pub distance: usize,
}

/// Weighted Borda scores per label: `Σ (|ranks| - position) * weight`
#[must_use]
pub fn borda_scores(votes: &[Vote]) -> BTreeMap<String, f64> {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    for vote in votes {
        let len = vote.ranked_responses.len();
        for (position, label) in vote.ranked_responses.iter().enumerate() {
            *scores.entry(label.clone()).or_default() += (len - position) as f64 * vote.weight;
        }
    }
    scores
}

/// Consensus ranking: labels by descending Borda score, ties by label
#[must_use]
pub fn borda_consensus(votes: &[Vote]) -> Vec<String> {
    let scores = borda_scores(votes);
    let mut labels: Vec<(String, f64)> = scores.into_iter().collect();
    labels.sort_by(|(label_a, score_a), (label_b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| label_a.cmp(label_b))
    });
    labels.into_iter().map(|(label, _)| label).collect()
}

/// Spearman footrule distance: `Σ |rank_i(a) - rank_i(b)|` over the labels
/// present in both rankings
#[must_use]
pub fn footrule_distance(a: &[String], b: &[String]) -> usize {
    let positions_b: BTreeMap<&str, usize> = b
        .iter()
        .enumerate()
        .map(|(index, label)| (label.as_str(), index))
        .collect();

    a.iter()
        .enumerate()
        .filter_map(|(index_a, label)| {
            positions_b
                .get(label.as_str())
                .map(|index_b| index_a.abs_diff(*index_b))
        })
        .sum()
}

/// Divergence threshold for `n` ranked labels: `n*(n-1)/divisor`
#[must_use]
pub const fn minority_threshold(labels: usize, divisor: usize) -> usize {
    if divisor == 0 {
        usize::MAX
    } else {
        labels * (labels - 1) / divisor
    }
}

/// Find the voter whose ballot diverges most from the Borda consensus,
/// provided its footrule distance exceeds the threshold.
///
/// Ties on distance break toward the lexicographically smaller voter id so
/// detection is deterministic.
#[must_use]
pub fn detect_minority_report(votes: &[Vote], divisor: usize) -> Option<MinorityFinding> {
    if votes.is_empty() {
        return None;
    }

    let consensus = borda_consensus(votes);
    let threshold = minority_threshold(consensus.len(), divisor);

    let mut finding: Option<MinorityFinding> = None;
    for vote in votes {
        let distance = footrule_distance(&vote.ranked_responses, &consensus);
        if distance <= threshold {
            continue;
        }
        let top_label = match vote.ranked_responses.first() {
            Some(label) => label.clone(),
            None => continue,
        };

        let replace = finding.as_ref().is_none_or(|current| {
            distance > current.distance
                || (distance == current.distance && vote.voter_id < current.voter_id)
        });
        if replace {
            finding = Some(MinorityFinding {
                voter_id: vote.voter_id.clone(),
                top_label,
                distance,
            });
        }
    }
    finding
}

/// Whether a ballot is a duplicate-free subset of the session's labels
#[must_use]
pub fn validate_ballot(ranked: &[String], session_labels: &BTreeSet<String>) -> bool {
    if ranked.is_empty() {
        return false;
    }
    let mut seen = BTreeSet::new();
    ranked
        .iter()
        .all(|label| session_labels.contains(label) && seen.insert(label.as_str()))
}
