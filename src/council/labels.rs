// ABOUTME: Anonymous label assignment for council participants
// ABOUTME: A seeded permutation keeps labels stable across rounds and reproducible in tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// The label text for the participant at `index` ("Response A", ...)
#[must_use]
pub fn label_for(index: usize) -> String {
    let letter = char::from(b'A' + u8::try_from(index % 26).unwrap_or(0));
    format!("Response {letter}")
}

/// Assign anonymous labels to the responding models.
///
/// Models are shuffled by a seeded permutation so voters cannot infer
/// authorship from label order, then labels `Response A..` are handed out in
/// shuffled order. The mapping is computed once per session and reused for
/// every round, keeping each model's label stable.
#[must_use]
pub fn assign_labels(models: &[String], seed: u64) -> BTreeMap<String, String> {
    let mut shuffled: Vec<&String> = models.iter().collect();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    shuffled
        .into_iter()
        .enumerate()
        .map(|(index, model)| (model.clone(), label_for(index)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn models(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|m| (*m).to_owned()).collect()
    }

    #[test]
    fn labels_are_a_prefix_of_the_alphabet() {
        let assignment = assign_labels(&models(&["m1", "m2", "m3"]), 7);
        let labels: BTreeSet<&String> = assignment.values().collect();
        assert_eq!(labels.len(), 3);
        for expected in ["Response A", "Response B", "Response C"] {
            assert!(labels.contains(&expected.to_owned()));
        }
    }

    #[test]
    fn assignment_is_a_bijection() {
        let assignment = assign_labels(&models(&["m1", "m2", "m3", "m4"]), 42);
        let labels: BTreeSet<&String> = assignment.values().collect();
        assert_eq!(assignment.len(), 4);
        assert_eq!(labels.len(), 4);
    }

    #[test]
    fn same_seed_same_assignment() {
        let ids = models(&["m1", "m2", "m3"]);
        assert_eq!(assign_labels(&ids, 99), assign_labels(&ids, 99));
    }

    #[test]
    fn different_seeds_eventually_permute() {
        let ids = models(&["m1", "m2", "m3", "m4", "m5"]);
        let base = assign_labels(&ids, 0);
        let permuted = (1..50).any(|seed| assign_labels(&ids, seed) != base);
        assert!(permuted, "seed never changed the permutation");
    }
}
