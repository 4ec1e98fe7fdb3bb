// ABOUTME: Special-role selection at admission: mystery judge, devil's advocate, chairperson
// ABOUTME: Randomness is seeded so test scenarios are reproducible
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;

use crate::rating::INITIAL_RATING;

/// Outcome of role assignment for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    /// Models that respond to the question
    pub responders: Vec<String>,
    /// Model withdrawn from responding to judge with extra weight
    pub mystery_judge: Option<String>,
    /// Responder instructed to argue against the consensus
    pub devil_advocate: Option<String>,
    /// Model that produces the synthesis
    pub chairperson: String,
}

/// Assign special roles over the participating models.
///
/// 1. With the mystery judge enabled and at least three participants, one
///    model is drawn uniformly and removed from the responding set; it only
///    votes.
/// 2. With the devil's advocate enabled and at least two responders left,
///    one responder is drawn uniformly; it still responds, adversarially.
/// 3. The chairperson is the explicit override when given, otherwise the
///    responder with the highest global rating, ties broken by ascending
///    model id.
pub fn assign_roles(
    models: &[String],
    enable_mystery_judge: bool,
    enable_devil_advocate: bool,
    chairperson_override: Option<String>,
    global_ratings: &BTreeMap<String, i64>,
    rng: &mut StdRng,
) -> RoleAssignment {
    let mut responders: Vec<String> = models.to_vec();

    let mystery_judge = if enable_mystery_judge && responders.len() >= 3 {
        let index = rng.gen_range(0..responders.len());
        Some(responders.remove(index))
    } else {
        None
    };

    let devil_advocate = if enable_devil_advocate && responders.len() >= 2 {
        let index = rng.gen_range(0..responders.len());
        Some(responders[index].clone())
    } else {
        None
    };

    let chairperson = chairperson_override.unwrap_or_else(|| {
        responders
            .iter()
            .max_by(|a, b| {
                let rating_a = global_ratings.get(*a).copied().unwrap_or(INITIAL_RATING);
                let rating_b = global_ratings.get(*b).copied().unwrap_or(INITIAL_RATING);
                // Highest rating wins; on a tie the smaller model id does.
                rating_a.cmp(&rating_b).then_with(|| b.cmp(a))
            })
            .cloned()
            .unwrap_or_default()
    });

    RoleAssignment {
        responders,
        mystery_judge,
        devil_advocate,
        chairperson,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn models(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|m| (*m).to_owned()).collect()
    }

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn mystery_judge_is_removed_from_responders() {
        let all = models(&["m1", "m2", "m3"]);
        let roles = assign_roles(&all, true, false, None, &BTreeMap::new(), &mut rng(1));

        let judge = roles.mystery_judge.expect("judge assigned");
        assert_eq!(roles.responders.len(), 2);
        assert!(!roles.responders.contains(&judge));
        assert!(all.contains(&judge));
    }

    #[test]
    fn mystery_judge_needs_three_participants() {
        let roles = assign_roles(
            &models(&["m1", "m2"]),
            true,
            false,
            None,
            &BTreeMap::new(),
            &mut rng(1),
        );
        assert_eq!(roles.mystery_judge, None);
        assert_eq!(roles.responders.len(), 2);
    }

    #[test]
    fn devil_advocate_stays_a_responder() {
        let roles = assign_roles(
            &models(&["m1", "m2", "m3"]),
            false,
            true,
            None,
            &BTreeMap::new(),
            &mut rng(2),
        );
        let devil = roles.devil_advocate.expect("devil assigned");
        assert!(roles.responders.contains(&devil));
        assert_eq!(roles.responders.len(), 3);
    }

    #[test]
    fn chairperson_override_wins() {
        let roles = assign_roles(
            &models(&["m1", "m2"]),
            false,
            false,
            Some("m2".into()),
            &BTreeMap::new(),
            &mut rng(3),
        );
        assert_eq!(roles.chairperson, "m2");
    }

    #[test]
    fn chairperson_is_highest_rated_responder() {
        let ratings: BTreeMap<String, i64> =
            [("m1".to_owned(), 1480), ("m2".to_owned(), 1710), ("m3".to_owned(), 1600)].into();
        let roles = assign_roles(
            &models(&["m1", "m2", "m3"]),
            false,
            false,
            None,
            &ratings,
            &mut rng(4),
        );
        assert_eq!(roles.chairperson, "m2");
    }

    #[test]
    fn chairperson_tie_breaks_by_model_id() {
        let roles = assign_roles(
            &models(&["m2", "m1", "m3"]),
            false,
            false,
            None,
            &BTreeMap::new(),
            &mut rng(5),
        );
        assert_eq!(roles.chairperson, "m1");
    }

    #[test]
    fn seeded_assignment_is_reproducible() {
        let all = models(&["m1", "m2", "m3", "m4"]);
        let a = assign_roles(&all, true, true, None, &BTreeMap::new(), &mut rng(9));
        let b = assign_roles(&all, true, true, None, &BTreeMap::new(), &mut rng(9));
        assert_eq!(a, b);
    }
}
