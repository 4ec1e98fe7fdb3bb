// ABOUTME: Prompt construction for council participants
// ABOUTME: Adds the devil's advocate role framing and anonymized debate context
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::fmt::Write as _;

use crate::models::SessionResponse;

/// Build the prompt one participant receives for a response round.
///
/// In debate rounds after the first, the prompt carries the anonymized
/// content of all prior rounds (the participant's own included, unmarked)
/// so models can rebut without learning authorship.
#[must_use]
pub fn build_response_prompt(
    question: &str,
    is_devil_advocate: bool,
    prior_rounds: &[SessionResponse],
) -> String {
    let mut prompt = String::new();

    if is_devil_advocate {
        prompt.push_str(
            "[ROLE: Devil's Advocate - You must argue against the consensus view]\n\n",
        );
    }

    if prior_rounds.is_empty() {
        prompt.push_str(question);
        return prompt;
    }

    let _ = write!(
        prompt,
        "Question: {question}\n\n\
         This is a multi-round debate. The anonymized responses from earlier \
         rounds are below. Address the strongest opposing arguments and refine \
         or defend your position.\n"
    );

    let mut current_round = 0;
    for response in prior_rounds {
        if response.round != current_round {
            current_round = response.round;
            let _ = write!(prompt, "\n== Round {current_round} ==\n");
        }
        let _ = write!(
            prompt,
            "\n--- {} ---\n{}\n",
            response.anonymous_label, response.content
        );
    }

    prompt.push_str("\nYour response for this round:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn response(label: &str, round: u32, content: &str) -> SessionResponse {
        SessionResponse {
            id: 0,
            session_id: Uuid::nil(),
            model_id: "hidden".into(),
            round,
            content: content.into(),
            anonymous_label: label.into(),
            response_time_ms: 0,
            token_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn first_round_is_just_the_question() {
        assert_eq!(build_response_prompt("Q1", false, &[]), "Q1");
    }

    #[test]
    fn devil_advocate_framing_is_prefixed() {
        let prompt = build_response_prompt("Q1", true, &[]);
        assert!(prompt.starts_with("[ROLE: Devil's Advocate"));
        assert!(prompt.ends_with("Q1"));
    }

    #[test]
    fn debate_prompt_carries_prior_rounds_without_model_ids() {
        let prior = vec![
            response("Response A", 1, "first take"),
            response("Response B", 1, "second take"),
        ];
        let prompt = build_response_prompt("Q1", false, &prior);
        assert!(prompt.contains("== Round 1 =="));
        assert!(prompt.contains("--- Response A ---"));
        assert!(prompt.contains("second take"));
        assert!(!prompt.contains("hidden"));
    }
}
