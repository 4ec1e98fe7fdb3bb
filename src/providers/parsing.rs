// ABOUTME: Ranking answer parser for the voting prompt
// ABOUTME: Extracts labels in order of appearance with a word-boundary check and input-order fallback
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

/// Extract a ranked label list from a model's voting answer.
///
/// Labels are matched in order of first appearance in `answer`, requiring
/// word boundaries so "Response A" does not match inside "Response AB".
/// Valid labels missing from the answer are appended in their input order,
/// so the result is always a permutation of `valid_labels`.
#[must_use]
pub fn parse_ranking(answer: &str, valid_labels: &[String]) -> Vec<String> {
    let bytes = answer.as_bytes();
    let mut positions: Vec<(usize, &String)> = Vec::new();

    for label in valid_labels {
        if let Some(pos) = find_with_boundaries(bytes, label.as_bytes()) {
            positions.push((pos, label));
        }
    }

    positions.sort_by_key(|(pos, _)| *pos);

    let mut result: Vec<String> = positions.into_iter().map(|(_, l)| l.clone()).collect();
    for label in valid_labels {
        if !result.contains(label) {
            result.push(label.clone());
        }
    }
    result
}

fn find_with_boundaries(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    for start in 0..=haystack.len() - needle.len() {
        if &haystack[start..start + needle.len()] != needle {
            continue;
        }
        let boundary_before = start == 0 || !haystack[start - 1].is_ascii_alphanumeric();
        let end = start + needle.len();
        let boundary_after = end == haystack.len() || !haystack[end].is_ascii_alphanumeric();
        if boundary_before && boundary_after {
            return Some(start);
        }
    }
    None
}
