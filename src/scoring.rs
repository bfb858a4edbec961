//! Keyword-overlap relevance scoring.

use crate::normalize::normalize_text;
use std::collections::HashSet;

/// How many candidates survive ranking.
pub const TOP_K: usize = 3;

/// A candidate paired with its overlap score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scored<'a, T> {
    pub item: &'a T,
    pub score: usize,
}

/// Count query tokens, with repetition, that occur anywhere in the candidate.
///
/// Membership only: a token repeated in the candidate counts once per
/// occurrence in the query, not per occurrence in the candidate.
#[must_use]
pub fn score(query: &[String], candidate: Option<&str>) -> usize {
    let tokens = normalize_text(candidate);
    if tokens.is_empty() {
        return 0;
    }
    let present: HashSet<&str> = tokens.iter().map(String::as_str).collect();
    query
        .iter()
        .filter(|word| present.contains(word.as_str()))
        .count()
}

/// Score every candidate with non-empty text and keep the best [`TOP_K`].
///
/// Candidates whose text is empty are left out entirely. The sort is
/// stable, so equal scores keep their original relative order.
pub fn rank<'a, T, F>(query: &[String], candidates: &'a [T], text_of: F) -> Vec<Scored<'a, T>>
where
    F: Fn(&T) -> &str,
{
    let mut scored: Vec<Scored<'a, T>> = candidates
        .iter()
        .filter(|item| !text_of(*item).is_empty())
        .map(|item| Scored {
            item,
            score: score(query, Some(text_of(item))),
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(TOP_K);
    scored
}
