use rand::seq::SliceRandom;
use rand::Rng;
use regex::RegexBuilder;
use std::collections::HashSet;

use crate::services::references::ReferenceArticle;

const MIN_KEYWORD_CHARS: usize = 3;
const TITLE_MATCH_BONUS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    Keyword,
    Random,
}

impl SelectionPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Some(SelectionPolicy::Keyword),
            "random" => Some(SelectionPolicy::Random),
            _ => None,
        }
    }

    pub fn select(
        &self,
        user_input: &str,
        corpus: &[ReferenceArticle],
        limit: usize,
    ) -> Vec<ReferenceArticle> {
        match self {
            SelectionPolicy::Keyword => pick_relevant(user_input, corpus, limit),
            SelectionPolicy::Random => pick_random(corpus, limit, &mut rand::thread_rng()),
        }
    }
}

fn keywords(user_input: &str) -> Vec<String> {
    user_input
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() >= MIN_KEYWORD_CHARS)
        .collect()
}

fn occurrences(keyword: &str, text: &str) -> usize {
    // Escaped, so the pattern always compiles.
    RegexBuilder::new(&regex::escape(keyword))
        .case_insensitive(true)
        .build()
        .map(|pattern| pattern.find_iter(text).count())
        .unwrap_or(0)
}

/// Keyword relevance score of one article.
pub fn score(keywords: &[String], article: &ReferenceArticle) -> usize {
    let body: usize = keywords
        .iter()
        .map(|keyword| occurrences(keyword, &article.content))
        .sum();

    let title = article.title.to_lowercase();
    let distinct: HashSet<&str> = keywords.iter().map(String::as_str).collect();
    let title_hits = distinct
        .into_iter()
        .filter(|keyword| title.contains(keyword))
        .count();

    body + title_hits * TITLE_MATCH_BONUS
}

/// Highest-scoring articles first, ties in corpus order. Falls back to the
/// first `limit` articles when nothing matches.
pub fn pick_relevant(
    user_input: &str,
    corpus: &[ReferenceArticle],
    limit: usize,
) -> Vec<ReferenceArticle> {
    let keywords = keywords(user_input);
    let mut scored: Vec<(usize, &ReferenceArticle)> = corpus
        .iter()
        .map(|article| (score(&keywords, article), article))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    if scored.first().map_or(true, |(top, _)| *top == 0) {
        return corpus.iter().take(limit).cloned().collect();
    }

    scored
        .into_iter()
        .take(limit)
        .map(|(_, article)| article.clone())
        .collect()
}

/// Fisher-Yates over a copy of the corpus.
pub fn pick_random<R: Rng + ?Sized>(
    corpus: &[ReferenceArticle],
    limit: usize,
    rng: &mut R,
) -> Vec<ReferenceArticle> {
    let mut shuffled = corpus.to_vec();
    shuffled.shuffle(rng);
    shuffled.truncate(limit);
    shuffled
}
