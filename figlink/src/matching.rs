//! Matching textual references ("Figure 2.1", "see page 3") to extracted
//! content records.
//!
//! Each token is scored against every record with three rules:
//!
//! | rule        | fires when                                                  | default score |
//! |-------------|-------------------------------------------------------------|---------------|
//! | `page`      | the token contains `page N` or `pageN` for the record page N | 100           |
//! | `figure`    | the token names a figure keyword and its first integer is the record page | 80 |
//! | `substring` | the normalized token and the record id or stored name contain one another | 60 |
//!
//! A token takes the highest-scoring record; ties go to the record that comes
//! first in the input, and scanning stops at the first record reaching the top
//! score. With the default scores this is exactly the first-hit cascade
//! page → figure → substring. Assignment is greedy per token, not a global
//! optimum, and several tokens may claim the same record.
//!
//! The page rule is a substring test, so "page 12" also names page 1. Setting
//! `whole_page_numbers` restricts it to complete numbers.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MatchConfig;
use crate::crop::ContentRecord;

/// A text fragment believed to refer to visual content, with the question or
/// paragraph it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceToken {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl ReferenceToken {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            owner: None,
        }
    }

    pub fn with_owner(text: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            owner: Some(owner.into()),
        }
    }
}

/// Which rule produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    Page,
    Figure,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMatch {
    pub token: ReferenceToken,
    pub content_id: String,
    pub rule: MatchRule,
    pub score: u32,
}

/// Outcome of matching one document's tokens against its records.
///
/// Every distinct input token appears exactly once, either in `matches` or in
/// `unmatched_tokens`; every distinct content id is either claimed by some
/// match or listed in `unmatched_content`. All lists follow input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matches: Vec<TokenMatch>,
    pub unmatched_tokens: Vec<ReferenceToken>,
    pub unmatched_content: Vec<String>,
}

impl MatchResult {
    /// The content id a token was matched to.
    pub fn content_for(&self, token: &ReferenceToken) -> Option<&str> {
        self.matches
            .iter()
            .find(|m| &m.token == token)
            .map(|m| m.content_id.as_str())
    }

    /// Token to content id mapping.
    pub fn mapping(&self) -> BTreeMap<&ReferenceToken, &str> {
        self.matches
            .iter()
            .map(|m| (&m.token, m.content_id.as_str()))
            .collect()
    }

    /// Content ids claimed by at least one token, in first-claim order.
    pub fn matched_content(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.matches
            .iter()
            .map(|m| m.content_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Content ids used by each owner, deduplicated, in match order.
    /// Tokens without an owner are left out.
    pub fn links_by_owner(&self) -> BTreeMap<String, Vec<String>> {
        let mut links: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for m in &self.matches {
            if let Some(owner) = &m.token.owner {
                let ids = links.entry(owner.clone()).or_default();
                if !ids.contains(&m.content_id) {
                    ids.push(m.content_id.clone());
                }
            }
        }
        links
    }
}

/// What a token says, parsed once per token.
struct ParsedReference {
    normalized: String,
    page_numbers: Vec<u32>,
    figure_number: Option<u32>,
}

impl ParsedReference {
    fn parse(text: &str, figure_keywords: &[String]) -> Self {
        let normalized = text.trim().to_lowercase();
        let names_figure = figure_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && normalized.contains(&keyword.to_lowercase()));

        Self {
            page_numbers: page_numbers(&normalized),
            figure_number: if names_figure {
                first_integer(&normalized)
            } else {
                None
            },
            normalized,
        }
    }
}

/// Numbers following `page` or `page ` in lower-cased text.
fn page_numbers(normalized: &str) -> Vec<u32> {
    normalized
        .match_indices("page")
        .filter_map(|(index, keyword)| {
            let rest = &normalized[index + keyword.len()..];
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            leading_integer(rest)
        })
        .collect()
}

/// The first run of ASCII digits anywhere in `text`.
fn first_integer(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    leading_integer(&text[start..])
}

fn leading_integer(text: &str) -> Option<u32> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

/// Assigns each reference token at most one content record.
#[derive(Debug, Clone)]
pub struct ReferenceMatcher {
    config: MatchConfig,
}

impl ReferenceMatcher {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Match every token against the full set of a document's records.
    pub fn match_references<'a>(
        &self,
        tokens: &[ReferenceToken],
        content: impl IntoIterator<Item = &'a ContentRecord>,
    ) -> MatchResult {
        let content: Vec<&ContentRecord> = content.into_iter().collect();
        let mut result = MatchResult::default();
        let mut seen_tokens = HashSet::new();

        for token in tokens {
            if !seen_tokens.insert(token) {
                continue;
            }
            match self.best_match(token, &content) {
                Some(token_match) => {
                    debug!(
                        token = %token.text,
                        content_id = %token_match.content_id,
                        rule = ?token_match.rule,
                        score = token_match.score,
                        "Matched reference"
                    );
                    result.matches.push(token_match);
                }
                None => {
                    debug!(token = %token.text, "No content matches reference");
                    result.unmatched_tokens.push(token.clone());
                }
            }
        }

        let claimed: HashSet<&str> = result
            .matches
            .iter()
            .map(|m| m.content_id.as_str())
            .collect();
        let mut seen_content = HashSet::new();
        result.unmatched_content = content
            .iter()
            .map(|record| record.id.as_str())
            .filter(|id| !claimed.contains(id) && seen_content.insert(*id))
            .map(String::from)
            .collect();

        info!(
            tokens = seen_tokens.len(),
            matched = result.matches.len(),
            unmatched_tokens = result.unmatched_tokens.len(),
            unmatched_content = result.unmatched_content.len(),
            "Reference matching complete"
        );
        result
    }

    fn best_match(&self, token: &ReferenceToken, content: &[&ContentRecord]) -> Option<TokenMatch> {
        let reference = ParsedReference::parse(&token.text, &self.config.figure_keywords);
        let top_score = self
            .config
            .page_score
            .max(self.config.figure_score)
            .max(self.config.substring_score);

        let mut best: Option<(&ContentRecord, MatchRule, u32)> = None;
        for &record in content {
            let Some((rule, score)) = self.score(&reference, record) else {
                continue;
            };
            if best.is_none_or(|(_, _, best_score)| score > best_score) {
                best = Some((record, rule, score));
                if score >= top_score {
                    break;
                }
            }
        }

        best.map(|(record, rule, score)| TokenMatch {
            token: token.clone(),
            content_id: record.id.clone(),
            rule,
            score,
        })
    }

    fn names_page(&self, reference: &ParsedReference, page: u32) -> bool {
        if self.config.whole_page_numbers {
            reference.page_numbers.contains(&page)
        } else {
            reference.normalized.contains(&format!("page {page}"))
                || reference.normalized.contains(&format!("page{page}"))
        }
    }

    /// Highest-scoring rule that fires for this record. A score of zero
    /// disables its rule.
    fn score(&self, reference: &ParsedReference, record: &ContentRecord) -> Option<(MatchRule, u32)> {
        let mut fired = Vec::with_capacity(3);

        if self.names_page(reference, record.page) {
            fired.push((MatchRule::Page, self.config.page_score));
        }
        if reference.figure_number == Some(record.page) {
            fired.push((MatchRule::Figure, self.config.figure_score));
        }
        if substring_match(&reference.normalized, record) {
            fired.push((MatchRule::Substring, self.config.substring_score));
        }

        fired
            .into_iter()
            .filter(|(_, score)| *score > 0)
            .fold(None, |best, (rule, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((rule, score)),
            })
    }
}

fn substring_match(normalized: &str, record: &ContentRecord) -> bool {
    if normalized.is_empty() {
        return false;
    }
    [record.id.to_lowercase(), record.name.to_lowercase()]
        .iter()
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| candidate.contains(normalized) || normalized.contains(candidate.as_str()))
}
