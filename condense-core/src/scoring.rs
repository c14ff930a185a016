//! File importance scoring and intent relevance.

use crate::document::{FileRecord, SemanticEntity};
use crate::CondenseError;
use globset::{Glob, GlobMatcher};
use std::collections::BTreeMap;

/// Bytes of content inspected for intent relevance
const RELEVANCE_SAMPLE_BYTES: usize = 4096;
/// Floor applied to must-include project files
const CRITICAL_FLOOR: f64 = 0.9;

const ENTRY_POINT_STEMS: &[&str] = &["main", "index", "app", "server", "__main__", "cli", "lib"];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "how", "what", "are", "was",
    "add", "use", "all", "any", "can", "not", "but", "our", "you", "its", "new", "fix",
];

/// Lowercased alphanumeric terms of at least three characters
pub fn split_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

/// Scores files for ranking: filename heuristics, entity weight, centrality
/// and optional intent relevance.
pub struct ImportanceScorer {
    intent_terms: Vec<String>,
    boosts: Vec<(GlobMatcher, f64)>,
}

impl ImportanceScorer {
    pub fn new(intent: Option<&str>) -> Self {
        Self {
            intent_terms: intent.map(split_terms).unwrap_or_default(),
            boosts: Vec::new(),
        }
    }

    pub fn with_boosts(mut self, boosts: &BTreeMap<String, f64>) -> crate::Result<Self> {
        self.boosts = boosts
            .iter()
            .map(|(pattern, boost)| {
                Glob::new(pattern)
                    .map(|g| (g.compile_matcher(), *boost))
                    .map_err(|e| CondenseError::GlobPattern(format!("{}: {}", pattern, e)))
            })
            .collect::<crate::Result<_>>()?;
        Ok(self)
    }

    pub fn has_intent(&self) -> bool {
        !self.intent_terms.is_empty()
    }

    /// Importance in [0,1] and, when an intent is configured, its relevance.
    pub fn score(&self, record: &FileRecord, content: &str) -> (f64, Option<f64>) {
        let name = record.file_name().to_lowercase();
        let path = record.rel_path.to_lowercase();
        let stem = name.split('.').next().unwrap_or(&name);

        let mut score = 0.1;
        if ENTRY_POINT_STEMS.contains(&stem) {
            score += 0.3;
        }
        if is_test_path(&path) {
            score -= 0.2;
        }

        if let Some(semantic) = &record.semantic {
            let entity_weight: f64 = semantic.entities.iter().map(|e| e.importance).sum();
            score += (entity_weight / 10.0).min(0.5);
            if semantic.metrics.complexity_score > 0.1 {
                score += 0.2;
            }
            if semantic.imports.len() > 5 {
                score += 0.1;
            }
        }

        let relevance = self.relevance(&path, content, record.entities());
        if let Some((ratio, entity_hit)) = relevance {
            score += 0.3 * ratio;
            if entity_hit {
                score += 0.1;
            }
        }

        if record.is_critical() {
            score = score.max(CRITICAL_FLOOR);
        }

        (score.clamp(0.0, 1.0), relevance.map(|(ratio, _)| ratio))
    }

    /// Sum of configured boosts matching the path (not clamped)
    pub fn boost(&self, rel_path: &str) -> f64 {
        self.boosts
            .iter()
            .filter(|(matcher, _)| matcher.is_match(rel_path))
            .map(|(_, boost)| boost)
            .sum()
    }

    fn relevance(
        &self,
        path: &str,
        content: &str,
        entities: &[SemanticEntity],
    ) -> Option<(f64, bool)> {
        if self.intent_terms.is_empty() {
            return None;
        }
        let sample = truncate_at_char_boundary(content, RELEVANCE_SAMPLE_BYTES).to_lowercase();
        let hits = self
            .intent_terms
            .iter()
            .filter(|term| path.contains(term.as_str()) || sample.contains(term.as_str()))
            .count();
        let ratio = hits as f64 / self.intent_terms.len() as f64;

        let entity_hit = entities.iter().any(|e| {
            let name = e.name.to_lowercase();
            self.intent_terms.iter().any(|t| name.contains(t.as_str()))
        });
        Some((ratio, entity_hit))
    }
}

fn is_test_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
        || path.starts_with("tests/")
        || path.contains("/tests/")
        || path.contains("/__tests__/")
}

/// Longest prefix of `s` that is at most `max` bytes
pub(crate) fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
