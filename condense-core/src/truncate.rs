//! Fitting file content into a token sub-budget.
//!
//! Lock files are always replaced by a statistical summary. Other files are
//! returned unchanged when they fit, otherwise reduced with the configured
//! strategy. Every omitted span is replaced by an explicit marker carrying
//! its 1-based line range.

use crate::config::{TruncationConfig, TruncationStrategy};
use crate::document::{EntityKind, FileRecord, SemanticData, SemanticEntity};
use crate::report::thousands;
use crate::summarize::Summarizer;
use crate::tokens::Tokenizer;
use std::collections::BTreeSet;
use tracing::debug;

/// Head/tail cap for basic truncation, in lines
const BASIC_MAX_LINES: usize = 100;
/// Imports kept by the business-logic strategy
const MAX_IMPORT_LINES: usize = 20;
const BUSINESS_CONTEXT: usize = 2;
const UTILITY_CONTEXT: usize = 1;
const MIDDLE_HEAD_RATIO: f64 = 0.3;
const MIDDLE_TAIL_RATIO: f64 = 0.2;
/// Names listed per category in a middle summary
const SUMMARY_NAMES: usize = 5;

/// How the content of a file was rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendering {
    Full,
    LockSummary,
    Truncated(TruncationStrategy),
}

impl Rendering {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::LockSummary => "lock_summary",
            Self::Truncated(strategy) => strategy.as_str(),
        }
    }
}

/// Content reduced to fit a sub-budget
#[derive(Debug, Clone)]
pub struct Fitted {
    pub content: String,
    pub tokens: usize,
    pub rendering: Rendering,
    pub omitted_lines: usize,
    pub omitted_bytes: usize,
}

impl Fitted {
    pub fn is_truncated(&self) -> bool {
        self.rendering != Rendering::Full
    }
}

pub fn omission_marker(first: usize, last: usize) -> String {
    format!("... [Lines {}-{} omitted] ...", first, last)
}

/// Replacement text for a dependency lock file
pub fn lockfile_summary(name: &str, content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let (label, count) = match name {
        "package-lock.json" => ("NPM packages", content.matches("\"resolved\":").count()),
        "yarn.lock" => (
            "Yarn packages",
            lines
                .iter()
                .filter(|l| !l.is_empty() && !l.starts_with(' ') && !l.starts_with('#'))
                .count(),
        ),
        "poetry.lock" => ("Poetry packages", content.matches("[[package]]").count()),
        "Cargo.lock" => ("Rust crates", content.matches("[[package]]").count()),
        "go.sum" => (
            "Go modules",
            lines
                .iter()
                .filter_map(|l| l.split_whitespace().next())
                .collect::<BTreeSet<_>>()
                .len(),
        ),
        _ => (
            "Dependencies",
            lines
                .iter()
                .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
                .count(),
        ),
    };
    format!(
        "[LOCK FILE SUMMARY: {}]\n{}: ~{}\nFile size: {} bytes\nLines: {}\n[Full content omitted - lock file with dependency versions]",
        name,
        label,
        thousands(count),
        thousands(content.len()),
        thousands(lines.len())
    )
}

/// Which lines of a file are kept
struct Selection<'c> {
    lines: Vec<&'c str>,
    keep: Vec<bool>,
}

struct Rendered {
    text: String,
    omitted_lines: usize,
    omitted_bytes: usize,
}

impl<'c> Selection<'c> {
    fn new(content: &'c str) -> Self {
        let lines: Vec<&str> = content.lines().collect();
        let keep = vec![false; lines.len()];
        Self { lines, keep }
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    fn nothing_kept(&self) -> bool {
        !self.keep.iter().any(|k| *k)
    }

    /// Keep `start..end` (0-based, exclusive); returns the newly kept lines
    fn add(&mut self, start: usize, end: usize) -> Vec<usize> {
        let end = end.min(self.lines.len());
        let mut added = Vec::new();
        for i in start..end {
            if !self.keep[i] {
                self.keep[i] = true;
                added.push(i);
            }
        }
        added
    }

    fn remove(&mut self, lines: &[usize]) {
        for &i in lines {
            self.keep[i] = false;
        }
    }

    fn text_of(&self, lines: &[usize]) -> String {
        lines
            .iter()
            .map(|&i| self.lines[i])
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render(&self) -> Rendered {
        let mut out: Vec<String> = Vec::new();
        let mut omitted_lines = 0;
        let mut omitted_bytes = 0;
        let mut gap_start: Option<usize> = None;

        for (i, line) in self.lines.iter().enumerate() {
            if self.keep[i] {
                if let Some(start) = gap_start.take() {
                    out.push(omission_marker(start + 1, i));
                }
                out.push((*line).to_string());
            } else {
                gap_start.get_or_insert(i);
                omitted_lines += 1;
                omitted_bytes += line.len() + 1;
            }
        }
        if let Some(start) = gap_start {
            out.push(omission_marker(start + 1, self.lines.len()));
        }

        Rendered {
            text: out.join("\n"),
            omitted_lines,
            omitted_bytes,
        }
    }
}

/// Applies the configured truncation strategy within a token sub-budget.
pub struct ContentTruncator<'a> {
    config: &'a TruncationConfig,
    tokenizer: &'a Tokenizer,
    summarizer: Option<&'a dyn Summarizer>,
}

impl<'a> ContentTruncator<'a> {
    pub fn new(config: &'a TruncationConfig, tokenizer: &'a Tokenizer) -> Self {
        Self {
            config,
            tokenizer,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Option<&'a dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Fit `content` into `budget` tokens. `None` when not even the minimal
    /// rendering fits.
    pub fn fit(&self, record: &FileRecord, content: &str, budget: usize) -> Option<Fitted> {
        if record.is_summarizable() {
            let summary = lockfile_summary(record.file_name(), content);
            let tokens = self.tokenizer.count(&summary);
            if tokens > budget {
                return None;
            }
            return Some(Fitted {
                content: summary,
                tokens,
                rendering: Rendering::LockSummary,
                omitted_lines: content.lines().count(),
                omitted_bytes: content.len(),
            });
        }

        let original = record
            .token_count
            .unwrap_or_else(|| self.tokenizer.count(content));
        if original <= budget {
            return Some(Fitted {
                content: content.to_string(),
                tokens: original,
                rendering: Rendering::Full,
                omitted_lines: 0,
                omitted_bytes: 0,
            });
        }

        if let Some(fitted) = self.fit_with_summary(record, content, budget, original) {
            return Some(fitted);
        }
        self.truncate(record.semantic.as_ref(), content, budget)
    }

    /// Prepend a collaborator summary when the file is large enough and the
    /// summary leaves room for the truncated content.
    fn fit_with_summary(
        &self,
        record: &FileRecord,
        content: &str,
        budget: usize,
        original: usize,
    ) -> Option<Fitted> {
        let summarizer = self.summarizer?;
        if original < self.config.summarize_min_tokens {
            return None;
        }
        let summary = summarizer.summarize(content, budget / 5)?;
        let block = format!("[SUMMARY]\n{}\n[/SUMMARY]\n", summary.trim());
        let block_tokens = self.tokenizer.count(&block);
        if block_tokens * 2 > budget {
            debug!(path = %record.rel_path, block_tokens, "summary too large for budget, dropped");
            return None;
        }
        let mut fitted = self.truncate(record.semantic.as_ref(), content, budget - block_tokens)?;
        fitted.content = format!("{}{}", block, fitted.content);
        fitted.tokens = self.tokenizer.count(&fitted.content);
        if fitted.tokens > budget {
            return None;
        }
        Some(fitted)
    }

    fn truncate(&self, semantic: Option<&SemanticData>, content: &str, budget: usize) -> Option<Fitted> {
        let with_entities = semantic.filter(|s| !s.entities.is_empty());
        match (self.config.strategy, with_entities) {
            // The header block is the minimal rendering; no fallback below it
            (TruncationStrategy::Semantic, Some(semantic)) => self.semantic(semantic, content, budget),
            (TruncationStrategy::BusinessLogic, Some(semantic)) => self
                .business_logic(semantic, content, budget)
                .or_else(|| self.basic(content, budget)),
            (TruncationStrategy::MiddleSummarize, _) => self
                .middle_summarize(semantic, content, budget)
                .or_else(|| self.basic(content, budget)),
            _ => self.basic(content, budget),
        }
    }

    fn fitted(&self, rendered: Rendered, strategy: TruncationStrategy, tokens: usize) -> Fitted {
        Fitted {
            content: rendered.text,
            tokens,
            rendering: Rendering::Truncated(strategy),
            omitted_lines: rendered.omitted_lines,
            omitted_bytes: rendered.omitted_bytes,
        }
    }

    /// Header block plus context windows around entities by importance.
    fn semantic(&self, semantic: &SemanticData, content: &str, budget: usize) -> Option<Fitted> {
        let mut selection = Selection::new(content);
        let n = selection.len();
        selection.add(0, self.config.header_lines.min(n));
        let header = selection.render();
        let header_tokens = self.tokenizer.count(&header.text);
        if header_tokens > budget {
            return None;
        }

        let ctx = self.config.context_lines;
        let windows: Vec<(usize, usize)> = by_importance(&semantic.entities)
            .into_iter()
            .map(|e| window(e, ctx, n))
            .collect();
        let added = self.fill(&mut selection, &windows, header_tokens, budget);
        let (rendered, tokens) = self.verify(&mut selection, added, budget)?;
        Some(self.fitted(rendered, TruncationStrategy::Semantic, tokens))
    }

    /// Imports first, then business entities, then utilities. Test-like
    /// entities are never kept.
    fn business_logic(&self, semantic: &SemanticData, content: &str, budget: usize) -> Option<Fitted> {
        let mut selection = Selection::new(content);
        let n = selection.len();
        for &line in semantic.import_lines.iter().take(MAX_IMPORT_LINES) {
            if line >= 1 {
                selection.add(line - 1, line);
            }
        }

        let mut business = Vec::new();
        let mut utilities = Vec::new();
        for entity in by_importance(&semantic.entities) {
            let name = entity.name.to_lowercase();
            if matches_any(&name, &self.config.test_keywords) {
                continue;
            }
            if matches_any(&name, &self.config.utility_keywords) {
                utilities.push(window(entity, UTILITY_CONTEXT, n));
            } else {
                business.push(window(entity, BUSINESS_CONTEXT, n));
            }
        }

        let base = selection.render();
        let base_tokens = self.tokenizer.count(&base.text);
        if base_tokens > budget {
            return None;
        }
        let mut windows = business;
        windows.extend(utilities);
        let added = self.fill(&mut selection, &windows, base_tokens, budget);
        if selection.nothing_kept() {
            return None;
        }
        let (rendered, tokens) = self.verify(&mut selection, added, budget)?;
        Some(self.fitted(rendered, TruncationStrategy::BusinessLogic, tokens))
    }

    /// Add windows in order while the running estimate stays within budget.
    /// Returns the lines added per accepted window, in order.
    fn fill(
        &self,
        selection: &mut Selection<'_>,
        windows: &[(usize, usize)],
        start_tokens: usize,
        budget: usize,
    ) -> Vec<Vec<usize>> {
        let marker_tokens = self.tokenizer.count(&omission_marker(selection.len(), selection.len()));
        let mut used = start_tokens;
        let mut accepted = Vec::new();
        for &(start, end) in windows {
            let added = selection.add(start, end);
            if added.is_empty() {
                continue;
            }
            let cost = self.tokenizer.count(&selection.text_of(&added)) + 1 + marker_tokens;
            if used + cost <= budget {
                used += cost;
                accepted.push(added);
            } else {
                selection.remove(&added);
            }
        }
        accepted
    }

    /// Render and drop the most recently added windows until the exact
    /// count fits.
    fn verify(
        &self,
        selection: &mut Selection<'_>,
        mut added: Vec<Vec<usize>>,
        budget: usize,
    ) -> Option<(Rendered, usize)> {
        loop {
            let rendered = selection.render();
            let tokens = self.tokenizer.count(&rendered.text);
            if tokens <= budget {
                return Some((rendered, tokens));
            }
            let last = added.pop()?;
            selection.remove(&last);
        }
    }

    /// Head and tail of at most a third of the file each, shrinking until
    /// it fits; a single long line is cut at a character boundary instead.
    fn basic(&self, content: &str, budget: usize) -> Option<Fitted> {
        let mut selection = Selection::new(content);
        let n = selection.len();
        let mut keep = (n / 3).min(BASIC_MAX_LINES);
        if keep == 0 && n > 1 {
            keep = 1;
        }

        while keep > 0 {
            selection.keep.iter_mut().for_each(|k| *k = false);
            selection.add(0, keep);
            selection.add(n.saturating_sub(keep), n);
            let rendered = selection.render();
            let tokens = self.tokenizer.count(&rendered.text);
            if tokens <= budget && rendered.omitted_lines > 0 {
                return Some(self.fitted(rendered, TruncationStrategy::Basic, tokens));
            }
            keep /= 2;
        }
        self.cut_prefix(content, budget)
    }

    fn cut_prefix(&self, content: &str, budget: usize) -> Option<Fitted> {
        let chars: Vec<(usize, char)> = content.char_indices().collect();
        let render = |kept: usize| {
            let end = chars.get(kept).map(|(i, _)| *i).unwrap_or(content.len());
            let omitted = content.len() - end;
            let marker = format!("... [{} bytes omitted] ...", thousands(omitted));
            let text = if end == 0 {
                marker
            } else {
                format!("{}\n{}", &content[..end], marker)
            };
            (text, omitted)
        };

        // The bare marker is the smallest rendering
        let empty = render(0);
        if self.tokenizer.count(&empty.0) > budget {
            return None;
        }
        let mut best = empty;
        let (mut lo, mut hi) = (0usize, chars.len());
        while lo < hi {
            let mid = (lo + hi).div_ceil(2);
            let candidate = render(mid);
            if self.tokenizer.count(&candidate.0) <= budget {
                best = candidate;
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        let (text, omitted_bytes) = best;
        let tokens = self.tokenizer.count(&text);
        Some(Fitted {
            content: text,
            tokens,
            rendering: Rendering::Truncated(TruncationStrategy::Basic),
            omitted_lines: 0,
            omitted_bytes,
        })
    }

    /// Keep 30% head and 20% tail verbatim with a structural summary of the
    /// middle in between.
    fn middle_summarize(
        &self,
        semantic: Option<&SemanticData>,
        content: &str,
        budget: usize,
    ) -> Option<Fitted> {
        let lines: Vec<&str> = content.lines().collect();
        let n = lines.len();
        let mut head = (n as f64 * MIDDLE_HEAD_RATIO) as usize;
        let mut tail = (n as f64 * MIDDLE_TAIL_RATIO) as usize;

        while head > 0 {
            let middle = &lines[head..n - tail];
            if middle.is_empty() {
                return None;
            }
            let summary = middle_summary(semantic, middle, head + 1, n - tail);
            let mut parts: Vec<&str> = lines[..head].to_vec();
            let marker = format!("... [Lines {}-{} summarized] ...", head + 1, n - tail);
            parts.push(&marker);
            parts.push(&summary);
            parts.push("... [Continuing to end] ...");
            parts.extend_from_slice(&lines[n - tail..]);
            let text = parts.join("\n");
            let tokens = self.tokenizer.count(&text);
            if tokens <= budget {
                let omitted_bytes = middle.iter().map(|l| l.len() + 1).sum();
                return Some(Fitted {
                    content: text,
                    tokens,
                    rendering: Rendering::Truncated(TruncationStrategy::MiddleSummarize),
                    omitted_lines: middle.len(),
                    omitted_bytes,
                });
            }
            head /= 2;
            tail /= 2;
        }
        None
    }
}

/// Structural summary of an omitted middle section
fn middle_summary(
    semantic: Option<&SemanticData>,
    middle: &[&str],
    first_line: usize,
    last_line: usize,
) -> String {
    let mut classes = Vec::new();
    let mut functions = Vec::new();
    if let Some(semantic) = semantic {
        for entity in &semantic.entities {
            if entity.start_line < first_line || entity.start_line > last_line {
                continue;
            }
            match entity.kind {
                EntityKind::Class | EntityKind::Interface => classes.push(entity.name.as_str()),
                EntityKind::Function | EntityKind::Method => functions.push(entity.name.as_str()),
                EntityKind::Type | EntityKind::Section => {}
            }
        }
    }

    let mut out = vec!["Middle section contains:".to_string()];
    for (label, names) in [("classes", &classes), ("functions", &functions)] {
        if names.is_empty() {
            continue;
        }
        let shown: Vec<&str> = names.iter().take(SUMMARY_NAMES).copied().collect();
        out.push(format!("- {} {}: {}", names.len(), label, shown.join(", ")));
        if names.len() > SUMMARY_NAMES {
            out.push(format!("  (and {} more)", names.len() - SUMMARY_NAMES));
        }
    }
    let lower: Vec<String> = middle.iter().map(|l| l.to_lowercase()).collect();
    if lower.iter().any(|l| l.contains("test") || l.contains("spec")) {
        out.push("- Contains test cases".to_string());
    }
    if lower
        .iter()
        .any(|l| l.contains("try") || l.contains("catch") || l.contains("except"))
    {
        out.push("- Includes error handling".to_string());
    }
    out.join("\n")
}

fn by_importance(entities: &[SemanticEntity]) -> Vec<&SemanticEntity> {
    let mut sorted: Vec<&SemanticEntity> = entities.iter().collect();
    sorted.sort_by(|a, b| {
        b.importance
            .total_cmp(&a.importance)
            .then(a.start_line.cmp(&b.start_line))
    });
    sorted
}

/// 0-based half-open line window around an entity
fn window(entity: &SemanticEntity, ctx: usize, n: usize) -> (usize, usize) {
    let start = entity.start_line.saturating_sub(1).saturating_sub(ctx);
    let end = (entity.end_line + ctx).min(n);
    (start, end)
}

fn matches_any(name: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| name.contains(&k.to_lowercase()))
}
