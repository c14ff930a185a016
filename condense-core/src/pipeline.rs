//! Run orchestration: Scanning -> Ranking -> Assembling -> Finalizing -> Done.
//!
//! Scanning is parallel; everything after it is sequential because the order
//! of budget allocations fixes both the document order and the manifest
//! offsets.

use crate::analysis::CodebaseAnalysis;
use crate::annotations::AnnotationCollector;
use crate::cache::CacheHandle;
use crate::config::ProcessingProfile;
use crate::document::FileRecord;
use crate::git::{GitCli, GitHistory, TimeoutGit};
use crate::manifest::{ManifestFile, ManifestGenerator};
use crate::report::{thousands, IncludedFile, RunReport, SkipReason, SkipRecord, TruncationRecord};
use crate::scan::Scanner;
use crate::summarize::{Summarizer, TimeoutSummarizer};
use crate::tokens::{TokenBudgetManager, Tokenizer};
use crate::truncate::{ContentTruncator, Fitted};
use crate::CondenseError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Manifest renders before its own size stops moving the offsets
const MAX_OFFSET_PASSES: usize = 4;
const TREE_MAX_LINES: usize = 200;
const TREE_MAX_CHILDREN: usize = 20;
const HEADER_KEY_FILES: usize = 10;

/// Cooperative cancellation shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scanning,
    Ranking,
    Assembling,
    Finalizing,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Ranking => "ranking",
            Self::Assembling => "assembling",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress callback: phase, current, total
pub type ProgressFn = Arc<dyn Fn(Phase, usize, usize) + Send + Sync>;

/// Outcome of the Ranking phase
#[derive(Debug)]
pub struct Ranking {
    /// Canonical repository root
    pub root: PathBuf,
    pub scanned: usize,
    /// Importance descending, size ascending, path ascending
    pub files: Vec<FileRecord>,
    pub skipped: Vec<SkipRecord>,
}

/// The document plus its structured report
#[derive(Debug)]
pub struct PackOutput {
    pub document: String,
    pub report: RunReport,
}

/// A file block placed in the document body
struct Placed {
    index: usize,
    /// Offset relative to the start of the body
    offset: usize,
    tokens: usize,
    truncated: bool,
}

/// One configured run over one repository
pub struct Pipeline<'a> {
    root: PathBuf,
    profile: ProcessingProfile,
    cache: &'a CacheHandle,
    git: Option<Arc<dyn GitHistory>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(root: impl Into<PathBuf>, profile: ProcessingProfile, cache: &'a CacheHandle) -> Self {
        Self {
            root: root.into(),
            profile,
            cache,
            git: None,
            summarizer: None,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `git` instead of detecting the `git` CLI (still gated by `[git] enabled`).
    /// Calls are bounded by `[git] timeout`.
    pub fn with_git(mut self, git: Arc<dyn GitHistory>) -> Self {
        self.git = Some(Arc::new(TimeoutGit::new(git, self.profile.git_timeout())));
        self
    }

    /// Calls are bounded by `[summarizer] timeout`.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        let timeout = self.profile.summarizer_timeout();
        self.summarizer = Some(Arc::new(TimeoutSummarizer::new(summarizer, timeout)));
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn profile(&self) -> &ProcessingProfile {
        &self.profile
    }

    fn report_progress(&self, phase: Phase, current: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(phase, current, total);
        }
    }

    /// Scan and rank without assembling a document.
    pub fn rank(&self) -> crate::Result<Ranking> {
        self.profile.validate()?;
        let tokenizer = Tokenizer::from_config(&self.profile.budget)?;
        self.rank_with(&tokenizer)
    }

    fn rank_with(&self, tokenizer: &Tokenizer) -> crate::Result<Ranking> {
        let scanner = Scanner::new(&self.root, &self.profile, tokenizer, self.cache)?;
        let on_scan = |current: usize, total: usize| {
            self.report_progress(Phase::Scanning, current, total)
        };
        let records = scanner.scan(&self.cancel, &on_scan)?;
        self.cache.evict_expired();

        let total = records.len();
        self.report_progress(Phase::Ranking, 0, total);
        let selection = &self.profile.selection;
        let mut ranking = Ranking {
            root: scanner.root().to_path_buf(),
            scanned: total,
            files: Vec::new(),
            skipped: Vec::new(),
        };

        for mut record in records {
            if let Some(reason) = record.skip {
                let mut skip = SkipRecord::new(record.rel_path.as_str(), reason);
                if let Some(detail) = record.skip_detail.take() {
                    skip = skip.with_detail(detail);
                }
                ranking.skipped.push(skip);
                continue;
            }
            if record.is_binary() {
                ranking
                    .skipped
                    .push(SkipRecord::new(record.rel_path.as_str(), SkipReason::Binary));
                continue;
            }
            if record.is_generated() && !selection.include_generated {
                ranking
                    .skipped
                    .push(SkipRecord::new(record.rel_path.as_str(), SkipReason::Generated));
                continue;
            }

            let boost = scanner.scorer().boost(&record.rel_path);
            record.importance = (record.importance + boost).clamp(0.0, 1.0);
            if !record.is_critical() && record.importance < selection.min_importance {
                let detail = format!("{:.2} < {:.2}", record.importance, selection.min_importance);
                ranking.skipped.push(
                    SkipRecord::new(record.rel_path.as_str(), SkipReason::BelowImportance)
                        .with_detail(detail),
                );
                continue;
            }
            ranking.files.push(record);
        }

        ranking.files.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then(a.size.cmp(&b.size))
                .then(a.rel_path.cmp(&b.rel_path))
        });
        info!(
            ranked = ranking.files.len(),
            filtered = ranking.skipped.len(),
            "ranking complete"
        );
        self.report_progress(Phase::Ranking, total, total);
        Ok(ranking)
    }

    fn git_history(&self, root: &Path) -> Option<Arc<dyn GitHistory>> {
        if !self.profile.git.enabled {
            return None;
        }
        if let Some(git) = &self.git {
            return Some(Arc::clone(git));
        }
        GitCli::detect(root, &self.profile.git, self.profile.git_timeout())
            .map(|cli| Arc::new(cli) as Arc<dyn GitHistory>)
    }

    /// Run every phase and return the document with its report.
    ///
    /// Fails only on configuration errors, an unusable root or cancellation;
    /// content that does not fit becomes skip records.
    pub fn run(&self) -> crate::Result<PackOutput> {
        self.profile.validate()?;
        let mut budget = TokenBudgetManager::from_config(&self.profile.budget)?;
        let tokenizer = budget.tokenizer().clone();
        let Ranking {
            root,
            files,
            mut skipped,
            ..
        } = self.rank_with(&tokenizer)?;

        let git = self.git_history(&root);
        let mut notes = Vec::new();
        if !tokenizer.is_exact() {
            notes.push("Token counts are estimates (heuristic tokenizer)".to_string());
        }
        if self.profile.git.enabled && git.is_none() {
            notes.push("Git history unavailable".to_string());
        }
        if self.summarizer.is_some() {
            notes.push("Large files may carry an external summary block".to_string());
        }

        let analysis = CodebaseAnalysis::analyze(&files);
        let head_commit = git.as_ref().and_then(|g| g.head_commit());
        let repository = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());

        // Front matter: header and tree are charged now, the manifest is held
        // until offsets are known, the footer keeps `reserve_tokens` free.
        let mut omissions = Vec::new();
        let header = render_header(&repository, &self.profile, &analysis, head_commit.as_deref(), &notes);
        let header = charge_part(&mut budget, "header", header);
        if header.is_none() {
            omissions.push("Header omitted: budget too small".to_string());
        }
        let tree = charge_part(&mut budget, "tree", render_tree(&files));
        if tree.is_none() {
            omissions.push("Directory tree omitted: budget too small".to_string());
        }
        let footer_reserve = self.profile.budget.reserve_tokens.min(budget.remaining());
        budget.reserve("footer", footer_reserve);
        let manifest_hold = if self.profile.manifest.enabled {
            let hold = self.profile.manifest.max_tokens.min(budget.remaining() / 4);
            (hold > 0 && budget.reserve("manifest", hold)).then_some(hold)
        } else {
            None
        };

        // Assembling
        let truncator = ContentTruncator::new(&self.profile.truncation, &tokenizer)
            .with_summarizer(self.summarizer.as_deref());
        let mut collector = AnnotationCollector::new(&self.profile.annotations);
        let mut placed: Vec<Placed> = Vec::new();
        let mut truncated: Vec<TruncationRecord> = Vec::new();
        let mut body = String::new();
        let mut body_tokens = 0usize;
        let mut exhausted_at = None;

        for (index, record) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(CondenseError::Cancelled);
            }
            self.report_progress(Phase::Assembling, index, files.len());

            let content = match fs::read(&record.path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(path = %record.rel_path, error = %e, "file became unreadable");
                    skipped.push(
                        SkipRecord::new(record.rel_path.as_str(), SkipReason::Unreadable)
                            .with_detail(e.to_string()),
                    );
                    continue;
                }
            };

            let fence = fence_for(&content);
            let opening = format!("{}{}\n", fence, record.language.map(|l| l.fence()).unwrap_or(""));
            let closing = format!("{}\n\n", fence);
            let minimal = tokenizer.count(&block_prefix(record, &[]))
                + tokenizer.count(&opening)
                + tokenizer.count(&closing);
            if budget.remaining() <= minimal {
                exhausted_at = Some(index);
                break;
            }

            let checkpoint = collector.checkpoint();
            if let Some(semantic) = &record.semantic {
                collector.collect_file(&record.rel_path, semantic);
            }
            if let Some(git) = git.as_ref().filter(|_| collector.is_enabled()) {
                if let Some(history) = git.history(&record.rel_path, None) {
                    collector.add_history(&record.rel_path, history, self.profile.git.window_days);
                }
            }
            let prefix = format!("{}{}", block_prefix(record, &collector.inline(&record.rel_path)), opening);
            let overhead = tokenizer.count(&prefix) + tokenizer.count(&closing);

            let original = record.token_count.unwrap_or_else(|| tokenizer.count(&content));
            let requested = (overhead + original).min(self.profile.budget.max_file_tokens);
            let allocation = budget.allocate(&record.rel_path, requested, record.importance);

            let rendered = allocation.granted.checked_sub(overhead).and_then(|content_budget| {
                fit_block(&truncator, &tokenizer, record, &content, content_budget, &prefix, &closing, allocation.granted)
            });
            match rendered {
                Some((block, tokens, fitted)) => {
                    budget.settle_last(tokens, fitted.is_truncated());
                    if fitted.is_truncated() {
                        truncated.push(TruncationRecord {
                            path: record.rel_path.clone(),
                            strategy: fitted.rendering.as_str().to_string(),
                            original_tokens: original,
                            rendered_tokens: fitted.tokens,
                            omitted_lines: fitted.omitted_lines,
                            omitted_bytes: fitted.omitted_bytes,
                        });
                    }
                    placed.push(Placed {
                        index,
                        offset: body_tokens,
                        tokens,
                        truncated: fitted.is_truncated(),
                    });
                    body_tokens += tokens;
                    body.push_str(&block);
                }
                None => {
                    budget.settle_last(0, false);
                    collector.rollback(checkpoint);
                    debug!(path = %record.rel_path, granted = allocation.granted, "file does not fit");
                    skipped.push(
                        SkipRecord::new(record.rel_path.as_str(), SkipReason::DoesNotFit).with_detail(
                            format!("{} tokens available", allocation.granted),
                        ),
                    );
                }
            }
            debug_assert!(budget.budget().is_consistent());
        }

        if let Some(start) = exhausted_at {
            info!(remaining = files.len() - start, "budget exhausted");
            skipped.extend(
                files[start..]
                    .iter()
                    .map(|r| SkipRecord::new(r.rel_path.as_str(), SkipReason::BudgetExhausted)),
            );
        }

        // Finalizing
        self.report_progress(Phase::Finalizing, 0, 1);
        let header_tokens = header.as_ref().map(|(_, t)| *t).unwrap_or(0);
        let tree_tokens = tree.as_ref().map(|(_, t)| *t).unwrap_or(0);

        let mut manifest: Option<(String, usize)> = None;
        if let Some(hold) = manifest_hold {
            let generator = ManifestGenerator::new(&self.profile.manifest, &tokenizer);
            let digest = collector.manifest_section();
            let mut manifest_tokens = 0;
            for _ in 0..MAX_OFFSET_PASSES {
                let base = header_tokens + manifest_tokens + tree_tokens;
                let entries: Vec<ManifestFile<'_>> = placed
                    .iter()
                    .map(|p| ManifestFile {
                        record: &files[p.index],
                        offset: base + p.offset,
                        truncated: p.truncated,
                    })
                    .collect();
                let Some(text) = generator.render(&analysis, &entries, &digest, hold) else {
                    manifest = None;
                    break;
                };
                let tokens = tokenizer.count(&text);
                let settled = tokens == manifest_tokens;
                manifest_tokens = tokens;
                manifest = Some((text, tokens));
                if settled {
                    break;
                }
            }
            match &manifest {
                Some((_, tokens)) => {
                    budget.commit("manifest", *tokens);
                }
                None => {
                    budget.release("manifest");
                    omissions.push("Manifest omitted: budget too small".to_string());
                }
            }
        }
        let manifest_tokens = manifest.as_ref().map(|(_, t)| *t).unwrap_or(0);
        let base = header_tokens + manifest_tokens + tree_tokens;

        let included: Vec<IncludedFile> = placed
            .iter()
            .map(|p| IncludedFile {
                path: files[p.index].rel_path.clone(),
                offset: base + p.offset,
                tokens: p.tokens,
                importance: files[p.index].importance,
                truncated: p.truncated,
            })
            .collect();

        budget.release("footer");
        let footer_input = FooterInput {
            included: included.len(),
            truncated: &truncated,
            skipped: &skipped,
            used: budget.budget().used(),
            total: budget.budget().total(),
            analysis: &analysis,
            omissions: &omissions,
        };
        let footer = render_footer(&footer_input, &tokenizer, budget.remaining())
            .and_then(|text| charge_part(&mut budget, "footer", text));
        debug_assert!(budget.budget().is_consistent());

        let mut document = String::new();
        let mut document_tokens = 0;
        for (text, tokens) in [header, manifest, tree].into_iter().flatten() {
            document.push_str(&text);
            document_tokens += tokens;
        }
        document.push_str(&body);
        document_tokens += body_tokens;
        if let Some((text, tokens)) = footer {
            document.push_str(&text);
            document_tokens += tokens;
        }

        notes.extend(omissions);
        let report = RunReport {
            repository,
            profile: self.profile.name.clone(),
            document_tokens,
            included,
            truncated,
            skipped,
            budget: budget.statistics(),
            cache: self.cache.stats(),
            codebase: analysis,
            annotations: collector.export(),
            notes,
        };
        info!(
            included = report.included.len(),
            truncated = report.truncated.len(),
            skipped = report.skipped.len(),
            tokens = document_tokens,
            "document assembled"
        );
        self.report_progress(Phase::Done, 1, 1);
        Ok(PackOutput { document, report })
    }
}

/// Reserve and commit a fixed-size part; `None` when it does not fit.
fn charge_part(budget: &mut TokenBudgetManager, label: &str, text: String) -> Option<(String, usize)> {
    let tokens = budget.count(&text);
    if !budget.reserve(label, tokens) {
        return None;
    }
    budget.commit(label, tokens);
    Some((text, tokens))
}

/// Fit content and wrap it in its block, re-fitting once if the block as a
/// whole counts higher than its parts.
#[allow(clippy::too_many_arguments)]
fn fit_block(
    truncator: &ContentTruncator<'_>,
    tokenizer: &Tokenizer,
    record: &FileRecord,
    content: &str,
    content_budget: usize,
    prefix: &str,
    closing: &str,
    granted: usize,
) -> Option<(String, usize, Fitted)> {
    let wrap = |fitted: &Fitted| {
        let mut block = String::with_capacity(prefix.len() + fitted.content.len() + closing.len() + 1);
        block.push_str(prefix);
        block.push_str(&fitted.content);
        if !fitted.content.ends_with('\n') {
            block.push('\n');
        }
        block.push_str(closing);
        block
    };

    let fitted = truncator.fit(record, content, content_budget)?;
    let block = wrap(&fitted);
    let tokens = tokenizer.count(&block);
    if tokens <= granted {
        return Some((block, tokens, fitted));
    }

    let tighter = content_budget.checked_sub(tokens - granted)?;
    let fitted = truncator.fit(record, content, tighter)?;
    let block = wrap(&fitted);
    let tokens = tokenizer.count(&block);
    (tokens <= granted).then_some((block, tokens, fitted))
}

fn fence_for(content: &str) -> &'static str {
    if content.contains("```") {
        "````"
    } else {
        "```"
    }
}

fn block_prefix(record: &FileRecord, annotations: &[String]) -> String {
    let mut out = format!("## File: {}\n", record.rel_path);
    if let Some(lang) = record.language {
        out.push_str(&format!("- Language: {}\n", lang.display_name()));
    }
    out.push_str(&format!("- Size: {} bytes\n", thousands(record.size as usize)));
    if let Some(tokens) = record.token_count {
        out.push_str(&format!("- Tokens: {}\n", thousands(tokens)));
    }
    for annotation in annotations {
        out.push_str(annotation);
        out.push('\n');
    }
    out.push('\n');
    out
}

fn render_header(
    repository: &str,
    profile: &ProcessingProfile,
    analysis: &CodebaseAnalysis,
    head_commit: Option<&str>,
    notes: &[String],
) -> String {
    let mut out = format!("# Repository: {}\n\n## Overview\n", repository);
    out.push_str(&format!("- Project type: {}\n", analysis.project_type));
    if let Some(lang) = &analysis.primary_language {
        out.push_str(&format!("- Primary language: {}\n", lang));
    }
    if !analysis.frameworks.is_empty() {
        let frameworks: Vec<&str> = analysis.frameworks.iter().map(String::as_str).collect();
        out.push_str(&format!("- Frameworks: {}\n", frameworks.join(", ")));
    }
    out.push_str(&format!(
        "- Candidate files: {} ({} bytes)\n",
        analysis.total_files,
        thousands(analysis.total_size as usize)
    ));
    out.push_str(&format!("- Model: {}\n", profile.budget.model));
    out.push_str(&format!("- Token budget: {}\n", thousands(profile.budget.total)));
    out.push_str(&format!("- Strategy: {}\n", profile.truncation.strategy));
    if let Some(intent) = profile.intent() {
        out.push_str(&format!("- Intent: {}\n", intent));
    }
    if let Some(commit) = head_commit {
        out.push_str(&format!("- Commit: {}\n", commit));
    }
    out.push('\n');

    if !analysis.key_files.is_empty() {
        out.push_str("## Key Files\n");
        for (i, path) in analysis.key_files.iter().take(HEADER_KEY_FILES).enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, path));
        }
        out.push('\n');
    }
    if !notes.is_empty() {
        out.push_str("## Processing Notes\n");
        for note in notes {
            out.push_str(&format!("- {}\n", note));
        }
        out.push('\n');
    }
    out
}

#[derive(Default)]
struct TreeNode {
    dirs: BTreeMap<String, TreeNode>,
    files: Vec<String>,
}

/// Directory tree of the ranked files, bounded in lines and fan-out
fn render_tree(files: &[FileRecord]) -> String {
    let mut root = TreeNode::default();
    for record in files {
        let mut node = &mut root;
        let mut parts: Vec<&str> = record.rel_path.split('/').collect();
        let Some(name) = parts.pop() else {
            continue;
        };
        for dir in parts {
            node = node.dirs.entry(dir.to_string()).or_default();
        }
        node.files.push(name.to_string());
    }

    let mut lines = vec!["./".to_string()];
    tree_lines(&root, "", &mut lines);
    if lines.len() > TREE_MAX_LINES {
        let hidden = lines.len() - TREE_MAX_LINES;
        lines.truncate(TREE_MAX_LINES);
        lines.push(format!("... ({} more lines)", hidden));
    }
    format!("## Directory Tree\n\n```\n{}\n```\n\n", lines.join("\n"))
}

fn tree_lines(node: &TreeNode, prefix: &str, lines: &mut Vec<String>) {
    let mut files: Vec<&String> = node.files.iter().collect();
    files.sort();
    let children: Vec<(String, Option<&TreeNode>)> = node
        .dirs
        .iter()
        .map(|(name, child)| (format!("{}/", name), Some(child)))
        .chain(files.into_iter().map(|name| (name.clone(), None)))
        .collect();

    let shown = children.len().min(TREE_MAX_CHILDREN);
    let hidden = children.len() - shown;
    for (i, (name, child)) in children.iter().take(shown).enumerate() {
        let last = i + 1 == shown && hidden == 0;
        let connector = if last { "└── " } else { "├── " };
        lines.push(format!("{}{}{}", prefix, connector, name));
        if let Some(child) = child {
            let indent = if last { "    " } else { "│   " };
            tree_lines(child, &format!("{}{}", prefix, indent), lines);
        }
    }
    if hidden > 0 {
        lines.push(format!("{}└── ... ({} more)", prefix, hidden));
    }
}

struct FooterInput<'r> {
    included: usize,
    truncated: &'r [TruncationRecord],
    skipped: &'r [SkipRecord],
    used: usize,
    total: usize,
    analysis: &'r CodebaseAnalysis,
    omissions: &'r [String],
}

impl FooterInput<'_> {
    fn entries(&self) -> Vec<String> {
        let truncated = self.truncated.iter().map(|t| {
            format!(
                "- `{}`: truncated ({}), {} of {} tokens kept, {} lines / {} bytes omitted",
                t.path,
                t.strategy,
                thousands(t.rendered_tokens),
                thousands(t.original_tokens),
                thousands(t.omitted_lines),
                thousands(t.omitted_bytes)
            )
        });
        let skipped = self.skipped.iter().map(|s| match &s.detail {
            Some(detail) => format!("- `{}`: skipped, {} ({})", s.path, s.reason, detail),
            None => format!("- `{}`: skipped, {}", s.path, s.reason),
        });
        truncated.chain(skipped).collect()
    }

    fn text(&self, entries: &[String], shown: usize, distribution: bool) -> String {
        let percent = if self.total == 0 {
            0.0
        } else {
            self.used as f64 * 100.0 / self.total as f64
        };
        let mut out = String::from("## Processing Summary\n");
        out.push_str(&format!(
            "- Files included: {} ({} truncated)\n",
            self.included,
            self.truncated.len()
        ));
        out.push_str(&format!("- Files skipped: {}\n", self.skipped.len()));
        out.push_str(&format!(
            "- Tokens before this summary: {} of {} ({:.1}%)\n",
            thousands(self.used),
            thousands(self.total),
            percent
        ));
        for omission in self.omissions {
            out.push_str(&format!("- {}\n", omission));
        }
        out.push('\n');

        if !entries.is_empty() {
            out.push_str("## Skipped and Truncated Files\n");
            for entry in &entries[..shown] {
                out.push_str(entry);
                out.push('\n');
            }
            if shown < entries.len() {
                out.push_str(&format!(
                    "- ... {} more entries in the JSON report\n",
                    entries.len() - shown
                ));
            }
            out.push('\n');
        }

        if distribution && !self.analysis.languages.is_empty() {
            out.push_str("## Distribution\n");
            out.push_str(&format!("- Languages: {}\n", histogram(&self.analysis.languages)));
            out.push_str(&format!("- File types: {}\n", histogram(&self.analysis.file_types)));
            out.push('\n');
        }
        out
    }
}

fn histogram(counts: &BTreeMap<String, usize>) -> String {
    let mut pairs: Vec<(&String, &usize)> = counts.iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    pairs
        .iter()
        .map(|(name, count)| format!("{} {}", name, count))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Footer within `limit` tokens: shortens the skip report first, then drops
/// the distribution. `None` when not even the summary fits.
fn render_footer(input: &FooterInput<'_>, tokenizer: &Tokenizer, limit: usize) -> Option<String> {
    let entries = input.entries();
    for distribution in [true, false] {
        let full = input.text(&entries, entries.len(), distribution);
        if tokenizer.count(&full) <= limit {
            return Some(full);
        }
        // Largest prefix of entries that fits
        let (mut lo, mut hi) = (0usize, entries.len());
        if tokenizer.count(&input.text(&entries, 0, distribution)) > limit {
            continue;
        }
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if tokenizer.count(&input.text(&entries, mid, distribution)) <= limit {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        return Some(input.text(&entries, lo, distribution));
    }
    None
}
