use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use condense_core::{
    AnnotationMode, CacheHandle, CancellationToken, CondenseError, FileHistory, GitHistory,
    PackOutput, Phase, Pipeline, ProcessingProfile, SkipReason, TokenizerKind, Tokenizer,
    TruncationStrategy,
};
use tempfile::TempDir;

fn profile(total: usize, strategy: TruncationStrategy) -> ProcessingProfile {
    let mut profile = ProcessingProfile::default();
    profile.budget.total = total;
    profile.budget.tokenizer = TokenizerKind::Heuristic;
    profile.truncation.strategy = strategy;
    profile.git.enabled = false;
    profile
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn readme() -> String {
    let mut text = String::from("# Demo\n\nA small service used for packing tests.\n");
    while text.len() < 200 {
        text.push_str("More words about the demo.\n");
    }
    text
}

fn main_py() -> String {
    let mut text = String::from("\"\"\"Entry point for the demo service.\"\"\"\n\n");
    text.push_str("def load(path):\n");
    for i in 0..20 {
        text.push_str(&format!("    value_{} = read_section(path, {})\n", i, i));
    }
    text.push_str("    return value_0\n\n\n");
    text.push_str("def main():\n");
    for i in 0..20 {
        text.push_str(&format!("    print(\"step {}\", load(\"config_{}.toml\"))\n", i, i));
    }
    text.push_str("\n\nif __name__ == \"__main__\":\n    main()\n");
    text
}

fn big_json() -> String {
    let mut text = String::from("[\n");
    let mut i = 0;
    while text.len() < 2_000_000 {
        text.push_str(&format!(
            "  {{\"id\": {:06}, \"name\": \"item-{:06}\", \"tags\": [\"alpha\", \"beta\"]}},\n",
            i, i
        ));
        i += 1;
    }
    text.push_str("  {}\n]\n");
    text
}

fn three_file_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "README.md", &readme());
    write(dir.path(), "main.py", &main_py());
    write(dir.path(), "big.json", &big_json());
    dir
}

fn pack(root: &Path, profile: ProcessingProfile, cache: &CacheHandle) -> PackOutput {
    Pipeline::new(root, profile, cache).run().unwrap()
}

fn cache() -> CacheHandle {
    CacheHandle::in_memory(Duration::from_secs(3600))
}

/// `(first, last)` of every `[Lines a-b omitted]` marker in `text`
fn omitted_ranges(text: &str) -> Vec<(usize, usize)> {
    text.lines()
        .filter_map(|line| {
            let rest = line.split("[Lines ").nth(1)?;
            let (range, _) = rest.split_once(" omitted]")?;
            let (first, last) = range.split_once('-')?;
            Some((first.parse().ok()?, last.parse().ok()?))
        })
        .collect()
}

fn block<'d>(document: &'d str, path: &str) -> &'d str {
    let start = document
        .find(&format!("## File: {}\n", path))
        .unwrap_or_else(|| panic!("no block for {}", path));
    let rest = &document[start + 1..];
    let end = rest.find("\n## ").map(|e| e + 1).unwrap_or(rest.len());
    &document[start..start + end]
}

#[test]
fn test_basic_pack_truncates_large_json() {
    let dir = three_file_repo();
    let cache = cache();
    let out = pack(dir.path(), profile(50_000, TruncationStrategy::Basic), &cache);
    let report = &out.report;

    assert!(report.is_included("README.md"));
    assert!(report.is_included("main.py"));
    assert!(report.truncation("README.md").is_none());
    assert!(report.truncation("main.py").is_none());
    assert!(out.document.contains(&main_py()));

    assert!(report.is_included("big.json"));
    assert_eq!(report.skip_reason("big.json"), None);
    let record = report.truncation("big.json").unwrap();
    assert_eq!(record.strategy, "basic");
    assert!(record.omitted_bytes > 0);
    assert!(record.rendered_tokens < record.original_tokens);

    assert!(report.document_tokens <= 50_000);
    assert!(out.document.contains("## Processing Summary"));
    assert!(out.document.contains("# Project Manifest"));
}

#[test]
fn test_tiny_budget_skips_everything_without_failing() {
    let dir = three_file_repo();
    let cache = cache();
    let profile = profile(10, TruncationStrategy::Semantic);
    assert!(profile.budget.reserve_tokens > 10);

    let out = pack(dir.path(), profile, &cache);
    for path in ["README.md", "main.py", "big.json"] {
        assert_eq!(out.report.skip_reason(path), Some(SkipReason::BudgetExhausted), "{}", path);
    }
    assert!(out.report.included.is_empty());
    assert!(out.report.document_tokens <= 10);
}

#[test]
fn test_lock_file_is_summarized() {
    let dir = TempDir::new().unwrap();
    let mut lock = String::from("{\n  \"name\": \"demo\",\n  \"lockfileVersion\": 3,\n  \"packages\": {\n");
    for i in 0..1000 {
        lock.push_str(&format!("    \"node_modules/pkg-{}\": {{\n", i));
        lock.push_str("      \"version\": \"1.0.0\",\n");
        lock.push_str(&format!(
            "      \"resolved\": \"https://registry.npmjs.org/pkg-{}/-/pkg-{}-1.0.0.tgz\",\n",
            i, i
        ));
        lock.push_str("      \"license\": \"MIT\"\n");
        lock.push_str("    },\n");
    }
    lock.push_str("  }\n}\n");
    assert!(lock.lines().count() >= 5000);
    write(dir.path(), "package-lock.json", &lock);
    write(dir.path(), "index.js", "const express = require('express');\nmodule.exports = express();\n");

    let cache = cache();
    let out = pack(dir.path(), profile(50_000, TruncationStrategy::Semantic), &cache);

    assert!(out.report.is_included("package-lock.json"));
    assert!(out.document.contains("[LOCK FILE SUMMARY: package-lock.json]"));
    assert!(out.document.contains("NPM packages: ~1,000"));
    assert!(out.document.contains("[Full content omitted"));
    assert!(!out.document.contains("pkg-42/-/pkg-42-1.0.0.tgz"));
    assert!(out.report.truncation("package-lock.json").is_some());
}

#[test]
fn test_repeated_runs_are_identical() {
    let dir = three_file_repo();
    let cache = cache();
    let first = pack(dir.path(), profile(20_000, TruncationStrategy::Semantic), &cache);
    let second = pack(dir.path(), profile(20_000, TruncationStrategy::Semantic), &cache);

    assert_eq!(first.document, second.document);
    assert_eq!(first.report.skipped, second.report.skipped);
    assert_eq!(first.report.truncated, second.report.truncated);

    let fresh = cache_fresh_run(dir.path());
    assert_eq!(first.document, fresh.document);
}

fn cache_fresh_run(root: &Path) -> PackOutput {
    let cache = cache();
    pack(root, profile(20_000, TruncationStrategy::Semantic), &cache)
}

#[test]
fn test_budget_change_reuses_cached_counts() {
    let dir = three_file_repo();
    let cache = cache();
    let large = pack(dir.path(), profile(50_000, TruncationStrategy::Basic), &cache);
    let hits_after_first = cache.stats().hits;

    let small = pack(dir.path(), profile(3_000, TruncationStrategy::Basic), &cache);
    assert!(cache.stats().hits > hits_after_first);

    assert_ne!(large.document, small.document);
    assert!(small.report.document_tokens <= 3_000);
    let rendered = |out: &PackOutput| out.report.truncation("big.json").map(|t| t.rendered_tokens);
    assert_ne!(rendered(&large), rendered(&small));
}

#[test]
fn test_budget_accounting_matches_document() {
    let dir = three_file_repo();
    for total in [2_000, 8_000, 50_000] {
        let cache = cache();
        let out = pack(dir.path(), profile(total, TruncationStrategy::Semantic), &cache);
        let budget = &out.report.budget;
        assert!(budget.used <= total);
        assert_eq!(out.report.document_tokens, budget.used);
        assert!(Tokenizer::Heuristic.count(&out.document) <= total);
    }
}

#[test]
fn test_semantic_omissions_are_disjoint() {
    let dir = TempDir::new().unwrap();
    let mut source = String::from("import os\n\n\n");
    for i in 0..40 {
        source.push_str(&format!("def handler_{}(request):\n", i));
        for j in 0..8 {
            source.push_str(&format!("    step_{} = os.path.join(request, \"{}\")\n", j, j));
        }
        source.push_str("    return step_0\n\n\n");
    }
    write(dir.path(), "service.py", &source);

    let cache = cache();
    let mut profile = profile(50_000, TruncationStrategy::Semantic);
    profile.budget.max_file_tokens = 600;
    let out = pack(dir.path(), profile, &cache);

    assert!(out.report.is_included("service.py"));
    let ranges = omitted_ranges(block(&out.document, "service.py"));
    assert!(!ranges.is_empty());
    for (first, last) in &ranges {
        assert!(first <= last);
    }
    for pair in ranges.windows(2) {
        assert!(pair[0].1 < pair[1].0, "overlapping markers {:?}", pair);
    }
}

#[test]
fn test_file_that_cannot_fit_is_recorded() {
    let dir = TempDir::new().unwrap();
    let mut source = String::new();
    for i in 0..20 {
        source.push_str(&format!("# {}\n", format!("header comment line {} ", i).repeat(12)));
    }
    for i in 0..3 {
        source.push_str(&format!("def run_{}():\n    return {}\n\n", i, i));
    }
    write(dir.path(), "src/engine.py", &source);
    write(dir.path(), "hello.txt", "hi\n");

    let cache = cache();
    let mut profile = profile(50_000, TruncationStrategy::Semantic);
    profile.budget.max_file_tokens = 60;
    let out = pack(dir.path(), profile, &cache);

    assert_eq!(out.report.skip_reason("src/engine.py"), Some(SkipReason::DoesNotFit));
    let record = out.report.skipped.iter().find(|s| s.path == "src/engine.py").unwrap();
    assert!(record.detail.is_some());
    assert!(!out.document.contains("## File: src/engine.py"));
    assert!(out.report.is_included("hello.txt"));
}

#[test]
fn test_offsets_increase_in_rank_order() {
    let dir = three_file_repo();
    let cache = cache();
    let out = pack(dir.path(), profile(50_000, TruncationStrategy::Basic), &cache);

    let included = &out.report.included;
    assert_eq!(included.len(), 3);
    for pair in included.windows(2) {
        assert!(pair[0].offset + pair[0].tokens <= pair[1].offset);
    }
    assert!(out.document.contains(&format!("(offset {}", thousands(included[0].offset))));
}

fn thousands(n: usize) -> String {
    condense_core::report::thousands(n)
}

#[test]
fn test_cancelled_run_returns_error() {
    let dir = three_file_repo();
    let cache = cache();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = Pipeline::new(dir.path(), profile(50_000, TruncationStrategy::Basic), &cache)
        .with_cancellation(cancel)
        .run();
    assert!(matches!(result, Err(CondenseError::Cancelled)));
}

#[test]
fn test_invalid_inputs_fail_before_scanning() {
    let dir = three_file_repo();
    let cache = cache();

    let result = Pipeline::new(dir.path(), profile(0, TruncationStrategy::Basic), &cache).run();
    assert!(matches!(result, Err(CondenseError::InvalidProfile(_))));

    let missing = dir.path().join("missing");
    let result = Pipeline::new(&missing, profile(1_000, TruncationStrategy::Basic), &cache).run();
    assert!(matches!(result, Err(CondenseError::RootNotFound(_))));
}

#[test]
fn test_progress_reports_phases_in_order() {
    let dir = three_file_repo();
    let cache = cache();
    let seen: Arc<Mutex<Vec<Phase>>> = Arc::default();
    let sink = Arc::clone(&seen);

    Pipeline::new(dir.path(), profile(50_000, TruncationStrategy::Basic), &cache)
        .with_progress(Arc::new(move |phase, _, _| {
            let mut seen = sink.lock().unwrap();
            if seen.last() != Some(&phase) {
                seen.push(phase);
            }
        }))
        .run()
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&Phase::Scanning));
    assert_eq!(seen.last(), Some(&Phase::Done));
    let order = |phase: Phase| seen.iter().position(|p| *p == phase);
    assert!(order(Phase::Ranking) < order(Phase::Assembling));
    assert!(order(Phase::Assembling) < order(Phase::Finalizing));
}

#[test]
fn test_inline_annotations_appear_in_file_block() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def handle(event):\n    # FIXME: retries are not bounded\n    return event\n",
    );

    let cache = cache();
    let out = pack(dir.path(), profile(20_000, TruncationStrategy::Semantic), &cache);
    let block = block(&out.document, "app.py");
    assert!(block.contains("[TODO_ITEM"));
    assert!(out.report.annotations.summary.total > 0);
}

struct BusyHistory;

impl GitHistory for BusyHistory {
    fn history(&self, _rel_path: &str, _line: Option<usize>) -> Option<FileHistory> {
        Some(FileHistory {
            last_author: "Ada Lovelace".to_string(),
            last_date: "2024-01-01".to_string(),
            last_hash: "4f2a9c1".to_string(),
            last_message: "Bound retries".to_string(),
            change_frequency: 12,
            recent_authors: vec!["Ada Lovelace".to_string()],
        })
    }

    fn head_commit(&self) -> Option<String> {
        Some("4f2a9c1e0b7d".to_string())
    }
}

#[test]
fn test_git_history_is_annotated_inline_and_in_manifest() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "app.py", "def handle(event):\n    return event\n");

    let cache = cache();
    let mut profile = profile(20_000, TruncationStrategy::Semantic);
    profile.git.enabled = true;
    profile.annotations.mode = AnnotationMode::Both;
    let out = Pipeline::new(dir.path(), profile, &cache)
        .with_git(Arc::new(BusyHistory))
        .run()
        .unwrap();

    let block = block(&out.document, "app.py");
    assert!(block.contains("[GIT_INSIGHT file=\"app.py\""));
    assert!(out.document.contains("### Frequently Changed Files"));
    assert!(!out.report.notes.iter().any(|n| n == "Git history unavailable"));
}

#[test]
fn test_missing_repository_disables_git_quietly() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "app.py", "def handle(event):\n    return event\n");

    let cache = cache();
    let mut profile = profile(20_000, TruncationStrategy::Semantic);
    profile.git.enabled = true;
    let out = pack(dir.path(), profile, &cache);

    assert!(out.report.is_included("app.py"));
    assert!(out.report.notes.iter().any(|n| n == "Git history unavailable"));
    assert!(!out.document.contains("[GIT_INSIGHT"));
}

struct StalledHistory;

impl GitHistory for StalledHistory {
    fn history(&self, rel_path: &str, line: Option<usize>) -> Option<FileHistory> {
        std::thread::sleep(Duration::from_secs(4));
        BusyHistory.history(rel_path, line)
    }

    fn head_commit(&self) -> Option<String> {
        std::thread::sleep(Duration::from_secs(4));
        BusyHistory.head_commit()
    }
}

#[test]
fn test_stalled_git_is_bounded_by_timeout() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "app.py", "def handle(event):\n    return event\n");

    let cache = cache();
    let mut profile = profile(20_000, TruncationStrategy::Semantic);
    profile.git.enabled = true;
    profile.git.timeout = "1s".to_string();
    let started = std::time::Instant::now();
    let out = Pipeline::new(dir.path(), profile, &cache)
        .with_git(Arc::new(StalledHistory))
        .run()
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(out.report.is_included("app.py"));
    assert!(!out.document.contains("[GIT_INSIGHT"));
}
