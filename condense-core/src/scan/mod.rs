//! Repository scanning: walk, classify, fingerprint, count and analyze files.

pub mod classify;
pub mod walk;

pub use walk::{build_exclusions, relative_path, walk_files, DEFAULT_EXCLUDES, IGNORE_FILE};

use crate::cache::CacheHandle;
use crate::config::ProcessingProfile;
use crate::document::{fingerprint, FileClass, FileRecord};
use crate::parse::analyze;
use crate::pipeline::CancellationToken;
use crate::report::SkipReason;
use crate::scoring::ImportanceScorer;
use crate::tokens::Tokenizer;
use crate::CondenseError;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Scans one repository with a fixed profile, tokenizer and cache.
pub struct Scanner<'a> {
    root: PathBuf,
    profile: &'a ProcessingProfile,
    tokenizer: &'a Tokenizer,
    cache: &'a CacheHandle,
    scorer: ImportanceScorer,
    profile_fp: String,
    tokenizer_fp: String,
}

impl<'a> Scanner<'a> {
    pub fn new(
        root: &Path,
        profile: &'a ProcessingProfile,
        tokenizer: &'a Tokenizer,
        cache: &'a CacheHandle,
    ) -> crate::Result<Self> {
        if !root.is_dir() {
            return Err(CondenseError::RootNotFound(root.to_path_buf()));
        }
        let root = root.canonicalize()?;
        let scorer = ImportanceScorer::new(profile.intent()).with_boosts(&profile.selection.boost)?;
        Ok(Self {
            root,
            profile,
            tokenizer,
            cache,
            scorer,
            profile_fp: profile.fingerprint(),
            tokenizer_fp: profile.tokenizer_fingerprint(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scorer(&self) -> &ImportanceScorer {
        &self.scorer
    }

    /// Scan every non-excluded file. Per-file failures become records with a
    /// skip reason; only cancellation aborts the scan.
    pub fn scan(
        &self,
        cancel: &CancellationToken,
        progress: &(dyn Fn(usize, usize) + Sync),
    ) -> crate::Result<Vec<FileRecord>> {
        let exclusions = Arc::new(build_exclusions(&self.root, &self.profile.selection.exclude)?);
        let files = walk_files(&self.root, exclusions);
        let total = files.len();
        info!(files = total, root = %self.root.display(), "scanning");

        let done = AtomicUsize::new(0);
        let mut records: Vec<FileRecord> = files
            .par_iter()
            .filter_map(|path| {
                if cancel.is_cancelled() {
                    return None;
                }
                let record = self.scan_file(path);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                progress(n, total);
                Some(record)
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(CondenseError::Cancelled);
        }

        records.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(records)
    }

    /// Classify and analyze a single file.
    pub fn scan_file(&self, path: &Path) -> FileRecord {
        let rel_path = relative_path(&self.root, path);
        let name = rel_path.rsplit('/').next().unwrap_or(&rel_path).to_string();

        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(path = %rel_path, error = %e, "cannot stat file");
                return unreadable(path, rel_path, 0, e.to_string());
            }
        };

        if classify::is_trivial_name(&name) && !classify::is_critical_name(&name) {
            let class = classify::classify(&rel_path, None);
            let mut record = FileRecord::new(path.to_path_buf(), rel_path, size, class);
            record.skip = Some(SkipReason::Trivial);
            return record;
        }

        if size > self.profile.selection.max_file_bytes {
            let class = classify::classify(&rel_path, None);
            let mut record = FileRecord::new(path.to_path_buf(), rel_path, size, class);
            record.skip = Some(SkipReason::Oversized);
            return record;
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %rel_path, error = %e, "cannot read file");
                return unreadable(path, rel_path, size, e.to_string());
            }
        };

        let class = classify::classify(&rel_path, Some(&bytes));
        let mut record = FileRecord::new(path.to_path_buf(), rel_path, size, class);
        record.fingerprint = fingerprint(&bytes);
        self.cache.observe(&record.rel_path, &record.fingerprint);

        if class == FileClass::Binary {
            return record;
        }

        let content = String::from_utf8_lossy(&bytes);
        record.line_count = content.lines().count();

        let tokens = match self.cache.get_tokens(&record.fingerprint, &self.tokenizer_fp) {
            Some(tokens) => tokens,
            None => {
                let tokens = self.tokenizer.count(&content);
                self.cache
                    .put_tokens(&record.rel_path, &record.fingerprint, &self.tokenizer_fp, tokens);
                tokens
            }
        };
        record.token_count = Some(tokens);

        // Lock files are only ever summarized, so their structure is never needed
        if class != FileClass::Summarizable {
            let semantic = match self.cache.get_semantic(&record.fingerprint, &self.profile_fp) {
                Some(data) => data,
                None => {
                    let data = analyze(path, &content);
                    self.cache.put_semantic(
                        &record.rel_path,
                        &record.fingerprint,
                        &self.profile_fp,
                        data.clone(),
                    );
                    data
                }
            };
            record.semantic = Some(semantic);
        }

        let (importance, relevance) = self.scorer.score(&record, &content);
        record.importance = importance;
        record.query_relevance = relevance;
        record
    }
}

fn unreadable(path: &Path, rel_path: String, size: u64, detail: String) -> FileRecord {
    let mut record = FileRecord::new(path.to_path_buf(), rel_path, size, FileClass::Ordinary);
    record.skip = Some(SkipReason::Unreadable);
    record.skip_detail = Some(detail);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn profile() -> ProcessingProfile {
        let mut profile = ProcessingProfile::default();
        profile.budget.tokenizer = TokenizerKind::Heuristic;
        profile
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("README.md"), "# Demo\n\nA demo project.\n").unwrap();
        fs::write(root.join("main.py"), "def main():\n    helper()\n\ndef helper():\n    pass\n")
            .unwrap();
        fs::write(root.join("LICENSE"), "MIT").unwrap();
        fs::write(root.join("logo.png"), [0x89u8, b'P', b'N', b'G', 0, 0, 1]).unwrap();
        fs::write(root.join("package-lock.json"), "{\"lockfileVersion\": 3}").unwrap();
        dir
    }

    fn find<'r>(records: &'r [FileRecord], rel: &str) -> &'r FileRecord {
        records.iter().find(|r| r.rel_path == rel).unwrap()
    }

    #[test]
    fn test_scan_classifies_and_analyzes() {
        let dir = fixture();
        let profile = profile();
        let tokenizer = Tokenizer::Heuristic;
        let cache = CacheHandle::in_memory(Duration::from_secs(3600));
        let scanner = Scanner::new(dir.path(), &profile, &tokenizer, &cache).unwrap();

        let records = scanner.scan(&CancellationToken::new(), &|_, _| {}).unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.rel_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["LICENSE", "README.md", "logo.png", "main.py", "package-lock.json"]
        );

        assert_eq!(find(&records, "LICENSE").skip, Some(SkipReason::Trivial));
        assert!(find(&records, "logo.png").is_binary());
        assert!(find(&records, "package-lock.json").is_summarizable());
        assert!(find(&records, "package-lock.json").semantic.is_none());

        let readme = find(&records, "README.md");
        assert!(readme.is_critical());
        assert!(readme.importance >= 0.9);

        let main = find(&records, "main.py");
        assert_eq!(main.token_count, Some(17));
        assert_eq!(main.line_count, 5);
        assert_eq!(main.entities().len(), 2);
        assert_eq!(main.fingerprint.len(), 64);
    }

    #[test]
    fn test_second_scan_hits_cache() {
        let dir = fixture();
        let profile = profile();
        let tokenizer = Tokenizer::Heuristic;
        let cache = CacheHandle::in_memory(Duration::from_secs(3600));
        let scanner = Scanner::new(dir.path(), &profile, &tokenizer, &cache).unwrap();

        scanner.scan(&CancellationToken::new(), &|_, _| {}).unwrap();
        let misses = cache.stats().misses;
        scanner.scan(&CancellationToken::new(), &|_, _| {}).unwrap();
        assert_eq!(cache.stats().misses, misses);
        assert!(cache.stats().hits > 0);
    }

    #[test]
    fn test_oversized_files_are_not_read() {
        let dir = fixture();
        let mut profile = profile();
        profile.selection.max_file_bytes = 10;
        let tokenizer = Tokenizer::Heuristic;
        let cache = CacheHandle::in_memory(Duration::from_secs(3600));
        let scanner = Scanner::new(dir.path(), &profile, &tokenizer, &cache).unwrap();
        let records = scanner.scan(&CancellationToken::new(), &|_, _| {}).unwrap();
        let main = find(&records, "main.py");
        assert_eq!(main.skip, Some(SkipReason::Oversized));
        assert!(main.token_count.is_none());
    }

    #[test]
    fn test_cancelled_scan_returns_error() {
        let dir = fixture();
        let profile = profile();
        let tokenizer = Tokenizer::Heuristic;
        let cache = CacheHandle::in_memory(Duration::from_secs(3600));
        let scanner = Scanner::new(dir.path(), &profile, &tokenizer, &cache).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            scanner.scan(&cancel, &|_, _| {}),
            Err(CondenseError::Cancelled)
        ));
    }

    #[test]
    fn test_missing_root() {
        let profile = profile();
        let tokenizer = Tokenizer::Heuristic;
        let cache = CacheHandle::in_memory(Duration::from_secs(3600));
        let result = Scanner::new(Path::new("/definitely/not/here"), &profile, &tokenizer, &cache);
        assert!(matches!(result, Err(CondenseError::RootNotFound(_))));
    }
}
