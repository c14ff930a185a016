//! Processing profile: the full configuration of one run

use crate::annotations::{AnnotationKind, Priority};
use crate::CondenseError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Per-repository state directory (profile and cache)
pub const STATE_DIR: &str = ".condense";
pub const PROFILE_FILE: &str = "profile.toml";
pub const CACHE_FILE: &str = "cache.db";

/// Default profile as TOML
pub const DEFAULT_PROFILE: &str = r#"# Condense Profile

name = "default"

[budget]
# Total token budget for the generated document
total = 500000
# Target model (selects the BPE encoding when available)
model = "gpt-4"
# Token counter: "auto", "tiktoken" or "heuristic" (chars / 3)
tokenizer = "auto"
# Held back for the processing summary (capped at what remains)
reserve_tokens = 1000
# Upper bound for a single file's rendered block
max_file_tokens = 100000

[selection]
# Gitignore-style patterns excluded in addition to .gitignore / .condenseignore
exclude = []
# Importance boosts by glob pattern, e.g. { "src/**" = 0.2 }
boost = {}
# Files above this size (bytes) are skipped as oversized
max_file_bytes = 10000000
# Files scoring below this importance are skipped
min_importance = 0.0
# Keep files that look auto-generated
include_generated = false
# Natural-language description of the planned task (biases ranking)
intent = ""

[truncation]
# "semantic", "basic", "business_logic" or "middle_summarize"
strategy = "semantic"
# Lines always kept at the top of a semantically truncated file
header_lines = 20
# Context lines kept around each entity
context_lines = 3
# Entity-name keywords treated as tests / utilities by business_logic
test_keywords = ["test", "spec"]
utility_keywords = ["util", "helper", "format", "parse", "convert"]
# Files with at least this many tokens may be sent to the summarizer
summarize_min_tokens = 4000

[manifest]
enabled = true
max_tokens = 5000
max_files_per_dir = 10

[annotations]
# "off", "inline", "manifest" or "both"
mode = "inline"
types = ["CALL_GRAPH_NODE", "GIT_INSIGHT", "TODO_ITEM", "QUALITY_METRIC"]
min_complexity = 10
min_priority = "low"
include_private = true

[git]
enabled = false
window_days = 90
max_authors = 3
timeout = "5s"

[cache]
# Entries older than this are evicted (e.g. "12h", "7d")
ttl = "7d"

[summarizer]
timeout = "30s"
"#;

/// Truncation strategy applied when a file does not fit its sub-budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TruncationStrategy {
    Semantic,
    Basic,
    BusinessLogic,
    MiddleSummarize,
}

impl TruncationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Basic => "basic",
            Self::BusinessLogic => "business_logic",
            Self::MiddleSummarize => "middle_summarize",
        }
    }
}

impl FromStr for TruncationStrategy {
    type Err = CondenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "semantic" => Ok(Self::Semantic),
            "basic" => Ok(Self::Basic),
            "business_logic" => Ok(Self::BusinessLogic),
            "middle_summarize" => Ok(Self::MiddleSummarize),
            _ => Err(CondenseError::UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for TruncationStrategy {
    type Error = CondenseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TruncationStrategy> for String {
    fn from(value: TruncationStrategy) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TruncationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counter backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    Auto,
    Tiktoken,
    Heuristic,
}

/// Where annotations are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationMode {
    Off,
    Inline,
    Manifest,
    Both,
}

impl AnnotationMode {
    pub fn inline(self) -> bool {
        matches!(self, Self::Inline | Self::Both)
    }

    pub fn manifest(self) -> bool {
        matches!(self, Self::Manifest | Self::Both)
    }
}

impl FromStr for AnnotationMode {
    type Err = CondenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "inline" => Ok(Self::Inline),
            "manifest" => Ok(Self::Manifest),
            "both" => Ok(Self::Both),
            other => Err(CondenseError::InvalidProfile(format!(
                "unknown annotation mode '{}'",
                other
            ))),
        }
    }
}

/// Processing profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingProfile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub truncation: TruncationConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub annotations: AnnotationConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_total")]
    pub total: usize,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_tokenizer")]
    pub tokenizer: TokenizerKind,
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: usize,
    #[serde(default = "default_max_file_tokens")]
    pub max_file_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub boost: BTreeMap<String, f64>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub min_importance: f64,
    #[serde(default)]
    pub include_generated: bool,
    #[serde(default)]
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    #[serde(default = "default_strategy")]
    pub strategy: TruncationStrategy,
    #[serde(default = "default_header_lines")]
    pub header_lines: usize,
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    #[serde(default = "default_test_keywords")]
    pub test_keywords: Vec<String>,
    #[serde(default = "default_utility_keywords")]
    pub utility_keywords: Vec<String>,
    #[serde(default = "default_summarize_min_tokens")]
    pub summarize_min_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_manifest_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_max_files_per_dir")]
    pub max_files_per_dir: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    #[serde(default = "default_annotation_mode")]
    pub mode: AnnotationMode,
    #[serde(default = "default_annotation_types")]
    pub types: Vec<AnnotationKind>,
    #[serde(default = "default_min_complexity")]
    pub min_complexity: u32,
    #[serde(default = "default_min_priority")]
    pub min_priority: Priority,
    #[serde(default = "default_true")]
    pub include_private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_max_authors")]
    pub max_authors: usize,
    #[serde(default = "default_git_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_summarizer_timeout")]
    pub timeout: String,
}

// Default value functions
fn default_name() -> String {
    "default".to_string()
}
fn default_total() -> usize {
    500_000
}
fn default_model() -> String {
    "gpt-4".to_string()
}
fn default_tokenizer() -> TokenizerKind {
    TokenizerKind::Auto
}
fn default_reserve_tokens() -> usize {
    1000
}
fn default_max_file_tokens() -> usize {
    100_000
}
fn default_max_file_bytes() -> u64 {
    10_000_000
}
fn default_strategy() -> TruncationStrategy {
    TruncationStrategy::Semantic
}
fn default_header_lines() -> usize {
    20
}
fn default_context_lines() -> usize {
    3
}
fn default_test_keywords() -> Vec<String> {
    vec!["test".to_string(), "spec".to_string()]
}
fn default_utility_keywords() -> Vec<String> {
    ["util", "helper", "format", "parse", "convert"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_summarize_min_tokens() -> usize {
    4000
}
fn default_true() -> bool {
    true
}
fn default_manifest_max_tokens() -> usize {
    5000
}
fn default_max_files_per_dir() -> usize {
    10
}
fn default_annotation_mode() -> AnnotationMode {
    AnnotationMode::Inline
}
fn default_annotation_types() -> Vec<AnnotationKind> {
    vec![
        AnnotationKind::CallGraphNode,
        AnnotationKind::GitInsight,
        AnnotationKind::TodoItem,
        AnnotationKind::QualityMetric,
    ]
}
fn default_min_complexity() -> u32 {
    10
}
fn default_min_priority() -> Priority {
    Priority::Low
}
fn default_window_days() -> u32 {
    90
}
fn default_max_authors() -> usize {
    3
}
fn default_git_timeout() -> String {
    "5s".to_string()
}
fn default_cache_ttl() -> String {
    "7d".to_string()
}
fn default_summarizer_timeout() -> String {
    "30s".to_string()
}

impl Default for ProcessingProfile {
    fn default() -> Self {
        Self {
            name: default_name(),
            budget: BudgetConfig::default(),
            selection: SelectionConfig::default(),
            truncation: TruncationConfig::default(),
            manifest: ManifestConfig::default(),
            annotations: AnnotationConfig::default(),
            git: GitConfig::default(),
            cache: CacheConfig::default(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total: default_total(),
            model: default_model(),
            tokenizer: default_tokenizer(),
            reserve_tokens: default_reserve_tokens(),
            max_file_tokens: default_max_file_tokens(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            boost: BTreeMap::new(),
            max_file_bytes: default_max_file_bytes(),
            min_importance: 0.0,
            include_generated: false,
            intent: String::new(),
        }
    }
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            header_lines: default_header_lines(),
            context_lines: default_context_lines(),
            test_keywords: default_test_keywords(),
            utility_keywords: default_utility_keywords(),
            summarize_min_tokens: default_summarize_min_tokens(),
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: default_manifest_max_tokens(),
            max_files_per_dir: default_max_files_per_dir(),
        }
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            mode: default_annotation_mode(),
            types: default_annotation_types(),
            min_complexity: default_min_complexity(),
            min_priority: default_min_priority(),
            include_private: true,
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_days: default_window_days(),
            max_authors: default_max_authors(),
            timeout: default_git_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            timeout: default_summarizer_timeout(),
        }
    }
}

impl ProcessingProfile {
    /// Load a profile from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a profile from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| CondenseError::ConfigParse(e.to_string()))
    }

    /// Serialize back to TOML (used by `condense init --from-flags` style tooling)
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| CondenseError::ConfigParse(e.to_string()))
    }

    /// Write `.condense/profile.toml` and ignore `.condense/` in git.
    pub fn init(repo_root: &Path) -> crate::Result<PathBuf> {
        let state_dir = repo_root.join(STATE_DIR);
        let profile_path = state_dir.join(PROFILE_FILE);
        if profile_path.exists() {
            return Err(CondenseError::ConfigExists(profile_path));
        }
        fs::create_dir_all(&state_dir)?;
        fs::write(&profile_path, DEFAULT_PROFILE)?;
        update_gitignore(repo_root)?;
        Ok(profile_path)
    }

    /// The repository's own profile if it has one, else the defaults
    pub fn discover(repo_root: &Path) -> crate::Result<Self> {
        let profile_path = repo_root.join(STATE_DIR).join(PROFILE_FILE);
        if profile_path.exists() {
            Self::load(&profile_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject configurations that would silently produce a degraded run.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: String| Err(CondenseError::InvalidProfile(msg));

        if self.budget.total == 0 {
            return invalid("budget.total must be greater than zero".to_string());
        }
        if self.budget.max_file_tokens == 0 {
            return invalid("budget.max_file_tokens must be greater than zero".to_string());
        }
        if self.budget.model.trim().is_empty() {
            return invalid("budget.model must not be empty".to_string());
        }
        let min = self.selection.min_importance;
        if !min.is_finite() || !(0.0..=1.0).contains(&min) {
            return invalid(format!(
                "selection.min_importance must be within [0, 1], got {}",
                min
            ));
        }
        for (pattern, boost) in &self.selection.boost {
            if !boost.is_finite() {
                return invalid(format!("boost for '{}' is not a finite number", pattern));
            }
            globset::Glob::new(pattern)
                .map_err(|e| CondenseError::GlobPattern(format!("{}: {}", pattern, e)))?;
        }
        if self.truncation.header_lines == 0 {
            return invalid("truncation.header_lines must be at least 1".to_string());
        }
        for (field, value) in [
            ("git.timeout", &self.git.timeout),
            ("cache.ttl", &self.cache.ttl),
            ("summarizer.timeout", &self.summarizer.timeout),
        ] {
            if parse_duration(value).is_none() {
                return invalid(format!("{} is not a valid duration: '{}'", field, value));
            }
        }
        Ok(())
    }

    /// Cache TTL as Duration
    pub fn cache_ttl(&self) -> Duration {
        parse_duration(&self.cache.ttl).unwrap_or(Duration::from_secs(7 * 86400))
    }

    /// Git collaborator timeout as Duration
    pub fn git_timeout(&self) -> Duration {
        parse_duration(&self.git.timeout).unwrap_or(Duration::from_secs(5))
    }

    /// Summarizer collaborator timeout as Duration
    pub fn summarizer_timeout(&self) -> Duration {
        parse_duration(&self.summarizer.timeout).unwrap_or(Duration::from_secs(30))
    }

    /// The intent string, if one is configured
    pub fn intent(&self) -> Option<&str> {
        let intent = self.selection.intent.trim();
        (!intent.is_empty()).then_some(intent)
    }

    /// Hash of every field that changes per-file processing results.
    pub fn fingerprint(&self) -> String {
        let input = format!(
            "{}|{}|{:?}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.tokenizer_fingerprint(),
            self.budget.total,
            self.budget.max_file_tokens,
            self.truncation.strategy,
            self.selection.min_importance,
            self.selection.intent.trim(),
            self.truncation.header_lines,
            self.truncation.context_lines,
            self.truncation.test_keywords.join(","),
            self.truncation.utility_keywords.join(","),
            self.selection.max_file_bytes,
        );
        hash_hex(&input)
    }

    /// Hash of the fields that change raw token counts.
    pub fn tokenizer_fingerprint(&self) -> String {
        hash_hex(&format!("{}|{:?}", self.budget.model, self.budget.tokenizer))
    }
}

fn update_gitignore(repo_root: &Path) -> crate::Result<()> {
    let gitignore_path = repo_root.join(".gitignore");
    if gitignore_path.exists() {
        let content = fs::read_to_string(&gitignore_path)?;
        let present = content
            .lines()
            .any(|line| line.trim() == STATE_DIR || line.trim() == ".condense/");
        if !present {
            let mut file = fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# Condense state\n.condense/")?;
        }
    } else {
        fs::write(&gitignore_path, "# Condense state\n.condense/\n")?;
    }
    Ok(())
}

fn hash_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Parse duration string (e.g., "1h", "30m", "7d")
pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().ok()?;

    match unit {
        "s" => Some(Duration::from_secs(num)),
        "m" => Some(Duration::from_secs(num * 60)),
        "h" => Some(Duration::from_secs(num * 3600)),
        "d" => Some(Duration::from_secs(num * 86400)),
        _ => None,
    }
}
