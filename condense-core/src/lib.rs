//! Condense Core - budget-constrained repository condensation
//!
//! Scans a source tree, ranks its files, and assembles the most important
//! content into a single document that fits a token budget, with a
//! navigable manifest and an audit trail of everything left out.

pub mod analysis;
pub mod annotations;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod git;
pub mod manifest;
pub mod parse;
pub mod pipeline;
mod process;
pub mod report;
pub mod scan;
pub mod scoring;
pub mod summarize;
pub mod tokens;
pub mod truncate;

pub use analysis::CodebaseAnalysis;
pub use annotations::{Annotation, AnnotationCollector, AnnotationExport, AnnotationKind, Priority};
pub use cache::{CacheHandle, CacheStats};
pub use config::{
    AnnotationMode, ProcessingProfile, TokenizerKind, TruncationStrategy, DEFAULT_PROFILE,
};
pub use document::{EntityKind, FileClass, FileRecord, Language, SemanticData, SemanticEntity};
pub use error::{CondenseError, ErrorEnvelope};
pub use git::{FileHistory, GitCli, GitHistory, TimeoutGit};
pub use pipeline::{CancellationToken, PackOutput, Phase, Pipeline, ProgressFn, Ranking};
pub use report::{IncludedFile, RunReport, SkipReason, SkipRecord, TruncationRecord};
pub use summarize::{CommandSummarizer, Summarizer, TimeoutSummarizer};
pub use tokens::{TokenBudget, TokenBudgetManager, Tokenizer};
pub use truncate::ContentTruncator;

/// Result type alias for condense operations
pub type Result<T> = std::result::Result<T, CondenseError>;
