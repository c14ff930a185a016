//! Skip/truncation records and the structured run report

use crate::analysis::CodebaseAnalysis;
use crate::annotations::AnnotationExport;
use crate::cache::CacheStats;
use crate::tokens::BudgetStatistics;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a file is absent from the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable,
    Binary,
    Generated,
    Trivial,
    Oversized,
    BelowImportance,
    BudgetExhausted,
    /// Even the minimal rendering exceeds the granted sub-budget
    DoesNotFit,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unreadable => "unreadable",
            Self::Binary => "binary",
            Self::Generated => "generated",
            Self::Trivial => "trivial",
            Self::Oversized => "oversized",
            Self::BelowImportance => "below importance threshold",
            Self::BudgetExhausted => "budget exhausted",
            Self::DoesNotFit => "does not fit",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub path: String,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SkipRecord {
    pub fn new(path: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            path: path.into(),
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A file that was included in reduced form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncationRecord {
    pub path: String,
    pub strategy: String,
    pub original_tokens: usize,
    pub rendered_tokens: usize,
    pub omitted_lines: usize,
    pub omitted_bytes: usize,
}

/// A file included in the document, with its navigation offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludedFile {
    pub path: String,
    /// Token offset of the file block within the final document
    pub offset: usize,
    pub tokens: usize,
    pub importance: f64,
    pub truncated: bool,
}

/// Structured report of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub repository: String,
    pub profile: String,
    pub document_tokens: usize,
    pub included: Vec<IncludedFile>,
    pub truncated: Vec<TruncationRecord>,
    pub skipped: Vec<SkipRecord>,
    pub budget: BudgetStatistics,
    pub cache: CacheStats,
    pub codebase: CodebaseAnalysis,
    pub annotations: AnnotationExport,
    pub notes: Vec<String>,
}

impl RunReport {
    pub fn skip_reason(&self, path: &str) -> Option<SkipReason> {
        self.skipped.iter().find(|s| s.path == path).map(|s| s.reason)
    }

    pub fn truncation(&self, path: &str) -> Option<&TruncationRecord> {
        self.truncated.iter().find(|t| t.path == path)
    }

    pub fn is_included(&self, path: &str) -> bool {
        self.included.iter().any(|f| f.path == path)
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `1234567` -> `"1,234,567"`
pub fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_skip_reason_serializes_snake_case() {
        let record = SkipRecord::new("big.bin", SkipReason::BudgetExhausted);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"path":"big.bin","reason":"budget_exhausted"}"#);
        assert_eq!(SkipReason::BudgetExhausted.to_string(), "budget exhausted");
    }
}
