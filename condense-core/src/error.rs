//! Error types for condense operations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structured error payload printed by the CLI in `--json` mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }
}

impl From<&CondenseError> for ErrorEnvelope {
    fn from(err: &CondenseError) -> Self {
        let (code, hint) = match err {
            CondenseError::InvalidProfile(_) | CondenseError::UnknownStrategy(_) => (
                "invalid_profile",
                "Fix the profile value and run again",
            ),
            CondenseError::ConfigParse(_) => ("config_parse", "Check the profile TOML syntax"),
            CondenseError::ConfigExists(_) => {
                ("config_exists", "Edit the existing profile instead")
            }
            CondenseError::GlobPattern(_) => {
                ("glob_pattern", "Check exclude/boost patterns in the profile")
            }
            CondenseError::RootNotFound(_) => {
                ("root_not_found", "Pass an existing repository directory")
            }
            CondenseError::Cancelled => ("cancelled", "The run was cancelled; nothing was written"),
            CondenseError::Io(_) => ("io_error", "Check file permissions and disk space"),
            CondenseError::Cache(_) => ("cache_error", "Run with --no-cache or delete .condense/cache.db"),
            CondenseError::Serialization(_) => ("serialization_error", ""),
        };
        Self::new(code, err.to_string(), hint)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CondenseError {
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Unknown truncation strategy: {0} (expected semantic, basic, business_logic or middle_summarize)")]
    UnknownStrategy(String),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Profile already exists at {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("Glob pattern error: {0}")]
    GlobPattern(String),

    #[error("Repository root not found or not a directory: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache database error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CondenseError {
    /// Configuration errors are raised before scanning starts.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidProfile(_)
                | Self::UnknownStrategy(_)
                | Self::ConfigParse(_)
                | Self::GlobPattern(_)
        )
    }
}
