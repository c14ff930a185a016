//! Data model: scanned files and the entities found in them

use crate::report::SkipReason;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Detected source language (from the file extension or name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
    Kotlin,
    Scala,
    Swift,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Shell,
    Sql,
    Html,
    Css,
    Markdown,
    Json,
    Yaml,
    Toml,
    Xml,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name == "Dockerfile" || name == "Makefile" {
            return Some(Self::Shell);
        }
        let ext = path.extension().and_then(|e| e.to_str())?.to_ascii_lowercase();
        let lang = match ext.as_str() {
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "kt" | "kts" => Self::Kotlin,
            "scala" => Self::Scala,
            "swift" => Self::Swift,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Self::Cpp,
            "cs" => Self::CSharp,
            "rb" => Self::Ruby,
            "php" => Self::Php,
            "sh" | "bash" | "zsh" => Self::Shell,
            "sql" => Self::Sql,
            "html" | "htm" | "vue" | "svelte" => Self::Html,
            "css" | "scss" | "sass" | "less" => Self::Css,
            "md" | "markdown" | "rst" => Self::Markdown,
            "json" => Self::Json,
            "yml" | "yaml" => Self::Yaml,
            "toml" => Self::Toml,
            "xml" => Self::Xml,
            _ => return None,
        };
        Some(lang)
    }

    /// Human-readable name used in reports
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
            Self::TypeScript => "TypeScript",
            Self::Rust => "Rust",
            Self::Go => "Go",
            Self::Java => "Java",
            Self::Kotlin => "Kotlin",
            Self::Scala => "Scala",
            Self::Swift => "Swift",
            Self::C => "C",
            Self::Cpp => "C++",
            Self::CSharp => "C#",
            Self::Ruby => "Ruby",
            Self::Php => "PHP",
            Self::Shell => "Shell",
            Self::Sql => "SQL",
            Self::Html => "HTML",
            Self::Css => "CSS",
            Self::Markdown => "Markdown",
            Self::Json => "JSON",
            Self::Yaml => "YAML",
            Self::Toml => "TOML",
            Self::Xml => "XML",
        }
    }

    /// Languages that count toward the dominant-language vote
    pub fn is_programming(self) -> bool {
        !matches!(
            self,
            Self::Markdown | Self::Json | Self::Yaml | Self::Toml | Self::Xml | Self::Html | Self::Css
        )
    }

    /// Fence tag for code blocks in the output document
    pub fn fence(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::Scala => "scala",
            Self::Swift => "swift",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Shell => "bash",
            Self::Sql => "sql",
            Self::Html => "html",
            Self::Css => "css",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Xml => "xml",
        }
    }
}

/// Classification decided once per file during scanning.
///
/// Precedence when several rules match: Binary, Summarizable, Critical,
/// Generated, Ordinary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    Binary,
    Generated,
    Critical,
    Summarizable,
    Ordinary,
}

/// One scanned file
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    #[serde(skip)]
    pub path: PathBuf,
    /// Forward-slash path relative to the repository root
    pub rel_path: String,
    pub size: u64,
    pub class: FileClass,
    pub language: Option<Language>,
    pub fingerprint: String,
    pub line_count: usize,
    pub token_count: Option<usize>,
    #[serde(skip)]
    pub semantic: Option<SemanticData>,
    pub importance: f64,
    pub query_relevance: Option<f64>,
    /// Set when scanning already decided the file cannot be used
    pub skip: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_detail: Option<String>,
}

impl FileRecord {
    pub fn new(path: PathBuf, rel_path: String, size: u64, class: FileClass) -> Self {
        let language = Language::from_path(&path);
        Self {
            path,
            rel_path,
            size,
            class,
            language,
            fingerprint: String::new(),
            line_count: 0,
            token_count: None,
            semantic: None,
            importance: 0.0,
            query_relevance: None,
            skip: None,
            skip_detail: None,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.class == FileClass::Binary
    }

    pub fn is_generated(&self) -> bool {
        self.class == FileClass::Generated
    }

    pub fn is_critical(&self) -> bool {
        self.class == FileClass::Critical
    }

    pub fn is_summarizable(&self) -> bool {
        self.class == FileClass::Summarizable
    }

    pub fn file_name(&self) -> &str {
        self.rel_path.rsplit('/').next().unwrap_or(&self.rel_path)
    }

    /// Parent directory ("" for the root)
    pub fn dir(&self) -> &str {
        self.rel_path
            .rfind('/')
            .map(|i| &self.rel_path[..i])
            .unwrap_or("")
    }

    pub fn entities(&self) -> &[SemanticEntity] {
        self.semantic
            .as_ref()
            .map(|s| s.entities.as_slice())
            .unwrap_or(&[])
    }
}

/// Content fingerprint (hex sha256)
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Class,
    Function,
    Method,
    Interface,
    Type,
    Section,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Section => "section",
        }
    }

    /// Base importance weight of a declaration of this kind
    pub fn base_weight(self) -> f64 {
        match self {
            Self::Class => 0.8,
            Self::Function => 0.7,
            Self::Method | Self::Interface => 0.6,
            Self::Type | Self::Section => 0.5,
        }
    }
}

/// A declaration found inside one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEntity {
    pub name: String,
    /// `Parent.name` for members, otherwise the plain name
    pub qualified_name: String,
    pub kind: EntityKind,
    /// 1-indexed, inclusive
    pub start_line: usize,
    pub end_line: usize,
    pub importance: f64,
    pub doc: Option<String>,
    pub calls: Vec<String>,
    pub called_by: Vec<String>,
    pub complexity: u32,
    pub is_public: bool,
}

impl SemanticEntity {
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    pub fn connections(&self) -> usize {
        self.calls.len() + self.called_by.len()
    }
}

/// Simple size metrics for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub lines: usize,
    pub code_lines: usize,
    pub comment_lines: usize,
    pub blank_lines: usize,
    pub max_complexity: u32,
    /// Branch density: extra complexity per line of code
    pub complexity_score: f64,
}

/// TODO-style marker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarkerKind {
    Todo,
    Fixme,
    Hack,
    Xxx,
    Bug,
    Note,
}

impl MarkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::Fixme => "FIXME",
            Self::Hack => "HACK",
            Self::Xxx => "XXX",
            Self::Bug => "BUG",
            Self::Note => "NOTE",
        }
    }
}

/// A TODO/FIXME comment found in a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub line: usize,
    pub kind: MarkerKind,
    pub text: String,
}

/// Everything the analyzer extracts from one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticData {
    pub language: Option<Language>,
    pub entities: Vec<SemanticEntity>,
    pub imports: Vec<String>,
    /// 1-indexed lines holding import statements
    pub import_lines: Vec<usize>,
    pub metrics: FileMetrics,
    pub markers: Vec<Marker>,
    /// Whether entities came from a structural parser
    pub structural: bool,
}

impl SemanticData {
    pub fn entity(&self, name: &str) -> Option<&SemanticEntity> {
        self.entities
            .iter()
            .find(|e| e.name == name || e.qualified_name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_path(Path::new("README.md")), Some(Language::Markdown));
        assert_eq!(Language::from_path(Path::new("src/main.rs")), Some(Language::Rust));
        assert_eq!(Language::from_path(Path::new("app.tsx")), Some(Language::TypeScript));
        assert_eq!(Language::from_path(Path::new("x/Dockerfile")), Some(Language::Shell));
        assert_eq!(Language::from_path(Path::new("data.bin")), None);
        assert_eq!(Language::Cpp.display_name(), "C++");
    }

    #[test]
    fn test_record_paths() {
        let record = FileRecord::new(
            PathBuf::from("/repo/src/app/main.py"),
            "src/app/main.py".to_string(),
            10,
            FileClass::Ordinary,
        );
        assert_eq!(record.file_name(), "main.py");
        assert_eq!(record.dir(), "src/app");
        assert_eq!(record.language, Some(Language::Python));

        let root = FileRecord::new(
            PathBuf::from("/repo/README.md"),
            "README.md".to_string(),
            10,
            FileClass::Critical,
        );
        assert_eq!(root.dir(), "");
        assert!(root.is_critical());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
        assert_eq!(fingerprint(b"").len(), 64);
    }
}
