//! Directory walking with gitignore-style exclusions.

use crate::CondenseError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Repository-level ignore file read in addition to .gitignore
pub const IGNORE_FILE: &str = ".condenseignore";

/// Always excluded, before any user pattern
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    ".condense/",
    ".hg/",
    ".svn/",
    "node_modules/",
    "target/",
    "__pycache__/",
    ".venv/",
    "venv/",
    "dist/",
    "build/",
    ".next/",
    ".nuxt/",
    ".idea/",
    ".vscode/",
    "*.egg-info/",
    ".DS_Store",
];

/// Compile default and profile patterns into one gitignore matcher.
///
/// Patterns use gitignore syntax, so negation (`!keep.md`), anchoring
/// (`/build`) and directory-only rules (`logs/`) behave as users expect.
pub fn build_exclusions(root: &Path, patterns: &[String]) -> crate::Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in DEFAULT_EXCLUDES {
        builder
            .add_line(None, pattern)
            .map_err(|e| CondenseError::GlobPattern(e.to_string()))?;
    }
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| CondenseError::GlobPattern(format!("{}: {}", pattern, e)))?;
    }
    builder
        .build()
        .map_err(|e| CondenseError::GlobPattern(e.to_string()))
}

/// Walk `root` and return files in deterministic (name-sorted) order.
/// Excluded directories are pruned before they are opened.
pub fn walk_files(root: &Path, exclusions: Arc<Gitignore>) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder.hidden(false);
    builder.git_ignore(true);
    builder.git_global(false);
    builder.git_exclude(true);
    builder.require_git(false);
    builder.parents(false);
    builder.add_custom_ignore_filename(IGNORE_FILE);
    builder.sort_by_file_name(|a, b| a.cmp(b));

    let matcher = Arc::clone(&exclusions);
    builder.filter_entry(move |entry| {
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        !matcher.matched(entry.path(), is_dir).is_ignore()
    });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unwalkable entry");
                continue;
            }
        };
        if entry.file_type().is_some_and(|t| t.is_file()) {
            files.push(entry.into_path());
        }
    }
    files
}

/// Forward-slash path relative to `root`
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("logs")).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("src/main.py"), "print(1)").unwrap();
        fs::write(root.join("src/gen.py"), "x = 1").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join("logs/out.log"), "x").unwrap();
        fs::write(root.join("docs/a.md"), "# a").unwrap();
        fs::write(root.join("docs/keep.md"), "# keep").unwrap();
        fs::write(root.join("README.md"), "# r").unwrap();
        dir
    }

    fn walk(root: &Path, patterns: &[&str]) -> Vec<String> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        let exclusions = Arc::new(build_exclusions(root, &patterns).unwrap());
        walk_files(root, exclusions)
            .iter()
            .map(|p| relative_path(root, p))
            .collect()
    }

    #[test]
    fn test_default_excludes_and_sorting() {
        let dir = setup();
        let files = walk(dir.path(), &[]);
        assert_eq!(
            files,
            vec![
                "README.md",
                "docs/a.md",
                "docs/keep.md",
                "logs/out.log",
                "src/gen.py",
                "src/main.py"
            ]
        );
    }

    #[test]
    fn test_gitignore_and_condenseignore() {
        let dir = setup();
        fs::write(dir.path().join(".gitignore"), "logs/\n").unwrap();
        fs::write(dir.path().join(IGNORE_FILE), "src/gen.py\n").unwrap();
        let files = walk(dir.path(), &[]);
        assert!(!files.iter().any(|f| f.starts_with("logs/")));
        assert!(!files.contains(&"src/gen.py".to_string()));
        assert!(files.contains(&".gitignore".to_string()));
    }

    #[test]
    fn test_profile_patterns_with_negation() {
        let dir = setup();
        let files = walk(dir.path(), &["docs/*.md", "!docs/keep.md"]);
        assert!(!files.contains(&"docs/a.md".to_string()));
        assert!(files.contains(&"docs/keep.md".to_string()));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = build_exclusions(dir.path(), &["src/[".to_string()]).unwrap_err();
        assert!(matches!(err, CondenseError::GlobPattern(_)));
    }
}
