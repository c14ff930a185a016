//! Read-only git history lookups through the `git` CLI.

use crate::config::GitConfig;
use crate::process::{call_bounded, run_bounded};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info};

/// History facts about one file (or one line of it)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHistory {
    pub last_author: String,
    /// `YYYY-MM-DD`
    pub last_date: String,
    pub last_hash: String,
    pub last_message: String,
    /// Commits touching the path within the configured window
    pub change_frequency: usize,
    pub recent_authors: Vec<String>,
}

/// History collaborator. Implementations never fail loudly: anything that
/// goes wrong is `None`.
pub trait GitHistory: Send + Sync {
    /// History of `rel_path`; with `line`, the last modification is the one
    /// that touched that line.
    fn history(&self, rel_path: &str, line: Option<usize>) -> Option<FileHistory>;

    /// HEAD commit of the repository
    fn head_commit(&self) -> Option<String>;
}

/// `git` CLI collaborator with every call bounded by a timeout
pub struct GitCli {
    root: PathBuf,
    timeout: Duration,
    window_days: u32,
    max_authors: usize,
}

impl GitCli {
    /// `None` when `root` is not inside a work tree or git is unavailable.
    pub fn detect(root: &Path, config: &GitConfig, timeout: Duration) -> Option<Self> {
        let cli = Self {
            root: root.to_path_buf(),
            timeout,
            window_days: config.window_days,
            max_authors: config.max_authors,
        };
        let inside = cli.git(&["rev-parse", "--is-inside-work-tree"])?;
        if inside.trim() != "true" {
            return None;
        }
        info!(root = %root.display(), "git history available");
        Some(cli)
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let mut command = Command::new("git");
        command.arg("-C").arg(&self.root).args(args);
        run_bounded(command, None, self.timeout)
    }

    fn last_change(&self, rel_path: &str) -> Option<(String, String, String, String)> {
        let out = self.git(&["log", "-1", "--format=%an|%ai|%h|%s", "--", rel_path])?;
        let mut parts = out.trim().splitn(4, '|');
        let author = parts.next()?.to_string();
        let date = parts.next()?.chars().take(10).collect();
        let hash = parts.next()?.to_string();
        let message = parts.next().unwrap_or("").to_string();
        if author.is_empty() {
            return None;
        }
        Some((author, date, hash, message))
    }

    fn blame_line(&self, rel_path: &str, line: usize) -> Option<(String, String, String, String)> {
        let range = format!("{},{}", line, line);
        let out = self.git(&["blame", "--porcelain", "-L", &range, "--", rel_path])?;
        parse_porcelain(&out)
    }

    fn change_frequency(&self, rel_path: &str) -> usize {
        let since = format!("--since={} days ago", self.window_days);
        self.git(&["log", &since, "--format=%h", "--", rel_path])
            .map(|out| out.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0)
    }

    fn recent_authors(&self, rel_path: &str) -> Vec<String> {
        let Some(out) = self.git(&["log", "-n", "50", "--format=%an", "--", rel_path]) else {
            return Vec::new();
        };
        let mut authors: Vec<String> = Vec::new();
        for name in out.lines().map(str::trim).filter(|n| !n.is_empty()) {
            if !authors.iter().any(|a| a == name) {
                authors.push(name.to_string());
            }
            if authors.len() == self.max_authors {
                break;
            }
        }
        authors
    }
}

impl GitHistory for GitCli {
    fn history(&self, rel_path: &str, line: Option<usize>) -> Option<FileHistory> {
        let last = match line {
            Some(line) => self.blame_line(rel_path, line),
            None => self.last_change(rel_path),
        };
        let Some((last_author, last_date, last_hash, last_message)) = last else {
            debug!(path = rel_path, "no git history");
            return None;
        };
        Some(FileHistory {
            last_author,
            last_date,
            last_hash,
            last_message,
            change_frequency: self.change_frequency(rel_path),
            recent_authors: self.recent_authors(rel_path),
        })
    }

    fn head_commit(&self) -> Option<String> {
        self.git(&["rev-parse", "HEAD"])
            .map(|out| out.trim().to_string())
            .filter(|sha| !sha.is_empty())
    }
}

/// Bounds an injected history collaborator with a timeout.
pub struct TimeoutGit {
    inner: Arc<dyn GitHistory>,
    timeout: Duration,
}

impl TimeoutGit {
    pub fn new(inner: Arc<dyn GitHistory>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl GitHistory for TimeoutGit {
    fn history(&self, rel_path: &str, line: Option<usize>) -> Option<FileHistory> {
        let inner = Arc::clone(&self.inner);
        let rel_path = rel_path.to_string();
        call_bounded("git", self.timeout, move || inner.history(&rel_path, line)).flatten()
    }

    fn head_commit(&self) -> Option<String> {
        let inner = Arc::clone(&self.inner);
        call_bounded("git", self.timeout, move || inner.head_commit()).flatten()
    }
}

/// Author, date, short hash and summary from `git blame --porcelain`
fn parse_porcelain(out: &str) -> Option<(String, String, String, String)> {
    let mut lines = out.lines();
    let hash: String = lines.next()?.split_whitespace().next()?.chars().take(7).collect();
    let mut author = None;
    let mut date = None;
    let mut summary = String::new();
    for line in lines {
        if let Some(name) = line.strip_prefix("author ") {
            author = Some(name.to_string());
        } else if let Some(ts) = line.strip_prefix("author-time ") {
            date = ts
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
                .map(|dt| dt.date().to_string());
        } else if let Some(text) = line.strip_prefix("summary ") {
            summary = text.to_string();
        } else if line.starts_with('\t') {
            break;
        }
    }
    Some((author?, date.unwrap_or_default(), hash, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Stalled;

    impl GitHistory for Stalled {
        fn history(&self, _rel_path: &str, _line: Option<usize>) -> Option<FileHistory> {
            std::thread::sleep(Duration::from_secs(2));
            None
        }

        fn head_commit(&self) -> Option<String> {
            std::thread::sleep(Duration::from_secs(2));
            Some("abc".to_string())
        }
    }

    #[test]
    fn test_timeout_git_gives_up() {
        let git = TimeoutGit::new(Arc::new(Stalled), Duration::from_millis(50));
        assert!(git.history("src/lib.rs", None).is_none());
        assert!(git.head_commit().is_none());
    }

    #[test]
    fn test_detect_outside_repository() {
        let dir = TempDir::new().unwrap();
        let config = GitConfig::default();
        assert!(GitCli::detect(dir.path(), &config, Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_parse_porcelain() {
        let out = "4f2a9c1e0b7d 3 3 1\n\
                   author Ada Lovelace\n\
                   author-mail <ada@example.com>\n\
                   author-time 1704067200\n\
                   author-tz +0000\n\
                   summary Fix the engine\n\
                   filename src/engine.py\n\
                   \tdef run():\n";
        let (author, date, hash, summary) = parse_porcelain(out).unwrap();
        assert_eq!(author, "Ada Lovelace");
        assert_eq!(date, "2024-01-01");
        assert_eq!(hash, "4f2a9c1");
        assert_eq!(summary, "Fix the engine");
        assert!(parse_porcelain("").is_none());
    }
}
