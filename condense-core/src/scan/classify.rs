//! File classification tables

use crate::document::FileClass;
use regex::Regex;
use std::sync::LazyLock;

/// Bytes sampled for the binary heuristic
pub const BINARY_SAMPLE_BYTES: usize = 8192;
/// Ratio of non-text bytes above which a sample is binary
const NON_TEXT_RATIO: f64 = 0.30;

const BINARY_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "ico", "psd", "ai", "sketch", "fig", "xd",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "exe", "dll", "so", "dylib", "app", "deb",
    "rpm", "dmg", "iso", "apk", "jar", "war", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "mp4",
    "mp3", "wav", "avi", "mov", "mkv", "flac", "ttf", "otf", "woff", "woff2", "eot", "pyc", "pyo",
    "class", "o", "obj", "lib", "a", "db", "sqlite", "mdb", "bin", "dat", "wasm",
];

/// Canonical project files that should be included whenever possible
const CRITICAL_FILES: &[&str] = &[
    "README.md", "README.rst", "README.txt", "README", "setup.py", "setup.cfg",
    "pyproject.toml", "package.json", "requirements.txt", "Pipfile", "Gemfile", "Cargo.toml",
    "go.mod", "build.gradle", "pom.xml", "composer.json", "Dockerfile", "docker-compose.yml",
    "docker-compose.yaml", ".env.example", "Makefile", "CMakeLists.txt", "meson.build",
    "tsconfig.json", ".gitignore", ".dockerignore",
];

/// Dependency lock files: only ever rendered as a summary
const SUMMARIZE_FILES: &[&str] = &[
    "package-lock.json", "yarn.lock", "pnpm-lock.yaml", "poetry.lock", "Pipfile.lock",
    "Cargo.lock", "go.sum", "composer.lock", "Gemfile.lock", "pubspec.lock", "mix.lock",
    "requirements.lock", "pdm.lock", "uv.lock", ".terraform.lock.hcl",
];

/// Files with no value for a reader (compared case-insensitively)
const TRIVIAL_FILES: &[&str] = &[
    ".editorconfig", ".eslintignore", ".prettierignore", "thumbs.db", ".ds_store",
    "desktop.ini", "license", "license.md", "license.txt", "contributing.md",
    "code_of_conduct.md", ".gitkeep", ".gitattributes", ".npmignore", ".yarnignore",
    "authors", "credits", "notice", "patents", "version",
];

const GENERATED_MARKERS: &[&str] = &[
    "auto-generated",
    "automatically generated",
    "do not edit",
    "generated by",
    "this file is generated",
    "autogenerated",
    "machine generated",
    "/* generated",
    "@generated",
];

static GENERATED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\.generated\.|\.auto\.|\.g\.[a-z]+$|_pb2\.py$|\.pb\.go$|\.designer\.|\.min\.(?:js|css)$|\.bundle\.js$|\.map$)",
    )
    .expect("valid regex")
});

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn has_binary_extension(name: &str) -> bool {
    extension(name).is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_critical_name(name: &str) -> bool {
    CRITICAL_FILES.contains(&name)
}

pub fn is_summarizable_name(name: &str) -> bool {
    SUMMARIZE_FILES.contains(&name)
}

pub fn is_trivial_name(name: &str) -> bool {
    TRIVIAL_FILES.contains(&name.to_ascii_lowercase().as_str())
}

/// Null bytes, or more than 30% bytes outside the text set, mean binary.
pub fn is_binary_sample(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let non_text = sample.iter().filter(|&&b| !is_text_byte(b)).count();
    non_text as f64 / sample.len() as f64 > NON_TEXT_RATIO
}

fn is_text_byte(b: u8) -> bool {
    matches!(b, 7 | 8 | 9 | 10 | 12 | 13 | 27) || (b >= 0x20 && b != 0x7f)
}

pub fn is_generated(rel_path: &str, head: &str) -> bool {
    if GENERATED_PATH.is_match(rel_path) {
        return true;
    }
    head.lines().take(5).any(|line| {
        let line = line.to_lowercase();
        GENERATED_MARKERS.iter().any(|m| line.contains(m))
    })
}

/// Decide the closed classification once.
///
/// `sample` is the start of the file content; `None` when the file was not
/// read (oversized or trivial), in which case only name rules apply.
pub fn classify(rel_path: &str, sample: Option<&[u8]>) -> FileClass {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);

    if has_binary_extension(name) {
        return FileClass::Binary;
    }
    if let Some(sample) = sample {
        let sample = &sample[..sample.len().min(BINARY_SAMPLE_BYTES)];
        if is_binary_sample(sample) {
            return FileClass::Binary;
        }
    }
    if is_summarizable_name(name) {
        return FileClass::Summarizable;
    }
    if is_critical_name(name) {
        return FileClass::Critical;
    }
    let head = sample
        .map(|s| String::from_utf8_lossy(&s[..s.len().min(2048)]).into_owned())
        .unwrap_or_default();
    if is_generated(rel_path, &head) {
        return FileClass::Generated;
    }
    FileClass::Ordinary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_detection() {
        assert!(is_binary_sample(b"abc\0def"));
        assert!(!is_binary_sample(b"plain text\nwith lines\n"));
        let noisy: Vec<u8> = (0u8..=6).cycle().take(100).map(|b| b + 1).collect();
        assert!(is_binary_sample(&noisy));
        // Latin-1 and UTF-8 high bytes count as text
        assert!(!is_binary_sample("héllo wörld".as_bytes()));
        assert!(!is_binary_sample(b""));
    }

    #[test]
    fn test_classification_precedence() {
        assert_eq!(classify("logo.png", Some(b"text")), FileClass::Binary);
        assert_eq!(classify("package-lock.json", Some(b"{}")), FileClass::Summarizable);
        assert_eq!(classify("README.md", Some(b"# Hi")), FileClass::Critical);
        assert_eq!(classify("api/types.pb.go", Some(b"package api")), FileClass::Generated);
        assert_eq!(
            classify("src/schema.py", Some(b"# Code generated by protoc. DO NOT EDIT.\n")),
            FileClass::Generated
        );
        assert_eq!(classify("src/app.py", Some(b"import os\n")), FileClass::Ordinary);
        assert_eq!(classify("big.json", None), FileClass::Ordinary);
        assert_eq!(classify("dist/app.min.js", None), FileClass::Generated);
    }

    #[test]
    fn test_name_tables() {
        assert!(is_trivial_name("LICENSE"));
        assert!(is_trivial_name(".gitkeep"));
        assert!(!is_trivial_name("main.py"));
        assert!(is_critical_name("Cargo.toml"));
        assert!(is_summarizable_name("Cargo.lock"));
        assert!(!has_binary_extension(".gitignore"));
        assert!(has_binary_extension("photo.JPG"));
    }
}
