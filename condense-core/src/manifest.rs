//! Hierarchical table of contents with token offsets into the document.

use crate::analysis::CodebaseAnalysis;
use crate::config::ManifestConfig;
use crate::document::{EntityKind, FileRecord};
use crate::parse::simple_name;
use crate::report::thousands;
use crate::tokens::Tokenizer;
use std::collections::{BTreeMap, BTreeSet};

/// Entity names listed per file
const MAX_ENTITY_NAMES: usize = 5;
/// Entities whose call relations are summarized per file
const MAX_CALL_SUMMARIES: usize = 3;
/// Names per call/called-by list
const MAX_CALL_NAMES: usize = 5;

/// Directory name -> purpose
const DIRECTORY_PURPOSES: &[(&str, &str)] = &[
    ("components", "UI Components"),
    ("pages", "Application Pages/Routes"),
    ("views", "View Templates"),
    ("models", "Data Models"),
    ("controllers", "Request Controllers"),
    ("services", "Business Logic Services"),
    ("utils", "Utility Functions"),
    ("helpers", "Helper Functions"),
    ("config", "Configuration"),
    ("api", "API Endpoints"),
    ("routes", "Route Definitions"),
    ("middleware", "Middleware"),
    ("tests", "Test Files"),
    ("test", "Test Files"),
    ("__tests__", "Test Files"),
    ("spec", "Test Specifications"),
    ("docs", "Documentation"),
    ("scripts", "Build/Utility Scripts"),
    ("styles", "Stylesheets"),
    ("css", "Stylesheets"),
    ("assets", "Static Assets"),
    ("static", "Static Files"),
    ("public", "Public Assets"),
    ("lib", "Library Code"),
    ("vendor", "Third-party Code"),
    ("migrations", "Database Migrations"),
    ("fixtures", "Test Fixtures"),
    ("hooks", "Hooks"),
    ("store", "State Management"),
    ("types", "Type Definitions"),
    ("cmd", "Command Entry Points"),
    ("internal", "Internal Packages"),
    ("src", "Source Code"),
];

/// Lowercase file name -> purpose
const SPECIAL_FILES: &[(&str, &str)] = &[
    ("readme.md", "Project documentation"),
    ("readme", "Project documentation"),
    ("changelog.md", "Release history"),
    ("contributing.md", "Contribution guidelines"),
    ("package.json", "Node.js package configuration"),
    ("tsconfig.json", "TypeScript configuration"),
    ("cargo.toml", "Rust package manifest"),
    ("pyproject.toml", "Python project configuration"),
    ("setup.py", "Python package setup"),
    ("requirements.txt", "Python dependencies"),
    ("go.mod", "Go module definition"),
    ("pom.xml", "Maven build configuration"),
    ("build.gradle", "Gradle build configuration"),
    ("gemfile", "Ruby dependencies"),
    ("composer.json", "PHP dependencies"),
    ("dockerfile", "Container build definition"),
    ("docker-compose.yml", "Container orchestration"),
    ("docker-compose.yaml", "Container orchestration"),
    ("makefile", "Build automation"),
    (".env.example", "Environment variable template"),
    ("main.py", "Application entry point"),
    ("app.py", "Application entry point"),
    ("manage.py", "Django management script"),
    ("main.rs", "Binary entry point"),
    ("lib.rs", "Library root"),
    ("main.go", "Application entry point"),
    ("index.js", "Module entry point"),
    ("index.ts", "Module entry point"),
];

/// One file as placed in the document
#[derive(Debug, Clone, Copy)]
pub struct ManifestFile<'a> {
    pub record: &'a FileRecord,
    /// Token offset of the file block
    pub offset: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    Full,
    Compact,
}

pub struct ManifestGenerator<'a> {
    config: &'a ManifestConfig,
    tokenizer: &'a Tokenizer,
}

impl<'a> ManifestGenerator<'a> {
    pub fn new(config: &'a ManifestConfig, tokenizer: &'a Tokenizer) -> Self {
        Self { config, tokenizer }
    }

    /// Render the manifest within `limit` tokens, degrading detail before
    /// dropping directories. `None` when not even the overview fits.
    pub fn render(
        &self,
        analysis: &CodebaseAnalysis,
        files: &[ManifestFile<'_>],
        annotations: &str,
        limit: usize,
    ) -> Option<String> {
        let limit = limit.min(self.config.max_tokens);
        let head = overview(analysis, files.len());
        if self.tokenizer.count(&head) > limit {
            return None;
        }

        let known = known_names(files);
        let groups = group_by_dir(files);
        let annotations = if annotations.trim().is_empty() {
            String::new()
        } else {
            format!("## Annotations\n\n{}\n", annotations.trim_end())
        };

        for detail in [Detail::Full, Detail::Compact] {
            let sections: Vec<String> = groups
                .iter()
                .map(|(dir, members)| self.directory_section(dir, members, &known, detail))
                .collect();
            let candidate = assemble(&head, &sections, &annotations, 0);
            if self.tokenizer.count(&candidate) <= limit {
                return Some(candidate);
            }
        }

        // Drop trailing directories (and the annotation digest) until it fits
        let sections: Vec<String> = groups
            .iter()
            .map(|(dir, members)| self.directory_section(dir, members, &known, Detail::Compact))
            .collect();
        for keep in (0..sections.len()).rev() {
            let candidate = assemble(&head, &sections[..keep], "", sections.len() - keep);
            if self.tokenizer.count(&candidate) <= limit {
                return Some(candidate);
            }
        }
        None
    }

    fn directory_section(
        &self,
        dir: &str,
        members: &[&ManifestFile<'_>],
        known: &BTreeSet<&str>,
        detail: Detail,
    ) -> String {
        let mut out = String::new();
        if dir.is_empty() {
            out.push_str("### ./\n");
        } else {
            out.push_str(&format!("### {}/\n", dir));
        }
        if let Some(purpose) = directory_purpose(dir, members) {
            out.push_str(&format!("Purpose: {}\n", purpose));
        }
        out.push('\n');

        let mut ranked: Vec<&ManifestFile<'_>> = members.to_vec();
        ranked.sort_by(|a, b| {
            b.record
                .importance
                .total_cmp(&a.record.importance)
                .then(a.record.rel_path.cmp(&b.record.rel_path))
        });
        let limit = self.config.max_files_per_dir.max(1);
        for file in ranked.iter().take(limit) {
            out.push_str(&file_entry(file, known, detail));
        }
        if ranked.len() > limit {
            out.push_str(&format!("- ... and {} more files\n", ranked.len() - limit));
        }
        out
    }
}

fn overview(analysis: &CodebaseAnalysis, included: usize) -> String {
    let mut out = String::from("# Project Manifest\n\n## Overview\n");
    out.push_str(&format!("- Project type: {}\n", analysis.project_type));
    if let Some(lang) = &analysis.primary_language {
        out.push_str(&format!("- Primary language: {}\n", lang));
    }
    if !analysis.frameworks.is_empty() {
        let frameworks: Vec<&str> = analysis.frameworks.iter().map(String::as_str).collect();
        out.push_str(&format!("- Frameworks: {}\n", frameworks.join(", ")));
    }
    out.push_str(&format!(
        "- Files included: {} of {}\n\n",
        included, analysis.total_files
    ));
    out.push_str(
        "## Navigation Guide\n\
         Each entry gives the token offset at which the file's block starts in this document.\n\
         Files are ordered by importance; truncated files are marked.\n\n",
    );
    out
}

fn assemble(head: &str, sections: &[String], annotations: &str, dropped: usize) -> String {
    let mut out = String::from(head);
    out.push_str("## Directory Structure\n\n");
    for section in sections {
        out.push_str(section);
        out.push('\n');
    }
    if dropped > 0 {
        out.push_str(&format!("_{} more directories not listed_\n\n", dropped));
    }
    out.push_str(annotations);
    out
}

fn group_by_dir<'f, 'r>(files: &'f [ManifestFile<'r>]) -> BTreeMap<&'r str, Vec<&'f ManifestFile<'r>>> {
    let mut groups: BTreeMap<&str, Vec<&ManifestFile<'_>>> = BTreeMap::new();
    for file in files {
        groups.entry(file.record.dir()).or_default().push(file);
    }
    groups
}

/// Entity names of every file in the document
fn known_names<'r>(files: &[ManifestFile<'r>]) -> BTreeSet<&'r str> {
    let mut names = BTreeSet::new();
    for file in files {
        for entity in file.record.entities() {
            names.insert(entity.name.as_str());
            names.insert(entity.qualified_name.as_str());
        }
    }
    names
}

fn directory_purpose(dir: &str, members: &[&ManifestFile<'_>]) -> Option<&'static str> {
    if dir.is_empty() {
        return Some("Project root directory");
    }
    let name = dir.rsplit('/').next().unwrap_or(dir).to_ascii_lowercase();
    if let Some((_, purpose)) = DIRECTORY_PURPOSES.iter().find(|(n, _)| *n == name) {
        return Some(purpose);
    }

    let names: Vec<String> = members
        .iter()
        .map(|m| m.record.file_name().to_ascii_lowercase())
        .collect();
    if names
        .iter()
        .all(|n| n.starts_with("test_") || n.contains("_test.") || n.contains(".test.") || n.contains(".spec."))
    {
        return Some("Test Files");
    }
    let styles = names
        .iter()
        .filter(|n| n.ends_with(".css") || n.ends_with(".scss") || n.ends_with(".less"))
        .count();
    if styles * 2 > names.len() {
        return Some("Stylesheets");
    }
    None
}

fn file_purpose(record: &FileRecord) -> String {
    let name = record.file_name().to_ascii_lowercase();
    if let Some((_, purpose)) = SPECIAL_FILES.iter().find(|(n, _)| *n == name) {
        return purpose.to_string();
    }
    if record.is_summarizable() {
        return "Dependency lock file (summarized)".to_string();
    }

    let entities = record.entities();
    let classes: Vec<&str> = entities
        .iter()
        .filter(|e| matches!(e.kind, EntityKind::Class | EntityKind::Interface))
        .map(|e| e.name.as_str())
        .collect();
    let functions = entities
        .iter()
        .filter(|e| matches!(e.kind, EntityKind::Function | EntityKind::Method))
        .count();
    match classes.as_slice() {
        [only] => return format!("Contains {} class", only),
        [first, rest @ ..] => return format!("Contains {} and {} more classes", first, rest.len()),
        [] => {}
    }
    if functions > 0 {
        let plural = if functions == 1 { "" } else { "s" };
        return format!("{} function{}", functions, plural);
    }
    match record.language {
        Some(lang) => format!("{} file", lang.display_name()),
        None => "File".to_string(),
    }
}

fn file_entry(file: &ManifestFile<'_>, known: &BTreeSet<&str>, detail: Detail) -> String {
    let record = file.record;
    let marker = if file.truncated { ", truncated" } else { "" };
    let mut out = format!(
        "- `{}` (offset {}{}): {}\n",
        record.file_name(),
        thousands(file.offset),
        marker,
        file_purpose(record)
    );
    if detail == Detail::Compact {
        return out;
    }

    let mut entities: Vec<_> = record.entities().iter().collect();
    entities.sort_by(|a, b| {
        b.importance
            .total_cmp(&a.importance)
            .then(a.start_line.cmp(&b.start_line))
    });
    if !entities.is_empty() {
        let names: Vec<&str> = entities
            .iter()
            .take(MAX_ENTITY_NAMES)
            .map(|e| e.qualified_name.as_str())
            .collect();
        out.push_str(&format!("  - Key entities: {}\n", names.join(", ")));
    }

    let mut connected: Vec<_> = entities.into_iter().filter(|e| e.connections() > 0).collect();
    connected.sort_by(|a, b| {
        b.connections()
            .cmp(&a.connections())
            .then(a.start_line.cmp(&b.start_line))
    });
    for entity in connected.into_iter().take(MAX_CALL_SUMMARIES) {
        let calls = present(&entity.calls, known);
        let called_by = present(&entity.called_by, known);
        let mut parts = Vec::new();
        if !calls.is_empty() {
            parts.push(format!("calls {}", calls.join(", ")));
        }
        if !called_by.is_empty() {
            parts.push(format!("called by {}", called_by.join(", ")));
        }
        if !parts.is_empty() {
            out.push_str(&format!("  - `{}` {}\n", entity.qualified_name, parts.join("; ")));
        }
    }
    out
}

/// Names that resolve to an entity in the document, directly or through
/// their last segment (`self.helper`, `g.greet`)
fn present<'n>(names: &'n [String], known: &BTreeSet<&str>) -> Vec<&'n str> {
    names
        .iter()
        .map(String::as_str)
        .filter(|n| known.contains(n) || known.contains(simple_name(n)))
        .take(MAX_CALL_NAMES)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FileClass, SemanticData, SemanticEntity};
    use std::path::PathBuf;

    fn entity(name: &str, kind: EntityKind, calls: &[&str], called_by: &[&str]) -> SemanticEntity {
        SemanticEntity {
            name: name.to_string(),
            qualified_name: name.to_string(),
            kind,
            start_line: 1,
            end_line: 5,
            importance: 0.5,
            doc: None,
            calls: calls.iter().map(|s| s.to_string()).collect(),
            called_by: called_by.iter().map(|s| s.to_string()).collect(),
            complexity: 1,
            is_public: true,
        }
    }

    fn record(rel: &str, importance: f64, entities: Vec<SemanticEntity>) -> FileRecord {
        let mut record = FileRecord::new(PathBuf::from(rel), rel.to_string(), 100, FileClass::Ordinary);
        record.importance = importance;
        record.semantic = Some(SemanticData {
            entities,
            ..SemanticData::default()
        });
        record
    }

    fn analysis() -> CodebaseAnalysis {
        CodebaseAnalysis {
            total_files: 3,
            project_type: "Python project".to_string(),
            primary_language: Some("Python".to_string()),
            ..CodebaseAnalysis::default()
        }
    }

    #[test]
    fn test_groups_directories_with_offsets() {
        let readme = record("README.md", 0.9, Vec::new());
        let service = record(
            "services/billing.py",
            0.7,
            vec![
                entity("charge", EntityKind::Function, &["print", "audit"], &[]),
                entity("audit", EntityKind::Function, &[], &["charge"]),
            ],
        );
        let files = vec![
            ManifestFile { record: &readme, offset: 120, truncated: false },
            ManifestFile { record: &service, offset: 1500, truncated: true },
        ];
        let config = ManifestConfig::default();
        let tokenizer = Tokenizer::Heuristic;
        let manifest = ManifestGenerator::new(&config, &tokenizer)
            .render(&analysis(), &files, "", 10_000)
            .unwrap();

        assert!(manifest.starts_with("# Project Manifest"));
        assert!(manifest.contains("### ./\nPurpose: Project root directory"));
        assert!(manifest.contains("- `README.md` (offset 120): Project documentation"));
        assert!(manifest.contains("### services/\nPurpose: Business Logic Services"));
        assert!(manifest.contains("- `billing.py` (offset 1,500, truncated): 2 functions"));
        // `print` is not an entity in the document
        assert!(manifest.contains("  - `charge` calls audit\n"));
        assert!(manifest.contains("  - `audit` called by charge\n"));
    }

    #[test]
    fn test_receiver_calls_resolve_by_last_segment() {
        let greeter = record(
            "greeter.py",
            0.7,
            vec![
                entity("run", EntityKind::Function, &["g.greet", "self.helper", "os.getcwd"], &[]),
                entity("greet", EntityKind::Method, &[], &["run"]),
                entity("helper", EntityKind::Method, &[], &["run"]),
            ],
        );
        let files = vec![ManifestFile { record: &greeter, offset: 0, truncated: false }];
        let config = ManifestConfig::default();
        let tokenizer = Tokenizer::Heuristic;
        let manifest = ManifestGenerator::new(&config, &tokenizer)
            .render(&analysis(), &files, "", 10_000)
            .unwrap();

        assert!(manifest.contains("  - `run` calls g.greet, self.helper\n"));
    }

    #[test]
    fn test_degrades_to_fit_ceiling() {
        let records: Vec<FileRecord> = (0..40)
            .map(|i| {
                record(
                    &format!("pkg{:02}/module.py", i),
                    0.5,
                    vec![entity("Handler", EntityKind::Class, &[], &[])],
                )
            })
            .collect();
        let files: Vec<ManifestFile<'_>> = records
            .iter()
            .map(|r| ManifestFile { record: r, offset: 0, truncated: false })
            .collect();
        let config = ManifestConfig::default();
        let tokenizer = Tokenizer::Heuristic;
        let generator = ManifestGenerator::new(&config, &tokenizer);

        let manifest = generator.render(&analysis(), &files, "", 400).unwrap();
        assert!(tokenizer.count(&manifest) <= 400);
        assert!(manifest.contains("more directories not listed"));
        assert!(!manifest.contains("Key entities"));

        assert!(generator.render(&analysis(), &files, "", 10).is_none());
    }

    #[test]
    fn test_content_fallback_purpose() {
        let a = record("checks/test_a.py", 0.2, Vec::new());
        let b = record("checks/b_test.py", 0.2, Vec::new());
        let files = [
            ManifestFile { record: &a, offset: 0, truncated: false },
            ManifestFile { record: &b, offset: 0, truncated: false },
        ];
        let members: Vec<&ManifestFile<'_>> = files.iter().collect();
        assert_eq!(directory_purpose("checks", &members), Some("Test Files"));
        assert_eq!(directory_purpose("src/lib", &members[..1]), Some("Library Code"));
        let other = record("misc/thing.py", 0.2, Vec::new());
        let other_file = ManifestFile { record: &other, offset: 0, truncated: false };
        assert_eq!(directory_purpose("misc", &[&other_file]), None);
    }
}
