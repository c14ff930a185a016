//! Annotations: small typed facts about files, rendered inline next to file
//! content or as a digest in the manifest.

use crate::config::AnnotationConfig;
use crate::document::{MarkerKind, SemanticData};
use crate::git::FileHistory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Entities longer than this get a `loc` quality metric
const MAX_ENTITY_LINES: usize = 200;
/// Entries in the "Architecture Insights" digest
const DIGEST_CONNECTED: usize = 10;
/// Files changed more often than this appear in the digest
const FREQUENT_CHANGE_THRESHOLD: usize = 10;
/// Entries in each export insight list
const EXPORT_TOP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnotationKind {
    CallGraphNode,
    GitInsight,
    TodoItem,
    QualityMetric,
}

impl AnnotationKind {
    pub const ALL: [AnnotationKind; 4] = [
        Self::CallGraphNode,
        Self::GitInsight,
        Self::TodoItem,
        Self::QualityMetric,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CallGraphNode => "CALL_GRAPH_NODE",
            Self::GitInsight => "GIT_INSIGHT",
            Self::TodoItem => "TODO_ITEM",
            Self::QualityMetric => "QUALITY_METRIC",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Priority of a TODO-style marker
    pub fn for_marker(kind: MarkerKind) -> Self {
        match kind {
            MarkerKind::Fixme | MarkerKind::Bug | MarkerKind::Xxx => Self::High,
            MarkerKind::Todo | MarkerKind::Hack => Self::Medium,
            MarkerKind::Note => Self::Low,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Warning at the threshold, error at twice the threshold
    fn for_value(value: f64, threshold: f64) -> Self {
        if value >= threshold * 2.0 {
            Self::Error
        } else if value >= threshold {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

/// One annotation attached to a file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Annotation {
    CallGraphNode {
        file: String,
        entity: String,
        entity_type: String,
        calls: Vec<String>,
        called_by: Vec<String>,
        #[serde(skip)]
        is_public: bool,
    },
    GitInsight {
        file: String,
        last_mod_date: String,
        last_mod_author: String,
        last_commit: String,
        commit_hash: String,
        change_frequency: usize,
        window_days: u32,
        recent_contributors: Vec<String>,
    },
    TodoItem {
        file: String,
        line: usize,
        todo_type: MarkerKind,
        text: String,
        priority: Priority,
    },
    QualityMetric {
        file: String,
        entity: String,
        metric: String,
        value: f64,
        threshold: f64,
        severity: Severity,
    },
}

impl Annotation {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Self::CallGraphNode { .. } => AnnotationKind::CallGraphNode,
            Self::GitInsight { .. } => AnnotationKind::GitInsight,
            Self::TodoItem { .. } => AnnotationKind::TodoItem,
            Self::QualityMetric { .. } => AnnotationKind::QualityMetric,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            Self::CallGraphNode { file, .. }
            | Self::GitInsight { file, .. }
            | Self::TodoItem { file, .. }
            | Self::QualityMetric { file, .. } => file,
        }
    }

    /// High-priority TODOs and error-severity metrics
    pub fn is_high_priority(&self) -> bool {
        matches!(
            self,
            Self::TodoItem {
                priority: Priority::High,
                ..
            } | Self::QualityMetric {
                severity: Severity::Error,
                ..
            }
        )
    }

    /// Call-graph degree; zero for other kinds
    pub fn connections(&self) -> usize {
        match self {
            Self::CallGraphNode {
                calls, called_by, ..
            } => calls.len() + called_by.len(),
            _ => 0,
        }
    }

    fn change_frequency(&self) -> usize {
        match self {
            Self::GitInsight {
                change_frequency, ..
            } => *change_frequency,
            _ => 0,
        }
    }

    /// One-line bracketed block, e.g. `[TODO_ITEM file="a.py" line="3" ...]`
    pub fn render(&self) -> String {
        match self {
            Self::CallGraphNode {
                file,
                entity,
                entity_type,
                calls,
                called_by,
                ..
            } => format!(
                "[CALL_GRAPH_NODE file=\"{}\" entity=\"{}\" type=\"{}\" calls='{}' called_by='{}']",
                file,
                entity,
                entity_type,
                json_list(calls),
                json_list(called_by)
            ),
            Self::GitInsight {
                file,
                last_mod_date,
                last_mod_author,
                last_commit,
                commit_hash,
                change_frequency,
                window_days,
                recent_contributors,
            } => format!(
                "[GIT_INSIGHT file=\"{}\" last_mod_date=\"{}\" last_mod_author=\"{}\" last_commit=\"{}\" commit_hash=\"{}\" change_frequency_{}d=\"{}\" recent_contributors='{}']",
                file,
                last_mod_date,
                escape(last_mod_author),
                escape(last_commit),
                commit_hash,
                window_days,
                change_frequency,
                json_list(recent_contributors)
            ),
            Self::TodoItem {
                file,
                line,
                todo_type,
                text,
                priority,
            } => format!(
                "[TODO_ITEM file=\"{}\" line=\"{}\" type=\"{}\" text=\"{}\" priority=\"{}\"]",
                file,
                line,
                todo_type.as_str(),
                escape(text),
                priority.as_str()
            ),
            Self::QualityMetric {
                file,
                entity,
                metric,
                value,
                threshold,
                severity,
            } => format!(
                "[QUALITY_METRIC file=\"{}\" entity=\"{}\" metric=\"{}\" value=\"{}\" threshold=\"{}\" severity=\"{}\"]",
                file,
                entity,
                metric,
                value,
                threshold,
                severity.as_str()
            ),
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('"', "\\\"")
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnotationSummary {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedEntity {
    pub entity: String,
    pub file: String,
    pub connections: usize,
    pub calls: usize,
    pub called_by: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangedFile {
    pub file: String,
    pub changes: usize,
    pub last_author: String,
    pub last_date: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnotationInsights {
    pub high_priority_count: usize,
    pub most_connected: Vec<ConnectedEntity>,
    pub most_changed: Vec<ChangedFile>,
}

/// Machine-readable export of every collected annotation
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnotationExport {
    pub summary: AnnotationSummary,
    pub annotations: Vec<Annotation>,
    pub insights: AnnotationInsights,
}

/// Collects annotations for the files that make it into the document.
pub struct AnnotationCollector {
    config: AnnotationConfig,
    annotations: Vec<Annotation>,
}

impl AnnotationCollector {
    pub fn new(config: &AnnotationConfig) -> Self {
        Self {
            config: config.clone(),
            annotations: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.mode.inline() || self.config.mode.manifest()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Position to roll back to if a file turns out not to be included
    pub fn checkpoint(&self) -> usize {
        self.annotations.len()
    }

    pub fn rollback(&mut self, checkpoint: usize) {
        self.annotations.truncate(checkpoint);
    }

    /// Whether `annotation` passes the enabled-kind list and the filters
    pub fn accepts(&self, annotation: &Annotation) -> bool {
        if !self.is_enabled() || !self.config.types.contains(&annotation.kind()) {
            return false;
        }
        match annotation {
            Annotation::QualityMetric { metric, value, .. } => {
                metric != "cyclomatic_complexity" || *value >= self.config.min_complexity as f64
            }
            Annotation::TodoItem { priority, .. } => *priority >= self.config.min_priority,
            Annotation::CallGraphNode { is_public, .. } => self.config.include_private || *is_public,
            Annotation::GitInsight { .. } => true,
        }
    }

    /// Add one annotation; silently dropped unless accepted
    pub fn add(&mut self, annotation: Annotation) {
        if self.accepts(&annotation) {
            self.annotations.push(annotation);
        }
    }

    /// Derive TODO, call-graph and quality annotations from analysis data.
    pub fn collect_file(&mut self, rel_path: &str, semantic: &SemanticData) {
        if !self.is_enabled() {
            return;
        }
        for marker in &semantic.markers {
            self.add(Annotation::TodoItem {
                file: rel_path.to_string(),
                line: marker.line,
                todo_type: marker.kind,
                text: marker.text.clone(),
                priority: Priority::for_marker(marker.kind),
            });
        }

        let threshold = self.config.min_complexity.max(1) as f64;
        for entity in &semantic.entities {
            if entity.connections() > 0 {
                self.add(Annotation::CallGraphNode {
                    file: rel_path.to_string(),
                    entity: entity.qualified_name.clone(),
                    entity_type: entity.kind.as_str().to_string(),
                    calls: entity.calls.clone(),
                    called_by: entity.called_by.clone(),
                    is_public: entity.is_public,
                });
            }
            if entity.complexity > 1 {
                let value = entity.complexity as f64;
                self.add(Annotation::QualityMetric {
                    file: rel_path.to_string(),
                    entity: entity.qualified_name.clone(),
                    metric: "cyclomatic_complexity".to_string(),
                    value,
                    threshold,
                    severity: Severity::for_value(value, threshold),
                });
            }
            if entity.line_count() > MAX_ENTITY_LINES {
                self.add(Annotation::QualityMetric {
                    file: rel_path.to_string(),
                    entity: entity.qualified_name.clone(),
                    metric: "loc".to_string(),
                    value: entity.line_count() as f64,
                    threshold: MAX_ENTITY_LINES as f64,
                    severity: Severity::Warning,
                });
            }
        }
    }

    pub fn add_history(&mut self, rel_path: &str, history: FileHistory, window_days: u32) {
        self.add(Annotation::GitInsight {
            file: rel_path.to_string(),
            last_mod_date: history.last_date,
            last_mod_author: history.last_author,
            last_commit: history.last_message,
            commit_hash: history.last_hash,
            change_frequency: history.change_frequency,
            window_days,
            recent_contributors: history.recent_authors,
        });
    }

    /// Rendered annotations for one file, empty unless inline mode is on
    pub fn inline(&self, rel_path: &str) -> Vec<String> {
        if !self.config.mode.inline() {
            return Vec::new();
        }
        self.annotations
            .iter()
            .filter(|a| a.file() == rel_path)
            .map(Annotation::render)
            .collect()
    }

    /// Digest for the manifest: high-priority items, quality warnings, the
    /// most connected call-graph nodes, then frequently changed files.
    pub fn manifest_section(&self) -> String {
        if !self.config.mode.manifest() {
            return String::new();
        }
        let mut sections: Vec<String> = Vec::new();

        let high: Vec<&Annotation> =
            self.annotations.iter().filter(|a| a.is_high_priority()).collect();
        push_section(&mut sections, "High Priority Items", &high);

        let warnings: Vec<&Annotation> = self
            .annotations
            .iter()
            .filter(|a| {
                matches!(
                    a,
                    Annotation::QualityMetric {
                        severity: Severity::Warning,
                        ..
                    }
                )
            })
            .collect();
        push_section(&mut sections, "Code Quality Warnings", &warnings);

        let mut nodes = self.of_kind(AnnotationKind::CallGraphNode);
        nodes.sort_by_key(|a| std::cmp::Reverse(a.connections()));
        nodes.truncate(DIGEST_CONNECTED);
        push_section(&mut sections, "Architecture Insights", &nodes);

        let mut frequent: Vec<&Annotation> = self
            .of_kind(AnnotationKind::GitInsight)
            .into_iter()
            .filter(|a| a.change_frequency() > FREQUENT_CHANGE_THRESHOLD)
            .collect();
        frequent.sort_by_key(|a| std::cmp::Reverse(a.change_frequency()));
        push_section(&mut sections, "Frequently Changed Files", &frequent);

        sections.join("\n")
    }

    pub fn export(&self) -> AnnotationExport {
        let mut by_type = BTreeMap::new();
        for annotation in &self.annotations {
            *by_type.entry(annotation.kind().to_string()).or_insert(0) += 1;
        }

        let mut nodes = self.of_kind(AnnotationKind::CallGraphNode);
        nodes.sort_by_key(|a| std::cmp::Reverse(a.connections()));
        let most_connected = nodes
            .into_iter()
            .take(EXPORT_TOP)
            .filter_map(|a| match a {
                Annotation::CallGraphNode {
                    file,
                    entity,
                    calls,
                    called_by,
                    ..
                } => Some(ConnectedEntity {
                    entity: entity.clone(),
                    file: file.clone(),
                    connections: calls.len() + called_by.len(),
                    calls: calls.len(),
                    called_by: called_by.len(),
                }),
                _ => None,
            })
            .collect();

        let mut insights = self.of_kind(AnnotationKind::GitInsight);
        insights.sort_by_key(|a| std::cmp::Reverse(a.change_frequency()));
        let most_changed = insights
            .into_iter()
            .take(EXPORT_TOP)
            .filter_map(|a| match a {
                Annotation::GitInsight {
                    file,
                    change_frequency,
                    last_mod_author,
                    last_mod_date,
                    ..
                } => Some(ChangedFile {
                    file: file.clone(),
                    changes: *change_frequency,
                    last_author: last_mod_author.clone(),
                    last_date: last_mod_date.clone(),
                }),
                _ => None,
            })
            .collect();

        AnnotationExport {
            summary: AnnotationSummary {
                total: self.annotations.len(),
                by_type,
            },
            annotations: self.annotations.clone(),
            insights: AnnotationInsights {
                high_priority_count: self
                    .annotations
                    .iter()
                    .filter(|a| a.is_high_priority())
                    .count(),
                most_connected,
                most_changed,
            },
        }
    }

    fn of_kind(&self, kind: AnnotationKind) -> Vec<&Annotation> {
        self.annotations.iter().filter(|a| a.kind() == kind).collect()
    }
}

fn push_section(sections: &mut Vec<String>, title: &str, items: &[&Annotation]) {
    if items.is_empty() {
        return;
    }
    sections.push(format!("### {}", title));
    sections.extend(items.iter().map(|a| a.render()));
    sections.push(String::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnnotationMode;
    use crate::document::{EntityKind, Marker, SemanticEntity};

    fn config(mode: AnnotationMode) -> AnnotationConfig {
        AnnotationConfig {
            mode,
            ..AnnotationConfig::default()
        }
    }

    fn entity(name: &str, complexity: u32, calls: &[&str], called_by: &[&str]) -> SemanticEntity {
        SemanticEntity {
            name: name.to_string(),
            qualified_name: name.to_string(),
            kind: EntityKind::Function,
            start_line: 1,
            end_line: 10,
            importance: 0.7,
            doc: None,
            calls: calls.iter().map(|s| s.to_string()).collect(),
            called_by: called_by.iter().map(|s| s.to_string()).collect(),
            complexity,
            is_public: !name.starts_with('_'),
        }
    }

    fn semantic() -> SemanticData {
        SemanticData {
            entities: vec![
                entity("run", 45, &["_helper"], &[]),
                entity("_helper", 12, &[], &["run"]),
                entity("simple", 1, &[], &[]),
            ],
            markers: vec![
                Marker {
                    line: 3,
                    kind: MarkerKind::Fixme,
                    text: "breaks on \"quotes\"".to_string(),
                },
                Marker {
                    line: 9,
                    kind: MarkerKind::Note,
                    text: "slow path".to_string(),
                },
            ],
            ..SemanticData::default()
        }
    }

    #[test]
    fn test_collect_file_produces_all_kinds() {
        let mut collector = AnnotationCollector::new(&config(AnnotationMode::Both));
        collector.collect_file("app.py", &semantic());
        let kinds: Vec<AnnotationKind> = collector.annotations().iter().map(|a| a.kind()).collect();
        assert_eq!(kinds.iter().filter(|k| **k == AnnotationKind::TodoItem).count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == AnnotationKind::CallGraphNode).count(), 2);
        // "simple" has complexity 1 and no metric
        assert_eq!(kinds.iter().filter(|k| **k == AnnotationKind::QualityMetric).count(), 2);
    }

    #[test]
    fn test_filters() {
        let mut cfg = config(AnnotationMode::Inline);
        cfg.min_priority = Priority::Medium;
        cfg.min_complexity = 20;
        cfg.include_private = false;
        let mut collector = AnnotationCollector::new(&cfg);
        collector.collect_file("app.py", &semantic());

        let rendered = collector.inline("app.py");
        assert!(rendered.iter().any(|r| r.starts_with("[TODO_ITEM") && r.contains("FIXME")));
        assert!(!rendered.iter().any(|r| r.contains("NOTE")));
        assert!(!rendered.iter().any(|r| r.contains("entity=\"_helper\"")));
        assert!(rendered
            .iter()
            .any(|r| r.starts_with("[QUALITY_METRIC") && r.contains("severity=\"error\"")));
        assert!(collector.inline("other.py").is_empty());
    }

    #[test]
    fn test_disabled_kinds_and_off_mode() {
        let mut cfg = config(AnnotationMode::Inline);
        cfg.types = vec![AnnotationKind::TodoItem];
        let mut collector = AnnotationCollector::new(&cfg);
        collector.collect_file("app.py", &semantic());
        assert!(collector
            .annotations()
            .iter()
            .all(|a| a.kind() == AnnotationKind::TodoItem));

        let mut off = AnnotationCollector::new(&config(AnnotationMode::Off));
        off.collect_file("app.py", &semantic());
        assert!(off.annotations().is_empty());
    }

    #[test]
    fn test_render_escapes_and_serializes_lists() {
        let mut collector = AnnotationCollector::new(&config(AnnotationMode::Inline));
        collector.collect_file("app.py", &semantic());
        let rendered = collector.inline("app.py");
        assert!(rendered.contains(
            &"[TODO_ITEM file=\"app.py\" line=\"3\" type=\"FIXME\" text=\"breaks on \\\"quotes\\\"\" priority=\"high\"]"
                .to_string()
        ));
        assert!(rendered.contains(
            &"[CALL_GRAPH_NODE file=\"app.py\" entity=\"run\" type=\"function\" calls='[\"_helper\"]' called_by='[]']"
                .to_string()
        ));
    }

    #[test]
    fn test_manifest_section_and_export() {
        let mut collector = AnnotationCollector::new(&config(AnnotationMode::Manifest));
        collector.collect_file("app.py", &semantic());
        collector.add_history(
            "app.py",
            FileHistory {
                last_author: "dev".to_string(),
                last_date: "2024-01-01".to_string(),
                last_hash: "abc1234".to_string(),
                last_message: "tweak".to_string(),
                change_frequency: 12,
                recent_authors: vec!["dev".to_string()],
            },
            90,
        );
        assert!(collector.inline("app.py").is_empty());

        let section = collector.manifest_section();
        let high = section.find("### High Priority Items").unwrap();
        let warnings = section.find("### Code Quality Warnings").unwrap();
        let arch = section.find("### Architecture Insights").unwrap();
        let frequent = section.find("### Frequently Changed Files").unwrap();
        assert!(high < warnings && warnings < arch && arch < frequent);

        let export = collector.export();
        assert_eq!(export.summary.total, collector.annotations().len());
        assert_eq!(export.summary.by_type.get("TODO_ITEM"), Some(&2));
        // FIXME plus the complexity-45 metric
        assert_eq!(export.insights.high_priority_count, 2);
        assert_eq!(export.insights.most_connected.len(), 2);
        assert_eq!(export.insights.most_changed[0].changes, 12);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["annotations"][0]["type"], "TODO_ITEM");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert_eq!(Priority::for_marker(MarkerKind::Bug), Priority::High);
        assert_eq!("MEDIUM".parse::<Priority>().unwrap(), Priority::Medium);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
