//! Project-level facts aggregated from the ranked file set.

use crate::document::FileRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Files kept in `key_files`
const KEY_FILES: usize = 20;

/// Marker file name -> frameworks it implies
const MARKER_FILES: &[(&str, &[&str])] = &[
    ("package.json", &["Node.js", "npm"]),
    ("yarn.lock", &["Yarn"]),
    ("pnpm-lock.yaml", &["pnpm"]),
    ("requirements.txt", &["Python"]),
    ("setup.py", &["Python"]),
    ("pyproject.toml", &["Python", "Poetry"]),
    ("manage.py", &["Django"]),
    ("Cargo.toml", &["Rust"]),
    ("go.mod", &["Go"]),
    ("build.gradle", &["Java", "Gradle"]),
    ("pom.xml", &["Java", "Maven"]),
    ("composer.json", &["PHP", "Composer"]),
    ("Gemfile", &["Ruby", "Bundler"]),
    ("pubspec.yaml", &["Flutter"]),
    ("angular.json", &["Angular"]),
    ("vue.config.js", &["Vue.js"]),
    ("nuxt.config.js", &["Nuxt", "Vue.js"]),
    ("next.config.js", &["Next.js", "React"]),
    ("next.config.mjs", &["Next.js", "React"]),
    ("gatsby-config.js", &["Gatsby", "React"]),
    ("svelte.config.js", &["Svelte"]),
];

/// Root import module -> framework
const IMPORT_FRAMEWORKS: &[(&str, &str)] = &[
    ("react", "React"),
    ("react-native", "React Native"),
    ("vue", "Vue.js"),
    ("svelte", "Svelte"),
    ("@angular", "Angular"),
    ("express", "Express"),
    ("fastify", "Fastify"),
    ("koa", "Koa"),
    ("flask", "Flask"),
    ("django", "Django"),
    ("fastapi", "FastAPI"),
    ("actix_web", "Actix Web"),
    ("axum", "Axum"),
];

const FRONTEND: &[&str] = &["Angular", "React", "Vue.js", "Svelte"];
const NODE_BACKEND: &[&str] = &["Express", "Fastify", "Koa"];
const PYTHON_WEB: &[&str] = &["Django", "Flask", "FastAPI"];
const MOBILE: &[&str] = &["React Native", "Flutter", "Ionic"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct CodebaseStatistics {
    pub binary_files: usize,
    pub generated_files: usize,
    pub critical_files: usize,
    pub total_tokens: usize,
    pub avg_file_size: u64,
}

/// Aggregated project facts
#[derive(Debug, Clone, Default, Serialize)]
pub struct CodebaseAnalysis {
    pub total_files: usize,
    pub total_size: u64,
    /// Display name -> file count
    pub languages: BTreeMap<String, usize>,
    /// Extension (with dot) -> file count
    pub file_types: BTreeMap<String, usize>,
    pub primary_language: Option<String>,
    pub frameworks: BTreeSet<String>,
    pub project_type: String,
    pub key_files: Vec<String>,
    pub statistics: CodebaseStatistics,
}

impl CodebaseAnalysis {
    /// Pure function of the file set
    pub fn analyze(files: &[FileRecord]) -> Self {
        let mut analysis = Self {
            total_files: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
            ..Self::default()
        };

        let mut programming: BTreeMap<&str, usize> = BTreeMap::new();
        for file in files {
            if let Some(lang) = file.language {
                *analysis
                    .languages
                    .entry(lang.display_name().to_string())
                    .or_insert(0) += 1;
                if lang.is_programming() {
                    *programming.entry(lang.display_name()).or_insert(0) += 1;
                }
            }
            if let Some(ext) = extension(file.file_name()) {
                *analysis.file_types.entry(ext).or_insert(0) += 1;
            }

            for (marker, frameworks) in MARKER_FILES {
                if file.file_name() == *marker {
                    analysis
                        .frameworks
                        .extend(frameworks.iter().map(|f| f.to_string()));
                }
            }
            if let Some(semantic) = &file.semantic {
                for import in &semantic.imports {
                    let root = import_root(import);
                    if let Some((_, framework)) =
                        IMPORT_FRAMEWORKS.iter().find(|(module, _)| *module == root)
                    {
                        analysis.frameworks.insert(framework.to_string());
                    }
                }
            }
        }

        analysis.primary_language = dominant(&programming)
            .or_else(|| {
                let all: BTreeMap<&str, usize> = analysis
                    .languages
                    .iter()
                    .map(|(k, v)| (k.as_str(), *v))
                    .collect();
                dominant(&all)
            })
            .map(str::to_string);
        analysis.project_type = project_type(&analysis.frameworks, analysis.primary_language.as_deref());

        let mut ranked: Vec<&FileRecord> = files.iter().collect();
        ranked.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then(a.rel_path.cmp(&b.rel_path))
        });
        analysis.key_files = ranked
            .iter()
            .take(KEY_FILES)
            .map(|f| f.rel_path.clone())
            .collect();

        analysis.statistics = CodebaseStatistics {
            binary_files: files.iter().filter(|f| f.is_binary()).count(),
            generated_files: files.iter().filter(|f| f.is_generated()).count(),
            critical_files: files.iter().filter(|f| f.is_critical()).count(),
            total_tokens: files.iter().filter_map(|f| f.token_count).sum(),
            avg_file_size: if files.is_empty() {
                0
            } else {
                analysis.total_size / files.len() as u64
            },
        };
        analysis
    }
}

/// Highest count; ties go to the alphabetically first name
fn dominant<'a>(counts: &BTreeMap<&'a str, usize>) -> Option<&'a str> {
    counts
        .iter()
        .fold(None, |best: Option<(&'a str, usize)>, (name, count)| match best {
            Some((_, best_count)) if best_count >= *count => best,
            _ => Some((name, *count)),
        })
        .map(|(name, _)| name)
}

fn project_type(frameworks: &BTreeSet<String>, primary: Option<&str>) -> String {
    let has_any = |names: &[&str]| names.iter().any(|n| frameworks.contains(*n));
    if has_any(MOBILE) {
        "Mobile application".to_string()
    } else if has_any(FRONTEND) {
        "Frontend web application".to_string()
    } else if frameworks.contains("Node.js") && has_any(NODE_BACKEND) {
        "Backend web application".to_string()
    } else if primary == Some("Python") && has_any(PYTHON_WEB) {
        "Python web application".to_string()
    } else if let Some(lang) = primary {
        format!("{} project", lang)
    } else {
        "Software project".to_string()
    }
}

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| format!(".{}", ext.to_ascii_lowercase()))
}

/// `react-dom/client` -> `react-dom`, `flask.views` -> `flask`
fn import_root(import: &str) -> &str {
    let import = import.trim();
    if let Some(scoped) = import.strip_prefix('@') {
        let end = scoped.find('/').map(|i| i + 1).unwrap_or(import.len());
        return &import[..end];
    }
    import
        .split(['/', '.', ':', ',', ' '])
        .next()
        .unwrap_or(import)
}
