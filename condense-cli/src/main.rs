//! Condense CLI - pack a repository into one token-budgeted document

use clap::{Args, Parser, Subcommand};
use condense_core::config::{CACHE_FILE, STATE_DIR};
use condense_core::{
    AnnotationMode, CacheHandle, CommandSummarizer, CondenseError, ErrorEnvelope, Phase, Pipeline,
    ProcessingProfile, ProgressFn, TokenizerKind, TruncationStrategy,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "condense")]
#[command(about = "Condense a repository into a single token-budgeted document", long_about = None)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug); CONDENSE_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .condense/profile.toml
    Init {
        /// Repository root (detected when omitted)
        root: Option<PathBuf>,
    },

    /// Build the condensed document
    Pack {
        #[command(flatten)]
        run: RunArgs,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the structured JSON report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// External summarizer: receives a chunk on stdin, prints a summary
        #[arg(long, env = "CONDENSE_SUMMARIZER_CMD")]
        summarizer_cmd: Option<String>,
    },

    /// Rank files and show skip reasons without assembling a document
    Scan {
        #[command(flatten)]
        run: RunArgs,

        /// Show at most this many ranked files
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Repository root (detected when omitted)
    root: Option<PathBuf>,

    /// Profile TOML (default: .condense/profile.toml, else built-in defaults)
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Keep the cache in memory only
    #[arg(long)]
    no_cache: bool,

    #[command(flatten)]
    overrides: Overrides,
}

/// Command-line overrides applied on top of the profile
#[derive(Args)]
struct Overrides {
    /// Total token budget
    #[arg(long)]
    budget: Option<usize>,

    /// Target model identifier
    #[arg(long)]
    model: Option<String>,

    /// Truncation strategy: semantic, basic, business_logic, middle_summarize
    #[arg(long)]
    strategy: Option<String>,

    /// Token counter
    #[arg(long, value_parser = ["auto", "tiktoken", "heuristic"])]
    tokenizer: Option<String>,

    /// Additional gitignore-style exclusion (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Importance boost for a glob (repeatable)
    #[arg(long, value_name = "PATTERN:VALUE")]
    boost: Vec<String>,

    /// Describe the planned task to bias ranking
    #[arg(long)]
    intent: Option<String>,

    /// Skip files scoring below this importance
    #[arg(long)]
    min_importance: Option<f64>,

    /// Disable the manifest
    #[arg(long)]
    no_manifest: bool,

    /// Enable git history insights
    #[arg(long)]
    git: bool,

    /// Annotation mode: off, inline, manifest, both
    #[arg(long, value_name = "MODE")]
    annotations: Option<String>,
}

impl Overrides {
    fn apply(&self, profile: &mut ProcessingProfile) -> condense_core::Result<()> {
        if let Some(budget) = self.budget {
            profile.budget.total = budget;
        }
        if let Some(model) = &self.model {
            profile.budget.model = model.clone();
        }
        if let Some(strategy) = &self.strategy {
            profile.truncation.strategy = strategy.parse::<TruncationStrategy>()?;
        }
        if let Some(tokenizer) = &self.tokenizer {
            profile.budget.tokenizer = match tokenizer.as_str() {
                "tiktoken" => TokenizerKind::Tiktoken,
                "heuristic" => TokenizerKind::Heuristic,
                _ => TokenizerKind::Auto,
            };
        }
        profile.selection.exclude.extend(self.exclude.iter().cloned());
        for spec in &self.boost {
            let (pattern, value) = spec.rsplit_once(':').ok_or_else(|| {
                CondenseError::InvalidProfile(format!("boost '{}' must be PATTERN:VALUE", spec))
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                CondenseError::InvalidProfile(format!("boost value '{}' is not a number", value))
            })?;
            profile.selection.boost.insert(pattern.to_string(), value);
        }
        if let Some(intent) = &self.intent {
            profile.selection.intent = intent.clone();
        }
        if let Some(min) = self.min_importance {
            profile.selection.min_importance = min;
        }
        if self.no_manifest {
            profile.manifest.enabled = false;
        }
        if self.git {
            profile.git.enabled = true;
        }
        if let Some(mode) = &self.annotations {
            profile.annotations.mode = mode.parse::<AnnotationMode>()?;
        }
        Ok(())
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { root } => cmd_init(root, cli.json),
        Commands::Pack {
            run,
            output,
            report,
            summarizer_cmd,
        } => cmd_pack(run, output, report, summarizer_cmd, cli.json),
        Commands::Scan { run, limit } => cmd_scan(run, limit, cli.json),
    };

    if let Err(e) = result {
        if cli.json {
            let envelope = ErrorEnvelope::from(&e);
            match serde_json::to_string_pretty(&envelope) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("Error: {}", e),
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("CONDENSE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_init(root: Option<PathBuf>, json: bool) -> condense_core::Result<()> {
    use colored::Colorize;

    let repo_root = detect_repo_root(root)?;
    let path = ProcessingProfile::init(&repo_root)?;

    if json {
        let out = serde_json::json!({ "profile": path, "gitignore_updated": true });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{} {}/profile.toml", "Created".green(), STATE_DIR);
        println!("{} {}/ to .gitignore", "Added".green(), STATE_DIR);
    }
    Ok(())
}

/// Repository root, profile (with overrides) and cache for one command
fn prepare(run: &RunArgs) -> condense_core::Result<(PathBuf, ProcessingProfile, CacheHandle)> {
    let repo_root = detect_repo_root(run.root.clone())?;
    if !repo_root.is_dir() {
        return Err(CondenseError::RootNotFound(repo_root));
    }
    let mut profile = match &run.profile {
        Some(path) => ProcessingProfile::load(path)?,
        None => ProcessingProfile::discover(&repo_root)?,
    };
    run.overrides.apply(&mut profile)?;
    profile.validate()?;

    let cache = if run.no_cache {
        CacheHandle::in_memory(profile.cache_ttl())
    } else {
        let db_path = repo_root.join(STATE_DIR).join(CACHE_FILE);
        match CacheHandle::open(&db_path, profile.cache_ttl()) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "cache unavailable, continuing without persistence");
                CacheHandle::in_memory(profile.cache_ttl())
            }
        }
    };
    Ok((repo_root, profile, cache))
}

fn cmd_pack(
    run: RunArgs,
    output: Option<PathBuf>,
    report_path: Option<PathBuf>,
    summarizer_cmd: Option<String>,
    json: bool,
) -> condense_core::Result<()> {
    use colored::Colorize;

    let (repo_root, profile, cache) = prepare(&run)?;
    let timeout = profile.summarizer_timeout();
    let mut pipeline = Pipeline::new(&repo_root, profile, &cache);
    if let Some(summarizer) = summarizer_cmd
        .as_deref()
        .and_then(|cmd| CommandSummarizer::new(cmd, timeout))
    {
        pipeline = pipeline.with_summarizer(Arc::new(summarizer));
    }
    if !json {
        pipeline = pipeline.with_progress(stderr_progress());
    }

    let packed = pipeline.run()?;
    if let Err(e) = cache.flush() {
        warn!(error = %e, "cache flush failed");
    }

    if let Some(path) = &output {
        write_file(path, &packed.document)?;
    }
    if let Some(path) = &report_path {
        write_file(path, &packed.report.to_json()?)?;
    }

    let report = &packed.report;
    if json {
        let out = match &output {
            Some(_) => serde_json::to_value(report)?,
            None => serde_json::json!({ "document": packed.document, "report": report }),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if output.is_none() {
        print!("{}", packed.document);
        std::io::stdout().flush()?;
    }
    let budget = &report.budget;
    eprintln!(
        "{}: {} files ({} truncated), {} tokens of {} ({:.1}%)",
        "Packed".green(),
        report.included.len(),
        report.truncated.len(),
        report.document_tokens,
        budget.total,
        budget.utilization * 100.0
    );
    if !report.skipped.is_empty() {
        eprintln!("{}: {} files", "Skipped".yellow(), report.skipped.len());
    }
    for note in &report.notes {
        eprintln!("{}: {}", "Note".yellow(), note);
    }
    if let Some(path) = &output {
        eprintln!("{} {}", "Wrote".green(), path.display().to_string().cyan());
    }
    Ok(())
}

fn cmd_scan(run: RunArgs, limit: usize, json: bool) -> condense_core::Result<()> {
    use colored::Colorize;

    let (repo_root, profile, cache) = prepare(&run)?;
    let ranking = Pipeline::new(&repo_root, profile, &cache).rank()?;
    if let Err(e) = cache.flush() {
        warn!(error = %e, "cache flush failed");
    }
    let analysis = condense_core::CodebaseAnalysis::analyze(&ranking.files);

    if json {
        let out = serde_json::json!({
            "scanned": ranking.scanned,
            "files": ranking.files,
            "skipped": ranking.skipped,
            "codebase": analysis,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{}: {} files, {} ranked, {} skipped",
        "Scanned".green(),
        ranking.scanned,
        ranking.files.len(),
        ranking.skipped.len()
    );
    println!("{}: {}", "Project".cyan(), analysis.project_type);
    for file in ranking.files.iter().take(limit) {
        let tokens = file
            .token_count
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:.2}  {:>8}  {}", file.importance, tokens, file.rel_path);
    }
    if ranking.files.len() > limit {
        println!("  {}", format!("... {} more", ranking.files.len() - limit).dimmed());
    }
    for skip in &ranking.skipped {
        println!("  {} {} ({})", "skip".yellow(), skip.path, skip.reason);
    }
    Ok(())
}

/// Phase progress on stderr, one line per phase
fn stderr_progress() -> ProgressFn {
    let last: Mutex<Option<Phase>> = Mutex::new(None);
    Arc::new(move |phase, current, total| {
        let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
        if *last != Some(phase) {
            if last.is_some() {
                eprintln!();
            }
            *last = Some(phase);
        }
        if phase == Phase::Done {
            return;
        }
        eprint!("\r{:<11} {}/{}", phase.as_str(), current, total);
    })
}

fn write_file(path: &Path, content: &str) -> condense_core::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

fn detect_repo_root(override_path: Option<PathBuf>) -> condense_core::Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    // Walk up from the current directory looking for .condense or .git
    let mut current = std::env::current_dir()?;
    loop {
        if current.join(STATE_DIR).exists() || current.join(".git").exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Ok(std::env::current_dir()?);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(args: &[&str]) -> Overrides {
        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            overrides: Overrides,
        }
        let mut argv = vec!["condense"];
        argv.extend_from_slice(args);
        Wrapper::parse_from(argv).overrides
    }

    #[test]
    fn test_overrides_apply() {
        let mut profile = ProcessingProfile::default();
        overrides(&[
            "--budget",
            "20000",
            "--strategy",
            "business-logic",
            "--boost",
            "src/**:0.3",
            "--exclude",
            "fixtures/",
            "--annotations",
            "both",
            "--no-manifest",
        ])
        .apply(&mut profile)
        .unwrap();

        assert_eq!(profile.budget.total, 20_000);
        assert_eq!(profile.truncation.strategy, TruncationStrategy::BusinessLogic);
        assert_eq!(profile.selection.boost.get("src/**"), Some(&0.3));
        assert_eq!(profile.selection.exclude, vec!["fixtures/".to_string()]);
        assert_eq!(profile.annotations.mode, AnnotationMode::Both);
        assert!(!profile.manifest.enabled);
    }

    #[test]
    fn test_bad_overrides_are_config_errors() {
        let mut profile = ProcessingProfile::default();
        let err = overrides(&["--strategy", "random"]).apply(&mut profile).unwrap_err();
        assert!(matches!(err, CondenseError::UnknownStrategy(_)));

        let err = overrides(&["--boost", "src/**"]).apply(&mut profile).unwrap_err();
        assert!(matches!(err, CondenseError::InvalidProfile(_)));
    }

    #[test]
    fn test_pack_writes_document_and_report() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "# Tool\n\nDoes things.\n").unwrap();
        fs::write(dir.path().join("main.py"), "def main():\n    print('hi')\n").unwrap();

        let out = dir.path().join("out").join("packed.md");
        let report = dir.path().join("out").join("report.json");
        let run = RunArgs {
            root: Some(dir.path().to_path_buf()),
            profile: None,
            no_cache: true,
            overrides: overrides(&["--budget", "20000", "--tokenizer", "heuristic"]),
        };
        cmd_pack(run, Some(out.clone()), Some(report.clone()), None, true).unwrap();

        let document = fs::read_to_string(&out).unwrap();
        assert!(document.contains("## File: README.md"));
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(report["included"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_pack_with_tiny_budget_records_exhaustion() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "# Tool\n\nDoes things.\n").unwrap();
        fs::write(dir.path().join("main.py"), "def main():\n    print('hi')\n").unwrap();

        let report = dir.path().join("report.json");
        let run = RunArgs {
            root: Some(dir.path().to_path_buf()),
            profile: None,
            no_cache: true,
            overrides: overrides(&["--budget", "10", "--tokenizer", "heuristic"]),
        };
        cmd_pack(run, Some(dir.path().join("packed.md")), Some(report.clone()), None, true).unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        assert!(report["included"].as_array().unwrap().is_empty());
        let reasons: Vec<&str> = report["skipped"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["reason"].as_str())
            .collect();
        assert_eq!(reasons, vec!["budget_exhausted", "budget_exhausted"]);
    }
}
