//! Command-line interface for astrx.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::config::{self, Config, ConfigSource, InlineSource, YamlFileSource};
use crate::error::ConfigError;
use crate::report;
use crate::rules::Manager;
use crate::search::SearchResult;
use crate::workspace;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Files above which preloading shows a progress bar.
const PROGRESS_THRESHOLD: usize = 16;

/// Structural code search with path expressions.
///
/// Source files are parsed into element trees and searched with XPath-style
/// rules such as `//FunctionDef[re:match('test_', @name)]`. Rules come from
/// `.astrx.yaml` or from `-e` on the command line.
#[derive(Parser, Debug)]
#[command(name = "astrx")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the configured rules
    Rules(RulesArgs),
    /// Search, then print the rules that matched nothing
    Prune(SearchArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Arguments for a search.
#[derive(Args, Debug, Default)]
pub struct SearchArgs {
    /// Files or directories to search (default: the configured folder)
    pub paths: Vec<PathBuf>,

    /// Search with this expression (or configured rule name) only
    #[arg(short, long)]
    pub expression: Option<String>,

    /// Run only these configured rules
    #[arg(short, long = "rule", value_name = "RULE")]
    pub rules: Vec<String>,

    /// Configuration file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Lines of context after each match
    #[arg(short = 'A', long)]
    pub after_context: Option<usize>,

    /// Lines of context before each match
    #[arg(short = 'B', long)]
    pub before_context: Option<usize>,

    /// Glob of paths to skip (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Only search the top level of directories
    #[arg(long)]
    pub no_recursive: bool,

    /// Rename identifiers and literals to canonical forms before matching
    #[arg(long)]
    pub normalize: bool,

    /// Search files one at a time
    #[arg(long)]
    pub no_parallel: bool,

    /// Worker threads for parallel search
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Only run rules marked for linter use
    #[arg(long)]
    pub linter: bool,

    /// Also write results to .astrx/results.json
    #[arg(long)]
    pub vscode_output: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Print nothing but errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the rules command.
#[derive(Args, Debug, Default)]
pub struct RulesArgs {
    /// Configuration file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only list rules marked for linter use
    #[arg(long)]
    pub linter: bool,
}

/// Find and load the configuration. A missing file is not an error: the
/// defaults apply and rules must come from `-e`.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, Box<dyn ConfigSource>)> {
    let source: Box<dyn ConfigSource> = match explicit {
        Some(path) => Box::new(YamlFileSource::new(path)),
        None => match config::discover(&std::env::current_dir()?) {
            Ok(path) => Box::new(YamlFileSource::new(path)),
            Err(ConfigError::NotFound(looked)) => {
                info!("no configuration file (looked for {looked}); using defaults");
                Box::new(InlineSource::default())
            }
            Err(e) => return Err(e.into()),
        },
    };
    let config = source.load()?;
    debug!("configuration from {}", source.origin());
    Ok((config, source))
}

impl SearchArgs {
    /// Fold command-line flags into `config`. Flags only ever override.
    pub fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(n) = self.after_context {
            config.after_context = n;
        }
        if let Some(n) = self.before_context {
            config.before_context = n;
        }
        if self.jobs.is_some() {
            config.jobs = self.jobs;
        }
        config.exclude.extend(self.exclude.iter().cloned());
        config.recursive &= !self.no_recursive;
        config.normalize_ast |= self.normalize;
        config.parallel &= !self.no_parallel;
        config.linter |= self.linter;
        config.vscode_output |= self.vscode_output;
        config.quiet |= self.quiet;

        match self.paths.as_slice() {
            [] => {}
            [dir] if dir.is_dir() => {
                config.folder = dir.clone();
                config.files.clear();
            }
            paths => {
                let mut files = Vec::new();
                for path in paths {
                    if path.is_dir() {
                        files.extend(workspace::collect_files(
                            path,
                            &config.exclude,
                            config.recursive,
                        )?);
                    } else {
                        files.push(path.clone());
                    }
                }
                config.files = files;
            }
        }
        Ok(())
    }
}

/// Build a manager from configuration plus flags and load its files.
fn prepare(args: &SearchArgs) -> anyhow::Result<Manager> {
    let (mut config, source) = load_config(args.config.as_deref())?;
    args.apply(&mut config)?;

    let mut manager = Manager::new(config, source);
    if let Some(expr) = &args.expression {
        manager.set_rule(expr);
    }
    if !args.rules.is_empty() {
        manager.set_filtered_selection(args.rules.iter().cloned());
    }
    manager.load_files()?;
    Ok(manager)
}

fn progress_bar(len: usize, quiet: bool) -> ProgressBar {
    if quiet || len < PROGRESS_THRESHOLD || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("parsing");
    pb
}

/// Parse every file up front, then search.
fn run_search_pass(manager: &Manager) -> SearchResult {
    let config = manager.config();
    let files = manager.workspace().files();
    if files.len() > 1 {
        let pb = progress_bar(files.len(), config.quiet);
        manager.workspace().preload(config.parallel, Some(&pb));
        pb.finish_and_clear();
    }
    manager.search()
}

fn report_failures(result: &SearchResult, quiet: bool) {
    if quiet {
        return;
    }
    for failure in &result.failures {
        eprintln!("warning: {}", failure);
    }
}

/// Run a search.
pub fn run_search(args: &SearchArgs) -> anyhow::Result<i32> {
    let manager = prepare(args)?;
    let config = manager.config();

    if manager.workspace().files().is_empty() {
        if !config.quiet {
            eprintln!("Warning: no files to search");
        }
        return Ok(EXIT_SUCCESS);
    }

    let active = manager.get_current_rules();
    if active.is_empty() {
        eprintln!("Error: no rules selected (configure rules or pass -e EXPR)");
        return Ok(EXIT_ERROR);
    }

    let result = run_search_pass(&manager);
    report_failures(&result, config.quiet);

    match args.format {
        OutputFormat::Json => report::write_json(&result, &active)?,
        OutputFormat::Text => {
            if !config.quiet {
                print!(
                    "{}",
                    report::render_text(
                        &result,
                        manager.workspace().cache(),
                        config.before_context,
                        config.after_context,
                    )
                );
            }
        }
    }

    if config.vscode_output {
        let entries = report::entries(&result, &active);
        let path = report::write_results_json(&entries, &std::env::current_dir()?)?;
        info!("wrote {}", path.display());
    }

    if result.total_matches() > 0 {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

/// Run the prune command: print the configured rules without matches.
pub fn run_prune(args: &SearchArgs) -> anyhow::Result<i32> {
    let mut manager = prepare(args)?;
    let result = run_search_pass(&manager);
    report_failures(&result, manager.config().quiet);

    let removed = manager.filter_rules(&result.rule_totals);
    if removed.is_empty() {
        if !manager.config().quiet {
            eprintln!("every rule matched at least once");
        }
        return Ok(EXIT_SUCCESS);
    }
    for name in &removed {
        println!("{}", name);
    }
    Ok(EXIT_FAILED)
}

/// Run the rules command.
pub fn run_rules(args: &RulesArgs) -> anyhow::Result<i32> {
    let (mut config, source) = load_config(args.config.as_deref())?;
    config.linter |= args.linter;
    let manager = Manager::new(config, source);

    let active = manager.get_current_rules();
    if active.is_empty() {
        eprintln!("no rules configured");
        return Ok(EXIT_SUCCESS);
    }
    print!(
        "{}",
        report::render_rules(active.iter().map(|(name, rule)| (name.as_str(), rule)))
    );
    Ok(EXIT_SUCCESS)
}

/// Dispatch a parsed command line.
pub fn run(cli: &Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Some(Commands::Rules(args)) => run_rules(args),
        Some(Commands::Prune(args)) => run_prune(args),
        None => run_search(&cli.search),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn bare_invocation_is_a_search() {
        let cli = Cli::try_parse_from(["astrx", "src", "-e", "//Import", "-B", "2"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.search.paths, vec![PathBuf::from("src")]);
        assert_eq!(cli.search.expression.as_deref(), Some("//Import"));
        assert_eq!(cli.search.before_context, Some(2));
        assert_eq!(cli.search.format, OutputFormat::Text);
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["astrx", "prune", "-r", "a", "-r", "b", "--format", "json"])
            .unwrap();
        match cli.command {
            Some(Commands::Prune(args)) => {
                assert_eq!(args.rules, vec!["a", "b"]);
                assert_eq!(args.format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(matches!(
            Cli::try_parse_from(["astrx", "rules", "--linter"]).unwrap().command,
            Some(Commands::Rules(RulesArgs { linter: true, .. }))
        ));
    }

    #[test]
    fn flags_override_configuration() {
        let mut config = Config::default();
        config.before_context = 5;
        let args = SearchArgs {
            after_context: Some(3),
            no_parallel: true,
            normalize: true,
            exclude: vec!["build".to_string()],
            ..SearchArgs::default()
        };
        args.apply(&mut config).unwrap();
        assert_eq!(config.before_context, 5);
        assert_eq!(config.after_context, 3);
        assert!(!config.parallel);
        assert!(config.normalize_ast);
        assert_eq!(config.exclude, vec!["build"]);
    }

    #[test]
    fn paths_become_folder_or_file_list() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/a.py"), "pass\n").unwrap();
        fs::write(dir.path().join("b.py"), "pass\n").unwrap();

        let mut config = Config::default();
        SearchArgs {
            paths: vec![dir.path().to_path_buf()],
            ..SearchArgs::default()
        }
        .apply(&mut config)
        .unwrap();
        assert_eq!(config.folder, dir.path());
        assert!(config.files.is_empty());

        let mut config = Config::default();
        SearchArgs {
            paths: vec![dir.path().join("b.py"), dir.path().join("pkg")],
            ..SearchArgs::default()
        }
        .apply(&mut config)
        .unwrap();
        assert_eq!(
            config.files,
            vec![dir.path().join("b.py"), dir.path().join("pkg").join("a.py")]
        );
    }
}
