//! Running rules over files and merging the results.
//!
//! Each file is searched independently: fetch its tree from the cache,
//! evaluate every compiled rule, and map each match to a line and column.
//! Multi-file searches may fan out over a bounded rayon pool; outcomes are
//! collected by input index, so the merged result never depends on which
//! worker finishes first.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, warn};
use rayon::prelude::*;

use crate::cache::FileCache;
use crate::error::{CacheError, LocationError, ParseError, QueryError};
use crate::locate::LocationMapper;
use crate::query::{CompiledQuery, QueryEngine};
use crate::rules::Rule;
use crate::tree::{NodeId, PositionTable, SyntaxTree};

/// One match of one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub rule: String,
    pub line: usize,
    pub column: usize,
    /// Matched node, for regenerating the match from the cached tree.
    pub node: NodeId,
}

/// Matches of a single rule on a single line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleHits {
    pub records: Vec<MatchRecord>,
}

impl RuleHits {
    pub fn count(&self) -> usize {
        self.records.len()
    }
}

/// All matches on one line, grouped by rule in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineEntry {
    pub by_rule: IndexMap<String, RuleHits>,
}

impl LineEntry {
    pub fn count(&self) -> usize {
        self.by_rule.values().map(RuleHits::count).sum()
    }
}

/// Line number to matches on that line, in line order.
pub type LineMatches = BTreeMap<usize, LineEntry>;

/// Matches in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatches {
    pub path: PathBuf,
    pub lines: LineMatches,
}

impl FileMatches {
    pub fn count(&self) -> usize {
        self.lines.values().map(LineEntry::count).sum()
    }

    /// Every record in line order, then rule order.
    pub fn records(&self) -> impl Iterator<Item = &MatchRecord> + '_ {
        self.lines
            .values()
            .flat_map(|entry| entry.by_rule.values())
            .flat_map(|hits| hits.records.iter())
    }
}

/// Something that was left out of a result.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The file produced no tree; it was skipped.
    Parse {
        path: PathBuf,
        error: Arc<ParseError>,
    },
    /// The rule did not compile; it was skipped for the whole search.
    Query { rule: String, error: QueryError },
    /// A match could not be located; the file's results were discarded.
    Location {
        path: PathBuf,
        rule: String,
        error: LocationError,
    },
    /// The rule failed on this file; other rules still ran.
    Evaluation {
        path: PathBuf,
        rule: String,
        error: QueryError,
    },
}

impl Failure {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Failure::Parse { path, .. }
            | Failure::Location { path, .. }
            | Failure::Evaluation { path, .. } => Some(path),
            Failure::Query { .. } => None,
        }
    }

    pub fn rule(&self) -> Option<&str> {
        match self {
            Failure::Parse { .. } => None,
            Failure::Query { rule, .. }
            | Failure::Location { rule, .. }
            | Failure::Evaluation { rule, .. } => Some(rule),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Parse { error, .. } => write!(f, "skipped file: {error}"),
            Failure::Query { rule, error } => write!(f, "skipped rule {rule:?}: {error}"),
            Failure::Location { path, rule, error } => write!(
                f,
                "discarded {} (rule {rule:?}): {error}",
                path.display()
            ),
            Failure::Evaluation { path, rule, error } => {
                write!(f, "rule {rule:?} failed on {}: {error}", path.display())
            }
        }
    }
}

/// Rules that compiled, in rule order.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    rules: Vec<(String, CompiledQuery)>,
}

impl CompiledRules {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.rules.iter().map(|(name, _)| name.as_str())
    }

    fn zeroed(&self) -> IndexMap<String, usize> {
        self.names().map(|name| (name.to_string(), 0)).collect()
    }
}

/// Result of searching one file.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub lines: LineMatches,
    pub counts: IndexMap<String, usize>,
    pub failures: Vec<Failure>,
}

impl FileOutcome {
    fn empty(path: &Path, rules: &CompiledRules, failures: Vec<Failure>) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: LineMatches::new(),
            counts: rules.zeroed(),
            failures,
        }
    }
}

/// Merged result of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    /// Files with at least one match, in input order.
    pub files: Vec<FileMatches>,
    /// Total matches per rule across every searched file. Every rule that
    /// ran cleanly is present, including rules with no matches; rules that
    /// failed to compile or failed on any file are absent.
    pub rule_totals: IndexMap<String, usize>,
    pub failures: Vec<Failure>,
    pub files_searched: usize,
}

impl SearchResult {
    /// Matches listed in `files`.
    pub fn total_matches(&self) -> usize {
        self.files.iter().map(FileMatches::count).sum()
    }

    /// Whether some data is missing because of a failure.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn file(&self, path: &Path) -> Option<&FileMatches> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Number of distinct files that were skipped or discarded.
    pub fn failed_files(&self) -> usize {
        let mut paths: Vec<&Path> = self
            .failures
            .iter()
            .filter(|f| matches!(f, Failure::Parse { .. } | Failure::Location { .. }))
            .filter_map(Failure::path)
            .collect();
        paths.sort();
        paths.dedup();
        paths.len()
    }

    /// Number of distinct rules that failed to compile or evaluate.
    pub fn failed_rules(&self) -> usize {
        let mut rules: Vec<&str> = self
            .failures
            .iter()
            .filter(|f| matches!(f, Failure::Query { .. } | Failure::Evaluation { .. }))
            .filter_map(Failure::rule)
            .collect();
        rules.sort();
        rules.dedup();
        rules.len()
    }

    fn merge(&mut self, outcome: FileOutcome) {
        self.files_searched += 1;
        for (rule, count) in outcome.counts {
            *self.rule_totals.entry(rule).or_insert(0) += count;
        }
        self.failures.extend(outcome.failures);
        if !outcome.lines.is_empty() {
            self.files.push(FileMatches {
                path: outcome.path,
                lines: outcome.lines,
            });
        }
    }
}

/// How to schedule a multi-file search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    /// Bounded pool; `None` uses rayon's default thread count.
    Threads(Option<usize>),
}

/// Runs compiled rules against cached trees.
#[derive(Debug, Clone, Copy)]
pub struct Searcher<'a> {
    cache: &'a FileCache,
    engine: &'a QueryEngine,
}

impl<'a> Searcher<'a> {
    pub fn new(cache: &'a FileCache, engine: &'a QueryEngine) -> Self {
        Self { cache, engine }
    }

    /// Compile the active rules. Rules that fail are reported and left out.
    pub fn compile_rules(&self, active: &IndexMap<String, Rule>) -> (CompiledRules, Vec<Failure>) {
        let mut compiled = CompiledRules::default();
        let mut failures = Vec::new();
        for (name, rule) in active {
            match self.engine.compile(&rule.expression) {
                Ok(query) => compiled.rules.push((name.clone(), query)),
                Err(error) => {
                    warn!("rule {name:?} does not compile: {error}");
                    failures.push(Failure::Query {
                        rule: name.clone(),
                        error,
                    });
                }
            }
        }
        (compiled, failures)
    }

    /// Compile `active` and search `paths`.
    pub fn search(
        &self,
        paths: &[PathBuf],
        active: &IndexMap<String, Rule>,
        parallelism: Parallelism,
    ) -> SearchResult {
        let (compiled, mut failures) = self.compile_rules(active);
        let mut result = self.search_files(paths, &compiled, parallelism);
        failures.append(&mut result.failures);
        result.failures = failures;
        result
    }

    /// Search one file with every compiled rule.
    pub fn search_file(&self, path: &Path, rules: &CompiledRules) -> FileOutcome {
        let cached = match self.cache.get(path) {
            Ok(cached) => cached,
            Err(CacheError::Build(error)) => {
                warn!("skipping {}: {error}", path.display());
                let failure = Failure::Parse {
                    path: path.to_path_buf(),
                    error,
                };
                return FileOutcome::empty(path, rules, vec![failure]);
            }
        };
        self.search_tree(path, cached.tree(), cached.positions(), rules)
    }

    /// Search an already built tree. `positions` is the side table for
    /// trees built without embedded positions.
    ///
    /// A match that cannot be mapped to a position discards every result
    /// for the file; the failure is recorded instead.
    pub fn search_tree(
        &self,
        path: &Path,
        tree: &SyntaxTree,
        positions: Option<&PositionTable>,
        rules: &CompiledRules,
    ) -> FileOutcome {
        let mut lines = LineMatches::new();
        let mut counts = rules.zeroed();
        let mut failures = Vec::new();

        for (name, query) in &rules.rules {
            let nodes = match query.evaluate(tree) {
                Ok(nodes) => nodes,
                Err(error) => {
                    warn!("rule {name:?} failed on {}: {error}", path.display());
                    failures.push(Failure::Evaluation {
                        path: path.to_path_buf(),
                        rule: name.clone(),
                        error,
                    });
                    continue;
                }
            };

            for node in nodes {
                let location = match LocationMapper::locate(tree, node, positions) {
                    Ok(location) => location,
                    Err(error) => {
                        warn!("discarding results for {}: {error}", path.display());
                        failures.push(Failure::Location {
                            path: path.to_path_buf(),
                            rule: name.clone(),
                            error,
                        });
                        return FileOutcome::empty(path, rules, failures);
                    }
                };
                lines
                    .entry(location.line)
                    .or_default()
                    .by_rule
                    .entry(name.clone())
                    .or_default()
                    .records
                    .push(MatchRecord {
                        rule: name.clone(),
                        line: location.line,
                        column: location.column,
                        node,
                    });
                if let Some(count) = counts.get_mut(name) {
                    *count += 1;
                }
            }
        }

        debug!(
            "{}: {} matches",
            path.display(),
            counts.values().sum::<usize>()
        );
        FileOutcome {
            path: path.to_path_buf(),
            lines,
            counts,
            failures,
        }
    }

    /// Search many files and merge the outcomes in input order.
    pub fn search_files(
        &self,
        paths: &[PathBuf],
        rules: &CompiledRules,
        parallelism: Parallelism,
    ) -> SearchResult {
        let outcomes: Vec<FileOutcome> = match parallelism {
            Parallelism::Sequential => paths.iter().map(|p| self.search_file(p, rules)).collect(),
            Parallelism::Threads(jobs) => {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs.unwrap_or(0))
                    .build()
                {
                    Ok(pool) => pool.install(|| {
                        paths
                            .par_iter()
                            .map(|p| self.search_file(p, rules))
                            .collect()
                    }),
                    Err(e) => {
                        warn!("could not start worker pool ({e}); searching sequentially");
                        paths.iter().map(|p| self.search_file(p, rules)).collect()
                    }
                }
            }
        };

        let mut result = SearchResult {
            rule_totals: rules.zeroed(),
            ..SearchResult::default()
        };
        for outcome in outcomes {
            result.merge(outcome);
        }

        // A rule that failed on some file has no trustworthy total.
        let failed: Vec<String> = result
            .failures
            .iter()
            .filter_map(|f| match f {
                Failure::Evaluation { rule, .. } => Some(rule.clone()),
                _ => None,
            })
            .collect();
        for rule in failed {
            if result.rule_totals.shift_remove(&rule).is_some() {
                debug!("rule {rule:?} left out of totals after failing");
            }
        }
        result
    }
}
