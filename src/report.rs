//! Output formatting for search results.
//!
//! Two formats:
//! - Text: grep-like listing with context lines, coloured for terminals
//! - JSON: one entry per match, printed or written to the artifact file
//!   editors pick up (`.astrx/results.json`)

use std::fs;
use std::path::{Path, PathBuf};

use colored::*;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cache::FileCache;
use crate::rules::Rule;
use crate::search::{FileMatches, SearchResult};

/// Directory, relative to the search root, holding machine-readable output.
pub const ARTIFACT_DIR: &str = ".astrx";

/// File name of the machine-readable results inside [`ARTIFACT_DIR`].
pub const RESULTS_FILE: &str = "results.json";

// =============================================================================
// JSON
// =============================================================================

/// One match, flattened for machine consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonEntry {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub rule: String,
    pub description: String,
}

/// Full report printed by `--format json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonReport {
    pub version: String,
    pub files_searched: usize,
    pub total_matches: usize,
    pub rule_totals: IndexMap<String, usize>,
    pub matches: Vec<JsonEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// Flatten `result` in file, line, rule order. Descriptions come from
/// `rules`; a rule missing there gets an empty one.
pub fn entries(result: &SearchResult, rules: &IndexMap<String, Rule>) -> Vec<JsonEntry> {
    result
        .files
        .iter()
        .flat_map(|file| {
            file.records().map(move |record| JsonEntry {
                file: file.path.display().to_string(),
                line: record.line,
                column: record.column,
                rule: record.rule.clone(),
                description: rules
                    .get(&record.rule)
                    .map(|r| r.info.description.clone())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

pub fn json_report(result: &SearchResult, rules: &IndexMap<String, Rule>) -> JsonReport {
    JsonReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        files_searched: result.files_searched,
        total_matches: result.total_matches(),
        rule_totals: result.rule_totals.clone(),
        matches: entries(result, rules),
        failures: result.failures.iter().map(ToString::to_string).collect(),
    }
}

/// Print the JSON report to stdout.
pub fn write_json(result: &SearchResult, rules: &IndexMap<String, Rule>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&json_report(result, rules))?;
    println!("{}", json);
    Ok(())
}

/// Write `entries` to `dir/.astrx/results.json`, creating the directory.
pub fn write_results_json(entries: &[JsonEntry], dir: &Path) -> anyhow::Result<PathBuf> {
    let out_dir = dir.join(ARTIFACT_DIR);
    fs::create_dir_all(&out_dir)?;
    let path = out_dir.join(RESULTS_FILE);
    let json = serde_json::to_string_pretty(entries)?;
    fs::write(&path, json)?;
    log::debug!("wrote {} entries to {}", entries.len(), path.display());
    Ok(path)
}

// =============================================================================
// Text
// =============================================================================

/// Render every file's matches with `before`/`after` lines of context,
/// followed by a summary line.
///
/// Matched lines are marked with `:` and annotated with their rules;
/// context lines are marked with `-`. Non-adjacent groups are separated by
/// `--`.
pub fn render_text(result: &SearchResult, cache: &FileCache, before: usize, after: usize) -> String {
    let mut out = String::new();
    for file in &result.files {
        render_file(&mut out, file, cache, before, after);
        out.push('\n');
    }
    out.push_str(&summary(result));
    out.push('\n');
    out
}

fn render_file(out: &mut String, file: &FileMatches, cache: &FileCache, before: usize, after: usize) {
    out.push_str(&format!("{}\n", file.path.display().to_string().blue().bold()));

    // The tree may have been reloaded or dropped; fall back to bare locations.
    let text = cache.get(&file.path).ok().map(|c| c.source().text.clone());
    let lines: Vec<&str> = text.as_deref().map(|t| t.lines().collect()).unwrap_or_default();
    let last = lines.len().max(file.lines.keys().copied().max().unwrap_or(0));

    let width = last.to_string().len();
    let mut printed_up_to = 0;
    for &line in file.lines.keys() {
        let start = line.saturating_sub(before).max(1).max(printed_up_to + 1);
        let end = (line + after).min(last).max(line);

        if printed_up_to > 0 && start > printed_up_to + 1 {
            out.push_str(&format!("{}\n", "--".dimmed()));
        }

        for n in start..=end {
            let source = lines.get(n - 1).copied().unwrap_or("");
            match file.lines.get(&n) {
                Some(hits) => {
                    let rules: Vec<String> = hits
                        .by_rule
                        .iter()
                        .map(|(rule, h)| match h.count() {
                            1 => rule.clone(),
                            count => format!("{rule} x{count}"),
                        })
                        .collect();
                    out.push_str(&format!(
                        "{}{} {}  {}\n",
                        format!("{n:>width$}").green(),
                        ":".dimmed(),
                        source,
                        format!("[{}]", rules.join(", ")).yellow()
                    ));
                }
                None => {
                    out.push_str(&format!(
                        "{}{} {}\n",
                        format!("{n:>width$}").dimmed(),
                        "-".dimmed(),
                        source.dimmed()
                    ));
                }
            }
            printed_up_to = n;
        }
    }
}

/// One-line totals.
pub fn summary(result: &SearchResult) -> String {
    let matches = result.total_matches();
    let mut line = format!(
        "{} {} in {} of {} {}",
        matches,
        plural(matches, "match", "matches"),
        result.files.len(),
        result.files_searched,
        plural(result.files_searched, "file", "files"),
    );
    if result.is_degraded() {
        line.push_str(&format!(
            " ({} skipped {}, {} failed {})",
            result.failed_files(),
            plural(result.failed_files(), "file", "files"),
            result.failed_rules(),
            plural(result.failed_rules(), "rule", "rules"),
        ));
    }
    if matches == 0 {
        line.dimmed().to_string()
    } else {
        line.bold().to_string()
    }
}

/// Configured rules as `name  expression  description`, one per line.
pub fn render_rules<'a>(rules: impl Iterator<Item = (&'a str, &'a Rule)>) -> String {
    let mut out = String::new();
    for (name, rule) in rules {
        let linter = if rule.info.use_in_linter { "" } else { " (not in linter)" };
        out.push_str(&format!("{:<24} {}", name.bold(), rule.expression.cyan()));
        if !rule.info.description.is_empty() {
            out.push_str(&format!("  {}", rule.info.description.dimmed()));
        }
        out.push_str(&format!("{}\n", linter.dimmed()));
    }
    out
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}
