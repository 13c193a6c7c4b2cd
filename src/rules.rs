//! Named rules and the [`Manager`] that decides which of them run.
//!
//! Selection has three modes, resolved in this order every time the active
//! rules are requested:
//!
//! 1. **ad hoc**: a single expression set with [`Manager::set_rule`];
//! 2. **filtered**: a non-empty subset of configured rule names;
//! 3. **default**: every configured rule, narrowed to linter rules when the
//!    configuration asks for it.

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigSource};
use crate::error::{ConfigError, WorkspaceError};
use crate::query::QueryEngine;
use crate::search::{Parallelism, SearchResult, Searcher};
use crate::tree::{BuildOptions, TreeBuilder};
use crate::workspace::Workspace;

/// Rule metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleInfo {
    pub use_in_linter: bool,
    pub description: String,
}

/// A path expression plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub expression: String,
    #[serde(flatten)]
    pub info: RuleInfo,
}

impl Rule {
    /// A configured rule with default metadata: linter-enabled, no
    /// description.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            info: RuleInfo {
                use_in_linter: true,
                description: String::new(),
            },
        }
    }

    /// A raw expression with empty metadata.
    pub fn ad_hoc(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            info: RuleInfo::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = description.into();
        self
    }

    pub fn use_in_linter(mut self, enabled: bool) -> Self {
        self.info.use_in_linter = enabled;
        self
    }
}

/// How a rule may be written in the configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RuleEntry {
    /// `name: "//Expr"`
    Expression(String),
    /// `name: {expression, use_in_linter, description}`
    Detailed {
        #[serde(default)]
        expression: Option<String>,
        #[serde(default)]
        use_in_linter: Option<bool>,
        #[serde(default)]
        description: Option<String>,
    },
    /// `name:` with no value; the name is the expression.
    Bare,
}

impl RuleEntry {
    fn into_rule(self, name: &str) -> Rule {
        match self {
            RuleEntry::Expression(expression) => Rule::new(expression),
            RuleEntry::Detailed {
                expression,
                use_in_linter,
                description,
            } => Rule::new(expression.unwrap_or_else(|| name.to_string()))
                .use_in_linter(use_in_linter.unwrap_or(true))
                .with_description(description.unwrap_or_default()),
            RuleEntry::Bare => Rule::new(name),
        }
    }
}

/// Configured rules, in document order. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(
    from = "IndexMap<String, RuleEntry>",
    into = "IndexMap<String, Rule>"
)]
pub struct RuleSet {
    rules: IndexMap<String, Rule>,
}

impl From<IndexMap<String, RuleEntry>> for RuleSet {
    fn from(entries: IndexMap<String, RuleEntry>) -> Self {
        entries
            .into_iter()
            .map(|(name, entry)| {
                let rule = entry.into_rule(&name);
                (name, rule)
            })
            .collect()
    }
}

impl From<RuleSet> for IndexMap<String, Rule> {
    fn from(set: RuleSet) -> Self {
        set.rules
    }
}

impl FromIterator<(String, Rule)> for RuleSet {
    fn from_iter<I: IntoIterator<Item = (String, Rule)>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Add or replace a rule; replacing keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, rule: Rule) -> Option<Rule> {
        self.rules.insert(name.into(), rule)
    }

    /// Remove a rule, keeping the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<Rule> {
        self.rules.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.rules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Rule)> + '_ {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }
}

/// Which selection mode [`Manager::get_current_rules`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    AdHoc,
    Filtered,
    Default,
}

/// Owns the configuration, the rule selection and the workspace.
///
/// Configuration changes are not synchronized with searches; callers
/// serialize them.
#[derive(Debug)]
pub struct Manager {
    config: Config,
    source: Box<dyn ConfigSource>,
    engine: QueryEngine,
    workspace: Workspace,
    ad_hoc: Option<(String, Rule)>,
    filtered: Vec<String>,
}

impl Manager {
    pub fn new(config: Config, source: Box<dyn ConfigSource>) -> Self {
        let builder = TreeBuilder::new(BuildOptions {
            normalize: config.normalize_ast,
            annotate_positions: true,
        });
        Self {
            config,
            source,
            engine: QueryEngine::new(),
            workspace: Workspace::new(builder),
            ad_hoc: None,
            filtered: Vec::new(),
        }
    }

    /// Load the configuration from `source` and keep the source for later
    /// reloads.
    pub fn from_source(source: Box<dyn ConfigSource>) -> Result<Self, ConfigError> {
        let config = source.load()?;
        info!(
            "loaded {} rules from {}",
            config.rules.len(),
            source.origin()
        );
        Ok(Self::new(config, source))
    }

    /// Replace the query engine, e.g. to register extra predicates.
    pub fn with_engine(mut self, engine: QueryEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.config.rules
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Select the files to search from the configuration: the explicit
    /// `files` list when non-empty, otherwise a walk of `folder`.
    pub fn load_files(&mut self) -> Result<usize, WorkspaceError> {
        if self.config.files.is_empty() {
            self.workspace.load_folder(
                &self.config.folder,
                &self.config.exclude,
                self.config.recursive,
            )
        } else {
            Ok(self.workspace.load_files(self.config.files.clone()))
        }
    }

    /// Enter ad hoc mode with `name`.
    ///
    /// When `name` is a configured rule, its expression and metadata are
    /// used and `true` is returned. Otherwise `name` itself is the
    /// expression, with empty metadata, and `false` is returned.
    pub fn set_rule(&mut self, name: &str) -> bool {
        let (rule, known) = match self.config.rules.get(name) {
            Some(rule) => (rule.clone(), true),
            None => (Rule::ad_hoc(name), false),
        };
        debug!("ad hoc rule {name:?} (configured: {known})");
        self.ad_hoc = Some((name.to_string(), rule));
        known
    }

    pub fn ad_hoc(&self) -> Option<(&str, &Rule)> {
        self.ad_hoc.as_ref().map(|(name, rule)| (name.as_str(), rule))
    }

    /// Leave ad hoc mode.
    pub fn reset_ad_hoc(&mut self) {
        self.ad_hoc = None;
    }

    /// Restrict default selection to `names`. An empty list clears the
    /// filter.
    pub fn set_filtered_selection<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filtered = names.into_iter().map(Into::into).collect();
    }

    pub fn filtered_selection(&self) -> &[String] {
        &self.filtered
    }

    pub fn selection_mode(&self) -> SelectionMode {
        if self.ad_hoc.is_some() {
            SelectionMode::AdHoc
        } else if !self.filtered.is_empty() {
            SelectionMode::Filtered
        } else {
            SelectionMode::Default
        }
    }

    /// Active rules by name, in configuration (or selection) order.
    pub fn get_current_rules(&self) -> IndexMap<String, Rule> {
        match self.selection_mode() {
            SelectionMode::AdHoc => self
                .ad_hoc
                .iter()
                .map(|(name, rule)| (name.clone(), rule.clone()))
                .collect(),
            SelectionMode::Filtered => self
                .filtered
                .iter()
                .filter_map(|name| match self.config.rules.get(name) {
                    Some(rule) => Some((name.clone(), rule.clone())),
                    None => {
                        warn!("selected rule {name:?} is not configured; skipping");
                        None
                    }
                })
                .collect(),
            SelectionMode::Default => self
                .config
                .rules
                .iter()
                .filter(|(_, rule)| !self.config.linter || rule.info.use_in_linter)
                .map(|(name, rule)| (name.to_string(), rule.clone()))
                .collect(),
        }
    }

    /// Remove every configured rule whose count is exactly zero and return
    /// the removed names.
    ///
    /// The removal lasts for the rest of the session (until
    /// [`reload_configuration`](Self::reload_configuration)). When anything
    /// is removed the filtered selection is cleared, since it may name a
    /// removed rule. Names that are not configured are ignored.
    pub fn filter_rules(&mut self, counts: &IndexMap<String, usize>) -> Vec<String> {
        let removed: Vec<String> = counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .filter_map(|(name, _)| self.config.rules.remove(name).map(|_| name.clone()))
            .collect();

        if !removed.is_empty() {
            info!("pruned {} rules without matches: {}", removed.len(), removed.join(", "));
            self.filtered.clear();
        }
        removed
    }

    /// Re-read rules, `interactive_files` and `pagination` from the
    /// configuration source. Keys missing from the source get their
    /// defaults; other settings are untouched.
    pub fn reload_configuration(&mut self) -> Result<(), ConfigError> {
        let fresh = self.source.load()?;
        info!(
            "reloaded {} rules from {}",
            fresh.rules.len(),
            self.source.origin()
        );
        self.config.rules = fresh.rules;
        self.config.interactive_files = fresh.interactive_files;
        self.config.pagination = fresh.pagination;
        Ok(())
    }

    /// Run the active rules over the loaded files.
    pub fn search(&self) -> SearchResult {
        let active = self.get_current_rules();
        let searcher = Searcher::new(self.workspace.cache(), &self.engine);
        let files = self.workspace.files();

        if self.workspace.is_single_file() {
            debug!("single-file search with {} rules", active.len());
            return searcher.search(files, &active, Parallelism::Sequential);
        }

        let parallelism = if self.config.parallel {
            Parallelism::Threads(self.config.jobs)
        } else {
            Parallelism::Sequential
        };
        debug!(
            "searching {} files with {} rules ({parallelism:?})",
            files.len(),
            active.len()
        );
        searcher.search(files, &active, parallelism)
    }
}
