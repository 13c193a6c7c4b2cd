//! astrx - structural search over parsed source code.
//!
//! Source files are parsed with tree-sitter into element trees whose
//! elements carry attributes (`name`, `lineno`, `text`, ...). Named rules are
//! XPath-style path expressions evaluated against those trees; every match
//! is mapped back to a line and column and grouped per file, line and rule.
//!
//! # Architecture
//!
//! - `tree`: element tree model, tree-sitter builder, normalization
//! - `query`: path expression compiler and evaluator, extension predicates
//! - `locate`: node to source position mapping
//! - `cache`: per-file tree cache with single-flight builds
//! - `config` / `rules`: configuration document, rule set, rule selection
//! - `workspace`: file selection
//! - `search`: per-file search and result aggregation
//! - `report`: text and JSON output
//!
//! # Example
//!
//! ```no_run
//! use astrx::{FileCache, QueryEngine, Rule, Searcher, Parallelism};
//! use indexmap::IndexMap;
//! use std::path::PathBuf;
//!
//! let cache = FileCache::default();
//! let engine = QueryEngine::new();
//! let mut rules = IndexMap::new();
//! rules.insert("private-defs".to_string(), Rule::new("//FunctionDef[re:match('_', @name)]"));
//!
//! let result = Searcher::new(&cache, &engine).search(
//!     &[PathBuf::from("app.py")],
//!     &rules,
//!     Parallelism::Sequential,
//! );
//! println!("{} matches", result.total_matches());
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod locate;
pub mod query;
pub mod report;
pub mod rules;
pub mod search;
pub mod tree;
pub mod workspace;

pub use cache::{CachedTree, FileCache, SourceFile};
pub use config::{Config, ConfigSource, InlineSource, YamlFileSource};
pub use error::{CacheError, ConfigError, LocationError, ParseError, QueryError, WorkspaceError};
pub use locate::{Location, LocationMapper};
pub use query::{CompiledQuery, ExtensionPredicate, FunctionRegistry, QueryEngine};
pub use rules::{Manager, Rule, RuleInfo, RuleSet, SelectionMode};
pub use search::{
    Failure, FileMatches, LineMatches, MatchRecord, Parallelism, SearchResult, Searcher,
};
pub use tree::{BuildOptions, NodeId, SyntaxTree, TreeBuilder};
pub use workspace::Workspace;
