//! Error types for tree building, querying, location mapping and caching.
//!
//! Every concern gets its own enum so callers can isolate failures per file
//! and per rule. `anyhow` is only used at the binary boundary.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::tree::NodeId;

/// Source text could not be turned into a tree.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: no grammar registered for this file type")]
    UnsupportedLanguage { path: PathBuf },

    #[error("{path}: failed to initialize {language} parser")]
    ParserInit { path: PathBuf, language: String },

    #[error("{path}: parser produced no tree")]
    ParseFailed { path: PathBuf },

    #[error("{path}:{line}:{column}: invalid syntax near {snippet:?}")]
    Syntax {
        path: PathBuf,
        line: usize,
        column: usize,
        snippet: String,
    },
}

impl ParseError {
    /// Path of the file that failed to parse.
    pub fn path(&self) -> &PathBuf {
        match self {
            ParseError::Io { path, .. }
            | ParseError::UnsupportedLanguage { path }
            | ParseError::ParserInit { path, .. }
            | ParseError::ParseFailed { path }
            | ParseError::Syntax { path, .. } => path,
        }
    }
}

/// Path expression failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Malformed expression, unknown function, bad arity or an invalid
    /// literal regex.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// Failure that can only be detected against a concrete tree, such as a
    /// computed regex pattern that does not compile.
    #[error("evaluation error: {message}")]
    Evaluation { message: String },
}

impl QueryError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        QueryError::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        QueryError::Evaluation {
            message: message.into(),
        }
    }
}

/// A matched node could not be mapped back to a source position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("node {0} does not belong to this tree")]
    UnknownNode(NodeId),

    #[error("node {0} has no ancestor carrying a line number")]
    NoPosition(NodeId),
}

/// Failure surfaced by the file cache.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("failed to build tree: {0}")]
    Build(#[source] Arc<ParseError>),
}

impl CacheError {
    /// The parse error behind the failed build.
    pub fn parse_error(&self) -> &ParseError {
        match self {
            CacheError::Build(e) => e,
        }
    }
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {origin}: {source}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no configuration file found (looked for {0})")]
    NotFound(String),
}

/// File selection failures.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("invalid exclude pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}
