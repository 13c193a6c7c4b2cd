//! Function table for path expressions.
//!
//! Core functions are fixed and resolved by name. Prefixed functions such as
//! `re:match` are looked up in a [`FunctionRegistry`], so extra predicates can
//! be plugged in without touching the evaluator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

/// A two-argument boolean extension function: `prefix:name(pattern, subject)`.
///
/// `strings` holds the string-values of the subject argument, one per node
/// when the subject is a node-set. An empty slice must yield `false`.
pub trait ExtensionPredicate: Send + Sync + fmt::Debug {
    fn test(&self, pattern: &Regex, strings: &[String]) -> bool;
}

/// `re:match`: true when some string matches the pattern at its start.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatchPredicate;

impl ExtensionPredicate for MatchPredicate {
    fn test(&self, pattern: &Regex, strings: &[String]) -> bool {
        // Leftmost match starts at 0 whenever any match does.
        strings
            .iter()
            .any(|s| pattern.find(s).is_some_and(|m| m.start() == 0))
    }
}

/// `re:search`: true when the pattern matches anywhere in some string.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchPredicate;

impl ExtensionPredicate for SearchPredicate {
    fn test(&self, pattern: &Regex, strings: &[String]) -> bool {
        strings.iter().any(|s| pattern.is_match(s))
    }
}

/// Maps `(prefix, name)` to extension predicates.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    predicates: HashMap<(String, String), Arc<dyn ExtensionPredicate>>,
}

impl FunctionRegistry {
    /// A registry with no extension functions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with `re:match` and `re:search`.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("re", "match", MatchPredicate);
        registry.register("re", "search", SearchPredicate);
        registry
    }

    /// Register or replace `prefix:name`.
    pub fn register(
        &mut self,
        prefix: impl Into<String>,
        name: impl Into<String>,
        predicate: impl ExtensionPredicate + 'static,
    ) {
        self.predicates
            .insert((prefix.into(), name.into()), Arc::new(predicate));
    }

    pub fn lookup(&self, prefix: &str, name: &str) -> Option<Arc<dyn ExtensionPredicate>> {
        self.predicates
            .get(&(prefix.to_string(), name.to_string()))
            .cloned()
    }

    /// Registered names as `prefix:name`, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .predicates
            .keys()
            .map(|(prefix, name)| format!("{prefix}:{name}"))
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("predicates", &self.names())
            .finish()
    }
}

/// Built-in functions of the expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoreFunction {
    Last,
    Position,
    Count,
    Name,
    LocalName,
    String,
    Concat,
    StartsWith,
    Contains,
    SubstringBefore,
    SubstringAfter,
    StringLength,
    NormalizeSpace,
    Not,
    True,
    False,
    Boolean,
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
}

impl CoreFunction {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "last" => Self::Last,
            "position" => Self::Position,
            "count" => Self::Count,
            "name" => Self::Name,
            "local-name" => Self::LocalName,
            "string" => Self::String,
            "concat" => Self::Concat,
            "starts-with" => Self::StartsWith,
            "contains" => Self::Contains,
            "substring-before" => Self::SubstringBefore,
            "substring-after" => Self::SubstringAfter,
            "string-length" => Self::StringLength,
            "normalize-space" => Self::NormalizeSpace,
            "not" => Self::Not,
            "true" => Self::True,
            "false" => Self::False,
            "boolean" => Self::Boolean,
            "number" => Self::Number,
            "sum" => Self::Sum,
            "floor" => Self::Floor,
            "ceiling" => Self::Ceiling,
            "round" => Self::Round,
            _ => return None,
        })
    }

    /// Accepted argument counts as `(min, max)`; `None` means unbounded.
    pub(crate) fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Last | Self::Position | Self::True | Self::False => (0, Some(0)),
            Self::Name
            | Self::LocalName
            | Self::String
            | Self::StringLength
            | Self::NormalizeSpace
            | Self::Number => (0, Some(1)),
            Self::Count
            | Self::Not
            | Self::Boolean
            | Self::Sum
            | Self::Floor
            | Self::Ceiling
            | Self::Round => (1, Some(1)),
            Self::StartsWith | Self::Contains | Self::SubstringBefore | Self::SubstringAfter => {
                (2, Some(2))
            }
            Self::Concat => (2, None),
        }
    }
}
