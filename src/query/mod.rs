//! Path-expression engine over [`SyntaxTree`]s.
//!
//! Expressions use the XPath 1.0 core: location paths with the common
//! axes, predicates (numeric ones are positional), boolean, comparison and
//! arithmetic operators, unions, and the core function library. Prefixed
//! functions come from a [`FunctionRegistry`]; the standard one provides
//! `re:match` and `re:search`.
//!
//! Compilation validates the whole expression up front, so a malformed rule
//! is rejected once rather than once per file.

mod eval;
mod functions;
mod lexer;
mod parser;

use std::sync::Arc;

use log::trace;

pub use functions::{ExtensionPredicate, FunctionRegistry, MatchPredicate, SearchPredicate};

use crate::error::QueryError;
use crate::tree::{NodeId, SyntaxTree};
use eval::Evaluator;
use parser::Expr;

/// Compiles expressions against a fixed function registry.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    registry: Arc<FunctionRegistry>,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    /// An engine with the standard regex extensions.
    pub fn new() -> Self {
        Self::with_registry(FunctionRegistry::standard())
    }

    pub fn with_registry(registry: FunctionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Parse and validate `expression`.
    ///
    /// Fails with [`QueryError::Syntax`] on malformed input, unknown
    /// functions or axes, wrong arity, an invalid literal regex, or an
    /// expression that cannot select nodes.
    pub fn compile(&self, expression: &str) -> Result<CompiledQuery, QueryError> {
        let expr = parser::parse(expression, &self.registry)?;
        if !expr.returns_nodes() {
            return Err(QueryError::syntax(0, "expression does not select nodes"));
        }
        trace!("compiled {expression:?}");
        Ok(CompiledQuery {
            expression: expression.to_string(),
            expr: Arc::new(expr),
        })
    }

    /// Evaluate a compiled query; see [`CompiledQuery::evaluate`].
    pub fn evaluate(
        &self,
        query: &CompiledQuery,
        tree: &SyntaxTree,
    ) -> Result<Vec<NodeId>, QueryError> {
        query.evaluate(tree)
    }
}

/// A validated expression, shareable across threads.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    expression: String,
    expr: Arc<Expr>,
}

impl CompiledQuery {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Matched elements in document order, without duplicates.
    ///
    /// Matched attributes report their owning element. Evaluation never
    /// changes the tree.
    pub fn evaluate(&self, tree: &SyntaxTree) -> Result<Vec<NodeId>, QueryError> {
        Evaluator::new(tree).select(&self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Position, TreeWriter};

    /// ```text
    /// Module                                     #0
    ///   Import name=os name=sys        (1,0)     #1
    ///   FunctionDef name=main          (3,0)     #2
    ///     Block                                  #3
    ///       Assign                     (4,4)     #4
    ///         Name id=x text=x         (4,4)     #5
    ///         Constant text=1          (4,8)     #6
    ///       Return                     (5,4)     #7
    ///         Name id=x text=x         (5,11)    #8
    ///   FunctionDef name=_helper       (7,0)     #9
    ///     Block                                  #10
    ///       Pass                       (8,4)     #11
    /// ```
    fn sample() -> SyntaxTree {
        let source = "import os, sys\n\ndef main():\n    x = 1\n    return x\n\ndef _helper():\n    pass\n";
        let mut w = TreeWriter::new(source);
        w.open("Module", 0..source.len());
        w.position(Position::new(1, 0));

        w.open("Import", 0..14);
        w.position(Position::new(1, 0));
        w.attribute("name", "os");
        w.attribute("name", "sys");
        w.close();

        w.open("FunctionDef", 16..50);
        w.position(Position::new(3, 0));
        w.attribute("name", "main");
        w.open("Block", 32..50);
        w.open("Assign", 32..37);
        w.position(Position::new(4, 4));
        leaf(&mut w, "Name", 32..33, (4, 4), Some("x"), "x");
        leaf(&mut w, "Constant", 36..37, (4, 8), None, "1");
        w.close();
        w.open("Return", 42..50);
        w.position(Position::new(5, 4));
        leaf(&mut w, "Name", 49..50, (5, 11), Some("x"), "x");
        w.close();
        w.close();
        w.close();

        w.open("FunctionDef", 52..source.len());
        w.position(Position::new(7, 0));
        w.attribute("name", "_helper");
        w.open("Block", 71..source.len());
        leaf(&mut w, "Pass", 71..75, (8, 4), None, "pass");
        w.close();
        w.close();

        w.close();
        w.finish()
    }

    fn leaf(
        w: &mut TreeWriter,
        tag: &str,
        span: std::ops::Range<usize>,
        (line, col): (usize, usize),
        id: Option<&str>,
        text: &str,
    ) {
        w.open(tag, span);
        w.position(Position::new(line, col));
        if let Some(id) = id {
            w.attribute("id", id);
        }
        w.text(text);
        w.close();
    }

    fn select(expr: &str) -> Vec<u32> {
        let engine = QueryEngine::new();
        let query = engine.compile(expr).unwrap();
        engine
            .evaluate(&query, &sample())
            .unwrap()
            .into_iter()
            .map(|id| id.0)
            .collect()
    }

    #[test]
    fn descendant_name_test() {
        assert_eq!(select("//FunctionDef"), vec![2, 9]);
        assert_eq!(select("//Name"), vec![5, 8]);
        assert_eq!(select("//Nope"), Vec::<u32>::new());
    }

    #[test]
    fn absolute_and_relative_paths() {
        assert_eq!(select("/Module/Import"), vec![1]);
        assert_eq!(select("Module/FunctionDef/Block"), vec![3, 10]);
        assert_eq!(select("/"), vec![0]);
        assert_eq!(select("/*"), vec![0]);
    }

    #[test]
    fn attribute_predicates() {
        assert_eq!(select("//FunctionDef[@name='main']"), vec![2]);
        assert_eq!(select("//Import[@name='sys']"), vec![1]);
        assert_eq!(select("//*[@lineno=4]"), vec![4, 5, 6]);
        assert_eq!(select("//*[@lineno > 4 and @lineno < 8]"), vec![7, 8, 9]);
    }

    #[test]
    fn attribute_selection_reports_owner() {
        assert_eq!(select("//Import/@name"), vec![1]);
    }

    #[test]
    fn positional_predicates() {
        assert_eq!(select("//FunctionDef[1]"), vec![2]);
        assert_eq!(select("//FunctionDef[last()]"), vec![9]);
        assert_eq!(select("/Module/*[2]"), vec![2]);
        assert_eq!(select("(//Name)[2]"), vec![8]);
        assert_eq!(select("//Block/*[position() > 1]"), vec![7]);
    }

    #[test]
    fn reverse_axes_count_backwards() {
        assert_eq!(select("//Return/ancestor::*[1]"), vec![3]);
        assert_eq!(select("//Return/ancestor::*[last()]"), vec![0]);
        assert_eq!(select("//Return/preceding-sibling::*[1]"), vec![4]);
    }

    #[test]
    fn other_axes() {
        assert_eq!(select("//Assign/following-sibling::Return"), vec![7]);
        assert_eq!(select("//Name/.."), vec![4, 7]);
        assert_eq!(select("//Name/parent::Return"), vec![7]);
        assert_eq!(select("//Pass/ancestor-or-self::FunctionDef"), vec![9]);
        assert_eq!(select("//Return/self::node()"), vec![7]);
        assert_eq!(select("//FunctionDef[.//Return]"), vec![2]);
        assert_eq!(select("//Block/descendant-or-self::Block"), vec![3, 10]);
    }

    #[test]
    fn functions() {
        assert_eq!(select("//FunctionDef[count(.//Name) = 2]"), vec![2]);
        assert_eq!(select("//FunctionDef[starts-with(@name, '_')]"), vec![9]);
        assert_eq!(select("//FunctionDef[not(starts-with(@name, '_'))]"), vec![2]);
        assert_eq!(select("//*[contains(name(), 'Def')]"), vec![2, 9]);
        assert_eq!(select("//Constant[number(@text) + 1 = 2]"), vec![6]);
        assert_eq!(select("//Import[string-length(@name) = 2]"), vec![1]);
        assert_eq!(select("//*[@text = concat('pa', 'ss')]"), vec![11]);
        assert_eq!(select("//Module[sum(.//Constant/@text) = 1]"), vec![0]);
    }

    #[test]
    fn string_value_of_elements() {
        assert_eq!(select("//Return[. = 'return x']"), vec![7]);
        assert_eq!(select("//Assign[normalize-space(.) = 'x = 1']"), vec![4]);
    }

    #[test]
    fn regex_extensions() {
        assert_eq!(select("//FunctionDef[re:match('_', @name)]"), vec![9]);
        assert_eq!(select("//FunctionDef[re:match('ai', @name)]"), Vec::<u32>::new());
        assert_eq!(select("//FunctionDef[re:search('ai', @name)]"), vec![2]);
        assert_eq!(select("//Import[re:match('^sys$', @name)]"), vec![1]);
        assert_eq!(select("//Pass[re:search('.', @missing)]"), Vec::<u32>::new());
    }

    #[test]
    fn computed_regex_errors_at_evaluation() {
        let engine = QueryEngine::new();
        let query = engine
            .compile("//FunctionDef[re:search(concat('(', @name), @name)]")
            .unwrap();
        let err = query.evaluate(&sample()).unwrap_err();
        assert!(matches!(err, QueryError::Evaluation { .. }), "{err:?}");
    }

    #[test]
    fn union_is_document_ordered() {
        assert_eq!(select("//Return | //Import | //Return"), vec![1, 7]);
    }

    #[test]
    fn scalar_expressions_are_rejected() {
        let engine = QueryEngine::new();
        assert!(matches!(
            engine.compile("count(//Name)"),
            Err(QueryError::Syntax { .. })
        ));
        assert!(engine.compile("1 + 1").is_err());
    }

    #[test]
    fn custom_extension_predicates() {
        #[derive(Debug)]
        struct AnyNonEmpty;
        impl ExtensionPredicate for AnyNonEmpty {
            fn test(&self, _pattern: &regex::Regex, strings: &[String]) -> bool {
                strings.iter().any(|s| !s.is_empty())
            }
        }

        let mut registry = FunctionRegistry::empty();
        registry.register("x", "present", AnyNonEmpty);
        let engine = QueryEngine::with_registry(registry);
        let query = engine.compile("//*[x:present('', @id)]").unwrap();
        let ids: Vec<u32> = query.evaluate(&sample()).unwrap().into_iter().map(|i| i.0).collect();
        assert_eq!(ids, vec![5, 8]);
        assert!(engine.compile("//*[re:match('a', @id)]").is_err());
    }

    #[test]
    fn compiled_queries_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledQuery>();
        assert_send_sync::<QueryEngine>();
    }
}
