//! Path expressions evaluated against trees parsed from the fixtures.

use std::path::PathBuf;

use astrx::query::{ExtensionPredicate, FunctionRegistry, QueryEngine};
use astrx::{LocationMapper, QueryError, SyntaxTree, TreeBuilder};
use regex::Regex;

fn fixture(name: &str) -> SyntaxTree {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("corpus")
        .join(name);
    let (_, built) = TreeBuilder::default()
        .build_file(&path)
        .expect("fixture should parse");
    built.tree
}

/// `(line, column)` of every match.
fn lines(engine: &QueryEngine, tree: &SyntaxTree, expr: &str) -> Vec<(usize, usize)> {
    let query = engine.compile(expr).expect("expression should compile");
    query
        .evaluate(tree)
        .expect("evaluation should succeed")
        .into_iter()
        .map(|id| {
            let loc = LocationMapper::locate(tree, id, None).unwrap();
            (loc.line, loc.column)
        })
        .collect()
}

#[test]
fn axes_over_parsed_python() {
    let engine = QueryEngine::new();
    let b = fixture("b.py");
    let c = fixture("c.py");

    assert_eq!(lines(&engine, &b, "//FunctionDef[ancestor::ClassDef]"), vec![(5, 4)]);
    assert_eq!(lines(&engine, &b, "/Module/ClassDef/@name"), vec![(4, 0)]);
    assert_eq!(lines(&engine, &c, "//FunctionDef[.//Call]"), vec![(5, 0), (9, 0)]);
    assert_eq!(lines(&engine, &c, "//If/following-sibling::Return"), vec![(12, 4)]);
    assert_eq!(
        lines(&engine, &c, "//Return[1]/ancestor::FunctionDef[1]"),
        vec![(5, 0), (9, 0)]
    );
}

#[test]
fn regex_predicates_over_attributes() {
    let engine = QueryEngine::new();
    let a = fixture("a.py");

    assert_eq!(
        lines(&engine, &a, "//Import[re:match('unused_', @name)]"),
        vec![(2, 0), (3, 0)]
    );
    assert_eq!(lines(&engine, &a, "//Import[re:match('alpha', @name)]"), vec![]);
    assert_eq!(lines(&engine, &a, "//Import[re:search('alpha', @name)]"), vec![(2, 0)]);
    assert_eq!(
        lines(&engine, &a, "//Import[not(re:search('unused', @name))]"),
        vec![(1, 0)]
    );
}

#[test]
fn compile_errors_are_syntax_errors() {
    let engine = QueryEngine::new();
    for expr in [
        "//Import[",
        "count(//Import)",
        "//Import[re:search('(', @name)]",
        "//Import[nope(@name)]",
        "//Import[contains(@name)]",
    ] {
        assert!(
            matches!(engine.compile(expr), Err(QueryError::Syntax { .. })),
            "{expr} should not compile"
        );
    }
}

#[derive(Debug)]
struct FullMatch;

impl ExtensionPredicate for FullMatch {
    fn test(&self, pattern: &Regex, strings: &[String]) -> bool {
        strings.iter().any(|s| {
            pattern
                .find(s)
                .is_some_and(|m| m.start() == 0 && m.end() == s.len())
        })
    }
}

#[test]
fn custom_predicates_plug_into_the_registry() {
    let mut registry = FunctionRegistry::standard();
    registry.register("re", "fullmatch", FullMatch);
    let engine = QueryEngine::with_registry(registry);
    let c = fixture("c.py");

    assert_eq!(lines(&engine, &c, "//FunctionDef[re:fullmatch('run', @name)]"), vec![(9, 0)]);
    assert_eq!(lines(&engine, &c, "//FunctionDef[re:fullmatch('ru', @name)]"), vec![]);
    assert_eq!(
        lines(&engine, &c, "//FunctionDef[re:match('ru', @name)]"),
        vec![(9, 0)]
    );

    assert!(QueryEngine::new()
        .compile("//FunctionDef[re:fullmatch('run', @name)]")
        .is_err());
}
