//! Integration tests for the full search pipeline.
//!
//! These tests load the rule file and fixtures under `testdata/`, run
//! searches through the `Manager` and check the aggregated results.

use std::path::{Path, PathBuf};

use astrx::config::{Config, YamlFileSource};
use astrx::rules::{Manager, SelectionMode};
use astrx::search::{Failure, Parallelism, Searcher};
use astrx::{BuildOptions, FileCache, QueryEngine, Rule, TreeBuilder};
use indexmap::IndexMap;

fn testdata_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

/// Manager over `testdata/<folder>` with the shared rule file.
fn manager_for(folder: &str) -> Manager {
    let rules = testdata_path().join("rules.yaml");
    let mut config = Config::parse_file(&rules).expect("should parse rules.yaml");
    config.folder = testdata_path().join(folder);

    let mut manager = Manager::new(config, Box::new(YamlFileSource::new(rules)));
    manager.load_files().expect("should collect fixture files");
    manager
}

fn file_names(paths: impl Iterator<Item = PathBuf>) -> Vec<String> {
    paths
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn unused_import_end_to_end() {
    let mut manager = manager_for("corpus");
    assert_eq!(manager.workspace().files().len(), 3);

    manager.set_rule("unused-import");
    assert_eq!(manager.selection_mode(), SelectionMode::AdHoc);
    let result = manager.search();

    assert_eq!(result.rule_totals["unused-import"], 3);
    assert_eq!(result.files_searched, 3);
    assert_eq!(
        file_names(result.files.iter().map(|f| f.path.clone())),
        vec!["a.py", "c.py"]
    );

    let a = &result.files[0];
    assert_eq!(a.count(), 2);
    assert_eq!(a.lines.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
    let c = &result.files[1];
    let record = c.records().next().unwrap();
    assert_eq!((record.line, record.column), (2, 0));

    // Pruning with these totals keeps the rule.
    assert!(manager.filter_rules(&result.rule_totals).is_empty());
    assert!(manager.rules().contains("unused-import"));
}

#[test]
fn pruning_removes_exactly_the_silent_rules() {
    let mut manager = manager_for("corpus");
    manager.set_filtered_selection(["no-lambdas", "classes"]);
    assert_eq!(manager.selection_mode(), SelectionMode::Filtered);
    manager.set_filtered_selection(Vec::<String>::new());

    let result = manager.search();
    let totals: Vec<(&str, usize)> = result
        .rule_totals
        .iter()
        .map(|(name, count)| (name.as_str(), *count))
        .collect();
    assert_eq!(
        totals,
        vec![
            ("unused-import", 3),
            ("classes", 1),
            ("no-lambdas", 0),
            ("private-functions", 1),
        ]
    );

    manager.set_filtered_selection(["no-lambdas"]);
    let removed = manager.filter_rules(&result.rule_totals);
    assert_eq!(removed, vec!["no-lambdas"]);
    assert_eq!(
        manager.rules().names().collect::<Vec<_>>(),
        vec!["unused-import", "classes", "private-functions"]
    );
    assert!(manager.filtered_selection().is_empty());
    assert_eq!(manager.selection_mode(), SelectionMode::Default);
}

#[test]
fn ad_hoc_expression_overrides_until_reset() {
    let mut manager = manager_for("corpus");
    manager.set_filtered_selection(["classes"]);

    assert!(!manager.set_rule("//Return"));
    let result = manager.search();
    assert_eq!(result.rule_totals.len(), 1);
    assert_eq!(result.rule_totals["//Return"], 5);

    manager.reset_ad_hoc();
    let result = manager.search();
    assert_eq!(result.rule_totals.keys().collect::<Vec<_>>(), vec!["classes"]);
    assert_eq!(file_names(result.files.iter().map(|f| f.path.clone())), vec!["b.py"]);
}

#[test]
fn linter_mode_drops_non_linter_rules() {
    let rules = testdata_path().join("rules.yaml");
    let mut config = Config::parse_file(&rules).unwrap();
    config.linter = true;
    config.folder = testdata_path().join("corpus");
    let mut manager = Manager::new(config, Box::new(YamlFileSource::new(rules)));
    manager.load_files().unwrap();

    let result = manager.search();
    assert!(!result.rule_totals.contains_key("classes"));
    assert_eq!(result.total_matches(), 4);
}

#[test]
fn broken_files_are_reported_and_skipped() {
    let mut manager = manager_for("broken");
    manager.set_rule("unused-import");
    let result = manager.search();

    assert_eq!(result.files_searched, 2);
    assert_eq!(result.rule_totals["unused-import"], 1);
    assert!(result.is_degraded());
    match &result.failures[..] {
        [Failure::Parse { path, .. }] => assert!(path.ends_with("bad.py")),
        other => panic!("unexpected failures: {other:?}"),
    }
}

#[test]
fn folder_walk_skips_hidden_and_unsupported() {
    let manager = manager_for("mixed");
    let root = testdata_path().join("mixed");
    let relative: Vec<PathBuf> = manager
        .workspace()
        .files()
        .iter()
        .map(|p| p.strip_prefix(&root).unwrap().to_path_buf())
        .collect();
    assert_eq!(
        relative,
        vec![
            Path::new("app.py").to_path_buf(),
            Path::new("pkg").join("lib.rs"),
            Path::new("pkg").join("util.py"),
        ]
    );
}

#[test]
fn result_order_does_not_depend_on_scheduling() {
    let corpus = testdata_path().join("corpus");
    let mut paths: Vec<PathBuf> = ["c.py", "a.py", "b.py"].iter().map(|n| corpus.join(n)).collect();

    let cache = FileCache::default();
    let engine = QueryEngine::new();
    let searcher = Searcher::new(&cache, &engine);
    let mut rules = IndexMap::new();
    rules.insert("imports".to_string(), Rule::new("//Import"));
    rules.insert("returns".to_string(), Rule::new("//Return"));

    let baseline = searcher.search(&paths, &rules, Parallelism::Sequential);
    for _ in 0..8 {
        let parallel = searcher.search(&paths, &rules, Parallelism::Threads(Some(3)));
        assert_eq!(parallel.rule_totals, baseline.rule_totals);
        assert_eq!(
            parallel.files.iter().map(|f| &f.path).collect::<Vec<_>>(),
            paths.iter().collect::<Vec<_>>()
        );
    }

    paths.reverse();
    let reversed = searcher.search(&paths, &rules, Parallelism::Threads(None));
    assert_eq!(reversed.rule_totals, baseline.rule_totals);
    assert_eq!(
        file_names(reversed.files.iter().map(|f| f.path.clone())),
        vec!["b.py", "a.py", "c.py"]
    );
    // Every file was parsed once across all searches.
    assert_eq!(cache.build_count(), 3);
}

#[test]
fn positions_from_side_table_match_embedded_ones() {
    let corpus = testdata_path().join("corpus");
    let paths = vec![corpus.join("c.py")];
    let engine = QueryEngine::new();
    let mut rules = IndexMap::new();
    rules.insert("calls".to_string(), Rule::new("//Call[@function='_helper']/Name"));

    let locate = |annotate_positions| {
        let cache = FileCache::new(TreeBuilder::new(BuildOptions {
            normalize: false,
            annotate_positions,
        }));
        let result = Searcher::new(&cache, &engine).search(&paths, &rules, Parallelism::Sequential);
        result.files[0]
            .records()
            .map(|r| (r.line, r.column))
            .collect::<Vec<_>>()
    };

    let embedded = locate(true);
    assert_eq!(embedded, vec![(11, 15)]);
    assert_eq!(locate(false), embedded);
}

#[test]
fn normalized_search_ignores_spelling() {
    let corpus = testdata_path().join("corpus");
    let paths: Vec<PathBuf> = ["a.py", "c.py"].iter().map(|n| corpus.join(n)).collect();
    let cache = FileCache::new(TreeBuilder::new(BuildOptions {
        normalize: true,
        annotate_positions: true,
    }));
    let engine = QueryEngine::new();
    let mut rules = IndexMap::new();
    // Every identifier, function names included, becomes `_N`.
    rules.insert("defs".to_string(), Rule::new("//FunctionDef[starts-with(@name, '_')]"));
    rules.insert("raw".to_string(), Rule::new("//FunctionDef[@name='main']"));

    let result = Searcher::new(&cache, &engine).search(&paths, &rules, Parallelism::Sequential);
    assert_eq!(result.rule_totals["defs"], 3);
    assert_eq!(result.rule_totals["raw"], 0);
}
