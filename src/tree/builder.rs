//! Builds [`SyntaxTree`]s from source text with tree-sitter.

use std::fs;
use std::path::Path;

use log::debug;
use tree_sitter::Parser;

use super::normalize::Normalizer;
use super::{grammar_for_path, Grammar, NodeId, Position, PositionTable, SyntaxTree, TreeWriter};
use crate::error::ParseError;

/// Field children longer than this are not projected onto their parent.
const MAX_PROJECTED_LEN: usize = 120;

/// Options controlling tree construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Canonicalize identifiers and literals before building.
    pub normalize: bool,
    /// Embed positions in the tree. When false, positions are returned in a
    /// separate [`PositionTable`].
    pub annotate_positions: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            normalize: false,
            annotate_positions: true,
        }
    }
}

/// Result of a build: the tree plus, when positions were not embedded, the
/// side table holding them.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    pub tree: SyntaxTree,
    pub positions: Option<PositionTable>,
}

/// Parses source text into position-annotated element trees.
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    options: BuildOptions,
}

impl TreeBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    /// Read and build a file, picking the grammar from its extension.
    pub fn build_file(&self, path: &Path) -> Result<(String, BuiltTree), ParseError> {
        let source = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let built = self.build_source(path, &source)?;
        Ok((source, built))
    }

    /// Build already-loaded source text; `path` selects the grammar and
    /// identifies the file in errors.
    pub fn build_source(&self, path: &Path, source: &str) -> Result<BuiltTree, ParseError> {
        let grammar = grammar_for_path(path).ok_or_else(|| ParseError::UnsupportedLanguage {
            path: path.to_path_buf(),
        })?;
        self.build_with_grammar(path, source, grammar)
    }

    /// Build with an explicit grammar.
    pub fn build_with_grammar(
        &self,
        path: &Path,
        source: &str,
        grammar: &Grammar,
    ) -> Result<BuiltTree, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&grammar.language())
            .map_err(|_| ParseError::ParserInit {
                path: path.to_path_buf(),
                language: grammar.id.to_string(),
            })?;
        let ts_tree = parser
            .parse(source, None)
            .ok_or_else(|| ParseError::ParseFailed {
                path: path.to_path_buf(),
            })?;

        let root = ts_tree.root_node();
        if root.has_error() {
            return Err(syntax_error(path, root, source));
        }

        let bytes = source.as_bytes();
        let normalizer = self
            .options
            .normalize
            .then(|| Normalizer::scan(root, bytes, grammar));

        let mut emitter = Emitter {
            grammar,
            source: bytes,
            normalizer: normalizer.as_ref(),
            annotate: self.options.annotate_positions,
            writer: TreeWriter::new(source),
            table: PositionTable::new(),
        };
        emitter.writer.set_normalized(self.options.normalize);
        emitter.emit(root);

        let tree = emitter.writer.finish();
        debug!(
            "built {} tree for {} ({} nodes, normalized: {})",
            grammar.id,
            path.display(),
            tree.len(),
            self.options.normalize
        );

        let positions = (!self.options.annotate_positions).then_some(emitter.table);
        Ok(BuiltTree { tree, positions })
    }
}

struct Emitter<'a> {
    grammar: &'a Grammar,
    source: &'a [u8],
    normalizer: Option<&'a Normalizer>,
    annotate: bool,
    writer: TreeWriter,
    table: PositionTable,
}

/// Pending work for the pre-order emission walk.
enum Visit<'t> {
    Open(tree_sitter::Node<'t>, bool),
    Close,
}

impl Emitter<'_> {
    /// Emit the subtree under `root`. The walk keeps its own stack, so
    /// nesting depth is bounded by memory rather than the thread stack.
    fn emit(&mut self, root: tree_sitter::Node<'_>) {
        let mut stack = vec![Visit::Open(root, true)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Open(node, is_root) => {
                    let children = self.open(node, is_root);
                    stack.push(Visit::Close);
                    stack.extend(children.into_iter().rev().map(|c| Visit::Open(c, false)));
                }
                Visit::Close => self.writer.close(),
            }
        }
    }

    /// Open the element for `node` and return the children still to emit.
    fn open<'t>(&mut self, node: tree_sitter::Node<'t>, is_root: bool) -> Vec<tree_sitter::Node<'t>> {
        let kind = node.kind();
        let id = self.writer.open(self.grammar.tag_for(kind), node.byte_range());

        let position = if self.grammar.is_unpositioned(kind) {
            is_root.then(|| Position::new(1, 0))
        } else {
            let start = node.start_position();
            Some(Position::new(start.row + 1, start.column))
        };
        if let Some(position) = position {
            self.record_position(id, position);
        }

        let children = if self.grammar.is_opaque(kind) {
            Vec::new()
        } else {
            named_children(node)
        };

        for (field, child) in &children {
            if let Some(field) = field {
                if let Some(value) = self.projection(*child) {
                    self.writer.attribute(*field, value);
                }
            }
        }

        if children.is_empty() {
            let text = self.token_text(node);
            self.writer.text(text);
        }

        children.into_iter().map(|(_, child)| child).collect()
    }

    fn record_position(&mut self, id: NodeId, position: Position) {
        if self.annotate {
            self.writer.position(position);
        } else {
            self.table.insert(id, position);
        }
    }

    /// Attribute value for a field child, if it is short enough to project.
    fn projection(&self, child: tree_sitter::Node<'_>) -> Option<String> {
        let raw = child.utf8_text(self.source).ok()?;
        if raw.len() > MAX_PROJECTED_LEN || raw.contains('\n') {
            return None;
        }
        Some(match self.normalizer {
            Some(n) => n.rewrite(self.grammar, child, self.source),
            None => raw.to_string(),
        })
    }

    fn token_text(&self, node: tree_sitter::Node<'_>) -> String {
        let raw = node.utf8_text(self.source).unwrap_or_default();
        self.normalizer
            .and_then(|n| n.canonical(self.grammar, node.kind(), raw))
            .unwrap_or_else(|| raw.to_string())
    }
}

/// Named, non-comment children together with the grammar field they fill.
fn named_children(node: tree_sitter::Node<'_>) -> Vec<(Option<&'static str>, tree_sitter::Node<'_>)> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            if child.is_named() && !child.is_extra() {
                out.push((cursor.field_name(), child));
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    out
}

/// First ERROR or MISSING node in document order.
fn first_error(root: tree_sitter::Node<'_>) -> Option<tree_sitter::Node<'_>> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        // Only subtrees reporting an error can contain one.
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

fn syntax_error(path: &Path, root: tree_sitter::Node<'_>, source: &str) -> ParseError {
    let node = first_error(root).unwrap_or(root);
    let start = node.start_position();
    let snippet: String = source
        .get(node.byte_range())
        .unwrap_or_default()
        .chars()
        .take(30)
        .collect();
    ParseError::Syntax {
        path: path.to_path_buf(),
        line: start.row + 1,
        column: start.column,
        snippet,
    }
}
