//! Position-annotated element tree queried by path expressions.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Each node owns the ids of
//! its children and keeps a plain parent index, so upward walks are
//! O(depth) without reference cycles. Ids are handed out in pre-order,
//! which makes id order identical to document order.
//!
//! ```text
//! source ──▶ TreeBuilder ──▶ TreeWriter ──▶ SyntaxTree
//!                 │                              │
//!                 └── optional PositionTable ◀───┘ (when not annotating)
//! ```

mod builder;
mod languages;
mod normalize;

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

pub use builder::{BuildOptions, BuiltTree, TreeBuilder};
pub use languages::{grammar_for_extension, grammar_for_path, supported_extensions, Grammar};

/// Attribute carrying the 1-based line of a positioned element.
pub const LINENO_ATTR: &str = "lineno";
/// Attribute carrying the 0-based column of a positioned element.
pub const COL_OFFSET_ATTR: &str = "col_offset";
/// Attribute carrying the token text of a leaf element.
pub const TEXT_ATTR: &str = "text";

/// Index of a node inside its [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source position of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Line (1-indexed).
    pub line: usize,
    /// Column in bytes (0-indexed). `None` when only the line is known.
    pub column: Option<usize>,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            line,
            column: Some(column),
        }
    }

    pub fn line_only(line: usize) -> Self {
        Self { line, column: None }
    }
}

/// Side table of positions, used when a tree is built without embedding
/// positions in the nodes themselves.
pub type PositionTable = HashMap<NodeId, Position>;

/// A named string attribute. Names may repeat on one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// One element of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    tag: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: Vec<Attribute>,
    position: Option<Position>,
    span: Range<usize>,
    text: Option<String>,
}

impl Node {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// All values of the attributes called `name`, in insertion order.
    pub fn attribute_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// First value of the attribute called `name`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Byte range of the element in the source text.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    /// Token text for leaf elements.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Hierarchical element tree over a piece of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    nodes: Vec<Node>,
    source: String,
    normalized: bool,
}

impl SyntaxTree {
    /// The top element.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Panics on an id from another tree; use [`SyntaxTree::get`] when the id
    /// is untrusted.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether identifiers and literals were canonicalized during the build.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// All node ids in document order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Ancestor-or-self chain, starting at `id` and ending at the root.
    pub fn ancestors_or_self(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |n| self.nodes[n.index()].parent)
    }

    /// Descendants of `id` in document order, excluding `id`.
    ///
    /// Because ids are pre-order, the subtree of `id` is exactly the id range
    /// up to the first node that is not a descendant.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let end = self.subtree_end(id);
        ((id.0 + 1)..end).map(NodeId)
    }

    /// One past the last id inside the subtree rooted at `id`.
    pub(crate) fn subtree_end(&self, id: NodeId) -> u32 {
        let mut current = id;
        loop {
            match self.nodes[current.index()].children.last() {
                Some(last) => current = *last,
                None => return current.0 + 1,
            }
        }
    }

    /// Depth of `id`, the root being 0.
    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors_or_self(id).count() - 1
    }

    /// String-value of an element: the source text it covers, or for
    /// normalized trees the space-joined canonical leaf texts.
    pub fn string_value(&self, id: NodeId) -> String {
        let node = &self.nodes[id.index()];
        if let Some(text) = &node.text {
            return text.clone();
        }
        if self.normalized {
            return self
                .descendants(id)
                .filter_map(|d| self.nodes[d.index()].text.as_deref())
                .collect::<Vec<_>>()
                .join(" ");
        }
        self.source
            .get(node.span.clone())
            .unwrap_or_default()
            .to_string()
    }

    /// Compare shape, tags, texts and non-positional attributes.
    ///
    /// Spans, embedded positions and `lineno`/`col_offset` attributes are
    /// ignored, so normalized snippets that differ only in spelling compare
    /// equal.
    pub fn structurally_eq(&self, other: &SyntaxTree) -> bool {
        if self.nodes.len() != other.nodes.len() {
            return false;
        }
        self.nodes.iter().zip(&other.nodes).all(|(a, b)| {
            a.tag == b.tag
                && a.parent == b.parent
                && a.children == b.children
                && a.text == b.text
                && non_positional(&a.attributes).eq(non_positional(&b.attributes))
        })
    }
}

fn non_positional(attrs: &[Attribute]) -> impl Iterator<Item = &Attribute> {
    attrs
        .iter()
        .filter(|a| a.name != LINENO_ATTR && a.name != COL_OFFSET_ATTR)
}

/// Streaming writer producing a [`SyntaxTree`] in pre-order.
///
/// ```
/// use astrx::tree::{Position, TreeWriter};
///
/// let mut w = TreeWriter::new("import os\n");
/// w.open("Module", 0..10);
/// w.open("Import", 0..9);
/// w.position(Position::new(1, 0));
/// w.attribute("name", "os");
/// w.close();
/// w.close();
/// let tree = w.finish();
/// assert_eq!(tree.len(), 2);
/// ```
#[derive(Debug)]
pub struct TreeWriter {
    nodes: Vec<Node>,
    stack: Vec<NodeId>,
    source: String,
    normalized: bool,
}

impl TreeWriter {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            nodes: Vec::new(),
            stack: Vec::new(),
            source: source.into(),
            normalized: false,
        }
    }

    pub(crate) fn set_normalized(&mut self, normalized: bool) {
        self.normalized = normalized;
    }

    /// Start a new element as the last child of the currently open one.
    pub fn open(&mut self, tag: impl Into<String>, span: Range<usize>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = self.stack.last().copied();
        if let Some(p) = parent {
            self.nodes[p.index()].children.push(id);
        }
        self.nodes.push(Node {
            tag: tag.into(),
            parent,
            children: Vec::new(),
            attributes: Vec::new(),
            position: None,
            span,
            text: None,
        });
        self.stack.push(id);
        id
    }

    /// Add an attribute to the open element.
    pub fn attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if let Some(node) = self.current() {
            node.attributes.push(Attribute {
                name: name.into(),
                value: value.into(),
            });
        }
    }

    /// Embed a position in the open element and expose it as
    /// `lineno`/`col_offset` attributes.
    pub fn position(&mut self, position: Position) {
        if let Some(node) = self.current() {
            node.position = Some(position);
            node.attributes.push(Attribute {
                name: LINENO_ATTR.to_string(),
                value: position.line.to_string(),
            });
            if let Some(col) = position.column {
                node.attributes.push(Attribute {
                    name: COL_OFFSET_ATTR.to_string(),
                    value: col.to_string(),
                });
            }
        }
    }

    /// Set the leaf text of the open element (also exposed as `@text`).
    pub fn text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(node) = self.current() {
            node.attributes.push(Attribute {
                name: TEXT_ATTR.to_string(),
                value: text.clone(),
            });
            node.text = Some(text);
        }
    }

    /// Close the open element.
    pub fn close(&mut self) {
        self.stack.pop();
    }

    /// Finish the tree, closing any element left open.
    ///
    /// An empty writer yields a tree with a single `Document` element.
    pub fn finish(mut self) -> SyntaxTree {
        if self.nodes.is_empty() {
            let len = self.source.len();
            self.open("Document", 0..len);
        }
        SyntaxTree {
            nodes: self.nodes,
            source: self.source,
            normalized: self.normalized,
        }
    }

    fn current(&mut self) -> Option<&mut Node> {
        let id = *self.stack.last()?;
        self.nodes.get_mut(id.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyntaxTree {
        // Module
        //   FunctionDef (1)
        //     Name (2)
        //     Block
        //       Return (3)
        //   Expr (5)
        let mut w = TreeWriter::new("def f():\n    return\nf()\n");
        w.open("Module", 0..24);
        w.open("FunctionDef", 0..19);
        w.position(Position::new(1, 0));
        w.attribute("name", "f");
        w.open("Name", 4..5);
        w.position(Position::new(1, 4));
        w.text("f");
        w.close();
        w.open("Block", 13..19);
        w.open("Return", 13..19);
        w.position(Position::new(2, 4));
        w.close();
        w.close();
        w.close();
        w.open("Expr", 20..23);
        w.position(Position::new(3, 0));
        w.close();
        w.close();
        w.finish()
    }

    #[test]
    fn ids_are_preorder() {
        let tree = sample();
        let tags: Vec<_> = tree.ids().map(|id| tree.node(id).tag().to_string()).collect();
        assert_eq!(tags, ["Module", "FunctionDef", "Name", "Block", "Return", "Expr"]);
    }

    #[test]
    fn parent_and_children_links() {
        let tree = sample();
        let block = NodeId(3);
        assert_eq!(tree.node(block).parent(), Some(NodeId(1)));
        assert_eq!(tree.node(NodeId(1)).children(), &[NodeId(2), NodeId(3)]);
        assert_eq!(tree.node(tree.root()).parent(), None);
    }

    #[test]
    fn descendants_cover_subtree_only() {
        let tree = sample();
        let desc: Vec<_> = tree.descendants(NodeId(1)).collect();
        assert_eq!(desc, vec![NodeId(2), NodeId(3), NodeId(4)]);
        assert_eq!(tree.descendants(NodeId(5)).count(), 0);
        assert_eq!(tree.descendants(tree.root()).count(), 5);
    }

    #[test]
    fn ancestors_walk_to_root() {
        let tree = sample();
        let chain: Vec<_> = tree.ancestors_or_self(NodeId(4)).collect();
        assert_eq!(chain, vec![NodeId(4), NodeId(3), NodeId(1), NodeId(0)]);
        assert_eq!(tree.depth(NodeId(4)), 3);
    }

    #[test]
    fn position_becomes_attributes() {
        let tree = sample();
        let func = tree.node(NodeId(1));
        assert_eq!(func.attribute(LINENO_ATTR), Some("1"));
        assert_eq!(func.attribute(COL_OFFSET_ATTR), Some("0"));
        assert_eq!(func.attribute("name"), Some("f"));
    }

    #[test]
    fn attribute_value_outlives_lookup_key() {
        let tree = sample();
        let value = {
            let key = String::from("name");
            tree.node(NodeId(1)).attribute(&key)
        };
        assert_eq!(value, Some("f"));
        assert_eq!(tree.node(NodeId(2)).attribute("name"), None);
    }

    #[test]
    fn string_value_uses_source_or_text() {
        let tree = sample();
        assert_eq!(tree.string_value(NodeId(2)), "f");
        assert_eq!(tree.string_value(NodeId(5)), "f()");
    }

    #[test]
    fn structural_equality_ignores_positions() {
        let a = sample();
        let mut w = TreeWriter::new("x");
        w.open("Module", 0..1);
        w.close();
        let b = w.finish();
        assert!(a.structurally_eq(&a.clone()));
        assert!(!a.structurally_eq(&b));
    }

    #[test]
    fn empty_writer_yields_document() {
        let tree = TreeWriter::new("").finish();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node(tree.root()).tag(), "Document");
    }
}
