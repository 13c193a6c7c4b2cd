//! Canonical spelling of identifiers and literals.
//!
//! Identifiers are renamed `_0`, `_1`, ... in order of first appearance so
//! that two snippets differing only in naming produce the same tree.
//! String literals collapse to `"_"` and numbers to `0`.

use std::collections::HashMap;

use super::Grammar;

pub(crate) const STRING_PLACEHOLDER: &str = "\"_\"";
pub(crate) const NUMBER_PLACEHOLDER: &str = "0";

/// Renaming table built from one pre-order pass over a parse tree.
#[derive(Debug, Default)]
pub(crate) struct Normalizer {
    identifiers: HashMap<String, String>,
}

impl Normalizer {
    /// Assign canonical identifier names in document order.
    pub(crate) fn scan(root: tree_sitter::Node<'_>, source: &[u8], grammar: &Grammar) -> Self {
        let mut normalizer = Normalizer::default();
        let mut cursor = root.walk();
        let mut visited_children = false;

        loop {
            let node = cursor.node();
            if !visited_children {
                if grammar.identifier_kinds.contains(&node.kind()) {
                    let raw = node.utf8_text(source).unwrap_or_default();
                    normalizer.intern(raw);
                }
                // Opaque literals never contain identifiers worth renaming.
                if !grammar.is_opaque(node.kind()) && cursor.goto_first_child() {
                    continue;
                }
            }
            if cursor.goto_next_sibling() {
                visited_children = false;
            } else if cursor.goto_parent() {
                visited_children = true;
            } else {
                break;
            }
        }

        normalizer
    }

    fn intern(&mut self, raw: &str) {
        let next = self.identifiers.len();
        self.identifiers
            .entry(raw.to_string())
            .or_insert_with(|| format!("_{next}"));
    }

    /// Canonical text for a token of `kind`, or `None` when the kind is not
    /// subject to normalization.
    pub(crate) fn canonical(&self, grammar: &Grammar, kind: &str, raw: &str) -> Option<String> {
        if grammar.identifier_kinds.contains(&kind) {
            return Some(
                self.identifiers
                    .get(raw)
                    .cloned()
                    .unwrap_or_else(|| raw.to_string()),
            );
        }
        if grammar.string_kinds.contains(&kind) {
            return Some(STRING_PLACEHOLDER.to_string());
        }
        if grammar.number_kinds.contains(&kind) {
            return Some(NUMBER_PLACEHOLDER.to_string());
        }
        None
    }

    /// Source text of `node` with every normalizable token replaced.
    pub(crate) fn rewrite(
        &self,
        grammar: &Grammar,
        node: tree_sitter::Node<'_>,
        source: &[u8],
    ) -> String {
        let base = node.start_byte();
        let original = node.utf8_text(source).unwrap_or_default();
        let mut replacements = Vec::new();
        self.collect_replacements(grammar, node, source, &mut replacements);

        let mut out = String::with_capacity(original.len());
        let mut cursor = 0;
        for (start, end, text) in replacements {
            let (start, end) = (start - base, end - base);
            if start < cursor || end > original.len() {
                continue;
            }
            out.push_str(&original[cursor..start]);
            out.push_str(&text);
            cursor = end;
        }
        out.push_str(&original[cursor..]);
        out
    }

    /// Replacements inside `node`, in document order. A replaced token is
    /// not descended into.
    fn collect_replacements(
        &self,
        grammar: &Grammar,
        node: tree_sitter::Node<'_>,
        source: &[u8],
        out: &mut Vec<(usize, usize, String)>,
    ) {
        let mut cursor = node.walk();
        let mut depth = 0usize;
        loop {
            let current = cursor.node();
            let mut descend = depth == 0 || current.is_named();
            if descend {
                let raw = current.utf8_text(source).unwrap_or_default();
                if let Some(text) = self.canonical(grammar, current.kind(), raw) {
                    out.push((current.start_byte(), current.end_byte(), text));
                    descend = false;
                }
            }
            if descend && cursor.goto_first_child() {
                depth += 1;
                continue;
            }
            loop {
                if depth == 0 {
                    return;
                }
                if cursor.goto_next_sibling() {
                    break;
                }
                cursor.goto_parent();
                depth -= 1;
            }
        }
    }
}
