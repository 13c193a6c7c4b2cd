//! Mapping matched nodes back to source positions.

use serde::Serialize;

use crate::error::LocationError;
use crate::tree::{NodeId, PositionTable, SyntaxTree};

/// A resolved source position. `line` is 1-based, `column` 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// Resolves nodes to the position of their nearest positioned ancestor.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationMapper;

impl LocationMapper {
    /// Position of `node`, or of its nearest ancestor that has one.
    ///
    /// Positions embedded in the tree are searched first. When none of the
    /// ancestors carries one, the same chain is searched in `fallback`,
    /// which is where trees built without annotations keep their positions.
    /// A missing column defaults to 0.
    pub fn locate(
        tree: &SyntaxTree,
        node: NodeId,
        fallback: Option<&PositionTable>,
    ) -> Result<Location, LocationError> {
        if tree.get(node).is_none() {
            return Err(LocationError::UnknownNode(node));
        }

        let embedded = tree
            .ancestors_or_self(node)
            .find_map(|id| tree.node(id).position());
        let position = embedded.or_else(|| {
            let table = fallback?;
            tree.ancestors_or_self(node)
                .find_map(|id| table.get(&id).copied())
        });

        match position {
            Some(p) if p.line >= 1 => Ok(Location {
                line: p.line,
                column: p.column.unwrap_or(0),
            }),
            _ => Err(LocationError::NoPosition(node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Position, TreeWriter};

    /// Module > FunctionDef(2,4) > Block > If > Name
    fn nested(annotate: bool) -> (SyntaxTree, PositionTable) {
        let mut table = PositionTable::new();
        let mut w = TreeWriter::new("");
        w.open("Module", 0..0);
        let func = w.open("FunctionDef", 0..0);
        if annotate {
            w.position(Position::new(2, 4));
        } else {
            table.insert(func, Position::new(2, 4));
        }
        w.open("Block", 0..0);
        w.open("If", 0..0);
        w.open("Name", 0..0);
        w.close();
        w.close();
        w.close();
        w.close();
        w.close();
        (w.finish(), table)
    }

    #[test]
    fn uses_nearest_positioned_ancestor() {
        let (tree, _) = nested(true);
        let name = NodeId(4);
        assert_eq!(tree.node(name).tag(), "Name");
        let loc = LocationMapper::locate(&tree, name, None).unwrap();
        assert_eq!(loc, Location { line: 2, column: 4 });
    }

    #[test]
    fn own_position_wins() {
        let mut w = TreeWriter::new("");
        w.open("Module", 0..0);
        w.position(Position::new(1, 0));
        let call = w.open("Call", 0..0);
        w.position(Position::new(7, 12));
        w.close();
        w.close();
        let tree = w.finish();
        let loc = LocationMapper::locate(&tree, call, None).unwrap();
        assert_eq!(loc, Location { line: 7, column: 12 });
    }

    #[test]
    fn missing_column_defaults_to_zero() {
        let mut w = TreeWriter::new("");
        let root = w.open("Module", 0..0);
        w.position(Position::line_only(3));
        w.close();
        let tree = w.finish();
        let loc = LocationMapper::locate(&tree, root, None).unwrap();
        assert_eq!(loc, Location { line: 3, column: 0 });
    }

    #[test]
    fn falls_back_to_side_table() {
        let (tree, table) = nested(false);
        let name = NodeId(4);
        assert_eq!(
            LocationMapper::locate(&tree, name, None),
            Err(LocationError::NoPosition(name))
        );
        let loc = LocationMapper::locate(&tree, name, Some(&table)).unwrap();
        assert_eq!(loc, Location { line: 2, column: 4 });
    }

    #[test]
    fn unknown_node() {
        let (tree, _) = nested(true);
        assert_eq!(
            LocationMapper::locate(&tree, NodeId(99), None),
            Err(LocationError::UnknownNode(NodeId(99)))
        );
    }
}
