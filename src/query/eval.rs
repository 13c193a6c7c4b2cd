//! Evaluation of parsed expressions against a [`SyntaxTree`].
//!
//! The data model has three kinds of node: a virtual document root above the
//! top element, elements, and attributes. Node-sets are kept in document
//! order and free of duplicates between steps.

use std::iter;

use regex::Regex;

use super::functions::CoreFunction;
use super::parser::{Axis, BinaryOp, Expr, ExtensionCall, NodeTest, Pattern, Step};
use crate::error::QueryError;
use crate::tree::{NodeId, SyntaxTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Item {
    Root,
    Node(NodeId),
    /// Attribute by index into its owner's attribute list.
    Attr(NodeId, u32),
}

impl Item {
    fn order_key(self) -> (u64, u32) {
        match self {
            Item::Root => (0, 0),
            Item::Node(id) => (id.index() as u64 + 1, 0),
            Item::Attr(id, idx) => (id.index() as u64 + 1, idx + 1),
        }
    }

    /// The element a match reports: attributes map to their owner and the
    /// document root to the top element.
    fn element(self, tree: &SyntaxTree) -> NodeId {
        match self {
            Item::Root => tree.root(),
            Item::Node(id) | Item::Attr(id, _) => id,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Nodes(Vec<Item>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Nodes(_) => "node-set",
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "boolean",
        }
    }
}

struct Context {
    item: Item,
    position: usize,
    size: usize,
}

pub(crate) struct Evaluator<'t> {
    tree: &'t SyntaxTree,
}

impl<'t> Evaluator<'t> {
    pub(crate) fn new(tree: &'t SyntaxTree) -> Self {
        Self { tree }
    }

    /// Evaluate from the document root and return the matched elements in
    /// document order.
    pub(crate) fn select(&self, expr: &Expr) -> Result<Vec<NodeId>, QueryError> {
        if self.tree.is_empty() {
            return Ok(Vec::new());
        }
        let context = Context {
            item: Item::Root,
            position: 1,
            size: 1,
        };
        let items = self.node_set(self.eval(expr, &context)?, "a rule expression")?;
        let mut ids: Vec<NodeId> = items.into_iter().map(|i| i.element(self.tree)).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn eval(&self, expr: &Expr, ctx: &Context) -> Result<Value, QueryError> {
        match expr {
            Expr::Literal(s) => Ok(Value::Str(s.clone())),
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Negate(inner) => {
                let value = self.eval(inner, ctx)?;
                Ok(Value::Num(-self.number(&value)))
            }
            Expr::Binary(op, left, right) => self.binary(*op, left, right, ctx),
            Expr::Call(function, args) => self.call(*function, args, ctx),
            Expr::Extension(call) => self.extension(call, ctx),
            Expr::Path { absolute, steps } => {
                let start = if *absolute { Item::Root } else { ctx.item };
                Ok(Value::Nodes(self.walk(vec![start], steps)?))
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let mut items = self.node_set(self.eval(primary, ctx)?, "a filter expression")?;
                for predicate in predicates {
                    items = self.filter(items, predicate)?;
                }
                Ok(Value::Nodes(self.walk(items, steps)?))
            }
        }
    }

    fn walk(&self, mut items: Vec<Item>, steps: &[Step]) -> Result<Vec<Item>, QueryError> {
        for step in steps {
            let mut next = Vec::new();
            for item in items {
                let mut candidates: Vec<Item> = self
                    .axis(item, step.axis)
                    .into_iter()
                    .filter(|c| self.test(*c, step.axis, &step.test))
                    .collect();
                for predicate in &step.predicates {
                    candidates = self.filter(candidates, predicate)?;
                }
                next.extend(candidates);
            }
            sort_unique(&mut next);
            items = next;
        }
        Ok(items)
    }

    /// Keep the items for which `predicate` holds. A numeric predicate
    /// selects by position in the given (axis) order.
    fn filter(&self, items: Vec<Item>, predicate: &Expr) -> Result<Vec<Item>, QueryError> {
        let size = items.len();
        let mut kept = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let ctx = Context {
                item,
                position: i + 1,
                size,
            };
            let keep = match self.eval(predicate, &ctx)? {
                Value::Num(n) => n == (i + 1) as f64,
                other => self.boolean(&other),
            };
            if keep {
                kept.push(item);
            }
        }
        Ok(kept)
    }

    /// Nodes along `axis` from `item`, nearest first for reverse axes.
    fn axis(&self, item: Item, axis: Axis) -> Vec<Item> {
        let tree = self.tree;
        match (axis, item) {
            (Axis::SelfAxis, _) => vec![item],
            (Axis::Child, Item::Root) => vec![Item::Node(tree.root())],
            (Axis::Child, Item::Node(id)) => tree
                .node(id)
                .children()
                .iter()
                .map(|c| Item::Node(*c))
                .collect(),
            (Axis::Descendant, Item::Root) => tree.ids().map(Item::Node).collect(),
            (Axis::Descendant, Item::Node(id)) => tree.descendants(id).map(Item::Node).collect(),
            (Axis::DescendantOrSelf, _) => iter::once(item)
                .chain(self.axis(item, Axis::Descendant))
                .collect(),
            (Axis::Parent, Item::Node(id)) => {
                vec![tree.node(id).parent().map_or(Item::Root, Item::Node)]
            }
            (Axis::Parent, Item::Attr(id, _)) => vec![Item::Node(id)],
            (Axis::Ancestor, Item::Node(id)) => tree
                .ancestors_or_self(id)
                .skip(1)
                .map(Item::Node)
                .chain(iter::once(Item::Root))
                .collect(),
            (Axis::Ancestor, Item::Attr(id, _)) => tree
                .ancestors_or_self(id)
                .map(Item::Node)
                .chain(iter::once(Item::Root))
                .collect(),
            (Axis::AncestorOrSelf, _) => iter::once(item)
                .chain(self.axis(item, Axis::Ancestor))
                .collect(),
            (Axis::FollowingSibling, Item::Node(id)) => {
                let siblings = self.siblings(id);
                match siblings.iter().position(|s| *s == id) {
                    Some(at) => siblings[at + 1..].iter().map(|s| Item::Node(*s)).collect(),
                    None => Vec::new(),
                }
            }
            (Axis::PrecedingSibling, Item::Node(id)) => {
                let siblings = self.siblings(id);
                match siblings.iter().position(|s| *s == id) {
                    Some(at) => siblings[..at].iter().rev().map(|s| Item::Node(*s)).collect(),
                    None => Vec::new(),
                }
            }
            (Axis::Attribute, Item::Node(id)) => (0..tree.node(id).attributes().len() as u32)
                .map(|idx| Item::Attr(id, idx))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn siblings(&self, id: NodeId) -> &'t [NodeId] {
        let tree = self.tree;
        match tree.node(id).parent() {
            Some(parent) => tree.node(parent).children(),
            None => &[],
        }
    }

    fn test(&self, item: Item, axis: Axis, test: &NodeTest) -> bool {
        match (item, test) {
            (_, NodeTest::AnyNode) => true,
            (Item::Root, _) => false,
            // Name tests see attributes only along the attribute axis.
            (Item::Attr(..), _) if axis != Axis::Attribute => false,
            (Item::Attr(..), NodeTest::Wildcard) => true,
            (Item::Attr(id, idx), NodeTest::Name(name)) => self
                .tree
                .node(id)
                .attributes()
                .get(idx as usize)
                .is_some_and(|a| a.name == *name),
            (Item::Node(_), NodeTest::Wildcard) => true,
            (Item::Node(id), NodeTest::Name(name)) => self.tree.node(id).tag() == name,
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        ctx: &Context,
    ) -> Result<Value, QueryError> {
        match op {
            BinaryOp::Or => {
                let l = self.eval(left, ctx)?;
                if self.boolean(&l) {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(right, ctx)?;
                Ok(Value::Bool(self.boolean(&r)))
            }
            BinaryOp::And => {
                let l = self.eval(left, ctx)?;
                if !self.boolean(&l) {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(right, ctx)?;
                Ok(Value::Bool(self.boolean(&r)))
            }
            BinaryOp::Union => {
                let mut l = self.node_set(self.eval(left, ctx)?, "'|'")?;
                l.extend(self.node_set(self.eval(right, ctx)?, "'|'")?);
                sort_unique(&mut l);
                Ok(Value::Nodes(l))
            }
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                let l = self.eval(left, ctx)?;
                let r = self.eval(right, ctx)?;
                Ok(Value::Bool(self.compare(op, &l, &r)))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let l = self.number(&self.eval(left, ctx)?);
                let r = self.number(&self.eval(right, ctx)?);
                Ok(Value::Num(match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    _ => l % r,
                }))
            }
        }
    }

    /// Comparison with node-set existential semantics: a node-set compares
    /// true when any of its members does.
    fn compare(&self, op: BinaryOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(l), Value::Nodes(r)) => {
                let rights: Vec<Value> = r.iter().map(|i| Value::Str(self.string_of(*i))).collect();
                l.iter().any(|i| {
                    let lv = Value::Str(self.string_of(*i));
                    rights.iter().any(|rv| self.compare_scalars(op, &lv, rv))
                })
            }
            (Value::Nodes(_), Value::Bool(_)) | (Value::Bool(_), Value::Nodes(_)) => self
                .compare_scalars(
                    op,
                    &Value::Bool(self.boolean(left)),
                    &Value::Bool(self.boolean(right)),
                ),
            (Value::Nodes(l), scalar) => l
                .iter()
                .any(|i| self.compare_scalars(op, &self.atomize(*i, scalar), scalar)),
            (scalar, Value::Nodes(r)) => r
                .iter()
                .any(|i| self.compare_scalars(op, scalar, &self.atomize(*i, scalar))),
            _ => self.compare_scalars(op, left, right),
        }
    }

    /// A node's value converted to the type of the scalar it is compared to.
    fn atomize(&self, item: Item, like: &Value) -> Value {
        let s = self.string_of(item);
        match like {
            Value::Num(_) => Value::Num(parse_number(&s)),
            _ => Value::Str(s),
        }
    }

    fn compare_scalars(&self, op: BinaryOp, left: &Value, right: &Value) -> bool {
        match op {
            BinaryOp::Eq | BinaryOp::NotEq => {
                let equal = match (left, right) {
                    (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                        self.boolean(left) == self.boolean(right)
                    }
                    (Value::Num(_), _) | (_, Value::Num(_)) => {
                        self.number(left) == self.number(right)
                    }
                    _ => self.string(left) == self.string(right),
                };
                equal == (op == BinaryOp::Eq)
            }
            _ => {
                let (l, r) = (self.number(left), self.number(right));
                match op {
                    BinaryOp::Lt => l < r,
                    BinaryOp::Le => l <= r,
                    BinaryOp::Gt => l > r,
                    _ => l >= r,
                }
            }
        }
    }

    fn call(
        &self,
        function: CoreFunction,
        args: &[Expr],
        ctx: &Context,
    ) -> Result<Value, QueryError> {
        let arg = |n: usize| -> Result<Option<Value>, QueryError> {
            args.get(n).map(|a| self.eval(a, ctx)).transpose()
        };
        // String argument, defaulting to the context node's string-value.
        let string_arg = |n: usize| -> Result<String, QueryError> {
            Ok(match arg(n)? {
                Some(v) => self.string(&v),
                None => self.string_of(ctx.item),
            })
        };

        Ok(match function {
            CoreFunction::Last => Value::Num(ctx.size as f64),
            CoreFunction::Position => Value::Num(ctx.position as f64),
            CoreFunction::Count => {
                let items = self.node_set(self.required(arg(0)?)?, "count()")?;
                Value::Num(items.len() as f64)
            }
            CoreFunction::Name | CoreFunction::LocalName => {
                let item = match arg(0)? {
                    Some(v) => self.node_set(v, "name()")?.first().copied(),
                    None => Some(ctx.item),
                };
                Value::Str(item.map(|i| self.name_of(i)).unwrap_or_default())
            }
            CoreFunction::String => Value::Str(string_arg(0)?),
            CoreFunction::Concat => {
                let mut out = String::new();
                for a in args {
                    out.push_str(&self.string(&self.eval(a, ctx)?));
                }
                Value::Str(out)
            }
            CoreFunction::StartsWith => {
                Value::Bool(string_arg(0)?.starts_with(string_arg(1)?.as_str()))
            }
            CoreFunction::Contains => Value::Bool(string_arg(0)?.contains(string_arg(1)?.as_str())),
            CoreFunction::SubstringBefore => {
                let (s, sep) = (string_arg(0)?, string_arg(1)?);
                Value::Str(
                    s.split_once(sep.as_str())
                        .map(|(before, _)| before.to_string())
                        .unwrap_or_default(),
                )
            }
            CoreFunction::SubstringAfter => {
                let (s, sep) = (string_arg(0)?, string_arg(1)?);
                Value::Str(
                    s.split_once(sep.as_str())
                        .map(|(_, after)| after.to_string())
                        .unwrap_or_default(),
                )
            }
            CoreFunction::StringLength => Value::Num(string_arg(0)?.chars().count() as f64),
            CoreFunction::NormalizeSpace => Value::Str(
                string_arg(0)?
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            CoreFunction::Not => Value::Bool(!self.boolean(&self.required(arg(0)?)?)),
            CoreFunction::True => Value::Bool(true),
            CoreFunction::False => Value::Bool(false),
            CoreFunction::Boolean => Value::Bool(self.boolean(&self.required(arg(0)?)?)),
            CoreFunction::Number => Value::Num(match arg(0)? {
                Some(v) => self.number(&v),
                None => parse_number(&self.string_of(ctx.item)),
            }),
            CoreFunction::Sum => {
                let items = self.node_set(self.required(arg(0)?)?, "sum()")?;
                Value::Num(
                    items
                        .into_iter()
                        .map(|i| parse_number(&self.string_of(i)))
                        .sum(),
                )
            }
            CoreFunction::Floor => Value::Num(self.number(&self.required(arg(0)?)?).floor()),
            CoreFunction::Ceiling => Value::Num(self.number(&self.required(arg(0)?)?).ceil()),
            CoreFunction::Round => {
                let n = self.number(&self.required(arg(0)?)?);
                Value::Num(if n.is_finite() { (n + 0.5).floor() } else { n })
            }
        })
    }

    fn required(&self, value: Option<Value>) -> Result<Value, QueryError> {
        value.ok_or_else(|| QueryError::evaluation("missing function argument"))
    }

    fn extension(&self, call: &ExtensionCall, ctx: &Context) -> Result<Value, QueryError> {
        let computed;
        let pattern: &Regex = match &call.pattern {
            Pattern::Compiled(re) => re,
            Pattern::Computed(expr) => {
                let raw = self.string(&self.eval(expr, ctx)?);
                computed = Regex::new(&raw).map_err(|e| {
                    QueryError::evaluation(format!(
                        "invalid regular expression {raw:?} in {}(): {e}",
                        call.name
                    ))
                })?;
                &computed
            }
        };
        let strings: Vec<String> = match self.eval(&call.subject, ctx)? {
            Value::Nodes(items) => items.into_iter().map(|i| self.string_of(i)).collect(),
            other => vec![self.string(&other)],
        };
        Ok(Value::Bool(call.predicate.test(pattern, &strings)))
    }

    fn node_set(&self, value: Value, what: &str) -> Result<Vec<Item>, QueryError> {
        match value {
            Value::Nodes(items) => Ok(items),
            other => Err(QueryError::evaluation(format!(
                "{what} requires a node-set, got a {}",
                other.type_name()
            ))),
        }
    }

    fn name_of(&self, item: Item) -> String {
        match item {
            Item::Root => String::new(),
            Item::Node(id) => self.tree.node(id).tag().to_string(),
            Item::Attr(id, idx) => self
                .tree
                .node(id)
                .attributes()
                .get(idx as usize)
                .map(|a| a.name.clone())
                .unwrap_or_default(),
        }
    }

    fn string_of(&self, item: Item) -> String {
        match item {
            Item::Root => self.tree.string_value(self.tree.root()),
            Item::Node(id) => self.tree.string_value(id),
            Item::Attr(id, idx) => self
                .tree
                .node(id)
                .attributes()
                .get(idx as usize)
                .map(|a| a.value.clone())
                .unwrap_or_default(),
        }
    }

    fn string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(items) => items
                .first()
                .map(|i| self.string_of(*i))
                .unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => parse_number(&self.string(other)),
        }
    }

    fn boolean(&self, value: &Value) -> bool {
        match value {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }
}

fn sort_unique(items: &mut Vec<Item>) {
    items.sort_by_key(|i| i.order_key());
    items.dedup();
}

/// Number syntax of the expression language: optional minus, digits and at
/// most one dot. Anything else is NaN.
fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    let digits = t.strip_prefix('-').unwrap_or(t);
    let valid = !digits.is_empty()
        && digits != "."
        && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && digits.bytes().filter(|b| *b == b'.').count() <= 1;
    if valid {
        t.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_parsing() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number("-1.5"), -1.5);
        assert_eq!(parse_number(".5"), 0.5);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("").is_nan());
        assert!(parse_number("1.2.3").is_nan());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn document_order_keys() {
        let mut items = vec![
            Item::Attr(NodeId(1), 0),
            Item::Node(NodeId(2)),
            Item::Root,
            Item::Node(NodeId(1)),
            Item::Node(NodeId(1)),
        ];
        sort_unique(&mut items);
        assert_eq!(
            items,
            vec![
                Item::Root,
                Item::Node(NodeId(1)),
                Item::Attr(NodeId(1), 0),
                Item::Node(NodeId(2)),
            ]
        );
    }
}
