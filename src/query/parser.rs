//! Recursive-descent parser from tokens to an expression tree.
//!
//! Function names are resolved here: core functions by name, prefixed ones
//! through the [`FunctionRegistry`]. Literal regex patterns are compiled
//! once, so a bad pattern is reported before any file is searched.

use std::sync::Arc;

use regex::Regex;

use super::functions::{CoreFunction, ExtensionPredicate, FunctionRegistry};
use super::lexer::{tokenize, Token, TokenKind};
use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "self" => Self::SelfAxis,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            "attribute" => Self::Attribute,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeTest {
    Name(String),
    /// `*`
    Wildcard,
    /// `node()`
    AnyNode,
}

#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Step {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::AnyNode,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Union,
}

#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Compiled(Regex),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) struct ExtensionCall {
    pub name: String,
    pub predicate: Arc<dyn ExtensionPredicate>,
    pub pattern: Pattern,
    pub subject: Box<Expr>,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Literal(String),
    Number(f64),
    Call(CoreFunction, Vec<Expr>),
    Extension(ExtensionCall),
    Path {
        absolute: bool,
        steps: Vec<Step>,
    },
    /// A primary expression with predicates and/or trailing steps.
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
}

impl Expr {
    /// Whether the expression statically evaluates to a node-set.
    pub(crate) fn returns_nodes(&self) -> bool {
        match self {
            Expr::Path { .. } | Expr::Filter { .. } => true,
            Expr::Binary(BinaryOp::Union, _, _) => true,
            _ => false,
        }
    }
}

pub(crate) fn parse(input: &str, registry: &FunctionRegistry) -> Result<Expr, QueryError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(QueryError::syntax(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        registry,
    };
    let expr = parser.or_expr()?;
    if let Some(token) = parser.tokens.get(parser.pos) {
        return Err(QueryError::syntax(
            token.offset,
            format!("unexpected token {:?}", token.kind),
        ));
    }
    Ok(expr)
}

struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    registry: &'r FunctionRegistry,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&TokenKind> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), QueryError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::syntax(self.offset(), message)
    }

    fn or_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.and_expr()?;
        while self.eat(&TokenKind::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.equality_expr()?;
        while self.eat(&TokenKind::And) {
            let right = self.equality_expr()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.relational_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Eq) => BinaryOp::Eq,
                Some(TokenKind::NotEq) => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.relational_expr()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn relational_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.additive_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::Le) => BinaryOp::Le,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                Some(TokenKind::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive_expr()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.multiplicative_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative_expr()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Multiply) => BinaryOp::Mul,
                Some(TokenKind::Div) => BinaryOp::Div,
                Some(TokenKind::Mod) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary_expr()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary_expr(&mut self) -> Result<Expr, QueryError> {
        if self.eat(&TokenKind::Minus) {
            return Ok(Expr::Negate(Box::new(self.unary_expr()?)));
        }
        self.union_expr()
    }

    fn union_expr(&mut self) -> Result<Expr, QueryError> {
        let start = self.offset();
        let mut left = self.path_expr()?;
        while self.peek() == Some(&TokenKind::Pipe) {
            let pipe = self.offset();
            self.pos += 1;
            let right = self.path_expr()?;
            if !left.returns_nodes() || !right.returns_nodes() {
                let offset = if left.returns_nodes() { pipe } else { start };
                return Err(QueryError::syntax(offset, "operands of '|' must be node-sets"));
            }
            left = Expr::Binary(BinaryOp::Union, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn path_expr(&mut self) -> Result<Expr, QueryError> {
        match self.peek() {
            Some(TokenKind::Literal(_) | TokenKind::Number(_) | TokenKind::LParen) => {
                self.filter_expr()
            }
            Some(TokenKind::Name(name))
                if self.peek_at(1) == Some(&TokenKind::LParen) && !is_node_type(name) =>
            {
                self.filter_expr()
            }
            Some(_) => self.location_path(),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn filter_expr(&mut self) -> Result<Expr, QueryError> {
        let start = self.offset();
        let primary = self.primary_expr()?;
        let predicates = self.predicates()?;
        let mut steps = Vec::new();
        if self.eat(&TokenKind::Slash) {
            self.relative_path(&mut steps)?;
        } else if self.eat(&TokenKind::DoubleSlash) {
            steps.push(Step::descendant_or_self());
            self.relative_path(&mut steps)?;
        }
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        if !primary.returns_nodes() {
            return Err(QueryError::syntax(
                start,
                "predicates and paths can only follow a node-set",
            ));
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps: fold_descendants(steps),
        })
    }

    fn primary_expr(&mut self) -> Result<Expr, QueryError> {
        let offset = self.offset();
        match self.advance().map(|t| t.kind) {
            Some(TokenKind::Literal(s)) => Ok(Expr::Literal(s)),
            Some(TokenKind::Number(n)) => Ok(Expr::Number(n)),
            Some(TokenKind::LParen) => {
                let inner = self.or_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            Some(TokenKind::Name(name)) => self.function_call(name, offset),
            _ => Err(QueryError::syntax(offset, "expected an expression")),
        }
    }

    fn function_call(&mut self, name: String, offset: usize) -> Result<Expr, QueryError> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.or_expr()?);
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma, "',' or ')'")?;
            }
        }

        if let Some((prefix, local)) = name.split_once(':') {
            let predicate = self.registry.lookup(prefix, local).ok_or_else(|| {
                QueryError::syntax(offset, format!("unknown function {name}()"))
            })?;
            if args.len() != 2 {
                return Err(QueryError::syntax(
                    offset,
                    format!("{name}() takes 2 arguments, got {}", args.len()),
                ));
            }
            let subject = args.pop().map(Box::new);
            let pattern = args.pop();
            let (Some(pattern), Some(subject)) = (pattern, subject) else {
                return Err(QueryError::syntax(offset, format!("{name}() takes 2 arguments")));
            };
            let pattern = match pattern {
                Expr::Literal(raw) => Pattern::Compiled(Regex::new(&raw).map_err(|e| {
                    QueryError::syntax(offset, format!("invalid regular expression in {name}(): {e}"))
                })?),
                other => Pattern::Computed(Box::new(other)),
            };
            return Ok(Expr::Extension(ExtensionCall {
                name,
                predicate,
                pattern,
                subject,
            }));
        }

        let function = CoreFunction::from_name(&name)
            .ok_or_else(|| QueryError::syntax(offset, format!("unknown function {name}()")))?;
        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            let expected = match max {
                Some(max) if max == min => format!("{min}"),
                Some(max) => format!("{min} to {max}"),
                None => format!("at least {min}"),
            };
            return Err(QueryError::syntax(
                offset,
                format!("{name}() takes {expected} arguments, got {}", args.len()),
            ));
        }
        Ok(Expr::Call(function, args))
    }

    fn location_path(&mut self) -> Result<Expr, QueryError> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(TokenKind::Slash) => {
                self.pos += 1;
                if self.starts_step() {
                    self.relative_path(&mut steps)?;
                }
                true
            }
            Some(TokenKind::DoubleSlash) => {
                self.pos += 1;
                steps.push(Step::descendant_or_self());
                self.relative_path(&mut steps)?;
                true
            }
            _ => {
                self.relative_path(&mut steps)?;
                false
            }
        };
        Ok(Expr::Path {
            absolute,
            steps: fold_descendants(steps),
        })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                TokenKind::Dot
                    | TokenKind::DotDot
                    | TokenKind::At
                    | TokenKind::Star
                    | TokenKind::Name(_)
            )
        )
    }

    fn relative_path(&mut self, steps: &mut Vec<Step>) -> Result<(), QueryError> {
        steps.push(self.step()?);
        loop {
            if self.eat(&TokenKind::Slash) {
                steps.push(self.step()?);
            } else if self.eat(&TokenKind::DoubleSlash) {
                steps.push(Step::descendant_or_self());
                steps.push(self.step()?);
            } else {
                return Ok(());
            }
        }
    }

    fn step(&mut self) -> Result<Step, QueryError> {
        if self.eat(&TokenKind::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::AnyNode,
                predicates: Vec::new(),
            });
        }
        if self.eat(&TokenKind::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::AnyNode,
                predicates: Vec::new(),
            });
        }

        let axis = if self.eat(&TokenKind::At) {
            Axis::Attribute
        } else if let (Some(TokenKind::Name(name)), Some(TokenKind::ColonColon)) =
            (self.peek(), self.peek_at(1))
        {
            let axis = Axis::from_name(name)
                .ok_or_else(|| self.error(format!("unknown axis {name:?}")))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = self.node_test()?;
        let predicates = self.predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn node_test(&mut self) -> Result<NodeTest, QueryError> {
        let offset = self.offset();
        match self.advance().map(|t| t.kind) {
            Some(TokenKind::Star) => Ok(NodeTest::Wildcard),
            Some(TokenKind::Name(name)) => {
                if self.peek() != Some(&TokenKind::LParen) {
                    return Ok(NodeTest::Name(name));
                }
                if name == "node" {
                    self.pos += 1;
                    self.expect(&TokenKind::RParen, "')' after node(")?;
                    Ok(NodeTest::AnyNode)
                } else {
                    Err(QueryError::syntax(
                        offset,
                        format!("node test {name}() is not supported"),
                    ))
                }
            }
            _ => Err(QueryError::syntax(offset, "expected a node test")),
        }
    }

    fn predicates(&mut self) -> Result<Vec<Expr>, QueryError> {
        let mut predicates = Vec::new();
        while self.eat(&TokenKind::LBracket) {
            predicates.push(self.or_expr()?);
            self.expect(&TokenKind::RBracket, "']'")?;
        }
        Ok(predicates)
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "node" | "text" | "comment" | "processing-instruction")
}

/// Rewrite `descendant-or-self::node()/child::X` into `descendant::X` when
/// neither step has predicates. The two forms select the same nodes, and the
/// folded one avoids visiting every node twice.
fn fold_descendants(steps: Vec<Step>) -> Vec<Step> {
    let mut out: Vec<Step> = Vec::with_capacity(steps.len());
    for step in steps {
        let foldable = step.axis == Axis::Child
            && step.predicates.is_empty()
            && out.last().is_some_and(|prev| {
                prev.axis == Axis::DescendantOrSelf
                    && prev.test == NodeTest::AnyNode
                    && prev.predicates.is_empty()
            });
        if foldable {
            out.pop();
            out.push(Step {
                axis: Axis::Descendant,
                ..step
            });
        } else {
            out.push(step);
        }
    }
    out
}
