//! Tokenizer for path expressions.

use crate::error::QueryError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Dot,
    DotDot,
    Pipe,
    ColonColon,
    Plus,
    Minus,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    /// `*` in name-test position.
    Star,
    /// `*` in operator position.
    Multiply,
    And,
    Or,
    Div,
    Mod,
    /// NCName or `prefix:local` QName.
    Name(String),
    Literal(String),
    Number(f64),
}

#[derive(Clone, Debug)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the expression.
    pub offset: usize,
}

impl TokenKind {
    /// Whether this token ends an operand, which turns a following `*` into
    /// multiplication and a following `and`/`or`/`div`/`mod` into operators.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            TokenKind::Name(_)
                | TokenKind::Literal(_)
                | TokenKind::Number(_)
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::Star
                | TokenKind::Dot
                | TokenKind::DotDot
        )
    }
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let bytes = input.as_bytes();
    let mut tokens: Vec<Token> = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        let operator_position = tokens.last().is_some_and(|t| t.kind.ends_operand());
        let peek = bytes.get(pos + 1).copied();

        let kind = match c {
            b'/' if peek == Some(b'/') => {
                pos += 2;
                TokenKind::DoubleSlash
            }
            b'/' => {
                pos += 1;
                TokenKind::Slash
            }
            b'[' => {
                pos += 1;
                TokenKind::LBracket
            }
            b']' => {
                pos += 1;
                TokenKind::RBracket
            }
            b'(' => {
                pos += 1;
                TokenKind::LParen
            }
            b')' => {
                pos += 1;
                TokenKind::RParen
            }
            b'@' => {
                pos += 1;
                TokenKind::At
            }
            b',' => {
                pos += 1;
                TokenKind::Comma
            }
            b'|' => {
                pos += 1;
                TokenKind::Pipe
            }
            b'+' => {
                pos += 1;
                TokenKind::Plus
            }
            b'-' => {
                pos += 1;
                TokenKind::Minus
            }
            b'=' => {
                pos += 1;
                TokenKind::Eq
            }
            b'!' if peek == Some(b'=') => {
                pos += 2;
                TokenKind::NotEq
            }
            b'<' if peek == Some(b'=') => {
                pos += 2;
                TokenKind::Le
            }
            b'<' => {
                pos += 1;
                TokenKind::Lt
            }
            b'>' if peek == Some(b'=') => {
                pos += 2;
                TokenKind::Ge
            }
            b'>' => {
                pos += 1;
                TokenKind::Gt
            }
            b':' if peek == Some(b':') => {
                pos += 2;
                TokenKind::ColonColon
            }
            b'*' => {
                pos += 1;
                if operator_position {
                    TokenKind::Multiply
                } else {
                    TokenKind::Star
                }
            }
            b'.' if peek == Some(b'.') => {
                pos += 2;
                TokenKind::DotDot
            }
            b'.' if peek.is_some_and(|p| p.is_ascii_digit()) => {
                let (number, end) = read_number(input, pos)?;
                pos = end;
                TokenKind::Number(number)
            }
            b'.' => {
                pos += 1;
                TokenKind::Dot
            }
            b'\'' | b'"' => {
                let (literal, end) = read_literal(input, pos)?;
                pos = end;
                TokenKind::Literal(literal)
            }
            b'0'..=b'9' => {
                let (number, end) = read_number(input, pos)?;
                pos = end;
                TokenKind::Number(number)
            }
            _ if is_name_start(c) => {
                let (name, end) = read_name(input, pos);
                pos = end;
                if operator_position {
                    match name.as_str() {
                        "and" => TokenKind::And,
                        "or" => TokenKind::Or,
                        "div" => TokenKind::Div,
                        "mod" => TokenKind::Mod,
                        _ => TokenKind::Name(name),
                    }
                } else {
                    TokenKind::Name(name)
                }
            }
            _ => {
                let ch = input[pos..].chars().next().unwrap_or('?');
                return Err(QueryError::syntax(pos, format!("unexpected character {ch:?}")));
            }
        };

        tokens.push(Token {
            kind,
            offset: start,
        });
    }

    Ok(tokens)
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_name_char(c: u8) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == b'-' || c == b'.'
}

/// Read an NCName, extended to a QName (`prefix:local` or `prefix:*`) when a
/// single colon follows.
fn read_name(input: &str, start: usize) -> (String, usize) {
    let bytes = input.as_bytes();
    let mut end = start;
    while end < bytes.len() && is_name_char(bytes[end]) {
        end += 1;
    }
    if bytes.get(end) == Some(&b':') && bytes.get(end + 1) != Some(&b':') {
        match bytes.get(end + 1) {
            Some(&c) if is_name_start(c) => {
                let mut local_end = end + 1;
                while local_end < bytes.len() && is_name_char(bytes[local_end]) {
                    local_end += 1;
                }
                end = local_end;
            }
            Some(b'*') => end += 2,
            _ => {}
        }
    }
    (input[start..end].to_string(), end)
}

fn read_literal(input: &str, start: usize) -> Result<(String, usize), QueryError> {
    let quote = input.as_bytes()[start];
    let body_start = start + 1;
    match input.as_bytes()[body_start..].iter().position(|b| *b == quote) {
        Some(len) => Ok((
            input[body_start..body_start + len].to_string(),
            body_start + len + 1,
        )),
        None => Err(QueryError::syntax(start, "unterminated string literal")),
    }
}

fn read_number(input: &str, start: usize) -> Result<(f64, usize), QueryError> {
    let bytes = input.as_bytes();
    let mut end = start;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot && bytes.get(end + 1) != Some(&b'.') => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    input[start..end]
        .parse::<f64>()
        .map(|n| (n, end))
        .map_err(|_| QueryError::syntax(start, format!("invalid number {:?}", &input[start..end])))
}
