use std::fmt;

use crate::lang::ast::Node;
use crate::lang::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Source did not match the grammar
    Parse,
    /// Declarations are inconsistent (duplicates, unknown parents, behaviour contracts)
    Registration,
    /// Name lookup failed at runtime
    Undefined,
    /// Operand or target of the wrong type
    Type,
    DivisionByZero,
    /// Wrong number of arguments
    Arity,
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse error",
            ErrorKind::Registration => "registration error",
            ErrorKind::Undefined => "undefined name",
            ErrorKind::Type => "type error",
            ErrorKind::DivisionByZero => "division by zero",
            ErrorKind::Arity => "arity error",
            ErrorKind::Runtime => "runtime error",
        };

        write!(f, "{}", name)
    }
}

/// Snapshot of the AST node an error originated from
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub kind: &'static str,
    pub token: Token,
}

fn location(token: &Option<Token>) -> String {
    match token {
        Some(t) => format!("{}: ", t),
        None => String::new(),
    }
}

/// Every parse, registration and runtime failure
///
/// Carries the token (and node, when there is one) it was raised at so a host can map it
/// back onto the source text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}{}", location(.token), .description)]
pub struct Error {
    pub kind: ErrorKind,
    pub description: String,
    pub token: Option<Token>,
    pub node: Option<NodeInfo>,
}

impl Error {
    pub fn new<S: Into<String>>(kind: ErrorKind, description: S) -> Self {
        Self {
            kind,
            description: description.into(),
            token: None,
            node: None,
        }
    }

    pub fn registration<S: Into<String>>(description: S, token: &Token) -> Self {
        Self::new(ErrorKind::Registration, description).with_token(token)
    }

    pub fn runtime<S: Into<String>>(description: S) -> Self {
        Self::new(ErrorKind::Runtime, description)
    }

    pub fn undefined<S: Into<String>>(description: S) -> Self {
        Self::new(ErrorKind::Undefined, description)
    }

    pub fn type_mismatch<S: Into<String>>(description: S) -> Self {
        Self::new(ErrorKind::Type, description)
    }

    pub fn with_token(mut self, token: &Token) -> Self {
        if self.token.is_none() {
            self.token = Some(token.clone());
        }
        self
    }

    /// Attach `node` unless the error already points somewhere more precise
    pub fn at(mut self, node: &Node) -> Self {
        if self.node.is_none() {
            self.node = Some(NodeInfo {
                kind: node.kind.name(),
                token: node.token.clone(),
            });
        }
        self.with_token(&node.token)
    }
}

/// A failed grammar match
///
/// Kept separate from `Error` so alternatives can be compared by how far they got.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub token: Token,
    /// Index of the last token the failed attempt reached
    progress: usize,
}

impl ParseError {
    pub fn new<S: Into<String>>(message: S, token: &Token) -> Self {
        Self {
            message: message.into(),
            token: token.clone(),
            progress: token.index,
        }
    }

    /// Error reported at `token` by an attempt that got as far as `progress`
    pub fn reached<S: Into<String>>(message: S, token: &Token, progress: usize) -> Self {
        Self {
            progress,
            ..Self::new(message, token)
        }
    }

    pub fn expected(what: &str, found: &Token) -> Self {
        Self::new(
            format!(
                "expected {}, found {} at token {}",
                what,
                found.describe(),
                found.index
            ),
            found,
        )
    }

    pub fn index(&self) -> usize {
        self.progress
    }

    /// Keep whichever of `self` and `other` got further into the input
    pub fn furthest(self, other: ParseError) -> ParseError {
        if other.index() > self.index() {
            other
        } else {
            self
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::new(ErrorKind::Parse, e.message).with_token(&e.token)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
fn token_at(index: usize) -> Token {
    use crate::lang::token::TokenKind;

    Token {
        kind: TokenKind::Variable,
        text: format!("t{}", index),
        line: 1,
        start: index + 1,
        end: index + 1,
        index,
        source: "test".into(),
    }
}

#[test]
fn test_furthest_error() {
    let early = ParseError::new("fails at 4", &token_at(4));
    let late = ParseError::new("fails at 9", &token_at(9));

    assert_eq!(early.clone().furthest(late.clone()).message, "fails at 9");
    assert_eq!(late.clone().furthest(early.clone()).message, "fails at 9");

    // Ties keep the alternative tried first
    let other = ParseError::new("also at 9", &token_at(9));
    assert_eq!(late.clone().furthest(other).message, "fails at 9");

    // Progress can run past the reported location
    let builder = ParseError::reached("bad target", &token_at(2), 12);
    assert_eq!(builder.index(), 12);
    assert_eq!(late.furthest(builder).message, "bad target");
}

#[test]
fn test_error_display() {
    let err = Error::undefined("Unknown variable 'x'").with_token(&token_at(2));
    assert_eq!(err.to_string(), "test:1:3: Unknown variable 'x'");
    assert_eq!(err.kind, ErrorKind::Undefined);

    let err = Error::new(ErrorKind::DivisionByZero, "Divide by zero");
    assert_eq!(err.to_string(), "Divide by zero");

    let err: Error = ParseError::expected("'end'", &token_at(7)).into();
    assert_eq!(err.kind, ErrorKind::Parse);
    assert_eq!(err.to_string(), "test:1:8: expected 'end', found 't7' at token 7");
}
