use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TokenKind {
    Number,
    /// Quote delimited string literal. The token text keeps its quotes.
    String,
    /// Identifier starting with an uppercase letter (types, `True`, `False`, `None`)
    Name,
    /// Identifier starting with anything else
    Variable,
    Keyword,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `is` or `==`
    Equal,
    /// `isnt` or `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// `=`
    Assign,
    /// `.`
    Dot,
    /// `,`
    Comma,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    Unknown,
    Eol,
    Eof,
}

impl TokenKind {
    /// Binding priority when used as a binary operator. Lower values bind looser.
    pub fn binary_priority(self) -> Option<u32> {
        let p = match self {
            TokenKind::Or => 10,
            TokenKind::And => 20,
            TokenKind::Equal | TokenKind::NotEqual => 30,
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => 40,
            TokenKind::Plus | TokenKind::Minus => 50,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 60,
            TokenKind::Dot => 100,
            _ => return None,
        };

        Some(p)
    }

    /// Binding priority when used as a prefix operator
    pub fn unary_priority(self) -> Option<u32> {
        match self {
            TokenKind::Not => Some(25),
            TokenKind::Minus => Some(70),
            _ => None,
        }
    }

    pub fn is_operator(self) -> bool {
        self.binary_priority().is_some() || self == TokenKind::Not
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Name => "type name",
            TokenKind::Variable => "identifier",
            TokenKind::Keyword => "keyword",
            TokenKind::Eol => "end of line",
            TokenKind::Eof => "end of file",
            TokenKind::Unknown => "unknown character",
            _ => "operator",
        };

        write!(f, "{}", name)
    }
}

lazy_static! {
    /// Words that never classify by case
    pub static ref KEYWORDS: HashMap<&'static str, TokenKind> = {
        let mut m = HashMap::new();
        for kw in &[
            "if", "then", "else", "end", "while", "do", "repeat", "until", "for", "from", "to",
            "step", "by", "function", "return", "break", "continue", "class", "of", "type",
            "new", "property", "shared", "constructor", "behaviour", "has", "requires",
            "supports", "excludes", "native", "wait",
        ] {
            m.insert(*kw, TokenKind::Keyword);
        }
        m.insert("is", TokenKind::Equal);
        m.insert("isnt", TokenKind::NotEqual);
        m.insert("and", TokenKind::And);
        m.insert("or", TokenKind::Or);
        m.insert("not", TokenKind::Not);
        m
    };

    pub static ref OPERATORS: HashMap<&'static str, TokenKind> = {
        let mut m = HashMap::new();
        m.insert("+", TokenKind::Plus);
        m.insert("-", TokenKind::Minus);
        m.insert("*", TokenKind::Star);
        m.insert("/", TokenKind::Slash);
        m.insert("%", TokenKind::Percent);
        m.insert("==", TokenKind::Equal);
        m.insert("!=", TokenKind::NotEqual);
        m.insert("<", TokenKind::Less);
        m.insert("<=", TokenKind::LessEqual);
        m.insert(">", TokenKind::Greater);
        m.insert(">=", TokenKind::GreaterEqual);
        m.insert("=", TokenKind::Assign);
        m.insert(".", TokenKind::Dot);
        m.insert(",", TokenKind::Comma);
        m.insert("(", TokenKind::LeftParen);
        m.insert(")", TokenKind::RightParen);
        m
    };
}

/// Keywords that may appear inside an expression. Every other keyword ends one.
pub const EXPRESSION_KEYWORDS: &[&str] = &["new"];

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based
    pub line: usize,
    /// 1-based column of the first character
    pub start: usize,
    /// 1-based column of the last character
    pub end: usize,
    /// Position in the token stream of its source file
    pub index: usize,
    pub source: Arc<str>,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.text == text && self.kind != TokenKind::String
    }

    /// True for keywords that terminate an expression run
    pub fn ends_expression(&self) -> bool {
        match self.kind {
            TokenKind::Eol | TokenKind::Eof | TokenKind::Assign | TokenKind::Comma => true,
            TokenKind::Keyword => !EXPRESSION_KEYWORDS.contains(&self.text.as_str()),
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eol | TokenKind::Eof => self.kind.to_string(),
            _ => format!("'{}'", self.text),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.start)
    }
}
