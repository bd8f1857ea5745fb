use std::sync::Arc;

use log::warn;
use pom::parser::{any, empty, end, is_a, one_of, sym, tag, Parser};

use crate::lang::token::{Token, TokenKind, KEYWORDS, OPERATORS};

fn space<'a>() -> Parser<'a, char, ()> {
    one_of(" \t\r").repeat(0..).discard()
}

fn number<'a>() -> Parser<'a, char, &'a [char]> {
    let digits = || is_a(|c: char| c.is_ascii_digit()).repeat(1..);
    (digits() + (sym('.') + digits()).opt()).collect()
}

fn word<'a>() -> Parser<'a, char, &'a [char]> {
    (is_a(|c: char| c.is_ascii_alphabetic() || c == '_')
        + is_a(|c: char| c.is_ascii_alphanumeric() || c == '_').repeat(0..))
    .collect()
}

fn operator<'a>() -> Parser<'a, char, &'a [char]> {
    // NB: order matters, longer operators must come before their prefixes
    let long = tag("//") | tag("/*") | tag("*/") | tag("==") | tag("!=") | tag("<=") | tag(">=");

    long.collect() | one_of("+-*/%<>=.,()\"").collect()
}

/// Matches a whole line as a list of `(column, lexeme)` pairs
fn lexemes<'a>() -> Parser<'a, char, Vec<(usize, &'a [char])>> {
    let lexeme = empty().pos() + (number() | word() | operator() | any().collect());

    (space() * lexeme).repeat(0..) - space() - end()
}

fn classify(text: &str) -> TokenKind {
    if let Some(kind) = OPERATORS.get(text).or_else(|| KEYWORDS.get(text)) {
        return *kind;
    }

    match text.chars().next() {
        Some(c) if c.is_uppercase() => TokenKind::Name,
        Some(c) if c.is_alphabetic() || c == '_' => TokenKind::Variable,
        Some(c) if c.is_ascii_digit() => TokenKind::Number,
        _ => TokenKind::Unknown,
    }
}

struct Tokenizer {
    source: Arc<str>,
    tokens: Vec<Token>,
    in_comment: bool,
}

impl Tokenizer {
    fn push(&mut self, kind: TokenKind, text: String, line: usize, start: usize, end: usize) {
        let index = self.tokens.len();
        self.tokens.push(Token {
            kind,
            text,
            line,
            start,
            end,
            index,
            source: self.source.clone(),
        });
    }

    fn line(&mut self, line: &str, lineno: usize) {
        let chars: Vec<char> = line.chars().collect();
        let lexemes = match lexemes().parse(&chars) {
            Ok(l) => l,
            Err(e) => {
                warn!("{}:{}: unable to split line: {}", self.source, lineno, e);
                vec![(0, &chars[..])]
            }
        };

        // Lexemes starting before this column were swallowed by a string literal
        let mut resume_at = 0;
        for (pos, raw) in lexemes {
            if pos < resume_at {
                continue;
            }

            let text: String = raw.iter().collect();
            if self.in_comment {
                if text == "*/" {
                    self.in_comment = false;
                }
                continue;
            }

            match text.as_str() {
                "//" => break,
                "/*" => self.in_comment = true,
                "\"" => {
                    let last = chars[pos + 1..]
                        .iter()
                        .position(|c| *c == '"')
                        .map(|off| pos + 1 + off)
                        .unwrap_or(chars.len() - 1);
                    let literal: String = chars[pos..=last].iter().collect();
                    self.push(TokenKind::String, literal, lineno, pos + 1, last + 1);
                    resume_at = last + 1;
                }
                _ => {
                    let kind = classify(&text);
                    self.push(kind, text, lineno, pos + 1, pos + raw.len());
                }
            }
        }

        let col = chars.len() + 1;
        self.push(TokenKind::Eol, String::new(), lineno, col, col);
    }
}

/// Tokenize `lines` of the source file `source`
///
/// The result always ends with one `Eof` token and every line contributes a trailing `Eol`.
pub fn tokenize<S: AsRef<str>>(lines: &[S], source: &str) -> Vec<Token> {
    let mut tokenizer = Tokenizer {
        source: Arc::from(source),
        tokens: Vec::new(),
        in_comment: false,
    };

    for (i, line) in lines.iter().enumerate() {
        tokenizer.line(line.as_ref(), i + 1);
    }

    let (line, col) = match lines.last() {
        Some(l) => (lines.len(), l.as_ref().chars().count() + 1),
        None => (1, 1),
    };
    tokenizer.push(TokenKind::Eof, String::new(), line, col, col);

    tokenizer.tokens
}

/// Split `text` into lines and tokenize it
pub fn tokenize_str(text: &str, source: &str) -> Vec<Token> {
    let lines: Vec<&str> = text.lines().collect();
    tokenize(&lines, source)
}

#[cfg(test)]
fn kinds(text: &str) -> Vec<TokenKind> {
    tokenize_str(text, "test").iter().map(|t| t.kind).collect()
}

#[test]
fn test_if_line() {
    let tokens = tokenize_str(r#"if a is 123 then a = "THIS IS A TEST" else 2"#, "test");

    let equals: Vec<&Token> = tokens.iter().filter(|t| t.kind == TokenKind::Equal).collect();
    assert_eq!(equals.len(), 1);
    assert_eq!(equals[0].text, "is");

    let strings: Vec<&Token> = tokens.iter().filter(|t| t.kind == TokenKind::String).collect();
    assert_eq!(strings.len(), 1);
    assert_eq!(strings[0].text, "\"THIS IS A TEST\"");
    assert_eq!(strings[0].start, 22);

    let n = tokens.len();
    assert_eq!(tokens[n - 2].kind, TokenKind::Eol);
    assert_eq!(tokens[n - 1].kind, TokenKind::Eof);
    assert_eq!(tokens.iter().filter(|t| t.kind == TokenKind::Eol).count(), 1);
}

#[test]
fn test_idempotent() {
    let text = "class A of type B\n  x = 1.5 * (y - 2) // trailing\nend";
    assert_eq!(tokenize_str(text, "a"), tokenize_str(text, "a"));
}

#[test]
fn test_classification() {
    use TokenKind::*;

    let tests = vec![
        ("Player", vec![Name, Eol, Eof]),
        ("player", vec![Variable, Eol, Eof]),
        ("_tmp", vec![Variable, Eol, Eof]),
        ("12.5", vec![Number, Eol, Eof]),
        ("a.b", vec![Variable, Dot, Variable, Eol, Eof]),
        ("x <= 3", vec![Variable, LessEqual, Number, Eol, Eof]),
        ("x >= 3 != 4", vec![Variable, GreaterEqual, Number, NotEqual, Number, Eol, Eof]),
        ("not a and b or c", vec![Not, Variable, And, Variable, Or, Variable, Eol, Eof]),
        ("a isnt b", vec![Variable, NotEqual, Variable, Eol, Eof]),
        ("while x do", vec![Keyword, Variable, Keyword, Eol, Eof]),
        ("a @ b", vec![Variable, Unknown, Variable, Eol, Eof]),
        ("", vec![Eof]),
    ];

    for (input, expected) in tests {
        assert_eq!(kinds(input), expected, "input: {}", input);
    }
}

#[test]
fn test_comments() {
    use TokenKind::*;

    assert_eq!(kinds("a = 1 // b = 2"), vec![Variable, Assign, Number, Eol, Eof]);
    assert_eq!(
        kinds("a /* hidden\nstill hidden */ b"),
        vec![Variable, Eol, Variable, Eol, Eof]
    );

    let tokens = tokenize_str("/* one\ntwo\n*/ x", "c");
    let x = tokens.iter().find(|t| t.kind == Variable).expect("x missing");
    assert_eq!(x.line, 3);
    assert_eq!(x.start, 4);
}

#[test]
fn test_strings() {
    use TokenKind::*;

    let tokens = tokenize_str(r#"s = "a // not a comment" + "x""#, "s");
    let strings: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == String)
        .map(|t| t.text.as_str())
        .collect();
    assert_eq!(strings, vec!["\"a // not a comment\"", "\"x\""]);

    let tokens = tokenize_str(r#"s = "unterminated and more"#, "s");
    assert_eq!(tokens[2].kind, String);
    assert_eq!(tokens[2].text, "\"unterminated and more");
    assert_eq!(tokens[3].kind, Eol);
}

#[test]
fn test_positions() {
    let tokens = tokenize_str("a\n  bb = 3", "pos.kes");
    let bb = &tokens[2];
    assert_eq!(bb.text, "bb");
    assert_eq!((bb.line, bb.start, bb.end), (2, 3, 4));
    assert_eq!(&*bb.source, "pos.kes");
    for (i, t) in tokens.iter().enumerate() {
        assert_eq!(t.index, i);
    }
}
