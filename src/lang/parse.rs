//! Grammar driven parser.
//!
//! Statements are matched against the rule table in `grammar`. Expressions are handled in
//! two steps: the tokens of an expression are first collected into a *run* (up to the end
//! of line, a comma, `=`, an unmatched `)` or a statement keyword), then the run is split
//! recursively at its loosest binding operator. Runs with no operator left are leaves or
//! are matched against the expression rules (`new`, calls).
//!
//! Every failure is a `ParseError` carrying how far it got. Among failed alternatives the
//! one that got furthest is reported.

use std::cell::RefCell;

use log::trace;

use crate::lang::ast::{BinaryOp, Node, NodeKind, NodeRef, Parameter, UnaryOp};
use crate::lang::error::{Error, ParseError, Result};
use crate::lang::eval::value::Constant;
use crate::lang::grammar::{Binding, Bindings, Entry, Match, Rule, EXPRESSIONS, STATEMENTS};
use crate::lang::token::{Token, TokenKind};
use crate::lang::tokenize::tokenize_str;

type Parsed<T> = std::result::Result<T, ParseError>;

struct Parser<'t> {
    tokens: &'t [Token],
    /// Returned for every position past the end of `tokens`
    end: &'t Token,
    /// Furthest failure seen by any attempt, shared with sub-parsers
    furthest: &'t RefCell<Option<ParseError>>,
}

fn one_of(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| format!("'{}'", w))
        .collect::<Vec<_>>()
        .join(" or ")
}

impl<'t> Parser<'t> {
    fn peek(&self, pos: usize) -> &'t Token {
        self.tokens.get(pos).unwrap_or(self.end)
    }

    fn record(&self, err: &ParseError) {
        let mut furthest = self.furthest.borrow_mut();
        *furthest = Some(match furthest.take() {
            Some(old) => old.furthest(err.clone()),
            None => err.clone(),
        });
    }

    /// Try every rule at `pos`, first complete match wins
    fn alternatives(&self, rules: &[Rule], pos: usize) -> Parsed<(NodeRef, usize)> {
        let start = self.peek(pos);
        let mut best: Option<ParseError> = None;

        for rule in rules {
            let mut bindings = Bindings::default();
            let err = match self.match_entries(&rule.entries, pos, &mut bindings) {
                Ok(next) => match (rule.build)(&mut bindings, start) {
                    Ok(node) => {
                        trace!("{}: matched {}", start, rule.name);
                        return Ok((node, next));
                    }
                    Err(msg) => {
                        let last = self.peek(next.saturating_sub(1));
                        ParseError::reached(msg, start, last.index)
                    }
                },
                Err(e) => e,
            };

            self.record(&err);
            best = Some(match best {
                Some(b) => b.furthest(err),
                None => err,
            });
        }

        Err(best.unwrap_or_else(|| ParseError::expected("statement", start)))
    }

    fn statement(&self, pos: usize) -> Parsed<(NodeRef, usize)> {
        self.alternatives(&STATEMENTS, pos)
    }

    fn match_entries(
        &self,
        entries: &[Match],
        mut pos: usize,
        bindings: &mut Bindings,
    ) -> Parsed<usize> {
        // Failure of a skipped optional group, reported if it got further than what follows
        let mut skipped: Option<ParseError> = None;

        for m in entries {
            match (&m.entry, self.match_entry(m, pos, bindings)) {
                (_, Ok(next)) => pos = next,
                (Entry::Optional(_), Err(e)) => {
                    self.record(&e);
                    skipped = Some(match skipped.take() {
                        Some(s) => s.furthest(e),
                        None => e,
                    });
                }
                (_, Err(e)) => {
                    return Err(match skipped {
                        Some(s) if s.index() > e.index() => s,
                        _ => e,
                    })
                }
            }
        }

        Ok(pos)
    }

    fn match_entry(
        &self,
        m: &Match,
        pos: usize,
        bindings: &mut Bindings,
    ) -> Parsed<usize> {
        let token = self.peek(pos);
        let (binding, next) = match &m.entry {
            Entry::Literal(text) => {
                if !token.is(text) {
                    return Err(ParseError::expected(&format!("'{}'", text), token));
                }
                (Binding::Token(token.clone()), pos + 1)
            }
            Entry::Kind(kind) => {
                if token.kind != *kind {
                    return Err(ParseError::expected(&kind.to_string(), token));
                }
                (Binding::Token(token.clone()), pos + 1)
            }
            Entry::TypeName => {
                let constant = matches!(token.text.as_str(), "True" | "False" | "None");
                if token.kind != TokenKind::Name || constant {
                    return Err(ParseError::expected("type name", token));
                }
                (Binding::Text(token.text.clone()), pos + 1)
            }
            Entry::Identifier => {
                if token.kind != TokenKind::Variable {
                    return Err(ParseError::expected("identifier", token));
                }
                (Binding::Text(token.text.clone()), pos + 1)
            }
            Entry::Expression(terminators) => {
                let (node, next) = self.expression(pos, terminators)?;
                (Binding::Node(node), next)
            }
            Entry::Statement => {
                let (node, next) = self.statement(pos)?;
                (Binding::Node(node), next)
            }
            Entry::Parameters => {
                let (nodes, next) = self.parameters(pos)?;
                (Binding::Nodes(nodes), next)
            }
            Entry::ExpressionList => {
                if token.kind != TokenKind::LeftParen {
                    return Err(ParseError::expected("'('", token));
                }
                let (nodes, next) = self.parameters(pos + 1)?;
                let close = self.peek(next);
                if close.kind != TokenKind::RightParen {
                    return Err(ParseError::expected("')'", close));
                }
                (Binding::Nodes(nodes), next + 1)
            }
            Entry::ParameterDefinitions => {
                let (params, next) = self.parameter_definitions(pos)?;
                (Binding::Parameters(params), next)
            }
            Entry::Optional(group) => {
                let mut inner = Bindings::default();
                let next = self.match_entries(group, pos, &mut inner)?;
                bindings.extend(inner);
                (Binding::Present, next)
            }
            Entry::Subtree(terminators) => {
                let (stmts, next) = self.block(pos, terminators)?;
                (Binding::Node(Node::new(NodeKind::Block(stmts), token)), next)
            }
        };

        if let Some(id) = m.id {
            bindings.insert(id, binding);
        }

        Ok(next)
    }

    /// Statements up to one of `terminators`, or to the end of input when there are none
    fn block(
        &self,
        mut pos: usize,
        terminators: &[&str],
    ) -> Parsed<(Vec<NodeRef>, usize)> {
        let mut stmts = Vec::new();

        loop {
            let token = self.peek(pos);
            match token.kind {
                TokenKind::Eol => {
                    pos += 1;
                    continue;
                }
                TokenKind::Eof if terminators.is_empty() => return Ok((stmts, pos)),
                TokenKind::Eof => return Err(ParseError::expected(&one_of(terminators), token)),
                _ if terminators.iter().any(|t| token.is(t)) => return Ok((stmts, pos)),
                _ => (),
            }

            let (stmt, next) = self.statement(pos)?;
            stmts.push(stmt);

            let after = self.peek(next);
            pos = match after.kind {
                TokenKind::Eol => next + 1,
                TokenKind::Eof => next,
                _ => return Err(ParseError::expected("end of line", after)),
            };
        }
    }

    fn parameters(&self, mut pos: usize) -> Parsed<(Vec<NodeRef>, usize)> {
        let mut args = Vec::new();
        if self.peek(pos).kind == TokenKind::RightParen {
            return Ok((args, pos));
        }

        loop {
            let (arg, next) = self.expression(pos, &[])?;
            args.push(arg);
            pos = next;

            if self.peek(pos).kind != TokenKind::Comma {
                break;
            }
            pos += 1;
        }

        Ok((args, pos))
    }

    fn parameter_definitions(
        &self,
        mut pos: usize,
    ) -> Parsed<(Vec<Parameter>, usize)> {
        let mut params: Vec<Parameter> = Vec::new();
        if self.peek(pos).kind == TokenKind::RightParen {
            return Ok((params, pos));
        }

        loop {
            let name = self.peek(pos);
            if name.kind != TokenKind::Variable {
                return Err(ParseError::expected("parameter name", name));
            }
            if params.iter().any(|p| p.name == name.text) {
                return Err(ParseError::new(
                    format!("duplicate parameter '{}'", name.text),
                    name,
                ));
            }
            pos += 1;

            let default = if self.peek(pos).kind == TokenKind::Assign {
                let (node, next) = self.expression(pos + 1, &[])?;
                pos = next;
                Some(node)
            } else {
                None
            };
            params.push(Parameter {
                name: name.text.clone(),
                default,
            });

            if self.peek(pos).kind != TokenKind::Comma {
                break;
            }
            pos += 1;
        }

        Ok((params, pos))
    }

    /// Index one past the last token of the expression run starting at `pos`
    fn run_end(&self, pos: usize, terminators: &[&str]) -> usize {
        let mut depth = 0usize;
        let mut i = pos;

        while i < self.tokens.len() {
            let t = &self.tokens[i];
            match t.kind {
                TokenKind::Eol | TokenKind::Eof => break,
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen if depth == 0 => break,
                TokenKind::RightParen => depth -= 1,
                _ if depth == 0 && (t.ends_expression() || terminators.iter().any(|w| t.is(w))) => {
                    break
                }
                _ => (),
            }
            i += 1;
        }

        i
    }

    fn expression(
        &self,
        pos: usize,
        terminators: &[&str],
    ) -> Parsed<(NodeRef, usize)> {
        let end = self.run_end(pos, terminators);
        if end == pos {
            return Err(ParseError::expected("expression", self.peek(pos)));
        }

        let node = self.split(&self.tokens[pos..end], self.peek(end))?;
        Ok((node, end))
    }

    /// Loosest binding operator at paren depth zero, and whether it is used as a prefix.
    /// The run is scanned right to left and only a strictly looser operator replaces the
    /// current candidate, so equal priorities split at the rightmost operator.
    fn split_point(
        &self,
        run: &[Token],
        after: &Token,
    ) -> Parsed<Option<(usize, bool)>> {
        let mut depth = 0usize;
        let mut best: Option<(usize, bool, u32)> = None;

        for i in (0..run.len()).rev() {
            let t = &run[i];
            match t.kind {
                TokenKind::RightParen => {
                    depth += 1;
                    continue;
                }
                TokenKind::LeftParen if depth == 0 => {
                    return Err(ParseError::expected("')'", after));
                }
                TokenKind::LeftParen => {
                    depth -= 1;
                    continue;
                }
                _ if depth > 0 => continue,
                _ => (),
            }

            let prefix = i == 0 || run[i - 1].kind.is_operator();
            let candidate = match (prefix, i) {
                (true, 0) => t.kind.unary_priority().map(|p| (true, p)),
                (true, _) => None,
                (false, _) => t.kind.binary_priority().map(|p| (false, p)),
            };

            if let Some((unary, p)) = candidate {
                if best.map_or(true, |(_, _, bp)| p < bp) {
                    best = Some((i, unary, p));
                }
            }
        }

        Ok(best.map(|(i, unary, _)| (i, unary)))
    }

    fn split(&self, run: &'t [Token], after: &'t Token) -> Parsed<NodeRef> {
        let first = match run.first() {
            Some(t) => t,
            None => return Err(ParseError::expected("expression", after)),
        };

        if let Some((i, unary)) = self.split_point(run, after)? {
            let op = &run[i];

            if unary {
                let operand = self.split(&run[1..], after)?;
                let op_kind = match op.kind {
                    TokenKind::Minus => UnaryOp::Neg,
                    _ => UnaryOp::Not,
                };
                return Ok(Node::new(
                    NodeKind::Unary {
                        op: op_kind,
                        operand,
                    },
                    op,
                ));
            }

            let lhs = self.split(&run[..i], op)?;
            let rhs = self.split(&run[i + 1..], after)?;

            if op.kind == TokenKind::Dot {
                return match rhs.kind {
                    NodeKind::Literal(Constant::Variable(_))
                    | NodeKind::TypeRef(_)
                    | NodeKind::Call { .. } => Ok(Node::new(
                        NodeKind::Member {
                            target: lhs,
                            member: rhs,
                        },
                        op,
                    )),
                    _ => Err(ParseError::expected("member name", &run[i + 1])),
                };
            }

            let bop = match BinaryOp::from_kind(op.kind) {
                Some(b) => b,
                None => return Err(ParseError::expected("binary operator", op)),
            };
            return Ok(Node::new(
                NodeKind::Binary {
                    op: bop,
                    lhs,
                    rhs,
                },
                op,
            ));
        }

        let last = run.len() - 1;
        if first.kind == TokenKind::LeftParen && matching_paren(run) == Some(last) {
            return self.split(&run[1..last], &run[last]);
        }

        if run.len() == 1 {
            return leaf(first);
        }

        let sub = Parser {
            tokens: run,
            end: after,
            furthest: self.furthest,
        };
        let (node, next) = sub.alternatives(&EXPRESSIONS, 0)?;
        if next < run.len() {
            let err = ParseError::expected("operator", &run[next]);
            self.record(&err);
            return Err(err);
        }

        Ok(node)
    }
}

/// Index of the `)` closing the `(` that starts `run`
fn matching_paren(run: &[Token]) -> Option<usize> {
    let mut depth = 0usize;
    for (i, t) in run.iter().enumerate() {
        match t.kind {
            TokenKind::LeftParen => depth += 1,
            TokenKind::RightParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => (),
        }
    }

    None
}

fn leaf(token: &Token) -> Parsed<NodeRef> {
    let kind = match token.kind {
        TokenKind::Number | TokenKind::String | TokenKind::Variable => {
            NodeKind::Literal(Constant::from_lexeme(&token.text))
        }
        TokenKind::Name => match Constant::from_lexeme(&token.text) {
            Constant::Variable(name) => NodeKind::TypeRef(name),
            constant => NodeKind::Literal(constant),
        },
        _ => return Err(ParseError::expected("expression", token)),
    };

    Ok(Node::new(kind, token))
}

/// Parse the token stream of one file into a `File` node
pub fn parse(tokens: &[Token], name: &str) -> Result<NodeRef> {
    let end = match tokens.last() {
        Some(t) => t,
        None => {
            return Err(Error::runtime(format!(
                "{}: empty token stream",
                name
            )))
        }
    };

    let furthest = RefCell::new(None);
    let parser = Parser {
        tokens,
        end,
        furthest: &furthest,
    };

    match parser.block(0, &[]) {
        Ok((body, _)) => Ok(Node::new(
            NodeKind::File {
                name: name.to_string(),
                body,
            },
            &tokens[0],
        )),
        Err(e) => {
            let best = match furthest.into_inner() {
                Some(f) => e.furthest(f),
                None => e,
            };
            Err(best.into())
        }
    }
}

/// Tokenize and parse the source text of one file
pub fn parse_source(text: &str, name: &str) -> Result<NodeRef> {
    parse(&tokenize_str(text, name), name)
}

#[cfg(test)]
fn parse_statements(text: &str) -> Vec<String> {
    use crate::lang::ast::sexpr;

    let file = parse_source(text, "test").unwrap();
    match &file.kind {
        NodeKind::File { body, .. } => body.iter().map(|n| sexpr(n)).collect(),
        _ => panic!("not a file"),
    }
}

#[cfg(test)]
fn parse_error(text: &str) -> String {
    parse_source(text, "test").unwrap_err().description
}

#[test]
fn test_precedence() {
    let tests = vec![
        ("1 + 2 * 3", "(+ 1 (* 2 3))"),
        ("1 * 2 + 3", "(+ (* 1 2) 3)"),
        ("1 - 2 - 3", "(- (- 1 2) 3)"),
        ("8 / 4 / 2", "(/ (/ 8 4) 2)"),
        ("a or b and c", "(or a (and b c))"),
        ("not a and b", "(and (not a) b)"),
        ("not a is b", "(not (is a b))"),
        ("a and not b", "(and a (not b))"),
        ("-a + b", "(+ (- a) b)"),
        ("a * -b", "(* a (- b))"),
        ("(1 + 2) * 3", "(* (+ 1 2) 3)"),
        ("((x))", "x"),
        ("x <= 3 == True", "(is (<= x 3) True)"),
        ("a isnt None", "(isnt a None)"),
        ("\"a\" + 1", "(+ \"a\" 1)"),
    ];

    for (input, expected) in tests {
        assert_eq!(parse_statements(input), vec![expected], "input: {}", input);
    }
}

#[test]
fn test_members_and_calls() {
    let tests = vec![
        ("a.b.c", "(. (. a b) c)"),
        ("p.move(1, 2)", "(. p (call move [1 2]))"),
        ("new Player(3).hp", "(. (new Player [3]) hp)"),
        ("new Player", "(new Player [])"),
        ("f()", "(call f [])"),
        ("f(g(1), 2 + x)", "(call f [(call g [1]) (+ 2 x)])"),
        ("Gravity.strength", "(. Gravity strength)"),
        ("-p.x", "(- (. p x))"),
        ("p.Gravity.pull()", "(. (. p Gravity) (call pull []))"),
    ];

    for (input, expected) in tests {
        assert_eq!(parse_statements(input), vec![expected], "input: {}", input);
    }
}

#[test]
fn test_statements() {
    let tests = vec![
        ("x = 1 + 2", "(= x (+ 1 2))"),
        ("p.x = 3", "(= (. p x) 3)"),
        (
            r#"if a is 123 then a = "THIS IS A TEST" else 2"#,
            "(if (is a 123) (= a \"THIS IS A TEST\") 2)",
        ),
        ("if a then return", "(if a (return))"),
        ("return x * 2", "(return (* x 2))"),
        ("wait for update", "(wait)"),
        ("break", "(break)"),
        ("while i < 3 do\n  i = i + 1\nend", "(while (< i 3) {(= i (+ i 1))})"),
        ("repeat\n  i = i - 1\nuntil i is 0", "(repeat {(= i (- i 1))} (is i 0))"),
        ("for i from 1 to 5 do\n  f(i)\nend", "(for i 1 5 1 {(call f [i])})"),
        (
            "for i from 5 to 1 step by -1 do\nend",
            "(for i 5 1 (- 1) {})",
        ),
    ];

    for (input, expected) in tests {
        assert_eq!(parse_statements(input), vec![expected], "input: {}", input);
    }
}

#[test]
fn test_if_blocks() {
    let text = "
if a then
  x = 1
else if b then
  x = 2
else
  x = 3
end
if c then

  y = 1

end
";
    assert_eq!(
        parse_statements(text),
        vec![
            "(if a {(= x 1)} (if b {(= x 2)} {(= x 3)}))",
            "(if c {(= y 1)})",
        ]
    );
}

#[test]
fn test_declarations() {
    let text = "
class Player of type Actor
  property hp = 10
  shared property count
  has behaviour Gravity
  update order post
  constructor(hp, name = \"p\")
    count = count + 1
  end
  function hit(amount)
    hp = hp - amount
  end
  native function draw(x, y)
end
behaviour Gravity
  requires behaviour Body
  function update
  end
end
";
    assert_eq!(
        parse_statements(text),
        vec![
            "(class Player Actor {(property hp 10) (property count) (has Gravity) \
             (update-order post) (constructor [hp name]) (function hit [amount]) \
             (native draw [x y])})",
            "(behaviour Gravity {(requires Body) (function update [])})",
        ]
    );
}

#[test]
fn test_parse_errors() {
    let tests = vec![
        ("x = ", "expected expression, found end of line"),
        ("if x then\n  y = 1\n", "expected 'else' or 'end', found end of file"),
        ("1 = 2", "cannot assign to literal"),
        ("f(1) = 2", "cannot assign to function call"),
        ("print(1", "expected ')', found end of line"),
        ("a b", "found 'b'"),
        ("x = (1 + 2", "expected ')'"),
        ("class player\nend", "expected type name, found 'player'"),
        ("update order later", "Unknown update order 'later'"),
        ("function f(a, a)\nend", "duplicate parameter 'a'"),
        ("p.1", "expected member name"),
    ];

    for (input, expected) in tests {
        let msg = parse_error(input);
        assert!(msg.contains(expected), "input: {:?}, error: {}", input, msg);
    }
}

#[test]
fn test_furthest_error_wins() {
    // The optional `step by` group fails further in than the missing `do`
    let msg = parse_error("for i from 1 to 5 step by do\nend");
    assert!(msg.contains("found 'do'"), "error: {}", msg);

    // The single line `if` gets further than the block forms
    let msg = parse_error("if x then y =");
    assert!(
        msg.contains("expected expression, found end of line"),
        "error: {}",
        msg
    );

    let err = parse_source("x = 1\nif x then\n  y = = 2\nend", "loc.kes").unwrap_err();
    let token = err.token.unwrap();
    assert_eq!((token.line, token.start), (3, 7));
    assert_eq!(&*token.source, "loc.kes");
}
