use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::lang::ast::{Contract, Node, NodeKind, NodeRef, Parameter};
use crate::lang::eval::value::Constant;
use crate::lang::object::UpdateOrder;
use crate::lang::token::{Token, TokenKind};

pub enum Entry {
    /// Exact token text
    Literal(&'static str),
    Kind(TokenKind),
    /// Capitalized identifier
    TypeName,
    /// Lowercase identifier
    Identifier,
    /// Expression run, additionally stopping at the listed words
    Expression(&'static [&'static str]),
    Statement,
    /// Comma separated expressions
    Parameters,
    /// Comma separated `name [= default]`
    ParameterDefinitions,
    /// Parenthesised `Parameters`
    ExpressionList,
    /// Group that may be absent. Binds its id (if any) when present.
    Optional(Vec<Match>),
    /// Statements up to (not including) one of the listed words
    Subtree(&'static [&'static str]),
}

pub struct Match {
    pub id: Option<&'static str>,
    pub entry: Entry,
}

#[derive(Debug, Clone)]
pub enum Binding {
    Token(Token),
    Text(String),
    Node(NodeRef),
    Nodes(Vec<NodeRef>),
    Parameters(Vec<Parameter>),
    Present,
}

/// Captures of one rule match, by id
#[derive(Debug, Default)]
pub struct Bindings(HashMap<&'static str, Binding>);

impl Bindings {
    pub fn insert(&mut self, id: &'static str, binding: Binding) {
        self.0.insert(id, binding);
    }

    pub fn extend(&mut self, other: Bindings) {
        self.0.extend(other.0);
    }

    pub fn has(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    fn take(&mut self, id: &str) -> Result<Binding, String> {
        self.0
            .remove(id)
            .ok_or_else(|| format!("rule did not bind '{}'", id))
    }

    pub fn text(&mut self, id: &str) -> Result<String, String> {
        match self.take(id)? {
            Binding::Text(s) => Ok(s),
            Binding::Token(t) => Ok(t.text),
            b => Err(format!("'{}' is not text: {:?}", id, b)),
        }
    }

    pub fn node(&mut self, id: &str) -> Result<NodeRef, String> {
        match self.take(id)? {
            Binding::Node(n) => Ok(n),
            b => Err(format!("'{}' is not a node: {:?}", id, b)),
        }
    }

    pub fn opt_node(&mut self, id: &str) -> Result<Option<NodeRef>, String> {
        if self.has(id) {
            self.node(id).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn nodes(&mut self, id: &str) -> Result<Vec<NodeRef>, String> {
        match self.take(id)? {
            Binding::Nodes(n) => Ok(n),
            b => Err(format!("'{}' is not a node list: {:?}", id, b)),
        }
    }

    pub fn params(&mut self, id: &str) -> Result<Vec<Parameter>, String> {
        match self.take(id)? {
            Binding::Parameters(p) => Ok(p),
            b => Err(format!("'{}' is not a parameter list: {:?}", id, b)),
        }
    }
}

/// Turns the captures of a complete match into a node. `Token` is the first token matched.
pub type Builder = fn(&mut Bindings, &Token) -> Result<NodeRef, String>;

fn node(token: &Token, kind: NodeKind) -> Result<NodeRef, String> {
    Ok(Node::new(kind, token))
}

pub struct Rule {
    pub name: &'static str,
    pub entries: Vec<Match>,
    pub build: Builder,
}

fn rule(name: &'static str, entries: Vec<Match>, build: Builder) -> Rule {
    Rule {
        name,
        entries,
        build,
    }
}

fn lit(text: &'static str) -> Match {
    Match {
        id: None,
        entry: Entry::Literal(text),
    }
}

fn eol() -> Match {
    Match {
        id: None,
        entry: Entry::Kind(TokenKind::Eol),
    }
}

fn bind(id: &'static str, entry: Entry) -> Match {
    Match {
        id: Some(id),
        entry,
    }
}

fn opt(id: Option<&'static str>, group: Vec<Match>) -> Match {
    Match {
        id,
        entry: Entry::Optional(group),
    }
}

fn expr(id: &'static str) -> Match {
    bind(id, Entry::Expression(&[]))
}

fn block(id: &'static str, terminators: &'static [&'static str]) -> Match {
    bind(id, Entry::Subtree(terminators))
}

/// `(params)` with the parentheses optional as a whole
fn param_defs() -> Match {
    opt(
        None,
        vec![
            lit("("),
            bind("params", Entry::ParameterDefinitions),
            lit(")"),
        ],
    )
}

lazy_static! {
    pub static ref STATEMENTS: Vec<Rule> = vec![
        rule(
            "class",
            vec![
                lit("class"),
                bind("name", Entry::TypeName),
                opt(None, vec![lit("of"), lit("type"), bind("parent", Entry::TypeName)]),
                eol(),
                block("body", &["end"]),
                lit("end"),
            ],
            build_class,
        ),
        rule(
            "behaviour",
            vec![
                lit("behaviour"),
                bind("name", Entry::TypeName),
                eol(),
                block("body", &["end"]),
                lit("end"),
            ],
            build_behaviour,
        ),
        rule(
            "function",
            vec![
                opt(Some("shared"), vec![lit("shared")]),
                lit("function"),
                bind("name", Entry::Identifier),
                param_defs(),
                eol(),
                block("body", &["end"]),
                lit("end"),
            ],
            build_function,
        ),
        rule(
            "native function",
            vec![
                opt(Some("shared"), vec![lit("shared")]),
                lit("native"),
                lit("function"),
                bind("name", Entry::Identifier),
                param_defs(),
            ],
            build_native,
        ),
        rule(
            "constructor",
            vec![
                opt(Some("shared"), vec![lit("shared")]),
                lit("constructor"),
                param_defs(),
                eol(),
                block("body", &["end"]),
                lit("end"),
            ],
            build_constructor,
        ),
        rule(
            "property",
            vec![
                opt(Some("shared"), vec![lit("shared")]),
                lit("property"),
                bind("name", Entry::Identifier),
                opt(None, vec![lit("="), expr("default")]),
            ],
            build_property,
        ),
        rule(
            "has behaviour",
            vec![lit("has"), lit("behaviour"), bind("name", Entry::TypeName)],
            build_has_behaviour,
        ),
        rule(
            "requires",
            vec![lit("requires"), lit("behaviour"), bind("name", Entry::TypeName)],
            |b, t| node(t, NodeKind::Contract(Contract::Requires, b.text("name")?)),
        ),
        rule(
            "supports",
            vec![lit("supports"), lit("behaviour"), bind("name", Entry::TypeName)],
            |b, t| node(t, NodeKind::Contract(Contract::Supports, b.text("name")?)),
        ),
        rule(
            "excludes",
            vec![lit("excludes"), lit("behaviour"), bind("name", Entry::TypeName)],
            |b, t| node(t, NodeKind::Contract(Contract::Excludes, b.text("name")?)),
        ),
        rule(
            "update order",
            vec![lit("update"), lit("order"), bind("order", Entry::Identifier)],
            |b, t| node(t, NodeKind::UpdateOrder(b.text("order")?.parse::<UpdateOrder>()?)),
        ),
        rule(
            "if block",
            vec![
                lit("if"),
                expr("cond"),
                lit("then"),
                eol(),
                block("then", &["else", "end"]),
                opt(None, vec![lit("else"), eol(), block("else", &["end"])]),
                lit("end"),
            ],
            build_if,
        ),
        rule(
            "if else chain",
            vec![
                lit("if"),
                expr("cond"),
                lit("then"),
                eol(),
                block("then", &["else", "end"]),
                lit("else"),
                bind("else", Entry::Statement),
            ],
            build_if_chain,
        ),
        rule(
            "if line",
            vec![
                lit("if"),
                expr("cond"),
                lit("then"),
                bind("then", Entry::Statement),
                opt(None, vec![lit("else"), bind("else", Entry::Statement)]),
            ],
            build_if,
        ),
        rule(
            "while",
            vec![
                lit("while"),
                expr("cond"),
                lit("do"),
                eol(),
                block("body", &["end"]),
                lit("end"),
            ],
            |b, t| {
                let kind = NodeKind::While {
                    cond: b.node("cond")?,
                    body: b.node("body")?,
                };
                node(t, kind)
            },
        ),
        rule(
            "repeat",
            vec![
                lit("repeat"),
                eol(),
                block("body", &["until"]),
                lit("until"),
                expr("cond"),
            ],
            |b, t| {
                let kind = NodeKind::Repeat {
                    body: b.node("body")?,
                    cond: b.node("cond")?,
                };
                node(t, kind)
            },
        ),
        rule(
            "for",
            vec![
                lit("for"),
                bind("var", Entry::Identifier),
                lit("from"),
                expr("from"),
                lit("to"),
                expr("to"),
                opt(None, vec![lit("step"), lit("by"), expr("step")]),
                lit("do"),
                eol(),
                block("body", &["end"]),
                lit("end"),
            ],
            |b, t| {
                let kind = NodeKind::For {
                    var: b.text("var")?,
                    from: b.node("from")?,
                    to: b.node("to")?,
                    step: b.opt_node("step")?,
                    body: b.node("body")?,
                };
                node(t, kind)
            },
        ),
        rule(
            "return",
            vec![lit("return"), opt(None, vec![expr("value")])],
            |b, t| node(t, NodeKind::Return(b.opt_node("value")?)),
        ),
        rule("break", vec![lit("break")], |_, t| node(t, NodeKind::Break)),
        rule("continue", vec![lit("continue")], |_, t| node(t, NodeKind::Continue)),
        rule(
            "wait for update",
            vec![lit("wait"), lit("for"), lit("update")],
            |_, t| node(t, NodeKind::WaitForUpdate),
        ),
        rule(
            "assignment",
            vec![expr("target"), bind("op", Entry::Kind(TokenKind::Assign)), expr("value")],
            build_assign,
        ),
        rule("expression", vec![expr("expr")], |b, _| b.node("expr")),
    ];

    pub static ref EXPRESSIONS: Vec<Rule> = vec![
        rule(
            "new",
            vec![
                lit("new"),
                bind("class", Entry::TypeName),
                opt(None, vec![bind("args", Entry::ExpressionList)]),
            ],
            |b, t| {
                let args = if b.has("args") { b.nodes("args")? } else { Vec::new() };
                let kind = NodeKind::New {
                    class: b.text("class")?,
                    args,
                };
                node(t, kind)
            },
        ),
        rule(
            "call",
            vec![bind("name", Entry::Identifier), bind("args", Entry::ExpressionList)],
            |b, t| {
                let kind = NodeKind::Call {
                    name: b.text("name")?,
                    args: b.nodes("args")?,
                };
                node(t, kind)
            },
        ),
    ];
}

fn build_class(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let parent = if b.has("parent") {
        Some(b.text("parent")?)
    } else {
        None
    };

    let kind = NodeKind::Class {
        name: b.text("name")?,
        parent,
        body: b.node("body")?,
    };
    node(t, kind)
}

fn build_behaviour(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let kind = NodeKind::Behaviour {
        name: b.text("name")?,
        body: b.node("body")?,
    };
    node(t, kind)
}

fn params_or_empty(b: &mut Bindings) -> Result<Vec<Parameter>, String> {
    if b.has("params") {
        b.params("params")
    } else {
        Ok(Vec::new())
    }
}

fn build_function(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let kind = NodeKind::Function {
        name: b.text("name")?,
        params: params_or_empty(b)?,
        body: Some(b.node("body")?),
        shared: b.has("shared"),
        native: false,
    };
    node(t, kind)
}

fn build_native(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let kind = NodeKind::Function {
        name: b.text("name")?,
        params: params_or_empty(b)?,
        body: None,
        shared: b.has("shared"),
        native: true,
    };
    node(t, kind)
}

fn build_constructor(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let kind = NodeKind::Constructor {
        params: params_or_empty(b)?,
        body: b.node("body")?,
        shared: b.has("shared"),
    };
    node(t, kind)
}

fn build_property(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let kind = NodeKind::Property {
        name: b.text("name")?,
        default: b.opt_node("default")?,
        shared: b.has("shared"),
    };
    node(t, kind)
}

fn build_has_behaviour(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    node(t, NodeKind::HasBehaviour(b.text("name")?))
}

fn build_if(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let kind = NodeKind::If {
        cond: b.node("cond")?,
        then_branch: b.node("then")?,
        else_branch: b.opt_node("else")?,
    };
    node(t, kind)
}

/// `else if ... end`: the nested block if closes the whole chain with its own `end`
fn build_if_chain(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let nested = b.node("else")?;
    match &nested.kind {
        NodeKind::If { then_branch, .. } if matches!(then_branch.kind, NodeKind::Block(_)) => (),
        _ => return Err("expected 'if ... then' block after 'else'".to_string()),
    }

    let kind = NodeKind::If {
        cond: b.node("cond")?,
        then_branch: b.node("then")?,
        else_branch: Some(nested),
    };
    node(t, kind)
}

fn build_assign(b: &mut Bindings, t: &Token) -> Result<NodeRef, String> {
    let target = b.node("target")?;
    let assignable = match &target.kind {
        NodeKind::Literal(Constant::Variable(_)) => true,
        NodeKind::Member { member, .. } => {
            matches!(member.kind, NodeKind::Literal(Constant::Variable(_)))
        }
        _ => false,
    };
    if !assignable {
        return Err(format!("cannot assign to {}", target.kind.name()));
    }

    let kind = NodeKind::Assign {
        target,
        value: b.node("value")?,
    };
    node(t, kind)
}

