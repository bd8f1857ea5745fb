use std::fmt;
use std::rc::Rc;

use crate::lang::eval::value::Constant;
use crate::lang::object::{Class, UpdateOrder};
use crate::lang::token::{Token, TokenKind};

pub type NodeRef = Rc<Node>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_kind(kind: TokenKind) -> Option<BinaryOp> {
        let op = match kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            TokenKind::Equal => BinaryOp::Eq,
            TokenKind::NotEqual => BinaryOp::NotEq,
            TokenKind::Less => BinaryOp::Lt,
            TokenKind::LessEqual => BinaryOp::LtEq,
            TokenKind::Greater => BinaryOp::Gt,
            TokenKind::GreaterEqual => BinaryOp::GtEq,
            TokenKind::And => BinaryOp::And,
            TokenKind::Or => BinaryOp::Or,
            _ => return None,
        };

        Some(op)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "is",
            BinaryOp::NotEq => "isnt",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        };

        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "not"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub default: Option<NodeRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contract {
    Requires,
    Supports,
    Excludes,
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// First token of the construct (the operator, for operations)
    pub token: Token,
}

impl Node {
    pub fn new(kind: NodeKind, token: &Token) -> NodeRef {
        Rc::new(Node {
            kind,
            token: token.clone(),
        })
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Literal(Constant),
    /// Bare type name in expression position: an attached behaviour or a class
    TypeRef(String),
    Unary {
        op: UnaryOp,
        operand: NodeRef,
    },
    Binary {
        op: BinaryOp,
        lhs: NodeRef,
        rhs: NodeRef,
    },
    /// `target.member`. `member` is a variable, type name or call evaluated against the
    /// target's scope.
    Member {
        target: NodeRef,
        member: NodeRef,
    },
    Call {
        name: String,
        args: Vec<NodeRef>,
    },
    New {
        class: String,
        args: Vec<NodeRef>,
    },

    Block(Vec<NodeRef>),
    Assign {
        target: NodeRef,
        value: NodeRef,
    },
    If {
        cond: NodeRef,
        then_branch: NodeRef,
        else_branch: Option<NodeRef>,
    },
    While {
        cond: NodeRef,
        body: NodeRef,
    },
    Repeat {
        body: NodeRef,
        cond: NodeRef,
    },
    For {
        var: String,
        from: NodeRef,
        to: NodeRef,
        step: Option<NodeRef>,
        body: NodeRef,
    },
    Return(Option<NodeRef>),
    Break,
    Continue,
    WaitForUpdate,

    Class {
        name: String,
        parent: Option<String>,
        body: NodeRef,
    },
    Behaviour {
        name: String,
        body: NodeRef,
    },
    Function {
        name: String,
        params: Vec<Parameter>,
        body: Option<NodeRef>,
        shared: bool,
        native: bool,
    },
    Constructor {
        params: Vec<Parameter>,
        body: NodeRef,
        shared: bool,
    },
    Property {
        name: String,
        default: Option<NodeRef>,
        shared: bool,
    },
    HasBehaviour(String),
    Contract(Contract, String),
    UpdateOrder(UpdateOrder),

    File {
        name: String,
        body: Vec<NodeRef>,
    },
    /// Root of one compiled unit. `classes` lists the classes it registered, whose shared
    /// state is initialized before the file bodies run.
    Program {
        files: Vec<NodeRef>,
        classes: Vec<Rc<Class>>,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Literal(Constant::Variable(_)) => "variable",
            NodeKind::Literal(_) => "literal",
            NodeKind::TypeRef(_) => "type name",
            NodeKind::Unary { .. } => "unary operation",
            NodeKind::Binary { .. } => "binary operation",
            NodeKind::Member { .. } => "member access",
            NodeKind::Call { .. } => "function call",
            NodeKind::New { .. } => "object creation",
            NodeKind::Block(_) => "block",
            NodeKind::Assign { .. } => "assignment",
            NodeKind::If { .. } => "if",
            NodeKind::While { .. } => "while loop",
            NodeKind::Repeat { .. } => "repeat loop",
            NodeKind::For { .. } => "for loop",
            NodeKind::Return(_) => "return",
            NodeKind::Break => "break",
            NodeKind::Continue => "continue",
            NodeKind::WaitForUpdate => "wait for update",
            NodeKind::Class { .. } => "class declaration",
            NodeKind::Behaviour { .. } => "behaviour declaration",
            NodeKind::Function { .. } => "function declaration",
            NodeKind::Constructor { .. } => "constructor declaration",
            NodeKind::Property { .. } => "property declaration",
            NodeKind::HasBehaviour(_) => "behaviour attachment",
            NodeKind::Contract(..) => "behaviour contract",
            NodeKind::UpdateOrder(_) => "update order",
            NodeKind::File { .. } => "file",
            NodeKind::Program { .. } => "program",
        }
    }

    pub fn is_declaration(&self) -> bool {
        matches!(
            self,
            NodeKind::Class { .. }
                | NodeKind::Behaviour { .. }
                | NodeKind::Function { .. }
                | NodeKind::Constructor { .. }
                | NodeKind::Property { .. }
                | NodeKind::HasBehaviour(_)
                | NodeKind::Contract(..)
                | NodeKind::UpdateOrder(_)
        )
    }
}

/// Compact s-expression rendering for parser tests
pub fn sexpr(node: &Node) -> String {
    let list = |nodes: &[NodeRef]| {
        nodes
            .iter()
            .map(|n| sexpr(n))
            .collect::<Vec<_>>()
            .join(" ")
    };

    match &node.kind {
        NodeKind::Literal(c) => c.repr(),
        NodeKind::TypeRef(name) => name.clone(),
        NodeKind::Unary { op, operand } => format!("({} {})", op, sexpr(operand)),
        NodeKind::Binary { op, lhs, rhs } => format!("({} {} {})", op, sexpr(lhs), sexpr(rhs)),
        NodeKind::Member { target, member } => {
            format!("(. {} {})", sexpr(target), sexpr(member))
        }
        NodeKind::Call { name, args } => format!("(call {} [{}])", name, list(args)),
        NodeKind::New { class, args } => format!("(new {} [{}])", class, list(args)),
        NodeKind::Block(stmts) => format!("{{{}}}", list(stmts)),
        NodeKind::Assign { target, value } => format!("(= {} {})", sexpr(target), sexpr(value)),
        NodeKind::If {
            cond,
            then_branch,
            else_branch,
        } => match else_branch {
            Some(e) => format!(
                "(if {} {} {})",
                sexpr(cond),
                sexpr(then_branch),
                sexpr(e)
            ),
            None => format!("(if {} {})", sexpr(cond), sexpr(then_branch)),
        },
        NodeKind::While { cond, body } => format!("(while {} {})", sexpr(cond), sexpr(body)),
        NodeKind::Repeat { body, cond } => format!("(repeat {} {})", sexpr(body), sexpr(cond)),
        NodeKind::For {
            var,
            from,
            to,
            step,
            body,
        } => format!(
            "(for {} {} {} {} {})",
            var,
            sexpr(from),
            sexpr(to),
            step.as_ref().map_or("1".to_string(), |s| sexpr(s)),
            sexpr(body)
        ),
        NodeKind::Return(Some(v)) => format!("(return {})", sexpr(v)),
        NodeKind::Return(None) => "(return)".to_string(),
        NodeKind::Break => "(break)".to_string(),
        NodeKind::Continue => "(continue)".to_string(),
        NodeKind::WaitForUpdate => "(wait)".to_string(),
        NodeKind::Class { name, parent, body } => match parent {
            Some(p) => format!("(class {} {} {})", name, p, sexpr(body)),
            None => format!("(class {} {})", name, sexpr(body)),
        },
        NodeKind::Behaviour { name, body } => format!("(behaviour {} {})", name, sexpr(body)),
        NodeKind::Function {
            name,
            params,
            native,
            ..
        } => {
            let params: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
            let kind = if *native { "native" } else { "function" };
            format!("({} {} [{}])", kind, name, params.join(" "))
        }
        NodeKind::Constructor { params, .. } => {
            let params: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
            format!("(constructor [{}])", params.join(" "))
        }
        NodeKind::Property { name, default, .. } => match default {
            Some(d) => format!("(property {} {})", name, sexpr(d)),
            None => format!("(property {})", name),
        },
        NodeKind::HasBehaviour(name) => format!("(has {})", name),
        NodeKind::Contract(c, name) => {
            format!("({} {})", format!("{:?}", c).to_lowercase(), name)
        }
        NodeKind::UpdateOrder(order) => format!("(update-order {})", order),
        NodeKind::File { name, body } => format!("(file {} {})", name, list(body)),
        NodeKind::Program { files, .. } => format!("(program {})", list(files)),
    }
}
