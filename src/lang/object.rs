use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::lang::ast::{NodeRef, Parameter};
use crate::lang::eval::value::ObjectRef;
use crate::lang::scope::ScopeRef;
use crate::lang::token::Token;

/// Phase a class's `update` runs in during a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOrder {
    Pre,
    Normal,
    Post,
}

impl UpdateOrder {
    pub const ALL: [UpdateOrder; 3] = [UpdateOrder::Pre, UpdateOrder::Normal, UpdateOrder::Post];
}

impl FromStr for UpdateOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre" => Ok(UpdateOrder::Pre),
            "normal" => Ok(UpdateOrder::Normal),
            "post" => Ok(UpdateOrder::Post),
            _ => Err(format!(
                "Unknown update order '{}', expected pre, normal or post",
                s
            )),
        }
    }
}

impl fmt::Display for UpdateOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateOrder::Pre => "pre",
            UpdateOrder::Normal => "normal",
            UpdateOrder::Post => "post",
        };
        write!(f, "{}", s)
    }
}

/// A script function or a host-provided native
pub struct Function {
    pub name: String,
    pub params: Vec<Parameter>,
    /// `None` for natives
    pub body: Option<NodeRef>,
    /// Declaring class or behaviour, used to look up natives
    pub owner: Option<String>,
    /// File scope of a file-level function. Calls run with this as their parent.
    pub home: Option<ScopeRef>,
    pub token: Token,
}

impl Function {
    pub fn is_native(&self) -> bool {
        self.body.is_none()
    }

    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}.{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        write!(f, "{}({})", self.qualified_name(), params.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub default: Option<NodeRef>,
    pub token: Token,
}

/// Per-instance members shared by classes and behaviours
#[derive(Debug, Default)]
pub struct Members {
    pub properties: Vec<Property>,
    pub functions: HashMap<String, Rc<Function>>,
    pub constructor: Option<Rc<Function>>,
}

impl Members {
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }
}

pub struct Class {
    pub name: String,
    pub token: Token,
    pub parent_name: Option<String>,
    /// Linked once every class of the unit is registered
    pub parent: RefCell<Option<Rc<Class>>>,
    pub members: Rc<Members>,
    pub shared_properties: Vec<Property>,
    pub shared_constructor: Option<Rc<Function>>,
    /// Behaviours attached at this level, with the token of each attachment
    pub behaviours: Vec<(String, Token)>,
    pub update_order: Option<UpdateOrder>,
    /// Class-level state and shared functions
    pub shared_scope: ScopeRef,
    /// Scope of the declaring file
    pub home: ScopeRef,
}

impl Class {
    /// This class followed by its ancestors
    pub fn hierarchy(self: &Rc<Self>) -> Vec<Rc<Class>> {
        let mut out = vec![self.clone()];
        let mut seen = HashSet::new();
        seen.insert(self.name.clone());

        loop {
            let parent = out[out.len() - 1].parent.borrow().clone();
            match parent {
                Some(p) if seen.insert(p.name.clone()) => out.push(p),
                _ => break,
            }
        }

        out
    }

    pub fn is_a(self: &Rc<Self>, name: &str) -> bool {
        self.hierarchy().iter().any(|c| c.name == name)
    }

    /// Nearest declared update order in the hierarchy
    pub fn effective_update_order(self: &Rc<Self>) -> UpdateOrder {
        self.hierarchy()
            .iter()
            .find_map(|c| c.update_order)
            .unwrap_or(UpdateOrder::Normal)
    }

    /// Behaviour names attached anywhere in the hierarchy
    pub fn all_behaviours(self: &Rc<Self>) -> Vec<String> {
        self.hierarchy()
            .iter()
            .flat_map(|c| c.behaviours.iter().map(|(name, _)| name.clone()))
            .collect()
    }

    pub fn has_instance_update(self: &Rc<Self>) -> bool {
        self.hierarchy()
            .iter()
            .any(|c| c.members.functions.contains_key("update"))
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("parent", &self.parent_name)
            .finish()
    }
}

pub struct BehaviourDef {
    pub name: String,
    pub token: Token,
    pub members: Rc<Members>,
    pub requires: Vec<(String, Token)>,
    pub supports: Vec<(String, Token)>,
    pub excludes: Vec<(String, Token)>,
}

impl fmt::Debug for BehaviourDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BehaviourDef({})", self.name)
    }
}

/// A constructed class instance or behaviour
pub struct ObjectInstance {
    pub id: usize,
    /// Name of the class or behaviour
    pub type_name: String,
    pub class: Option<Rc<Class>>,
    /// One object scope per hierarchy level, most-derived first
    pub scopes: Vec<ScopeRef>,
    /// Behaviour objects attached to any level
    pub behaviours: RefCell<Vec<ObjectRef>>,
}

impl ObjectInstance {
    /// Scope member lookups on this object start from
    pub fn outer(&self) -> &ScopeRef {
        &self.scopes[0]
    }
}

impl fmt::Display for ObjectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}#{}>", self.type_name, self.id)
    }
}

impl fmt::Debug for ObjectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[test]
fn test_update_order() {
    let tests = vec![
        ("pre", Ok(UpdateOrder::Pre)),
        ("normal", Ok(UpdateOrder::Normal)),
        ("post", Ok(UpdateOrder::Post)),
    ];

    for (input, expected) in tests {
        assert_eq!(input.parse::<UpdateOrder>(), expected);
    }
    assert!("later".parse::<UpdateOrder>().is_err());
}
