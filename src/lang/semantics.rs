//! Registration of declarations.
//!
//! Runs over every file of a compilation unit before any of it is evaluated. The first pass
//! turns class, behaviour and file-level function declarations into registered objects in
//! the Global scope and rejects declarations in places they are not allowed. The second pass
//! links classes to their parents and checks behaviour attachments against the whole
//! hierarchy. Because linking only happens once everything is registered, declaration order
//! does not matter within a unit.
//!
//! Nothing reaches the Global scope until both passes succeed, so a unit that fails leaves
//! the Global scope exactly as it found it.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::debug;

use crate::lang::ast::{Contract, NodeKind, NodeRef, Parameter};
use crate::lang::error::{Error, Result};
use crate::lang::object::{BehaviourDef, Class, Function, Members, Property, UpdateOrder};
use crate::lang::scope::{ScopeKind, ScopeRef};
use crate::lang::token::Token;

fn body_of(node: &NodeRef) -> &[NodeRef] {
    match &node.kind {
        NodeKind::Block(stmts) => stmts,
        _ => std::slice::from_ref(node),
    }
}

/// Members being collected from a class or behaviour body
#[derive(Default)]
struct Collected {
    members: Members,
    shared_properties: Vec<Property>,
    shared_functions: HashMap<String, Rc<Function>>,
    shared_constructor: Option<Rc<Function>>,
    behaviours: Vec<(String, Token)>,
    update_order: Option<UpdateOrder>,
    requires: Vec<(String, Token)>,
    supports: Vec<(String, Token)>,
    excludes: Vec<(String, Token)>,
}

impl Collected {
    fn has_property(&self, name: &str) -> bool {
        self.members.has_property(name) || self.shared_properties.iter().any(|p| p.name == name)
    }
}

/// Declarations of the unit under analysis, held back from the Global scope until the
/// whole unit checks out
#[derive(Default)]
struct Unit {
    classes: Vec<Rc<Class>>,
    behaviours: Vec<(Rc<BehaviourDef>, Token)>,
    functions: Vec<Rc<Function>>,
    /// File scopes this unit creates
    files: Vec<(String, ScopeRef)>,
}

impl Unit {
    fn class(&self, name: &str) -> Option<&Rc<Class>> {
        self.classes.iter().find(|c| c.name == name)
    }

    fn behaviour(&self, name: &str) -> Option<&Rc<BehaviourDef>> {
        self.behaviours.iter().map(|(d, _)| d).find(|d| d.name == name)
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
    }
}

pub struct SemanticAnalyzer {
    global: ScopeRef,
    unit: Unit,
    loop_depth: u32,
}

impl SemanticAnalyzer {
    pub fn new(global: &ScopeRef) -> Self {
        Self {
            global: global.clone(),
            unit: Unit::default(),
            loop_depth: 0,
        }
    }

    /// Register every declaration in `files`. Returns the classes this unit declared, in
    /// declaration order.
    pub fn analyze(&mut self, files: &[NodeRef]) -> Result<Vec<Rc<Class>>> {
        self.unit = Unit::default();
        let res = self.check_unit(files);
        let unit = std::mem::take(&mut self.unit);
        if let Err(e) = res {
            // Discarded classes may have been linked into a cycle
            for class in &unit.classes {
                class.parent.borrow_mut().take();
            }
            return Err(e);
        }

        Ok(self.commit(unit))
    }

    fn check_unit(&mut self, files: &[NodeRef]) -> Result<()> {
        for file in files {
            let (name, body) = match &file.kind {
                NodeKind::File { name, body } => (name, body),
                _ => return Err(Error::runtime("Expected a file node").at(file)),
            };
            let scope = self.file_scope(name);

            for stmt in body {
                self.register(stmt, &scope)?;
            }
        }

        for class in &self.unit.classes {
            self.link(class)?;
        }
        for class in &self.unit.classes {
            self.check_cycle(class)?;
        }
        for class in &self.unit.classes {
            if let Some(parent) = class.parent.borrow().as_ref() {
                class.shared_scope.set_parent(&parent.shared_scope);
            }
        }
        for (def, _) in &self.unit.behaviours {
            self.check_contracts(def)?;
        }
        for class in &self.unit.classes {
            self.check_attachments(class)?;
        }

        Ok(())
    }

    /// Publish a checked unit in the Global scope
    fn commit(&self, unit: Unit) -> Vec<Rc<Class>> {
        for (name, scope) in &unit.files {
            self.global.add_file_scope(name, scope);
        }
        for (def, token) in unit.behaviours {
            debug!("Registered behaviour {}", def.name);
            // Duplicates were rejected while collecting
            let _ = self.global.register_behaviour(def, &token);
        }
        for func in unit.functions {
            debug!("Registered function {:?}", func);
            let _ = self.global.register_function(func);
        }
        for class in &unit.classes {
            debug!("Registered class {}", class.name);
            let _ = self.global.register_class(class.clone());
        }

        unit.classes
    }

    /// Persistent scope of file `name`, or a new one published with the unit
    fn file_scope(&mut self, name: &str) -> ScopeRef {
        if let Some(scope) = self.global.existing_file_scope(name) {
            return scope;
        }
        if let Some((_, scope)) = self.unit.files.iter().find(|(n, _)| n == name) {
            return scope.clone();
        }

        let scope = ScopeRef::new(ScopeKind::File, &self.global);
        self.unit.files.push((name.to_string(), scope.clone()));
        scope
    }

    fn resolve_class(&self, name: &str) -> Option<Rc<Class>> {
        self.unit
            .class(name)
            .cloned()
            .or_else(|| self.global.resolve_class(name))
    }

    fn resolve_behaviour_def(&self, name: &str) -> Option<Rc<BehaviourDef>> {
        self.unit
            .behaviour(name)
            .cloned()
            .or_else(|| self.global.resolve_behaviour_def(name))
    }

    fn already_declared(what: &str, name: &str, token: &Token) -> Error {
        Error::registration(format!("{} '{}' is already declared", what, name), token)
    }

    fn register(&mut self, stmt: &NodeRef, file: &ScopeRef) -> Result<()> {
        match &stmt.kind {
            NodeKind::Class { name, parent, body } => {
                if self.resolve_class(name).is_some() {
                    return Err(Self::already_declared("Class", name, &stmt.token));
                }
                let class = self.build_class(name, parent.clone(), body, file, &stmt.token)?;
                self.unit.classes.push(class);
            }
            NodeKind::Behaviour { name, body } => {
                if self.resolve_behaviour_def(name).is_some() {
                    return Err(Self::already_declared("Behaviour", name, &stmt.token));
                }
                let def = self.build_behaviour(name, body, &stmt.token)?;
                self.unit.behaviours.push((def, stmt.token.clone()));
            }
            NodeKind::Function { shared: true, .. } | NodeKind::Property { shared: true, .. } => {
                return Err(Error::registration(
                    "'shared' is only allowed inside a class",
                    &stmt.token,
                ))
            }
            NodeKind::Function {
                name, params, body, ..
            } => {
                let func = self.function(name, params, body.clone(), None, &stmt.token)?;
                let func = Function {
                    home: Some(file.clone()),
                    ..func
                };
                if self.unit.has_function(name) || self.global.resolve_function(name).is_some() {
                    return Err(Self::already_declared("Function", name, &stmt.token));
                }
                self.unit.functions.push(Rc::new(func));
            }
            NodeKind::Constructor { .. }
            | NodeKind::Property { .. }
            | NodeKind::HasBehaviour(_)
            | NodeKind::UpdateOrder(_) => {
                return Err(Error::registration(
                    format!("{} is only allowed inside a class", stmt.kind.name()),
                    &stmt.token,
                ))
            }
            NodeKind::Contract(..) => {
                return Err(Error::registration(
                    format!("{} is only allowed inside a behaviour", stmt.kind.name()),
                    &stmt.token,
                ))
            }
            _ => self.check_statement(stmt)?,
        }

        Ok(())
    }

    /// Reject declarations nested inside executable code and loop jumps outside loops
    fn check_statement(&mut self, stmt: &NodeRef) -> Result<()> {
        match &stmt.kind {
            k if k.is_declaration() => {
                return Err(Error::registration(
                    format!("{} is not allowed inside a block", k.name()),
                    &stmt.token,
                ))
            }
            NodeKind::Break | NodeKind::Continue if self.loop_depth == 0 => {
                return Err(Error::registration(
                    format!("'{}' outside of a loop", stmt.token.text),
                    &stmt.token,
                ))
            }
            NodeKind::While { body, .. }
            | NodeKind::Repeat { body, .. }
            | NodeKind::For { body, .. } => {
                self.loop_depth += 1;
                let res = self.check_block(body);
                self.loop_depth -= 1;
                res?;
            }
            NodeKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                self.check_block(then_branch)?;
                if let Some(e) = else_branch {
                    self.check_block(e)?;
                }
            }
            _ => (),
        }

        Ok(())
    }

    fn check_block(&mut self, block: &NodeRef) -> Result<()> {
        for stmt in body_of(block) {
            self.check_statement(stmt)?;
        }

        Ok(())
    }

    /// Check a function body, which starts outside of any loop
    fn check_function_body(&mut self, body: &NodeRef) -> Result<()> {
        let depth = std::mem::replace(&mut self.loop_depth, 0);
        let res = self.check_block(body);
        self.loop_depth = depth;
        res
    }

    fn function(
        &mut self,
        name: &str,
        params: &[Parameter],
        body: Option<NodeRef>,
        owner: Option<&str>,
        token: &Token,
    ) -> Result<Function> {
        if let Some(body) = &body {
            self.check_function_body(body)?;
        }

        Ok(Function {
            name: name.to_string(),
            params: params.to_vec(),
            body,
            owner: owner.map(|o| o.to_string()),
            home: None,
            token: token.clone(),
        })
    }

    /// Collect the declarations of a class (`behaviour == false`) or behaviour body
    fn collect(&mut self, owner: &str, body: &NodeRef, behaviour: bool) -> Result<Collected> {
        let mut c = Collected::default();
        let what = if behaviour { "behaviour" } else { "class" };

        for stmt in body_of(body) {
            let token = &stmt.token;
            match &stmt.kind {
                NodeKind::Function { shared: true, .. }
                | NodeKind::Property { shared: true, .. }
                | NodeKind::Constructor { shared: true, .. }
                    if behaviour =>
                {
                    return Err(Error::registration(
                        "Behaviours cannot declare shared members",
                        token,
                    ))
                }
                NodeKind::Property {
                    name,
                    default,
                    shared,
                } => {
                    if c.has_property(name) {
                        return Err(Error::registration(
                            format!("Property '{}' is already declared in '{}'", name, owner),
                            token,
                        ));
                    }
                    let prop = Property {
                        name: name.clone(),
                        default: default.clone(),
                        token: token.clone(),
                    };
                    if *shared {
                        c.shared_properties.push(prop);
                    } else {
                        c.members.properties.push(prop);
                    }
                }
                NodeKind::Function {
                    name,
                    params,
                    body,
                    shared,
                    ..
                } => {
                    let table = if *shared {
                        &c.shared_functions
                    } else {
                        &c.members.functions
                    };
                    if table.contains_key(name) {
                        return Err(Error::registration(
                            format!("Function '{}' is already declared in '{}'", name, owner),
                            token,
                        ));
                    }

                    let func = Rc::new(self.function(name, params, body.clone(), Some(owner), token)?);
                    if *shared {
                        c.shared_functions.insert(name.clone(), func);
                    } else {
                        c.members.functions.insert(name.clone(), func);
                    }
                }
                NodeKind::Constructor {
                    params,
                    body,
                    shared,
                } => {
                    let slot = if *shared {
                        &c.shared_constructor
                    } else {
                        &c.members.constructor
                    };
                    if slot.is_some() {
                        return Err(Error::registration(
                            format!("'{}' already has a constructor", owner),
                            token,
                        ));
                    }
                    if *shared && !params.is_empty() {
                        return Err(Error::registration(
                            "A shared constructor cannot take parameters",
                            token,
                        ));
                    }
                    // Behaviours are constructed without arguments
                    if let Some(p) = params.iter().find(|p| behaviour && p.default.is_none()) {
                        return Err(Error::registration(
                            format!(
                                "Parameter '{}' of the constructor of behaviour '{}' needs a default",
                                p.name, owner
                            ),
                            token,
                        ));
                    }

                    let ctor = Rc::new(self.function(
                        "constructor",
                        params,
                        Some(body.clone()),
                        Some(owner),
                        token,
                    )?);
                    if *shared {
                        c.shared_constructor = Some(ctor);
                    } else {
                        c.members.constructor = Some(ctor);
                    }
                }
                NodeKind::HasBehaviour(name) if !behaviour => {
                    if c.behaviours.iter().any(|(b, _)| b == name) {
                        return Err(Error::registration(
                            format!("Behaviour '{}' is already attached to '{}'", name, owner),
                            token,
                        ));
                    }
                    c.behaviours.push((name.clone(), token.clone()));
                }
                NodeKind::UpdateOrder(order) if !behaviour => {
                    if c.update_order.is_some() {
                        return Err(Error::registration(
                            format!("'{}' already declares an update order", owner),
                            token,
                        ));
                    }
                    c.update_order = Some(*order);
                }
                NodeKind::Contract(kind, name) if behaviour => {
                    if name == owner {
                        return Err(Error::registration(
                            format!("Behaviour '{}' cannot refer to itself", owner),
                            token,
                        ));
                    }
                    let list = match kind {
                        Contract::Requires => &mut c.requires,
                        Contract::Supports => &mut c.supports,
                        Contract::Excludes => &mut c.excludes,
                    };
                    list.push((name.clone(), token.clone()));
                }
                k if k.is_declaration() => {
                    return Err(Error::registration(
                        format!("{} is not allowed inside a {}", k.name(), what),
                        token,
                    ))
                }
                _ => {
                    return Err(Error::registration(
                        format!("Only declarations are allowed inside a {}", what),
                        token,
                    ))
                }
            }
        }

        Ok(c)
    }

    fn build_class(
        &mut self,
        name: &str,
        parent: Option<String>,
        body: &NodeRef,
        file: &ScopeRef,
        token: &Token,
    ) -> Result<Rc<Class>> {
        let c = self.collect(name, body, false)?;

        // Relinked to the parent's shared scope once parents are known
        let shared_scope = ScopeRef::new(ScopeKind::Class, file);
        shared_scope.set_functions(c.shared_functions);

        Ok(Rc::new(Class {
            name: name.to_string(),
            token: token.clone(),
            parent_name: parent,
            parent: Default::default(),
            members: Rc::new(c.members),
            shared_properties: c.shared_properties,
            shared_constructor: c.shared_constructor,
            behaviours: c.behaviours,
            update_order: c.update_order,
            shared_scope,
            home: file.clone(),
        }))
    }

    fn build_behaviour(
        &mut self,
        name: &str,
        body: &NodeRef,
        token: &Token,
    ) -> Result<Rc<BehaviourDef>> {
        let c = self.collect(name, body, true)?;

        Ok(Rc::new(BehaviourDef {
            name: name.to_string(),
            token: token.clone(),
            members: Rc::new(c.members),
            requires: c.requires,
            supports: c.supports,
            excludes: c.excludes,
        }))
    }

    fn link(&self, class: &Rc<Class>) -> Result<()> {
        let parent_name = match &class.parent_name {
            Some(p) => p,
            None => return Ok(()),
        };

        match self.resolve_class(parent_name) {
            Some(parent) => {
                *class.parent.borrow_mut() = Some(parent);
                Ok(())
            }
            None if self.resolve_behaviour_def(parent_name).is_some() => {
                Err(Error::registration(
                    format!(
                        "Class '{}' cannot extend behaviour '{}'",
                        class.name, parent_name
                    ),
                    &class.token,
                ))
            }
            None => Err(Error::registration(
                format!(
                    "Unknown parent class '{}' of '{}'",
                    parent_name, class.name
                ),
                &class.token,
            )),
        }
    }

    fn check_cycle(&self, class: &Rc<Class>) -> Result<()> {
        let mut seen = HashSet::new();
        let mut cur = class.parent.borrow().clone();
        while let Some(c) = cur {
            if Rc::ptr_eq(&c, class) || !seen.insert(c.name.clone()) {
                return Err(Error::registration(
                    format!("Inheritance cycle through '{}'", class.name),
                    &class.token,
                ));
            }
            cur = c.parent.borrow().clone();
        }

        Ok(())
    }

    fn check_contracts(&self, def: &BehaviourDef) -> Result<()> {
        let names = def
            .requires
            .iter()
            .chain(def.supports.iter())
            .chain(def.excludes.iter());

        for (name, token) in names {
            if self.resolve_behaviour_def(name).is_none() {
                return Err(Error::registration(
                    format!("Unknown behaviour '{}' in '{}'", name, def.name),
                    token,
                ));
            }
        }
        for (name, token) in &def.requires {
            if def.excludes.iter().any(|(e, _)| e == name) {
                return Err(Error::registration(
                    format!("Behaviour '{}' both requires and excludes '{}'", def.name, name),
                    token,
                ));
            }
        }

        Ok(())
    }

    /// Behaviour attachments must be known, unique along the hierarchy and honour contracts
    fn check_attachments(&self, class: &Rc<Class>) -> Result<()> {
        let attached = class.all_behaviours();

        let mut seen = HashSet::new();
        for level in class.hierarchy() {
            for (name, token) in &level.behaviours {
                let def = match self.resolve_behaviour_def(name) {
                    Some(d) => d,
                    None if self.resolve_class(name).is_some() => {
                        return Err(Error::registration(
                            format!("'{}' is a class, not a behaviour", name),
                            token,
                        ))
                    }
                    None => {
                        return Err(Error::registration(
                            format!("Unknown behaviour '{}'", name),
                            token,
                        ))
                    }
                };

                if !seen.insert(name.clone()) {
                    return Err(Error::registration(
                        format!(
                            "Behaviour '{}' is attached more than once in the hierarchy of '{}'",
                            name, class.name
                        ),
                        token,
                    ));
                }
                for (required, _) in &def.requires {
                    if !attached.contains(required) {
                        return Err(Error::registration(
                            format!(
                                "Behaviour '{}' requires behaviour '{}', which '{}' does not have",
                                name, required, class.name
                            ),
                            token,
                        ));
                    }
                }
                for (excluded, _) in &def.excludes {
                    if attached.contains(excluded) {
                        return Err(Error::registration(
                            format!(
                                "Behaviour '{}' excludes behaviour '{}', which '{}' has",
                                name, excluded, class.name
                            ),
                            token,
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
fn analyze(sources: &[&str]) -> Result<(ScopeRef, Vec<Rc<Class>>)> {
    use crate::lang::parse::parse_source;

    let files = sources
        .iter()
        .enumerate()
        .map(|(i, s)| parse_source(s, &format!("file{}", i)))
        .collect::<Result<Vec<_>>>()?;

    let global = ScopeRef::global();
    let classes = SemanticAnalyzer::new(&global).analyze(&files)?;
    Ok((global, classes))
}

#[cfg(test)]
fn analyze_err(sources: &[&str]) -> Error {
    match analyze(sources) {
        Ok(_) => panic!("registration should fail: {:?}", sources),
        Err(e) => e,
    }
}

#[test]
fn test_unknown_parent() {
    use crate::lang::error::ErrorKind;

    let err = analyze_err(&["class A of type B\nend\n"]);
    assert_eq!(err.kind, ErrorKind::Registration);
    assert!(err.description.contains("'B'"), "{}", err);
    assert_eq!(err.token.map(|t| t.line), Some(1));
}

#[test]
fn test_registration_order_independent() {
    let tests = vec![
        vec!["class A of type B\nend\nclass B\nend\n"],
        vec!["class B\nend\nclass A of type B\nend\n"],
        vec!["class A of type B\nend\n", "class B\nend\n"],
    ];

    for sources in tests {
        let (global, classes) = analyze(&sources).unwrap();
        assert_eq!(classes.len(), 2);

        let a = global.resolve_class("A").unwrap();
        let names: Vec<String> = a.hierarchy().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(a.is_a("B"));
        assert!(!global.resolve_class("B").unwrap().is_a("A"));

        // Shared state chains to the parent's
        let b = global.resolve_class("B").unwrap();
        assert_eq!(a.shared_scope.parent(), Some(b.shared_scope.clone()));
    }
}

#[test]
fn test_class_members() {
    let src = "\
class Player
    update order post
    has behaviour Gravity
    property hp = 10
    shared property count = 0
    constructor(name)
        self.name = name
    end
    shared function total()
        return count
    end
    function hit(n)
        hp = hp - n
    end
    native function draw(x, y)
end
behaviour Gravity
    property g = 9.8
end
";
    let (global, _) = analyze(&[src]).unwrap();
    let player = global.resolve_class("Player").unwrap();

    assert_eq!(player.effective_update_order(), UpdateOrder::Post);
    assert_eq!(player.all_behaviours(), vec!["Gravity".to_string()]);
    assert!(player.members.has_property("hp"));
    assert_eq!(player.shared_properties[0].name, "count");
    assert!(player.members.constructor.is_some());
    assert!(player.shared_scope.own_function("total").is_some());
    assert!(player.members.functions["draw"].is_native());
    assert_eq!(player.members.functions["hit"].qualified_name(), "Player.hit");
    assert!(global.resolve_behaviour_def("Gravity").is_some());
}

#[test]
fn test_registration_errors() {
    let tests = vec![
        ("class A\nend\nclass A\nend\n", "already declared"),
        ("function f()\nend\nfunction f()\nend\n", "already declared"),
        ("behaviour G\nend\nbehaviour G\nend\n", "already declared"),
        ("shared property x = 1\n", "'shared' is only allowed inside a class"),
        ("property x = 1\n", "only allowed inside a class"),
        ("has behaviour G\n", "only allowed inside a class"),
        ("requires behaviour G\n", "only allowed inside a behaviour"),
        ("class A\n    x = 1\nend\n", "Only declarations"),
        ("class A\n    class B\n    end\nend\n", "not allowed inside a class"),
        ("class A\n    requires behaviour G\nend\n", "not allowed inside a class"),
        ("behaviour G\n    has behaviour H\nend\n", "not allowed inside a behaviour"),
        ("behaviour G\n    shared property x\nend\n", "cannot declare shared"),
        (
            "class A\n    constructor()\n    end\n    constructor(a)\n    end\nend\n",
            "already has a constructor",
        ),
        ("class A\n    property x\n    property x\nend\n", "already declared in 'A'"),
        ("if True then\n    function f()\n    end\nend\n", "not allowed inside a block"),
        ("break\n", "outside of a loop"),
        ("function f()\n    continue\nend\n", "outside of a loop"),
        ("behaviour G\nend\nclass A of type G\nend\n", "cannot extend behaviour"),
        ("class A of type B\nend\nclass B of type A\nend\n", "Inheritance cycle"),
        ("class A\n    has behaviour Nope\nend\n", "Unknown behaviour 'Nope'"),
        ("class A\n    has behaviour A\nend\n", "is a class"),
        (
            "behaviour G\n    constructor(a, b = 1)\n    end\nend\n",
            "Parameter 'a' of the constructor of behaviour 'G' needs a default",
        ),
    ];

    for (src, expected) in tests {
        let err = analyze_err(&[src]);
        assert!(
            err.description.contains(expected),
            "{:?}: got '{}', expected '{}'",
            src,
            err.description,
            expected
        );
    }
}

#[test]
fn test_loop_jumps() {
    let src = "\
while True do
    if False then
        break
    end
    continue
end
for i from 1 to 3 do
    break
end
";
    assert!(analyze(&[src]).is_ok());
}

#[test]
fn test_behaviour_contracts() {
    let common = "\
behaviour Body
end
behaviour Gravity
    requires behaviour Body
end
behaviour Ghost
    excludes behaviour Body
end
";
    let tests = vec![
        ("class A\n    has behaviour Body\n    has behaviour Gravity\nend\n", None),
        ("class A\n    has behaviour Gravity\nend\n", Some("requires behaviour 'Body'")),
        (
            "class A\n    has behaviour Body\nend\nclass B of type A\n    has behaviour Ghost\nend\n",
            Some("excludes behaviour 'Body'"),
        ),
        (
            "class A\n    has behaviour Body\nend\nclass B of type A\n    has behaviour Body\nend\n",
            Some("more than once"),
        ),
        // Satisfied by an ancestor
        (
            "class A\n    has behaviour Body\nend\nclass B of type A\n    has behaviour Gravity\nend\n",
            None,
        ),
    ];

    for (src, expected) in tests {
        let res = analyze(&[common, src]);
        match expected {
            None => assert!(res.is_ok(), "{:?}: {:?}", src, res.err()),
            Some(msg) => {
                let err = res.err().expect("should fail");
                assert!(err.description.contains(msg), "{}", err.description);
            }
        }
    }

    let err = analyze_err(&["behaviour G\n    requires behaviour Missing\nend\n"]);
    assert!(err.description.contains("Unknown behaviour 'Missing'"));
}

#[test]
fn test_behaviour_constructor_defaults() {
    let src = "behaviour G\n    constructor(a = 1, b = a + 1)\n    end\nend\n";
    let (global, _) = analyze(&[src]).unwrap();
    let def = global.resolve_behaviour_def("G").unwrap();
    assert_eq!(def.members.constructor.as_ref().unwrap().params.len(), 2);
}

#[test]
fn test_failed_unit_is_not_registered() {
    use crate::lang::parse::parse_source;

    let global = ScopeRef::global();
    let register = |src: &str| -> Result<Vec<Rc<Class>>> {
        let file = parse_source(src, "main")?;
        SemanticAnalyzer::new(&global).analyze(&[file])
    };

    let failing = vec![
        "class A of type B\nend\n",
        "function f()\nend\nclass A\n    has behaviour Nope\nend\n",
        "behaviour G\n    requires behaviour Nope\nend\n",
        "class A\nend\nclass A\nend\n",
    ];
    for src in failing {
        assert!(register(src).is_err(), "{}", src);
    }
    assert!(global.resolve_class("A").is_none());
    assert!(global.resolve_function("f").is_none());
    assert!(global.resolve_behaviour_def("G").is_none());
    assert!(global.existing_file_scope("main").is_none());
    assert!(global.with_state(|g| g.classes.is_empty() && g.behaviours.is_empty()));

    let classes = register("class B\nend\nclass A of type B\nend\n").unwrap();
    assert_eq!(classes.len(), 2);
    assert!(global.resolve_class("A").unwrap().is_a("B"));
    assert!(global.existing_file_scope("main").is_some());
    assert_eq!(global.with_state(|g| g.classes.len()), 2);

    // Duplicates are checked against what earlier units registered
    let err = register("class A\nend\n").unwrap_err();
    assert!(err.description.contains("Class 'A' is already declared"), "{}", err);
    let err = register("class C of type B\nend\nclass B\nend\n").unwrap_err();
    assert!(err.description.contains("Class 'B' is already declared"), "{}", err);
    assert!(global.resolve_class("C").is_none());
}
