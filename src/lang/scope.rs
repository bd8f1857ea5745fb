use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::lang::error::{Error, Result};
use crate::lang::eval::value::{Constant, ObjectRef};
use crate::lang::object::{BehaviourDef, Class, Function, ObjectInstance, UpdateOrder};
use crate::lang::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Generic,
    Function,
    Class,
    Object,
    File,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: Constant,
}

#[derive(Clone)]
pub enum UpdateTarget {
    Class(Rc<Class>),
    Object(ObjectRef),
}

/// State only the Global scope carries
#[derive(Default)]
pub struct GlobalState {
    /// Classes in registration order
    pub classes: Vec<Rc<Class>>,
    pub behaviours: Vec<Rc<BehaviourDef>>,
    pub pre: Vec<UpdateTarget>,
    pub normal: Vec<UpdateTarget>,
    pub post: Vec<UpdateTarget>,
    /// One-shot flags released at the end of the current frame
    pub waiters: Vec<Rc<Cell<bool>>>,
    pub files: HashMap<String, ScopeRef>,
    next_id: usize,
}

impl GlobalState {
    pub fn registry(&mut self, order: UpdateOrder) -> &mut Vec<UpdateTarget> {
        match order {
            UpdateOrder::Pre => &mut self.pre,
            UpdateOrder::Normal => &mut self.normal,
            UpdateOrder::Post => &mut self.post,
        }
    }

    pub fn next_object_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }
}

enum Parent {
    Strong(ScopeRef),
    /// Used by behaviour objects so they do not keep their owner alive
    Weak(Weak<RefCell<Scope>>),
}

impl Parent {
    fn get(&self) -> Option<ScopeRef> {
        match self {
            Parent::Strong(s) => Some(s.clone()),
            Parent::Weak(w) => w.upgrade().map(ScopeRef),
        }
    }
}

pub struct Scope {
    kind: ScopeKind,
    parent: Option<Parent>,
    delegate: Option<ScopeRef>,
    variables: HashMap<String, Variable>,
    functions: HashMap<String, Rc<Function>>,
    classes: HashMap<String, Rc<Class>>,
    behaviour_defs: HashMap<String, Rc<BehaviourDef>>,
    /// Behaviour objects attached to this level of an object
    attached: Vec<ObjectRef>,
    instance: Option<Weak<ObjectInstance>>,
    global: Option<Box<GlobalState>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: values can reach back into this scope
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ScopeRef(Rc<RefCell<Scope>>);

impl PartialEq for ScopeRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl ScopeRef {
    fn with_parent(kind: ScopeKind, parent: Option<Parent>) -> Self {
        ScopeRef(Rc::new(RefCell::new(Scope {
            kind,
            parent,
            delegate: None,
            variables: HashMap::new(),
            functions: HashMap::new(),
            classes: HashMap::new(),
            behaviour_defs: HashMap::new(),
            attached: Vec::new(),
            instance: None,
            global: None,
        })))
    }

    pub fn global() -> Self {
        let scope = Self::with_parent(ScopeKind::Global, None);
        scope.0.borrow_mut().global = Some(Box::new(GlobalState::default()));
        scope
    }

    pub fn new(kind: ScopeKind, parent: &ScopeRef) -> Self {
        Self::with_parent(kind, Some(Parent::Strong(parent.clone())))
    }

    /// Class scope of one object level, delegating to the class's shared scope
    pub fn wrapper(shared: &ScopeRef, parent: &ScopeRef) -> Self {
        let scope = Self::new(ScopeKind::Class, parent);
        scope.0.borrow_mut().delegate = Some(shared.clone());
        scope
    }

    /// Object scope that only weakly refers to its parent
    pub fn detached(kind: ScopeKind, parent: &ScopeRef) -> Self {
        Self::with_parent(kind, Some(Parent::Weak(Rc::downgrade(&parent.0))))
    }

    pub fn kind(&self) -> ScopeKind {
        self.0.borrow().kind
    }

    pub fn parent(&self) -> Option<ScopeRef> {
        self.0.borrow().parent.as_ref().and_then(|p| p.get())
    }

    pub fn set_parent(&self, parent: &ScopeRef) {
        self.0.borrow_mut().parent = Some(Parent::Strong(parent.clone()));
    }

    pub fn set_instance(&self, instance: &ObjectRef) {
        self.0.borrow_mut().instance = Some(Rc::downgrade(instance));
    }

    /// Walk the chain, offering every scope (and delegate) to `f` until it returns something.
    /// With `members_only` the walk stops at the first File or Global scope.
    fn walk<T>(&self, members_only: bool, f: impl Fn(&ScopeRef, &Scope) -> Option<T>) -> Option<T> {
        let mut cur = Some(self.clone());
        while let Some(scope) = cur.take() {
            let inner = scope.0.borrow();
            if members_only && matches!(inner.kind, ScopeKind::File | ScopeKind::Global) {
                return None;
            }
            if let Some(v) = f(&scope, &inner) {
                return Some(v);
            }
            if let Some(delegate) = &inner.delegate {
                if let Some(v) = f(delegate, &delegate.0.borrow()) {
                    return Some(v);
                }
            }
            cur = inner.parent.as_ref().and_then(|p| p.get());
        }

        None
    }

    fn find<T>(&self, f: impl Fn(&ScopeRef, &Scope) -> Option<T>) -> Option<T> {
        self.walk(false, f)
    }

    pub fn resolve_variable(&self, name: &str) -> Option<Constant> {
        self.find(|_, s| s.variables.get(name).map(|v| v.value.clone()))
    }

    /// Returns the function and the scope it was declared in
    pub fn resolve_function(&self, name: &str) -> Option<(Rc<Function>, ScopeRef)> {
        self.find(|r, s| s.functions.get(name).map(|f| (f.clone(), r.clone())))
    }

    /// Property of the object or class this scope belongs to, ignoring file and global state
    pub fn resolve_member_variable(&self, name: &str) -> Option<Constant> {
        self.walk(true, |_, s| s.variables.get(name).map(|v| v.value.clone()))
    }

    pub fn resolve_member_function(&self, name: &str) -> Option<(Rc<Function>, ScopeRef)> {
        self.walk(true, |r, s| s.functions.get(name).map(|f| (f.clone(), r.clone())))
    }

    pub fn own_function(&self, name: &str) -> Option<Rc<Function>> {
        self.0.borrow().functions.get(name).cloned()
    }

    pub fn resolve_class(&self, name: &str) -> Option<Rc<Class>> {
        self.find(|_, s| s.classes.get(name).cloned())
    }

    pub fn resolve_behaviour_def(&self, name: &str) -> Option<Rc<BehaviourDef>> {
        self.find(|_, s| s.behaviour_defs.get(name).cloned())
    }

    /// Behaviour object named `name` attached somewhere along the chain
    pub fn resolve_attached(&self, name: &str) -> Option<ObjectRef> {
        self.find(|_, s| s.attached.iter().find(|o| o.type_name == name).cloned())
    }

    /// Nearest scope of `kind`, starting with this one
    pub fn resolve_scope(&self, kind: ScopeKind) -> Option<ScopeRef> {
        let mut cur = Some(self.clone());
        while let Some(scope) = cur {
            if scope.kind() == kind {
                return Some(scope);
            }
            cur = scope.parent();
        }

        None
    }

    /// Object whose level scope encloses this one
    pub fn resolve_instance(&self) -> Option<ObjectRef> {
        self.find(|_, s| s.instance.as_ref().and_then(|i| i.upgrade()))
    }

    /// Overwrite `name` wherever it is bound, or bind it here if it is bound nowhere
    pub fn set_variable(&self, name: &str, value: Constant) {
        let owner = self
            .find(|r, s| {
                if s.variables.contains_key(name) {
                    Some(r.clone())
                } else {
                    None
                }
            })
            .unwrap_or_else(|| self.clone());

        owner.set_variable_in_own_scope(name, value);
    }

    /// Like `set_variable`, but never reaches file or global state
    pub fn set_member_variable(&self, name: &str, value: Constant) {
        let owner = self
            .walk(true, |r, s| {
                if s.variables.contains_key(name) {
                    Some(r.clone())
                } else {
                    None
                }
            })
            .unwrap_or_else(|| self.clone());

        owner.set_variable_in_own_scope(name, value);
    }

    pub fn set_variable_in_own_scope(&self, name: &str, value: Constant) {
        self.0.borrow_mut().variables.insert(
            name.to_string(),
            Variable {
                name: name.to_string(),
                value,
            },
        );
    }

    pub fn has_own_variable(&self, name: &str) -> bool {
        self.0.borrow().variables.contains_key(name)
    }

    pub fn register_function(&self, function: Rc<Function>) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.functions.contains_key(&function.name) {
            return Err(Error::registration(
                format!("Function '{}' is already declared", function.name),
                &function.token,
            ));
        }
        inner.functions.insert(function.name.clone(), function);

        Ok(())
    }

    pub fn set_functions(&self, functions: HashMap<String, Rc<Function>>) {
        self.0.borrow_mut().functions = functions;
    }

    pub fn register_class(&self, class: Rc<Class>) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.classes.contains_key(&class.name) {
            return Err(Error::registration(
                format!("Class '{}' is already declared", class.name),
                &class.token,
            ));
        }
        inner.classes.insert(class.name.clone(), class.clone());
        if let Some(g) = inner.global.as_mut() {
            g.classes.push(class);
        }

        Ok(())
    }

    pub fn register_behaviour(&self, def: Rc<BehaviourDef>, token: &Token) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.behaviour_defs.contains_key(&def.name) {
            return Err(Error::registration(
                format!("Behaviour '{}' is already declared", def.name),
                token,
            ));
        }
        inner.behaviour_defs.insert(def.name.clone(), def.clone());
        if let Some(g) = inner.global.as_mut() {
            g.behaviours.push(def);
        }

        Ok(())
    }

    pub fn attach(&self, behaviour: ObjectRef) {
        self.0.borrow_mut().attached.push(behaviour);
    }

    /// The Global scope at the root of this chain
    pub fn root(&self) -> ScopeRef {
        let mut cur = self.clone();
        while let Some(parent) = cur.parent() {
            cur = parent;
        }
        cur
    }

    /// Run `f` on the Global state at the root of this chain
    pub fn with_state<R>(&self, f: impl FnOnce(&mut GlobalState) -> R) -> R {
        let root = self.root();
        let mut inner = root.0.borrow_mut();
        let state = inner.global.get_or_insert_with(Default::default);
        f(state)
    }

    /// Persistent scope of the file `name`, created on first use
    pub fn file_scope(&self, name: &str) -> ScopeRef {
        if let Some(scope) = self.existing_file_scope(name) {
            return scope;
        }

        let scope = ScopeRef::new(ScopeKind::File, &self.root());
        self.add_file_scope(name, &scope);
        scope
    }

    pub fn existing_file_scope(&self, name: &str) -> Option<ScopeRef> {
        self.with_state(|g| g.files.get(name).cloned())
    }

    pub fn add_file_scope(&self, name: &str, scope: &ScopeRef) {
        self.with_state(|g| g.files.insert(name.to_string(), scope.clone()));
    }

    /// Drop every binding so reference cycles through this scope are released
    pub fn clear(&self) {
        let state = {
            let mut inner = self.0.borrow_mut();
            inner.variables.clear();
            inner.functions.clear();
            inner.classes.clear();
            inner.behaviour_defs.clear();
            inner.attached.clear();
            inner.global.take()
        };

        if let Some(state) = state {
            for file in state.files.values() {
                file.clear();
            }
            for class in &state.classes {
                class.shared_scope.clear();
            }
        }
    }
}

#[cfg(test)]
fn num(n: f64) -> Constant {
    Constant::Number(n)
}

#[test]
fn test_resolve_walks_chain() {
    let global = ScopeRef::global();
    let file = global.file_scope("main");
    let func = ScopeRef::new(ScopeKind::Function, &file);

    file.set_variable_in_own_scope("x", num(1.0));
    assert_eq!(func.resolve_variable("x"), Some(num(1.0)));
    assert_eq!(func.resolve_variable("y"), None);
    assert_eq!(global.resolve_variable("x"), None);

    // Shadowing is explicit
    func.set_variable_in_own_scope("x", num(2.0));
    assert_eq!(func.resolve_variable("x"), Some(num(2.0)));
    assert_eq!(file.resolve_variable("x"), Some(num(1.0)));
}

#[test]
fn test_set_variable() {
    let global = ScopeRef::global();
    let file = global.file_scope("main");
    let func = ScopeRef::new(ScopeKind::Function, &file);

    file.set_variable_in_own_scope("x", num(1.0));
    func.set_variable("x", num(5.0));
    assert_eq!(file.resolve_variable("x"), Some(num(5.0)));
    assert!(!func.has_own_variable("x"));

    func.set_variable("fresh", num(3.0));
    assert!(func.has_own_variable("fresh"));
    assert_eq!(file.resolve_variable("fresh"), None);
}

#[test]
fn test_delegate() {
    let global = ScopeRef::global();
    let shared = ScopeRef::new(ScopeKind::Class, &global);
    let object = ScopeRef::new(ScopeKind::Object, &global);
    let wrapper = ScopeRef::wrapper(&shared, &object);
    let inner = ScopeRef::new(ScopeKind::Object, &wrapper);

    shared.set_variable_in_own_scope("count", num(0.0));
    object.set_variable_in_own_scope("hp", num(10.0));

    assert_eq!(inner.resolve_variable("count"), Some(num(0.0)));
    assert_eq!(inner.resolve_variable("hp"), Some(num(10.0)));

    inner.set_variable("count", num(1.0));
    assert_eq!(shared.resolve_variable("count"), Some(num(1.0)));
    assert!(!wrapper.has_own_variable("count"));
}

#[test]
fn test_member_lookup_stops_at_file() {
    let global = ScopeRef::global();
    let file = global.file_scope("main");
    let object = ScopeRef::new(ScopeKind::Object, &file);

    file.set_variable_in_own_scope("x", num(1.0));
    object.set_variable_in_own_scope("hp", num(4.0));

    assert_eq!(object.resolve_variable("x"), Some(num(1.0)));
    assert_eq!(object.resolve_member_variable("x"), None);
    assert_eq!(object.resolve_member_variable("hp"), Some(num(4.0)));

    object.set_member_variable("x", num(2.0));
    assert!(object.has_own_variable("x"));
    assert_eq!(file.resolve_variable("x"), Some(num(1.0)));
}

#[test]
fn test_resolve_scope() {
    let global = ScopeRef::global();
    let file = global.file_scope("a");
    let func = ScopeRef::new(ScopeKind::Function, &file);
    let block = ScopeRef::new(ScopeKind::Generic, &func);

    assert_eq!(block.resolve_scope(ScopeKind::Function), Some(func.clone()));
    assert_eq!(block.resolve_scope(ScopeKind::File), Some(file.clone()));
    assert_eq!(block.resolve_scope(ScopeKind::Global), Some(global.clone()));
    assert_eq!(block.resolve_scope(ScopeKind::Object), None);
    assert_eq!(block.root(), global);
    assert_eq!(global.file_scope("a"), file);
}

#[test]
fn test_weak_parent() {
    let global = ScopeRef::global();
    let owner = ScopeRef::new(ScopeKind::Object, &global);
    let behaviour = ScopeRef::detached(ScopeKind::Object, &owner);

    owner.set_variable_in_own_scope("hp", num(3.0));
    assert_eq!(behaviour.resolve_variable("hp"), Some(num(3.0)));

    drop(owner);
    assert_eq!(behaviour.resolve_variable("hp"), None);
    assert_eq!(behaviour.parent(), None);
}
