use std::collections::VecDeque;
use std::mem;
use std::rc::Rc;
use std::task::Poll;

use log::trace;

use super::{done, expect, loop_escape, value, Action, Flow, Frame, Outcome};
use crate::lang::ast::{NodeRef, Parameter};
use crate::lang::error::{Error, ErrorKind, Result};
use crate::lang::eval::value::{Constant, ObjectRef};
use crate::lang::functions::{Context, NativeCall, NativeTask};
use crate::lang::object::{BehaviourDef, Class, Function, Members, ObjectInstance};
use crate::lang::scope::{ScopeKind, ScopeRef, UpdateTarget};

fn arity<S: Into<String>>(description: S) -> Error {
    Error::new(ErrorKind::Arity, description)
}

/// Bind `args` to `params` in `scope`. Returns the parameters left to their defaults.
fn bind_params(
    params: &[Parameter],
    args: Vec<Constant>,
    scope: &ScopeRef,
    what: &str,
) -> Result<VecDeque<(String, NodeRef)>> {
    if args.len() > params.len() {
        return Err(arity(format!(
            "{} expects at most {} arguments, got {}",
            what,
            params.len(),
            args.len()
        )));
    }

    let mut defaults = VecDeque::new();
    let mut args = args.into_iter();
    for param in params {
        match (args.next(), &param.default) {
            (Some(v), _) => scope.set_variable_in_own_scope(&param.name, v),
            (None, Some(d)) => defaults.push_back((param.name.clone(), d.clone())),
            (None, None) => {
                return Err(arity(format!(
                    "Missing argument '{}' for {}",
                    param.name, what
                )))
            }
        }
    }

    Ok(defaults)
}

enum Stage {
    Bind,
    Defaults,
    Ready,
    Running,
}

/// A call of a script or native function
pub(crate) struct Invoke {
    func: Rc<Function>,
    args: Vec<Constant>,
    parent: ScopeRef,
    scope: Option<ScopeRef>,
    defaults: VecDeque<(String, NodeRef)>,
    current: Option<String>,
    stage: Stage,
}

impl Invoke {
    pub(crate) fn new(func: Rc<Function>, args: Vec<Constant>, parent: ScopeRef) -> Self {
        Self {
            func,
            args,
            parent,
            scope: None,
            defaults: VecDeque::new(),
            current: None,
            stage: Stage::Bind,
        }
    }

    /// Run `func`'s body under `parent` without binding parameters
    pub(crate) fn body(func: Rc<Function>, parent: ScopeRef) -> Self {
        let scope = ScopeRef::new(ScopeKind::Function, &parent);
        Self {
            scope: Some(scope),
            stage: Stage::Ready,
            ..Self::new(func, Vec::new(), parent)
        }
    }

    fn scope(&self) -> Result<ScopeRef> {
        self.scope
            .clone()
            .ok_or_else(|| Error::runtime("Function scope was not created"))
    }

    fn next_default(&mut self) -> Result<Flow> {
        match self.defaults.pop_front() {
            Some((name, node)) => {
                self.current = Some(name);
                Ok(Flow::Push(Frame::node(&node, &self.scope()?)))
            }
            None => {
                self.stage = Stage::Ready;
                Ok(Flow::Yield)
            }
        }
    }

    pub(crate) fn resume(&mut self, incoming: Option<Outcome>) -> Result<Flow> {
        match self.stage {
            Stage::Bind => {
                trace!("Calling {:?}", self.func);
                let scope = ScopeRef::new(ScopeKind::Function, &self.parent);
                let what = format!("'{}'", self.func.qualified_name());
                self.defaults =
                    bind_params(&self.func.params, mem::take(&mut self.args), &scope, &what)?;
                self.scope = Some(scope);
                self.stage = Stage::Defaults;
                self.next_default()
            }
            Stage::Defaults => {
                let v = value(incoming)?;
                if let Some(name) = self.current.take() {
                    self.scope()?.set_variable_in_own_scope(&name, v);
                }
                self.next_default()
            }
            Stage::Ready => {
                self.stage = Stage::Running;
                let scope = self.scope()?;
                match &self.func.body {
                    Some(body) => Ok(Flow::Push(Frame::node(body, &scope))),
                    None => Ok(Flow::Push(Frame::Native(NativeFrame::new(
                        self.func.clone(),
                        scope,
                    )))),
                }
            }
            Stage::Running => match expect(incoming)? {
                Outcome::Value(v) if self.func.is_native() => Ok(done(v)),
                Outcome::Value(_) => Ok(done(Constant::None)),
                Outcome::Action(Action::Return(v)) => Ok(done(v)),
                Outcome::Action(_) => Err(loop_escape()),
            },
        }
    }
}

/// A host function, possibly still running
pub(crate) struct NativeFrame {
    func: Rc<Function>,
    scope: ScopeRef,
    task: Option<Box<dyn NativeTask>>,
}

impl NativeFrame {
    fn new(func: Rc<Function>, scope: ScopeRef) -> Self {
        Self {
            func,
            scope,
            task: None,
        }
    }

    pub(crate) fn resume(&mut self, ctx: &mut Context<'_>) -> Result<Flow> {
        if self.task.is_none() {
            let native = ctx
                .natives
                .get(self.func.owner.as_deref(), &self.func.name)
                .ok_or_else(|| {
                    Error::runtime(format!(
                        "Native function '{}' is not provided by the host",
                        self.func.qualified_name()
                    ))
                })?;

            match native.invoke(ctx, &self.scope)? {
                NativeCall::Done(v) => return Ok(done(v)),
                NativeCall::Pending(task) => self.task = Some(task),
            }
        }

        match self.task.as_mut() {
            Some(task) => match task.poll(ctx)? {
                Poll::Ready(v) => Ok(done(v)),
                Poll::Pending => Ok(Flow::Wait),
            },
            None => Err(Error::runtime("Native task vanished")),
        }
    }
}

enum Task {
    /// Parameter left to its default
    Default {
        scope: ScopeRef,
        name: String,
        node: NodeRef,
    },
    Property {
        scope: ScopeRef,
        name: String,
        default: Option<NodeRef>,
    },
    Behaviour {
        scope: ScopeRef,
        def: Rc<BehaviourDef>,
    },
    Body {
        ctor: Rc<Function>,
        scope: ScopeRef,
    },
    /// Suspension point between construction phases
    Phase,
    Register,
}

/// Builds a class instance or an attached behaviour
pub(crate) struct Construct {
    instance: ObjectRef,
    work: VecDeque<Task>,
    current: Option<Task>,
}

/// One object scope per level, most-derived first, each chained through its class wrapper
fn class_scopes(hierarchy: &[Rc<Class>]) -> Result<Vec<ScopeRef>> {
    let base = hierarchy
        .last()
        .ok_or_else(|| Error::runtime("Empty class hierarchy"))?;

    let mut parent = base.home.clone();
    let mut scopes = Vec::with_capacity(hierarchy.len());
    for class in hierarchy.iter().rev() {
        let wrapper = ScopeRef::wrapper(&class.shared_scope, &parent);
        let object = ScopeRef::new(ScopeKind::Object, &wrapper);
        object.set_functions(class.members.functions.clone());
        scopes.push(object.clone());
        parent = object;
    }
    scopes.reverse();

    Ok(scopes)
}

fn instantiate(
    type_name: &str,
    class: Option<Rc<Class>>,
    scopes: Vec<ScopeRef>,
) -> ObjectRef {
    let id = scopes[0].with_state(|g| g.next_object_id());
    let instance = Rc::new(ObjectInstance {
        id,
        type_name: type_name.to_string(),
        class,
        scopes,
        behaviours: Default::default(),
    });
    for scope in &instance.scopes {
        scope.set_instance(&instance);
    }
    trace!("Created {}", instance);

    instance
}

fn queue_properties(work: &mut VecDeque<Task>, members: &Members, scope: &ScopeRef) {
    for prop in &members.properties {
        work.push_back(Task::Property {
            scope: scope.clone(),
            name: prop.name.clone(),
            default: prop.default.clone(),
        });
    }
}

impl Construct {
    pub(crate) fn object(class: &Rc<Class>, args: Vec<Constant>) -> Result<Self> {
        let hierarchy = class.hierarchy();
        let scopes = class_scopes(&hierarchy)?;
        let mut work = VecDeque::new();

        // Every level with a constructor receives the arguments, checked against the most
        // derived one
        let levels: Vec<(&Rc<Class>, &ScopeRef)> = hierarchy.iter().zip(scopes.iter()).collect();
        let mut checked = false;
        for (level, scope) in &levels {
            let ctor = match &level.members.constructor {
                Some(c) => c,
                None => continue,
            };
            let what = format!("constructor of '{}'", level.name);
            let given = if checked {
                args.iter().take(ctor.params.len()).cloned().collect()
            } else {
                checked = true;
                args.clone()
            };
            for (name, node) in bind_params(&ctor.params, given, scope, &what)? {
                work.push_back(Task::Default {
                    scope: (*scope).clone(),
                    name,
                    node,
                });
            }
        }
        if !checked && !args.is_empty() {
            return Err(arity(format!(
                "Class '{}' has no constructor but was given {} arguments",
                class.name,
                args.len()
            )));
        }
        work.push_back(Task::Phase);

        for (level, scope) in &levels {
            queue_properties(&mut work, &level.members, scope);
        }
        work.push_back(Task::Phase);

        for (level, scope) in &levels {
            for (name, token) in &level.behaviours {
                let def = level.home.resolve_behaviour_def(name).ok_or_else(|| {
                    Error::undefined(format!("Unknown behaviour '{}'", name)).with_token(token)
                })?;
                work.push_back(Task::Behaviour {
                    scope: (*scope).clone(),
                    def,
                });
            }
        }
        work.push_back(Task::Phase);

        for (level, scope) in &levels {
            if let Some(ctor) = &level.members.constructor {
                work.push_back(Task::Body {
                    ctor: ctor.clone(),
                    scope: (*scope).clone(),
                });
            }
        }
        work.push_back(Task::Register);

        Ok(Self {
            instance: instantiate(&class.name, Some(class.clone()), scopes),
            work,
            current: None,
        })
    }

    /// Behaviour `def` attached to `owner`
    pub(crate) fn behaviour(def: &Rc<BehaviourDef>, owner: &ObjectRef) -> Result<Self> {
        let scope = ScopeRef::detached(ScopeKind::Object, owner.outer());
        scope.set_functions(def.members.functions.clone());
        let mut work = VecDeque::new();

        if let Some(ctor) = &def.members.constructor {
            let what = format!("constructor of behaviour '{}'", def.name);
            for (name, node) in bind_params(&ctor.params, Vec::new(), &scope, &what)? {
                work.push_back(Task::Default {
                    scope: scope.clone(),
                    name,
                    node,
                });
            }
        }
        queue_properties(&mut work, &def.members, &scope);
        work.push_back(Task::Phase);
        if let Some(ctor) = &def.members.constructor {
            work.push_back(Task::Body {
                ctor: ctor.clone(),
                scope: scope.clone(),
            });
        }

        Ok(Self {
            instance: instantiate(&def.name, None, vec![scope]),
            work,
            current: None,
        })
    }

    fn register(&self) {
        let class = match &self.instance.class {
            Some(c) => c,
            None => return,
        };
        let behaviour_update = self
            .instance
            .behaviours
            .borrow()
            .iter()
            .any(|b| b.outer().own_function("update").is_some());

        if class.has_instance_update() || behaviour_update {
            let order = class.effective_update_order();
            trace!("Registering {} for {} updates", self.instance, order);
            self.instance.outer().with_state(|g| {
                g.registry(order)
                    .push(UpdateTarget::Object(self.instance.clone()))
            });
        }
    }

    pub(crate) fn resume(&mut self, incoming: Option<Outcome>) -> Result<Flow> {
        if let Some(outcome) = incoming {
            match self.current.take() {
                Some(Task::Default { scope, name, .. }) | Some(Task::Property { scope, name, .. }) => {
                    scope.set_variable_in_own_scope(&name, value(Some(outcome))?)
                }
                Some(Task::Behaviour { scope, .. }) => match value(Some(outcome))? {
                    Constant::Object(b) => {
                        scope.attach(b.clone());
                        self.instance.behaviours.borrow_mut().push(b);
                    }
                    v => {
                        return Err(Error::runtime(format!(
                            "Behaviour construction produced {}",
                            v.short_display()
                        )))
                    }
                },
                _ => (),
            }
        }

        while let Some(task) = self.work.pop_front() {
            let frame = match &task {
                Task::Default { scope, node, .. } => Frame::node(node, scope),
                Task::Property {
                    scope,
                    name,
                    default,
                } => {
                    if scope.has_own_variable(name) {
                        continue;
                    }
                    match default {
                        Some(d) => Frame::node(d, scope),
                        None => {
                            scope.set_variable_in_own_scope(name, Constant::None);
                            continue;
                        }
                    }
                }
                Task::Behaviour { def, .. } => {
                    Frame::Construct(Construct::behaviour(def, &self.instance)?)
                }
                Task::Body { ctor, scope } => {
                    Frame::Invoke(Invoke::body(ctor.clone(), scope.clone()))
                }
                Task::Phase => return Ok(Flow::Yield),
                Task::Register => {
                    self.register();
                    continue;
                }
            };

            self.current = Some(task);
            return Ok(Flow::Push(frame));
        }

        Ok(done(Constant::Object(self.instance.clone())))
    }
}
