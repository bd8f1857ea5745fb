//! Resumable evaluator.
//!
//! Evaluation state lives in an explicit stack of frames rather than on the Rust call stack,
//! so an execution can be suspended at any statement boundary and resumed later. A frame
//! is resumed with the outcome of the child it last pushed (if any) and answers with a
//! `Flow`: push another child, finish with an outcome, or hand control back to the
//! scheduler (`Yield` to let siblings run, `Wait` when blocked on a frame boundary or a
//! native task).

use std::cell::Cell;
use std::collections::VecDeque;
use std::mem;
use std::rc::Rc;

use crate::lang::ast::{BinaryOp, NodeKind, NodeRef};
use crate::lang::error::{Error, Result};
use crate::lang::functions::Context;
use crate::lang::object::{Class, Function};
use crate::lang::scope::{ScopeKind, ScopeRef, UpdateTarget};

pub mod arith;
mod call;
pub mod value;

use call::{Construct, Invoke, NativeFrame};
use value::Constant;

/// Frames deeper than this abort the execution
const MAX_DEPTH: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Return(Constant),
    Break,
    Continue,
}

/// What a finished frame hands to its parent
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Constant),
    Action(Action),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Reached a suspension point, more work remains
    Suspended,
    /// Blocked until a frame ends or a native task completes
    Waiting,
    Finished(Constant),
}

pub(crate) enum Flow {
    Push(Frame),
    Done(Outcome),
    Yield,
    Wait,
}

fn done(value: Constant) -> Flow {
    Flow::Done(Outcome::Value(value))
}

fn expect(incoming: Option<Outcome>) -> Result<Outcome> {
    incoming.ok_or_else(|| Error::runtime("Evaluation resumed without a result"))
}

/// Unwrap the value of an expression child
fn value(incoming: Option<Outcome>) -> Result<Constant> {
    match expect(incoming)? {
        Outcome::Value(v) => Ok(v),
        Outcome::Action(_) => Err(Error::runtime("Control flow statement used as a value")),
    }
}

fn loop_escape() -> Error {
    Error::runtime("'break' or 'continue' outside of a loop")
}

/// Scope a call of `func`, found in `found`, runs under
pub(crate) fn call_parent(func: &Function, found: &ScopeRef) -> ScopeRef {
    func.home.clone().unwrap_or_else(|| found.clone())
}

pub(crate) enum Frame {
    Node(NodeFrame),
    Program(ProgramFrame),
    Invoke(Invoke),
    Native(NativeFrame),
    Construct(Construct),
}

impl Frame {
    pub(crate) fn node(node: &NodeRef, scope: &ScopeRef) -> Frame {
        match &node.kind {
            NodeKind::Program { files, classes } => {
                Frame::Program(ProgramFrame::new(files, classes, scope))
            }
            _ => Frame::Node(NodeFrame {
                node: node.clone(),
                scope: scope.clone(),
                stage: 0,
                values: Vec::new(),
                target: None,
                waiting: None,
            }),
        }
    }

    fn resume(&mut self, ctx: &mut Context<'_>, incoming: Option<Outcome>) -> Result<Flow> {
        match self {
            Frame::Node(f) => f.resume(incoming),
            Frame::Program(f) => f.resume(incoming),
            Frame::Invoke(f) => f.resume(incoming),
            Frame::Native(f) => f.resume(ctx),
            Frame::Construct(f) => f.resume(incoming),
        }
    }
}

/// One execution's frame stack
pub struct Machine {
    frames: Vec<Frame>,
    incoming: Option<Outcome>,
    result: Option<Constant>,
}

impl Machine {
    fn new(root: Frame) -> Self {
        Self {
            frames: vec![root],
            incoming: None,
            result: None,
        }
    }

    /// Evaluate `node` in `scope`
    pub fn eval(node: &NodeRef, scope: &ScopeRef) -> Self {
        Self::new(Frame::node(node, scope))
    }

    /// Call `func` with `args` in a fresh scope under `parent`
    pub fn call(func: &Rc<Function>, args: Vec<Constant>, parent: &ScopeRef) -> Self {
        Self::new(Frame::Invoke(Invoke::new(func.clone(), args, parent.clone())))
    }

    /// Attach the innermost node being evaluated to `e`
    fn locate(&self, e: Error) -> Error {
        let node = self.frames.iter().rev().find_map(|f| match f {
            Frame::Node(n) => Some(n.node.clone()),
            _ => None,
        });
        match node {
            Some(node) => e.at(&node),
            None => e,
        }
    }

    /// Run until the next suspension point
    pub fn step(&mut self, ctx: &mut Context<'_>) -> Result<Status> {
        loop {
            let incoming = self.incoming.take();
            let frame = match self.frames.last_mut() {
                Some(f) => f,
                None => {
                    return Ok(Status::Finished(
                        self.result.clone().unwrap_or(Constant::None),
                    ))
                }
            };

            let flow = match frame.resume(ctx, incoming) {
                Ok(flow) => flow,
                Err(e) => return Err(self.locate(e)),
            };
            match flow {
                Flow::Push(child) => {
                    if self.frames.len() >= MAX_DEPTH {
                        return Err(self.locate(Error::runtime("Stack overflow")));
                    }
                    self.frames.push(child);
                }
                Flow::Done(outcome) => {
                    self.frames.pop();
                    if self.frames.is_empty() {
                        let result = match outcome {
                            Outcome::Value(v) | Outcome::Action(Action::Return(v)) => v,
                            Outcome::Action(_) => return Err(loop_escape()),
                        };
                        self.result = Some(result.clone());
                        return Ok(Status::Finished(result));
                    }
                    self.incoming = Some(outcome);
                }
                Flow::Yield => return Ok(Status::Suspended),
                Flow::Wait => return Ok(Status::Waiting),
            }
        }
    }
}

pub(crate) struct NodeFrame {
    node: NodeRef,
    scope: ScopeRef,
    stage: usize,
    /// Evaluated operands and arguments
    values: Vec<Constant>,
    /// Scope a member access, member assignment or `for` loop works in
    target: Option<ScopeRef>,
    waiting: Option<Rc<Cell<bool>>>,
}

impl NodeFrame {
    fn child(&self, node: &NodeRef) -> Flow {
        Flow::Push(Frame::node(node, &self.scope))
    }

    /// Push the next argument still to be evaluated in `scope`, if any
    fn next_arg(&self, args: &[NodeRef], scope: &ScopeRef) -> Option<Flow> {
        args.get(self.values.len())
            .map(|a| Flow::Push(Frame::node(a, scope)))
    }

    fn target(&self) -> Result<ScopeRef> {
        self.target
            .clone()
            .ok_or_else(|| Error::runtime("Member target was not resolved"))
    }

    fn resume(&mut self, incoming: Option<Outcome>) -> Result<Flow> {
        let node = self.node.clone();
        match &node.kind {
            NodeKind::Literal(Constant::Variable(name)) => self.variable(name).map(done),
            NodeKind::Literal(c) => Ok(done(c.clone())),
            NodeKind::TypeRef(name) => self.type_value(name).map(done),
            NodeKind::Unary { op, operand } => match incoming {
                None => Ok(self.child(operand)),
                i => Ok(done(arith::unary(*op, &value(i)?)?)),
            },
            NodeKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, incoming),
            NodeKind::Member { target, member } => self.member(target, member, incoming),
            NodeKind::Call { name, args } => self.call(name, args, incoming),
            NodeKind::New { class, args } => self.construct(class, args, incoming),
            NodeKind::Block(stmts) | NodeKind::File { body: stmts, .. } => {
                self.block(stmts, incoming)
            }
            NodeKind::Assign { target, value } => self.assign(target, value, incoming),
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.branch(cond, then_branch, else_branch.as_ref(), incoming),
            NodeKind::While { cond, body } => self.while_loop(cond, body, incoming),
            NodeKind::Repeat { body, cond } => self.repeat_loop(body, cond, incoming),
            NodeKind::For {
                var,
                from,
                to,
                step,
                body,
            } => self.for_loop(var, from, to, step.as_ref(), body, incoming),
            NodeKind::Return(value_node) => match (value_node, incoming) {
                (None, _) => Ok(Flow::Done(Outcome::Action(Action::Return(Constant::None)))),
                (Some(v), None) => Ok(self.child(v)),
                (Some(_), i) => Ok(Flow::Done(Outcome::Action(Action::Return(value(i)?)))),
            },
            NodeKind::Break => Ok(Flow::Done(Outcome::Action(Action::Break))),
            NodeKind::Continue => Ok(Flow::Done(Outcome::Action(Action::Continue))),
            NodeKind::WaitForUpdate => self.wait_for_update(),
            // Registered before evaluation starts
            NodeKind::Class { .. }
            | NodeKind::Behaviour { .. }
            | NodeKind::Function { .. }
            | NodeKind::Constructor { .. }
            | NodeKind::Property { .. }
            | NodeKind::HasBehaviour(_)
            | NodeKind::Contract(..)
            | NodeKind::UpdateOrder(_) => Ok(done(Constant::None)),
            NodeKind::Program { .. } => Err(Error::runtime("Program evaluated as a statement")),
        }
    }

    fn variable(&self, name: &str) -> Result<Constant> {
        if let Some(v) = self.scope.resolve_variable(name) {
            return Ok(v);
        }
        if name == "self" {
            if let Some(instance) = self.scope.resolve_instance() {
                return Ok(Constant::Object(instance));
            }
        }

        Err(Error::undefined(format!("Unknown variable '{}'", name)))
    }

    fn type_value(&self, name: &str) -> Result<Constant> {
        if let Some(behaviour) = self.scope.resolve_attached(name) {
            return Ok(Constant::Object(behaviour));
        }
        if self.scope.resolve_class(name).is_some() {
            return Err(Error::type_mismatch(format!(
                "Class '{}' is not a value, use 'new {}' or access its members",
                name, name
            )));
        }

        Err(Error::undefined(format!("Unknown name '{}'", name)))
    }

    /// Scope `Name.member` resolves against: an attached behaviour, else a class's shared state
    fn type_scope(&self, name: &str) -> Result<ScopeRef> {
        if let Some(behaviour) = self.scope.resolve_attached(name) {
            return Ok(behaviour.outer().clone());
        }
        if let Some(class) = self.scope.resolve_class(name) {
            return Ok(class.shared_scope.clone());
        }
        if self.scope.resolve_behaviour_def(name).is_some() {
            return Err(Error::undefined(format!(
                "Behaviour '{}' is not attached here",
                name
            )));
        }

        Err(Error::undefined(format!("Unknown type '{}'", name)))
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &NodeRef,
        rhs: &NodeRef,
        incoming: Option<Outcome>,
    ) -> Result<Flow> {
        if incoming.is_some() {
            self.values.push(value(incoming)?);
        }

        match self.values.len() {
            0 => Ok(self.child(lhs)),
            1 => Ok(self.child(rhs)),
            _ if self.stage == 0 => {
                self.stage = 1;
                Ok(Flow::Yield)
            }
            _ => Ok(done(arith::binary(op, &self.values[0], &self.values[1])?)),
        }
    }

    fn member(
        &mut self,
        target: &NodeRef,
        member: &NodeRef,
        mut incoming: Option<Outcome>,
    ) -> Result<Flow> {
        loop {
            match self.stage {
                0 => {
                    if let NodeKind::TypeRef(name) = &target.kind {
                        self.target = Some(self.type_scope(name)?);
                        self.stage = 2;
                    } else {
                        self.stage = 1;
                        return Ok(self.child(target));
                    }
                }
                1 => {
                    let object = value(incoming.take())?;
                    self.target = Some(object_scope(&object)?);
                    self.stage = 2;
                }
                _ => return self.access(member, incoming.take()),
            }
        }
    }

    fn access(&mut self, member: &NodeRef, incoming: Option<Outcome>) -> Result<Flow> {
        let target = self.target()?;
        match &member.kind {
            NodeKind::Literal(Constant::Variable(name)) => target
                .resolve_member_variable(name)
                .map(done)
                .ok_or_else(|| Error::undefined(format!("Unknown property '{}'", name))),
            NodeKind::TypeRef(name) => target
                .resolve_attached(name)
                .map(|b| done(Constant::Object(b)))
                .ok_or_else(|| {
                    Error::undefined(format!("Behaviour '{}' is not attached", name))
                }),
            NodeKind::Call { name, args } => {
                match (self.stage, incoming) {
                    (2, Some(o)) => self.values.push(value(Some(o))?),
                    (_, Some(o)) => return Ok(Flow::Done(o)),
                    _ => (),
                }
                // Arguments belong to the caller
                if let Some(flow) = self.next_arg(args, &self.scope) {
                    return Ok(flow);
                }

                let (func, found) = target
                    .resolve_member_function(name)
                    .ok_or_else(|| Error::undefined(format!("Unknown function '{}'", name)))?;
                self.stage = 3;
                let args = mem::take(&mut self.values);
                Ok(Flow::Push(Frame::Invoke(Invoke::new(
                    func.clone(),
                    args,
                    call_parent(&func, &found),
                ))))
            }
            _ => Err(Error::runtime(format!(
                "Invalid member {}",
                member.kind.name()
            ))),
        }
    }

    fn call(&mut self, name: &str, args: &[NodeRef], incoming: Option<Outcome>) -> Result<Flow> {
        match (self.stage, incoming) {
            (0, Some(o)) => self.values.push(value(Some(o))?),
            (_, Some(o)) => return Ok(Flow::Done(o)),
            _ => (),
        }
        if let Some(flow) = self.next_arg(args, &self.scope) {
            return Ok(flow);
        }

        let (func, found) = self
            .scope
            .resolve_function(name)
            .ok_or_else(|| Error::undefined(format!("Unknown function '{}'", name)))?;
        self.stage = 1;
        let args = mem::take(&mut self.values);
        Ok(Flow::Push(Frame::Invoke(Invoke::new(
            func.clone(),
            args,
            call_parent(&func, &found),
        ))))
    }

    fn construct(
        &mut self,
        class_name: &str,
        args: &[NodeRef],
        incoming: Option<Outcome>,
    ) -> Result<Flow> {
        match (self.stage, incoming) {
            (0, Some(o)) => self.values.push(value(Some(o))?),
            (_, Some(o)) => return Ok(Flow::Done(o)),
            _ => (),
        }
        if let Some(flow) = self.next_arg(args, &self.scope) {
            return Ok(flow);
        }

        let class = match self.scope.resolve_class(class_name) {
            Some(c) => c,
            None if self.scope.resolve_behaviour_def(class_name).is_some() => {
                return Err(Error::type_mismatch(format!(
                    "Behaviour '{}' cannot be created with 'new'",
                    class_name
                )))
            }
            None => return Err(Error::undefined(format!("Unknown class '{}'", class_name))),
        };
        self.stage = 1;
        let args = mem::take(&mut self.values);
        Ok(Flow::Push(Frame::Construct(Construct::object(&class, args)?)))
    }

    fn block(&mut self, stmts: &[NodeRef], incoming: Option<Outcome>) -> Result<Flow> {
        match incoming {
            Some(outcome @ Outcome::Action(_)) => return Ok(Flow::Done(outcome)),
            Some(Outcome::Value(v)) => {
                // Keep the last statement's value, the REPL echoes it
                self.values = vec![v];
                self.stage += 1;
                return Ok(Flow::Yield);
            }
            None => (),
        }

        match stmts.get(self.stage) {
            Some(stmt) => Ok(self.child(stmt)),
            None => Ok(done(self.values.pop().unwrap_or(Constant::None))),
        }
    }

    fn assign(
        &mut self,
        target: &NodeRef,
        value_node: &NodeRef,
        mut incoming: Option<Outcome>,
    ) -> Result<Flow> {
        loop {
            match self.stage {
                0 => match &target.kind {
                    NodeKind::Member { target: object, .. } => match &object.kind {
                        NodeKind::TypeRef(name) => {
                            self.target = Some(self.type_scope(name)?);
                            self.stage = 2;
                        }
                        _ => {
                            self.stage = 1;
                            return Ok(self.child(object));
                        }
                    },
                    _ => self.stage = 2,
                },
                1 => {
                    let object = value(incoming.take())?;
                    self.target = Some(object_scope(&object)?);
                    self.stage = 2;
                }
                2 => {
                    self.stage = 3;
                    return Ok(self.child(value_node));
                }
                _ => {
                    let v = value(incoming.take())?;
                    match &target.kind {
                        NodeKind::Literal(Constant::Variable(name)) => {
                            self.scope.set_variable(name, v)
                        }
                        NodeKind::Member { member, .. } => match &member.kind {
                            NodeKind::Literal(Constant::Variable(name)) => {
                                self.target()?.set_member_variable(name, v)
                            }
                            _ => return Err(Error::runtime("Invalid assignment target")),
                        },
                        _ => return Err(Error::runtime("Invalid assignment target")),
                    }
                    return Ok(done(Constant::None));
                }
            }
        }
    }

    fn branch(
        &mut self,
        cond: &NodeRef,
        then_branch: &NodeRef,
        else_branch: Option<&NodeRef>,
        incoming: Option<Outcome>,
    ) -> Result<Flow> {
        match self.stage {
            0 => {
                self.stage = 1;
                Ok(self.child(cond))
            }
            1 => {
                self.stage = 2;
                if value(incoming)?.truthy() {
                    Ok(self.child(then_branch))
                } else {
                    match else_branch {
                        Some(e) => Ok(self.child(e)),
                        None => Ok(done(Constant::None)),
                    }
                }
            }
            _ => Ok(Flow::Done(expect(incoming)?)),
        }
    }

    fn while_loop(
        &mut self,
        cond: &NodeRef,
        body: &NodeRef,
        incoming: Option<Outcome>,
    ) -> Result<Flow> {
        match self.stage {
            0 => {
                self.stage = 1;
                Ok(self.child(cond))
            }
            1 => {
                if !value(incoming)?.truthy() {
                    return Ok(done(Constant::None));
                }
                self.stage = 2;
                Ok(self.child(body))
            }
            _ => match expect(incoming)? {
                Outcome::Action(Action::Break) => Ok(done(Constant::None)),
                ret @ Outcome::Action(Action::Return(_)) => Ok(Flow::Done(ret)),
                _ => {
                    self.stage = 0;
                    Ok(Flow::Yield)
                }
            },
        }
    }

    fn repeat_loop(
        &mut self,
        body: &NodeRef,
        cond: &NodeRef,
        incoming: Option<Outcome>,
    ) -> Result<Flow> {
        match self.stage {
            0 => {
                self.stage = 1;
                Ok(self.child(body))
            }
            1 => match expect(incoming)? {
                Outcome::Action(Action::Break) => Ok(done(Constant::None)),
                ret @ Outcome::Action(Action::Return(_)) => Ok(Flow::Done(ret)),
                _ => {
                    self.stage = 2;
                    Ok(self.child(cond))
                }
            },
            _ => {
                if value(incoming)?.truthy() {
                    return Ok(done(Constant::None));
                }
                self.stage = 0;
                Ok(Flow::Yield)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn for_loop(
        &mut self,
        var: &str,
        from: &NodeRef,
        to: &NodeRef,
        step: Option<&NodeRef>,
        body: &NodeRef,
        mut incoming: Option<Outcome>,
    ) -> Result<Flow> {
        loop {
            match self.stage {
                0 => {
                    self.target = Some(ScopeRef::new(ScopeKind::Generic, &self.scope));
                    self.stage = 1;
                    return Ok(self.child(from));
                }
                1 => {
                    let start = value(incoming.take())?;
                    start.as_number()?;
                    self.target()?.set_variable_in_own_scope(var, start);
                    self.stage = 2;
                }
                // Bound and step are re-evaluated on every iteration
                2 => {
                    self.stage = 3;
                    return Ok(Flow::Push(Frame::node(to, &self.target()?)));
                }
                3 => {
                    let limit = value(incoming.take())?;
                    limit.as_number()?;
                    self.values = vec![limit];
                    match step {
                        Some(s) => {
                            self.stage = 4;
                            return Ok(Flow::Push(Frame::node(s, &self.target()?)));
                        }
                        None => {
                            self.values.push(Constant::Number(1.0));
                            self.stage = 5;
                        }
                    }
                }
                4 => {
                    let s = value(incoming.take())?;
                    self.values.push(s);
                    self.stage = 5;
                }
                5 => {
                    let limit = self.values[0].as_number()?;
                    let step = self.values[1].as_number()?;
                    if step == 0.0 {
                        return Err(Error::runtime("Step of a for loop cannot be zero"));
                    }

                    let scope = self.target()?;
                    let i = scope
                        .resolve_variable(var)
                        .unwrap_or(Constant::None)
                        .as_number()?;
                    let more = if step >= 0.0 { i <= limit } else { i >= limit };
                    if !more {
                        return Ok(done(Constant::None));
                    }
                    self.stage = 6;
                    return Ok(Flow::Push(Frame::node(body, &scope)));
                }
                _ => match expect(incoming.take())? {
                    Outcome::Action(Action::Break) => return Ok(done(Constant::None)),
                    ret @ Outcome::Action(Action::Return(_)) => return Ok(Flow::Done(ret)),
                    _ => {
                        let step = self.values[1].as_number()?;
                        let scope = self.target()?;
                        let i = scope
                            .resolve_variable(var)
                            .unwrap_or(Constant::None)
                            .as_number()?;
                        scope.set_variable_in_own_scope(var, Constant::Number(i + step));
                        self.values.clear();
                        self.stage = 2;
                        return Ok(Flow::Yield);
                    }
                },
            }
        }
    }

    fn wait_for_update(&mut self) -> Result<Flow> {
        match &self.waiting {
            None => {
                let flag = Rc::new(Cell::new(false));
                self.scope.with_state(|g| g.waiters.push(flag.clone()));
                self.waiting = Some(flag);
                Ok(Flow::Wait)
            }
            Some(flag) if flag.get() => Ok(done(Constant::None)),
            Some(_) => Ok(Flow::Wait),
        }
    }
}

fn object_scope(value: &Constant) -> Result<ScopeRef> {
    match value {
        Constant::Object(o) => Ok(o.outer().clone()),
        v => Err(Error::type_mismatch(format!(
            "Cannot access members of {}",
            v.short_display()
        ))),
    }
}

enum Init {
    SharedProperty {
        class: Rc<Class>,
        name: String,
        default: Option<NodeRef>,
    },
    SharedConstructor(Rc<Class>),
    RegisterUpdate(Rc<Class>),
    File(NodeRef),
}

/// Static initialization of a compiled unit followed by its file bodies
pub(crate) struct ProgramFrame {
    global: ScopeRef,
    work: VecDeque<Init>,
    current: Option<Init>,
    last: Constant,
}

impl ProgramFrame {
    fn new(files: &[NodeRef], classes: &[Rc<Class>], scope: &ScopeRef) -> Self {
        let mut work = VecDeque::new();

        for class in classes {
            for prop in &class.shared_properties {
                work.push_back(Init::SharedProperty {
                    class: class.clone(),
                    name: prop.name.clone(),
                    default: prop.default.clone(),
                });
            }
        }
        for class in classes {
            if class.shared_constructor.is_some() {
                work.push_back(Init::SharedConstructor(class.clone()));
            }
        }
        for class in classes {
            work.push_back(Init::RegisterUpdate(class.clone()));
        }
        for file in files {
            work.push_back(Init::File(file.clone()));
        }

        Self {
            global: scope.root(),
            work,
            current: None,
            last: Constant::None,
        }
    }

    fn resume(&mut self, incoming: Option<Outcome>) -> Result<Flow> {
        if let Some(outcome) = incoming {
            let v = match outcome {
                Outcome::Value(v) | Outcome::Action(Action::Return(v)) => v,
                Outcome::Action(_) => return Err(loop_escape()),
            };
            match self.current.take() {
                Some(Init::SharedProperty { class, name, .. }) => {
                    class.shared_scope.set_variable_in_own_scope(&name, v)
                }
                Some(Init::File(_)) => self.last = v,
                _ => (),
            }
            return Ok(Flow::Yield);
        }

        while let Some(init) = self.work.pop_front() {
            let frame = match &init {
                Init::SharedProperty {
                    class,
                    name,
                    default,
                } => {
                    if class.shared_scope.has_own_variable(name) {
                        continue;
                    }
                    match default {
                        Some(d) => Frame::node(d, &class.shared_scope),
                        None => {
                            class
                                .shared_scope
                                .set_variable_in_own_scope(name, Constant::None);
                            continue;
                        }
                    }
                }
                Init::SharedConstructor(class) => match &class.shared_constructor {
                    Some(ctor) => Frame::Invoke(Invoke::new(
                        ctor.clone(),
                        Vec::new(),
                        class.shared_scope.clone(),
                    )),
                    None => continue,
                },
                Init::RegisterUpdate(class) => {
                    if class.shared_scope.own_function("update").is_some() {
                        let order = class.effective_update_order();
                        self.global
                            .with_state(|g| g.registry(order).push(UpdateTarget::Class(class.clone())));
                    }
                    continue;
                }
                Init::File(file) => {
                    let name = match &file.kind {
                        NodeKind::File { name, .. } => name.as_str(),
                        _ => return Err(Error::runtime("Program contains a non-file node")),
                    };
                    Frame::node(file, &self.global.file_scope(name))
                }
            };

            self.current = Some(init);
            return Ok(Flow::Push(frame));
        }

        Ok(done(mem::replace(&mut self.last, Constant::None)))
    }
}
