use std::cell::Cell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::task::Poll;

use crate::lang::error::{Error, Result};
use crate::lang::eval::value::Constant;
use crate::lang::scope::ScopeRef;

/// Host implementation of a `native function`
///
/// Invoked with the scope the call's arguments were bound in. Returning
/// `NativeCall::Pending` hands back a task the interpreter polls on every tick.
pub trait NativeFunction {
    fn invoke(&self, ctx: &mut Context<'_>, scope: &ScopeRef) -> Result<NativeCall>;
}

impl<F> NativeFunction for F
where
    F: Fn(&mut Context<'_>, &ScopeRef) -> Result<NativeCall>,
{
    fn invoke(&self, ctx: &mut Context<'_>, scope: &ScopeRef) -> Result<NativeCall> {
        self(ctx, scope)
    }
}

/// Native work that has not completed yet
pub trait NativeTask {
    fn poll(&mut self, ctx: &mut Context<'_>) -> Result<Poll<Constant>>;
}

impl<F> NativeTask for F
where
    F: FnMut(&mut Context<'_>) -> Result<Poll<Constant>>,
{
    fn poll(&mut self, ctx: &mut Context<'_>) -> Result<Poll<Constant>> {
        self(ctx)
    }
}

pub enum NativeCall {
    Done(Constant),
    Pending(Box<dyn NativeTask>),
}

impl NativeCall {
    pub fn pending<F>(task: F) -> NativeCall
    where
        F: FnMut(&mut Context<'_>) -> Result<Poll<Constant>> + 'static,
    {
        NativeCall::Pending(Box::new(task))
    }

    /// Finish with `f` once `completion` has been signalled
    pub fn after<F>(completion: Completion, f: F) -> NativeCall
    where
        F: FnOnce(&mut Context<'_>) -> Result<Constant> + 'static,
    {
        let mut f = Some(f);
        NativeCall::pending(move |ctx| {
            if !completion.is_complete() {
                return Ok(Poll::Pending);
            }
            match f.take() {
                Some(f) => f(ctx).map(Poll::Ready),
                None => Err(Error::runtime("native task polled after completion")),
            }
        })
    }
}

/// Shared one-shot flag a host sets when asynchronous native work is done
#[derive(Clone, Debug, Default)]
pub struct Completion(Rc<Cell<bool>>);

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        self.0.set(true);
    }

    pub fn is_complete(&self) -> bool {
        self.0.get()
    }
}

/// Host implementations of native functions, keyed by owning type (empty for file-level
/// natives) and name
#[derive(Default, Clone)]
pub struct Natives {
    table: HashMap<(String, String), Rc<dyn NativeFunction>>,
}

impl Natives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, owner: Option<&str>, name: &str, f: F)
    where
        F: Fn(&mut Context<'_>, &ScopeRef) -> Result<NativeCall> + 'static,
    {
        let key = (owner.unwrap_or("").to_string(), name.to_string());
        self.table.insert(key, Rc::new(f));
    }

    pub fn get(&self, owner: Option<&str>, name: &str) -> Option<Rc<dyn NativeFunction>> {
        self.table
            .get(&(owner.unwrap_or("").to_string(), name.to_string()))
            .cloned()
    }
}

/// Host state passed to every native invocation and into the interpreter
pub struct Context<'a> {
    pub natives: Natives,
    /// Where script output goes
    pub sink: &'a mut dyn Write,
    /// Number of completed frames
    pub frame: u64,
}

impl<'a> Context<'a> {
    pub fn new(natives: Natives, sink: &'a mut dyn Write) -> Self {
        Self {
            natives,
            sink,
            frame: 0,
        }
    }
}

/// Value bound to parameter `name` of the running native
pub fn arg(scope: &ScopeRef, name: &str) -> Result<Constant> {
    scope
        .resolve_variable(name)
        .ok_or_else(|| Error::undefined(format!("Missing argument '{}'", name)))
}

#[test]
fn test_natives_table() {
    let mut natives = Natives::new();
    natives.register(None, "answer", |_, _| Ok(NativeCall::Done(Constant::Number(42.0))));
    natives.register(Some("Math"), "answer", |_, _| {
        Ok(NativeCall::Done(Constant::Number(7.0)))
    });

    let mut out = Vec::new();
    let mut ctx = Context::new(natives.clone(), &mut out);
    let scope = ScopeRef::global();

    let call = |ctx: &mut Context<'_>, owner| match natives.get(owner, "answer") {
        Some(f) => match f.invoke(ctx, &scope).unwrap() {
            NativeCall::Done(v) => v,
            NativeCall::Pending(_) => panic!("should complete at once"),
        },
        None => panic!("missing native"),
    };
    assert_eq!(call(&mut ctx, None), Constant::Number(42.0));
    assert_eq!(call(&mut ctx, Some("Math")), Constant::Number(7.0));
    assert!(natives.get(Some("Other"), "answer").is_none());
}

#[test]
fn test_after_completion() {
    let done = Completion::new();
    let mut task = match NativeCall::after(done.clone(), |_| Ok(Constant::Boolean(true))) {
        NativeCall::Pending(task) => task,
        NativeCall::Done(_) => panic!("should be pending"),
    };

    let mut out = Vec::new();
    let mut ctx = Context::new(Natives::new(), &mut out);
    assert_eq!(task.poll(&mut ctx).unwrap(), Poll::Pending);
    assert_eq!(task.poll(&mut ctx).unwrap(), Poll::Pending);
    done.complete();
    assert_eq!(task.poll(&mut ctx).unwrap(), Poll::Ready(Constant::Boolean(true)));
}
