use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::lang::error::{Error, Result};
use crate::lang::eval::value::Constant;
use crate::lang::eval::{Machine, Status};
use crate::lang::functions::Context;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpreterConfig {
    /// How long one batch may keep ticking
    pub time_budget: Duration,
    /// Sleep between batches in `Interpreter::run`
    pub pause: Duration,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_millis(10),
            pause: Duration::from_millis(1),
        }
    }
}

/// One running program or thread
pub struct Execution {
    id: usize,
    name: String,
    machine: Machine,
}

impl Execution {
    pub fn new(id: usize, name: &str, machine: Machine) -> Self {
        Self {
            id,
            name: name.to_string(),
            machine,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run to the next suspension point
    pub fn step(&mut self, ctx: &mut Context<'_>) -> Result<Status> {
        self.machine.step(ctx)
    }

    /// Step until finished. Fails if the execution blocks on something only a host can
    /// complete.
    pub fn run_to_completion(&mut self, ctx: &mut Context<'_>) -> Result<Constant> {
        loop {
            match self.step(ctx)? {
                Status::Finished(v) => return Ok(v),
                Status::Suspended => (),
                Status::Waiting => {
                    return Err(Error::runtime(format!(
                        "'{}' cannot wait for a frame or a resource here",
                        self.name
                    )))
                }
            }
        }
    }
}

/// An execution that terminated with an error
#[derive(Debug, Clone)]
pub struct Failure {
    pub id: usize,
    pub name: String,
    pub error: Error,
}

/// Steps every live execution once per tick, in spawn order. Nothing is preempted.
pub struct Interpreter {
    config: InterpreterConfig,
    executions: Vec<Execution>,
    next_id: usize,
    results: HashMap<usize, Constant>,
    failures: Vec<Failure>,
    stopped: bool,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self {
            config,
            executions: Vec::new(),
            next_id: 0,
            results: HashMap::new(),
            failures: Vec::new(),
            stopped: false,
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Schedule `machine` after every live execution. Returns the execution id.
    pub fn spawn(&mut self, name: &str, machine: Machine) -> usize {
        self.next_id += 1;
        let id = self.next_id;
        debug!("Spawning execution {} ({})", id, name);
        self.executions.push(Execution::new(id, name, machine));
        self.stopped = false;
        id
    }

    /// Number of executions still running
    pub fn live(&self) -> usize {
        self.executions.len()
    }

    pub fn stop(&mut self) {
        debug!("Interpreter stopped with {} live executions", self.live());
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped || self.executions.is_empty()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<Failure> {
        std::mem::take(&mut self.failures)
    }

    /// Value the execution `id` finished with
    pub fn result(&self, id: usize) -> Option<&Constant> {
        self.results.get(&id)
    }

    /// Step every live execution once. Returns false if none of them could make progress.
    pub fn tick(&mut self, ctx: &mut Context<'_>) -> bool {
        let mut progressed = false;
        let mut i = 0;

        while i < self.executions.len() {
            let exec = &mut self.executions[i];
            match exec.step(ctx) {
                Ok(Status::Suspended) => {
                    progressed = true;
                    i += 1;
                }
                Ok(Status::Waiting) => i += 1,
                Ok(Status::Finished(v)) => {
                    trace!("Execution {} finished with {}", exec.id(), v);
                    self.results.insert(exec.id(), v);
                    self.executions.remove(i);
                    progressed = true;
                }
                Err(error) => {
                    warn!("Execution {} ({}) failed: {}", exec.id(), exec.name(), error);
                    self.failures.push(Failure {
                        id: exec.id(),
                        name: exec.name().to_string(),
                        error,
                    });
                    self.executions.remove(i);
                    progressed = true;
                }
            }
        }

        progressed
    }

    /// Tick until the time budget is spent, everything has finished or every execution is
    /// blocked
    pub fn run_batch(&mut self, ctx: &mut Context<'_>) {
        let start = Instant::now();

        while !self.is_stopped() {
            if !self.tick(ctx) {
                break;
            }
            if start.elapsed() >= self.config.time_budget {
                break;
            }
        }
    }

    /// Alternate batches with `host` and a short pause until stopped
    pub fn run<F>(&mut self, ctx: &mut Context<'_>, mut host: F)
    where
        F: FnMut(&mut Context<'_>, &mut Interpreter),
    {
        while !self.is_stopped() {
            self.run_batch(ctx);
            if self.is_stopped() {
                break;
            }

            host(ctx, self);
            if self.is_stopped() {
                break;
            }
            thread::sleep(self.config.pause);
        }
    }
}

#[cfg(test)]
use crate::lang::functions::Natives;

#[cfg(test)]
fn machine(src: &str, name: &str, global: &crate::lang::scope::ScopeRef) -> Machine {
    use crate::lang::parse::parse_source;
    use crate::lang::semantics::SemanticAnalyzer;

    let file = parse_source(src, name).unwrap();
    SemanticAnalyzer::new(global)
        .analyze(&[file.clone()])
        .unwrap();
    Machine::eval(&file, &global.file_scope(name))
}

#[test]
fn test_one_failure_leaves_others_running() {
    use crate::lang::error::ErrorKind;
    use crate::lang::scope::ScopeRef;

    let global = ScopeRef::global();
    let mut interp = Interpreter::new(InterpreterConfig::default());
    let a = interp.spawn("a", machine("n = 1\nn = 2\nn = 3\n", "a", &global));
    let b = interp.spawn("b", machine("n = 1\nn = missing\nn = 3\n", "b", &global));
    let c = interp.spawn("c", machine("n = 10\nn = 20\nn = 30\n", "c", &global));

    let mut out = Vec::new();
    let mut ctx = Context::new(Natives::new(), &mut out);

    assert!(interp.tick(&mut ctx));
    assert_eq!(interp.live(), 3);
    assert!(interp.failures().is_empty());

    // `b` fails on its second step
    assert!(interp.tick(&mut ctx));
    assert_eq!(interp.live(), 2);
    assert_eq!(interp.failures().len(), 1);
    let failure = &interp.failures()[0];
    assert_eq!(failure.id, b);
    assert_eq!(failure.error.kind, ErrorKind::Undefined);
    assert_eq!(failure.error.token.as_ref().map(|t| t.line), Some(2));

    while !interp.is_stopped() {
        interp.tick(&mut ctx);
    }
    assert_eq!(
        global.file_scope("a").resolve_variable("n"),
        Some(Constant::Number(3.0))
    );
    assert_eq!(
        global.file_scope("b").resolve_variable("n"),
        Some(Constant::Number(1.0))
    );
    assert_eq!(
        global.file_scope("c").resolve_variable("n"),
        Some(Constant::Number(30.0))
    );
    assert!(interp.result(a).is_some());
    assert!(interp.result(c).is_some());
    assert!(interp.result(b).is_none());
}

#[test]
fn test_waiting_on_completion() {
    use crate::lang::functions::{Completion, NativeCall};
    use crate::lang::scope::ScopeRef;

    let done = Completion::new();
    let mut natives = Natives::new();
    let signal = done.clone();
    natives.register(None, "load", move |_, _| {
        Ok(NativeCall::after(signal.clone(), |_| {
            Ok(Constant::String("loaded".into()))
        }))
    });

    let global = ScopeRef::global();
    let mut interp = Interpreter::new(InterpreterConfig::default());
    let src = "native function load()\nres = load()\n";
    interp.spawn("loader", machine(src, "loader", &global));

    let mut out = Vec::new();
    let mut ctx = Context::new(natives, &mut out);

    interp.run_batch(&mut ctx);
    assert_eq!(interp.live(), 1);
    assert!(!interp.tick(&mut ctx));

    done.complete();
    interp.run_batch(&mut ctx);
    assert!(interp.is_stopped());
    assert!(interp.failures().is_empty());
    assert_eq!(
        global.file_scope("loader").resolve_variable("res"),
        Some(Constant::String("loaded".into()))
    );
}

#[test]
fn test_run_until_stopped() {
    use crate::lang::scope::ScopeRef;

    let global = ScopeRef::global();
    let mut interp = Interpreter::new(InterpreterConfig {
        time_budget: Duration::from_millis(1),
        pause: Duration::from_millis(0),
    });
    interp.spawn("spin", machine("while True do\nend\n", "spin", &global));

    let mut out = Vec::new();
    let mut ctx = Context::new(Natives::new(), &mut out);
    let mut calls = 0;
    interp.run(&mut ctx, |_, interp| {
        calls += 1;
        if calls == 3 {
            interp.stop();
        }
    });

    assert_eq!(calls, 3);
    assert!(interp.is_stopped());
    // Stopping does not unwind anything
    assert_eq!(interp.live(), 1);
}
