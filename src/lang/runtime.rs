use std::rc::Rc;

use log::{debug, info};

use crate::lang::ast::{Node, NodeKind, NodeRef};
use crate::lang::error::{Error, Result};
use crate::lang::eval::value::Constant;
use crate::lang::eval::{call_parent, Machine};
use crate::lang::functions::Context;
use crate::lang::interpreter::{Execution, Interpreter, InterpreterConfig};
use crate::lang::object::{Class, Function, UpdateOrder};
use crate::lang::parse::parse_source;
use crate::lang::scope::{ScopeRef, UpdateTarget};
use crate::lang::semantics::SemanticAnalyzer;
use crate::lang::tokenize::tokenize_str;

/// A named piece of source text
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    pub text: String,
}

impl Source {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, text: T) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Parse and register `sources` against `global`. Returns the Program node of the unit.
fn register(global: &ScopeRef, sources: &[&Source]) -> Result<NodeRef> {
    let files = sources
        .iter()
        .map(|s| parse_source(&s.text, &s.name))
        .collect::<Result<Vec<_>>>()?;
    let classes = SemanticAnalyzer::new(global).analyze(&files)?;
    debug!(
        "Registered {} files declaring {} classes",
        files.len(),
        classes.len()
    );

    let token = match files.first() {
        Some(f) => f.token.clone(),
        None => tokenize_str("", "<empty>")
            .pop()
            .ok_or_else(|| Error::runtime("Tokenizer produced no end of input"))?,
    };
    Ok(Node::new(NodeKind::Program { files, classes }, &token))
}

/// A registered compilation unit and the Global scope it lives in
pub struct Program {
    global: ScopeRef,
    root: NodeRef,
}

impl Program {
    /// Parse and register `library` followed by `sources` as one unit
    pub fn build(library: &[Source], sources: &[Source]) -> Result<Self> {
        let global = ScopeRef::global();
        let all: Vec<&Source> = library.iter().chain(sources.iter()).collect();
        let root = register(&global, &all)?;

        Ok(Self { global, root })
    }

    pub fn global(&self) -> &ScopeRef {
        &self.global
    }

    /// Machine that initializes shared state and runs every file body
    pub fn machine(&self) -> Machine {
        Machine::eval(&self.root, &self.global)
    }

    /// Register `source` as an additional unit and return a machine that runs it
    pub fn load(&mut self, source: &Source) -> Result<Machine> {
        let root = register(&self.global, &[source])?;
        Ok(Machine::eval(&root, &self.global))
    }

    pub fn class(&self, name: &str) -> Option<Rc<Class>> {
        self.global.resolve_class(name)
    }

    /// Run the `update` functions registered for `order`
    pub fn update(&self, ctx: &mut Context<'_>, order: UpdateOrder) -> Result<()> {
        let targets = self.global.with_state(|g| g.registry(order).clone());

        for target in targets {
            match target {
                UpdateTarget::Class(class) => {
                    if let Some(func) = class.shared_scope.own_function("update") {
                        call_sync(ctx, &func, &class.shared_scope)?;
                    }
                }
                UpdateTarget::Object(object) => {
                    if let Some((func, found)) = object.outer().resolve_member_function("update")
                    {
                        call_sync(ctx, &func, &call_parent(&func, &found))?;
                    }
                    let behaviours = object.behaviours.borrow().clone();
                    for behaviour in behaviours {
                        if let Some(func) = behaviour.outer().own_function("update") {
                            call_sync(ctx, &func, behaviour.outer())?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Release every execution waiting for the end of the frame
    pub fn end_frame(&self) {
        let waiters = self.global.with_state(|g| std::mem::take(&mut g.waiters));
        for w in waiters {
            w.set(true);
        }
    }

    /// One full frame: pre, normal and post updates, then the end of the frame
    pub fn frame(&self, ctx: &mut Context<'_>) -> Result<()> {
        for order in UpdateOrder::ALL.iter() {
            self.update(ctx, *order)?;
        }
        self.end_frame();
        ctx.frame += 1;

        Ok(())
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        // Objects, scopes and classes refer to each other
        self.global.clear();
    }
}

fn call_sync(ctx: &mut Context<'_>, func: &Rc<Function>, parent: &ScopeRef) -> Result<Constant> {
    let name = func.qualified_name();
    Execution::new(0, &name, Machine::call(func, Vec::new(), parent)).run_to_completion(ctx)
}

/// Parse and register without running anything
pub fn compile(library: &[Source], sources: &[Source]) -> Result<()> {
    Program::build(library, sources).map(|_| ())
}

/// Build a program and run it to completion, driving frames while it waits
pub fn run(
    library: &[Source],
    sources: &[Source],
    ctx: &mut Context<'_>,
    config: InterpreterConfig,
) -> Result<Constant> {
    let program = Program::build(library, sources)?;
    let mut interp = Interpreter::new(config);
    let id = interp.spawn("main", program.machine());

    let mut frame_error = None;
    interp.run(ctx, |ctx, interp| {
        if let Err(e) = program.frame(ctx) {
            frame_error = Some(e);
            interp.stop();
        }
    });
    info!("Program finished after {} frames", ctx.frame);

    if let Some(e) = frame_error {
        return Err(e);
    }
    if let Some(failure) = interp.take_failures().into_iter().next() {
        return Err(failure.error);
    }

    Ok(interp.result(id).cloned().unwrap_or(Constant::None))
}

#[cfg(test)]
use crate::lang::error::ErrorKind;
#[cfg(test)]
use crate::lang::functions::{arg, NativeCall, Natives};

#[cfg(test)]
const PRELUDE: &str = "native function print(value)\n";

#[cfg(test)]
fn test_natives() -> Natives {
    let mut natives = Natives::new();
    natives.register(None, "print", |ctx, scope| {
        let value = arg(scope, "value")?;
        writeln!(ctx.sink, "{}", value).map_err(|e| Error::runtime(e.to_string()))?;
        Ok(NativeCall::Done(Constant::None))
    });
    natives
}

/// Run `src` and return what it printed
#[cfg(test)]
fn run_output(src: &str) -> Result<String> {
    let mut out = Vec::new();
    {
        let mut ctx = Context::new(test_natives(), &mut out);
        run(
            &[Source::new("prelude", PRELUDE)],
            &[Source::new("main", src)],
            &mut ctx,
            InterpreterConfig::default(),
        )?;
    }
    Ok(String::from_utf8(out).unwrap())
}

#[test]
fn test_if_else() {
    let src = "\
if x > 3 then
    print(\"big\")
else
    print(\"small\")
end
if x is 5 then print(\"five\") else print(\"other\")
";
    let tests = vec![(1, "small\nother\n"), (5, "big\nfive\n"), (4, "big\nother\n")];

    for (x, expected) in tests {
        let out = run_output(&format!("x = {}\n{}", x, src)).unwrap();
        assert_eq!(out, expected);
    }
}

#[test]
fn test_else_if_chain() {
    let src = "\
for i from 1 to 3 do
    if i is 1 then
        print(\"one\")
    else if i is 2 then
        print(\"two\")
    else
        print(\"many\")
    end
end
";
    assert_eq!(run_output(src).unwrap(), "one\ntwo\nmany\n");
}

#[test]
fn test_for_loops() {
    let tests = vec![
        ("for i from 1 to 5 do\n    print(i)\nend\n", "1\n2\n3\n4\n5\n"),
        (
            "for i from 5 to 1 step by -1 do\n    print(i)\nend\n",
            "5\n4\n3\n2\n1\n",
        ),
        ("for i from 0 to 6 step by 3 do\n    print(i)\nend\n", "0\n3\n6\n"),
        ("for i from 3 to 1 do\n    print(i)\nend\n", ""),
        // The bound is re-evaluated every iteration
        ("n = 3\nfor i from 1 to n do\n    n = 2\n    print(i)\nend\n", "1\n2\n"),
        (
            "for i from 1 to 10 do\n    if i is 3 then\n        break\n    end\n    print(i)\nend\n",
            "1\n2\n",
        ),
    ];

    for (src, expected) in tests {
        assert_eq!(run_output(src).unwrap(), expected, "{}", src);
    }

    let err = run_output("for i from 1 to 5 step by 0 do\nend\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
}

#[test]
fn test_while_and_repeat() {
    let tests = vec![
        (
            "i = 0\nwhile i < 3 do\n    i = i + 1\n    print(i)\nend\n",
            "1\n2\n3\n",
        ),
        (
            "i = 0\nwhile True do\n    i = i + 1\n    if i % 2 is 0 then\n        continue\n    end\n    if i > 5 then\n        break\n    end\n    print(i)\nend\n",
            "1\n3\n5\n",
        ),
        ("i = 10\nrepeat\n    print(i)\n    i = i + 1\nuntil i > 11\n", "10\n11\n"),
    ];

    for (src, expected) in tests {
        assert_eq!(run_output(src).unwrap(), expected, "{}", src);
    }
}

#[test]
fn test_arithmetic_errors() {
    assert_eq!(run_output("print(3 + \"x\")\n").unwrap(), "3x\n");
    assert_eq!(run_output("print(\"n=\" + 2.5)\n").unwrap(), "n=2.5\n");

    let tests = vec![
        ("y = 3 - \"x\"\n", ErrorKind::Type),
        ("y = 5 / 0\n", ErrorKind::DivisionByZero),
        ("y = 5 % 0\n", ErrorKind::DivisionByZero),
        ("y = True and 1\n", ErrorKind::Type),
        ("y = 1 < \"a\"\n", ErrorKind::Type),
        ("y = missing + 1\n", ErrorKind::Undefined),
        ("y = nothing()\n", ErrorKind::Undefined),
    ];

    for (src, kind) in tests {
        let err = run_output(src).unwrap_err();
        assert_eq!(err.kind, kind, "{}: {}", src, err);
        assert_eq!(err.token.as_ref().map(|t| t.line), Some(1), "{}", src);
    }
}

#[test]
fn test_functions() {
    let src = "\
function fib(n)
    if n < 2 then
        return n
    end
    return fib(n - 1) + fib(n - 2)
end
function greet(name, greeting = \"hello\")
    return greeting + \" \" + name
end
function nothing()
    x = 1
end
print(fib(10))
print(greet(\"bob\"))
print(greet(\"bob\", \"hi\"))
print(nothing())
";
    assert_eq!(run_output(src).unwrap(), "55\nhello bob\nhi bob\nNone\n");

    let tests = vec![
        "function f(a)\nend\nf()\n",
        "function f(a)\nend\nf(1, 2)\n",
    ];
    for src in tests {
        assert_eq!(run_output(src).unwrap_err().kind, ErrorKind::Arity);
    }

    // Function locals do not leak into the file
    let err = run_output("function f()\n    local = 1\nend\nf()\nprint(local)\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Undefined);
}

#[test]
fn test_construction_order() {
    let src = "\
class E
    property e = \"E\"
    property n
    constructor(n)
        print(\"E \" + n)
    end
end
class D of type E
    property d = \"D\"
    constructor(n)
        print(\"D \" + n)
    end
end
class C of type D
    property c = \"C\"
    constructor(n, extra = 2)
        print(\"C \" + n + \" \" + extra)
    end
end
p = new C(1)
";
    let mut out = Vec::new();
    let program = {
        let mut ctx = Context::new(test_natives(), &mut out);
        let program = Program::build(
            &[Source::new("prelude", PRELUDE)],
            &[Source::new("main", src)],
        )
        .unwrap();
        Execution::new(1, "main", program.machine())
            .run_to_completion(&mut ctx)
            .unwrap();
        program
    };
    assert_eq!(String::from_utf8(out).unwrap(), "C 1 2\nD 1\nE 1\n");

    let p = program
        .global()
        .file_scope("main")
        .resolve_variable("p")
        .unwrap();
    let p = p.as_object().unwrap();
    assert_eq!(p.type_name, "C");
    assert_eq!(p.scopes.len(), 3);

    // One object scope per level, most-derived first
    let levels = vec![("c", "C"), ("d", "D"), ("e", "E")];
    for (scope, (prop, value)) in p.scopes.iter().zip(levels) {
        assert_eq!(
            scope.resolve_member_variable(prop),
            Some(Constant::String(value.to_string()))
        );
        assert!(scope.has_own_variable(prop));
        assert!(scope.has_own_variable("n"));
    }
    assert!(!p.scopes[1].has_own_variable("c"));
    assert!(p.scopes[0].has_own_variable("extra"));
}

#[test]
fn test_construction_data_flow() {
    let tests = vec![
        // Derived constructors run first, so the base sees what they assigned
        (
            "\
class E
    property tag = \"unset\"
    constructor()
        print(\"E sees \" + tag)
    end
end
class D of type E
end
class C of type D
    constructor()
        tag = \"set by C\"
    end
end
c = new C
print(c.tag)
",
            "E sees set by C\nset by C\n",
        ),
        // Every level's defaults are bound before the first constructor body
        (
            "\
class E
    property e = \"e\"
    constructor()
        print(\"E \" + e)
    end
end
class D of type E
    property d = \"d\"
end
class C of type D
    property c = \"c\"
    constructor()
        print(\"C \" + c + d + e)
    end
end
c = new C
",
            "C cde\nE e\n",
        ),
        // Each level binds its own copy of the arguments, which its default never overwrites
        (
            "\
class E
    property n = 0
    constructor(n)
        print(n)
    end
end
class C of type E
    constructor(n)
        n = n + 1
    end
end
c = new C(5)
print(c.n)
",
            "5\n6\n",
        ),
    ];

    for (src, expected) in tests {
        assert_eq!(run_output(src).unwrap(), expected, "{}", src);
    }
}

#[test]
fn test_construction_errors() {
    let tests = vec![
        ("class A\nend\na = new A(1)\n", ErrorKind::Arity),
        ("class A\n    constructor(x)\n    end\nend\na = new A\n", ErrorKind::Arity),
        ("a = new Missing\n", ErrorKind::Undefined),
        ("behaviour B\nend\na = new B\n", ErrorKind::Type),
    ];

    for (src, kind) in tests {
        let err = run_output(src).unwrap_err();
        assert_eq!(err.kind, kind, "{}: {}", src, err);
    }
}

#[test]
fn test_objects() {
    let src = "\
class Counter
    shared property created = 0
    property count = 0
    constructor()
        created = created + 1
    end
    function bump(amount = 1)
        count = count + amount
        return self
    end
    shared function total()
        return created
    end
end
class Doubler of type Counter
    function bump(amount = 1)
        count = count + amount * 2
        return self
    end
end
a = new Counter
b = new Doubler()
a.bump()
a.bump(5)
b.bump(5)
b.count = b.count + 1
print(a.count)
print(b.count)
print(Counter.total())
print(Counter.created)
print(a is a)
print(a is b)
print(a)
";
    assert_eq!(
        run_output(src).unwrap(),
        "6\n11\n2\n2\nTrue\nFalse\n<Counter#1>\n"
    );

    let tests = vec![
        ("class A\nend\na = new A\nprint(a.missing)\n", ErrorKind::Undefined),
        ("class A\nend\na = new A\na.go()\n", ErrorKind::Undefined),
        ("x = 3\nprint(x.y)\n", ErrorKind::Type),
        // Members never fall through to file state
        ("x = 1\nclass A\nend\na = new A\nprint(a.x)\n", ErrorKind::Undefined),
    ];
    for (src, kind) in tests {
        let err = run_output(src).unwrap_err();
        assert_eq!(err.kind, kind, "{}: {}", src, err);
    }
}

#[test]
fn test_behaviours() {
    let src = "\
behaviour Health
    property hp = 10
    function hit(n)
        hp = hp - n
        if hp < 0 then
            hp = 0
        end
    end
end
behaviour Label
    property text = \"?\"
    constructor()
        text = name + \"!\"
    end
end
class Unit
    has behaviour Health
    has behaviour Label
    property name = \"grunt\"
    function damage(n)
        Health.hit(n)
        return Health.hp
    end
end
u = new Unit
print(u.damage(3))
u.Health.hit(20)
print(u.Health.hp)
print(u.Label.text)
";
    assert_eq!(run_output(src).unwrap(), "7\n0\ngrunt!\n");
}

#[test]
fn test_frames() {
    let src = "\
class Ticker
    update order pre
    shared property ticks = 0
    shared function update()
        ticks = ticks + 1
    end
end
class Mover
    update order post
    property x = 0
    function update()
        x = x + 1
    end
end
m = new Mover
print(\"start\")
wait for update
wait for update
print(Ticker.ticks)
print(m.x)
";
    assert_eq!(run_output(src).unwrap(), "start\n2\n2\n");
}

#[test]
fn test_update_order() {
    let src = "\
class Late
    update order post
    function update()
        print(\"post\")
    end
end
class Early
    update order pre
    function update()
        print(\"pre\")
    end
end
class Middle
    function update()
        print(\"normal\")
    end
end
class Spinner
    has behaviour Spin
end
behaviour Spin
    function update()
        print(\"spin\")
    end
end
a = new Late
b = new Middle
c = new Early
d = new Spinner
";
    let mut out = Vec::new();
    {
        let mut ctx = Context::new(test_natives(), &mut out);
        let program = Program::build(
            &[Source::new("prelude", PRELUDE)],
            &[Source::new("main", src)],
        )
        .unwrap();
        Execution::new(1, "main", program.machine())
            .run_to_completion(&mut ctx)
            .unwrap();
        program.frame(&mut ctx).unwrap();
        assert_eq!(ctx.frame, 1);
    }
    assert_eq!(String::from_utf8(out).unwrap(), "pre\nnormal\nspin\npost\n");
}

#[test]
fn test_waiting_update_is_an_error() {
    let src = "\
class Blocker
    function update()
        wait for update
    end
end
b = new Blocker
";
    let mut out = Vec::new();
    let mut ctx = Context::new(test_natives(), &mut out);
    let program = Program::build(&[Source::new("prelude", PRELUDE)], &[Source::new("main", src)])
        .unwrap();
    Execution::new(1, "main", program.machine())
        .run_to_completion(&mut ctx)
        .unwrap();

    let err = program.frame(&mut ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
}

#[test]
fn test_missing_native() {
    let err = run_output("native function draw(x)\ndraw(1)\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.description.contains("draw"));
}

#[test]
fn test_load_keeps_session_state() {
    let mut out = Vec::new();
    let mut ctx = Context::new(test_natives(), &mut out);
    let mut program = Program::build(&[Source::new("prelude", PRELUDE)], &[]).unwrap();

    let inputs = vec![
        ("x = 2", Constant::None),
        ("function double(n)\n    return n * 2\nend", Constant::None),
        ("double(x) + 1", Constant::Number(5.0)),
        ("x", Constant::Number(2.0)),
    ];
    for (input, expected) in inputs {
        let machine = program.load(&Source::new("<repl>", input)).unwrap();
        let result = Execution::new(1, "repl", machine)
            .run_to_completion(&mut ctx)
            .unwrap();
        assert_eq!(result, expected, "{}", input);
    }

    let err = program
        .load(&Source::new("<repl>", "function double(n)\nend"))
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::Registration);
}

#[test]
fn test_failed_load_registers_nothing() {
    let mut out = Vec::new();
    let mut ctx = Context::new(test_natives(), &mut out);
    let mut program = Program::build(&[Source::new("prelude", PRELUDE)], &[]).unwrap();

    let failing = vec![
        ("class A of type B\nend", "Unknown parent class 'B' of 'A'"),
        ("function f()\nend\nclass A of type A\nend", "Inheritance cycle"),
        ("behaviour G\nend\nclass A\n    has behaviour H\nend", "Unknown behaviour 'H'"),
    ];
    for (input, expected) in failing {
        let err = program.load(&Source::new("<repl>", input)).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Registration);
        assert!(err.description.contains(expected), "{}: {}", input, err);
    }
    assert!(program.class("A").is_none());
    assert!(program.global().resolve_function("f").is_none());
    assert!(program.global().resolve_behaviour_def("G").is_none());
    assert!(program.global().existing_file_scope("<repl>").is_none());

    // The corrected declarations are not duplicates of the failed ones
    let inputs = vec![
        "class B\nend\nclass A of type B\nend",
        "a = new A",
    ];
    for input in inputs {
        let machine = program.load(&Source::new("<repl>", input)).unwrap();
        Execution::new(1, "repl", machine)
            .run_to_completion(&mut ctx)
            .unwrap();
    }
    assert!(program.class("A").unwrap().parent.borrow().is_some());
    assert!(program.class("A").unwrap().is_a("B"));

    let err = program
        .load(&Source::new("<repl>", "class B\nend"))
        .err()
        .unwrap();
    assert!(err.description.contains("already declared"), "{}", err);
}

#[test]
fn test_compile() {
    assert!(compile(&[], &[Source::new("a", "class A of type B\nend\n")]).is_err());
    assert!(compile(&[], &[Source::new("a", "x = (1 + \n")]).is_err());
    assert!(compile(
        &[],
        &[
            Source::new("a", "class A of type B\nend\n"),
            Source::new("b", "class B\nend\n"),
        ]
    )
    .is_ok());
}
