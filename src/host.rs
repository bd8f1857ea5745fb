use std::task::Poll;
use std::time::{Duration, Instant};

use kestrel::lang::error::{Error, Result};
use kestrel::lang::functions::{arg, Context, NativeCall, Natives};
use kestrel::lang::scope::ScopeRef;
use kestrel::{Constant, Source};

/// Declarations of everything `natives()` implements
const PRELUDE: &str = r#"
native function print(value)
native function str(value)
native function sleep(ms)

class Math
    shared native function floor(x)
    shared native function sqrt(x)
end

class Time
    shared native function frame()
end
"#;

pub fn prelude() -> Source {
    Source::new("<prelude>", PRELUDE)
}

fn print(ctx: &mut Context<'_>, scope: &ScopeRef) -> Result<NativeCall> {
    let value = arg(scope, "value")?;
    writeln!(ctx.sink, "{}", value).map_err(|e| Error::runtime(format!("print: {}", e)))?;

    Ok(NativeCall::Done(Constant::None))
}

/// Finishes once `ms` milliseconds have passed, without blocking other executions
fn sleep(_: &mut Context<'_>, scope: &ScopeRef) -> Result<NativeCall> {
    let ms = arg(scope, "ms")?.as_number()?;
    if ms < 0.0 {
        return Err(Error::runtime("sleep: negative duration"));
    }
    let deadline = Instant::now() + Duration::from_millis(ms as u64);

    Ok(NativeCall::pending(move |_: &mut Context<'_>| {
        if Instant::now() >= deadline {
            Ok(Poll::Ready(Constant::None))
        } else {
            Ok(Poll::Pending)
        }
    }))
}

fn math(f: fn(f64) -> f64) -> impl Fn(&mut Context<'_>, &ScopeRef) -> Result<NativeCall> {
    move |_: &mut Context<'_>, scope: &ScopeRef| {
        let x = arg(scope, "x")?.as_number()?;
        Ok(NativeCall::Done(Constant::Number(f(x))))
    }
}

pub fn natives() -> Natives {
    let mut natives = Natives::new();

    natives.register(None, "print", print);
    natives.register(None, "str", |_, scope| {
        let value = arg(scope, "value")?;
        Ok(NativeCall::Done(Constant::String(value.to_string())))
    });
    natives.register(None, "sleep", sleep);
    natives.register(Some("Math"), "floor", math(f64::floor));
    natives.register(Some("Math"), "sqrt", math(f64::sqrt));
    natives.register(Some("Time"), "frame", |ctx, _| {
        Ok(NativeCall::Done(Constant::Number(ctx.frame as f64)))
    });

    natives
}

#[test]
fn test_host_natives() {
    use kestrel::{run, InterpreterConfig};

    let tests = vec![
        ("print(1 + 1)", "2\n"),
        ("print(str(2) + str(True))", "2True\n"),
        ("print(Math.floor(2.7))", "2\n"),
        ("print(Math.sqrt(16))", "4\n"),
        ("sleep(1)\nprint(\"awake\")", "awake\n"),
        ("print(Time.frame())\nwait for update\nprint(Time.frame())", "0\n1\n"),
    ];

    for (src, expected) in tests {
        let mut out = Vec::new();
        {
            let mut ctx = Context::new(natives(), &mut out);
            run(
                &[prelude()],
                &[Source::new("test", src)],
                &mut ctx,
                InterpreterConfig::default(),
            )
            .unwrap();
        }
        assert_eq!(String::from_utf8(out).unwrap(), expected, "{}", src);
    }
}
