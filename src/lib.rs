//! Kestrel: a small object-oriented scripting language with a cooperative interpreter.
//!
//! Source text is tokenized, matched against a table of grammar rules and registered into a
//! Global scope. Every running program is an execution whose evaluation state is an explicit
//! frame stack, so the host can interleave many of them and suspend any of them while it
//! waits for a frame to end or a resource to load.

pub mod lang;

pub use lang::error::{Error, ErrorKind, Result};
pub use lang::eval::value::Constant;
pub use lang::functions::{Completion, Context, NativeCall, Natives};
pub use lang::interpreter::{Interpreter, InterpreterConfig};
pub use lang::runtime::{compile, run, Program, Source};
