pub mod ast;
pub mod error;
pub mod eval;
pub mod functions;
pub mod grammar;
pub mod interpreter;
pub mod object;
pub mod parse;
pub mod runtime;
pub mod scope;
pub mod semantics;
pub mod token;
pub mod tokenize;
