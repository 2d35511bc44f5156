//! `mython` library crate.
//!
//! A tree-walking interpreter for Mython, a small Python-like language with
//! integers, strings, booleans, single-inheritance classes and indented
//! block structure.
//!
//! High-level layout:
//! - frontend: `lexer` (indentation-aware tokenizer) + `parser` produce the
//!   statement tree and the class registry (`ast`)
//! - shared value/class model: `runtime`
//! - evaluation engine over the tree: `interpreter`

use std::fmt;

use thiserror::Error;

pub mod ast;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod token;

pub use ast::Program;
pub use interpreter::{ExecResult, Unwind};
pub use lexer::{LexError, Lexer};
pub use parser::{ParseError, Parser};
pub use runtime::{Class, ClassInstance, Closure, Context, Method, RuntimeError, Value};
pub use token::{Token, TokenKind};

/// Any failure the pipeline can produce, by stage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Starts lexing `input`, positioned on the first token.
pub fn lex(input: &str) -> Result<Lexer<'_>, LexError> {
    Lexer::new(input)
}

/// Parses the token stream into an executable program.
pub fn parse(lexer: Lexer<'_>) -> Result<Program, ParseError> {
    parser::parse(lexer)
}

/// Evaluates `program` in the caller's scope. Top-level bindings land in
/// `closure`; all program output goes to the context's sink.
pub fn execute(
    program: &Program,
    closure: &mut Closure,
    context: &mut Context<'_>,
) -> Result<Value, RuntimeError> {
    program.execute(closure, context)
}

/// Runs a whole source program, writing its output to `sink`.
pub fn run(source: &str, sink: &mut dyn fmt::Write) -> Result<(), Error> {
    let program = parse(lex(source)?)?;
    let mut closure = Closure::new();
    let mut context = Context::new(sink);
    execute(&program, &mut closure, &mut context)?;
    Ok(())
}
