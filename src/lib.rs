//! A sandboxed expression language with JavaScript semantics.
//!
//! Source text is tokenized by [`lex`], parsed into an [`ast::Expr`] by
//! [`parse`], and compiled by [`compile`] into an [`Evaluator`] tree that runs
//! against a host-supplied context object.
//!
//! ```
//! use sandbox_expr::{CompilerOptions, Object, Value, evaluate};
//!
//! let context = Object::from_iter([("a", 0)]);
//! let value = evaluate("a++ + 10", &context, CompilerOptions::default()).unwrap();
//! assert_eq!(value, Value::from(10));
//! assert_eq!(context.get("a"), Some(Value::from(1)));
//! ```

use miette::Diagnostic;
use thiserror::Error;

pub mod ast;
pub mod compile;
pub mod eval;
pub mod lex;
pub mod ops;
pub mod parse;
pub mod system;
pub mod value;

pub use compile::{Compiler, CompilerOptions};
pub use eval::{EvalError, Evaluator, Program, Step};
pub use lex::Lexer;
pub use parse::{Parser, SyntaxError, parse};
pub use value::{Array, Function, Object, Promise, Value};

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),
}

/// Parses and compiles `source`.
pub fn compile(source: &str, options: CompilerOptions) -> Result<Program, Error> {
    let expr = parse(source)?;
    Ok(Compiler::new(options).program(&expr)?)
}

/// Compiles and runs `source` once. Asynchronous expressions evaluate to a
/// [`Value::Promise`]; see [`evaluate_async`].
pub fn evaluate(source: &str, context: &Object, options: CompilerOptions) -> Result<Value, Error> {
    Ok(compile(source, options)?.call(context)?)
}

/// Compiles and runs `source`, settling the result if it is a promise.
pub async fn evaluate_async(
    source: &str,
    context: &Object,
    options: CompilerOptions,
) -> Result<Value, Error> {
    let program = compile(source, options)?;
    Ok(program.call_async(context).await?)
}
