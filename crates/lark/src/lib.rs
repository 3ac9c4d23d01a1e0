//! Lark — a small, dynamically typed scripting language compiled to bytecode
//! and executed on a stack virtual machine.
//!
//! Source text is compiled in a single pass: a Pratt parser pulls tokens
//! from the scanner and emits bytecode directly, with no intermediate tree.
//! The resulting chunk runs on the [`Vm`], which owns the value stack, call
//! frames, globals, and the string intern table.
//!
//! # Features
//!
//! - **Values**: numbers (IEEE-754 doubles), booleans, `nil`, strings,
//!   first-class functions
//! - **Interned strings**: equal strings share one allocation, so string
//!   equality is pointer identity
//! - **Control flow**: `if`/`else`, `while`, `for`, short-circuit `and`/`or`
//! - **Variables**: globals plus lexically scoped locals resolved to stack
//!   slots at compile time
//! - **Functions**: declarations, calls, recursion, natives (`clock`)
//! - **Diagnostics**: compile errors with panic-mode recovery (one report
//!   per statement), runtime errors with stack traces
//!
//! # Quick start
//!
//! ```
//! use lark::Vm;
//!
//! let mut vm = Vm::new();
//! vm.interpret("print \"hello\" + \" \" + \"lark\";").unwrap();
//!
//! // Globals persist across calls on the same VM.
//! vm.interpret("var answer = 6 * 7;").unwrap();
//! vm.interpret("print answer;").unwrap();
//! ```
//!
//! # Not supported
//!
//! - Classes, methods, inheritance
//! - Closures capturing enclosing locals
//! - String escape sequences
//! - Garbage collection (objects are reference counted)

mod bytecode;
mod compiler;
mod error;
mod scanner;
mod value;
mod vm;

pub use bytecode::{Chunk, OpCode};
pub use error::{Error, Result};
pub use value::{Function, LarkString, Value};
pub use vm::Vm;
