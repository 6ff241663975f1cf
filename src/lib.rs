//! The *tiny* language: a minimal imperative language compiled to
//! bytecode and executed by a stack VM whose values live in a
//! mark-sweep collected heap.
//!
//! The pipeline is `lexer` → `parser` (which interns names, constants
//! and procedures into the symbol tables as it goes) → `compiler`
//! (flat byte-coded program, little-endian immediates) → `vm`
//! (`Machine`, which also carries the host embedding API).
//!
//! ```
//! use tiny_lang::Machine;
//!
//! let mut machine = Machine::new();
//! machine.compile("proc f(n) return $n * $n end write f(6) end").unwrap();
//! machine.run().unwrap();
//! ```

#![warn(clippy::all)]

pub mod ast;
pub mod compiler;
pub mod diagnostic;
pub mod heap;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod vm;

pub use heap::{Handle, Native, Obj};
pub use vm::{ForeignFn, Limits, Machine, RuntimeError};

/// Everything that can go wrong before the program runs, plus the
/// runtime failures, behind one library boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Compile(#[from] compiler::CompileError),
    #[error(transparent)]
    Runtime(#[from] vm::RuntimeError),
}
