//! Single-pass compiler for a small C subset. Source text is lexed, parsed
//! and turned into x86-64 machine code in one walk, forward references are
//! patched through chains threaded in the code itself, and the result is
//! run in-process.

pub mod asm;
pub mod backend;
pub mod compiler;
pub mod config;
pub mod error;
pub mod lexer;
pub mod mmap;
pub mod ops;
pub mod program;
pub mod resolver;
pub mod symbols;

pub use compiler::{compile, compile_bytes, Compiler};
pub use config::Limits;
pub use error::{CompilationError, CompilerResult, ErrorKind};
pub use program::{FunctionInfo, Program};
pub use resolver::{HostResolver, NoResolver, SymbolResolver, TableResolver};
