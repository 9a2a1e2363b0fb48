//! Compiler and stack virtual machine for a Pascal-dialect scripting
//! language: lexer/parser front end, a symbol/type model, a bytecode code
//! generator, and the stack VM that runs the result.
//!
//! [`frontend::CompilerFrontend`] is the main entry point for embedders; the
//! `pasvm` binary drives [`emit_cpp`] for source-to-source conversion.

pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod emit_cpp;
pub mod frontend;
pub mod infer;
pub mod lexer;
pub mod meta;
pub mod opcode;
pub mod parser;
pub mod preprocessor;
pub mod scope;
pub mod stdlib;
pub mod tracer;
pub mod types;
pub mod value;
pub mod vm;

pub use codegen::{CodeGen, CodegenError};
pub use diagnostics::{CodeLocation, CodeMessage, CodeMessages, Severity};
pub use frontend::{CompilerFrontend, FrontendError, FrontendOptions};
pub use parser::{ParseError, ParserOptions};
pub use value::{Kind, ValueCell};
pub use vm::{OutputSink, RunOptions, RuntimeError, VirtualMachine, VmState};
