//! `CompilerFrontend` — the crate's main embedding entry point (spec §5):
//! uniquely owns one scanner, parser, code generator, and VM, exactly the
//! way spec.md's concurrency model describes. `compile` runs the whole
//! preprocess → parse → codegen → load pipeline once; `run` drives the VM.

use std::collections::HashSet;

use crate::codegen::{CgResult, CodeGen};
use crate::diagnostics::CodeMessages;
use crate::opcode::Opcode;
use crate::parser::{self, ParseError, ParserOptions};
use crate::scope::{ScopeTree, ROOT_SCOPE};
use crate::stdlib::Stdlib;
use crate::tracer::{NoopTracer, VmTracer};
use crate::types::TypeModel;
use crate::vm::{RunOptions, RunResult, VirtualMachine, VmState};

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Codegen(#[from] crate::codegen::CodegenError),
    #[error("compilation failed with {0} error(s)")]
    CompileFailed(usize),
}

pub type FrontendResult<T> = Result<T, FrontendError>;

/// Mirrors `CodeGenerator::ParserOptions` (`SPEC_FULL.md` §1.3): the knobs a
/// host picks before constructing a [`CompilerFrontend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontendOptions {
    pub parser_options: ParserOptions,
}

/// Owns the whole toolchain for one script: type/scope tables, diagnostics,
/// the standard library, and the VM it loads bytecode into.
pub struct CompilerFrontend<Tr: VmTracer = NoopTracer> {
    types: TypeModel,
    scopes: ScopeTree,
    messages: CodeMessages,
    vm: VirtualMachine<Tr>,
    stdlib: Stdlib,
    options: FrontendOptions,
}

impl CompilerFrontend<NoopTracer> {
    pub fn new(options: FrontendOptions) -> Self {
        Self::with_tracer(options, NoopTracer)
    }
}

impl<Tr: VmTracer> CompilerFrontend<Tr> {
    pub fn with_tracer(options: FrontendOptions, tracer: Tr) -> Self {
        Self {
            types: TypeModel::new(),
            scopes: ScopeTree::new(),
            messages: CodeMessages::default(),
            vm: VirtualMachine::with_tracer(tracer),
            stdlib: Stdlib::new(),
            options,
        }
    }

    pub fn messages(&self) -> &CodeMessages {
        &self.messages
    }

    pub fn stdlib(&self) -> &Stdlib {
        &self.stdlib
    }

    pub fn vm(&self) -> &VirtualMachine<Tr> {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut VirtualMachine<Tr> {
        &mut self.vm
    }

    /// Strips `{$IFDEF}` blocks, parses, lowers to bytecode, and loads the
    /// result into the owned VM plus the standard library. Resets all
    /// per-compilation state first, so the same frontend can compile
    /// several scripts in sequence.
    pub fn compile(&mut self, source: &str, defines: &HashSet<String>) -> FrontendResult<()> {
        self.types.reset();
        self.scopes.reset();
        self.messages.clear();

        let preprocessed = crate::preprocessor::preprocess(source, defines);
        let program = parser::parse_program(&preprocessed, self.options.parser_options)?;

        tracing::debug!(name = %program.name, "parsed program");

        let op_count = {
            let mut codegen = CodeGen::new(&mut self.types, &mut self.scopes, &mut self.messages);
            let seq: CgResult<_> = codegen.compile_program(&program);
            let seq = seq?;
            if self.messages.errors_count() > 0 {
                return Err(FrontendError::CompileFailed(self.messages.errors_count()));
            }
            let ops: Vec<Opcode> = seq.into_ops().into_iter().map(|instr| instr.op).collect();
            let statics_count = self.scopes.get(ROOT_SCOPE).next_memory_address() as usize;
            let op_count = ops.len();
            self.vm.load(ops, statics_count, &codegen.external_vars, &codegen.externals);
            op_count
        };
        self.stdlib.install(&mut self.vm);
        tracing::trace!(op_count, "bytecode loaded");
        Ok(())
    }

    pub fn run(&mut self, opts: &RunOptions) -> RunResult<VmState> {
        self.vm.run(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::BufferSink;

    #[test]
    fn compiles_and_runs_arithmetic() {
        let src = "program P; var external a: double; var external b: double; var external c: double; \
                    begin a := b * c + c + 0.25; end.";
        let mut fe = CompilerFrontend::new(FrontendOptions::default());
        fe.compile(src, &HashSet::new()).unwrap();
        fe.vm_mut().bind_external_var("b", crate::value::ValueCell::from_f64(0.5));
        fe.vm_mut().bind_external_var("c", crate::value::ValueCell::from_f64(4.5));
        fe.vm_mut().bind_external_var("a", crate::value::ValueCell::from_f64(0.0));
        fe.run(&RunOptions::default()).unwrap();
        let a = fe.vm().external_var("a").unwrap().get_f64().unwrap();
        assert!((a - 5.0).abs() < 1e-9);
    }

    #[test]
    fn write_goes_to_buffer_sink() {
        let src = "program P; begin writeln('hi'); end.";
        let mut fe = CompilerFrontend::new(FrontendOptions::default());
        fe.vm_mut().set_output_sink(Box::new(BufferSink::default()));
        fe.compile(src, &HashSet::new()).unwrap();
        fe.run(&RunOptions::default()).unwrap();
    }

    #[test]
    fn compile_error_is_reported() {
        let src = "program P; begin x := 1; end.";
        let mut fe = CompilerFrontend::new(FrontendOptions::default());
        let err = fe.compile(src, &HashSet::new());
        assert!(err.is_err());
        assert!(fe.messages().errors_count() > 0);
    }
}
