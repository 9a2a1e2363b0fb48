//! Stack virtual machine (spec §4.8), grounded in the original's
//! `bytecode/vm/mod.rs`: a dispatch loop over a linear instruction array
//! with a cached program counter and an explicit call-frame stack.
//!
//! Unlike the teacher, opcodes here are never decoded from a raw byte
//! stream at run time — the VM executes the `Opcode` enum codegen already
//! built. Byte-level encoding only happens for persistence, in
//! [`bytecode_io`].

mod bytecode_io;
mod dispatch;
pub mod frame;

pub use bytecode_io::{hex_decode, hex_encode, BytecodeError};
pub use frame::{CallFrame, VmState};

use indexmap::IndexMap;

use crate::opcode::Opcode;
use crate::tracer::{NoopTracer, VmTracer};
use crate::value::{ContainerHandle, ValueCell, ValueError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unknown opcode at pc={0}")]
    UnknownOpcode(usize),
    #[error("reference beyond stack size")]
    ReferenceBeyondStackSize,
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("unresolved call to external function {0:?}")]
    UnresolvedCall(Option<String>),
    #[error("container kind not produced by this VM build")]
    UnsupportedContainer,
    #[error("stack underflow")]
    StackUnderflow,
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

pub type RunResult<T> = Result<T, RuntimeError>;

/// Where `WRT` output goes (spec §4.8). Grounded in the original's
/// `io::PrintWriter`, narrowed to a single write method since this
/// language's `write`/`writeln` already do their own formatting.
pub trait OutputSink {
    fn write_str(&mut self, s: &str);
}

#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_str(&mut self, s: &str) {
        print!("{s}");
    }
}

/// Captures output in memory instead of printing it — used by tests and by
/// embedders that want the script's output as a string.
#[derive(Debug, Default)]
pub struct BufferSink(pub String);

impl OutputSink for BufferSink {
    fn write_str(&mut self, s: &str) {
        self.0.push_str(s);
    }
}

/// A host-supplied external callback (spec §6): receives the result cells
/// (the first `ret_size` cells above the arguments) and the argument
/// cells, already resolved from the caller's pointers. Writes results back
/// via `ValueCell::set_*`; the VM pops only the argument cells once the
/// callback returns.
pub type ExternalFn = Box<dyn FnMut(&mut [ValueCell], &mut [ValueCell]) -> RunResult<()>>;

/// Run-control knobs (spec §4.8's debugger hooks; `SPEC_FULL.md` §1.3).
/// Hitting `step_limit` or a breakpoint suspends the VM rather than
/// erroring — `run()` is resumable by calling it again.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub step_limit: Option<u64>,
    pub breakpoints: Vec<usize>,
    /// When true, a step that lands on a `CALL`/`CALLEXT` instead executes
    /// the call to completion before yielding control back — the "step
    /// over" half of the original's `_useSkipCalls` flag.
    pub skip_calls: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct OpcodeProfile {
    count: u64,
    total_nanos: u64,
}

/// The stack machine proper. Generic over the tracer so [`NoopTracer`]
/// monomorphizes away to nothing in a production build.
pub struct VirtualMachine<Tr: VmTracer = NoopTracer> {
    ops: Vec<Opcode>,
    pc: i64,
    stack: Vec<ValueCell>,
    statics: Vec<ValueCell>,
    call_frames: Vec<CallFrame>,
    /// Host-bound named variables (`REFEXT`), addressed by declaration
    /// order — index into this vec is `RefExt::n`. Each inner vec is one
    /// variable's own contiguous cell storage, sized to its declared
    /// type, so an array element index narrows into the right variable
    /// instead of spilling into the next one's slot.
    externals: Vec<Vec<ValueCell>>,
    external_names: IndexMap<String, ()>,
    /// Host-bound external functions (`CALLEXT`), addressed by the same
    /// first-reference order codegen recorded in `CodeGen::externals`.
    func_table: Vec<Option<ExternalFn>>,
    func_names: IndexMap<String, ()>,
    profile: Vec<OpcodeProfile>,
    profiling_enabled: bool,
    tracer: Tr,
    out: Box<dyn OutputSink>,
    running: bool,
}

impl VirtualMachine<NoopTracer> {
    pub fn new() -> Self {
        Self::with_tracer(NoopTracer)
    }
}

impl Default for VirtualMachine<NoopTracer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tr: VmTracer> VirtualMachine<Tr> {
    pub fn with_tracer(tracer: Tr) -> Self {
        Self {
            ops: Vec::new(),
            pc: 0,
            stack: Vec::new(),
            statics: Vec::new(),
            call_frames: Vec::new(),
            externals: Vec::new(),
            external_names: IndexMap::new(),
            func_table: Vec::new(),
            func_names: IndexMap::new(),
            profile: Vec::new(),
            profiling_enabled: false,
            tracer,
            out: Box::new(StdoutSink),
            running: false,
        }
    }

    pub fn set_output_sink(&mut self, sink: Box<dyn OutputSink>) {
        self.out = sink;
    }

    /// Loads a compiled program. `statics_count` reserves the root scope's
    /// variable storage (spec §4.8's static area); `external_var_names`/
    /// `external_fn_names` come from `CodeGen::external_vars`/`externals`
    /// in first-reference order.
    pub fn load(&mut self, ops: Vec<Opcode>, statics_count: usize, external_var_names: &IndexMap<String, i64>, external_fn_names: &IndexMap<String, ()>) {
        self.ops = ops;
        self.pc = 0;
        self.stack.clear();
        self.statics = (0..statics_count).map(|_| ValueCell::default()).collect();
        self.call_frames.clear();
        self.externals = external_var_names.values().map(|&size| vec![ValueCell::default(); size.max(1) as usize]).collect();
        self.external_names = external_var_names.keys().map(|k| (k.clone(), ())).collect();
        self.func_table = external_fn_names.keys().map(|_| None).collect();
        self.func_names = external_fn_names.clone();
        self.profile = vec![OpcodeProfile::default(); self.ops.len()];
        self.running = true;
    }

    pub fn enable_profiling(&mut self, enabled: bool) {
        self.profiling_enabled = enabled;
    }

    /// Per-opcode `(count, total_nanos)`, indexed the same way as the
    /// loaded program (`SPEC_FULL.md` §2's profiling hook).
    pub fn profile(&self) -> Vec<(u64, u64)> {
        self.profile.iter().map(|p| (p.count, p.total_nanos)).collect()
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn static_var(&self, idx: usize) -> Option<&ValueCell> {
        self.statics.get(idx)
    }

    pub fn static_var_mut(&mut self, idx: usize) -> Option<&mut ValueCell> {
        self.statics.get_mut(idx)
    }

    /// Binds a host value into the external-variable slot declared by
    /// `name` (`external` variables in source). Call before `run()` to
    /// seed input, and after `run()` returns to read output.
    pub fn bind_external_var(&mut self, name: &str, value: ValueCell) -> bool {
        match self.external_names.get_index_of(name) {
            Some(idx) => {
                self.externals[idx][0] = value;
                true
            }
            None => false,
        }
    }

    pub fn external_var(&self, name: &str) -> Option<&ValueCell> {
        self.external_names.get_index_of(name).and_then(|i| self.externals.get(i)).and_then(|v| v.get(0))
    }

    /// Binds a host callback to an externally-declared function. Call
    /// before `run()`; `CALLEXT` fails with `UnresolvedCall` if the name
    /// codegen recorded was never bound.
    pub fn bind_external_fn(&mut self, name: &str, f: ExternalFn) -> bool {
        match self.func_names.get_index_of(name) {
            Some(idx) => {
                self.func_table[idx] = Some(f);
                true
            }
            None => false,
        }
    }

    /// Runs until `EXIT`, a step limit, or a breakpoint. Resumable: a
    /// suspended VM picks back up from `pc` on the next call.
    pub fn run(&mut self, opts: &RunOptions) -> RunResult<VmState> {
        let mut steps: u64 = 0;
        while self.running {
            let pc = self.pc as usize;
            if opts.breakpoints.contains(&pc) {
                return Ok(VmState::BreakpointHit { pc });
            }
            if let Some(limit) = opts.step_limit {
                if steps >= limit {
                    return Ok(VmState::StepLimitReached);
                }
            }
            self.execute_one(opts)?;
            steps += 1;
        }
        Ok(VmState::Finished)
    }

    fn resolve_cell(&self, container: ContainerHandle, index: i64) -> RunResult<&ValueCell> {
        match container {
            ContainerHandle::Stack => self.stack.get(index as usize).ok_or(RuntimeError::ReferenceBeyondStackSize),
            ContainerHandle::Static => self.statics.get(index as usize).ok_or(RuntimeError::ReferenceBeyondStackSize),
            ContainerHandle::External(id) => self
                .externals
                .get(id as usize)
                .and_then(|v| v.get(index as usize))
                .ok_or(RuntimeError::ReferenceBeyondStackSize),
            ContainerHandle::Nested(_) => Err(RuntimeError::UnsupportedContainer),
        }
    }

    fn resolve_cell_mut(&mut self, container: ContainerHandle, index: i64) -> RunResult<&mut ValueCell> {
        match container {
            ContainerHandle::Stack => self.stack.get_mut(index as usize).ok_or(RuntimeError::ReferenceBeyondStackSize),
            ContainerHandle::Static => self.statics.get_mut(index as usize).ok_or(RuntimeError::ReferenceBeyondStackSize),
            ContainerHandle::External(id) => self
                .externals
                .get_mut(id as usize)
                .and_then(|v| v.get_mut(index as usize))
                .ok_or(RuntimeError::ReferenceBeyondStackSize),
            ContainerHandle::Nested(_) => Err(RuntimeError::UnsupportedContainer),
        }
    }
}
