//! VM execution tracing (spec §4.8's `DebugFlags`), grounded in the
//! original's `tracer.rs`: a trait-based hook system that compiles away
//! to nothing for [`NoopTracer`] via monomorphization.

use crate::opcode::Opcode;

bitflags::bitflags! {
    /// Mirrors spec §4.8's `DebugFlags` bitset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u8 {
        const NONE        = 0;
        const OPCODE      = 0x01;
        const STACK       = 0x02;
        const CALL_STACK  = 0x04;
        const OPERATIONS  = 0x08;
    }
}

/// Hook points the dispatch loop calls into at each instruction and call
/// boundary. Default bodies are empty so a tracer only overrides what it
/// cares about.
pub trait VmTracer: std::fmt::Debug {
    fn on_instruction(&mut self, _pc: usize, _op: &Opcode, _stack_depth: usize, _frame_depth: usize) {}
    fn on_call(&mut self, _addr: i64, _depth: usize) {}
    fn on_return(&mut self, _depth: usize) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

#[derive(Debug, Default)]
pub struct StderrTracer {
    flags: DebugFlags,
}

impl StderrTracer {
    pub fn new(flags: DebugFlags) -> Self {
        Self { flags }
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, pc: usize, op: &Opcode, stack_depth: usize, frame_depth: usize) {
        if self.flags.contains(DebugFlags::OPCODE) {
            eprintln!("{pc:06}: {op:?}");
        }
        if self.flags.contains(DebugFlags::STACK) {
            eprintln!("  stack={stack_depth}");
        }
        if self.flags.contains(DebugFlags::CALL_STACK) {
            eprintln!("  frames={frame_depth}");
        }
    }

    fn on_call(&mut self, addr: i64, depth: usize) {
        if self.flags.contains(DebugFlags::CALL_STACK) {
            eprintln!("  call -> {addr} (depth {depth})");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if self.flags.contains(DebugFlags::CALL_STACK) {
            eprintln!("  return (depth {depth})");
        }
    }
}

/// Full event log, used by tests and the bound-profiling story in
/// `SPEC_FULL.md` §2.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    Instruction { pc: usize, opcode_name: &'static str, stack_depth: usize },
    Call { addr: i64, depth: usize },
    Return { depth: usize },
}

#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, pc: usize, op: &Opcode, stack_depth: usize, _frame_depth: usize) {
        self.events.push(TraceEvent::Instruction { pc, opcode_name: opcode_name(op), stack_depth });
    }

    fn on_call(&mut self, addr: i64, depth: usize) {
        self.events.push(TraceEvent::Call { addr, depth });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }
}

fn opcode_name(op: &Opcode) -> &'static str {
    match op {
        Opcode::Nop => "nop",
        Opcode::Binop { .. } => "binop",
        Opcode::Unop { .. } => "unop",
        Opcode::Multop { .. } => "multop",
        Opcode::Movs { .. } => "movs",
        Opcode::Cmps { .. } => "cmps",
        Opcode::Addref { .. } => "addref",
        Opcode::Idx { .. } => "idx",
        Opcode::IdxStr => "idxstr",
        Opcode::Ref { .. } => "ref",
        Opcode::RefExt { .. } => "refext",
        Opcode::RefSt { .. } => "refst",
        Opcode::Deref { .. } => "deref",
        Opcode::Pop { .. } => "pop",
        Opcode::Push { .. } => "push",
        Opcode::Call { .. } => "call",
        Opcode::CallExt { .. } => "callext",
        Opcode::Ret => "ret",
        Opcode::Jmp { .. } => "jmp",
        Opcode::Fjmp { .. } => "fjmp",
        Opcode::Tjmp { .. } => "tjmp",
        Opcode::Cvrt { .. } => "cvrt",
        Opcode::Wrt { .. } => "wrt",
        Opcode::Exit => "exit",
    }
}
