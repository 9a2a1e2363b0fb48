//! `Opcode` and `OpcodeSequence` — the linear bytecode emitted by codegen
//! (spec §4.7, §4.8).

use crate::diagnostics::CodeLocation;
use crate::scope::ScopeId;
use crate::value::{Kind, ValueCell};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MovsFlags: u8 {
        const NONE          = 0;
        const LEFT_IS_REF   = 0x01;
        const RIGHT_IS_REF  = 0x02;
        const ADDRESS       = 0x04;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmpsFlags: u8 {
        const NONE          = 0;
        const LEFT_IS_REF   = 0x01;
        const RIGHT_IS_REF  = 0x02;
        const NOT           = 0x04;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Plus,
    Minus,
    Mod,
    Mul,
    Div,
    DivR,
    AndBin,
    Shl,
    Shr,
    OrBin,
    XorBin,
    And,
    AndLog,
    Or,
    OrLog,
    Xor,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
    Not,
    Inv,
    Inc,
    Dec,
}

/// The VM's stack-oriented opcode set (spec §4.8).
#[derive(Debug, Clone)]
pub enum Opcode {
    Nop,
    Binop { op: BinOp, ty: Kind },
    Unop { op: UnOp, ty: Kind },
    Multop { op: BinOp, ty: Kind, count: i32 },
    Movs { flags: MovsFlags, size: i32 },
    Cmps { flags: CmpsFlags, size: i32, ty: Kind },
    Addref { delta: i64 },
    Idx { elem_size: i64, low: i64 },
    IdxStr,
    /// `n, scope_level, size[, auto_deref]`.
    Ref { n: i64, scope_level: i32, size: i64, auto_deref: bool },
    /// `n` indexes the bound external variable; `size` is its declared
    /// cell count, so the pointer this builds spans the whole variable
    /// (an element index then narrows it, same as `REF`/`REFST`).
    RefExt { n: i64, size: i64 },
    RefSt { size: i64 },
    Deref { size: i64 },
    Pop { n: i64 },
    Push { value: ValueCell, count: i64 },
    /// `self_size` is 1 for a method call (the receiver pointer sits below
    /// the result slot) and 0 otherwise; `RET` uses it to find the result.
    Call { addr: i64, arg_size: i64, ret_size: i64, scope_level: i32, self_size: i64 },
    CallExt { addr: i64, arg_size: i64, ret_size: i64 },
    Ret,
    Jmp { offset: i64 },
    Fjmp { offset: i64 },
    Tjmp { offset: i64 },
    Cvrt { kind: Kind },
    Wrt { size: i64, end_line: bool },
    Exit,
}

/// One emitted opcode plus its source location, owning scope, and optional
/// symbolic labels used for two-pass resolution (spec §4.6, §4.7).
#[derive(Debug, Clone)]
pub struct OpInstr {
    pub op: Opcode,
    pub loc: CodeLocation,
    pub scope: Option<ScopeId>,
    /// This address is the definition site of `symbol_label`.
    pub symbol_label: Option<String>,
    /// This opcode references the address defined by `goto_label`.
    pub goto_label: Option<String>,
}

/// An ordered, mutable list of opcodes emitted by the code generator.
#[derive(Debug, Clone, Default)]
pub struct OpcodeSequence {
    ops: Vec<OpInstr>,
    loc: CodeLocation,
    scope: Option<ScopeId>,
}

impl OpcodeSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[OpInstr] {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut [OpInstr] {
        &mut self.ops
    }

    pub fn into_ops(self) -> Vec<OpInstr> {
        self.ops
    }

    pub fn set_loc(&mut self, loc: CodeLocation) {
        self.loc = loc;
    }

    pub fn set_scope(&mut self, scope: ScopeId) {
        self.scope = Some(scope);
    }

    pub fn emit(&mut self, op: Opcode) -> &mut OpInstr {
        self.ops.push(OpInstr { op, loc: self.loc, scope: self.scope, symbol_label: None, goto_label: None });
        self.ops.last_mut().unwrap()
    }

    pub fn emit_labeled(&mut self, op: Opcode, symbol_label: impl Into<String>) {
        let instr = self.emit(op);
        instr.symbol_label = Some(symbol_label.into());
    }

    pub fn emit_goto(&mut self, op: Opcode, goto_label: impl Into<String>) {
        let instr = self.emit(op);
        instr.goto_label = Some(goto_label.into());
    }

    /// `emit_addref(delta)` — coalesces into a preceding `ADDREF` rather
    /// than appending a new opcode (spec §4.7, and the coalescing
    /// invariant of spec §8).
    pub fn emit_addref(&mut self, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(last) = self.ops.last_mut() {
            if let Opcode::Addref { delta: d } = &mut last.op {
                *d += delta;
                return;
            }
        }
        self.emit(Opcode::Addref { delta });
    }

    pub fn emit_push(&mut self, value: ValueCell, count: i64) {
        self.emit(Opcode::Push { value, count });
    }

    /// Prepends `size` worth of code (an already-built sub-sequence) before
    /// the current contents.
    pub fn prepend(&mut self, mut other: OpcodeSequence) {
        other.ops.append(&mut self.ops);
        self.ops = other.ops;
    }

    pub fn append(&mut self, mut other: OpcodeSequence) {
        self.ops.append(&mut other.ops);
    }

    /// Rewrites every `Jmp { offset: 0 }` tagged with the `__break` label
    /// to jump `jmp_offset` instructions forward.
    pub fn replace_break(&mut self, jmp_offset: i64) {
        self.replace_labelled_jump("__break", jmp_offset);
    }

    pub fn replace_continue(&mut self, jmp_offset: i64) {
        self.replace_labelled_jump("__continue", jmp_offset);
    }

    fn replace_labelled_jump(&mut self, label: &str, offset: i64) {
        for instr in &mut self.ops {
            if instr.goto_label.as_deref() == Some(label) {
                if let Opcode::Jmp { offset: o } = &mut instr.op {
                    *o = offset;
                }
                instr.goto_label = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_addref_coalesce() {
        let mut seq = OpcodeSequence::new();
        seq.emit_addref(1);
        seq.emit_addref(2);
        assert_eq!(seq.len(), 1);
        if let Opcode::Addref { delta } = seq.ops()[0].op {
            assert_eq!(delta, 3);
        } else {
            panic!("expected addref");
        }
    }

    #[test]
    fn addref_does_not_coalesce_across_other_opcodes() {
        let mut seq = OpcodeSequence::new();
        seq.emit_addref(1);
        seq.emit(Opcode::Nop);
        seq.emit_addref(2);
        assert_eq!(seq.len(), 3);
    }
}
