//! Code generator: lowers `ast::Program` into an `OpcodeSequence` (spec
//! §4.6), grounded in the original's `CodeGenerator.h`/`.cpp`.
//!
//! Two-phase label resolution (spec §4.6, §9): opcodes are emitted with
//! string labels (`symbol_label`/`goto_label`); [`CodeGen::finish`] walks
//! the finished sequence once to record label addresses and once more
//! to patch `CALL`/`CALLEXT` targets.

mod decl;
mod expr;
mod stmt;

use indexmap::IndexMap;

use crate::ast::Program;
use crate::diagnostics::{CodeLocation, CodeMessages};
use crate::opcode::{Opcode, OpcodeSequence};
use crate::scope::{ClassObj, ScopeId, ScopeTree, ROOT_SCOPE};
use crate::types::{RefType, TypeModel};

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("undeclared symbol: {0}")]
    Undeclared(String),
    #[error("only functions can be called")]
    NotCallable,
    #[error("only arrays and strings can be indexed")]
    NotIndexable,
    #[error("failed to dereference")]
    DerefFailed,
    #[error("failed to take address")]
    AddressFailed,
    #[error("invalid member: {0}")]
    InvalidMember(String),
    #[error("parameter count mismatch: expected {expected}, found {found}")]
    ParamCountMismatch { expected: usize, found: usize },
    #[error("assignment to constant")]
    AssignToConst,
    #[error("left side must be reference")]
    LeftMustBeRef,
    #[error("condition should be boolean")]
    ConditionNotBoolean,
    #[error("undefined type: {0}")]
    UndefinedType(String),
    #[error("arrays should have integral dimension")]
    NonIntegralDimension,
    #[error("set literals are not supported")]
    SetLiteral,
    #[error("goto/labeled statements are not implemented")]
    GotoUnimplemented,
    #[error("try/except/finally has no bytecode form")]
    TryUnimplemented,
    #[error("unresolved function: {0}")]
    UnresolvedFunction(String),
    #[error("break/continue outside of a loop")]
    LoopControlOutsideLoop,
}

pub type CgResult<T> = Result<T, CodegenError>;

/// The `with E do S` pushdown context (spec §4.6, §9): the compiled
/// prefix that reconstructs `E`'s pointer, plus the class it resolves
/// free identifiers against.
#[derive(Debug, Clone)]
pub struct CodeBlockInfo {
    pub prefix: OpcodeSequence,
    pub ty: RefType,
    pub class: Option<ClassObj>,
}

struct FuncContext {
    #[allow(dead_code)]
    scope: ScopeId,
    result_ty: Option<RefType>,
}

pub struct CodeGen<'a> {
    pub types: &'a mut TypeModel,
    pub scopes: &'a mut ScopeTree,
    pub messages: &'a mut CodeMessages,
    /// 0 at program scope; 1 inside any function/method body. The
    /// language has no nested procedures, so two levels suffice (spec
    /// §4.8's `REF n,scope_level,size`).
    frame_depth: i32,
    current_scope: ScopeId,
    func_stack: Vec<FuncContext>,
    /// The owner class of the method currently being compiled, if any —
    /// lets a bare identifier inside a method body fall back to an
    /// implicit `self.` field/method access.
    self_class: Option<ClassObj>,
    with_stack: Vec<CodeBlockInfo>,
    /// `(break_label, continue_label)` of the loop currently being
    /// compiled, innermost last.
    loop_stack: Vec<(String, String)>,
    /// Externally bound functions in first-reference order; index becomes
    /// `CALLEXT`'s `addr` and the VM's `func_table` position.
    pub externals: IndexMap<String, ()>,
    /// Externally bound variables in first-reference order; index becomes
    /// `REFEXT`'s `n` and the VM's bound-variable slot. The value is the
    /// variable's declared cell count, so the VM can allocate a
    /// contiguous, element-addressable region per variable.
    pub external_vars: IndexMap<String, i64>,
    label_counter: u32,
    /// Method bodies queued by `declare_class` while walking `type`
    /// declarations, compiled after every top-level declaration has run.
    pending_methods: Vec<crate::ast::ProcDef>,
}

impl<'a> CodeGen<'a> {
    pub fn new(types: &'a mut TypeModel, scopes: &'a mut ScopeTree, messages: &'a mut CodeMessages) -> Self {
        Self {
            types,
            scopes,
            messages,
            frame_depth: 0,
            current_scope: ROOT_SCOPE,
            func_stack: Vec::new(),
            self_class: None,
            with_stack: Vec::new(),
            loop_stack: Vec::new(),
            externals: IndexMap::new(),
            external_vars: IndexMap::new(),
            label_counter: 0,
            pending_methods: Vec::new(),
        }
    }

    fn fresh_label(&mut self, hint: &str) -> String {
        self.label_counter += 1;
        format!("__{hint}{}", self.label_counter)
    }

    fn in_function(&self) -> bool {
        !self.func_stack.is_empty()
    }

    fn result_type(&self) -> Option<RefType> {
        self.func_stack.last().and_then(|f| f.result_ty)
    }

    /// Compiles an entire program: declarations then the top-level
    /// statement block, terminated by `EXIT`.
    pub fn compile_program(&mut self, program: &Program) -> CgResult<OpcodeSequence> {
        let mut seq = OpcodeSequence::new();
        let mut functions = Vec::new();
        for decl in &program.decls {
            if let crate::ast::Decl::Proc(p) = decl {
                if p.body.is_some() {
                    functions.push(p);
                    continue;
                }
            }
            let frag = self.compile_decl(decl)?;
            seq.append(frag);
        }
        for p in &program.decls {
            if let crate::ast::Decl::Proc(p) = p {
                if p.is_forward || p.is_external {
                    self.decl_forward_proc(p)?;
                }
            }
        }
        for p in functions {
            let frag = self.compile_proc_def(p)?;
            seq.append(frag);
        }
        let methods = std::mem::take(&mut self.pending_methods);
        for m in &methods {
            let frag = self.compile_proc_def(m)?;
            seq.append(frag);
        }
        let body = self.compile_block(&program.body)?;
        seq.append(body);
        seq.emit(Opcode::Exit);
        self.finish(&mut seq)?;
        Ok(seq)
    }

    /// Resolves `symbol_label`/`goto_label` pairs left by emission (spec
    /// §4.6, §9). Internal `CALL`s and every structured-control-flow jump
    /// (`JMP`/`FJMP`/`TJMP`) are patched to an absolute opcode index;
    /// `CALLEXT`s to an index into `externals`. Jump targets are resolved
    /// here rather than at the point of emission because a loop or
    /// conditional's body is built bottom-up, before the fragment's final
    /// position in the program is known — the same reason `CALL` already
    /// needs two passes.
    fn finish(&mut self, seq: &mut OpcodeSequence) -> CgResult<()> {
        let mut addresses: IndexMap<String, i64> = IndexMap::new();
        for (i, instr) in seq.ops().iter().enumerate() {
            if let Some(label) = &instr.symbol_label {
                addresses.insert(label.clone(), i as i64);
            }
        }
        let ops = seq.ops_mut();
        for instr in ops.iter_mut() {
            let Some(label) = instr.goto_label.take() else { continue };
            match &mut instr.op {
                Opcode::Call { addr, .. } => match addresses.get(&label) {
                    Some(a) => *addr = *a,
                    None => return Err(CodegenError::UnresolvedFunction(label)),
                },
                Opcode::CallExt { addr, .. } => {
                    let idx = self.externals.get_index_of(&label).unwrap_or_else(|| {
                        self.externals.insert(label.clone(), ());
                        self.externals.len() - 1
                    });
                    *addr = idx as i64;
                }
                Opcode::Jmp { offset } | Opcode::Fjmp { offset } | Opcode::Tjmp { offset } => match addresses.get(&label) {
                    Some(a) => *offset = *a,
                    None => return Err(CodegenError::UnresolvedFunction(label)),
                },
                _ => {}
            }
        }
        Ok(())
    }
}
