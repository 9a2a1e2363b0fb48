//! Expression lowering: designator walks go through [`crate::meta::MetaObj`]
//! exactly as the analyzer would, emitting `REF`/`ADDREF`/`IDX`/`DEREF`/
//! `CALL` as each step resolves (spec §4.4, §4.6).

use crate::ast::{Accessor, BinOp as AstBinOp, Expr, Literal, Primary, UnOp as AstUnOp};
use crate::infer::{promote_types, NameResolver};
use crate::meta::{FindFlags, MetaObj};
use crate::opcode::{BinOp, CmpsFlags, Opcode, OpcodeSequence, UnOp};
use crate::scope::ScopeId;
use crate::types::RefType;
use crate::value::ValueCell;

use super::{CgResult, CodeGen, CodegenError};

pub(super) struct ScopeResolver<'a> {
    pub scopes: &'a crate::scope::ScopeTree,
    pub scope: ScopeId,
}

impl NameResolver for ScopeResolver<'_> {
    fn resolve(&self, name: &str) -> Option<RefType> {
        self.scopes.find_var(name, self.scope).map(|v| v.ty)
    }
}

fn map_binop(op: AstBinOp) -> BinOp {
    match op {
        AstBinOp::Plus => BinOp::Plus,
        AstBinOp::Minus => BinOp::Minus,
        AstBinOp::Mul => BinOp::Mul,
        AstBinOp::Div => BinOp::Div,
        AstBinOp::DivR => BinOp::DivR,
        AstBinOp::Mod => BinOp::Mod,
        AstBinOp::AndBin => BinOp::AndBin,
        AstBinOp::OrBin => BinOp::OrBin,
        AstBinOp::XorBin => BinOp::XorBin,
        AstBinOp::Shl => BinOp::Shl,
        AstBinOp::Shr => BinOp::Shr,
        AstBinOp::And => BinOp::And,
        AstBinOp::Or => BinOp::Or,
        AstBinOp::Xor => BinOp::Xor,
        AstBinOp::Lt => BinOp::Lt,
        AstBinOp::Gt => BinOp::Gt,
        AstBinOp::Le => BinOp::Le,
        AstBinOp::Ge => BinOp::Ge,
        AstBinOp::Eq => BinOp::Eq,
        AstBinOp::Ne => BinOp::Ne,
    }
}

impl<'a> CodeGen<'a> {
    /// `as_ref == true` leaves a pointer on the stack (assignment targets,
    /// `var` call arguments, the operand of `@`); otherwise the final
    /// value is left, auto-dereferencing a trailing pointer.
    pub(super) fn compile_expr(&mut self, e: &Expr, as_ref: bool) -> CgResult<(OpcodeSequence, RefType)> {
        match e {
            Expr::Literal(lit, loc) => {
                if as_ref {
                    return Err(CodegenError::AddressFailed);
                }
                let mut seq = OpcodeSequence::new();
                seq.set_loc(*loc);
                let (cell, ty_name) = self.literal_cell(lit);
                let ty = self.types.find_type(ty_name);
                seq.emit_push(cell, 1);
                Ok((seq, RefType::new(ty).set_literal(true)))
            }
            Expr::Primary(p) => self.compile_primary(p, as_ref),
            Expr::Unary { op, expr, loc } => self.compile_unary(*op, expr, *loc),
            Expr::Binary { op, left, right, loc } => self.compile_binary(*op, left, right, *loc),
            Expr::SetLiteral(..) => Err(CodegenError::SetLiteral),
        }
    }

    fn literal_cell(&self, lit: &Literal) -> (ValueCell, &'static str) {
        match lit {
            Literal::Bool(b) => (ValueCell::from_bool(*b), "boolean"),
            Literal::Int(n) => (ValueCell::from_i64(*n), "integer"),
            Literal::Float(f) => (ValueCell::from_f64(*f), "double"),
            Literal::Str(s) => (ValueCell::from_string(s.clone()), "string"),
        }
    }

    fn compile_unary(&mut self, op: AstUnOp, expr: &Expr, loc: crate::diagnostics::CodeLocation) -> CgResult<(OpcodeSequence, RefType)> {
        let (mut seq, ty) = self.compile_expr(expr, false)?;
        seq.set_loc(loc);
        let kind = self.types.get(ty.ty).opcode_type;
        let result_ty = match op {
            AstUnOp::Not => {
                seq.emit(Opcode::Unop { op: UnOp::Not, ty: self.types.get(self.types.find_type("boolean")).opcode_type });
                RefType::new(self.types.find_type("boolean"))
            }
            AstUnOp::Invert => {
                if !self.types.get(ty.ty).is_int() {
                    return Err(CodegenError::NonIntegralDimension);
                }
                seq.emit(Opcode::Unop { op: UnOp::Inv, ty: kind });
                ty
            }
            AstUnOp::Plus => {
                seq.emit(Opcode::Unop { op: UnOp::Plus, ty: kind });
                ty
            }
            AstUnOp::Minus => {
                seq.emit(Opcode::Unop { op: UnOp::Minus, ty: kind });
                ty
            }
        };
        Ok((seq, result_ty.set_literal(ty.is_literal)))
    }

    fn compile_binary(
        &mut self,
        op: AstBinOp,
        left: &Expr,
        right: &Expr,
        loc: crate::diagnostics::CodeLocation,
    ) -> CgResult<(OpcodeSequence, RefType)> {
        let (mut lseq, lt) = self.compile_expr(left, false)?;
        let (rseq, rt) = self.compile_expr(right, false)?;
        if matches!(op, AstBinOp::Div | AstBinOp::Mod) {
            let (lk, rk) = (self.types.get(lt.ty).opcode_type, self.types.get(rt.ty).opcode_type);
            if !lk.is_int() || !rk.is_int() {
                return Err(CodegenError::NonIntegralDimension);
            }
        }
        lseq.append(rseq);
        lseq.set_loc(loc);
        let common = promote_types(self.types, lt.ty, rt.ty);
        let kind = self.types.get(common).opcode_type;
        let literal = lt.is_literal && rt.is_literal;
        if matches!(op, AstBinOp::Eq | AstBinOp::Ne) {
            // Equality goes through CMPS rather than BINOP because it is
            // the one comparison that must work elementwise on records and
            // strings, not just scalars.
            let not = matches!(op, AstBinOp::Ne);
            let flags = if not { CmpsFlags::NOT } else { CmpsFlags::NONE };
            lseq.emit(Opcode::Cmps { flags, size: 1, ty: kind });
            Ok((lseq, RefType::new(self.types.find_type("boolean")).set_literal(literal)))
        } else if op.is_comparison() {
            lseq.emit(Opcode::Binop { op: map_binop(op), ty: kind });
            Ok((lseq, RefType::new(self.types.find_type("boolean")).set_literal(literal)))
        } else {
            lseq.emit(Opcode::Binop { op: map_binop(op), ty: kind });
            Ok((lseq, RefType::new(common).set_literal(literal)))
        }
    }

    fn compile_primary(&mut self, p: &Primary, as_ref: bool) -> CgResult<(OpcodeSequence, RefType)> {
        let mut seq = OpcodeSequence::new();
        seq.set_loc(p.loc);
        let mut meta = MetaObj::new();

        let mut resolved = false;
        if let Some(with) = self.with_stack.last().cloned() {
            meta.wrapper_class = with.class.clone();
            if meta.find_field(&p.ident, self.types, self.scopes) || meta.find_method(&p.ident, self.types, self.scopes) {
                seq.append(with.prefix.clone());
                if meta.field_offset >= 0 {
                    seq.emit_addref(meta.field_offset);
                }
                resolved = true;
            }
        }

        if !resolved {
            let found = meta.find_any(&p.ident, FindFlags::VARIABLE | FindFlags::FUNCTION, self.current_scope, self.types, self.scopes);
            if found {
                match meta.kind {
                    crate::meta::MetaKind::Var => {
                        let v = meta.var.clone().unwrap();
                        if v.is_external() {
                            let size = self.types.byte_size(v.ty.ty);
                            let (idx, _) = self.external_vars.insert_full(v.name_original.clone(), size);
                            seq.emit(Opcode::RefExt { n: idx as i64, size });
                        } else {
                            let scope_level = if self.in_function() { 1 } else { 0 };
                            let size = self.types.byte_size(v.ty.ty);
                            // A `var` parameter (and `self`) stores the caller's pointer
                            // in its own slot rather than the value itself, so resolving
                            // it has to follow that stored pointer, not address the slot.
                            seq.emit(Opcode::Ref { n: v.memory_address, scope_level, size, auto_deref: v.ty.is_ref });
                        }
                    }
                    crate::meta::MetaKind::Func | crate::meta::MetaKind::Method => {
                        // No opcode yet; resolved at the Call accessor.
                    }
                    _ => return Err(CodegenError::Undeclared(p.ident.clone())),
                }
            } else {
                let mut via_self = false;
                if let Some(class) = self.self_class.clone() {
                    let mut self_meta = MetaObj::new();
                    self_meta.wrapper_class = Some(class);
                    let via_field = self_meta.find_field(&p.ident, self.types, self.scopes);
                    let via_method = !via_field && self_meta.find_method(&p.ident, self.types, self.scopes);
                    if via_field || via_method {
                        if let Some(self_var) = self.scopes.find_var("self", self.current_scope).cloned() {
                            let scope_level = if self.in_function() { 1 } else { 0 };
                            // `self`'s own slot holds the caller's pointer to the
                            // instance, so this has to land on that pointer's target,
                            // not on the slot — same reasoning as the `var` case above.
                            seq.emit(Opcode::Ref { n: self_var.memory_address, scope_level, size: 1, auto_deref: true });
                            if self_meta.field_offset >= 0 {
                                seq.emit_addref(self_meta.field_offset);
                            }
                            meta = self_meta;
                            via_self = true;
                        }
                    }
                }
                if !via_self {
                    self.messages.error(p.loc, format!("undeclared symbol: {}", p.ident));
                    return Err(CodegenError::Undeclared(p.ident.clone()));
                }
            }
        }

        for (i, acc) in p.accessors.iter().enumerate() {
            let is_last = i + 1 == p.accessors.len();
            self.compile_accessor(&mut seq, &mut meta, acc, is_last && as_ref)?;
        }

        // `is_ref` tracks whether the stack currently holds a pointer that
        // still needs resolving to its value; a call result or an `@`
        // address is already the value we want and carries `is_ref =
        // false` (see `MetaObj::do_call`/`do_address`).
        if !as_ref && meta.is_ref && meta.is_refable() {
            let size = self.types.byte_size(meta.ty(self.types).ty);
            seq.emit(Opcode::Deref { size });
        }
        Ok((seq, meta.ty(self.types)))
    }

    fn compile_accessor(&mut self, seq: &mut OpcodeSequence, meta: &mut MetaObj, acc: &Accessor, keep_ref: bool) -> CgResult<()> {
        match acc {
            Accessor::Field(name) => {
                if !meta.do_access() {
                    return Err(CodegenError::InvalidMember(name.clone()));
                }
                if meta.find_field(name, self.types, self.scopes) {
                    seq.emit_addref(meta.field_offset);
                    Ok(())
                } else if meta.find_method(name, self.types, self.scopes) {
                    // The receiver pointer is already on the stack from
                    // resolving the primary/earlier accessors; a direct
                    // `obj.Method()` call needs nothing more pushed here.
                    Ok(())
                } else {
                    Err(CodegenError::InvalidMember(name.clone()))
                }
            }
            Accessor::Index(exprs) => {
                for e in exprs {
                    let (sub, idx_ty) = self.compile_expr(e, false)?;
                    if !self.types.get(idx_ty.ty).is_int() && !self.types.get(idx_ty.ty).is_boolean() {
                        return Err(CodegenError::NonIntegralDimension);
                    }
                    seq.append(sub);
                    let elem_size = meta
                        .ty(self.types)
                        .ty
                        .pipe(|t| self.types.get(t).children.first().copied())
                        .map(|child| self.types.byte_size(child))
                        .unwrap_or(1);
                    let low = self.types.get(meta.ty(self.types).ty).array_low;
                    match meta.do_index(self.types, self.scopes) {
                        Some(true) => seq.emit(Opcode::Idx { elem_size, low }),
                        _ => return Err(CodegenError::NotIndexable),
                    };
                }
                Ok(())
            }
            Accessor::Deref => {
                if !meta.is_refable() {
                    return Err(CodegenError::DerefFailed);
                }
                let size = self.types.byte_size(meta.ty(self.types).ty);
                seq.emit(Opcode::Deref { size });
                if !meta.do_deref(self.types, self.scopes) {
                    return Err(CodegenError::DerefFailed);
                }
                Ok(())
            }
            Accessor::AddressOf => {
                if !meta.do_address(self.types, self.scopes) {
                    return Err(CodegenError::AddressFailed);
                }
                let _ = keep_ref;
                Ok(())
            }
            Accessor::Call(args) => self.compile_call(seq, meta, args),
        }
    }

    fn compile_call(&mut self, seq: &mut OpcodeSequence, meta: &mut MetaObj, args: &[crate::ast::CallArg]) -> CgResult<()> {
        let func = meta.func.clone().ok_or(CodegenError::NotCallable)?;
        if args.len() != func.args.len() {
            return Err(CodegenError::ParamCountMismatch { expected: func.args.len(), found: args.len() });
        }
        let ret_size = if self.types.get(func.return_type.ty).is_undefined() { 0 } else { self.types.byte_size(func.return_type.ty) };
        if ret_size > 0 {
            seq.emit_push(ValueCell::default(), ret_size);
        }
        // A method call already has its `self` pointer sitting on the stack
        // below these arguments (pushed by the with-object/self-fallback
        // resolution in `compile_primary`), so the frame's `arg_size` must
        // count that cell too or `CALL`'s bottom-address math lands one
        // short and every `self`-relative `REF` inside the body misreads.
        let self_size = if matches!(meta.kind, crate::meta::MetaKind::Method) { 1i64 } else { 0i64 };
        let mut arg_size = self_size;
        for (call_arg, decl_arg) in args.iter().zip(func.args.iter()) {
            let (sub, _) = self.compile_expr(&call_arg.value, decl_arg.by_ref)?;
            seq.append(sub);
            arg_size += if decl_arg.by_ref { 1 } else { self.types.byte_size(decl_arg.ty.ty) };
        }
        seq.set_loc(seq.ops().last().map(|o| o.loc).unwrap_or_default());
        if func.internal_scope.is_some() {
            seq.emit_goto(Opcode::Call { addr: 0, arg_size, ret_size, scope_level: 1, self_size }, func.full_name.clone());
        } else {
            seq.emit_goto(Opcode::CallExt { addr: 0, arg_size, ret_size }, func.name.clone());
        }
        meta.do_call(self.types, self.scopes);
        Ok(())
    }
}

trait Pipe: Sized {
    fn pipe<R>(self, f: impl FnOnce(Self) -> R) -> R {
        f(self)
    }
}
impl<T> Pipe for T {}
