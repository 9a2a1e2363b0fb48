//! Declaration lowering: constants, type aliases, variables, external
//! bindings, and procedure/function/method definitions (spec §4.6).

use crate::ast::{ArgDecl, Decl, ProcDef, TypeExpr, VarDecl};
use crate::opcode::{Opcode, OpcodeSequence};
use crate::scope::{AccessModifier, ClassObj, FuncObj, FunctionArg, VarFlags, VarObj};
use crate::types::{RefType, TypeDef, TypeId};

use super::{CgResult, CodeGen, CodegenError, FuncContext};

impl<'a> CodeGen<'a> {
    pub(super) fn compile_decl(&mut self, decl: &Decl) -> CgResult<OpcodeSequence> {
        match decl {
            Decl::Const { name, value } => {
                self.declare_const(name, value)?;
                Ok(OpcodeSequence::new())
            }
            Decl::TypeDef { name, ty } => {
                self.declare_named_type(name, ty)?;
                Ok(OpcodeSequence::new())
            }
            Decl::Var(v) => {
                self.declare_vars(v, VarFlags::NONE)?;
                Ok(OpcodeSequence::new())
            }
            Decl::ExternalVar(v) => {
                self.declare_vars(v, VarFlags::EXTERNAL)?;
                Ok(OpcodeSequence::new())
            }
            Decl::Proc(p) => {
                if p.body.is_some() {
                    // collected and compiled after all declarations by the caller.
                    Ok(OpcodeSequence::new())
                } else {
                    self.decl_forward_proc(p)?;
                    Ok(OpcodeSequence::new())
                }
            }
        }
    }

    fn declare_const(&mut self, name: &str, value: &crate::ast::Expr) -> CgResult<()> {
        let ty = {
            let resolver = super::expr::ScopeResolver { scopes: self.scopes, scope: self.current_scope };
            let inf = crate::infer::TypeInferencer::new(self.types, &resolver);
            inf.infer(value).map_err(|_| CodegenError::Undeclared(name.to_owned()))?
        };
        let size = self.types.byte_size(ty.ty);
        let var = VarObj {
            name: name.to_ascii_lowercase(),
            name_original: name.to_owned(),
            ty: ty.set_const(true),
            memory_address: self.scopes.get(self.current_scope).next_memory_address(),
            memory_size: size,
            flags: VarFlags::CONST,
            access: AccessModifier::Undefined,
        };
        self.scopes
            .register_var(self.current_scope, var)
            .map_err(|_| CodegenError::InvalidMember(name.to_owned()))
    }

    fn declare_vars(&mut self, v: &VarDecl, flags: VarFlags) -> CgResult<()> {
        let ty = self.resolve_type_expr(&v.ty)?;
        let size = self.types.byte_size(ty);
        for name in &v.names {
            let var = VarObj {
                name: name.to_ascii_lowercase(),
                name_original: name.clone(),
                ty: RefType::new(ty),
                memory_address: self.scopes.get(self.current_scope).next_memory_address(),
                memory_size: size,
                flags,
                access: AccessModifier::Undefined,
            };
            self.scopes
                .register_var(self.current_scope, var)
                .map_err(|_| CodegenError::InvalidMember(name.clone()))?;
        }
        Ok(())
    }

    pub(super) fn decl_forward_proc(&mut self, p: &ProcDef) -> CgResult<()> {
        let (func, _) = self.build_func_obj(p, true)?;
        self.scopes
            .register_func(self.current_scope, func)
            .map_err(|_| CodegenError::InvalidMember(p.name.clone()))
    }

    fn build_func_obj(&mut self, p: &ProcDef, forward: bool) -> CgResult<(FuncObj, Vec<FunctionArg>)> {
        let return_type = match &p.return_type {
            Some(t) => RefType::new(self.resolve_type_expr(t)?),
            None => RefType::new(self.types.undefined_id()),
        };
        let mut args = Vec::new();
        for a in &p.args {
            args.push(self.build_func_arg(a)?);
        }
        let mut flags = VarFlags::NONE;
        if forward {
            flags |= VarFlags::FORWARD;
        }
        if p.is_external {
            flags |= VarFlags::EXTERNAL;
        }
        let full_name = match &p.class_name {
            Some(c) => format!("{c}.{}", p.name),
            None => p.name.clone(),
        };
        Ok((
            FuncObj {
                name: p.name.to_ascii_lowercase(),
                full_name,
                return_type,
                args: args.clone(),
                internal_scope: None,
                flags,
                access: AccessModifier::Undefined,
            },
            args,
        ))
    }

    fn build_func_arg(&mut self, a: &ArgDecl) -> CgResult<FunctionArg> {
        let ty = self.resolve_type_expr(&a.ty)?;
        Ok(FunctionArg {
            name: a.name.to_ascii_lowercase(),
            ty: RefType::new(ty).set_ref(a.by_ref),
            by_ref: a.by_ref,
            default: a.default.clone(),
            array_size_hint: None,
        })
    }

    /// Compiles a defining (non-forward) procedure/function/method: opens
    /// its internal scope, registers `Result` (if it returns a value) then
    /// `self` (if a method) then arguments, compiles the body, closes the
    /// scope, and appends `RET`. The first opcode carries the function's
    /// fully qualified symbolic label (spec §4.6).
    pub(super) fn compile_proc_def(&mut self, p: &ProcDef) -> CgResult<OpcodeSequence> {
        let (mut func, args) = self.build_func_obj(p, false)?;
        let owner_class = p.class_name.as_ref().and_then(|c| self.scopes.find_class(c, self.current_scope).cloned());
        let func_scope = match &owner_class {
            Some(c) => self.scopes.open(c.internal_scope),
            None => self.scopes.open(self.current_scope),
        };

        // A method call's `self` pointer is pushed by the caller (the
        // with-object/self-fallback resolution in `compile_primary`)
        // *before* `compile_call` pushes the result slot, so `self` must sit
        // at the lowest offset here too — Result, if any, comes after it.
        let mut offset: i64 = 0;
        if let Some(class) = &owner_class {
            let self_size = 1;
            self.scopes
                .register_var(
                    func_scope,
                    VarObj {
                        name: "self".into(),
                        name_original: "self".into(),
                        ty: RefType::new(class.ty).set_ref(true),
                        memory_address: offset,
                        memory_size: self_size,
                        flags: VarFlags::NONE,
                        access: AccessModifier::Undefined,
                    },
                )
                .map_err(|_| CodegenError::InvalidMember("self".into()))?;
            offset += self_size;
        }

        let result_ty = if !self.types.get(func.return_type.ty).is_undefined() {
            let size = self.types.byte_size(func.return_type.ty);
            self.scopes
                .register_var(
                    func_scope,
                    VarObj {
                        name: "result".into(),
                        name_original: "Result".into(),
                        ty: func.return_type,
                        memory_address: offset,
                        memory_size: size,
                        flags: VarFlags::NONE,
                        access: AccessModifier::Undefined,
                    },
                )
                .map_err(|_| CodegenError::InvalidMember("Result".into()))?;
            offset += size;
            Some(func.return_type)
        } else {
            None
        };

        for arg in &args {
            let size = if arg.by_ref { 1 } else { self.types.byte_size(arg.ty.ty) };
            self.scopes
                .register_var(
                    func_scope,
                    VarObj {
                        name: arg.name.clone(),
                        name_original: arg.name.clone(),
                        ty: arg.ty,
                        memory_address: offset,
                        memory_size: size,
                        flags: VarFlags::NONE,
                        access: AccessModifier::Undefined,
                    },
                )
                .map_err(|_| CodegenError::InvalidMember(arg.name.clone()))?;
            offset += size;
        }

        func.internal_scope = Some(func_scope);
        let register_scope = owner_class.as_ref().map(|c| c.internal_scope).unwrap_or(self.current_scope);
        self.scopes
            .register_func(register_scope, func.clone())
            .map_err(|_| CodegenError::InvalidMember(p.name.clone()))?;

        let prev_scope = self.current_scope;
        let prev_depth = self.frame_depth;
        let prev_self_class = self.self_class.take();
        self.current_scope = func_scope;
        self.frame_depth = 1;
        self.self_class = owner_class;
        self.func_stack.push(FuncContext { scope: func_scope, result_ty });

        let mut seq = OpcodeSequence::new();
        let body = p.body.as_ref().expect("defining proc must have a body");
        let compiled = self.compile_block(body)?;
        seq.emit_labeled(Opcode::Nop, func.full_name.clone());
        seq.append(compiled);
        seq.emit(Opcode::Ret);

        self.func_stack.pop();
        self.current_scope = prev_scope;
        self.frame_depth = prev_depth;
        self.self_class = prev_self_class;
        Ok(seq)
    }

    /// `type Name = ...;` — for classes this registers the `TypeDef`, a
    /// `ClassObj` in the current scope, and every method's signature
    /// (bodies are queued on `pending_methods` for later compilation).
    pub(super) fn declare_named_type(&mut self, name: &str, ty: &TypeExpr) -> CgResult<TypeId> {
        if let TypeExpr::Class { parent, fields, methods } = ty {
            return self.declare_class(name, parent.as_deref(), fields, methods);
        }
        let id = self.resolve_type_expr(ty)?;
        self.types.set_name_for_type(id, name);
        Ok(id)
    }

    fn declare_class(
        &mut self,
        name: &str,
        parent: Option<&str>,
        fields: &[(Vec<String>, TypeExpr)],
        methods: &[ProcDef],
    ) -> CgResult<TypeId> {
        let parent_class = match parent {
            Some(p) => {
                let class = self
                    .scopes
                    .find_class(p, self.current_scope)
                    .cloned()
                    .ok_or_else(|| CodegenError::UndefinedType(p.to_owned()))?;
                Some(class)
            }
            None => None,
        };
        let mut def = TypeDef::class(parent_class.as_ref().map(|c| c.ty));
        for (names, field_ty) in fields {
            let fid = self.resolve_type_expr(field_ty)?;
            for n in names {
                def.add_field(n, fid);
            }
        }
        let class_id = self.types.register(def, false);
        self.types.set_name_for_type(class_id, name);

        let internal_scope = self.scopes.open_class_scope(self.current_scope, parent_class.map(|c| c.internal_scope));
        self.scopes
            .register_class(
                self.current_scope,
                ClassObj {
                    name: name.to_ascii_lowercase(),
                    ty: class_id,
                    parent: parent.map(str::to_owned),
                    internal_scope,
                    access: AccessModifier::Undefined,
                },
            )
            .map_err(|_| CodegenError::InvalidMember(name.to_owned()))?;

        for m in methods {
            let (func, _) = self.build_func_obj(m, m.body.is_none())?;
            self.scopes.register_func(internal_scope, func).map_err(|_| CodegenError::InvalidMember(m.name.clone()))?;
            if m.body.is_some() {
                let mut owned = m.clone();
                owned.class_name = Some(name.to_owned());
                self.pending_methods.push(owned);
            }
        }
        Ok(class_id)
    }

    pub(super) fn resolve_type_expr(&mut self, ty: &TypeExpr) -> CgResult<TypeId> {
        match ty {
            TypeExpr::Simple(name) => {
                let id = self.types.find_type(name);
                if self.types.get(id).is_undefined() && !name.eq_ignore_ascii_case("__undefined") {
                    return Err(CodegenError::UndefinedType(name.clone()));
                }
                Ok(id)
            }
            TypeExpr::Array { low, high, element } => {
                let lo = self.const_int(low)?;
                let hi = self.const_int(high)?;
                let elem = self.resolve_type_expr(element)?;
                Ok(self.types.register(TypeDef::array(lo, hi, elem), false))
            }
            TypeExpr::Pointer(target) => {
                let target_id = self.resolve_type_expr(target)?;
                Ok(self.types.register(TypeDef::pointer(target_id), false))
            }
            TypeExpr::Class { parent, fields, methods } => {
                let synth = format!("$anon{}", self.fresh_label("class"));
                self.declare_class(&synth, parent.as_deref(), fields, methods)
            }
        }
    }

    fn const_int(&self, e: &crate::ast::Expr) -> CgResult<i64> {
        match e {
            crate::ast::Expr::Literal(crate::ast::Literal::Int(n), _) => Ok(*n),
            _ => Err(CodegenError::NonIntegralDimension),
        }
    }
}
