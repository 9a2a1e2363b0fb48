//! `MetaObj` — the transient analyzer cursor that walks a designator
//! `a.b[i].m()`, applying field/index/deref/call steps (spec §4.4).
//!
//! Unlike the original, `MetaObj` holds no back-pointer to the symbol
//! table; every method that needs to resolve a name takes the
//! `TypeModel`/`ScopeTree` explicitly, plus the `ScopeId` a lookup should
//! start from. This keeps the cursor a plain value type.

use crate::scope::{ClassObj, FuncObj, ScopeId, ScopeTree, VarObj};
use crate::types::{Category, TypeDef, TypeId, TypeModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    None,
    Var,
    Func,
    Method,
    FuncRetainVar,
    UnnamedVar,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FindFlags: u32 {
        const VARIABLE      = 1 << 1;
        const FUNCTION      = 1 << 2;
        const FIELD         = 1 << 3;
        const METHOD        = 1 << 4;
        const METHOD_RETAIN = 1 << 5;
        const ALL_GLOBAL = Self::VARIABLE.bits() | Self::FUNCTION.bits() | Self::FIELD.bits()
            | Self::METHOD.bits() | Self::METHOD_RETAIN.bits();
        const ALL_OBJECT = Self::FIELD.bits() | Self::METHOD.bits() | Self::METHOD_RETAIN.bits();
    }
}

use crate::types::RefType;

#[derive(Debug, Clone)]
pub struct MetaObj {
    pub kind: MetaKind,
    pub wrapper_class_prev: Option<ClassObj>,
    pub wrapper_class: Option<ClassObj>,
    pub object_class: Option<ClassObj>,
    pub field_offset: i64,
    pub low: i64,
    pub is_ref: bool,
    pub call_done: bool,
    pub var: Option<VarObj>,
    pub func: Option<FuncObj>,
    pub unnamed_type: RefType,
}

impl Default for MetaObj {
    fn default() -> Self {
        Self {
            kind: MetaKind::None,
            wrapper_class_prev: None,
            wrapper_class: None,
            object_class: None,
            field_offset: -1,
            low: 0,
            is_ref: true,
            call_done: false,
            var: None,
            func: None,
            unnamed_type: RefType::new(crate::types::UNDEFINED_TYPE),
        }
    }
}

impl MetaObj {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, MetaKind::Func | MetaKind::Method)
    }

    pub fn is_refable(&self) -> bool {
        matches!(self.kind, MetaKind::FuncRetainVar | MetaKind::Var | MetaKind::UnnamedVar)
    }

    pub fn ty(&self, types: &TypeModel) -> RefType {
        match self.kind {
            MetaKind::Var => {
                let v = self.var.as_ref().expect("var kind without VarObj");
                RefType::new(v.ty.ty).set_const(v.ty.is_const).set_ref(self.is_ref)
            }
            MetaKind::UnnamedVar | MetaKind::FuncRetainVar => self.unnamed_type.set_ref(self.is_ref),
            MetaKind::Func | MetaKind::Method => {
                let f = self.func.as_ref().expect("func kind without FuncObj");
                f.return_type.set_ref(self.is_ref)
            }
            MetaKind::None => RefType::new(types.undefined_id()),
        }
    }

    pub fn set_class_obj(&mut self, class_obj: Option<ClassObj>, scopes: &ScopeTree, current_scope: ScopeId) {
        self.wrapper_class = class_obj;
        if self.wrapper_class.is_some() {
            self.var = scopes.find_var("self", current_scope).cloned();
        }
    }

    pub fn set_var_obj(&mut self, var: Option<VarObj>, types: &TypeModel, scopes: &ScopeTree) -> bool {
        match var {
            Some(v) => {
                self.var = Some(v);
                self.kind = MetaKind::Var;
                self.determine_class(types, scopes);
                true
            }
            None => {
                self.kind = MetaKind::None;
                false
            }
        }
    }

    pub fn set_func_obj(
        &mut self,
        func: Option<FuncObj>,
        is_method: bool,
        types: &TypeModel,
        scopes: &ScopeTree,
    ) -> bool {
        match func {
            Some(f) => {
                self.func = Some(f);
                self.kind = if is_method { MetaKind::Method } else { MetaKind::Func };
                self.call_done = false;
                self.determine_class(types, scopes);
                true
            }
            None => {
                self.kind = MetaKind::None;
                false
            }
        }
    }

    pub fn set_unnamed_object(&mut self, obj: Option<TypeId>, types: &TypeModel, scopes: &ScopeTree) -> bool {
        let Some(obj) = obj else { return false };
        if types.get(obj).is_undefined() {
            return false;
        }
        self.unnamed_type.ty = obj;
        self.kind = MetaKind::UnnamedVar;
        self.determine_class(types, scopes);
        true
    }

    fn determine_class(&mut self, types: &TypeModel, scopes: &ScopeTree) {
        self.object_class = None;
        let t = self.ty(types);
        let td = types.get(t.ty);
        if !td.is_undefined() && td.is_class() {
            self.object_class = find_class_by_alias(types, scopes, &td.alias);
        }
    }

    /// `find_field(name)` — looks up a field on the current wrapper class.
    pub fn find_field(&mut self, name: &str, types: &TypeModel, scopes: &ScopeTree) -> bool {
        let Some(wrapper) = self.wrapper_class.clone() else { return false };
        let field_ty = types.find_field(wrapper.ty, name);
        if self.set_unnamed_object(field_ty, types, scopes) {
            self.field_offset = types.get_offset(wrapper.ty, name).unwrap_or(0);
            true
        } else {
            false
        }
    }

    pub fn find_method(&mut self, name: &str, types: &TypeModel, scopes: &ScopeTree) -> bool {
        let Some(wrapper) = self.wrapper_class.clone() else { return false };
        let func = scopes.find_func(name, wrapper.internal_scope).cloned();
        self.set_func_obj(func, true, types, scopes)
    }

    pub fn find_variable(&mut self, name: &str, scope: ScopeId, types: &TypeModel, scopes: &ScopeTree) -> bool {
        let var = scopes.find_var(name, scope).cloned();
        self.set_var_obj(var, types, scopes)
    }

    pub fn find_function(&mut self, name: &str, scope: ScopeId, types: &TypeModel, scopes: &ScopeTree) -> bool {
        let func = scopes.find_func(name, scope).cloned();
        self.set_func_obj(func, false, types, scopes)
    }

    /// `find_method_retain` — resolves `<enclosing-func-name>.<name>`
    /// against the class wrapping the *previous* step of the walk, used
    /// for retained locals of a method (`Result`-style binding).
    pub fn find_method_retain(&mut self, name: &str, types: &TypeModel, scopes: &ScopeTree) -> bool {
        let Some(func) = self.func.clone() else { return false };
        let field_name = format!("{}.{}", func.name, name);
        if self.find_field(&field_name, types, scopes) {
            return true;
        }
        if let Some(prev) = self.wrapper_class_prev.clone() {
            let field_ty = types.find_field(prev.ty, &field_name);
            if self.set_unnamed_object(field_ty, types, scopes) {
                self.field_offset = types.get_offset(prev.ty, &field_name).unwrap_or(0);
                return true;
            }
        }
        false
    }

    /// **access** — requires the current type to be a class; shifts the
    /// wrapper down one level.
    pub fn do_access(&mut self) -> bool {
        if matches!(self.kind, MetaKind::None | MetaKind::Func) {
            return false;
        }
        self.field_offset = 0;
        self.wrapper_class_prev = self.wrapper_class.take();
        self.wrapper_class = self.object_class.take();
        true
    }

    /// **deref** — requires exactly one child type (Pointer or
    /// single-element Array); new type is the child.
    pub fn do_deref(&mut self, types: &TypeModel, scopes: &ScopeTree) -> bool {
        let t = self.ty(types);
        let td = types.get(t.ty);
        if td.children.len() != 1 {
            return false;
        }
        self.low = 0;
        let child = td.children[0];
        self.set_unnamed_object(Some(child), types, scopes)
    }

    /// **address-of** — requires a non-literal lvalue.
    pub fn do_address(&mut self, types: &mut TypeModel, scopes: &ScopeTree) -> bool {
        let t = self.ty(types);
        if t.is_literal {
            return false;
        }
        let new_ty = types.register(TypeDef::pointer(t.ty), false);
        self.is_ref = false;
        self.set_unnamed_object(Some(new_ty), types, scopes)
    }

    /// **index** — Array current type: one expression per dimension
    /// handled by the caller (codegen emits index exprs then this adjusts
    /// the element bookkeeping); here we just validate/advance the type.
    pub fn do_index(&mut self, types: &TypeModel, scopes: &ScopeTree) -> Option<bool> {
        let t = self.ty(types);
        let td_before = types.get(t.ty).clone();
        if !self.do_deref(types, scopes) {
            return None;
        }
        if td_before.category != Category::Array {
            return Some(false);
        }
        self.low = td_before.array_low;
        Some(true)
    }

    /// **string index** — Scalar `string` current type.
    pub fn do_index_str(&mut self, types: &TypeModel, scopes: &ScopeTree) -> bool {
        let t = self.ty(types);
        let td = types.get(t.ty);
        if td.category != Category::Scalar || td.opcode_type != crate::value::Kind::Str {
            return false;
        }
        let ch = types.find_type("__string_char");
        self.set_unnamed_object(Some(ch), types, scopes)
    }

    /// **call** — marks the call as done and rebinds the cursor to the
    /// function's return type.
    pub fn do_call(&mut self, types: &TypeModel, scopes: &ScopeTree) -> bool {
        self.call_done = true;
        self.is_ref = false;
        let ret = self.func.as_ref().map(|f| f.return_type.ty);
        self.set_unnamed_object(ret, types, scopes)
    }

    pub fn find_any(
        &mut self,
        name: &str,
        flags: FindFlags,
        scope: ScopeId,
        types: &TypeModel,
        scopes: &ScopeTree,
    ) -> bool {
        if flags.contains(FindFlags::METHOD) && self.find_method(name, types, scopes) {
            return true;
        }
        if flags.contains(FindFlags::FIELD) && self.find_field(name, types, scopes) {
            return true;
        }
        if flags.contains(FindFlags::VARIABLE) && self.find_variable(name, scope, types, scopes) {
            return true;
        }
        if flags.contains(FindFlags::FUNCTION) && self.find_function(name, scope, types, scopes) {
            return true;
        }
        if flags.contains(FindFlags::METHOD_RETAIN) && self.find_method_retain(name, types, scopes) {
            return true;
        }
        false
    }
}

fn find_class_by_alias(types: &TypeModel, scopes: &ScopeTree, alias: &str) -> Option<ClassObj> {
    let _ = types;
    scopes.find_class(alias, crate::scope::ROOT_SCOPE).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{AccessModifier, VarFlags, ROOT_SCOPE};
    use crate::types::UNDEFINED_TYPE;

    #[test]
    fn bare_function_without_call_is_still_callable() {
        let types = TypeModel::new();
        let scopes = ScopeTree::new();
        let mut meta = MetaObj::new();
        let func = FuncObj {
            name: "f".into(),
            full_name: "f".into(),
            return_type: RefType::new(UNDEFINED_TYPE),
            args: vec![],
            internal_scope: None,
            flags: VarFlags::NONE,
            access: AccessModifier::Undefined,
        };
        meta.set_func_obj(Some(func), false, &types, &scopes);
        assert!(meta.is_callable());
        assert!(!meta.call_done);
        let _ = ROOT_SCOPE;
    }

    #[test]
    fn address_of_literal_fails() {
        let mut types = TypeModel::new();
        let scopes = ScopeTree::new();
        let mut meta = MetaObj::new();
        let i32_ty = types.find_type("integer");
        meta.set_unnamed_object(Some(i32_ty), &types, &scopes);
        meta.unnamed_type = meta.unnamed_type.set_literal(true);
        assert!(!meta.do_address(&mut types, &scopes));
    }
}
