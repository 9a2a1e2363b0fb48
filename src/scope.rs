//! Nested scopes and the named-object model (spec §4.3).
//!
//! Scopes form a tree, each owning an insertion-ordered list of named
//! objects plus a case-insensitive name -> index map, exactly like the
//! original's `BlockScope`. As with `types::TypeModel`, scopes are held in
//! an arena (`ScopeTree`) and referenced by stable `ScopeId`s rather than
//! raw pointers, per spec.md's REDESIGN FLAGS.

use indexmap::IndexMap;

use crate::ast::Expr;
use crate::types::{RefType, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

pub const ROOT_SCOPE: ScopeId = ScopeId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessModifier {
    Undefined,
    Public,
    Protected,
    Private,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VarFlags: u8 {
        const NONE     = 0;
        const STATIC   = 1 << 0;
        const EXTERNAL = 1 << 1;
        const CONST    = 1 << 2;
        const FORWARD  = 1 << 3;
        const USED     = 1 << 4;
    }
}

#[derive(Debug, Clone)]
pub struct VarObj {
    pub name: String,
    pub name_original: String,
    pub ty: RefType,
    pub memory_address: i64,
    pub memory_size: i64,
    pub flags: VarFlags,
    pub access: AccessModifier,
}

impl VarObj {
    pub fn is_const(&self) -> bool {
        self.flags.contains(VarFlags::CONST)
    }
    pub fn is_static(&self) -> bool {
        self.flags.contains(VarFlags::STATIC)
    }
    pub fn is_external(&self) -> bool {
        self.flags.contains(VarFlags::EXTERNAL)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionArg {
    pub name: String,
    pub ty: RefType,
    pub by_ref: bool,
    pub default: Option<Expr>,
    pub array_size_hint: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FuncObj {
    pub name: String,
    pub full_name: String,
    pub return_type: RefType,
    pub args: Vec<FunctionArg>,
    pub internal_scope: Option<ScopeId>,
    pub flags: VarFlags,
    pub access: AccessModifier,
}

impl FuncObj {
    pub fn is_forward(&self) -> bool {
        self.flags.contains(VarFlags::FORWARD)
    }

    pub fn call_size(&self) -> i64 {
        self.args.iter().map(|a| if a.by_ref { 1 } else { 0 }).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ClassObj {
    pub name: String,
    pub ty: TypeId,
    pub parent: Option<String>,
    pub internal_scope: ScopeId,
    pub access: AccessModifier,
}

/// One of the three kinds of named object a scope can hold.
#[derive(Debug, Clone)]
pub enum NamedObj {
    Var(VarObj),
    Func(FuncObj),
    Class(ClassObj),
}

impl NamedObj {
    pub fn name(&self) -> &str {
        match self {
            NamedObj::Var(v) => &v.name,
            NamedObj::Func(f) => &f.name,
            NamedObj::Class(c) => &c.name,
        }
    }
}

#[derive(Debug, Default)]
pub struct Scope {
    parent: Option<ScopeId>,
    objects: Vec<NamedObj>,
    names: IndexMap<String, usize>,
    next_memory_address: i64,
}

impl Scope {
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn next_memory_address(&self) -> i64 {
        self.next_memory_address
    }

    pub fn objects(&self) -> &[NamedObj] {
        &self.objects
    }

    fn find_local(&self, name: &str) -> Option<&NamedObj> {
        self.names.get(&name.to_ascii_lowercase()).map(|&i| &self.objects[i])
    }

    fn find_local_mut(&mut self, name: &str) -> Option<&mut NamedObj> {
        if let Some(&i) = self.names.get(&name.to_ascii_lowercase()) {
            Some(&mut self.objects[i])
        } else {
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),
}

/// The tree of scopes. The root has no parent; every other scope has
/// exactly one parent and is owned by it (spec §4.3's invariant).
#[derive(Debug)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    pub fn new() -> Self {
        Self { scopes: vec![Scope::default()] }
    }

    pub fn reset(&mut self) {
        self.scopes.clear();
        self.scopes.push(Scope::default());
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// `open` — creates a nested scope under `parent` and returns its id.
    /// Scopes are retained (never freed individually) so function bodies
    /// can re-enter them.
    pub fn open(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope { parent: Some(parent), ..Scope::default() });
        id
    }

    /// `find(name, scope)` — searches `scope`, then walks parent links to
    /// the root. Case-insensitive.
    pub fn find(&self, name: &str, scope: ScopeId) -> Option<&NamedObj> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = self.get(id);
            if let Some(obj) = s.find_local(name) {
                return Some(obj);
            }
            cur = s.parent;
        }
        None
    }

    pub fn find_var(&self, name: &str, scope: ScopeId) -> Option<&VarObj> {
        match self.find(name, scope)? {
            NamedObj::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn find_func(&self, name: &str, scope: ScopeId) -> Option<&FuncObj> {
        match self.find(name, scope)? {
            NamedObj::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn find_class(&self, name: &str, scope: ScopeId) -> Option<&ClassObj> {
        match self.find(name, scope)? {
            NamedObj::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Registers a variable, advancing the owning scope's memory-address
    /// watermark by its memory size.
    pub fn register_var(&mut self, scope: ScopeId, var: VarObj) -> Result<(), ScopeError> {
        let key = var.name.to_ascii_lowercase();
        let s = self.get_mut(scope);
        if s.names.contains_key(&key) {
            return Err(ScopeError::DuplicateIdentifier(var.name));
        }
        s.next_memory_address += var.memory_size;
        s.names.insert(key, s.objects.len());
        s.objects.push(NamedObj::Var(var));
        Ok(())
    }

    /// Registers a function. A forward declaration may later be
    /// re-registered with the same name: the second registration replaces
    /// the forward flag in place and reuses the object's internal scope.
    /// Re-declaring a non-forward function fails.
    pub fn register_func(&mut self, scope: ScopeId, func: FuncObj) -> Result<(), ScopeError> {
        let key = func.name.to_ascii_lowercase();
        let s = self.get_mut(scope);
        if let Some(&idx) = s.names.get(&key) {
            if let NamedObj::Func(existing) = &mut s.objects[idx] {
                if existing.is_forward() {
                    let internal_scope = existing.internal_scope;
                    let mut func = func;
                    func.internal_scope = func.internal_scope.or(internal_scope);
                    *existing = func;
                    return Ok(());
                }
            }
            return Err(ScopeError::DuplicateIdentifier(func.name));
        }
        s.names.insert(key, s.objects.len());
        s.objects.push(NamedObj::Func(func));
        Ok(())
    }

    pub fn register_class(&mut self, scope: ScopeId, class: ClassObj) -> Result<(), ScopeError> {
        let key = class.name.to_ascii_lowercase();
        let s = self.get_mut(scope);
        if s.names.contains_key(&key) {
            return Err(ScopeError::DuplicateIdentifier(class.name));
        }
        s.names.insert(key, s.objects.len());
        s.objects.push(NamedObj::Class(class));
        Ok(())
    }

    pub fn find_var_mut(&mut self, name: &str, scope: ScopeId) -> Option<&mut VarObj> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let parent = self.get(id).parent;
            if self.get(id).names.contains_key(&name.to_ascii_lowercase()) {
                if let Some(NamedObj::Var(v)) = self.get_mut(id).find_local_mut(name) {
                    return Some(v);
                }
            }
            cur = parent;
        }
        None
    }

    /// Opens a class's internal scope nested inside its parent class's
    /// internal scope (if any), so method lookup falls through to the base
    /// (spec §4.3).
    pub fn open_class_scope(&mut self, owner: ScopeId, parent_class_scope: Option<ScopeId>) -> ScopeId {
        self.open(parent_class_scope.unwrap_or(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNDEFINED_TYPE;

    fn dummy_var(name: &str, size: i64) -> VarObj {
        VarObj {
            name: name.to_owned(),
            name_original: name.to_owned(),
            ty: RefType::new(UNDEFINED_TYPE),
            memory_address: 0,
            memory_size: size,
            flags: VarFlags::NONE,
            access: AccessModifier::Undefined,
        }
    }

    #[test]
    fn duplicate_name_in_same_scope_fails() {
        let mut tree = ScopeTree::new();
        tree.register_var(ROOT_SCOPE, dummy_var("x", 1)).unwrap();
        assert!(tree.register_var(ROOT_SCOPE, dummy_var("X", 1)).is_err());
    }

    #[test]
    fn lookup_walks_parent_chain_case_insensitively() {
        let mut tree = ScopeTree::new();
        tree.register_var(ROOT_SCOPE, dummy_var("Count", 1)).unwrap();
        let child = tree.open(ROOT_SCOPE);
        assert!(tree.find_var("count", child).is_some());
    }

    #[test]
    fn registering_var_advances_watermark() {
        let mut tree = ScopeTree::new();
        tree.register_var(ROOT_SCOPE, dummy_var("a", 3)).unwrap();
        tree.register_var(ROOT_SCOPE, dummy_var("b", 2)).unwrap();
        assert_eq!(tree.get(ROOT_SCOPE).next_memory_address(), 5);
    }

    #[test]
    fn forward_function_replaced_in_place() {
        let mut tree = ScopeTree::new();
        let mk = |forward: bool| FuncObj {
            name: "foo".into(),
            full_name: "foo".into(),
            return_type: RefType::new(UNDEFINED_TYPE),
            args: vec![],
            internal_scope: None,
            flags: if forward { VarFlags::FORWARD } else { VarFlags::NONE },
            access: AccessModifier::Undefined,
        };
        tree.register_func(ROOT_SCOPE, mk(true)).unwrap();
        tree.register_func(ROOT_SCOPE, mk(false)).unwrap();
        assert!(!tree.find_func("foo", ROOT_SCOPE).unwrap().is_forward());
    }

    #[test]
    fn redeclaring_non_forward_function_fails() {
        let mut tree = ScopeTree::new();
        let mk = || FuncObj {
            name: "foo".into(),
            full_name: "foo".into(),
            return_type: RefType::new(UNDEFINED_TYPE),
            args: vec![],
            internal_scope: None,
            flags: VarFlags::NONE,
            access: AccessModifier::Undefined,
        };
        tree.register_func(ROOT_SCOPE, mk()).unwrap();
        assert!(tree.register_func(ROOT_SCOPE, mk()).is_err());
    }
}
