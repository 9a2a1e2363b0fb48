//! Type descriptor graph and the type registry (spec §4.2).
//!
//! Per spec.md's REDESIGN FLAGS: the original holds bare pointers from
//! `TypeDef` into the symbol table's owned vector. Here all `TypeDef`s live
//! in one arena (`TypeModel::types`) and are referenced by a stable
//! `TypeId` index, so `RefType` becomes `(TypeId, flags)` instead of a raw
//! pointer.

use indexmap::IndexMap;

use crate::value::Kind;

/// Stable index into a `TypeModel`'s arena. Cheap to copy, never dangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

pub const UNDEFINED_TYPE: TypeId = TypeId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Scalar,
    Array,
    Pointer,
    Class,
}

/// A type descriptor. Category determines which fields are meaningful:
/// `opcode_type` only for `Scalar`; `children` holds field types for
/// `Class`, the single element type for `Array`/`Pointer`.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub opcode_type: Kind,
    pub category: Category,
    pub alias: String,
    pub array_low: i64,
    pub array_high: i64,
    pub is_external: bool,
    pub children: Vec<TypeId>,
    /// Class only: insertion-ordered field names and name -> child index.
    pub field_names: Vec<String>,
    pub field_index: IndexMap<String, usize>,
    pub parent: Option<TypeId>,
}

impl TypeDef {
    pub fn scalar(kind: Kind) -> Self {
        Self {
            opcode_type: kind,
            category: Category::Scalar,
            alias: String::new(),
            array_low: 0,
            array_high: 0,
            is_external: false,
            children: Vec::new(),
            field_names: Vec::new(),
            field_index: IndexMap::new(),
            parent: None,
        }
    }

    pub fn undefined() -> Self {
        Self::scalar(Kind::Undefined)
    }

    pub fn pointer(target: TypeId) -> Self {
        let mut t = Self::scalar(Kind::Ptr);
        t.category = Category::Pointer;
        t.children.push(target);
        t
    }

    pub fn array(low: i64, high: i64, element: TypeId) -> Self {
        let mut t = Self::scalar(Kind::Undefined);
        t.category = Category::Array;
        t.array_low = low;
        t.array_high = high;
        t.children.push(element);
        t
    }

    pub fn class(parent: Option<TypeId>) -> Self {
        let mut t = Self::scalar(Kind::Undefined);
        t.category = Category::Class;
        t.parent = parent;
        t
    }

    pub fn is_undefined(&self) -> bool {
        self.category == Category::Scalar && self.opcode_type == Kind::Undefined
    }

    pub fn is_scalar(&self) -> bool {
        self.category == Category::Scalar
    }

    pub fn is_class(&self) -> bool {
        self.category == Category::Class
    }

    pub fn is_pointer(&self) -> bool {
        self.category == Category::Pointer
    }

    pub fn is_int(&self) -> bool {
        self.category == Category::Scalar && self.opcode_type.is_int()
    }

    pub fn is_float(&self) -> bool {
        self.category == Category::Scalar && self.opcode_type.is_float()
    }

    pub fn is_boolean(&self) -> bool {
        self.category == Category::Scalar && self.opcode_type == Kind::Bool
    }

    pub fn array_len(&self) -> i64 {
        self.array_high - self.array_low + 1
    }

    /// Structural equality, except `Class`, which always compares unequal
    /// to anything but itself (nominal typing) — spec §4.2.
    pub fn equal_to(&self, other: &TypeDef) -> bool {
        if self.category == Category::Class || other.category == Category::Class {
            return false;
        }
        self.category == other.category
            && self.opcode_type == other.opcode_type
            && self.array_low == other.array_low
            && self.array_high == other.array_high
            && self.children == other.children
    }

    pub fn add_field(&mut self, name: &str, field_type: TypeId) -> bool {
        let key = name.to_ascii_lowercase();
        if self.field_index.contains_key(&key) {
            return false;
        }
        self.field_index.insert(key, self.children.len());
        self.field_names.push(name.to_owned());
        self.children.push(field_type);
        true
    }
}

/// A type together with const/reference/literal flags (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefType {
    pub ty: TypeId,
    pub is_const: bool,
    pub is_ref: bool,
    pub is_literal: bool,
}

impl RefType {
    pub fn new(ty: TypeId) -> Self {
        Self { ty, is_const: false, is_ref: false, is_literal: false }
    }

    pub fn set_const(mut self, v: bool) -> Self {
        self.is_const = v;
        self
    }

    pub fn set_ref(mut self, v: bool) -> Self {
        self.is_ref = v;
        self
    }

    pub fn set_literal(mut self, v: bool) -> Self {
        self.is_literal = v;
        self
    }
}

/// The byte-size-of-a-(scalar-kind, run-length) flattening of a type, used
/// by `MOVS`/`CMPS` sizing and external variable binding (spec §4.2).
pub type Signature = Vec<(Kind, i64)>;

/// The arena-backed type registry. Owns every `TypeDef` ever registered and
/// resolves names (built-in aliases plus user `type` declarations) to
/// `TypeId`s.
#[derive(Debug)]
pub struct TypeModel {
    types: Vec<TypeDef>,
    by_name: IndexMap<String, TypeId>,
}

impl Default for TypeModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeModel {
    pub fn new() -> Self {
        let mut tm = Self { types: Vec::new(), by_name: IndexMap::new() };
        tm.reset();
        tm
    }

    /// Re-registers the built-in scalar aliases. Called at symbol-table
    /// reset (spec §4.2): `integer`/`int`/`int32` all resolve to signed
    /// 32-bit, etc.
    pub fn reset(&mut self) {
        self.types.clear();
        self.by_name.clear();
        let undef = self.types.len();
        self.types.push(TypeDef::undefined());
        self.by_name.insert("__undefined".into(), TypeId(undef as u32));

        let aliases: &[(&[&str], Kind)] = &[
            (&["boolean", "bool"], Kind::Bool),
            (&["single", "float", "float32"], Kind::Float32),
            (&["double", "real", "float64"], Kind::Float64),
            (&["shortint", "int8"], Kind::I8),
            (&["byte", "uint8"], Kind::U8),
            (&["smallint", "int16"], Kind::I16),
            (&["word", "uint16"], Kind::U16),
            (&["integer", "int", "int32"], Kind::I32),
            (&["cardinal", "uint32"], Kind::U32),
            (&["int64", "longint"], Kind::I64),
            (&["uint64", "qword"], Kind::U64),
            (&["string"], Kind::Str),
            (&["__string_char"], Kind::StrChar),
        ];
        for (names, kind) in aliases {
            let id = TypeId(self.types.len() as u32);
            self.types.push(TypeDef::scalar(*kind));
            for name in *names {
                self.by_name.insert((*name).to_owned(), id);
            }
            self.types[id.0 as usize].alias = names[0].to_owned();
        }
    }

    pub fn get(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.types[id.0 as usize]
    }

    pub fn undefined_id(&self) -> TypeId {
        TypeId(0)
    }

    /// `find_type(name)` — case-insensitive lookup; the sentinel
    /// "undefined" type if not found.
    pub fn find_type(&self, name: &str) -> TypeId {
        self.by_name.get(&name.to_ascii_lowercase()).copied().unwrap_or(self.undefined_id())
    }

    /// `register(type, auto_append, external)` — structural dedup unless
    /// the type is a `Class` (always appended fresh, nominal typing).
    pub fn register(&mut self, mut ty: TypeDef, external: bool) -> TypeId {
        if ty.category != Category::Class {
            for (i, existing) in self.types.iter().enumerate() {
                if existing.equal_to(&ty) {
                    return TypeId(i as u32);
                }
            }
        }
        ty.is_external = external;
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    /// `set_name_for_type` — names an anonymous registered type.
    pub fn set_name_for_type(&mut self, id: TypeId, name: &str) {
        self.types[id.0 as usize].alias = name.to_owned();
        self.by_name.insert(name.to_ascii_lowercase(), id);
    }

    /// `get_offset(field_name)` — parent chain first, then own fields in
    /// declaration order, summing byte sizes of fields preceding the
    /// target.
    pub fn get_offset(&self, id: TypeId, field_name: &str) -> Option<i64> {
        let ty = self.get(id);
        if let Some(parent) = ty.parent {
            if let Some(off) = self.get_offset(parent, field_name) {
                return Some(off);
            }
        }
        let parent_size = ty.parent.map(|p| self.byte_size(p)).unwrap_or(0);
        let key = field_name.to_ascii_lowercase();
        if let Some(&idx) = ty.field_index.get(&key) {
            let mut offset = parent_size;
            for child in &ty.children[..idx] {
                offset += self.byte_size(*child);
            }
            return Some(offset);
        }
        None
    }

    pub fn find_field(&self, id: TypeId, field_name: &str) -> Option<TypeId> {
        let ty = self.get(id);
        let key = field_name.to_ascii_lowercase();
        if let Some(&idx) = ty.field_index.get(&key) {
            return Some(ty.children[idx]);
        }
        ty.parent.and_then(|p| self.find_field(p, field_name))
    }

    /// `byte size`: Scalar/Pointer = 1 cell; Array = `(high-low+1) *
    /// element_size`; Class = parent size + sum of field sizes.
    pub fn byte_size(&self, id: TypeId) -> i64 {
        let ty = self.get(id);
        match ty.category {
            Category::Scalar | Category::Pointer => 1,
            Category::Array => ty.array_len() * self.byte_size(ty.children[0]),
            Category::Class => {
                let parent = ty.parent.map(|p| self.byte_size(p)).unwrap_or(0);
                parent + ty.children.iter().map(|c| self.byte_size(*c)).sum::<i64>()
            }
        }
    }

    /// `signature()` — flatten to a run-length-encoded list of scalar
    /// kinds.
    pub fn signature(&self, id: TypeId) -> Signature {
        let mut out = Vec::new();
        self.signature_into(id, &mut out);
        compact_runs(out)
    }

    fn signature_into(&self, id: TypeId, out: &mut Vec<Kind>) {
        let ty = self.get(id);
        match ty.category {
            Category::Scalar => out.push(ty.opcode_type),
            Category::Pointer => out.push(Kind::I32),
            Category::Array => {
                for _ in 0..ty.array_len() {
                    self.signature_into(ty.children[0], out);
                }
            }
            Category::Class => {
                if let Some(parent) = ty.parent {
                    self.signature_into(parent, out);
                }
                for child in &ty.children {
                    self.signature_into(*child, out);
                }
            }
        }
    }
}

fn compact_runs(flat: Vec<Kind>) -> Signature {
    let mut out: Signature = Vec::new();
    for kind in flat {
        if let Some(last) = out.last_mut() {
            if last.0 == kind {
                last.1 += 1;
                continue;
            }
        }
        out.push((kind, 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_aliases_resolve_to_same_type() {
        let tm = TypeModel::new();
        assert_eq!(tm.find_type("integer"), tm.find_type("int32"));
        assert_ne!(tm.find_type("integer"), tm.undefined_id());
    }

    #[test]
    fn class_types_never_structurally_dedup() {
        let mut tm = TypeModel::new();
        let a = tm.register(TypeDef::class(None), false);
        let b = tm.register(TypeDef::class(None), false);
        assert_ne!(a, b);
    }

    #[test]
    fn array_byte_size() {
        let mut tm = TypeModel::new();
        let i32_ty = tm.find_type("integer");
        let arr = tm.register(TypeDef::array(0, 9, i32_ty), false);
        assert_eq!(tm.byte_size(arr), 10);
    }

    #[test]
    fn signature_compacts_single_run() {
        let mut tm = TypeModel::new();
        let i32_ty = tm.find_type("integer");
        let arr = tm.register(TypeDef::array(0, 3, i32_ty), false);
        assert_eq!(tm.signature(arr), vec![(Kind::I32, 4)]);
    }

    #[test]
    fn class_offset_includes_parent_size() {
        let mut tm = TypeModel::new();
        let i32_ty = tm.find_type("integer");
        let f64_ty = tm.find_type("double");
        let mut base = TypeDef::class(None);
        base.add_field("a", i32_ty);
        let base_id = tm.register(base, false);
        let mut derived = TypeDef::class(Some(base_id));
        derived.add_field("b", f64_ty);
        let derived_id = tm.register(derived, false);
        assert_eq!(tm.get_offset(derived_id, "b"), Some(1));
        assert_eq!(tm.get_offset(derived_id, "a"), Some(0));
    }
}
