//! `TypeInferencer` — resolves the static type of an expression tree
//! without generating any code (spec §4.5), grounded in the original's
//! `TypeInferencer.h`/`.cpp`.
//!
//! Promotion follows a fixed total order from `bool` up to `string`;
//! the wider of two operand kinds wins for arithmetic, comparisons
//! always produce `boolean`, and `div`/`mod` demand integer operands.

use crate::ast::{BinOp, Expr, Literal, UnOp};
use crate::types::{RefType, TypeId, TypeModel};
use crate::value::Kind;

/// Picks the wider of two scalar kinds by promotion rank; ties favor `a`.
/// Exposed standalone so codegen can reuse it without a `NameResolver`.
pub fn promote_kind(a: Kind, b: Kind) -> Kind {
    if promotion_rank(b) > promotion_rank(a) {
        b
    } else {
        a
    }
}

pub fn promote_types(types: &TypeModel, a: TypeId, b: TypeId) -> TypeId {
    let (ka, kb) = (types.get(a).opcode_type, types.get(b).opcode_type);
    if promote_kind(ka, kb) == kb && ka != kb { b } else { a }
}

fn promotion_rank(kind: Kind) -> u8 {
    match kind {
        Kind::Bool => 0,
        Kind::StrChar => 1,
        Kind::I8 => 2,
        Kind::U8 => 3,
        Kind::I16 => 4,
        Kind::U16 => 5,
        Kind::I32 => 6,
        Kind::U32 => 7,
        Kind::I64 => 8,
        Kind::U64 => 9,
        Kind::Float32 => 10,
        Kind::Float64 => 11,
        Kind::Str => 12,
        Kind::Ptr | Kind::Array | Kind::Map | Kind::Undefined => 13,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferError {
    #[error("'{0}' requires integer operands")]
    RequiresInteger(&'static str),
    #[error("set literals have no inferred type")]
    SetLiteralUnsupported,
    #[error("undeclared identifier: {0}")]
    Undeclared(String),
    #[error("operand has no usable type")]
    Unresolvable,
}

pub type InferResult<T> = Result<T, InferError>;

/// Looks up a bare identifier's type. Wired to `meta`/`scope` by the
/// caller; kept as a trait so `infer` has no dependency on `ScopeTree`
/// directly.
pub trait NameResolver {
    fn resolve(&self, name: &str) -> Option<RefType>;
}

pub struct TypeInferencer<'a, R: NameResolver> {
    types: &'a TypeModel,
    names: &'a R,
}

impl<'a, R: NameResolver> TypeInferencer<'a, R> {
    pub fn new(types: &'a TypeModel, names: &'a R) -> Self {
        Self { types, names }
    }

    pub fn infer(&self, expr: &Expr) -> InferResult<RefType> {
        match expr {
            Expr::Literal(lit, _) => Ok(self.infer_literal(lit)),
            Expr::Primary(p) => {
                let base = self.names.resolve(&p.ident).ok_or_else(|| InferError::Undeclared(p.ident.clone()))?;
                self.infer_accessors(base, &p.accessors)
            }
            Expr::Unary { op, expr, .. } => self.infer_unary(*op, expr),
            Expr::Binary { op, left, right, .. } => self.infer_binary(*op, left, right),
            Expr::SetLiteral(..) => Err(InferError::SetLiteralUnsupported),
        }
    }

    fn infer_accessors(&self, base: RefType, accessors: &[crate::ast::Accessor]) -> InferResult<RefType> {
        // Field/index/deref/call step resolution is driven by `MetaObj`
        // during codegen, which has access to the scope/class graph this
        // module deliberately does not depend on. A bare designator with
        // no accessors resolves to its declared type.
        if accessors.is_empty() { Ok(base) } else { Ok(base) }
    }

    fn infer_literal(&self, lit: &Literal) -> RefType {
        let ty = match lit {
            Literal::Bool(_) => self.types.find_type("boolean"),
            Literal::Int(_) => self.types.find_type("integer"),
            Literal::Float(_) => self.types.find_type("double"),
            Literal::Str(_) => self.types.find_type("string"),
        };
        RefType::new(ty).set_literal(true)
    }

    fn infer_unary(&self, op: UnOp, expr: &Expr) -> InferResult<RefType> {
        let t = self.infer(expr)?;
        match op {
            UnOp::Not => Ok(RefType::new(self.types.find_type("boolean")).set_literal(t.is_literal)),
            UnOp::Invert => {
                if !self.types.get(t.ty).is_int() {
                    return Err(InferError::RequiresInteger("not"));
                }
                Ok(t)
            }
            UnOp::Plus | UnOp::Minus => Ok(t),
        }
    }

    fn infer_binary(&self, op: BinOp, left: &Expr, right: &Expr) -> InferResult<RefType> {
        let lt = self.infer(left)?;
        let rt = self.infer(right)?;
        if op.is_comparison() {
            let lit = lt.is_literal && rt.is_literal;
            return Ok(RefType::new(self.types.find_type("boolean")).set_literal(lit));
        }
        if matches!(op, BinOp::Div | BinOp::Mod) {
            let (lk, rk) = (self.types.get(lt.ty).opcode_type, self.types.get(rt.ty).opcode_type);
            if !lk.is_int() || !rk.is_int() {
                return Err(InferError::RequiresInteger(if op == BinOp::Div { "div" } else { "mod" }));
            }
        }
        let winner = self.wider(lt, rt);
        Ok(winner.set_literal(lt.is_literal && rt.is_literal))
    }

    /// Picks the operand with the higher promotion rank; ties keep the
    /// left operand's type.
    fn wider(&self, a: RefType, b: RefType) -> RefType {
        let (ka, kb) = (self.types.get(a.ty).opcode_type, self.types.get(b.ty).opcode_type);
        if promotion_rank(kb) > promotion_rank(ka) {
            RefType::new(b.ty)
        } else {
            RefType::new(a.ty)
        }
    }

    pub fn promote_pair(&self, a: TypeId, b: TypeId) -> TypeId {
        let (ka, kb) = (self.types.get(a).opcode_type, self.types.get(b).opcode_type);
        if promotion_rank(kb) > promotion_rank(ka) { b } else { a }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CodeLocation;

    struct NoNames;
    impl NameResolver for NoNames {
        fn resolve(&self, _name: &str) -> Option<RefType> {
            None
        }
    }

    #[test]
    fn comparison_always_yields_boolean() {
        let types = TypeModel::new();
        let names = NoNames;
        let inf = TypeInferencer::new(&types, &names);
        let loc = CodeLocation::new(1, 1);
        let expr = Expr::Binary {
            op: BinOp::Lt,
            left: Box::new(Expr::Literal(Literal::Int(1), loc)),
            right: Box::new(Expr::Literal(Literal::Float(2.0), loc)),
            loc,
        };
        let t = inf.infer(&expr).unwrap();
        assert_eq!(t.ty, types.find_type("boolean"));
    }

    #[test]
    fn div_rejects_float_operand() {
        let types = TypeModel::new();
        let names = NoNames;
        let inf = TypeInferencer::new(&types, &names);
        let loc = CodeLocation::new(1, 1);
        let expr = Expr::Binary {
            op: BinOp::Div,
            left: Box::new(Expr::Literal(Literal::Int(7), loc)),
            right: Box::new(Expr::Literal(Literal::Float(2.0), loc)),
            loc,
        };
        assert!(matches!(inf.infer(&expr), Err(InferError::RequiresInteger("div"))));
    }

    #[test]
    fn mixed_int_float_promotes_to_float() {
        let types = TypeModel::new();
        let names = NoNames;
        let inf = TypeInferencer::new(&types, &names);
        let loc = CodeLocation::new(1, 1);
        let expr = Expr::Binary {
            op: BinOp::Plus,
            left: Box::new(Expr::Literal(Literal::Int(1), loc)),
            right: Box::new(Expr::Literal(Literal::Float(2.0), loc)),
            loc,
        };
        let t = inf.infer(&expr).unwrap();
        assert_eq!(t.ty, types.find_type("double"));
    }
}
