//! Symbolic values and type storages

use std::collections::BTreeSet;
use std::fmt;

use crate::expr::{Expr, Sort, ADDR_BITS};
use crate::program::Type;

/// Solver sort used to hold a value of `ty`.
pub fn sort_of(ty: &Type) -> Sort {
    match ty {
        Type::Boolean => Sort::Bool,
        t if t.is_primitive() => Sort::BitVec(t.bit_width().unwrap_or(32)),
        _ => Sort::BitVec(ADDR_BITS),
    }
}

/// Default value of `ty` as an expression: false, zero or the null address.
pub fn default_expr(ty: &Type) -> Expr {
    match sort_of(ty) {
        Sort::Bool => Expr::bool(false),
        Sort::BitVec(bits) => Expr::int(0, bits),
        Sort::Array(..) => Expr::null(),
    }
}

/// Declared type of a reference plus the concrete types it may have at run
/// time.
///
/// `possible` is either non-empty and made of instantiable types, or holds
/// a single interface/abstract type marking a wrapper object. An empty set is
/// only ever seen transiently before the value is mocked or forced to null.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeStorage {
    pub least_common: Type,
    pub possible: BTreeSet<Type>,
}

impl TypeStorage {
    /// Storage for a value whose runtime type is known exactly.
    pub fn exact(ty: Type) -> Self {
        Self {
            possible: BTreeSet::from([ty.clone()]),
            least_common: ty,
        }
    }

    pub fn new(least_common: Type, possible: impl IntoIterator<Item = Type>) -> Self {
        Self {
            least_common,
            possible: possible.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.possible.is_empty()
    }

    pub fn single(&self) -> Option<&Type> {
        match self.possible.len() {
            1 => self.possible.iter().next(),
            _ => None,
        }
    }
}

impl fmt::Display for TypeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.possible.len() == 1 {
            write!(f, "{}", self.least_common)
        } else {
            write!(
                f,
                "{} ({} possible types)",
                self.least_common,
                self.possible.len()
            )
        }
    }
}

/// Concrete knowledge attached to a reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConcreteHint {
    /// Object implemented by a built-in wrapper
    Wrapper(crate::wrappers::WrapperKind),
    /// Class literal for a (base type, dimensions) pair
    ClassRef(Type),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimitiveValue {
    pub ty: Type,
    pub expr: Expr,
}

impl PrimitiveValue {
    pub fn new(ty: Type, expr: Expr) -> Self {
        Self { ty, expr }
    }

    pub fn int(value: i32) -> Self {
        Self::new(Type::Int, Expr::int32(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(Type::Boolean, Expr::bool(value))
    }

    /// Value promoted to `int` or kept as `long`, as Java arithmetic does.
    pub fn promoted(&self) -> PrimitiveValue {
        match &self.ty {
            Type::Long | Type::Int => self.clone(),
            Type::Boolean => PrimitiveValue::new(
                Type::Int,
                Expr::ite(&self.expr, &Expr::int32(1), &Expr::int32(0)),
            ),
            ty => PrimitiveValue::new(Type::Int, self.expr.extend(!ty.is_unsigned(), 32)),
        }
    }

    /// Conversion to another primitive type (`i2b`, `l2i`, `c2i`, ...).
    pub fn cast(&self, target: &Type) -> PrimitiveValue {
        if &self.ty == target {
            return self.clone();
        }
        match target {
            Type::Boolean => PrimitiveValue::new(
                Type::Boolean,
                self.promoted().expr.ne(&Expr::int32(0)),
            ),
            _ => {
                let bits = target.bit_width().unwrap_or(32);
                let source = if self.ty == Type::Boolean {
                    self.promoted()
                } else {
                    self.clone()
                };
                PrimitiveValue::new(
                    target.clone(),
                    source.expr.extend(!source.ty.is_unsigned(), bits),
                )
            }
        }
    }
}

/// Reference to an object or an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceValue {
    pub storage: TypeStorage,
    pub addr: Expr,
    pub concrete: Option<ConcreteHint>,
}

impl ReferenceValue {
    pub fn new(storage: TypeStorage, addr: Expr) -> Self {
        Self {
            storage,
            addr,
            concrete: None,
        }
    }

    pub fn ty(&self) -> &Type {
        &self.storage.least_common
    }

    pub fn with_concrete(mut self, concrete: ConcreteHint) -> Self {
        self.concrete = Some(concrete);
        self
    }

    pub fn with_storage(mut self, storage: TypeStorage) -> Self {
        self.storage = storage;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolicValue {
    Primitive(PrimitiveValue),
    Object(ReferenceValue),
    Array(ReferenceValue),
}

impl SymbolicValue {
    /// Reference value of the kind matching `ty`.
    pub fn reference(storage: TypeStorage, addr: Expr) -> Self {
        let value = ReferenceValue::new(storage, addr);
        if value.ty().is_array() {
            SymbolicValue::Array(value)
        } else {
            SymbolicValue::Object(value)
        }
    }

    pub fn null(ty: Type) -> Self {
        Self::reference(TypeStorage::exact(ty), Expr::null())
    }

    pub fn primitive(ty: Type, expr: Expr) -> Self {
        SymbolicValue::Primitive(PrimitiveValue::new(ty, expr))
    }

    pub fn ty(&self) -> &Type {
        match self {
            SymbolicValue::Primitive(p) => &p.ty,
            SymbolicValue::Object(r) | SymbolicValue::Array(r) => r.ty(),
        }
    }

    /// The primitive expression or the address.
    pub fn expr(&self) -> &Expr {
        match self {
            SymbolicValue::Primitive(p) => &p.expr,
            SymbolicValue::Object(r) | SymbolicValue::Array(r) => &r.addr,
        }
    }

    pub fn as_primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            SymbolicValue::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceValue> {
        match self {
            SymbolicValue::Object(r) | SymbolicValue::Array(r) => Some(r),
            SymbolicValue::Primitive(_) => None,
        }
    }

    /// Whether both values denote the same cell content, ignoring concrete
    /// hints.
    pub fn same_content(&self, other: &SymbolicValue) -> bool {
        match (self, other) {
            (SymbolicValue::Primitive(a), SymbolicValue::Primitive(b)) => a == b,
            (a, b) => match (a.as_reference(), b.as_reference()) {
                (Some(a), Some(b)) => a.addr == b.addr && a.storage == b.storage,
                _ => false,
            },
        }
    }
}

impl fmt::Display for SymbolicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicValue::Primitive(p) => write!(f, "{}: {}", p.expr, p.ty),
            SymbolicValue::Object(r) | SymbolicValue::Array(r) => {
                write!(f, "@{}: {}", r.addr, r.storage)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorts() {
        assert_eq!(sort_of(&Type::Boolean), Sort::Bool);
        assert_eq!(sort_of(&Type::Char), Sort::BitVec(16));
        assert_eq!(sort_of(&Type::object()), Sort::BitVec(32));
        assert_eq!(default_expr(&Type::Long).as_int(), Some(0));
    }

    #[test]
    fn test_char_promotion_is_unsigned() {
        let c = PrimitiveValue::new(Type::Char, Expr::int(0xFFFF, 16));
        assert_eq!(c.promoted().expr.as_int(), Some(65535));
        let b = PrimitiveValue::new(Type::Byte, Expr::int(-1, 8));
        assert_eq!(b.promoted().expr.as_int(), Some(-1));
    }

    #[test]
    fn test_narrowing_cast() {
        let v = PrimitiveValue::int(300);
        let b = v.cast(&Type::Byte);
        assert_eq!(b.expr.as_int(), Some(44));
        assert_eq!(v.cast(&Type::Boolean).expr.as_bool(), Some(true));
        assert_eq!(v.cast(&Type::Long).expr.bits(), 64);
    }

    #[test]
    fn test_concrete_hint_ignored_by_same_content() {
        let storage = TypeStorage::exact(Type::class("java.lang.Class"));
        let plain = SymbolicValue::reference(storage.clone(), Expr::addr(-5));
        let hinted = SymbolicValue::Object(
            ReferenceValue::new(storage, Expr::addr(-5)).with_concrete(ConcreteHint::ClassRef(Type::Int)),
        );
        assert!(plain.same_content(&hinted));
        assert_ne!(plain, hinted);
    }
}
