//! Symbolic expressions
//!
//! A closed expression language over booleans, fixed-width bit-vectors and
//! arrays. Expressions are immutable and shared through `Arc`, so every
//! execution state can keep the constraints of its ancestors without copies.
//!
//! All constructors simplify eagerly: constants fold, `select` over a `store`
//! with a decidable index is resolved, and boolean connectives drop neutral
//! operands. A branch predicate that simplifies to a constant therefore
//! produces a single successor.

pub mod eval;
pub mod smtlib;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use eval::{evaluate, ArrayBase, Assignment, Key, Missing, Value};

/// Bit width of addresses
pub const ADDR_BITS: u32 = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sort {
    Bool,
    BitVec(u32),
    Array(Box<Sort>, Box<Sort>),
}

impl Sort {
    pub fn array(index: Sort, element: Sort) -> Self {
        Sort::Array(Box::new(index), Box::new(element))
    }

    pub fn bits(&self) -> Option<u32> {
        match self {
            Sort::BitVec(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&Sort> {
        match self {
            Sort::Array(_, element) => Some(element),
            _ => None,
        }
    }

    /// Value an unconstrained cell of this sort takes in a model.
    pub fn default_value(&self) -> Value {
        match self {
            Sort::Bool => Value::Bool(false),
            Sort::BitVec(bits) => Value::Int {
                value: 0,
                bits: *bits,
            },
            Sort::Array(_, element) => Value::Array {
                base: ArrayBase::Const(Box::new(element.default_value())),
                stores: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    /// Signed division truncating toward zero
    Div,
    /// Remainder with the sign of the dividend
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExprKind {
    BoolConst(bool),
    /// Integer constant, kept sign-normalized to its width
    IntConst { value: i128, bits: u32 },
    Var { name: String, sort: Sort },
    ConstArray { index: Sort, value: Expr },
    Select { array: Expr, index: Expr },
    Store { array: Expr, index: Expr, value: Expr },
    Not(Expr),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Ite { cond: Expr, then: Expr, els: Expr },
    Eq(Expr, Expr),
    /// Signed comparison
    Cmp { op: CmpOp, lhs: Expr, rhs: Expr },
    Arith { op: ArithOp, lhs: Expr, rhs: Expr },
    Neg(Expr),
    Extend { signed: bool, bits: u32, expr: Expr },
    /// Low `bits` bits
    Extract { bits: u32, expr: Expr },
}

/// Shared handle to an immutable expression node
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Expr(Arc<ExprKind>);

/// Sign-normalizes `value` to a `bits`-wide two's complement integer.
pub fn wrap(value: i128, bits: u32) -> i128 {
    if bits == 0 || bits >= 128 {
        return value;
    }
    let shift = 128 - bits;
    (value << shift) >> shift
}

/// Unsigned reading of a sign-normalized value.
pub fn to_unsigned(value: i128, bits: u32) -> i128 {
    if bits >= 127 {
        return value;
    }
    value & ((1i128 << bits) - 1)
}

impl Expr {
    fn new(kind: ExprKind) -> Self {
        Expr(Arc::new(kind))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ExprKind::BoolConst(value))
    }

    pub fn int(value: i128, bits: u32) -> Self {
        Self::new(ExprKind::IntConst {
            value: wrap(value, bits),
            bits,
        })
    }

    pub fn int32(value: i32) -> Self {
        Self::int(value as i128, 32)
    }

    pub fn addr(value: i32) -> Self {
        Self::int(value as i128, ADDR_BITS)
    }

    pub fn null() -> Self {
        Self::addr(0)
    }

    pub fn var(name: impl Into<String>, sort: Sort) -> Self {
        Self::new(ExprKind::Var {
            name: name.into(),
            sort,
        })
    }

    pub fn const_array(index: Sort, value: Expr) -> Self {
        Self::new(ExprKind::ConstArray { index, value })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind() {
            ExprKind::BoolConst(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self.kind() {
            ExprKind::IntConst { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    pub fn is_false(&self) -> bool {
        self.as_bool() == Some(false)
    }

    pub fn sort(&self) -> Sort {
        match self.kind() {
            ExprKind::BoolConst(_)
            | ExprKind::Not(_)
            | ExprKind::And(_)
            | ExprKind::Or(_)
            | ExprKind::Eq(..)
            | ExprKind::Cmp { .. } => Sort::Bool,
            ExprKind::IntConst { bits, .. } => Sort::BitVec(*bits),
            ExprKind::Var { sort, .. } => sort.clone(),
            ExprKind::ConstArray { index, value } => Sort::array(index.clone(), value.sort()),
            ExprKind::Select { array, .. } => match array.sort() {
                Sort::Array(_, element) => *element,
                other => other,
            },
            ExprKind::Store { array, .. } => array.sort(),
            ExprKind::Ite { then, .. } => then.sort(),
            ExprKind::Arith { lhs, .. } => lhs.sort(),
            ExprKind::Neg(e) => e.sort(),
            ExprKind::Extend { bits, .. } | ExprKind::Extract { bits, .. } => Sort::BitVec(*bits),
        }
    }

    /// Width of a bit-vector expression, 0 for other sorts.
    pub fn bits(&self) -> u32 {
        self.sort().bits().unwrap_or(0)
    }

    // Boolean connectives

    pub fn not(&self) -> Expr {
        match self.kind() {
            ExprKind::BoolConst(b) => Expr::bool(!b),
            ExprKind::Not(inner) => inner.clone(),
            _ => Self::new(ExprKind::Not(self.clone())),
        }
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut operands = Vec::new();
        for e in exprs {
            match e.kind() {
                ExprKind::BoolConst(true) => {}
                ExprKind::BoolConst(false) => return Expr::bool(false),
                ExprKind::And(inner) => operands.extend(inner.iter().cloned()),
                _ => operands.push(e),
            }
        }
        operands.dedup();
        match operands.len() {
            0 => Expr::bool(true),
            1 => operands.remove(0),
            _ => Self::new(ExprKind::And(operands)),
        }
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut operands = Vec::new();
        for e in exprs {
            match e.kind() {
                ExprKind::BoolConst(false) => {}
                ExprKind::BoolConst(true) => return Expr::bool(true),
                ExprKind::Or(inner) => operands.extend(inner.iter().cloned()),
                _ => operands.push(e),
            }
        }
        operands.dedup();
        match operands.len() {
            0 => Expr::bool(false),
            1 => operands.remove(0),
            _ => Self::new(ExprKind::Or(operands)),
        }
    }

    pub fn implies(&self, other: &Expr) -> Expr {
        Expr::or([self.not(), other.clone()])
    }

    pub fn ite(cond: &Expr, then: &Expr, els: &Expr) -> Expr {
        match cond.as_bool() {
            Some(true) => then.clone(),
            Some(false) => els.clone(),
            None if then == els => then.clone(),
            None => match (then.as_bool(), els.as_bool()) {
                (Some(true), Some(false)) => cond.clone(),
                (Some(false), Some(true)) => cond.not(),
                _ => Self::new(ExprKind::Ite {
                    cond: cond.clone(),
                    then: then.clone(),
                    els: els.clone(),
                }),
            },
        }
    }

    // Comparisons

    pub fn eq(&self, other: &Expr) -> Expr {
        if self == other {
            return Expr::bool(true);
        }
        match (self.kind(), other.kind()) {
            (ExprKind::IntConst { value: a, .. }, ExprKind::IntConst { value: b, .. }) => {
                Expr::bool(a == b)
            }
            (ExprKind::BoolConst(a), ExprKind::BoolConst(b)) => Expr::bool(a == b),
            (_, ExprKind::BoolConst(true)) => self.clone(),
            (_, ExprKind::BoolConst(false)) => self.not(),
            (ExprKind::BoolConst(true), _) => other.clone(),
            (ExprKind::BoolConst(false), _) => other.not(),
            _ => Self::new(ExprKind::Eq(self.clone(), other.clone())),
        }
    }

    pub fn ne(&self, other: &Expr) -> Expr {
        self.eq(other).not()
    }

    pub fn cmp(op: CmpOp, lhs: &Expr, rhs: &Expr) -> Expr {
        if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
            return Expr::bool(match op {
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
            });
        }
        if lhs == rhs {
            return Expr::bool(matches!(op, CmpOp::Le | CmpOp::Ge));
        }
        Self::new(ExprKind::Cmp {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        })
    }

    pub fn lt(&self, other: &Expr) -> Expr {
        Expr::cmp(CmpOp::Lt, self, other)
    }

    pub fn le(&self, other: &Expr) -> Expr {
        Expr::cmp(CmpOp::Le, self, other)
    }

    pub fn gt(&self, other: &Expr) -> Expr {
        Expr::cmp(CmpOp::Gt, self, other)
    }

    pub fn ge(&self, other: &Expr) -> Expr {
        Expr::cmp(CmpOp::Ge, self, other)
    }

    // Arithmetic

    pub fn arith(op: ArithOp, lhs: &Expr, rhs: &Expr) -> Expr {
        let bits = lhs.bits();
        if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
            return Expr::int(eval::apply_arith(op, a, b, bits), bits);
        }
        let zero = |e: &Expr| e.as_int() == Some(0);
        match op {
            ArithOp::Add | ArithOp::Or | ArithOp::Xor if zero(rhs) => return lhs.clone(),
            ArithOp::Add | ArithOp::Or | ArithOp::Xor if zero(lhs) => return rhs.clone(),
            ArithOp::Sub | ArithOp::Shl | ArithOp::Shr | ArithOp::Ushr if zero(rhs) => {
                return lhs.clone()
            }
            ArithOp::Mul | ArithOp::And if zero(lhs) || zero(rhs) => return Expr::int(0, bits),
            ArithOp::Mul if rhs.as_int() == Some(1) => return lhs.clone(),
            ArithOp::Mul if lhs.as_int() == Some(1) => return rhs.clone(),
            ArithOp::Sub if lhs == rhs => return Expr::int(0, bits),
            _ => {}
        }
        Self::new(ExprKind::Arith {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        })
    }

    pub fn add(&self, other: &Expr) -> Expr {
        Expr::arith(ArithOp::Add, self, other)
    }

    pub fn sub(&self, other: &Expr) -> Expr {
        Expr::arith(ArithOp::Sub, self, other)
    }

    pub fn mul(&self, other: &Expr) -> Expr {
        Expr::arith(ArithOp::Mul, self, other)
    }

    /// `self + k` at the width of `self`
    pub fn plus(&self, k: i128) -> Expr {
        self.add(&Expr::int(k, self.bits()))
    }

    pub fn neg(&self) -> Expr {
        match self.kind() {
            ExprKind::IntConst { value, bits } => Expr::int(-value, *bits),
            ExprKind::Neg(inner) => inner.clone(),
            _ => Self::new(ExprKind::Neg(self.clone())),
        }
    }

    /// Sign or zero extension to `bits`; truncates when `bits` is narrower.
    pub fn extend(&self, signed: bool, bits: u32) -> Expr {
        let from = self.bits();
        if from == bits {
            return self.clone();
        }
        if bits < from {
            return self.extract(bits);
        }
        match self.kind() {
            ExprKind::IntConst { value, bits: w } => {
                let v = if signed { *value } else { to_unsigned(*value, *w) };
                Expr::int(v, bits)
            }
            _ => Self::new(ExprKind::Extend {
                signed,
                bits,
                expr: self.clone(),
            }),
        }
    }

    pub fn extract(&self, bits: u32) -> Expr {
        let from = self.bits();
        if from == bits {
            return self.clone();
        }
        match self.kind() {
            ExprKind::IntConst { value, .. } => Expr::int(*value, bits),
            ExprKind::Extend { bits: _, expr, .. } if expr.bits() == bits => expr.clone(),
            _ => Self::new(ExprKind::Extract {
                bits,
                expr: self.clone(),
            }),
        }
    }

    // Arrays

    pub fn select(&self, index: &Expr) -> Expr {
        match self.kind() {
            ExprKind::ConstArray { value, .. } => value.clone(),
            ExprKind::Store {
                array,
                index: stored,
                value,
            } => match stored.eq(index).as_bool() {
                Some(true) => value.clone(),
                Some(false) => array.select(index),
                None => Self::new(ExprKind::Select {
                    array: self.clone(),
                    index: index.clone(),
                }),
            },
            _ => Self::new(ExprKind::Select {
                array: self.clone(),
                index: index.clone(),
            }),
        }
    }

    pub fn store(&self, index: &Expr, value: &Expr) -> Expr {
        Self::new(ExprKind::Store {
            array: self.clone(),
            index: index.clone(),
            value: value.clone(),
        })
    }

    /// Free variables with their sorts, in name order.
    pub fn variables(&self) -> BTreeMap<String, Sort> {
        let mut vars = BTreeMap::new();
        self.collect_variables(&mut vars);
        vars
    }

    pub fn collect_variables(&self, out: &mut BTreeMap<String, Sort>) {
        match self.kind() {
            ExprKind::BoolConst(_) | ExprKind::IntConst { .. } => {}
            ExprKind::Var { name, sort } => {
                out.entry(name.clone()).or_insert_with(|| sort.clone());
            }
            ExprKind::ConstArray { value, .. } => value.collect_variables(out),
            ExprKind::Not(e) | ExprKind::Neg(e) => e.collect_variables(out),
            ExprKind::Extend { expr, .. } | ExprKind::Extract { expr, .. } => {
                expr.collect_variables(out)
            }
            ExprKind::And(es) | ExprKind::Or(es) => {
                es.iter().for_each(|e| e.collect_variables(out))
            }
            ExprKind::Eq(a, b)
            | ExprKind::Select { array: a, index: b }
            | ExprKind::Cmp { lhs: a, rhs: b, .. }
            | ExprKind::Arith { lhs: a, rhs: b, .. } => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            ExprKind::Store {
                array,
                index,
                value,
            } => {
                array.collect_variables(out);
                index.collect_variables(out);
                value.collect_variables(out);
            }
            ExprKind::Ite { cond, then, els } => {
                cond.collect_variables(out);
                then.collect_variables(out);
                els.collect_variables(out);
            }
        }
    }

    /// Integer constants occurring in the expression, widened to i128.
    pub fn collect_constants(&self, out: &mut Vec<i128>) {
        match self.kind() {
            ExprKind::IntConst { value, .. } => out.push(*value),
            ExprKind::BoolConst(_) | ExprKind::Var { .. } => {}
            ExprKind::ConstArray { value, .. } => value.collect_constants(out),
            ExprKind::Not(e) | ExprKind::Neg(e) => e.collect_constants(out),
            ExprKind::Extend { expr, .. } | ExprKind::Extract { expr, .. } => {
                expr.collect_constants(out)
            }
            ExprKind::And(es) | ExprKind::Or(es) => {
                es.iter().for_each(|e| e.collect_constants(out))
            }
            ExprKind::Eq(a, b)
            | ExprKind::Select { array: a, index: b }
            | ExprKind::Cmp { lhs: a, rhs: b, .. }
            | ExprKind::Arith { lhs: a, rhs: b, .. } => {
                a.collect_constants(out);
                b.collect_constants(out);
            }
            ExprKind::Store {
                array,
                index,
                value,
            } => {
                array.collect_constants(out);
                index.collect_constants(out);
                value.collect_constants(out);
            }
            ExprKind::Ite { cond, then, els } => {
                cond.collect_constants(out);
                then.collect_constants(out);
                els.collect_constants(out);
            }
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", smtlib::term(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::var("x", Sort::BitVec(32))
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap(128, 8), -128);
        assert_eq!(wrap(255, 8), -1);
        assert_eq!(wrap(i32::MAX as i128 + 1, 32), i32::MIN as i128);
        assert_eq!(to_unsigned(-1, 16), 65535);
    }

    #[test]
    fn test_constant_folding() {
        let sum = Expr::int32(i32::MAX).add(&Expr::int32(1));
        assert_eq!(sum.as_int(), Some(i32::MIN as i128));
        assert!(Expr::int32(3).lt(&Expr::int32(4)).is_true());
        assert!(x().eq(&x()).is_true());
        assert_eq!(x().add(&Expr::int32(0)), x());
    }

    #[test]
    fn test_boolean_simplification() {
        let p = x().lt(&Expr::int32(5));
        assert_eq!(Expr::and([Expr::bool(true), p.clone()]), p);
        assert!(Expr::and([p.clone(), Expr::bool(false)]).is_false());
        assert_eq!(p.not().not(), p);
        assert!(Expr::or(Vec::<Expr>::new()).is_false());
    }

    #[test]
    fn test_select_over_store() {
        let arr = Expr::var("arr", Sort::array(Sort::BitVec(32), Sort::BitVec(32)));
        let stored = arr.store(&Expr::int32(1), &Expr::int32(7));
        assert_eq!(stored.select(&Expr::int32(1)).as_int(), Some(7));
        assert_eq!(stored.select(&Expr::int32(2)), arr.select(&Expr::int32(2)));
        assert!(matches!(stored.select(&x()).kind(), ExprKind::Select { .. }));

        let defaults = Expr::const_array(Sort::BitVec(32), Expr::int32(0));
        assert_eq!(defaults.select(&x()).as_int(), Some(0));
    }

    #[test]
    fn test_extend_and_extract() {
        let c = Expr::int(-1, 16);
        assert_eq!(c.extend(false, 32).as_int(), Some(65535));
        assert_eq!(c.extend(true, 32).as_int(), Some(-1));
        let b = Expr::var("b", Sort::BitVec(8));
        assert_eq!(b.extend(true, 32).extract(8), b);
        assert_eq!(b.extend(true, 32).sort(), Sort::BitVec(32));
    }

    #[test]
    fn test_variables() {
        let arr = Expr::var("arr", Sort::array(Sort::BitVec(32), Sort::Bool));
        let e = Expr::and([arr.select(&x()), x().gt(&Expr::var("y", Sort::BitVec(32)))]);
        let names: Vec<String> = e.variables().into_keys().collect();
        assert_eq!(names, vec!["arr", "x", "y"]);
    }
}
