//! Evaluation of expressions under a (possibly partial) assignment

use super::{to_unsigned, wrap, ArithOp, CmpOp, Expr, ExprKind, Sort};

/// A value of an expression under some assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int { value: i128, bits: u32 },
    Array {
        base: ArrayBase,
        /// Explicit stores, later entries win
        stores: Vec<(Value, Value)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayBase {
    /// Every cell holds this value
    Const(Box<Value>),
    /// Cells of a named array variable, reached through `path`
    Symbolic {
        name: String,
        path: Vec<i128>,
        element: Sort,
    },
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// Identifies an atomic unknown: a scalar variable or one cell of an array
/// variable (nested arrays give a path of indices).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Scalar(String),
    Cell { array: String, path: Vec<i128> },
}

/// Raised when evaluation needs a key the assignment does not define.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Missing {
    pub key: Key,
    pub sort: Sort,
}

/// Source of values for keys.
pub trait Assignment {
    fn lookup(&self, key: &Key, sort: &Sort) -> Option<Value>;
}

/// Arithmetic with Java semantics at width `bits`. Division by zero follows
/// SMT-LIB (`-1`/`1` for quotients, the dividend for remainders); callers
/// guard real divisions with a failure branch.
pub fn apply_arith(op: ArithOp, a: i128, b: i128, bits: u32) -> i128 {
    let shift = |b: i128| (b as u32) & (bits.max(1) - 1);
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div if b == 0 => {
            if a >= 0 {
                -1
            } else {
                1
            }
        }
        ArithOp::Div => a / b,
        ArithOp::Rem if b == 0 => a,
        ArithOp::Rem => a % b,
        ArithOp::Shl => a << shift(b),
        ArithOp::Shr => a >> shift(b),
        ArithOp::Ushr => to_unsigned(a, bits) >> shift(b),
        ArithOp::And => a & b,
        ArithOp::Or => a | b,
        ArithOp::Xor => a ^ b,
    };
    wrap(result, bits)
}

fn compare(op: CmpOp, a: i128, b: i128) -> bool {
    match op {
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

fn int_of(value: Value) -> i128 {
    value.as_int().unwrap_or(0)
}

fn bool_of(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}

/// Evaluates `expr`. Connectives short-circuit, so a conjunction with a false
/// operand is false even when other operands are unknown.
pub fn evaluate<A: Assignment + ?Sized>(expr: &Expr, assignment: &A) -> Result<Value, Missing> {
    Ok(match expr.kind() {
        ExprKind::BoolConst(b) => Value::Bool(*b),
        ExprKind::IntConst { value, bits } => Value::Int {
            value: *value,
            bits: *bits,
        },
        ExprKind::Var { name, sort } => match sort {
            Sort::Array(_, element) => Value::Array {
                base: ArrayBase::Symbolic {
                    name: name.clone(),
                    path: Vec::new(),
                    element: (**element).clone(),
                },
                stores: Vec::new(),
            },
            _ => {
                let key = Key::Scalar(name.clone());
                assignment.lookup(&key, sort).ok_or(Missing {
                    key,
                    sort: sort.clone(),
                })?
            }
        },
        ExprKind::ConstArray { value, .. } => Value::Array {
            base: ArrayBase::Const(Box::new(evaluate(value, assignment)?)),
            stores: Vec::new(),
        },
        ExprKind::Select { array, index } => {
            let array = evaluate(array, assignment)?;
            let index = evaluate(index, assignment)?;
            select_value(array, &index, assignment)?
        }
        ExprKind::Store {
            array,
            index,
            value,
        } => match evaluate(array, assignment)? {
            Value::Array { base, mut stores } => {
                stores.push((evaluate(index, assignment)?, evaluate(value, assignment)?));
                Value::Array { base, stores }
            }
            other => other,
        },
        ExprKind::Not(e) => Value::Bool(!bool_of(&evaluate(e, assignment)?)),
        ExprKind::And(es) => {
            let mut missing = None;
            for e in es {
                match evaluate(e, assignment) {
                    Ok(v) if !bool_of(&v) => return Ok(Value::Bool(false)),
                    Ok(_) => {}
                    Err(m) => {
                        missing.get_or_insert(m);
                    }
                }
            }
            match missing {
                Some(m) => return Err(m),
                None => Value::Bool(true),
            }
        }
        ExprKind::Or(es) => {
            let mut missing = None;
            for e in es {
                match evaluate(e, assignment) {
                    Ok(v) if bool_of(&v) => return Ok(Value::Bool(true)),
                    Ok(_) => {}
                    Err(m) => {
                        missing.get_or_insert(m);
                    }
                }
            }
            match missing {
                Some(m) => return Err(m),
                None => Value::Bool(false),
            }
        }
        ExprKind::Ite { cond, then, els } => {
            if bool_of(&evaluate(cond, assignment)?) {
                evaluate(then, assignment)?
            } else {
                evaluate(els, assignment)?
            }
        }
        ExprKind::Eq(a, b) => {
            let a = evaluate(a, assignment)?;
            let b = evaluate(b, assignment)?;
            Value::Bool(a == b)
        }
        ExprKind::Cmp { op, lhs, rhs } => {
            let a = int_of(evaluate(lhs, assignment)?);
            let b = int_of(evaluate(rhs, assignment)?);
            Value::Bool(compare(*op, a, b))
        }
        ExprKind::Arith { op, lhs, rhs } => {
            let bits = lhs.bits();
            let a = int_of(evaluate(lhs, assignment)?);
            let b = int_of(evaluate(rhs, assignment)?);
            Value::Int {
                value: apply_arith(*op, a, b, bits),
                bits,
            }
        }
        ExprKind::Neg(e) => {
            let bits = e.bits();
            Value::Int {
                value: wrap(-int_of(evaluate(e, assignment)?), bits),
                bits,
            }
        }
        ExprKind::Extend { signed, bits, expr } => {
            let from = expr.bits();
            let v = int_of(evaluate(expr, assignment)?);
            let v = if *signed { v } else { to_unsigned(v, from) };
            Value::Int {
                value: wrap(v, *bits),
                bits: *bits,
            }
        }
        ExprKind::Extract { bits, expr } => Value::Int {
            value: wrap(int_of(evaluate(expr, assignment)?), *bits),
            bits: *bits,
        },
    })
}

fn select_value<A: Assignment + ?Sized>(
    array: Value,
    index: &Value,
    assignment: &A,
) -> Result<Value, Missing> {
    let Value::Array { base, stores } = array else {
        return Ok(array);
    };
    if let Some((_, v)) = stores.iter().rev().find(|(i, _)| i == index) {
        return Ok(v.clone());
    }
    match base {
        ArrayBase::Const(v) => Ok(*v),
        ArrayBase::Symbolic {
            name,
            mut path,
            element,
        } => {
            path.push(index.as_int().unwrap_or(0));
            match element {
                Sort::Array(_, inner) => Ok(Value::Array {
                    base: ArrayBase::Symbolic {
                        name,
                        path,
                        element: *inner,
                    },
                    stores: Vec::new(),
                }),
                sort => {
                    let key = Key::Cell { array: name, path };
                    assignment
                        .lookup(&key, &sort)
                        .ok_or(Missing { key, sort })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Map(HashMap<Key, Value>);

    impl Assignment for Map {
        fn lookup(&self, key: &Key, _sort: &Sort) -> Option<Value> {
            self.0.get(key).cloned()
        }
    }

    fn int(v: i128) -> Value {
        Value::Int { value: v, bits: 32 }
    }

    #[test]
    fn test_java_division_semantics() {
        assert_eq!(apply_arith(ArithOp::Div, -7, 2, 32), -3);
        assert_eq!(apply_arith(ArithOp::Rem, -7, 2, 32), -1);
        assert_eq!(
            apply_arith(ArithOp::Div, i32::MIN as i128, -1, 32),
            i32::MIN as i128
        );
        assert_eq!(apply_arith(ArithOp::Ushr, -1, 28, 32), 15);
        assert_eq!(apply_arith(ArithOp::Shl, 1, 33, 32), 2);
    }

    #[test]
    fn test_evaluate_nested_select() {
        let sort = Sort::array(
            Sort::BitVec(32),
            Sort::array(Sort::BitVec(32), Sort::BitVec(32)),
        );
        let chunk = Expr::var("Multi", sort);
        let cell = chunk.select(&Expr::int32(3)).select(&Expr::int32(1));

        let mut map = HashMap::new();
        map.insert(
            Key::Cell {
                array: "Multi".into(),
                path: vec![3, 1],
            },
            int(42),
        );
        assert_eq!(evaluate(&cell, &Map(map)), Ok(int(42)));
    }

    #[test]
    fn test_missing_key_reported() {
        let x = Expr::var("x", Sort::BitVec(32));
        let err = evaluate(&x.lt(&Expr::int32(1)), &Map(HashMap::new())).unwrap_err();
        assert_eq!(err.key, Key::Scalar("x".into()));
    }

    #[test]
    fn test_short_circuit() {
        let x = Expr::var("x", Sort::BitVec(32));
        let y = Expr::var("y", Sort::BitVec(32));
        let mut map = HashMap::new();
        map.insert(Key::Scalar("x".into()), int(0));
        let conj = Expr::and([x.gt(&Expr::int32(0)), y.gt(&Expr::int32(0))]);
        assert_eq!(evaluate(&conj, &Map(map)), Ok(Value::Bool(false)));
    }

    #[test]
    fn test_store_then_select() {
        let arr = Expr::var("a", Sort::array(Sort::BitVec(32), Sort::BitVec(32)));
        let i = Expr::var("i", Sort::BitVec(32));
        let e = arr.store(&i, &Expr::int32(5)).select(&Expr::int32(2));
        let mut map = HashMap::new();
        map.insert(Key::Scalar("i".into()), int(2));
        assert_eq!(evaluate(&e, &Map(map)), Ok(int(5)));
    }
}
