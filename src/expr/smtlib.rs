//! SMT-LIB2 rendering of expressions

use std::fmt::Write;

use super::{to_unsigned, ArithOp, CmpOp, Expr, ExprKind, Sort};

pub fn sort(sort: &Sort) -> String {
    match sort {
        Sort::Bool => "Bool".to_string(),
        Sort::BitVec(bits) => format!("(_ BitVec {})", bits),
        Sort::Array(index, element) => format!("(Array {} {})", self::sort(index), self::sort(element)),
    }
}

/// Quoted symbol, safe for any variable name.
pub fn symbol(name: &str) -> String {
    format!("|{}|", name.replace('|', "_").replace('\\', "_"))
}

pub fn declare(name: &str, s: &Sort) -> String {
    format!("(declare-fun {} () {})", symbol(name), sort(s))
}

pub fn int_literal(value: i128, bits: u32) -> String {
    format!("(_ bv{} {})", to_unsigned(value, bits), bits)
}

pub fn term(expr: &Expr) -> String {
    let mut out = String::new();
    write_term(expr, &mut out);
    out
}

fn write_all(op: &str, args: &[&Expr], out: &mut String) {
    out.push('(');
    out.push_str(op);
    for arg in args {
        out.push(' ');
        write_term(arg, out);
    }
    out.push(')');
}

fn write_term(expr: &Expr, out: &mut String) {
    match expr.kind() {
        ExprKind::BoolConst(b) => out.push_str(if *b { "true" } else { "false" }),
        ExprKind::IntConst { value, bits } => out.push_str(&int_literal(*value, *bits)),
        ExprKind::Var { name, .. } => out.push_str(&symbol(name)),
        ExprKind::ConstArray { index, value } => {
            let s = Sort::array(index.clone(), value.sort());
            write!(out, "((as const {}) ", sort(&s)).ok();
            write_term(value, out);
            out.push(')');
        }
        ExprKind::Select { array, index } => write_all("select", &[array, index], out),
        ExprKind::Store {
            array,
            index,
            value,
        } => write_all("store", &[array, index, value], out),
        ExprKind::Not(e) => write_all("not", &[e], out),
        ExprKind::And(es) => write_all("and", &es.iter().collect::<Vec<_>>(), out),
        ExprKind::Or(es) => write_all("or", &es.iter().collect::<Vec<_>>(), out),
        ExprKind::Ite { cond, then, els } => write_all("ite", &[cond, then, els], out),
        ExprKind::Eq(a, b) => write_all("=", &[a, b], out),
        ExprKind::Cmp { op, lhs, rhs } => {
            let name = match op {
                CmpOp::Lt => "bvslt",
                CmpOp::Le => "bvsle",
                CmpOp::Gt => "bvsgt",
                CmpOp::Ge => "bvsge",
            };
            write_all(name, &[lhs, rhs], out)
        }
        ExprKind::Arith { op, lhs, rhs } => {
            let name = match op {
                ArithOp::Add => "bvadd",
                ArithOp::Sub => "bvsub",
                ArithOp::Mul => "bvmul",
                ArithOp::Div => "bvsdiv",
                ArithOp::Rem => "bvsrem",
                ArithOp::Shl => "bvshl",
                ArithOp::Shr => "bvashr",
                ArithOp::Ushr => "bvlshr",
                ArithOp::And => "bvand",
                ArithOp::Or => "bvor",
                ArithOp::Xor => "bvxor",
            };
            if matches!(op, ArithOp::Shl | ArithOp::Shr | ArithOp::Ushr) {
                // shift distance is masked to the operand width
                let bits = lhs.bits();
                let mask = Expr::int((bits.max(1) - 1) as i128, bits);
                write!(out, "({} ", name).ok();
                write_term(lhs, out);
                out.push_str(" (bvand ");
                write_term(rhs, out);
                out.push(' ');
                write_term(&mask, out);
                out.push_str("))");
            } else {
                write_all(name, &[lhs, rhs], out)
            }
        }
        ExprKind::Neg(e) => write_all("bvneg", &[e], out),
        ExprKind::Extend { signed, bits, expr } => {
            let by = bits.saturating_sub(expr.bits());
            let name = if *signed {
                format!("(_ sign_extend {})", by)
            } else {
                format!("(_ zero_extend {})", by)
            };
            write_all(&name, &[expr], out)
        }
        ExprKind::Extract { bits, expr } => {
            write_all(&format!("(_ extract {} 0)", bits.saturating_sub(1)), &[expr], out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_terms() {
        let x = Expr::var("x", Sort::BitVec(32));
        assert_eq!(term(&x.lt(&Expr::int32(-1))), "(bvslt |x| (_ bv4294967295 32))");
        assert_eq!(
            term(&x.extend(true, 64)),
            "((_ sign_extend 32) |x|)"
        );
        assert_eq!(
            term(&Expr::arith(ArithOp::Shl, &x, &Expr::var("s", Sort::BitVec(32)))),
            "(bvshl |x| (bvand |s| (_ bv31 32)))"
        );
    }

    #[test]
    fn test_render_arrays() {
        let s = Sort::array(Sort::BitVec(32), Sort::Bool);
        assert_eq!(sort(&s), "(Array (_ BitVec 32) Bool)");
        let c = Expr::const_array(Sort::BitVec(32), Expr::bool(false));
        assert_eq!(term(&c), "((as const (Array (_ BitVec 32) Bool)) false)");
        assert_eq!(
            declare("touched", &s),
            "(declare-fun |touched| () (Array (_ BitVec 32) Bool))"
        );
    }
}
