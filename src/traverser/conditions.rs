// Conditional branches and switches

use super::Step;
use crate::cfg::EdgeType;
use crate::error::EngineError;
use crate::expr::{CmpOp, Expr};
use crate::program::{CondOp, Condition, Operand, StmtIndex, Type};
use crate::state::SymbolicStateUpdate;
use crate::value::SymbolicValue;

impl<'a> Step<'a> {
    /// Boolean expression of `op` over two evaluated operands.
    fn predicate(
        &self,
        op: CondOp,
        lhs: &SymbolicValue,
        rhs: &SymbolicValue,
    ) -> Result<(Expr, Option<(Expr, Expr)>), EngineError> {
        match (lhs, rhs) {
            (SymbolicValue::Primitive(a), SymbolicValue::Primitive(b)) => {
                if a.ty == Type::Boolean && b.ty == Type::Boolean {
                    match op {
                        CondOp::Eq => return Ok((a.expr.eq(&b.expr), None)),
                        CondOp::Ne => return Ok((a.expr.ne(&b.expr), None)),
                        _ => {}
                    }
                }
                let a = a.promoted();
                let b = b.promoted();
                let bits = a.expr.bits().max(b.expr.bits());
                let x = a.expr.extend(true, bits);
                let y = b.expr.extend(true, bits);
                let pred = match op {
                    CondOp::Eq => x.eq(&y),
                    CondOp::Ne => x.ne(&y),
                    CondOp::Lt => Expr::cmp(CmpOp::Lt, &x, &y),
                    CondOp::Le => Expr::cmp(CmpOp::Le, &x, &y),
                    CondOp::Gt => Expr::cmp(CmpOp::Gt, &x, &y),
                    CondOp::Ge => Expr::cmp(CmpOp::Ge, &x, &y),
                };
                Ok((pred, Some((x, y))))
            }
            (SymbolicValue::Primitive(_), _) | (_, SymbolicValue::Primitive(_)) => Err(
                self.invariant("comparison between a primitive and a reference"),
            ),
            _ => match op {
                CondOp::Eq => Ok((lhs.expr().eq(rhs.expr()), None)),
                CondOp::Ne => Ok((lhs.expr().ne(rhs.expr()), None)),
                _ => Err(self.invariant(format!("ordered comparison {op:?} of references"))),
            },
        }
    }

    /// Soft equality nudging a witness of `x op y` to the boundary.
    fn boundary_hint(&self, op: CondOp, x: &Expr, y: &Expr) -> Option<Expr> {
        match op {
            CondOp::Lt => Some(x.eq(&y.plus(-1))),
            CondOp::Le | CondOp::Ge => Some(x.eq(y)),
            CondOp::Gt => Some(x.eq(&y.plus(1))),
            CondOp::Eq | CondOp::Ne => None,
        }
    }

    fn branch_update(&self, op: CondOp, constraint: Expr, operands: &Option<(Expr, Expr)>) -> SymbolicStateUpdate {
        let mut update = SymbolicStateUpdate::hard(constraint);
        if self.ctx.config.preferred_cex {
            if let Some((x, y)) = operands {
                update.soft.extend(self.boundary_hint(op, x, y));
            }
        }
        update
    }

    pub(crate) fn branch(&mut self, cond: &Condition, target: StmtIndex) -> Result<(), EngineError> {
        let lhs = self.operand(&cond.lhs)?;
        let rhs = self.operand(&cond.rhs)?;
        let (pred, operands) = self.predicate(cond.op, &lhs, &rhs)?;
        let fallthrough = self
            .graph
            .successor(self.state.stmt.stmt)
            .ok_or_else(|| self.invariant("conditional branch is the last statement"))?;

        let taken = self.branch_update(cond.op, pred.clone(), &operands);
        let skipped = self.branch_update(cond.op.negate(), pred.not(), &operands);
        self.jump(target, EdgeType::TrueBranch, taken)?;
        self.jump(fallthrough, EdgeType::FalseBranch, skipped)
    }

    pub(crate) fn switch(
        &mut self,
        key: &Operand,
        cases: &[(i64, StmtIndex)],
        default: StmtIndex,
    ) -> Result<(), EngineError> {
        let key = self.operand(key)?;
        let key = self.int_value(&key)?;
        let mut misses = Vec::with_capacity(cases.len());
        for (value, target) in cases {
            let hit = key.eq(&Expr::int(*value as i128, 32));
            misses.push(hit.not());
            self.jump(*target, EdgeType::Case(*value), SymbolicStateUpdate::hard(hit))?;
        }
        self.jump(default, EdgeType::Default, SymbolicStateUpdate::hard(Expr::and(misses)))
    }
}
