// Constants and primitive arithmetic

use super::Step;
use crate::error::EngineError;
use crate::expr::{ArithOp, Expr};
use crate::memory::MemoryUpdate;
use crate::program::builtins::ARITHMETIC_EXCEPTION;
use crate::program::{BinOp, Constant, Type, CLASS_CLASS};
use crate::state::FailureKind;
use crate::value::{ConcreteHint, PrimitiveValue, ReferenceValue, SymbolicValue, TypeStorage};
use crate::wrappers;

impl<'a> Step<'a> {
    pub(crate) fn constant(&mut self, constant: &Constant) -> Result<SymbolicValue, EngineError> {
        let value = match constant {
            Constant::Boolean(b) => SymbolicValue::primitive(Type::Boolean, Expr::bool(*b)),
            Constant::Byte(v) => SymbolicValue::primitive(Type::Byte, Expr::int(*v as i128, 8)),
            Constant::Short(v) => SymbolicValue::primitive(Type::Short, Expr::int(*v as i128, 16)),
            Constant::Char(v) => SymbolicValue::primitive(Type::Char, Expr::int(*v as i128, 16)),
            Constant::Int(v) => SymbolicValue::primitive(Type::Int, Expr::int32(*v)),
            Constant::Long(v) => SymbolicValue::primitive(Type::Long, Expr::int(*v as i128, 64)),
            Constant::Null => SymbolicValue::null(Type::Null),
            Constant::Str(text) => SymbolicValue::Object(wrappers::string::literal(self, text)),
            Constant::Class(ty) => SymbolicValue::Object(self.class_ref(ty)),
        };
        Ok(value)
    }

    /// Class literal object; its type cells name the referenced type.
    fn class_ref(&mut self, ty: &Type) -> ReferenceValue {
        let ctx = self.ctx;
        let registry = ctx.types.registry();
        let addr = registry.class_ref_addr(ty);
        let class = Type::class(CLASS_CLASS);
        self.queue_hard(registry.has_type(&addr, &class));
        let type_id = Expr::int32(registry.type_id(ty));
        let dims = Expr::int32(ty.num_dimensions() as i32);
        self.queued.memory +=
            MemoryUpdate::store(self.ctx.chunks.class_ref_type(), addr.clone(), type_id);
        self.queued.memory +=
            MemoryUpdate::store(self.ctx.chunks.class_ref_dimensions(), addr.clone(), dims);
        let hint = ConcreteHint::ClassRef(ty.clone());
        self.queued.memory.concrete.insert(addr.clone(), hint.clone());
        ReferenceValue::new(TypeStorage::exact(class), addr).with_concrete(hint)
    }

    /// A primitive operand promoted to `int`; longs are rejected.
    pub(crate) fn int_value(&self, value: &SymbolicValue) -> Result<Expr, EngineError> {
        match value {
            SymbolicValue::Primitive(p) if p.ty != Type::Long => Ok(p.promoted().expr),
            other => Err(self.invariant(format!("expected an int, found {}", other.ty()))),
        }
    }

    fn primitive(&self, value: &SymbolicValue) -> Result<PrimitiveValue, EngineError> {
        value
            .as_primitive()
            .cloned()
            .ok_or_else(|| self.invariant(format!("arithmetic on reference {}", value.ty())))
    }

    pub(crate) fn binary(
        &mut self,
        op: BinOp,
        lhs: &SymbolicValue,
        rhs: &SymbolicValue,
    ) -> Result<PrimitiveValue, EngineError> {
        let lhs = self.primitive(lhs)?;
        let rhs = self.primitive(rhs)?;

        if lhs.ty == Type::Boolean && rhs.ty == Type::Boolean {
            let expr = match op {
                BinOp::And => Some(Expr::and([lhs.expr.clone(), rhs.expr.clone()])),
                BinOp::Or => Some(Expr::or([lhs.expr.clone(), rhs.expr.clone()])),
                BinOp::Xor => Some(lhs.expr.ne(&rhs.expr)),
                _ => None,
            };
            if let Some(expr) = expr {
                return Ok(PrimitiveValue::new(Type::Boolean, expr));
            }
        }

        let a = lhs.promoted();
        let b = rhs.promoted();
        if matches!(op, BinOp::Shl | BinOp::Shr | BinOp::Ushr) {
            let count = b.expr.extend(true, a.expr.bits());
            let op = match op {
                BinOp::Shl => ArithOp::Shl,
                BinOp::Shr => ArithOp::Shr,
                _ => ArithOp::Ushr,
            };
            return Ok(PrimitiveValue::new(a.ty.clone(), Expr::arith(op, &a.expr, &count)));
        }

        let ty = if a.ty == Type::Long || b.ty == Type::Long {
            Type::Long
        } else {
            Type::Int
        };
        let bits = if ty == Type::Long { 64 } else { 32 };
        let x = a.expr.extend(true, bits);
        let y = b.expr.extend(true, bits);

        if op == BinOp::Cmp {
            let result = Expr::ite(
                &x.lt(&y),
                &Expr::int32(-1),
                &Expr::ite(&x.eq(&y), &Expr::int32(0), &Expr::int32(1)),
            );
            return Ok(PrimitiveValue::new(Type::Int, result));
        }

        let arith = match op {
            BinOp::Add => ArithOp::Add,
            BinOp::Sub => ArithOp::Sub,
            BinOp::Mul => ArithOp::Mul,
            BinOp::Div => ArithOp::Div,
            BinOp::Rem => ArithOp::Rem,
            BinOp::And => ArithOp::And,
            BinOp::Or => ArithOp::Or,
            BinOp::Xor => ArithOp::Xor,
            BinOp::Shl | BinOp::Shr | BinOp::Ushr | BinOp::Cmp => {
                return Err(self.invariant(format!("{op:?} handled above")));
            }
        };
        if matches!(arith, ArithOp::Div | ArithOp::Rem) {
            self.implicit_failure(
                y.eq(&Expr::int(0, bits)),
                ARITHMETIC_EXCEPTION,
                FailureKind::Implicit,
            )?;
        }
        let result = Expr::arith(arith, &x, &y);
        if self.ctx.config.check_overflow && matches!(arith, ArithOp::Add | ArithOp::Sub | ArithOp::Mul) {
            let wide = Expr::arith(arith, &x.extend(true, bits * 2), &y.extend(true, bits * 2));
            let overflow = wide.ne(&result.extend(true, bits * 2));
            self.implicit_failure(overflow, ARITHMETIC_EXCEPTION, FailureKind::Overflow)?;
        }
        Ok(PrimitiveValue::new(ty, result))
    }

    pub(crate) fn negate(&mut self, value: &SymbolicValue) -> Result<PrimitiveValue, EngineError> {
        let value = self.primitive(value)?.promoted();
        Ok(PrimitiveValue::new(value.ty, value.expr.neg()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{context, run_to_end};
    use crate::config::EngineConfig;
    use crate::engine::EngineContext;
    use crate::program::Program;
    use crate::state::{FailureKind, MethodResult};
    use std::sync::Arc;

    const DIVIDE: &str = r#"{"classes":[{"name":"demo.M","methods":[
        {"name":"div","params":["int","int"],"ret":"int","static":true,"body":{"stmts":[
            {"op":"identity","local":"a","value":{"kind":"parameter","index":0}},
            {"op":"identity","local":"b","value":{"kind":"parameter","index":1}},
            {"op":"assign","target":{"local":"c"},"value":{"binary":{"op":"div","lhs":{"local":"a"},"rhs":{"local":"b"}}}},
            {"op":"return","value":{"local":"c"}}
        ]}},
        {"name":"add","params":["int","int"],"ret":"int","static":true,"body":{"stmts":[
            {"op":"identity","local":"a","value":{"kind":"parameter","index":0}},
            {"op":"identity","local":"b","value":{"kind":"parameter","index":1}},
            {"op":"assign","target":{"local":"c"},"value":{"binary":{"op":"add","lhs":{"local":"a"},"rhs":{"local":"b"}}}},
            {"op":"return","value":{"local":"c"}}
        ]}},
        {"name":"fold","ret":"int","static":true,"body":{"stmts":[
            {"op":"assign","target":{"local":"c"},"value":{"binary":{"op":"shl","lhs":{"const":{"int":1}},"rhs":{"const":{"int":33}}}}},
            {"op":"return","value":{"local":"c"}}
        ]}}
    ]}]}"#;

    #[test]
    fn test_division_forks_arithmetic_exception() {
        let ctx = context(DIVIDE);
        let done = run_to_end(&ctx, "demo.M.div");
        assert_eq!(done.len(), 2);
        assert!(done.iter().any(|s| matches!(
            &s.result,
            Some(MethodResult::Failure(f)) if f.kind == FailureKind::Implicit
        )));
    }

    #[test]
    fn test_overflow_checks_only_when_enabled() {
        let ctx = context(DIVIDE);
        assert_eq!(run_to_end(&ctx, "demo.M.add").len(), 1);

        let program = Program::from_json(DIVIDE).unwrap();
        let config = EngineConfig::default().with_check_overflow(true);
        let ctx = EngineContext::new(Arc::new(program), config);
        let done = run_to_end(&ctx, "demo.M.add");
        assert_eq!(done.len(), 2);
        assert!(done.iter().any(|s| matches!(
            &s.result,
            Some(MethodResult::Failure(f)) if f.kind == FailureKind::Overflow
        )));
    }

    #[test]
    fn test_shift_count_is_masked() {
        let ctx = context(DIVIDE);
        let done = run_to_end(&ctx, "demo.M.fold");
        match &done[0].result {
            Some(MethodResult::Success(Some(v))) => assert_eq!(v.expr().as_int(), Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
