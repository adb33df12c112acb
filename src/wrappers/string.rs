// java.lang.String as a length plus an array of UTF-16 code units

use super::{Invocation, Wrapper, WrapperKind};
use crate::engine::EngineContext;
use crate::error::EngineError;
use crate::expr::{to_unsigned, Expr, Sort, ADDR_BITS};
use crate::memory::{ChunkDescriptor, ChunkRegistry, MemoryUpdate};
use crate::program::builtins::STRING_INDEX_OUT_OF_BOUNDS_EXCEPTION;
use crate::program::{FieldRef, MethodRef, Type, CONSTRUCTOR, STRING_CLASS};
use crate::resolver::{ConcreteModel, Literal, ModelId, Resolver};
use crate::state::FailureKind;
use crate::traverser::Step;
use crate::value::{ConcreteHint, ReferenceValue, SymbolicValue, TypeStorage};

pub struct StringWrapper;

fn length_field() -> FieldRef {
    FieldRef {
        class: STRING_CLASS.to_string(),
        name: "length".to_string(),
        ty: Type::Int,
    }
}

fn chars_chunk(chunks: &ChunkRegistry) -> ChunkDescriptor {
    chunks.chunk(
        "java.lang.String.chars",
        Sort::array(Sort::BitVec(ADDR_BITS), Sort::BitVec(16)),
    )
}

/// Interned string constant.
pub(crate) fn literal(step: &mut Step<'_>, text: &str) -> ReferenceValue {
    let ctx = step.ctx;
    let ty = Type::class(STRING_CLASS);
    let addr = Expr::addr(ctx.counters.literal_addr(text));
    let length = ctx.chunks.field(&length_field());
    let hint = ConcreteHint::Wrapper(WrapperKind::String);
    let value = ReferenceValue::new(TypeStorage::exact(ty.clone()), addr.clone()).with_concrete(hint.clone());

    if step.is_visited(&addr) {
        return value;
    }
    let units: Vec<u16> = text.encode_utf16().collect();
    let count = SymbolicValue::primitive(Type::Int, Expr::int32(units.len() as i32));
    let cells = units
        .iter()
        .enumerate()
        .fold(Expr::const_array(Sort::BitVec(ADDR_BITS), Expr::int(0, 16)), |acc, (i, c)| {
            acc.store(&Expr::int32(i as i32), &Expr::int(*c as i128, 16))
        });

    step.queue_hard(ctx.types.registry().has_type(&addr, &ty));
    step.queued.memory += MemoryUpdate::touch_address(addr.clone());
    step.queued.memory.visited.push(addr.clone());
    step.queued.memory += MemoryUpdate::store(length.clone(), addr.clone(), count.expr().clone());
    step.queued.memory += MemoryUpdate::store(chars_chunk(&ctx.chunks), addr.clone(), cells);
    step.queued.memory.field_values.insert((length.id, addr.clone()), count);
    step.queued.memory.concrete.insert(addr, hint);
    value
}

fn current_length(step: &mut Step<'_>, addr: &Expr) -> Expr {
    let chunk = step.ctx.chunks.field(&length_field());
    step.queued.memory += MemoryUpdate::touch_chunk(chunk.clone());
    step.memory()
        .find_array(&chunk, &crate::memory::MemoryState::Current)
        .select(addr)
}

impl Wrapper for StringWrapper {
    fn kind(&self) -> WrapperKind {
        WrapperKind::String
    }

    fn input_invariants(&self, ctx: &EngineContext, addr: &Expr) -> Vec<Expr> {
        let length = ctx.chunks.field(&length_field()).initial_array().select(addr);
        vec![
            length.ge(&Expr::int32(0)),
            length.le(&Expr::int32(ctx.config.max_string_length)),
        ]
    }

    fn invoke(
        &self,
        step: &mut Step<'_>,
        receiver: &ReferenceValue,
        method: &MethodRef,
        args: &[SymbolicValue],
    ) -> Result<Invocation, EngineError> {
        let addr = &receiver.addr;
        let value = match (method.name.as_str(), args) {
            ("length", []) => SymbolicValue::primitive(Type::Int, current_length(step, addr)),
            ("isEmpty", []) => {
                let length = current_length(step, addr);
                SymbolicValue::primitive(Type::Boolean, length.eq(&Expr::int32(0)))
            }
            ("charAt", [index]) => {
                let index = step.int_value(index)?;
                let length = current_length(step, addr);
                let outside = Expr::or([index.lt(&Expr::int32(0)), index.ge(&length)]);
                step.implicit_failure(outside, STRING_INDEX_OUT_OF_BOUNDS_EXCEPTION, FailureKind::Implicit)?;
                let chunk = chars_chunk(&step.ctx.chunks);
                step.queued.memory += MemoryUpdate::touch_chunk(chunk.clone());
                let c = step
                    .memory()
                    .find_array(&chunk, &crate::memory::MemoryState::Current)
                    .select(addr)
                    .select(&index);
                let c = SymbolicValue::primitive(Type::Char, c);
                step.prefer_readable(&c);
                c
            }
            (CONSTRUCTOR, []) => {
                let chunk = step.ctx.chunks.field(&length_field());
                step.queued.memory += MemoryUpdate::store(chunk, addr.clone(), Expr::int32(0));
                return Ok(Invocation::Value(None));
            }
            _ => return Ok(Invocation::Unbounded),
        };
        Ok(Invocation::Value(Some(value)))
    }

    fn resolve(&self, resolver: &mut Resolver<'_>, addr: &Expr, _id: ModelId) -> ConcreteModel {
        let ctx = resolver.ctx();
        let length_chunk = ctx.chunks.field(&length_field());
        let chars = resolver.cell(&chars_chunk(&ctx.chunks), addr);
        let length = resolver
            .eval_int(&resolver.cell(&length_chunk, addr))
            .clamp(0, ctx.config.max_string_length as i128);
        let units: Vec<u16> = (0..length)
            .map(|i| to_unsigned(resolver.eval_int(&chars.select(&Expr::int32(i as i32))), 16) as u16)
            .collect();
        ConcreteModel::Primitive {
            ty: Type::class(STRING_CLASS),
            value: Literal::Str(String::from_utf16_lossy(&units)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::traverser::tests::{context, run_to_end};
    use crate::state::{FailureKind, MethodResult};

    const STRINGS: &str = r#"{"classes":[{"name":"demo.S","methods":[
        {"name":"first","params":["java.lang.String"],"ret":"char","static":true,"body":{"stmts":[
            {"op":"identity","local":"s","value":{"kind":"parameter","index":0}},
            {"op":"assign","target":{"local":"c"},"value":{"invoke":{"kind":"virtual","method":{"class":"java.lang.String","name":"charAt","params":["int"],"ret":"char"},"base":"s","args":[{"const":{"int":0}}]}}},
            {"op":"return","value":{"local":"c"}}
        ]}},
        {"name":"size","ret":"int","static":true,"body":{"stmts":[
            {"op":"assign","target":{"local":"s"},"value":{"use":{"const":{"str":"héllo"}}}},
            {"op":"assign","target":{"local":"n"},"value":{"invoke":{"kind":"virtual","method":{"class":"java.lang.String","name":"length","ret":"int"},"base":"s"}}},
            {"op":"return","value":{"local":"n"}}
        ]}}
    ]}]}"#;

    #[test]
    fn test_char_at_forks_null_and_bounds() {
        let ctx = context(STRINGS);
        let done = run_to_end(&ctx, "demo.S.first");
        assert_eq!(done.len(), 3);
        let failures: Vec<String> = done
            .iter()
            .filter_map(|s| match &s.result {
                Some(MethodResult::Failure(f)) if f.kind == FailureKind::Implicit => Some(f.class.clone()),
                _ => None,
            })
            .collect();
        assert!(failures.iter().any(|c| c.ends_with("NullPointerException")));
        assert!(failures.iter().any(|c| c.ends_with("StringIndexOutOfBoundsException")));
    }

    #[test]
    fn test_literal_length_is_known() {
        let ctx = context(STRINGS);
        let done = run_to_end(&ctx, "demo.S.size");
        assert_eq!(done.len(), 1);
        match &done[0].result {
            Some(MethodResult::Success(Some(v))) => assert_eq!(v.expr().as_int(), Some(5)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
