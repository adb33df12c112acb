// java.util.List as a window [begin, end) over a storage array

use super::{Invocation, Wrapper, WrapperKind};
use crate::engine::EngineContext;
use crate::error::EngineError;
use crate::expr::{Expr, Sort, ADDR_BITS};
use crate::memory::{ChunkDescriptor, MemoryState, MemoryUpdate};
use crate::program::builtins::{ARRAY_LIST_CLASS, INDEX_OUT_OF_BOUNDS_EXCEPTION, LIST_INTERFACE};
use crate::program::{FieldRef, MethodRef, Type, CONSTRUCTOR};
use crate::resolver::{ConcreteModel, MethodCall, ModelId, Resolver};
use crate::state::FailureKind;
use crate::traverser::Step;
use crate::value::{ReferenceValue, SymbolicValue};

pub struct ListWrapper;

fn bound_field(name: &str) -> FieldRef {
    FieldRef {
        class: LIST_INTERFACE.to_string(),
        name: name.to_string(),
        ty: Type::Int,
    }
}

fn begin_chunk(ctx: &EngineContext) -> ChunkDescriptor {
    ctx.chunks.field(&bound_field("begin"))
}

fn end_chunk(ctx: &EngineContext) -> ChunkDescriptor {
    ctx.chunks.field(&bound_field("end"))
}

fn storage_chunk(ctx: &EngineContext) -> ChunkDescriptor {
    ctx.chunks.chunk(
        "java.util.List.storage",
        Sort::array(Sort::BitVec(ADDR_BITS), Sort::BitVec(ADDR_BITS)),
    )
}

/// Symbolic view of one list during a step.
struct Window {
    begin: Expr,
    end: Expr,
    storage: Expr,
}

impl Window {
    fn read(step: &mut Step<'_>, addr: &Expr) -> Window {
        let ctx = step.ctx;
        let mut cell = |chunk: ChunkDescriptor| {
            step.queued.memory += MemoryUpdate::touch_chunk(chunk.clone());
            step.memory().find_array(&chunk, &MemoryState::Current).select(addr)
        };
        Window {
            begin: cell(begin_chunk(ctx)),
            end: cell(end_chunk(ctx)),
            storage: cell(storage_chunk(ctx)),
        }
    }

    fn size(&self) -> Expr {
        self.end.sub(&self.begin)
    }

    fn slot(&self, index: &Expr) -> Expr {
        self.begin.add(index)
    }
}

fn index_check(step: &mut Step<'_>, window: &Window, index: &Expr) -> Result<(), EngineError> {
    let outside = Expr::or([index.lt(&Expr::int32(0)), index.ge(&window.size())]);
    step.implicit_failure(outside, INDEX_OUT_OF_BOUNDS_EXCEPTION, FailureKind::Implicit)
}

/// Element at `slot`; elements an input list starts with are inputs too.
fn element(step: &mut Step<'_>, addr: &Expr, window: &Window, slot: &Expr) -> SymbolicValue {
    let ctx = step.ctx;
    let initial = storage_chunk(ctx).initial_array().select(addr).select(slot);
    step.queue_hard(initial.le(&Expr::null()));
    step.create_input_object(window.storage.select(slot), &Type::object(), None)
}

impl Wrapper for ListWrapper {
    fn kind(&self) -> WrapperKind {
        WrapperKind::List
    }

    fn input_invariants(&self, ctx: &EngineContext, addr: &Expr) -> Vec<Expr> {
        let begin = begin_chunk(ctx).initial_array().select(addr);
        let end = end_chunk(ctx).initial_array().select(addr);
        vec![
            begin.eq(&Expr::int32(0)),
            end.ge(&Expr::int32(0)),
            end.le(&Expr::int32(ctx.config.soft_max_array_size)),
        ]
    }

    fn invoke(
        &self,
        step: &mut Step<'_>,
        receiver: &ReferenceValue,
        method: &MethodRef,
        args: &[SymbolicValue],
    ) -> Result<Invocation, EngineError> {
        let ctx = step.ctx;
        let addr = &receiver.addr;
        if method.name == CONSTRUCTOR {
            step.queued.memory += MemoryUpdate::store(begin_chunk(ctx), addr.clone(), Expr::int32(0));
            step.queued.memory += MemoryUpdate::store(end_chunk(ctx), addr.clone(), Expr::int32(0));
            return Ok(Invocation::Value(None));
        }
        let window = Window::read(step, addr);
        let value = match (method.name.as_str(), args) {
            ("size", []) => SymbolicValue::primitive(Type::Int, window.size()),
            ("isEmpty", []) => SymbolicValue::primitive(Type::Boolean, window.end.eq(&window.begin)),
            ("get", [index]) => {
                let index = step.int_value(index)?;
                index_check(step, &window, &index)?;
                let slot = window.slot(&index);
                element(step, addr, &window, &slot)
            }
            ("set", [index, value]) => {
                let index = step.int_value(index)?;
                index_check(step, &window, &index)?;
                let slot = window.slot(&index);
                let previous = element(step, addr, &window, &slot);
                let storage = window.storage.store(&slot, value.expr());
                step.queued.memory += MemoryUpdate::store(storage_chunk(ctx), addr.clone(), storage);
                previous
            }
            ("add", [value]) => {
                let storage = window.storage.store(&window.end, value.expr());
                step.queued.memory += MemoryUpdate::store(storage_chunk(ctx), addr.clone(), storage);
                step.queued.memory += MemoryUpdate::store(end_chunk(ctx), addr.clone(), window.end.plus(1));
                SymbolicValue::primitive(Type::Boolean, Expr::bool(true))
            }
            ("clear", []) => {
                step.queued.memory += MemoryUpdate::store(end_chunk(ctx), addr.clone(), window.begin.clone());
                return Ok(Invocation::Value(None));
            }
            _ => {
                return Err(step.unsupported(format!("list method {method} is not modelled")));
            }
        };
        Ok(Invocation::Value(Some(value)))
    }

    /// `new ArrayList()` followed by one `add` per element.
    fn resolve(&self, resolver: &mut Resolver<'_>, addr: &Expr, id: ModelId) -> ConcreteModel {
        let ctx = resolver.ctx();
        let begin = resolver.eval_int(&resolver.cell(&begin_chunk(ctx), addr));
        let end = resolver.eval_int(&resolver.cell(&end_chunk(ctx), addr));
        let size = (end - begin).clamp(0, ctx.config.soft_max_array_size as i128);
        let storage = resolver.cell(&storage_chunk(ctx), addr);
        let mut modifications = Vec::new();
        for slot in begin..begin + size {
            let element = storage.select(&Expr::int32(slot as i32));
            let model = resolver.resolve_reference(&element, &Type::object());
            modifications.push(MethodCall {
                method: format!("{LIST_INTERFACE}.add(java.lang.Object)"),
                args: vec![model],
            });
        }
        ConcreteModel::Assemble {
            id,
            ty: Type::class(ARRAY_LIST_CLASS),
            instantiation: MethodCall {
                method: format!("{ARRAY_LIST_CLASS}.{CONSTRUCTOR}()"),
                args: Vec::new(),
            },
            modifications,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::MethodResult;
    use crate::traverser::tests::{context, run_to_end};

    const LISTS: &str = r#"{"classes":[{"name":"demo.L","methods":[
        {"name":"build","ret":"int","static":true,"body":{"stmts":[
            {"op":"assign","target":{"local":"l"},"value":{"new":{"class":"java.util.ArrayList"}}},
            {"op":"invoke","call":{"kind":"special","method":{"class":"java.util.ArrayList","name":"<init>"},"base":"l"}},
            {"op":"assign","target":{"local":"ok"},"value":{"invoke":{"kind":"interface","method":{"class":"java.util.List","name":"add","params":["java.lang.Object"],"ret":"boolean"},"base":"l","args":[{"const":"null"}]}}},
            {"op":"assign","target":{"local":"n"},"value":{"invoke":{"kind":"interface","method":{"class":"java.util.List","name":"size","ret":"int"},"base":"l"}}},
            {"op":"return","value":{"local":"n"}}
        ]}},
        {"name":"head","params":["java.util.List"],"ret":"java.lang.Object","static":true,"body":{"stmts":[
            {"op":"identity","local":"l","value":{"kind":"parameter","index":0}},
            {"op":"assign","target":{"local":"x"},"value":{"invoke":{"kind":"interface","method":{"class":"java.util.List","name":"get","params":["int"],"ret":"java.lang.Object"},"base":"l","args":[{"const":{"int":0}}]}}},
            {"op":"return","value":{"local":"x"}}
        ]}}
    ]}]}"#;

    #[test]
    fn test_add_grows_a_new_list() {
        let ctx = context(LISTS);
        let done = run_to_end(&ctx, "demo.L.build");
        assert_eq!(done.len(), 1);
        match &done[0].result {
            Some(MethodResult::Success(Some(v))) => assert_eq!(v.expr().as_int(), Some(1)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_get_on_input_list_forks_null_and_bounds() {
        let ctx = context(LISTS);
        let done = run_to_end(&ctx, "demo.L.head");
        assert_eq!(done.len(), 3);
        let failures = done
            .iter()
            .filter(|s| matches!(s.result, Some(MethodResult::Failure(_))))
            .count();
        assert_eq!(failures, 2);
    }
}
