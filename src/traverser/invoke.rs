// Method invocation: dispatch, frames, mocks and modelled library calls

use super::objects::{coerce, ordinal_field};
use super::{parameter_local, Step, THIS_LOCAL};
use crate::error::EngineError;
use crate::expr::Expr;
use crate::memory::{LocalMemory, LocalMemoryUpdate, MemoryUpdate};
use crate::mock::{MockExecutableInstance, MockInfo, MockInfoEnriched};
use crate::program::builtins::unboxed_type;
use crate::program::{FieldRef, InvokeExpr, InvokeKind, MethodId, Place, Type, ENUM_CLASS, OBJECT_CLASS};
use crate::state::{Frame, SymbolicStateUpdate};
use crate::value::{sort_of, ConcreteHint, ReferenceValue, SymbolicValue, TypeStorage};
use crate::wrappers::{self, Invocation};

impl<'a> Step<'a> {
    pub(crate) fn invoke(&mut self, call: &InvokeExpr, target: Option<&Place>) -> Result<(), EngineError> {
        let args = call
            .args
            .iter()
            .map(|a| self.operand(a))
            .collect::<Result<Vec<_>, _>>()?;
        match call.kind {
            InvokeKind::Static => self.invoke_static(call, &args, target),
            InvokeKind::Special => {
                let receiver = self.receiver(call)?;
                self.null_check(&receiver.addr)?;
                if self.intercept(call, &receiver, &args, target)? {
                    return Ok(());
                }
                let m = &call.method;
                let resolved = self.ctx.program.resolve_method(&m.class, &m.name, &m.params);
                self.dispatch(resolved, receiver, call, &args, target)
            }
            InvokeKind::Virtual | InvokeKind::Interface => self.invoke_virtual(call, &args, target),
        }
    }

    fn receiver(&self, call: &InvokeExpr) -> Result<ReferenceValue, EngineError> {
        let base = call
            .base
            .as_deref()
            .ok_or_else(|| self.invariant(format!("instance call of {} without a receiver", call.method)))?;
        self.reference(base)
    }

    fn invoke_static(
        &mut self,
        call: &InvokeExpr,
        args: &[SymbolicValue],
        target: Option<&Place>,
    ) -> Result<(), EngineError> {
        let m = &call.method;
        if let Some(primitive) = unboxed_type(&m.class) {
            if m.name == "valueOf" && args.len() == 1 && args[0].ty().is_primitive() {
                let boxed = self.box_value(&m.class, &primitive, &args[0]);
                return self.finish_call(Some(boxed), target);
            }
        }
        match self.ctx.program.resolve_method(&m.class, &m.name, &m.params) {
            Some(id) => self.enter(id, None, args, target),
            None => self.unbounded(&m.ret, target),
        }
    }

    /// A fresh wrapper object holding `value`.
    fn box_value(&mut self, class: &str, primitive: &Type, value: &SymbolicValue) -> SymbolicValue {
        let ty = Type::class(class);
        let addr = Expr::addr(self.fresh_addr());
        let storage = TypeStorage::exact(ty);
        let constraint = self
            .ctx
            .types
            .registry()
            .type_constraint(&addr, &storage)
            .is_constraint();
        self.queue_hard(constraint);
        self.queued.memory.touched_addresses.push(addr.clone());
        let field = boxed_value_field(class, primitive);
        let value = coerce(value.clone(), primitive);
        let chunk = self.ctx.chunks.field(&field);
        self.queued.memory += MemoryUpdate::store(chunk.clone(), addr.clone(), value.expr().clone());
        self.queued.memory.field_values.insert((chunk.id, addr.clone()), value);
        SymbolicValue::reference(storage, addr)
    }

    /// Calls answered without entering a body. Returns true when the call
    /// was handled.
    fn intercept(
        &mut self,
        call: &InvokeExpr,
        receiver: &ReferenceValue,
        args: &[SymbolicValue],
        target: Option<&Place>,
    ) -> Result<bool, EngineError> {
        let mock = self
            .queued
            .memory
            .addr_to_mock_info
            .get(&receiver.addr)
            .or_else(|| self.memory().mock_info(&receiver.addr))
            .cloned();
        if let Some(info) = mock {
            self.mocked_call(info, call, target)?;
            return Ok(true);
        }

        if let Some(ConcreteHint::Wrapper(kind)) = &receiver.concrete {
            match wrappers::lookup(*kind).invoke(self, receiver, &call.method, args)? {
                Invocation::Value(value) => self.finish_call(value, target)?,
                Invocation::Unbounded => self.unbounded(&call.method.ret, target)?,
            }
            return Ok(true);
        }

        let m = &call.method;
        let is_enum = m.class == ENUM_CLASS
            || self.ctx.program.class(&m.class).is_some_and(|c| c.is_enum());
        if is_enum && m.name == "ordinal" && args.is_empty() {
            let ordinal = self.read_field(receiver, &ordinal_field())?;
            self.finish_call(Some(ordinal), target)?;
            return Ok(true);
        }

        if let Some(primitive) = unboxed_type(&m.class) {
            if m.name.ends_with("Value") && args.is_empty() && m.ret.is_primitive() {
                let field = boxed_value_field(&m.class, &primitive);
                let value = self.read_field(receiver, &field)?;
                let value = self.cast(&value, &m.ret)?;
                self.finish_call(Some(value), target)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A call on a mock answers a fresh value the test will program the
    /// mock with.
    fn mocked_call(&mut self, info: MockInfo, call: &InvokeExpr, target: Option<&Place>) -> Result<(), EngineError> {
        let ret = &call.method.ret;
        if *ret == Type::Void {
            return self.finish_call(None, target);
        }
        let value = self.fresh_value(ret, "mock");
        let instance = MockExecutableInstance {
            id: self.ctx.counters.call_id(),
            value: value.clone(),
        };
        self.queued
            .memory
            .mock_infos
            .push(MockInfoEnriched::with_call(info, call.method.to_string(), instance));
        self.finish_call(Some(value), target)
    }

    fn invoke_virtual(
        &mut self,
        call: &InvokeExpr,
        args: &[SymbolicValue],
        target: Option<&Place>,
    ) -> Result<(), EngineError> {
        let receiver = self.receiver(call)?;
        self.null_check(&receiver.addr)?;
        if self.intercept(call, &receiver, args, target)? {
            return Ok(());
        }

        let mut groups: Vec<(Option<MethodId>, Vec<Type>)> = Vec::new();
        for ty in &receiver.storage.possible {
            let class = ty.class_name().unwrap_or(OBJECT_CLASS);
            let resolved = self.ctx.program.resolve_virtual(class, &call.method);
            match groups.iter_mut().find(|(m, _)| *m == resolved) {
                Some((_, types)) => types.push(ty.clone()),
                None => groups.push((resolved, vec![ty.clone()])),
            }
        }
        if groups.len() <= 1 {
            // No possible type left means the receiver is null, already forked.
            return match groups.pop() {
                Some((resolved, _)) => self.dispatch(resolved, receiver, call, args, target),
                None => Ok(()),
            };
        }

        let registry = self.ctx.types.registry();
        for (resolved, types) in groups {
            let storage = TypeStorage::new(receiver.storage.least_common.clone(), types);
            let is = registry.type_constraint(&receiver.addr, &storage).is;
            let narrowed = receiver.clone().with_storage(storage);
            let saved = self.queued.clone();
            self.queued += SymbolicStateUpdate::hard(is);
            let dispatched = self.dispatch(resolved, narrowed, call, args, target);
            self.queued = saved;
            dispatched?;
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        resolved: Option<MethodId>,
        receiver: ReferenceValue,
        call: &InvokeExpr,
        args: &[SymbolicValue],
        target: Option<&Place>,
    ) -> Result<(), EngineError> {
        match resolved {
            Some(id) => self.enter(id, Some(receiver), args, target),
            None => self.unbounded(&call.method.ret, target),
        }
    }

    /// Pushes a frame for `id`; methods without a body return an
    /// unconstrained value instead.
    fn enter(
        &mut self,
        id: MethodId,
        this: Option<ReferenceValue>,
        args: &[SymbolicValue],
        target: Option<&Place>,
    ) -> Result<(), EngineError> {
        let method = self.ctx.program.method(id);
        if method.body().is_none() {
            return self.unbounded(&method.def.ret, target);
        }
        if matches!(target, Some(place) if !matches!(place, Place::Local(_))) {
            return Err(self.unsupported(format!("result of {method} stored outside a local")));
        }
        if args.len() != method.def.params.len() {
            return Err(self.invariant(format!(
                "{method} takes {} arguments, got {}",
                method.def.params.len(),
                args.len()
            )));
        }
        if self.is_dead() {
            return Ok(());
        }

        let mut locals = LocalMemoryUpdate::default();
        if let Some(this) = this {
            let this = if this.ty().is_array() {
                SymbolicValue::Array(this)
            } else {
                SymbolicValue::Object(this)
            };
            locals += LocalMemoryUpdate::set(THIS_LOCAL, this);
        }
        for (i, (arg, ty)) in args.iter().zip(&method.def.params).enumerate() {
            locals += LocalMemoryUpdate::set(parameter_local(i), coerce(arg.clone(), ty));
        }
        let graph = self.ctx.graph(id)?;
        let entry = graph.entry();
        let mut frame = Frame::new(id, Some(self.state.stmt), LocalMemory::default().update(&locals));
        frame.does_not_throw = self.ctx.config.is_no_throw(&method.class, method.name());
        let state_id = self.ctx.counters.state_id();
        let mut state = self.state.push(state_id, entry, frame, &self.queued);
        if graph.is_loop_header(entry) {
            state = state.visit_header(entry);
        }
        self.out.push(state);
        Ok(())
    }

    /// Result of a call the engine cannot see into.
    fn unbounded(&mut self, ret: &Type, target: Option<&Place>) -> Result<(), EngineError> {
        if *ret == Type::Void {
            return self.finish_call(None, target);
        }
        let value = self.fresh_value(ret, "unbounded");
        self.finish_call(Some(value), target)
    }

    /// An unconstrained value of `ty`; references behave like inputs.
    pub(crate) fn fresh_value(&mut self, ty: &Type, prefix: &str) -> SymbolicValue {
        let expr = Expr::var(self.fresh_name(prefix), sort_of(ty));
        if ty.is_primitive() {
            let value = SymbolicValue::primitive(ty.clone(), expr);
            self.prefer_readable(&value);
            return value;
        }
        self.queue_hard(expr.le(&Expr::null()));
        self.create_input_object(expr, ty, None)
    }

    fn finish_call(&mut self, value: Option<SymbolicValue>, target: Option<&Place>) -> Result<(), EngineError> {
        let locals = match (target, value) {
            (None, _) => LocalMemoryUpdate::default(),
            (Some(place), Some(value)) => self.write(place, value)?,
            (Some(_), None) => return Err(self.invariant("void call assigned to a target")),
        };
        self.continue_with(locals)
    }
}

fn boxed_value_field(class: &str, primitive: &Type) -> FieldRef {
    FieldRef {
        class: class.to_string(),
        name: "value".to_string(),
        ty: primitive.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{context, run_to_end};
    use crate::state::MethodResult;

    const CALLS: &str = r#"{"classes":[
        {"name":"demo.Shape","kind":"abstract","methods":[
            {"name":"area","ret":"int","abstract":true}
        ]},
        {"name":"demo.Square","super":"demo.Shape","methods":[
            {"name":"area","ret":"int","body":{"stmts":[
                {"op":"return","value":{"const":{"int":4}}}
            ]}}
        ]},
        {"name":"demo.Circle","super":"demo.Shape","methods":[
            {"name":"area","ret":"int","body":{"stmts":[
                {"op":"return","value":{"const":{"int":3}}}
            ]}}
        ]},
        {"name":"demo.C","methods":[
            {"name":"twice","params":["int"],"ret":"int","static":true,"body":{"stmts":[
                {"op":"identity","local":"x","value":{"kind":"parameter","index":0}},
                {"op":"assign","target":{"local":"y"},"value":{"binary":{"op":"add","lhs":{"local":"x"},"rhs":{"local":"x"}}}},
                {"op":"return","value":{"local":"y"}}
            ]}},
            {"name":"four","ret":"int","static":true,"body":{"stmts":[
                {"op":"assign","target":{"local":"r"},"value":{"invoke":{"kind":"static","method":{"class":"demo.C","name":"twice","params":["int"],"ret":"int"},"args":[{"const":{"int":2}}]}}},
                {"op":"return","value":{"local":"r"}}
            ]}},
            {"name":"measure","params":["demo.Shape"],"ret":"int","static":true,"body":{"stmts":[
                {"op":"identity","local":"s","value":{"kind":"parameter","index":0}},
                {"op":"assign","target":{"local":"a"},"value":{"invoke":{"kind":"virtual","method":{"class":"demo.Shape","name":"area","ret":"int"},"base":"s"}}},
                {"op":"return","value":{"local":"a"}}
            ]}},
            {"name":"opaque","ret":"int","static":true,"body":{"stmts":[
                {"op":"assign","target":{"local":"r"},"value":{"invoke":{"kind":"static","method":{"class":"lib.Missing","name":"f","ret":"int"}}}},
                {"op":"return","value":{"local":"r"}}
            ]}},
            {"name":"boxed","params":["int"],"ret":"int","static":true,"body":{"stmts":[
                {"op":"identity","local":"x","value":{"kind":"parameter","index":0}},
                {"op":"assign","target":{"local":"b"},"value":{"invoke":{"kind":"static","method":{"class":"java.lang.Integer","name":"valueOf","params":["int"],"ret":"java.lang.Integer"},"args":[{"local":"x"}]}}},
                {"op":"assign","target":{"local":"y"},"value":{"invoke":{"kind":"virtual","method":{"class":"java.lang.Integer","name":"intValue","ret":"int"},"base":"b"}}},
                {"op":"return","value":{"local":"y"}}
            ]}}
        ]}
    ]}"#;

    fn results(ctx: &crate::engine::EngineContext, method: &str) -> Vec<MethodResult> {
        run_to_end(ctx, method)
            .into_iter()
            .filter_map(|s| s.result)
            .collect()
    }

    #[test]
    fn test_static_call_returns_into_caller() {
        let ctx = context(CALLS);
        let done = results(&ctx, "demo.C.four");
        assert_eq!(done.len(), 1);
        match &done[0] {
            MethodResult::Success(Some(v)) => assert_eq!(v.expr().as_int(), Some(4)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_virtual_call_forks_per_implementation() {
        let ctx = context(CALLS);
        let done = results(&ctx, "demo.C.measure");
        let values: Vec<i128> = done
            .iter()
            .filter_map(|r| match r {
                MethodResult::Success(Some(v)) => v.expr().as_int(),
                _ => None,
            })
            .collect();
        assert!(values.contains(&3));
        assert!(values.contains(&4));
        assert!(done.iter().any(|r| matches!(r, MethodResult::Failure(_))));
    }

    #[test]
    fn test_call_without_body_is_unbounded() {
        let ctx = context(CALLS);
        let done = results(&ctx, "demo.C.opaque");
        assert_eq!(done.len(), 1);
        match &done[0] {
            MethodResult::Success(Some(v)) => assert!(v.expr().as_int().is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_boxing_round_trips_the_value() {
        let ctx = context(CALLS);
        let done = results(&ctx, "demo.C.boxed");
        assert_eq!(done.len(), 1);
        match &done[0] {
            MethodResult::Success(Some(v)) => {
                assert_eq!(v.expr(), &crate::expr::Expr::var("param0", crate::expr::Sort::BitVec(32)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
