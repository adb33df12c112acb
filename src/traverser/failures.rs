// Exceptions: implicit checks, explicit throws and handler lookup

use std::collections::BTreeSet;

use super::{Step, CAUGHT_EXCEPTION_LOCAL};
use crate::error::EngineError;
use crate::expr::Expr;
use crate::memory::{LocalMemoryUpdate, MemoryUpdate};
use crate::program::builtins::NULL_POINTER_EXCEPTION;
use crate::program::{Operand, Type};
use crate::state::{FailureKind, MethodResult, SymbolicFailure, SymbolicStateUpdate};
use crate::value::{ReferenceValue, SymbolicValue, TypeStorage};

impl<'a> Step<'a> {
    /// Forks a successor raising `exception` where `cond` holds; the normal
    /// continuation assumes `!cond` from here on.
    pub(crate) fn implicit_failure(
        &mut self,
        cond: Expr,
        exception: &str,
        kind: FailureKind,
    ) -> Result<(), EngineError> {
        if cond.is_false() || self.already_excluded(&cond) {
            return Ok(());
        }
        let throws = !self.state.top_frame().is_some_and(|f| f.does_not_throw);
        if throws {
            let (value, allocation) = self.allocate_exception(exception);
            let mut update = self.queued.clone();
            update.hard.push(cond.clone());
            update += allocation;
            if !update.hard.iter().any(Expr::is_false) {
                self.raise(value, exception, kind, update)?;
            }
        }
        self.queue_hard(cond.not());
        Ok(())
    }

    /// `!cond` is already a hard constraint of this path.
    fn already_excluded(&self, cond: &Expr) -> bool {
        let negated = cond.not();
        self.queued.hard.contains(&negated) || self.state.symbolic.hard.contains(&negated)
    }

    pub(crate) fn null_check(&mut self, addr: &Expr) -> Result<(), EngineError> {
        let is_null = addr.eq(&Expr::null());
        if self.already_excluded(&is_null) {
            return Ok(());
        }
        let marked = if self.queued.memory.speculatively_not_null.contains(addr) {
            Expr::bool(true)
        } else {
            self.memory().is_speculatively_not_null(addr)
        };
        let unmarked_null = Expr::and([is_null.clone(), marked.not()]);
        let speculative = unmarked_null != is_null;
        self.implicit_failure(unmarked_null, NULL_POINTER_EXCEPTION, FailureKind::Implicit)?;
        if speculative {
            self.queue_hard(is_null.not());
        }
        Ok(())
    }

    /// A fresh exception object of exactly `class`.
    fn allocate_exception(&self, class: &str) -> (ReferenceValue, SymbolicStateUpdate) {
        let addr = Expr::addr(self.fresh_addr());
        let storage = TypeStorage::exact(Type::class(class));
        let constraint = self
            .ctx
            .types
            .registry()
            .type_constraint(&addr, &storage)
            .is_constraint();
        let mut update = SymbolicStateUpdate::hard(constraint);
        update += MemoryUpdate::touch_address(addr.clone());
        (ReferenceValue::new(storage, addr), update)
    }

    pub(crate) fn throw(&mut self, value: &Operand) -> Result<(), EngineError> {
        let exception = match self.operand(value)? {
            SymbolicValue::Object(r) => r,
            other => {
                return Err(self.invariant(format!("throw of non-object {}", other.ty())));
            }
        };
        self.null_check(&exception.addr)?;
        let class = exception_class(&exception);
        let update = self.queued.clone();
        if update.hard.iter().any(Expr::is_false) {
            return Ok(());
        }
        self.raise(exception, &class, FailureKind::Explicit, update)
    }

    /// Routes `exception` through the handlers of every frame, innermost
    /// first. Each group of possible types caught by one handler becomes a
    /// successor; types nobody catches end the method under test.
    pub(crate) fn raise(
        &mut self,
        exception: ReferenceValue,
        class: &str,
        kind: FailureKind,
        update: SymbolicStateUpdate,
    ) -> Result<(), EngineError> {
        let registry = self.ctx.types.registry();
        let mut remaining: BTreeSet<Type> = exception.storage.possible.clone();
        let all = remaining.len();
        let depth = self.state.depth();
        let mut at = self.state.stmt;
        let frames: Vec<_> = self.state.frames().collect();

        for level in (1..=depth).rev() {
            let frame = frames[level - 1];
            let graph = self.ctx.graph(frame.method)?;
            for trap in graph.handlers_for(at.stmt) {
                let catch = Type::class(&trap.exception);
                let caught: BTreeSet<Type> = remaining
                    .iter()
                    .filter(|t| self.ctx.types.is_subtype(t, &catch))
                    .cloned()
                    .collect();
                if caught.is_empty() {
                    continue;
                }
                let mut branch = update.clone();
                if caught.len() != all {
                    let storage = TypeStorage::new(catch.clone(), caught.iter().cloned());
                    branch
                        .hard
                        .push(registry.type_constraint(&exception.addr, &storage).is);
                }
                remaining.retain(|t| !caught.contains(t));
                let storage = TypeStorage::new(catch, caught);
                let value = SymbolicValue::Object(exception.clone().with_storage(storage));
                let locals = LocalMemoryUpdate::set(CAUGHT_EXCEPTION_LOCAL, value);
                let id = self.ctx.counters.state_id();
                let mut handler = self.state.unwind_to(id, level, trap.handler, &branch, &locals);
                if graph.is_loop_header(trap.handler) {
                    handler = handler.visit_header(trap.handler);
                }
                self.out.push(handler);
                if remaining.is_empty() {
                    return Ok(());
                }
            }
            match frame.caller {
                Some(caller) => at = caller,
                None => break,
            }
        }

        let mut branch = update;
        if remaining.len() != all {
            let storage = TypeStorage::new(exception.storage.least_common.clone(), remaining.iter().cloned());
            branch
                .hard
                .push(registry.type_constraint(&exception.addr, &storage).is);
        }
        let least_common = exception.storage.least_common.clone();
        let exception = exception.with_storage(TypeStorage::new(least_common, remaining));
        let failure = SymbolicFailure {
            class: class.to_string(),
            exception: SymbolicValue::Object(exception),
            kind,
            in_nested_method: depth > 1,
        };
        let id = self.ctx.counters.state_id();
        self.out
            .push(self.state.terminate(id, MethodResult::Failure(failure), &branch));
        Ok(())
    }
}

/// Class of an exception value when it is known exactly, its declared type
/// otherwise.
pub(crate) fn exception_class(exception: &ReferenceValue) -> String {
    exception
        .storage
        .single()
        .unwrap_or(&exception.storage.least_common)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::super::tests::{context, run_to_end};
    use super::super::Traverser;
    use crate::cfg::EdgeType;
    use crate::state::{FailureKind, MethodResult};

    const THROWS: &str = r#"{"classes":[
        {"name":"demo.Boom","super":"java.lang.RuntimeException"},
        {"name":"demo.T","methods":[
            {"name":"fail","ret":"int","static":true,"body":{"stmts":[
                {"op":"assign","target":{"local":"e"},"value":{"new":{"class":"demo.Boom"}}},
                {"op":"throw","value":{"local":"e"}}
            ]}},
            {"name":"guarded","ret":"int","static":true,"body":{"stmts":[
                {"op":"assign","target":{"local":"r"},"value":{"invoke":{"kind":"static","method":{"class":"demo.T","name":"fail","ret":"int"}}}},
                {"op":"return","value":{"local":"r"}},
                {"op":"identity","local":"c","value":{"kind":"caught_exception"}},
                {"op":"return","value":{"const":{"int":-1}}}
            ],"traps":[{"begin":0,"end":1,"handler":2,"exception":"java.lang.RuntimeException"}]}}
        ]}
    ]}"#;

    const RETRY: &str = r#"{"classes":[{"name":"demo.R","methods":[
        {"name":"retry","params":["int"],"ret":"int","static":true,"body":{
            "stmts":[
                {"op":"identity","local":"a","value":{"kind":"parameter","index":0}},
                {"op":"nop"},
                {"op":"assign","target":{"local":"q"},"value":{"binary":{"op":"div","lhs":{"const":{"int":10}},"rhs":{"local":"a"}}}},
                {"op":"return","value":{"local":"q"}}
            ],
            "traps":[{"begin":2,"end":3,"handler":1,"exception":"java.lang.ArithmeticException"}]
        }}
    ]}]}"#;

    #[test]
    fn test_unwinding_to_loop_header_counts_a_visit() {
        let ctx = context(RETRY);
        let id = ctx.program.find_method("demo.R.retry").unwrap();
        let traverser = Traverser::new(&ctx);
        let mut pending = vec![traverser.initial_state(id).unwrap()];
        let mut caught = None;
        while caught.is_none() {
            let state = pending.pop().unwrap();
            for next in traverser.traverse(&state).unwrap() {
                if next.last_edge.as_ref().is_some_and(|e| e.kind == EdgeType::Exception) {
                    caught = Some(next);
                } else {
                    pending.push(next);
                }
            }
        }
        let caught = caught.unwrap();
        assert_eq!(caught.stmt.stmt, 1);
        assert_eq!(caught.top_frame().unwrap().loop_visits(1), 2);
    }

    #[test]
    fn test_uncaught_throw_terminates_with_failure() {
        let ctx = context(THROWS);
        let done = run_to_end(&ctx, "demo.T.fail");
        assert_eq!(done.len(), 1);
        match &done[0].result {
            Some(MethodResult::Failure(f)) => {
                assert_eq!(f.class, "demo.Boom");
                assert_eq!(f.kind, FailureKind::Explicit);
                assert!(!f.in_nested_method);
            }
            other => panic!("expected a failure, got {:?}", other),
        }
    }

    #[test]
    fn test_handler_in_caller_catches_nested_throw() {
        let ctx = context(THROWS);
        let done = run_to_end(&ctx, "demo.T.guarded");
        assert_eq!(done.len(), 1);
        match &done[0].result {
            Some(MethodResult::Success(Some(v))) => assert_eq!(v.expr().as_int(), Some(-1)),
            other => panic!("expected the handler's result, got {:?}", other),
        }
    }
}
