//! One step of symbolic execution
//!
//! [`Traverser::traverse`] interprets the statement a state points at and
//! returns its successors. A [`Step`] collects the constraints and memory
//! changes of the normal continuation in `queued`; implicit checks fork
//! failing successors off it as they go. Nothing outside the step is mutated
//! except the run counters.

mod conditions;
mod expr;
mod failures;
mod invoke;
mod objects;

use tracing::trace;

use crate::cfg::{EdgeType, InstructionGraph};
use crate::engine::EngineContext;
use crate::error::EngineError;
use crate::expr::Expr;
use crate::memory::{LocalMemory, LocalMemoryUpdate, Memory};
use crate::program::{IdentityRef, MethodId, Operand, Place, Rvalue, Stmt, StmtIndex, Type};
use crate::state::{
    ExecutionState, Frame, Inputs, Location, MethodResult, SymbolicState, SymbolicStateUpdate,
};
use crate::value::{ReferenceValue, SymbolicValue, TypeStorage};

pub(crate) const THIS_LOCAL: &str = "@this";
pub(crate) const CAUGHT_EXCEPTION_LOCAL: &str = "@caughtexception";

pub(crate) fn parameter_local(index: usize) -> String {
    format!("@parameter{index}")
}

pub struct Traverser<'a> {
    ctx: &'a EngineContext,
}

impl<'a> Traverser<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// State at the entry of `method` with symbolic `this` and parameters.
    pub fn initial_state(&self, method: MethodId) -> Result<ExecutionState, EngineError> {
        let graph = self.ctx.graph(method)?;
        let entry = Location::new(method, graph.entry());
        let bootstrap = ExecutionState::initial(
            self.ctx.counters.state_id(),
            entry,
            Frame::new(method, None, LocalMemory::default()),
            Inputs::default(),
            SymbolicState::default(),
        );
        let mut step = Step::new(self.ctx, &bootstrap, graph);
        let inputs = step.create_inputs(method)?;

        let mut locals = LocalMemoryUpdate::default();
        if let Some(this) = &inputs.this {
            locals += LocalMemoryUpdate::set(THIS_LOCAL, this.clone());
        }
        for (i, param) in inputs.params.iter().enumerate() {
            locals += LocalMemoryUpdate::set(parameter_local(i), param.clone());
        }
        let frame = Frame::new(method, None, LocalMemory::default().update(&locals));
        let symbolic = SymbolicState::default().apply(&step.queued);
        Ok(ExecutionState::initial(
            self.ctx.counters.state_id(),
            entry,
            frame,
            inputs,
            symbolic,
        ))
    }

    pub fn traverse(&self, state: &ExecutionState) -> Result<Vec<ExecutionState>, EngineError> {
        if state.is_terminal() {
            return Err(EngineError::Invariant {
                location: state.stmt.to_string(),
                detail: "terminal states are not stepped".to_string(),
            });
        }
        let graph = self.ctx.graph(state.stmt.method)?;
        let stmt = graph.stmt(state.stmt.stmt).ok_or_else(|| EngineError::Invariant {
            location: state.stmt.to_string(),
            detail: format!("no statement {} in a body of {}", state.stmt.stmt, graph.len()),
        })?;
        let mut step = Step::new(self.ctx, state, graph);
        if step.initialize_classes(stmt)? {
            step.execute(stmt)?;
        }
        trace!(
            state = state.id,
            at = %state.stmt,
            successors = step.out.len(),
            "stepped"
        );
        Ok(step.out)
    }
}

/// Interpretation of one statement.
pub(crate) struct Step<'a> {
    pub(crate) ctx: &'a EngineContext,
    pub(crate) state: &'a ExecutionState,
    graph: &'a InstructionGraph,
    /// Constraints and memory of the normal continuation
    pub(crate) queued: SymbolicStateUpdate,
    pub(crate) out: Vec<ExecutionState>,
}

impl<'a> Step<'a> {
    fn new(ctx: &'a EngineContext, state: &'a ExecutionState, graph: &'a InstructionGraph) -> Self {
        Self {
            ctx,
            state,
            graph,
            queued: SymbolicStateUpdate::default(),
            out: Vec::new(),
        }
    }

    pub(crate) fn memory(&self) -> &Memory {
        &self.state.symbolic.memory
    }

    pub(crate) fn location(&self) -> String {
        let method = self.ctx.program.method(self.state.stmt.method);
        format!("{}:{}", method, self.state.stmt.stmt)
    }

    pub(crate) fn unsupported(&self, detail: impl Into<String>) -> EngineError {
        EngineError::Unsupported {
            location: self.location(),
            detail: detail.into(),
        }
    }

    pub(crate) fn invariant(&self, detail: impl Into<String>) -> EngineError {
        EngineError::Invariant {
            location: self.location(),
            detail: detail.into(),
        }
    }

    pub(crate) fn class_under_test(&self) -> &'a str {
        let method = self
            .state
            .frames()
            .next()
            .map(|f| f.method)
            .unwrap_or(self.state.stmt.method);
        &self.ctx.program.method(method).class
    }

    pub(crate) fn in_static_initializer(&self) -> bool {
        self.state.frames().any(|f| f.static_init_of.is_some())
    }

    pub(crate) fn fresh_name(&self, prefix: &str) -> String {
        self.ctx.counters.fresh_name(prefix)
    }

    pub(crate) fn queue_hard(&mut self, constraint: Expr) {
        self.queued.hard.push(constraint);
    }

    pub(crate) fn queue_soft(&mut self, constraint: Expr) {
        if self.ctx.config.preferred_cex {
            self.queued.soft.push(constraint);
        }
    }

    /// The normal continuation asserts `false`: nothing to emit.
    fn is_dead(&self) -> bool {
        self.queued.hard.iter().any(Expr::is_false)
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<(), EngineError> {
        match stmt {
            Stmt::Identity { local, value } => {
                let value = self.identity(value)?;
                self.continue_with(LocalMemoryUpdate::set(local.clone(), value))
            }
            Stmt::Assign {
                target,
                value: Rvalue::Invoke(call),
            } => self.invoke(call, Some(target)),
            Stmt::Assign { target, value } => {
                let Some(value) = self.rvalue(value)? else {
                    return Ok(());
                };
                let locals = self.write(target, value)?;
                self.continue_with(locals)
            }
            Stmt::If { cond, target } => self.branch(cond, *target),
            Stmt::Goto { target } => self.jump(*target, EdgeType::Fallthrough, SymbolicStateUpdate::default()),
            Stmt::Switch {
                key,
                cases,
                default,
            } => self.switch(key, cases, *default),
            Stmt::Invoke { call } => self.invoke(call, None),
            Stmt::Return { value } => self.return_from(value.as_ref()),
            Stmt::Throw { value } => self.throw(value),
            Stmt::Nop => self.continue_with(LocalMemoryUpdate::default()),
        }
    }

    fn identity(&self, value: &IdentityRef) -> Result<SymbolicValue, EngineError> {
        let name = match value {
            IdentityRef::This => THIS_LOCAL.to_string(),
            IdentityRef::Parameter { index } => parameter_local(*index),
            IdentityRef::CaughtException => CAUGHT_EXCEPTION_LOCAL.to_string(),
        };
        self.local(&name)
    }

    pub(crate) fn local(&self, name: &str) -> Result<SymbolicValue, EngineError> {
        self.state
            .local(name)
            .cloned()
            .ok_or_else(|| EngineError::UnboundLocal {
                local: name.to_string(),
                location: self.location(),
            })
    }

    pub(crate) fn reference(&self, name: &str) -> Result<ReferenceValue, EngineError> {
        match self.local(name)? {
            SymbolicValue::Object(r) | SymbolicValue::Array(r) => Ok(r),
            SymbolicValue::Primitive(p) => Err(self.invariant(format!(
                "`{name}` holds a {} where a reference is required",
                p.ty
            ))),
        }
    }

    pub(crate) fn operand(&mut self, operand: &Operand) -> Result<SymbolicValue, EngineError> {
        match operand {
            Operand::Local(name) => self.local(name),
            Operand::Const(constant) => self.constant(constant),
        }
    }

    /// Value of the right-hand side; `None` when the step already emitted
    /// every successor.
    fn rvalue(&mut self, value: &Rvalue) -> Result<Option<SymbolicValue>, EngineError> {
        let value = match value {
            Rvalue::Use(op) => self.operand(op)?,
            Rvalue::Binary { op, lhs, rhs } => {
                let lhs = self.operand(lhs)?;
                let rhs = self.operand(rhs)?;
                SymbolicValue::Primitive(self.binary(*op, &lhs, &rhs)?)
            }
            Rvalue::Neg(op) => {
                let value = self.operand(op)?;
                SymbolicValue::Primitive(self.negate(&value)?)
            }
            Rvalue::Cast { ty, value } => {
                let value = self.operand(value)?;
                self.cast(&value, ty)?
            }
            Rvalue::InstanceOf { ty, value } => {
                let value = self.operand(value)?;
                SymbolicValue::Primitive(self.instance_of(&value, ty)?)
            }
            Rvalue::New { class } => self.new_object(class)?,
            Rvalue::NewArray { element, size } => {
                let size = self.operand(size)?;
                self.new_array(&Type::array_of(element.clone()), &[size])?
            }
            Rvalue::NewMultiArray { ty, sizes } => {
                let sizes = sizes
                    .iter()
                    .map(|s| self.operand(s))
                    .collect::<Result<Vec<_>, _>>()?;
                self.new_array(ty, &sizes)?
            }
            Rvalue::Length(op) => {
                let array = self.operand(op)?;
                self.array_length(&array)?
            }
            Rvalue::Field { base, field } => {
                let base = self.reference(base)?;
                self.read_field(&base, field)?
            }
            Rvalue::Static(field) => self.read_static(field)?,
            Rvalue::Element { base, index } => {
                let base = self.reference(base)?;
                let index = self.operand(index)?;
                self.read_element(&base, &index)?
            }
            Rvalue::Invoke(_) => {
                return Err(self.invariant("invocations are stepped separately"));
            }
        };
        Ok(Some(value))
    }

    /// Writes `value` to `target`; local writes come back as an update for
    /// the successor's frame.
    fn write(&mut self, target: &Place, value: SymbolicValue) -> Result<LocalMemoryUpdate, EngineError> {
        match target {
            Place::Local(name) => return Ok(LocalMemoryUpdate::set(name.clone(), value)),
            Place::Field { base, field } => {
                let base = self.reference(base)?;
                self.write_field(&base, field, value)?;
            }
            Place::Static(field) => self.write_static(field, value)?,
            Place::Element { base, index } => {
                let base = self.reference(base)?;
                let index = self.operand(index)?;
                self.write_element(&base, &index, value)?;
            }
        }
        Ok(LocalMemoryUpdate::default())
    }

    fn successor_state(
        &self,
        next: StmtIndex,
        update: &SymbolicStateUpdate,
        locals: &LocalMemoryUpdate,
        kind: EdgeType,
    ) -> ExecutionState {
        let state = self
            .state
            .update(self.ctx.counters.state_id(), next, update, locals, kind);
        if self.graph.is_loop_header(next) {
            state.visit_header(next)
        } else {
            state
        }
    }

    /// Normal continuation to the next statement.
    pub(crate) fn continue_with(&mut self, locals: LocalMemoryUpdate) -> Result<(), EngineError> {
        if self.is_dead() {
            return Ok(());
        }
        let next = self
            .graph
            .successor(self.state.stmt.stmt)
            .ok_or_else(|| self.invariant("control falls off the end of the body"))?;
        let state = self.successor_state(next, &self.queued, &locals, EdgeType::Fallthrough);
        self.out.push(state);
        Ok(())
    }

    /// Transfer to `target` with `extra` on top of the queued update.
    pub(crate) fn jump(
        &mut self,
        target: StmtIndex,
        kind: EdgeType,
        extra: SymbolicStateUpdate,
    ) -> Result<(), EngineError> {
        let mut update = self.queued.clone();
        update += extra;
        if update.hard.iter().any(Expr::is_false) {
            return Ok(());
        }
        let state = self.successor_state(target, &update, &LocalMemoryUpdate::default(), kind);
        self.out.push(state);
        Ok(())
    }

    fn return_from(&mut self, value: Option<&Operand>) -> Result<(), EngineError> {
        let value = value.map(|v| self.operand(v)).transpose()?;
        let frame = self
            .state
            .top_frame()
            .ok_or_else(|| self.invariant("empty call stack"))?;
        let value = match (&value, frame.method) {
            (Some(SymbolicValue::Primitive(p)), method) => {
                let ret = &self.ctx.program.method(method).def.ret;
                if ret.is_primitive() && &p.ty != ret {
                    Some(SymbolicValue::Primitive(p.cast(ret)))
                } else {
                    value
                }
            }
            _ => value,
        };
        if self.is_dead() {
            return Ok(());
        }
        let Some(caller) = frame.caller else {
            let id = self.ctx.counters.state_id();
            self.out
                .push(self.state.terminate(id, MethodResult::Success(value), &self.queued));
            return Ok(());
        };

        let caller_graph = self.ctx.graph(caller.method)?;
        let (next, locals) = if frame.reexecute_caller {
            (caller, LocalMemoryUpdate::default())
        } else {
            let next = caller_graph
                .successor(caller.stmt)
                .ok_or_else(|| self.invariant("call is the last statement of its body"))?;
            let locals = match (caller_graph.stmt(caller.stmt), value) {
                (
                    Some(Stmt::Assign {
                        target: Place::Local(name),
                        ..
                    }),
                    Some(value),
                ) => LocalMemoryUpdate::set(name.clone(), value),
                (Some(Stmt::Assign { .. }), None) => {
                    return Err(self.invariant("void call assigned to a target"));
                }
                (Some(Stmt::Assign { .. }), Some(_)) => {
                    return Err(self.invariant("call result bound to a non-local"));
                }
                _ => LocalMemoryUpdate::default(),
            };
            (Location::new(caller.method, next), locals)
        };
        let mut update = self.queued.clone();
        if let Some(class) = &frame.static_init_of {
            update.memory.class_to_clear_statics = Some(class.clone());
        }
        let id = self.ctx.counters.state_id();
        let mut state = self
            .state
            .pop(id, next, &update, &locals, EdgeType::Fallthrough);
        if !frame.reexecute_caller && caller_graph.is_loop_header(next.stmt) {
            state = state.visit_header(next.stmt);
        }
        self.out.push(state);
        Ok(())
    }

    /// `this` and parameters of the method under test.
    fn create_inputs(&mut self, method: MethodId) -> Result<Inputs, EngineError> {
        let def = &self.ctx.program.method(method).def;
        let class = self.ctx.program.method(method).class.clone();
        let this = if def.is_static {
            None
        } else {
            let addr = Expr::var("this", crate::value::sort_of(&Type::class(&class)));
            let ty = Type::class(&class);
            let instantiable = self
                .ctx
                .program
                .class(&class)
                .is_some_and(|c| c.is_instantiable());
            let storage = self.ctx.types.construct_type_storage(&ty, instantiable);
            let value = ReferenceValue::new(storage.clone(), addr.clone());
            let constraint = self.ctx.types.registry().type_constraint(&addr, &storage);
            self.queue_hard(constraint.is_constraint());
            self.queue_hard(addr.ne(&Expr::null()));
            self.queue_hard(addr.le(&Expr::null()));
            self.queued.memory.touched_addresses.push(addr);
            Some(SymbolicValue::Object(value))
        };
        let mut params = Vec::new();
        for (i, ty) in def.params.iter().enumerate() {
            params.push(self.create_parameter(i, ty)?);
        }
        Ok(Inputs { this, params })
    }

    fn create_parameter(&mut self, index: usize, ty: &Type) -> Result<SymbolicValue, EngineError> {
        let name = format!("param{index}");
        let expr = Expr::var(&name, crate::value::sort_of(ty));
        if ty.is_primitive() {
            let value = SymbolicValue::primitive(ty.clone(), expr);
            self.prefer_readable(&value);
            return Ok(value);
        }
        self.queue_hard(expr.le(&Expr::null()));
        Ok(self.create_input_object(expr, ty, None))
    }

    /// Soft bounds keeping generated numbers small and characters printable.
    pub(crate) fn prefer_readable(&mut self, value: &SymbolicValue) {
        let SymbolicValue::Primitive(p) = value else {
            return;
        };
        let bits = p.expr.bits();
        match p.ty {
            Type::Char => {
                let c = p.expr.extend(false, 32);
                self.queue_soft(c.ge(&Expr::int32(32)));
                self.queue_soft(c.le(&Expr::int32(127)));
            }
            Type::Int | Type::Long | Type::Short => {
                self.queue_soft(p.expr.ge(&Expr::int(-256, bits)));
                self.queue_soft(p.expr.le(&Expr::int(256, bits)));
            }
            _ => {}
        }
    }

    /// Type storage of a freshly created object of exactly `ty`.
    pub(crate) fn exact(&self, ty: &Type) -> TypeStorage {
        self.ctx.types.construct_type_storage(ty, true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::program::Program;
    use crate::state::StateLabel;
    use std::sync::Arc;

    pub(crate) fn context(json: &str) -> EngineContext {
        let program = Program::from_json(json).unwrap();
        EngineContext::new(Arc::new(program), EngineConfig::default())
    }

    /// Steps every state until none is left, collecting terminal states.
    pub(crate) fn run_to_end(ctx: &EngineContext, method: &str) -> Vec<ExecutionState> {
        let id = ctx.program.find_method(method).unwrap();
        let traverser = Traverser::new(ctx);
        let mut pending = vec![traverser.initial_state(id).unwrap()];
        let mut done = Vec::new();
        let mut budget = 10_000;
        while let Some(state) = pending.pop() {
            budget -= 1;
            assert!(budget > 0, "runaway exploration");
            for next in traverser.traverse(&state).unwrap() {
                if next.label == StateLabel::Terminal {
                    done.push(next);
                } else if next.path_len() < 500 {
                    pending.push(next);
                }
            }
        }
        done
    }

    const PARAMS: &str = r#"{"classes":[{"name":"demo.P","methods":[
        {"name":"id","params":["int"],"ret":"int","static":true,"body":{"stmts":[
            {"op":"identity","local":"x","value":{"kind":"parameter","index":0}},
            {"op":"return","value":{"local":"x"}}
        ]}}
    ]}]}"#;

    #[test]
    fn test_initial_state_binds_parameters() {
        let ctx = context(PARAMS);
        let id = ctx.program.find_method("demo.P.id").unwrap();
        let state = Traverser::new(&ctx).initial_state(id).unwrap();
        assert_eq!(state.inputs.params.len(), 1);
        assert!(state.inputs.this.is_none());
        assert!(state.local(&parameter_local(0)).is_some());
        assert!(!state.symbolic.soft.is_empty());
    }

    #[test]
    fn test_straight_line_reaches_one_terminal() {
        let ctx = context(PARAMS);
        let done = run_to_end(&ctx, "demo.P.id");
        assert_eq!(done.len(), 1);
        match &done[0].result {
            Some(MethodResult::Success(Some(value))) => {
                assert_eq!(value.expr(), &Expr::var("param0", crate::expr::Sort::BitVec(32)));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_terminal_states_are_rejected() {
        let ctx = context(PARAMS);
        let done = run_to_end(&ctx, "demo.P.id");
        assert!(Traverser::new(&ctx).traverse(&done[0]).is_err());
    }

    #[test]
    fn test_unbound_local_is_an_error() {
        let ctx = context(
            r#"{"classes":[{"name":"demo.U","methods":[
                {"name":"f","ret":"int","static":true,"body":{"stmts":[
                    {"op":"return","value":{"local":"ghost"}}
                ]}}
            ]}]}"#,
        );
        let id = ctx.program.find_method("demo.U.f").unwrap();
        let traverser = Traverser::new(&ctx);
        let state = traverser.initial_state(id).unwrap();
        let err = traverser.traverse(&state).unwrap_err();
        assert!(matches!(err, EngineError::UnboundLocal { .. }));
    }
}
