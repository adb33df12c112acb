//! The search loop
//!
//! [`SymbolicEngine::explore`] drives one method to completion: poll a
//! state, re-check it if it gained hard constraints, step it, offer the
//! intermediate successors back and turn the terminal ones into results.
//! The loop is single-threaded. Only concrete re-execution runs on a worker
//! thread, raced against a timeout.

pub mod context;
pub mod selector;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::UnknownPolicy;
use crate::error::EngineError;
use crate::expr::{Expr, Key, Sort, Value};
use crate::memory::{array_length, MemoryState};
use crate::program::MethodId;
use crate::resolver::{
    resolve_execution, ConcreteModel, ExecutionOutcome, ResolvedExecution, StateModel,
};
use crate::solver::{build_solver, Model, Query, SatModel, SatResult, Solver};
use crate::state::{ExecutionState, StateLabel};
use crate::traverser::Traverser;
use crate::types::TypeRegistry;
use crate::value::default_expr;

pub use context::{Counters, EngineContext};
pub use selector::{BfsSelector, DfsSelector, PathSelector, Strategy};

const PAUSE_POLL: Duration = Duration::from_millis(10);

/// Shared handle to stop or pause a running search from another thread.
#[derive(Debug, Clone, Default)]
pub struct EngineControl {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl EngineControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }
}

/// What a concrete run of a resolved execution observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteRun {
    pub after: StateModel,
    pub result: ExecutionOutcome,
    pub coverage: Vec<String>,
}

/// Runs a resolved execution for real, for instance in an instrumented
/// child process. An `Err` is a process-level failure, not a failure of the
/// method under test.
pub trait ConcreteExecutor: Send + Sync + 'static {
    fn execute(&self, execution: &ResolvedExecution) -> Result<ConcreteRun, String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineResult {
    Execution(ResolvedExecution),
    /// A state could not be stepped and was discarded
    Error {
        method: String,
        location: String,
        stack: String,
        error: String,
    },
    /// The concrete executor crashed or timed out
    ConcreteFailure { path_id: String, reason: String },
}

/// Counters of one exploration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationStats {
    pub steps: u64,
    pub executions: u64,
    pub errors: u64,
    pub unsat: u64,
    pub unknown: u64,
    /// Dropped by the loop bound or the path length limit
    pub bounded: u64,
}

/// Every key takes the default of its sort.
#[derive(Debug)]
struct Defaults;

impl Model for Defaults {
    fn value_of(&self, _key: &Key, sort: &Sort) -> Value {
        sort.default_value()
    }
}

pub struct SymbolicEngine {
    ctx: EngineContext,
    solver: Box<dyn Solver>,
    selector: Box<dyn PathSelector>,
    control: EngineControl,
    executor: Option<Arc<dyn ConcreteExecutor>>,
}

impl SymbolicEngine {
    pub fn new(ctx: EngineContext) -> Self {
        let solver = build_solver(&ctx.config.solver);
        Self {
            ctx,
            solver,
            selector: Strategy::default().selector(),
            control: EngineControl::default(),
            executor: None,
        }
    }

    pub fn with_selector(mut self, selector: Box<dyn PathSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_solver(mut self, solver: Box<dyn Solver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ConcreteExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn control(&self) -> EngineControl {
        self.control.clone()
    }

    /// Lazily explores `method`; results arrive as states terminate.
    pub fn explore(&mut self, method: MethodId) -> Exploration<'_> {
        self.selector.clear();
        let mut pending = VecDeque::new();
        let mut stats = ExplorationStats::default();
        match Traverser::new(&self.ctx).initial_state(method) {
            Ok(state) => self.selector.offer(state),
            Err(err) => {
                stats.errors += 1;
                pending.push_back(EngineResult::Error {
                    method: self.ctx.program.method(method).to_string(),
                    location: self.ctx.program.method(method).to_string(),
                    stack: String::new(),
                    error: err.to_string(),
                });
            }
        }
        let deadline = self
            .ctx
            .config
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        Exploration {
            engine: self,
            pending,
            deadline,
            stats,
            done: false,
        }
    }

    /// Whether a state gained hard constraints that rule it out. UNKNOWN
    /// keeps the state.
    fn still_feasible(&mut self, state: &mut ExecutionState, stats: &mut ExplorationStats) -> Result<bool, EngineError> {
        if state.symbolic.hard.len() <= state.checked_hard {
            return Ok(true);
        }
        let query = Query::new(state.symbolic.hard.iter().cloned());
        match self.solver.check(&query)? {
            SatResult::Unsat => {
                stats.unsat += 1;
                debug!(state = state.id, at = %state.stmt, "dropped unsat state");
                Ok(false)
            }
            SatResult::Unknown(reason) => {
                trace!(state = state.id, %reason, "feasibility unknown, kept");
                Ok(true)
            }
            SatResult::Sat(_) => {
                state.checked_hard = state.symbolic.hard.len();
                Ok(true)
            }
        }
    }

    fn step(&mut self, state: ExecutionState, stats: &mut ExplorationStats) -> Vec<EngineResult> {
        let mut state = state;
        let mut results = Vec::new();
        match self.still_feasible(&mut state, stats) {
            Ok(true) => {}
            Ok(false) => return results,
            Err(err) => {
                results.push(self.error(&state, err, stats));
                return results;
            }
        }

        let successors = match Traverser::new(&self.ctx).traverse(&state) {
            Ok(successors) => successors,
            Err(err) => {
                results.push(self.error(&state, err, stats));
                return results;
            }
        };

        for next in successors {
            match next.label {
                StateLabel::Intermediate => {
                    if self.out_of_bounds(&next) {
                        stats.bounded += 1;
                        trace!(state = next.id, at = %next.stmt, "dropped by bound");
                    } else {
                        self.selector.offer(next);
                    }
                }
                StateLabel::Terminal => {
                    if let Some(result) = self.finish(next, stats) {
                        results.push(result);
                    }
                }
                StateLabel::Concrete => {
                    let model = SatModel::new(Box::new(Defaults));
                    if let Some(result) = self.concrete(&next, &model) {
                        results.push(result);
                    }
                }
            }
        }
        results
    }

    fn out_of_bounds(&self, state: &ExecutionState) -> bool {
        let config = &self.ctx.config;
        let looped = state
            .top_frame()
            .is_some_and(|f| f.loop_visits(state.stmt.stmt) > config.loop_unroll_limit);
        looped || state.path_len() > config.max_path_length
    }

    fn terminal_query(&self, state: &ExecutionState) -> Query {
        let soft = state.symbolic.soft.iter().cloned().chain(self.soft_defaults(state));
        Query::new(state.symbolic.hard.iter().cloned())
            .with_soft(soft)
            .with_assumptions(state.symbolic.assumptions.iter().cloned())
    }

    /// Prefers empty arrays and default field contents wherever the path
    /// left them open. Queued after the path's own soft constraints so
    /// those win on conflict.
    fn soft_defaults(&self, state: &ExecutionState) -> Vec<Expr> {
        let memory = &state.symbolic.memory;
        let lengths = memory
            .array_addresses()
            .map(|addr| array_length(addr).eq(&Expr::int32(0)));
        let fields = memory.instance_field_reads().map(|read| {
            let chunk = self.ctx.chunks.field(&read.field);
            memory
                .find_array(&chunk, &MemoryState::Initial)
                .select(&read.addr)
                .eq(&default_expr(&read.field.ty))
        });
        let mut defaults: Vec<Expr> = lengths.chain(fields).filter(|e| !e.is_true()).collect();
        defaults.sort();
        defaults.dedup();
        defaults
    }

    /// Types picked by a satisfiable resolution rank higher next time.
    fn bump_ratings(&self, before: &StateModel) {
        fn walk(model: &ConcreteModel, registry: &TypeRegistry) {
            match model {
                ConcreteModel::Composite { ty, fields, .. } => {
                    registry.bump_rating(ty);
                    fields.values().for_each(|f| walk(f, registry));
                }
                ConcreteModel::Array { elements, .. } => {
                    elements.iter().for_each(|e| walk(e, registry))
                }
                _ => {}
            }
        }
        let registry = self.ctx.types.registry();
        before.this.iter().chain(&before.params).for_each(|m| walk(m, registry));
    }

    fn finish(&mut self, state: ExecutionState, stats: &mut ExplorationStats) -> Option<EngineResult> {
        let query = self.terminal_query(&state);
        let mut verdict = match self.solver.check(&query) {
            Ok(verdict) => verdict,
            Err(err) => return Some(self.error(&state, err.into(), stats)),
        };
        if let UnknownPolicy::Retry { attempts, budget_factor } = self.ctx.config.unknown_policy {
            let mut attempt = 0;
            while matches!(verdict, SatResult::Unknown(_)) && attempt < attempts {
                attempt += 1;
                let factor = budget_factor.saturating_pow(attempt);
                debug!(state = state.id, attempt, factor, "retrying unknown terminal state");
                verdict = match self.solver.check(&query.clone().with_budget_factor(factor)) {
                    Ok(verdict) => verdict,
                    Err(err) => return Some(self.error(&state, err.into(), stats)),
                };
            }
        }
        debug!(state = state.id, solver = self.solver.name(), verdict = verdict.verdict(), "terminal state");
        trace!(path = %state.pretty_path(&self.ctx.program), "terminal path");

        match verdict {
            SatResult::Sat(model) => {
                if !model.dropped_assumptions.is_empty() {
                    debug!(dropped = model.dropped_assumptions.len(), "assumptions dropped");
                }
                stats.executions += 1;
                let resolved = resolve_execution(&self.ctx, &state, &model);
                self.bump_ratings(&resolved.before);
                Some(match &self.executor {
                    Some(executor) => self.run_concrete(Arc::clone(executor), resolved),
                    None => EngineResult::Execution(resolved),
                })
            }
            SatResult::Unsat => {
                stats.unsat += 1;
                None
            }
            SatResult::Unknown(reason) => {
                stats.unknown += 1;
                match self.ctx.config.unknown_policy {
                    UnknownPolicy::Concrete => {
                        let state = state.with_label(StateLabel::Concrete);
                        let model = SatModel::new(Box::new(Defaults));
                        self.concrete(&state, &model)
                    }
                    _ => {
                        debug!(state = state.id, %reason, "dropped unknown terminal state");
                        None
                    }
                }
            }
        }
    }

    fn concrete(&self, state: &ExecutionState, model: &SatModel) -> Option<EngineResult> {
        let Some(executor) = &self.executor else {
            debug!(state = state.id, "no concrete executor, state dropped");
            return None;
        };
        let resolved = resolve_execution(&self.ctx, state, model);
        Some(self.run_concrete(Arc::clone(executor), resolved))
    }

    /// Runs `resolved` on a worker thread. A worker that misses the
    /// deadline cannot be interrupted: it is detached and left to finish on
    /// its own, its late answer dropped with the channel.
    fn run_concrete(&self, executor: Arc<dyn ConcreteExecutor>, resolved: ResolvedExecution) -> EngineResult {
        let (tx, rx) = mpsc::channel();
        let input = resolved.clone();
        let spawned = thread::Builder::new()
            .name("concrete".to_string())
            .spawn(move || {
                let _ = tx.send(executor.execute(&input));
            });
        if let Err(err) = spawned {
            return EngineResult::ConcreteFailure {
                path_id: resolved.path_id,
                reason: format!("failed to start concrete run: {err}"),
            };
        }
        let timeout = Duration::from_millis(self.ctx.config.concrete_timeout_ms);
        let reason = match rx.recv_timeout(timeout) {
            Ok(Ok(run)) => {
                return EngineResult::Execution(ResolvedExecution {
                    after: run.after,
                    result: run.result,
                    coverage: run.coverage,
                    ..resolved
                });
            }
            Ok(Err(reason)) => reason,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                format!("timed out after {}ms, worker abandoned", timeout.as_millis())
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => "executor exited without an answer".to_string(),
        };
        warn!(path = %resolved.path_id, %reason, "concrete execution failed");
        EngineResult::ConcreteFailure {
            path_id: resolved.path_id,
            reason,
        }
    }

    fn error(&self, state: &ExecutionState, err: EngineError, stats: &mut ExplorationStats) -> EngineResult {
        stats.errors += 1;
        let program = &self.ctx.program;
        let stack = state.render_stack(program);
        warn!(state = state.id, at = %state.stmt, error = %err, "state discarded\n{stack}");
        let method = state
            .frames()
            .next()
            .map(|f| program.method(f.method).to_string())
            .unwrap_or_default();
        EngineResult::Error {
            method,
            location: state.stmt.to_string(),
            stack,
            error: err.to_string(),
        }
    }
}

/// Results of one [`SymbolicEngine::explore`] call, produced on demand.
pub struct Exploration<'a> {
    engine: &'a mut SymbolicEngine,
    pending: VecDeque<EngineResult>,
    deadline: Option<Instant>,
    stats: ExplorationStats,
    done: bool,
}

impl Exploration<'_> {
    pub fn stats(&self) -> ExplorationStats {
        self.stats
    }

    fn should_stop(&self) -> bool {
        let control = &self.engine.control;
        while control.is_paused() && !control.is_stopped() {
            thread::sleep(PAUSE_POLL);
        }
        if control.is_stopped() {
            debug!("search stopped");
            return true;
        }
        if let Some(max) = self.engine.ctx.config.max_steps {
            if self.stats.steps >= max {
                debug!(steps = self.stats.steps, "step budget exhausted");
                return true;
            }
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            debug!("search timed out");
            return true;
        }
        false
    }
}

impl Iterator for Exploration<'_> {
    type Item = EngineResult;

    fn next(&mut self) -> Option<EngineResult> {
        loop {
            if let Some(result) = self.pending.pop_front() {
                return Some(result);
            }
            if self.done {
                return None;
            }
            if self.should_stop() {
                self.engine.selector.clear();
                self.done = true;
                continue;
            }
            let Some(state) = self.engine.selector.poll() else {
                self.done = true;
                continue;
            };
            self.stats.steps += 1;
            let results = self.engine.step(state, &mut self.stats);
            self.pending.extend(results);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, SolverConfig};
    use crate::program::Program;
    use crate::state::MethodResult;

    const DIV: &str = r#"{"classes":[{"name":"demo.D","methods":[
        {"name":"div","params":["int","int"],"ret":"int","static":true,"body":{"stmts":[
            {"op":"identity","local":"a","value":{"kind":"parameter","index":0}},
            {"op":"identity","local":"b","value":{"kind":"parameter","index":1}},
            {"op":"assign","target":{"local":"q"},"value":{"binary":{"op":"div","lhs":{"local":"a"},"rhs":{"local":"b"}}}},
            {"op":"return","value":{"local":"q"}}
        ]}},
        {"name":"spin","ret":"int","static":true,"body":{"stmts":[
            {"op":"nop"},
            {"op":"nop"},
            {"op":"goto","target":1}
        ]}},
        {"name":"size","params":["int[]","demo.P"],"ret":"int","static":true,"body":{"stmts":[
            {"op":"identity","local":"a","value":{"kind":"parameter","index":0}},
            {"op":"identity","local":"p","value":{"kind":"parameter","index":1}},
            {"op":"assign","target":{"local":"n"},"value":{"length":{"local":"a"}}},
            {"op":"assign","target":{"local":"x"},"value":{"field":{"base":"p","field":{"class":"demo.P","name":"x","type":"int"}}}},
            {"op":"return","value":{"local":"n"}}
        ]}}
    ]},
    {"name":"demo.P","fields":[{"name":"x","type":"int"}],"methods":[]}]}"#;

    fn engine(config: EngineConfig) -> (SymbolicEngine, MethodId) {
        let program = Arc::new(Program::from_json(DIV).unwrap());
        let id = program.find_method("demo.D.div").unwrap();
        (SymbolicEngine::new(EngineContext::new(program, config)), id)
    }

    fn outcomes(results: &[EngineResult]) -> Vec<&ExecutionOutcome> {
        results
            .iter()
            .filter_map(|r| match r {
                EngineResult::Execution(e) => Some(&e.result),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_division_yields_success_and_failure() {
        let (mut engine, id) = engine(EngineConfig::default());
        let results: Vec<_> = engine.explore(id).collect();
        let outcomes = outcomes(&results);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, ExecutionOutcome::Failure { exception, .. } if exception.ends_with("ArithmeticException"))));
        assert!(outcomes.iter().any(|o| matches!(o, ExecutionOutcome::Success { .. })));
    }

    #[test]
    fn test_terminal_query_prefers_default_values() {
        let (engine, _) = engine(EngineConfig::default());
        let id = engine.context().program.find_method("demo.D.size").unwrap();
        let traverser = Traverser::new(engine.context());
        let mut pending = vec![traverser.initial_state(id).unwrap()];
        let mut success = None;
        while let Some(state) = pending.pop() {
            for next in traverser.traverse(&state).unwrap() {
                match next.result {
                    Some(MethodResult::Success(_)) => success = Some(next),
                    Some(_) => {}
                    None => pending.push(next),
                }
            }
        }
        let success = success.unwrap();
        let array = success.inputs.params[0].expr().clone();
        let holder = success.inputs.params[1].expr().clone();

        let query = engine.terminal_query(&success);
        let defaults = &query.soft[success.symbolic.soft.len()..];
        assert!(defaults.contains(&array_length(&array).eq(&Expr::int32(0))));
        assert!(defaults.iter().any(|d| d.to_string().contains(&holder.to_string())));
        assert_eq!(query.hard.len(), success.symbolic.hard.len());
    }

    #[test]
    fn test_stop_before_start_yields_nothing() {
        let (mut engine, id) = engine(EngineConfig::default());
        engine.control().stop();
        assert_eq!(engine.explore(id).count(), 0);
    }

    #[test]
    fn test_paused_search_continues_after_resume() {
        let (mut engine, id) = engine(EngineConfig::default());
        let control = engine.control();
        control.pause();
        let resumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            control.resume();
        });
        assert_eq!(engine.explore(id).count(), 2);
        resumer.join().unwrap();
        assert!(!engine.control().is_paused());
    }

    #[test]
    fn test_step_budget_is_honoured() {
        let (mut engine, id) = engine(EngineConfig::default().with_max_steps(1));
        let mut exploration = engine.explore(id);
        while exploration.next().is_some() {}
        assert_eq!(exploration.stats().steps, 1);
    }

    #[test]
    fn test_loop_bound_ends_infinite_loop() {
        let (mut engine, _) = engine(EngineConfig::default().with_loop_unroll_limit(2));
        let id = engine.context().program.find_method("demo.D.spin").unwrap();
        let mut exploration = engine.explore(id);
        assert!(exploration.next().is_none());
        assert_eq!(exploration.stats().bounded, 1);
    }

    #[test]
    fn test_unknown_terminal_is_dropped() {
        let config = EngineConfig::default()
            .with_solver(SolverConfig::Bounded { node_budget: 0 })
            .with_unknown_policy(UnknownPolicy::Drop);
        let (mut engine, id) = engine(config);
        let mut exploration = engine.explore(id);
        assert!(exploration.next().is_none());
        assert_eq!(exploration.stats().unknown, 2);
    }

    struct Echo;

    impl ConcreteExecutor for Echo {
        fn execute(&self, execution: &ResolvedExecution) -> Result<ConcreteRun, String> {
            Ok(ConcreteRun {
                after: execution.before.clone(),
                result: ExecutionOutcome::Success {
                    value: ConcreteModel::Void,
                },
                coverage: vec!["demo.D.div:2".to_string()],
            })
        }
    }

    struct Crash;

    impl ConcreteExecutor for Crash {
        fn execute(&self, _execution: &ResolvedExecution) -> Result<ConcreteRun, String> {
            Err("child process exited with 139".to_string())
        }
    }

    struct Slow;

    impl ConcreteExecutor for Slow {
        fn execute(&self, _execution: &ResolvedExecution) -> Result<ConcreteRun, String> {
            thread::sleep(Duration::from_millis(500));
            Err("too late".to_string())
        }
    }

    #[test]
    fn test_unknown_goes_to_concrete_executor() {
        let config = EngineConfig::default()
            .with_solver(SolverConfig::Bounded { node_budget: 0 })
            .with_unknown_policy(UnknownPolicy::Concrete);
        let (engine, id) = engine(config);
        let mut engine = engine.with_executor(Arc::new(Echo));
        let results: Vec<_> = engine.explore(id).collect();
        assert_eq!(results.len(), 2);
        for result in &results {
            match result {
                EngineResult::Execution(e) => assert_eq!(e.coverage, vec!["demo.D.div:2".to_string()]),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_executor_crash_is_a_concrete_failure() {
        let (engine, id) = engine(EngineConfig::default());
        let mut engine = engine.with_executor(Arc::new(Crash));
        let results: Vec<_> = engine.explore(id).collect();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r, EngineResult::ConcreteFailure { reason, .. } if reason.contains("139"))));
    }

    #[test]
    fn test_executor_timeout_is_a_concrete_failure() {
        let mut config = EngineConfig::default();
        config.concrete_timeout_ms = 20;
        let (engine, id) = engine(config);
        let mut engine = engine.with_executor(Arc::new(Slow));
        let first = engine.explore(id).next();
        match first {
            Some(EngineResult::ConcreteFailure { reason, .. }) => {
                assert!(reason.contains("timed out"));
                assert!(reason.contains("worker abandoned"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_results_serialize_with_type_tag() {
        let result = EngineResult::ConcreteFailure {
            path_id: "abc".to_string(),
            reason: "boom".to_string(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "concrete_failure");
        assert_eq!(json["reason"], "boom");
    }
}
