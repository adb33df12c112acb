//! Execution states of the symbolic search
//!
//! An [`ExecutionState`] is immutable. The transformations (`update`, `push`,
//! `pop`, `terminate`) build a new state that shares memory, constraint
//! lists, frames and path with its parent through `im` collections, so a fork
//! costs only the delta it introduces.

use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cfg::EdgeType;
use crate::expr::Expr;
use crate::memory::{LocalMemory, LocalMemoryUpdate, Memory, MemoryUpdate};
use crate::program::{MethodId, Program, StmtIndex};
use crate::value::SymbolicValue;

/// A statement of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub method: MethodId,
    pub stmt: StmtIndex,
}

impl Location {
    pub fn new(method: MethodId, stmt: StmtIndex) -> Self {
        Self { method, stmt }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.stmt)
    }
}

/// One transition taken by the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathEdge {
    pub from: Location,
    pub to: Location,
    pub kind: EdgeType,
}

impl PathEdge {
    /// Stable numeric code of the decision, used for path identifiers.
    fn decision(&self) -> i64 {
        match self.kind {
            EdgeType::Fallthrough => 0,
            EdgeType::TrueBranch => 1,
            EdgeType::FalseBranch => 2,
            EdgeType::Default => 3,
            EdgeType::Exception => 4,
            EdgeType::Case(key) => key.wrapping_mul(8).wrapping_add(5),
        }
    }
}

/// Hard, soft and assumption constraints over the memory they talk about.
#[derive(Debug, Clone, Default)]
pub struct SymbolicState {
    pub memory: Memory,
    pub hard: im::Vector<Expr>,
    pub soft: im::Vector<Expr>,
    pub assumptions: im::Vector<Expr>,
}

impl SymbolicState {
    pub fn apply(&self, update: &SymbolicStateUpdate) -> SymbolicState {
        let mut next = self.clone();
        if !update.memory.is_empty() {
            next.memory = self.memory.update(&update.memory);
        }
        push_new(&mut next.hard, &update.hard);
        push_new(&mut next.soft, &update.soft);
        push_new(&mut next.assumptions, &update.assumptions);
        next
    }
}

fn push_new(target: &mut im::Vector<Expr>, exprs: &[Expr]) {
    for e in exprs {
        if !e.is_true() {
            target.push_back(e.clone());
        }
    }
}

/// Constraints and memory changes produced by one step.
#[derive(Debug, Clone, Default)]
pub struct SymbolicStateUpdate {
    pub hard: Vec<Expr>,
    pub soft: Vec<Expr>,
    pub assumptions: Vec<Expr>,
    pub memory: MemoryUpdate,
}

impl SymbolicStateUpdate {
    pub fn hard(constraint: Expr) -> Self {
        Self {
            hard: vec![constraint],
            ..Default::default()
        }
    }

    pub fn memory(memory: MemoryUpdate) -> Self {
        Self {
            memory,
            ..Default::default()
        }
    }
}

impl AddAssign for SymbolicStateUpdate {
    fn add_assign(&mut self, other: SymbolicStateUpdate) {
        self.hard.extend(other.hard);
        self.soft.extend(other.soft);
        self.assumptions.extend(other.assumptions);
        self.memory += other.memory;
    }
}

impl AddAssign<MemoryUpdate> for SymbolicStateUpdate {
    fn add_assign(&mut self, other: MemoryUpdate) {
        self.memory += other;
    }
}

/// A call frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub method: MethodId,
    /// Invoke statement of the caller, `None` for the method under test
    pub caller: Option<Location>,
    pub locals: LocalMemory,
    /// Failing branches of implicit checks are not emitted in this frame
    pub does_not_throw: bool,
    /// Resume at the caller statement instead of after it (static
    /// initializers run on demand before the statement that needed them)
    pub reexecute_caller: bool,
    /// Class whose `<clinit>` this frame runs
    pub static_init_of: Option<String>,
    loop_visits: im::HashMap<StmtIndex, usize>,
}

impl Frame {
    pub fn new(method: MethodId, caller: Option<Location>, locals: LocalMemory) -> Self {
        Self {
            method,
            caller,
            locals,
            does_not_throw: false,
            reexecute_caller: false,
            static_init_of: None,
            loop_visits: im::HashMap::new(),
        }
    }

    pub fn static_initializer(method: MethodId, caller: Location, class: &str) -> Self {
        Self {
            reexecute_caller: true,
            static_init_of: Some(class.to_string()),
            ..Self::new(method, Some(caller), LocalMemory::default())
        }
    }

    pub fn loop_visits(&self, header: StmtIndex) -> usize {
        self.loop_visits.get(&header).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateLabel {
    Intermediate,
    /// Handed to concrete execution, never stepped again
    Concrete,
    /// Returned or threw at depth 0, ready for resolution
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// `throw` in the analysed code
    Explicit,
    /// Raised by a failed implicit check
    Implicit,
    /// Integer overflow with overflow checking enabled
    Overflow,
}

/// An exception escaping (or about to be routed through) the call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicFailure {
    pub exception: SymbolicValue,
    /// Class the exception was created with, when known exactly
    pub class: String,
    pub kind: FailureKind,
    /// Raised below the method under test
    pub in_nested_method: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodResult {
    Success(Option<SymbolicValue>),
    Failure(SymbolicFailure),
}

/// Symbolic inputs of the method under test.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub this: Option<SymbolicValue>,
    pub params: Vec<SymbolicValue>,
}

#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub id: u64,
    pub stmt: Location,
    pub symbolic: SymbolicState,
    stack: im::Vector<Frame>,
    path: im::Vector<PathEdge>,
    pub last_edge: Option<PathEdge>,
    pub label: StateLabel,
    pub result: Option<MethodResult>,
    pub inputs: Arc<Inputs>,
    /// Hard constraints already known to be satisfiable together
    pub checked_hard: usize,
}

impl ExecutionState {
    pub fn initial(id: u64, entry: Location, frame: Frame, inputs: Inputs, symbolic: SymbolicState) -> Self {
        Self {
            id,
            stmt: entry,
            symbolic,
            stack: im::vector![frame],
            path: im::Vector::new(),
            last_edge: None,
            label: StateLabel::Intermediate,
            result: None,
            inputs: Arc::new(inputs),
            checked_hard: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn frames(&self) -> impl DoubleEndedIterator<Item = &Frame> {
        self.stack.iter()
    }

    pub fn top_frame(&self) -> Option<&Frame> {
        self.stack.last()
    }

    pub fn local(&self, name: &str) -> Option<&SymbolicValue> {
        self.top_frame().and_then(|f| f.locals.local(name))
    }

    pub fn is_terminal(&self) -> bool {
        self.label != StateLabel::Intermediate
    }

    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    fn derive(&self, id: u64, next: Location, update: &SymbolicStateUpdate, kind: EdgeType) -> Self {
        let edge = PathEdge {
            from: self.stmt,
            to: next,
            kind,
        };
        let mut state = self.clone();
        state.id = id;
        state.stmt = next;
        state.symbolic = self.symbolic.apply(update);
        state.path.push_back(edge);
        state.last_edge = Some(edge);
        state
    }

    fn with_top<F: FnOnce(&mut Frame)>(mut self, f: F) -> Self {
        if let Some(last) = self.stack.len().checked_sub(1) {
            let mut frame = self.stack[last].clone();
            f(&mut frame);
            self.stack.set(last, frame);
        }
        self
    }

    /// Successor inside the current frame.
    pub fn update(
        &self,
        id: u64,
        next: StmtIndex,
        update: &SymbolicStateUpdate,
        locals: &LocalMemoryUpdate,
        kind: EdgeType,
    ) -> ExecutionState {
        let location = Location::new(self.stmt.method, next);
        self.derive(id, location, update, kind).with_top(|frame| {
            if !locals.is_empty() {
                frame.locals = frame.locals.update(locals);
            }
        })
    }

    /// Successor entering a loop header; counts the visit in the frame.
    pub fn visit_header(mut self, header: StmtIndex) -> ExecutionState {
        self = self.with_top(|frame| {
            let count = frame.loop_visits(header) + 1;
            frame.loop_visits.insert(header, count);
        });
        self
    }

    /// Enters `frame` at `entry`.
    pub fn push(
        &self,
        id: u64,
        entry: StmtIndex,
        frame: Frame,
        update: &SymbolicStateUpdate,
    ) -> ExecutionState {
        let location = Location::new(frame.method, entry);
        let mut state = self.derive(id, location, update, EdgeType::Fallthrough);
        state.stack.push_back(frame);
        state
    }

    /// Leaves the top frame and continues the caller at `next` with
    /// `caller_locals` applied.
    pub fn pop(
        &self,
        id: u64,
        next: Location,
        update: &SymbolicStateUpdate,
        caller_locals: &LocalMemoryUpdate,
        kind: EdgeType,
    ) -> ExecutionState {
        let mut state = self.derive(id, next, update, kind);
        state.stack.pop_back();
        state.with_top(|frame| {
            if !caller_locals.is_empty() {
                frame.locals = frame.locals.update(caller_locals);
            }
        })
    }

    /// Drops frames above `depth` and continues at `handler` of the frame
    /// now on top, binding the caught exception.
    pub fn unwind_to(
        &self,
        id: u64,
        depth: usize,
        handler: StmtIndex,
        update: &SymbolicStateUpdate,
        caught: &LocalMemoryUpdate,
    ) -> ExecutionState {
        let method = self.stack[depth - 1].method;
        let mut state = self.derive(id, Location::new(method, handler), update, EdgeType::Exception);
        state.stack.truncate(depth);
        state.with_top(|frame| frame.locals = frame.locals.update(caught))
    }

    /// Absorbing successor carrying the result of the method under test.
    pub fn terminate(&self, id: u64, result: MethodResult, update: &SymbolicStateUpdate) -> ExecutionState {
        let kind = match result {
            MethodResult::Success(_) => EdgeType::Fallthrough,
            MethodResult::Failure(_) => EdgeType::Exception,
        };
        let mut state = self.derive(id, self.stmt, update, kind);
        state.label = StateLabel::Terminal;
        state.result = Some(result);
        state
    }

    pub fn with_label(mut self, label: StateLabel) -> ExecutionState {
        self.label = label;
        self
    }

    pub fn full_path(&self) -> Vec<PathEdge> {
        self.path.iter().copied().collect()
    }

    /// blake3 of the decision path: its length, then each edge.
    pub fn path_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.path.len().to_le_bytes());
        for edge in &self.path {
            hasher.update(&edge.from.method.0.to_le_bytes());
            hasher.update(&edge.from.stmt.to_le_bytes());
            hasher.update(&edge.to.method.0.to_le_bytes());
            hasher.update(&edge.to.stmt.to_le_bytes());
            hasher.update(&edge.decision().to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Human readable path, one edge per line.
    pub fn pretty_path(&self, program: &Program) -> String {
        let mut out = String::new();
        for edge in &self.path {
            let method = program.method(edge.from.method);
            let label = edge.kind.dot_label();
            out.push_str(&format!(
                "{}.{} {} -> {}{}{}\n",
                method.class,
                method.name(),
                edge.from.stmt,
                edge.to.stmt,
                if label.is_empty() { "" } else { " " },
                label
            ));
        }
        out
    }

    /// Symbolic call stack, innermost first.
    pub fn render_stack(&self, program: &Program) -> String {
        let mut lines = Vec::new();
        let mut current = self.stmt;
        for frame in self.stack.iter().rev() {
            let method = program.method(frame.method);
            lines.push(format!("  at {} [{}]", method, current.stmt));
            if let Some(caller) = frame.caller {
                current = caller;
            }
        }
        lines.join("\n")
    }
}
