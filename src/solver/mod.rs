//! Constraint solving
//!
//! A [`Query`] holds hard constraints that must hold, soft constraints kept
//! only while they keep the query satisfiable, and assumptions dropped one by
//! one when they make it unsatisfiable. Two back ends implement [`Solver`]:
//! the pure Rust [`BoundedSolver`] and [`Z3ProcessSolver`], which drives an
//! external `z3` binary.

pub mod bounded;
pub mod parser;
pub mod z3;

use std::fmt;

use crate::config::SolverConfig;
use crate::error::SolverError;
use crate::expr::{evaluate, Assignment, Expr, Key, Sort, Value};

pub use bounded::BoundedSolver;
pub use z3::Z3ProcessSolver;

/// One satisfiability question.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub hard: Vec<Expr>,
    pub soft: Vec<Expr>,
    pub assumptions: Vec<Expr>,
    /// Multiplier for the node budget or timeout, raised on retries
    pub budget_factor: u32,
}

impl Query {
    pub fn new(hard: impl IntoIterator<Item = Expr>) -> Self {
        Self {
            hard: hard.into_iter().collect(),
            budget_factor: 1,
            ..Default::default()
        }
    }

    pub fn with_soft(mut self, soft: impl IntoIterator<Item = Expr>) -> Self {
        self.soft = soft.into_iter().collect();
        self
    }

    pub fn with_assumptions(mut self, assumptions: impl IntoIterator<Item = Expr>) -> Self {
        self.assumptions = assumptions.into_iter().collect();
        self
    }

    pub fn with_budget_factor(mut self, factor: u32) -> Self {
        self.budget_factor = factor.max(1);
        self
    }
}

/// Complete assignment produced by a solver. Unconstrained keys get an
/// arbitrary value of their sort.
pub trait Model: fmt::Debug {
    fn value_of(&self, key: &Key, sort: &Sort) -> Value;
}

struct Complete<'a>(&'a dyn Model);

impl Assignment for Complete<'_> {
    fn lookup(&self, key: &Key, sort: &Sort) -> Option<Value> {
        Some(self.0.value_of(key, sort))
    }
}

/// A satisfying model plus what had to be given up to find it.
#[derive(Debug)]
pub struct SatModel {
    model: Box<dyn Model>,
    pub dropped_assumptions: Vec<Expr>,
    pub dropped_soft: usize,
}

impl SatModel {
    pub fn new(model: Box<dyn Model>) -> Self {
        Self {
            model,
            dropped_assumptions: Vec::new(),
            dropped_soft: 0,
        }
    }

    pub fn eval(&self, expr: &Expr) -> Value {
        evaluate(expr, &Complete(self.model.as_ref())).unwrap_or_else(|m| m.sort.default_value())
    }

    pub fn eval_int(&self, expr: &Expr) -> i128 {
        self.eval(expr).as_int().unwrap_or(0)
    }

    pub fn eval_bool(&self, expr: &Expr) -> bool {
        self.eval(expr).as_bool().unwrap_or(false)
    }
}

#[derive(Debug)]
pub enum SatResult {
    Sat(SatModel),
    Unsat,
    Unknown(String),
}

impl SatResult {
    pub fn is_sat(&self) -> bool {
        matches!(self, SatResult::Sat(_))
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, SatResult::Unsat)
    }

    pub fn verdict(&self) -> &'static str {
        match self {
            SatResult::Sat(_) => "sat",
            SatResult::Unsat => "unsat",
            SatResult::Unknown(_) => "unknown",
        }
    }
}

pub trait Solver {
    fn name(&self) -> &'static str;

    fn check(&mut self, query: &Query) -> Result<SatResult, SolverError>;
}

pub fn build_solver(config: &SolverConfig) -> Box<dyn Solver> {
    match config {
        SolverConfig::Bounded { node_budget } => Box::new(BoundedSolver::new(*node_budget)),
        SolverConfig::Z3 { path, timeout_ms } => {
            Box::new(Z3ProcessSolver::new(path.clone(), *timeout_ms))
        }
    }
}

/// Shared soft/assumption relaxation over a back end that answers plain
/// conjunctions.
///
/// Assumptions are dropped in order until hard plus remaining assumptions
/// are satisfiable. Soft constraints are then all kept if possible, else
/// added greedily one at a time (at most `max_greedy` tries).
pub(crate) fn relax<F>(query: &Query, max_greedy: usize, mut check: F) -> Result<SatResult, SolverError>
where
    F: FnMut(&[Expr]) -> Result<SatResult, SolverError>,
{
    let mut base: Vec<Expr> = query.hard.clone();
    let mut dropped = Vec::new();
    let mut kept_assumptions: Vec<Expr> = query.assumptions.clone();

    let mut with_all = base.clone();
    with_all.extend(kept_assumptions.iter().cloned());
    with_all.extend(query.soft.iter().cloned());
    if let SatResult::Sat(mut model) = check(&with_all)? {
        model.dropped_assumptions = dropped;
        return Ok(SatResult::Sat(model));
    }

    let result = loop {
        let mut attempt = base.clone();
        attempt.extend(kept_assumptions.iter().cloned());
        match check(&attempt)? {
            SatResult::Unsat | SatResult::Unknown(_) if !kept_assumptions.is_empty() => {
                dropped.push(kept_assumptions.remove(0));
            }
            other => break other,
        }
    };
    let SatResult::Sat(mut model) = result else {
        return Ok(result);
    };
    base.extend(kept_assumptions);

    let mut dropped_soft = query.soft.len();
    if query.soft.len() <= max_greedy {
        let mut kept = base.clone();
        for soft in &query.soft {
            kept.push(soft.clone());
            match check(&kept)? {
                SatResult::Sat(better) => {
                    model = better;
                    dropped_soft -= 1;
                }
                _ => {
                    kept.pop();
                }
            }
        }
    }
    model.dropped_assumptions = dropped;
    model.dropped_soft = dropped_soft;
    Ok(SatResult::Sat(model))
}
