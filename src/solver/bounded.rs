//! Pure Rust solver for small queries
//!
//! Refutation is cheap and sound: a syntactic contradiction or an empty
//! integer interval proves a query unsatisfiable. Otherwise a depth-first
//! search assigns the atomic unknowns (scalar variables and array cells)
//! in the order evaluation asks for them, trying small integers and the
//! constants of the query. The search is incomplete, so running out of
//! candidates or nodes reports UNKNOWN, never UNSAT.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use super::{relax, Model, Query, SatModel, SatResult, Solver};
use crate::error::SolverError;
use crate::expr::{evaluate, wrap, Assignment, CmpOp, Expr, ExprKind, Key, Sort, Value};

/// Soft constraints tried one by one when they do not all fit.
const MAX_GREEDY_SOFT: usize = 16;

const SMALL_VALUES: [i128; 9] = [0, 1, -1, 2, -2, 3, -3, 4, -4];

#[derive(Debug, Clone)]
pub struct BoundedSolver {
    node_budget: u64,
}

impl BoundedSolver {
    pub fn new(node_budget: u64) -> Self {
        Self { node_budget }
    }

    fn solve(&self, constraints: &[Expr], budget: u64) -> SatResult {
        if refute(constraints) {
            return SatResult::Unsat;
        }
        let mut search = Search {
            constraints,
            assignment: Partial::default(),
            candidates: Candidates::collect(constraints),
            nodes: 0,
            budget,
        };
        match search.run() {
            Outcome::Found => SatResult::Sat(SatModel::new(Box::new(BoundedModel(
                search.assignment.0,
            )))),
            Outcome::OutOfBudget => SatResult::Unknown(format!("node budget {} exhausted", budget)),
            Outcome::Conflict => SatResult::Unknown("candidate domain exhausted".to_string()),
        }
    }
}

impl Solver for BoundedSolver {
    fn name(&self) -> &'static str {
        "bounded"
    }

    fn check(&mut self, query: &Query) -> Result<SatResult, SolverError> {
        let budget = self.node_budget.saturating_mul(query.budget_factor.max(1) as u64);
        relax(query, MAX_GREEDY_SOFT, |constraints| {
            let result = self.solve(constraints, budget);
            trace!(constraints = constraints.len(), verdict = result.verdict(), "bounded check");
            Ok(result)
        })
    }
}

#[derive(Debug, Default)]
struct Partial(HashMap<Key, Value>);

impl Assignment for Partial {
    fn lookup(&self, key: &Key, _sort: &Sort) -> Option<Value> {
        self.0.get(key).cloned()
    }
}

#[derive(Debug)]
struct BoundedModel(HashMap<Key, Value>);

impl Model for BoundedModel {
    fn value_of(&self, key: &Key, sort: &Sort) -> Value {
        self.0
            .get(key)
            .cloned()
            .unwrap_or_else(|| sort.default_value())
    }
}

struct Candidates {
    constants: Vec<i128>,
}

impl Candidates {
    fn collect(constraints: &[Expr]) -> Self {
        let mut raw = Vec::new();
        for c in constraints {
            c.collect_constants(&mut raw);
        }
        let mut constants = Vec::new();
        for value in SMALL_VALUES
            .iter()
            .copied()
            .chain(raw.iter().flat_map(|&c| [c, c + 1, c - 1]))
        {
            if !constants.contains(&value) {
                constants.push(value);
            }
        }
        Self { constants }
    }

    fn for_sort(&self, sort: &Sort) -> Vec<Value> {
        match sort {
            Sort::Bool => vec![Value::Bool(false), Value::Bool(true)],
            Sort::BitVec(bits) => {
                let mut seen = HashSet::new();
                self.constants
                    .iter()
                    .map(|&c| wrap(c, *bits))
                    .filter(|v| seen.insert(*v))
                    .map(|value| Value::Int { value, bits: *bits })
                    .collect()
            }
            Sort::Array(..) => Vec::new(),
        }
    }
}

enum Outcome {
    Found,
    Conflict,
    OutOfBudget,
}

struct Search<'a> {
    constraints: &'a [Expr],
    assignment: Partial,
    candidates: Candidates,
    nodes: u64,
    budget: u64,
}

impl Search<'_> {
    fn run(&mut self) -> Outcome {
        let mut missing = None;
        for constraint in self.constraints {
            match evaluate(constraint, &self.assignment) {
                Ok(value) if value.as_bool() == Some(false) => return Outcome::Conflict,
                Ok(_) => {}
                Err(m) => {
                    missing.get_or_insert(m);
                }
            }
        }
        let Some(missing) = missing else {
            return Outcome::Found;
        };
        for value in self.candidates.for_sort(&missing.sort) {
            self.nodes += 1;
            if self.nodes > self.budget {
                return Outcome::OutOfBudget;
            }
            self.assignment.0.insert(missing.key.clone(), value);
            match self.run() {
                Outcome::Found => return Outcome::Found,
                Outcome::OutOfBudget => return Outcome::OutOfBudget,
                Outcome::Conflict => {}
            }
        }
        self.assignment.0.remove(&missing.key);
        Outcome::Conflict
    }
}

/// Interval knowledge about one term.
#[derive(Debug, Clone)]
struct Bounds {
    lo: i128,
    hi: i128,
    excluded: Vec<i128>,
}

impl Bounds {
    fn full(bits: u32) -> Self {
        let half = 1i128 << (bits.clamp(1, 126) - 1);
        Self {
            lo: -half,
            hi: half - 1,
            excluded: Vec::new(),
        }
    }

    fn apply(&mut self, op: CmpOp, c: i128) {
        match op {
            CmpOp::Lt => self.hi = self.hi.min(c - 1),
            CmpOp::Le => self.hi = self.hi.min(c),
            CmpOp::Gt => self.lo = self.lo.max(c + 1),
            CmpOp::Ge => self.lo = self.lo.max(c),
        }
    }

    fn is_empty(&self) -> bool {
        if self.lo > self.hi {
            return true;
        }
        let width = self.hi - self.lo + 1;
        width <= self.excluded.len() as i128
            && (self.lo..=self.hi).all(|v| self.excluded.contains(&v))
    }
}

fn negate(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Ge,
        CmpOp::Le => CmpOp::Gt,
        CmpOp::Gt => CmpOp::Le,
        CmpOp::Ge => CmpOp::Lt,
    }
}

fn mirror(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Gt,
        CmpOp::Le => CmpOp::Ge,
        CmpOp::Gt => CmpOp::Lt,
        CmpOp::Ge => CmpOp::Le,
    }
}

fn flatten(constraints: &[Expr]) -> Vec<Expr> {
    let mut atoms = Vec::new();
    let mut pending: Vec<Expr> = constraints.to_vec();
    while let Some(e) = pending.pop() {
        match e.kind() {
            ExprKind::And(es) => pending.extend(es.iter().cloned()),
            _ => atoms.push(e),
        }
    }
    atoms
}

/// Term compared with a constant, normalized to `term op constant`.
fn bound_of(atom: &Expr) -> Option<(Expr, CmpOp, i128)> {
    let (negated, inner) = match atom.kind() {
        ExprKind::Not(inner) => (true, inner),
        _ => (false, atom),
    };
    let ExprKind::Cmp { op, lhs, rhs } = inner.kind() else {
        return None;
    };
    let (term, op, c) = match (lhs.as_int(), rhs.as_int()) {
        (None, Some(c)) => (lhs.clone(), *op, c),
        (Some(c), None) => (rhs.clone(), mirror(*op), c),
        _ => return None,
    };
    Some((term, if negated { negate(op) } else { op }, c))
}

fn equality_of(atom: &Expr) -> Option<(Expr, bool, i128)> {
    let (negated, inner) = match atom.kind() {
        ExprKind::Not(inner) => (true, inner),
        _ => (false, atom),
    };
    let ExprKind::Eq(a, b) = inner.kind() else {
        return None;
    };
    match (a.as_int(), b.as_int()) {
        (None, Some(c)) => Some((a.clone(), !negated, c)),
        (Some(c), None) => Some((b.clone(), !negated, c)),
        _ => None,
    }
}

/// Sound, incomplete unsatisfiability check.
pub fn refute(constraints: &[Expr]) -> bool {
    let atoms = flatten(constraints);
    let set: HashSet<&Expr> = atoms.iter().collect();
    let mut bounds: HashMap<Expr, Bounds> = HashMap::new();
    for atom in &atoms {
        if atom.is_false() {
            return true;
        }
        if set.contains(&atom.not()) {
            return true;
        }
        if let Some((term, op, c)) = bound_of(atom) {
            let bits = term.bits();
            bounds
                .entry(term)
                .or_insert_with(|| Bounds::full(bits))
                .apply(op, c);
        } else if let Some((term, equal, c)) = equality_of(atom) {
            let bits = term.bits();
            let b = bounds.entry(term).or_insert_with(|| Bounds::full(bits));
            if equal {
                b.apply(CmpOp::Ge, c);
                b.apply(CmpOp::Le, c);
            } else {
                b.excluded.push(c);
            }
        }
    }
    bounds.values().any(Bounds::is_empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::var(name, Sort::BitVec(32))
    }

    fn check(constraints: Vec<Expr>) -> SatResult {
        BoundedSolver::new(50_000)
            .check(&Query::new(constraints))
            .unwrap()
    }

    #[test]
    fn test_interval_refutation() {
        let x = var("x");
        assert!(refute(&[x.gt(&Expr::int32(5)), x.lt(&Expr::int32(3))]));
        assert!(refute(&[x.eq(&Expr::int32(1)), x.eq(&Expr::int32(2))]));
        assert!(refute(&[
            x.ge(&Expr::int32(0)),
            x.le(&Expr::int32(1)),
            x.ne(&Expr::int32(0)),
            x.ne(&Expr::int32(1)),
        ]));
        assert!(!refute(&[x.gt(&Expr::int32(5)), x.lt(&Expr::int32(7))]));
        assert!(matches!(
            check(vec![x.gt(&Expr::int32(5)), x.lt(&Expr::int32(3))]),
            SatResult::Unsat
        ));
    }

    #[test]
    fn test_contradicting_literals() {
        let b = Expr::var("b", Sort::Bool);
        assert!(refute(&[Expr::and([b.clone(), var("x").eq(&Expr::int32(1))]), b.not()]));
    }

    #[test]
    fn test_finds_array_cell_witness() {
        let lengths = Expr::var("len", Sort::array(Sort::BitVec(32), Sort::BitVec(32)));
        let a = var("a");
        let constraints = vec![
            a.ne(&Expr::int32(0)),
            lengths.select(&a).ge(&Expr::int32(1)),
            lengths.select(&a).le(&Expr::int32(40)),
        ];
        let SatResult::Sat(model) = check(constraints) else {
            panic!("expected sat");
        };
        assert_ne!(model.eval_int(&a), 0);
        assert!(model.eval_int(&lengths.select(&a)) >= 1);
    }

    #[test]
    fn test_division_witness() {
        let (a, b) = (var("a"), var("b"));
        let constraints = vec![
            b.ne(&Expr::int32(0)),
            Expr::arith(crate::expr::ArithOp::Div, &a, &b).eq(&Expr::int32(3)),
        ];
        let SatResult::Sat(model) = check(constraints) else {
            panic!("expected sat");
        };
        let (va, vb) = (model.eval_int(&a), model.eval_int(&b));
        assert_ne!(vb, 0);
        assert_eq!(va / vb, 3);
    }

    #[test]
    fn test_unreachable_value_is_unknown_not_unsat() {
        let x = var("x");
        let y = var("y");
        let result = check(vec![x.mul(&y).eq(&Expr::int32(1_000_003))]);
        assert!(matches!(result, SatResult::Unknown(_)) || result.is_sat());
    }
}
