//! z3 driven over SMT-LIB2 on a pipe
//!
//! Each query runs in its own z3 process. Soft constraints and assumptions
//! are guarded by fresh boolean literals passed to `check-sat-assuming`;
//! literals in the unsat core are dropped and the check repeated. The model
//! keeps the process alive and asks `get-value` lazily for every unknown the
//! resolver evaluates. Dropping the model kills the process.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::{debug, trace};

use super::parser::{self, paren_balance, Verdict};
use super::{Model, Query, SatModel, SatResult, Solver};
use crate::error::SolverError;
use crate::expr::{smtlib, Key, Sort, Value, ADDR_BITS};

#[derive(Debug, Clone)]
pub struct Z3ProcessSolver {
    path: PathBuf,
    timeout_ms: u64,
}

impl Z3ProcessSolver {
    pub fn new(path: PathBuf, timeout_ms: u64) -> Self {
        Self { path, timeout_ms }
    }
}

#[derive(Debug)]
struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Session {
    fn spawn(path: &Path) -> Result<Self, SolverError> {
        let mut child = Command::new(path)
            .arg("-in")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SolverError::NotFound(path.to_path_buf()),
                _ => SolverError::Process(format!("failed to start z3: {e}")),
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SolverError::Process("z3 stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SolverError::Process("z3 stdout unavailable".to_string()))?;
        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        session.command("(set-option :print-success true)")?;
        session.command("(set-option :produce-unsat-cores true)")?;
        Ok(session)
    }

    /// Sends one command and returns its complete response.
    fn ask(&mut self, command: &str) -> Result<String, SolverError> {
        trace!(command, "z3 <");
        writeln!(self.stdin, "{}", command)
            .and_then(|_| self.stdin.flush())
            .map_err(|e| SolverError::Process(format!("failed to write to z3: {e}")))?;
        let mut response = String::new();
        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| SolverError::Process(format!("failed to read from z3: {e}")))?;
            if read == 0 {
                return Err(SolverError::Process("z3 exited unexpectedly".to_string()));
            }
            response.push_str(&line);
            if !response.trim().is_empty() && paren_balance(&response) <= 0 {
                break;
            }
        }
        trace!(response = response.trim(), "z3 >");
        Ok(response.trim().to_string())
    }

    /// Sends a command that answers `success`.
    fn command(&mut self, command: &str) -> Result<(), SolverError> {
        let response = self.ask(command)?;
        parser::check_error(&response)?;
        match response.as_str() {
            "success" => Ok(()),
            other => Err(SolverError::Parse(format!("expected success, got `{other}`"))),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn literal_name(prefix: &str, index: usize) -> String {
    format!("{prefix}!{index}")
}

impl Solver for Z3ProcessSolver {
    fn name(&self) -> &'static str {
        "z3"
    }

    fn check(&mut self, query: &Query) -> Result<SatResult, SolverError> {
        let mut session = Session::spawn(&self.path)?;
        if self.timeout_ms > 0 {
            let timeout = self.timeout_ms.saturating_mul(query.budget_factor.max(1) as u64);
            session.command(&format!("(set-option :timeout {timeout})"))?;
        }

        let mut variables = BTreeMap::new();
        for e in query.hard.iter().chain(&query.soft).chain(&query.assumptions) {
            e.collect_variables(&mut variables);
        }
        for (name, sort) in &variables {
            session.command(&smtlib::declare(name, sort))?;
        }
        for e in &query.hard {
            session.command(&format!("(assert {})", smtlib::term(e)))?;
        }

        // literal name -> (is soft, index)
        let mut literals: Vec<(String, bool, usize)> = Vec::new();
        let guarded = query
            .soft
            .iter()
            .enumerate()
            .map(|(i, e)| (literal_name("soft", i), true, i, e))
            .chain(
                query
                    .assumptions
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (literal_name("assume", i), false, i, e)),
            );
        for (name, soft, index, expr) in guarded {
            session.command(&smtlib::declare(&name, &Sort::Bool))?;
            session.command(&format!(
                "(assert (=> {} {}))",
                smtlib::symbol(&name),
                smtlib::term(expr)
            ))?;
            literals.push((name, soft, index));
        }

        let mut dropped_assumptions = Vec::new();
        let mut dropped_soft = 0;
        loop {
            let active: Vec<String> = literals.iter().map(|(n, ..)| smtlib::symbol(n)).collect();
            let verdict = parser::parse_verdict(
                &session.ask(&format!("(check-sat-assuming ({}))", active.join(" ")))?,
            )?;
            match verdict {
                Verdict::Sat => break,
                Verdict::Unknown => {
                    let reason = session
                        .ask("(get-info :reason-unknown)")
                        .unwrap_or_else(|_| "unknown".to_string());
                    debug!(reason, "z3 returned unknown");
                    return Ok(SatResult::Unknown(reason));
                }
                Verdict::Unsat => {
                    let core = parser::parse_core(&session.ask("(get-unsat-core)")?)?;
                    if core.is_empty() {
                        return Ok(SatResult::Unsat);
                    }
                    let soft_in_core = literals
                        .iter()
                        .any(|(n, soft, _)| *soft && core.contains(n));
                    let before = literals.len();
                    if soft_in_core {
                        literals.retain(|(n, soft, _)| !(*soft && core.contains(n)));
                        dropped_soft += before - literals.len();
                    } else if let Some(pos) = literals.iter().position(|(n, ..)| core.contains(n)) {
                        let (_, _, index) = literals.remove(pos);
                        dropped_assumptions.push(query.assumptions[index].clone());
                    } else {
                        return Ok(SatResult::Unsat);
                    }
                }
            }
        }

        let mut model = SatModel::new(Box::new(Z3Model {
            session: RefCell::new(session),
            cache: RefCell::new(HashMap::new()),
        }));
        model.dropped_assumptions = dropped_assumptions;
        model.dropped_soft = dropped_soft;
        Ok(SatResult::Sat(model))
    }
}

/// Model answered lazily by the z3 process that found it.
#[derive(Debug)]
struct Z3Model {
    session: RefCell<Session>,
    cache: RefCell<HashMap<Key, Value>>,
}

fn key_term(key: &Key) -> String {
    match key {
        Key::Scalar(name) => smtlib::symbol(name),
        Key::Cell { array, path } => path.iter().fold(smtlib::symbol(array), |acc, index| {
            format!("(select {} {})", acc, smtlib::int_literal(*index, ADDR_BITS))
        }),
    }
}

impl Model for Z3Model {
    fn value_of(&self, key: &Key, sort: &Sort) -> Value {
        if let Some(value) = self.cache.borrow().get(key) {
            return value.clone();
        }
        let response = self
            .session
            .borrow_mut()
            .ask(&format!("(get-value ({}))", key_term(key)));
        let value = response
            .and_then(|r| parser::parse_values(&r, std::slice::from_ref(sort)))
            .ok()
            .and_then(|mut values| values.pop())
            .unwrap_or_else(|| {
                debug!(?key, "no model value, using default");
                sort.default_value()
            });
        self.cache.borrow_mut().insert(key.clone(), value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn test_key_terms() {
        assert_eq!(key_term(&Key::Scalar("x".into())), "|x|");
        assert_eq!(
            key_term(&Key::Cell {
                array: "arraysLength".into(),
                path: vec![-1],
            }),
            "(select |arraysLength| (_ bv4294967295 32))"
        );
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let mut solver = Z3ProcessSolver::new(PathBuf::from("/nonexistent/z3-binary"), 1000);
        let err = solver
            .check(&Query::new([Expr::bool(true)]))
            .unwrap_err();
        assert_eq!(
            err,
            SolverError::NotFound(PathBuf::from("/nonexistent/z3-binary"))
        );
    }
}
