//! Reading z3 responses
//!
//! z3 answers every command with one s-expression (or a bare atom such as
//! `sat`). Responses may span several lines, so the reader collects lines
//! until parentheses balance.

use crate::error::SolverError;
use crate::expr::{wrap, Sort, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

impl SExpr {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExpr::Atom(a) => Some(a),
            SExpr::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(items) => Some(items),
            SExpr::Atom(_) => None,
        }
    }
}

/// Verdict of a `check-sat` style command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Sat,
    Unsat,
    Unknown,
}

/// Net parenthesis depth of `text`, ignoring parentheses inside `|..|` and
/// string literals.
pub fn paren_balance(text: &str) -> i64 {
    let mut depth = 0;
    let mut in_symbol = false;
    let mut in_string = false;
    for c in text.chars() {
        match c {
            '|' if !in_string => in_symbol = !in_symbol,
            '"' if !in_symbol => in_string = !in_string,
            '(' if !in_symbol && !in_string => depth += 1,
            ')' if !in_symbol && !in_string => depth -= 1,
            _ => {}
        }
    }
    depth
}

fn tokenize(text: &str) -> Result<Vec<String>, SolverError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '(' | ')' => {
                tokens.push(c.to_string());
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' | '"' => {
                let close = c;
                let mut token = String::from(c);
                chars.next();
                loop {
                    match chars.next() {
                        Some(ch) if ch == close => {
                            token.push(ch);
                            break;
                        }
                        Some(ch) => token.push(ch),
                        None => {
                            return Err(SolverError::Parse(format!("unterminated {close} in {text}")))
                        }
                    }
                }
                tokens.push(token);
            }
            _ => {
                let mut token = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == '(' || ch == ')' {
                        break;
                    }
                    token.push(ch);
                    chars.next();
                }
                tokens.push(token);
            }
        }
    }
    Ok(tokens)
}

/// Parses every top-level s-expression in `text`.
pub fn parse(text: &str) -> Result<Vec<SExpr>, SolverError> {
    let tokens = tokenize(text)?;
    let mut stack: Vec<Vec<SExpr>> = vec![Vec::new()];
    for token in tokens {
        match token.as_str() {
            "(" => stack.push(Vec::new()),
            ")" => {
                let list = stack
                    .pop()
                    .filter(|_| !stack.is_empty())
                    .ok_or_else(|| SolverError::Parse(format!("unbalanced `)` in {text}")))?;
                if let Some(parent) = stack.last_mut() {
                    parent.push(SExpr::List(list));
                }
            }
            _ => {
                if let Some(top) = stack.last_mut() {
                    top.push(SExpr::Atom(token));
                }
            }
        }
    }
    match stack.len() {
        1 => Ok(stack.pop().unwrap_or_default()),
        _ => Err(SolverError::Parse(format!("unbalanced `(` in {text}"))),
    }
}

/// Fails on `(error "...")` responses.
pub fn check_error(response: &str) -> Result<(), SolverError> {
    for expr in parse(response)? {
        if let Some([SExpr::Atom(head), rest @ ..]) = expr.as_list() {
            if head == "error" {
                let message: Vec<String> = rest
                    .iter()
                    .filter_map(|e| e.as_atom())
                    .map(|a| a.trim_matches('"').to_string())
                    .collect();
                return Err(SolverError::Process(message.join(" ")));
            }
        }
    }
    Ok(())
}

pub fn parse_verdict(response: &str) -> Result<Verdict, SolverError> {
    check_error(response)?;
    match response.trim() {
        "sat" => Ok(Verdict::Sat),
        "unsat" => Ok(Verdict::Unsat),
        "unknown" | "timeout" => Ok(Verdict::Unknown),
        other => Err(SolverError::Parse(format!("unexpected verdict `{other}`"))),
    }
}

/// Symbols of a `(get-unsat-core)` response, without `|` quoting.
pub fn parse_core(response: &str) -> Result<Vec<String>, SolverError> {
    check_error(response)?;
    let exprs = parse(response)?;
    let list = exprs
        .first()
        .and_then(SExpr::as_list)
        .ok_or_else(|| SolverError::Parse(format!("expected a core list, got {response}")))?;
    Ok(list
        .iter()
        .filter_map(SExpr::as_atom)
        .map(|a| a.trim_matches('|').to_string())
        .collect())
}

/// Values of a `(get-value (t1 t2 ..))` response in request order.
pub fn parse_values(response: &str, sorts: &[Sort]) -> Result<Vec<Value>, SolverError> {
    check_error(response)?;
    let exprs = parse(response)?;
    let pairs = exprs
        .first()
        .and_then(SExpr::as_list)
        .ok_or_else(|| SolverError::Parse(format!("expected a value list, got {response}")))?;
    if pairs.len() != sorts.len() {
        return Err(SolverError::Parse(format!(
            "expected {} values, got {}",
            sorts.len(),
            pairs.len()
        )));
    }
    pairs
        .iter()
        .zip(sorts)
        .map(|(pair, sort)| match pair.as_list() {
            Some([_, value]) => parse_value(value, sort),
            _ => Err(SolverError::Parse(format!("malformed value pair {:?}", pair))),
        })
        .collect()
}

/// Reads a boolean or bit-vector literal: `true`, `#x0a`, `#b101`, `(_ bv10 32)`.
pub fn parse_value(expr: &SExpr, sort: &Sort) -> Result<Value, SolverError> {
    let bad = || SolverError::Parse(format!("unsupported value {:?} for {:?}", expr, sort));
    match (expr, sort) {
        (SExpr::Atom(a), Sort::Bool) => match a.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(bad()),
        },
        (SExpr::Atom(a), Sort::BitVec(bits)) => {
            let raw = if let Some(hex) = a.strip_prefix("#x") {
                i128::from_str_radix(hex, 16).map_err(|_| bad())?
            } else if let Some(bin) = a.strip_prefix("#b") {
                i128::from_str_radix(bin, 2).map_err(|_| bad())?
            } else {
                return Err(bad());
            };
            Ok(Value::Int {
                value: wrap(raw, *bits),
                bits: *bits,
            })
        }
        (SExpr::List(items), Sort::BitVec(bits)) => match items.as_slice() {
            [SExpr::Atom(underscore), SExpr::Atom(bv), _] if underscore == "_" => {
                let digits = bv.strip_prefix("bv").ok_or_else(bad)?;
                let raw: i128 = digits.parse().map_err(|_| bad())?;
                Ok(Value::Int {
                    value: wrap(raw, *bits),
                    bits: *bits,
                })
            }
            _ => Err(bad()),
        },
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let exprs = parse("((|a b| #x0000000a) (y (_ bv3 8)))").unwrap();
        assert_eq!(exprs.len(), 1);
        let pairs = exprs[0].as_list().unwrap();
        assert_eq!(pairs[0].as_list().unwrap()[0], SExpr::Atom("|a b|".into()));
    }

    #[test]
    fn test_balance_ignores_quoted_parens() {
        assert_eq!(paren_balance("((|x(| 1)"), 1);
        assert_eq!(paren_balance("(error \"bad (\")"), 0);
    }

    #[test]
    fn test_values_are_sign_normalized() {
        let values = parse_values(
            "((|x| #xffffffff) (|b| true) (|c| (_ bv65535 16)))",
            &[Sort::BitVec(32), Sort::Bool, Sort::BitVec(16)],
        )
        .unwrap();
        assert_eq!(values[0].as_int(), Some(-1));
        assert_eq!(values[1].as_bool(), Some(true));
        assert_eq!(values[2].as_int(), Some(-1));
    }

    #[test]
    fn test_error_response() {
        let err = parse_verdict("(error \"line 3: unknown constant x\")").unwrap_err();
        assert_eq!(err, SolverError::Process("line 3: unknown constant x".into()));
        assert_eq!(parse_verdict("unsat").unwrap(), Verdict::Unsat);
    }

    #[test]
    fn test_core() {
        let core = parse_core("(|soft!1| |assume!0|)").unwrap();
        assert_eq!(core, vec!["soft!1", "assume!0"]);
        assert!(parse_core("()").unwrap().is_empty());
    }
}
