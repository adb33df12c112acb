//! Error types of the engine

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the program representation.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("failed to read program file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed program: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported type `{0}`")]
    UnsupportedType(String),

    #[error("class `{0}` is declared twice")]
    DuplicateClass(String),

    #[error("class `{0}` not found")]
    ClassNotFound(String),

    #[error("superclass `{parent}` of `{class}` not found")]
    MissingSuperclass { class: String, parent: String },

    #[error("method `{0}` not found")]
    MethodNotFound(String),

    #[error("method `{0}` is overloaded, give the parameter types")]
    AmbiguousMethod(String),

    #[error("{method}: statement {index} jumps to {target}, body has {len} statements")]
    BadJump {
        method: String,
        index: usize,
        target: usize,
        len: usize,
    },

    #[error("{method}: trap range {begin}..{end} is invalid")]
    BadTrap {
        method: String,
        begin: usize,
        end: usize,
    },
}

/// Problems with an engine configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures talking to a constraint solver.
#[derive(Debug, Error, PartialEq)]
pub enum SolverError {
    #[error("solver binary not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("solver process error: {0}")]
    Process(String),

    #[error("failed to parse solver output: {0}")]
    Parse(String),
}

/// Infrastructure errors raised while stepping one state.
///
/// These never describe a failure of the analysed program; those are modeled
/// as branch conditions. An `EngineError` discards the state being stepped.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported construct at {location}: {detail}")]
    Unsupported { location: String, detail: String },

    #[error("local `{local}` is not bound at {location}")]
    UnboundLocal { local: String, location: String },

    #[error("invariant violated at {location}: {detail}")]
    Invariant { location: String, detail: String },

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ProgramError::MissingSuperclass {
            class: "demo.B".into(),
            parent: "demo.A".into(),
        };
        assert_eq!(err.to_string(), "superclass `demo.A` of `demo.B` not found");

        let err = SolverError::NotFound(PathBuf::from("/no/z3"));
        assert_eq!(err.to_string(), "solver binary not found at /no/z3");
    }

    #[test]
    fn test_solver_error_converts() {
        let err: EngineError = SolverError::Process("crashed".into()).into();
        assert_eq!(err.to_string(), "solver process error: crashed");
    }
}
