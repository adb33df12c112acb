// Symex: Symbolic Execution Engine
//
// Explores the paths of JVM-style methods over symbolic inputs and turns
// every terminated path into concrete inputs and an observed outcome.

#![allow(dead_code)]

pub mod cfg;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod memory;
pub mod mock;
pub mod output;
pub mod program;
pub mod resolver;
pub mod solver;
pub mod state;
pub mod traverser;
pub mod types;
pub mod value;
pub mod wrappers;

pub use config::EngineConfig;
pub use engine::{EngineContext, EngineResult, SymbolicEngine};
pub use error::{EngineError, ProgramError};
pub use program::Program;
pub use resolver::ResolvedExecution;
