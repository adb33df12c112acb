//! Engine configuration
//!
//! Loaded from JSON with every field optional; flags given on the command
//! line override the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::mock::MockStrategy;

/// What to do with a terminal state whose constraints the solver could not
/// decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum UnknownPolicy {
    /// Discard the state
    Drop,
    /// Ask again with a larger budget, then discard
    Retry { attempts: u32, budget_factor: u32 },
    /// Hand the state to the concrete executor
    Concrete,
}

impl Default for UnknownPolicy {
    fn default() -> Self {
        UnknownPolicy::Retry {
            attempts: 1,
            budget_factor: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SolverConfig {
    Bounded { node_budget: u64 },
    Z3 { path: PathBuf, timeout_ms: u64 },
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig::Bounded {
            node_budget: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound asserted for every symbolic array length
    pub soft_max_array_size: i32,
    /// Largest bound `soft_max_array_size` may be raised to
    pub hard_max_array_size: i32,
    pub max_string_length: i32,
    /// Bias witnesses toward small readable values
    pub preferred_cex: bool,
    pub check_overflow: bool,
    pub max_steps: Option<u64>,
    pub timeout_ms: Option<u64>,
    /// Passes through the same loop header allowed per frame
    pub loop_unroll_limit: usize,
    pub max_path_length: usize,
    pub unknown_policy: UnknownPolicy,
    pub mock_strategy: MockStrategy,
    /// Classes whose `new` inside the method under test yields a mock
    pub mock_new_instances: Vec<String>,
    /// Callees (`class.method`) trusted not to raise implicit exceptions
    pub no_throw_methods: Vec<String>,
    pub solver: SolverConfig,
    pub concrete_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            soft_max_array_size: 40,
            hard_max_array_size: 256,
            max_string_length: 40,
            preferred_cex: true,
            check_overflow: false,
            max_steps: None,
            timeout_ms: None,
            loop_unroll_limit: 3,
            max_path_length: 2000,
            unknown_policy: UnknownPolicy::default(),
            mock_strategy: MockStrategy::NoMocks,
            mock_new_instances: Vec::new(),
            no_throw_methods: Vec::new(),
            solver: SolverConfig::default(),
            concrete_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_loop_unroll_limit(mut self, limit: usize) -> Self {
        self.loop_unroll_limit = limit;
        self
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_mock_strategy(mut self, strategy: MockStrategy) -> Self {
        self.mock_strategy = strategy;
        self
    }

    pub fn with_no_throw_method(mut self, method: impl Into<String>) -> Self {
        self.no_throw_methods.push(method.into());
        self
    }

    /// Implicit checks inside `class.name` never fork a failing branch.
    pub fn is_no_throw(&self, class: &str, name: &str) -> bool {
        self.no_throw_methods
            .iter()
            .any(|m| m.strip_prefix(class).and_then(|rest| rest.strip_prefix('.')) == Some(name))
    }

    pub fn with_unknown_policy(mut self, policy: UnknownPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    pub fn with_check_overflow(mut self, check: bool) -> Self {
        self.check_overflow = check;
        self
    }

    pub fn with_preferred_cex(mut self, preferred: bool) -> Self {
        self.preferred_cex = preferred;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_max_array_size < 0 {
            return Err(ConfigError::Invalid(
                "soft_max_array_size must not be negative".to_string(),
            ));
        }
        if self.hard_max_array_size < self.soft_max_array_size {
            return Err(ConfigError::Invalid(format!(
                "hard_max_array_size ({}) is below soft_max_array_size ({})",
                self.hard_max_array_size, self.soft_max_array_size
            )));
        }
        if self.max_string_length < 0 {
            return Err(ConfigError::Invalid(
                "max_string_length must not be negative".to_string(),
            ));
        }
        if self.max_path_length == 0 {
            return Err(ConfigError::Invalid("max_path_length must be positive".to_string()));
        }
        if let UnknownPolicy::Retry { budget_factor: 0, .. } = self.unknown_policy {
            return Err(ConfigError::Invalid("retry budget_factor must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"check_overflow":true,"unknown_policy":{"kind":"drop"}}"#)
                .unwrap();
        assert!(config.check_overflow);
        assert_eq!(config.unknown_policy, UnknownPolicy::Drop);
        assert_eq!(config.soft_max_array_size, 40);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders_override_defaults() {
        let config = EngineConfig::default()
            .with_preferred_cex(false)
            .with_max_steps(10);
        assert!(!config.preferred_cex);
        assert_eq!(config.max_steps, Some(10));
        assert_eq!(config.loop_unroll_limit, EngineConfig::default().loop_unroll_limit);
    }

    #[test]
    fn test_no_throw_matches_qualified_name() {
        let config = EngineConfig::default().with_no_throw_method("demo.S.div");
        assert!(config.is_no_throw("demo.S", "div"));
        assert!(!config.is_no_throw("demo.S", "divide"));
        assert!(!config.is_no_throw("demo.T", "div"));
    }

    #[test]
    fn test_validate_rejects_inverted_array_bounds() {
        let config = EngineConfig {
            soft_max_array_size: 100,
            hard_max_array_size: 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"solver":{{"kind":"z3","path":"/usr/bin/z3","timeout_ms":500}},"mock_strategy":"other_packages"}}"#
        )
        .unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(
            config.solver,
            SolverConfig::Z3 {
                path: PathBuf::from("/usr/bin/z3"),
                timeout_ms: 500
            }
        );
        assert_eq!(config.mock_strategy, MockStrategy::OtherPackages);
    }
}
