// CLI command definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{EngineConfig, SolverConfig, UnknownPolicy};
use crate::engine::Strategy;
use crate::mock::MockStrategy;

/// Symex - symbolic execution of JVM-style methods
///
/// Explores every feasible path through a method and reports concrete
/// inputs and outcomes for each one.
#[derive(Parser, Debug, Clone)]
#[command(name = "symex")]
#[command(author, version, about)]
#[command(long_about = "Symex explores the paths of one method symbolically.

Every path that terminates becomes a concrete execution: the inputs that
drive it, the state after it and how it ended (a return value or an
exception). Paths the solver proves infeasible are dropped.

The program is read from a JSON file describing classes, fields and
method bodies in a three-address form.")]
pub struct Cli {
    /// Path to the program file
    #[arg(global = true, long, env = "SYMEX_PROGRAM")]
    pub program: Option<String>,

    /// Engine configuration file (JSON); flags override it
    #[arg(global = true, long, env = "SYMEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(global = true, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Human,
    /// Compact JSON for programmatic consumption
    Json,
    /// Formatted JSON with indentation
    Pretty,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Explore a method and print one result per terminated path
    Run(RunArgs),

    /// Show the instruction graph of a method
    Cfg(CfgArgs),

    /// List the methods of the program
    Methods(MethodsArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Method as `Class.method` or `Class.method(int,int)`
    #[arg(long)]
    pub method: String,

    /// Maximum number of states to step
    #[arg(long)]
    pub max_steps: Option<u64>,

    /// Wall-clock budget of the search in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Path selection strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Bfs)]
    pub strategy: StrategyArg,

    /// Passes through one loop header allowed per frame
    #[arg(long)]
    pub loop_unroll: Option<usize>,

    /// Constraint solver
    #[arg(long, value_enum)]
    pub solver: Option<SolverArg>,

    /// z3 binary used by `--solver z3`
    #[arg(long, default_value = "z3")]
    pub z3_path: PathBuf,

    /// Search nodes per query of the bounded solver
    #[arg(long)]
    pub node_budget: Option<u64>,

    /// Which created objects become mocks
    #[arg(long, value_enum)]
    pub mock: Option<MockArg>,

    /// Report integer overflow as a failure
    #[arg(long)]
    pub check_overflow: bool,

    /// What to do when the solver cannot decide a finished path
    #[arg(long, value_enum)]
    pub unknown: Option<UnknownArg>,

    /// Stop after this many results
    #[arg(long)]
    pub limit: Option<usize>,

    /// Print the decision path of each execution
    #[arg(long)]
    pub show_path: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Bfs,
    Dfs,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Bfs => Strategy::Bfs,
            StrategyArg::Dfs => Strategy::Dfs,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverArg {
    /// Built-in bounded search
    Bounded,
    /// External z3 process
    Z3,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockArg {
    NoMocks,
    OtherPackages,
    OtherClasses,
}

impl From<MockArg> for MockStrategy {
    fn from(arg: MockArg) -> Self {
        match arg {
            MockArg::NoMocks => MockStrategy::NoMocks,
            MockArg::OtherPackages => MockStrategy::OtherPackages,
            MockArg::OtherClasses => MockStrategy::OtherClasses,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownArg {
    Drop,
    Retry,
    Concrete,
}

impl RunArgs {
    /// Layers the flags given on the command line over `config`.
    pub fn apply(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(steps) = self.max_steps {
            config = config.with_max_steps(steps);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout_ms(ms);
        }
        if let Some(limit) = self.loop_unroll {
            config = config.with_loop_unroll_limit(limit);
        }
        match (self.solver, self.node_budget) {
            (Some(SolverArg::Z3), _) => {
                let timeout_ms = config.timeout_ms.unwrap_or(10_000);
                config = config.with_solver(SolverConfig::Z3 {
                    path: self.z3_path.clone(),
                    timeout_ms,
                });
            }
            (Some(SolverArg::Bounded), budget) => {
                config = config.with_solver(SolverConfig::Bounded {
                    node_budget: budget.unwrap_or(20_000),
                });
            }
            (None, Some(budget)) => {
                if let SolverConfig::Bounded { .. } = config.solver {
                    config = config.with_solver(SolverConfig::Bounded { node_budget: budget });
                }
            }
            (None, None) => {}
        }
        if let Some(mock) = self.mock {
            config = config.with_mock_strategy(mock.into());
        }
        if self.check_overflow {
            config = config.with_check_overflow(true);
        }
        if let Some(unknown) = self.unknown {
            let policy = match unknown {
                UnknownArg::Drop => UnknownPolicy::Drop,
                UnknownArg::Retry => UnknownPolicy::default(),
                UnknownArg::Concrete => UnknownPolicy::Concrete,
            };
            config = config.with_unknown_policy(policy);
        }
        config
    }
}

#[derive(Parser, Debug, Clone)]
pub struct CfgArgs {
    /// Method as `Class.method` or `Class.method(int,int)`
    #[arg(long)]
    pub method: String,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<CfgFormat>,
}

/// CFG output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgFormat {
    /// Human-readable text
    Human,
    /// Graphviz DOT format
    Dot,
    /// JSON export
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct MethodsArgs {
    /// Only methods of this class
    #[arg(long)]
    pub class: Option<String>,
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Resolve the program path from multiple sources
///
/// Priority: CLI arg > SYMEX_PROGRAM env var.
pub fn resolve_program_path(cli_program: Option<String>) -> anyhow::Result<String> {
    match cli_program {
        Some(path) => Ok(path),
        None => std::env::var("SYMEX_PROGRAM")
            .map_err(|_| anyhow::anyhow!("no program given: pass --program or set SYMEX_PROGRAM")),
    }
}

// ============================================================================
// Command Handlers
// ============================================================================

pub mod cmds {
    use super::*;
    use crate::cfg::{export_dot, export_json};
    use crate::engine::{EngineContext, EngineResult, ExplorationStats, SymbolicEngine};
    use crate::output::{self, JsonError, JsonResponse};
    use crate::program::{MethodId, Program};
    use crate::resolver::{ConcreteModel, ExecutionOutcome, Literal, ResolvedExecution};
    use anyhow::{Context, Result};
    use serde::Serialize;
    use std::path::Path;
    use std::sync::Arc;

    fn emit<T: Serialize>(format: OutputFormat, data: T) {
        let response = JsonResponse::new(data);
        match format {
            OutputFormat::Pretty => println!("{}", response.to_pretty_json()),
            _ => println!("{}", response.to_json()),
        }
    }

    /// Reports `err` in the requested format and exits with `code`.
    fn fail(format: OutputFormat, err: JsonError, code: i32) -> ! {
        match format {
            OutputFormat::Human => {
                output::error(&err.message);
                if let Some(hint) = &err.remediation {
                    output::info(&format!("Hint: {}", hint));
                }
            }
            _ => emit(format, &err),
        }
        std::process::exit(code);
    }

    fn open_program(cli: &Cli) -> Result<Arc<Program>> {
        let path = match super::resolve_program_path(cli.program.clone()) {
            Ok(path) => path,
            Err(e) => output::exit_usage(&e.to_string()),
        };
        if !Path::new(&path).exists() {
            if cli.output == OutputFormat::Human {
                output::exit_file_not_found(&path);
            }
            fail(cli.output, JsonError::program_not_found(&path), output::EXIT_FILE_NOT_FOUND);
        }
        match Program::load(Path::new(&path)) {
            Ok(program) => Ok(Arc::new(program)),
            Err(e) => fail(
                cli.output,
                JsonError::invalid_program(&e.to_string()),
                output::EXIT_PROGRAM,
            ),
        }
    }

    fn load_config(cli: &Cli) -> Result<EngineConfig> {
        let config = match &cli.config {
            Some(path) => match EngineConfig::load(path) {
                Ok(config) => config,
                Err(e) => fail(cli.output, JsonError::invalid_config(&e.to_string()), output::EXIT_CONFIG),
            },
            None => EngineConfig::default(),
        };
        Ok(config)
    }

    fn find_method(cli: &Cli, program: &Program, target: &str) -> MethodId {
        match program.find_method(target) {
            Ok(id) => id,
            Err(e) => fail(
                cli.output,
                JsonError::method_not_found(target, &e.to_string()),
                output::EXIT_NOT_FOUND,
            ),
        }
    }

    #[derive(Serialize)]
    struct RunReport<'a> {
        method: String,
        results: &'a [EngineResult],
        stats: ExplorationStats,
    }

    pub fn run(args: RunArgs, cli: &Cli) -> Result<()> {
        let program = open_program(cli)?;
        let config = args.apply(load_config(cli)?);
        if let Err(e) = config.validate() {
            fail(cli.output, JsonError::invalid_config(&e.to_string()), output::EXIT_CONFIG);
        }
        let method = find_method(cli, &program, &args.method);
        let signature = program.method(method).to_string();

        let ctx = EngineContext::new(Arc::clone(&program), config);
        let mut engine = SymbolicEngine::new(ctx).with_selector(Strategy::from(args.strategy).selector());
        let mut exploration = engine.explore(method);
        let mut results = Vec::new();
        for result in exploration.by_ref() {
            results.push(result);
            if args.limit.is_some_and(|limit| results.len() >= limit) {
                break;
            }
        }
        let stats = exploration.stats();

        match cli.output {
            OutputFormat::Human => {
                output::header(&format!("Exploring {}", signature));
                for result in &results {
                    print_result(result, args.show_path);
                }
                println!();
                println!(
                    "{} results, {} steps, {} infeasible, {} undecided, {} cut by bounds, {} errors",
                    results.len(),
                    stats.steps,
                    stats.unsat,
                    stats.unknown,
                    stats.bounded,
                    stats.errors
                );
            }
            format => emit(
                format,
                RunReport {
                    method: signature,
                    results: &results,
                    stats,
                },
            ),
        }
        Ok(())
    }

    fn print_result(result: &EngineResult, show_path: bool) {
        match result {
            EngineResult::Execution(execution) => print_execution(execution, show_path),
            EngineResult::Error {
                location,
                stack,
                error,
                ..
            } => {
                output::outcome("ERROR", false, &format!("{} at {}", error, location));
                for line in stack.lines() {
                    output::detail(line.trim());
                }
            }
            EngineResult::ConcreteFailure { path_id, reason } => {
                output::outcome("CRASH", false, &format!("path {}: {}", short(path_id), reason));
            }
        }
    }

    fn print_execution(execution: &ResolvedExecution, show_path: bool) {
        let params: Vec<String> = execution.before.params.iter().map(render).collect();
        let call = format!("({})", params.join(", "));
        match &execution.result {
            ExecutionOutcome::Success { value } => {
                output::outcome("RETURN", true, &format!("{} -> {}", call, render(value)));
            }
            ExecutionOutcome::Failure {
                exception,
                kind,
                in_nested_method,
                ..
            } => {
                let nested = if *in_nested_method { ", nested" } else { "" };
                output::outcome("THROW", false, &format!("{} -> {} ({:?}{})", call, exception, kind, nested));
            }
        }
        if let Some(this) = &execution.before.this {
            output::detail(&format!("this = {}", render(this)));
        }
        for (name, value) in &execution.before.statics {
            output::detail(&format!("{} = {}", name, render(value)));
        }
        for hint in &execution.instrumentation {
            output::detail(&format!("mock new {} at {}", hint.class, hint.caller));
        }
        if show_path {
            output::detail(&format!("path {}", execution.path_id));
        }
    }

    fn short(path_id: &str) -> &str {
        &path_id[..path_id.len().min(12)]
    }

    /// Compact one-line rendering of a model.
    pub(crate) fn render(model: &ConcreteModel) -> String {
        match model {
            ConcreteModel::Null { .. } => "null".to_string(),
            ConcreteModel::Void => "void".to_string(),
            ConcreteModel::Primitive { value, .. } => match value {
                Literal::Bool(b) => b.to_string(),
                Literal::Int(i) => i.to_string(),
                Literal::Char(c) => format!("{:?}", c),
                Literal::Str(s) => format!("{:?}", s),
            },
            ConcreteModel::Array { id, elements, .. } => {
                let items: Vec<String> = elements.iter().map(render).collect();
                format!("#{}[{}]", id, items.join(", "))
            }
            ConcreteModel::Composite {
                id, ty, fields, is_mock, ..
            } => {
                let items: Vec<String> = fields
                    .iter()
                    .map(|(name, value)| format!("{}: {}", name, render(value)))
                    .collect();
                let mock = if *is_mock { "mock " } else { "" };
                format!("#{} {}{} {{{}}}", id, mock, ty, items.join(", "))
            }
            ConcreteModel::Enum { ty, name, .. } => format!("{}.{}", ty, name),
            ConcreteModel::ClassRef { ty } => format!("{}.class", ty),
            ConcreteModel::Assemble {
                id,
                instantiation,
                modifications,
                ..
            } => {
                let args: Vec<String> = instantiation.args.iter().map(render).collect();
                format!(
                    "#{} new {}({}) +{} calls",
                    id,
                    instantiation.method,
                    args.join(", "),
                    modifications.len()
                )
            }
            ConcreteModel::Ref { id } => format!("#{}", id),
        }
    }

    pub fn cfg(args: CfgArgs, cli: &Cli) -> Result<()> {
        let program = open_program(cli)?;
        let method = find_method(cli, &program, &args.method);
        let graphs = crate::cfg::ProgramGraphs::build(&program);
        let graph = graphs
            .get(method)
            .with_context(|| format!("method {} has no body", program.method(method)))?;
        let name = program.method(method).to_string();

        let format = args.format.unwrap_or(match cli.output {
            OutputFormat::Human => CfgFormat::Human,
            _ => CfgFormat::Json,
        });
        match format {
            CfgFormat::Dot => print!("{}", export_dot(graph, &name)),
            CfgFormat::Json => {
                let export = export_json(graph, &name);
                let output = if cli.output == OutputFormat::Human {
                    OutputFormat::Pretty
                } else {
                    cli.output
                };
                emit(output, export);
            }
            CfgFormat::Human => {
                output::header(&name);
                for index in 0..graph.len() {
                    let Some(stmt) = graph.stmt(index) else {
                        continue;
                    };
                    let marker = if graph.is_loop_header(index) { "*" } else { " " };
                    let targets: Vec<String> = graph
                        .branch_targets(index)
                        .iter()
                        .map(|(t, kind)| format!("{}:{:?}", t, kind))
                        .collect();
                    println!("{}{:>4}  {}", marker, index, stmt);
                    if !targets.is_empty() {
                        output::detail(&format!("-> {}", targets.join(" ")));
                    }
                }
            }
        }
        Ok(())
    }

    #[derive(Serialize)]
    struct MethodEntry {
        signature: String,
        ret: String,
        is_static: bool,
        has_body: bool,
    }

    pub fn methods(args: MethodsArgs, cli: &Cli) -> Result<()> {
        let program = open_program(cli)?;
        let entries: Vec<MethodEntry> = program
            .methods()
            .filter(|m| args.class.as_deref().map_or(true, |c| m.class == c))
            .map(|m| MethodEntry {
                signature: m.to_string(),
                ret: m.def.ret.to_string(),
                is_static: m.is_static(),
                has_body: m.body().is_some(),
            })
            .collect();

        match cli.output {
            OutputFormat::Human => {
                for entry in &entries {
                    let kind = if entry.is_static { "static " } else { "" };
                    let body = if entry.has_body { "" } else { " (no body)" };
                    println!("{}{} {}{}", kind, entry.ret, entry.signature, body);
                }
                if entries.is_empty() {
                    output::warn("no methods found");
                }
            }
            format => emit(format, entries),
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ConcreteModel, Literal};
    use crate::program::Type;

    #[test]
    fn test_resolve_program_path_prefers_cli_arg() {
        let result = resolve_program_path(Some("/cli/program.json".to_string())).unwrap();
        assert_eq!(result, "/cli/program.json");
    }

    #[test]
    fn test_run_flags_override_config() {
        let cli = Cli::parse_from([
            "symex",
            "run",
            "--method",
            "demo.A.f",
            "--max-steps",
            "10",
            "--loop-unroll",
            "1",
            "--unknown",
            "drop",
            "--mock",
            "other-classes",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.apply(EngineConfig::default());
        assert_eq!(config.max_steps, Some(10));
        assert_eq!(config.loop_unroll_limit, 1);
        assert_eq!(config.unknown_policy, UnknownPolicy::Drop);
        assert_eq!(config.mock_strategy, MockStrategy::OtherClasses);
        assert_eq!(config.solver, SolverConfig::default());
    }

    #[test]
    fn test_z3_flag_selects_process_solver() {
        let cli = Cli::parse_from(["symex", "run", "--method", "demo.A.f", "--solver", "z3", "--z3-path", "/opt/z3"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        match args.apply(EngineConfig::default()).solver {
            SolverConfig::Z3 { path, .. } => assert_eq!(path, PathBuf::from("/opt/z3")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_global_output_flag_after_subcommand() {
        let cli = Cli::parse_from(["symex", "methods", "--output", "json", "--program", "p.json"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.program.as_deref(), Some("p.json"));
    }

    #[test]
    fn test_render_models() {
        let array = ConcreteModel::Array {
            id: 1,
            ty: Type::array_of(Type::Int),
            length: 2,
            elements: vec![
                ConcreteModel::Primitive {
                    ty: Type::Int,
                    value: Literal::Int(7),
                },
                ConcreteModel::Ref { id: 1 },
            ],
        };
        assert_eq!(cmds::render(&array), "#1[7, #1]");
        assert_eq!(cmds::render(&ConcreteModel::Null { ty: Type::object() }), "null");
    }
}
