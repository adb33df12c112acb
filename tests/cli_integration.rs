//! Integration tests for the symex commands
//!
//! Smoke tests over a small program file. They verify:
//! - CLI parsing works correctly
//! - Commands run without panicking
//! - Output format is correct (human/json/pretty)
//! - Missing programs and methods fail with the documented exit codes
//!
//! Engine behaviour is covered in tests/engine_scenarios.rs.

use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use tempfile::TempDir;

const PROGRAM: &str = r#"{"classes":[{"name":"demo.Calc","methods":[
    {"name":"div","params":["int","int"],"ret":"int","static":true,"body":{"stmts":[
        {"op":"identity","local":"a","value":{"kind":"parameter","index":0}},
        {"op":"identity","local":"b","value":{"kind":"parameter","index":1}},
        {"op":"assign","target":{"local":"q"},"value":{"binary":{"op":"div","lhs":{"local":"a"},"rhs":{"local":"b"}}}},
        {"op":"return","value":{"local":"q"}}
    ]}},
    {"name":"native","ret":"int","static":true,"native":true}
]}]}"#;

/// A program file in a temporary directory plus the binary under test.
struct TestContext {
    symex_bin: PathBuf,
    program_path: PathBuf,
    _temp_dir: TempDir,
}

struct TestOutput {
    stdout: String,
    stderr: String,
    status: ExitStatus,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let program_path = temp_dir.path().join("program.json");
        std::fs::write(&program_path, PROGRAM).unwrap();

        Self {
            symex_bin: PathBuf::from(env!("CARGO_BIN_EXE_symex")),
            program_path,
            _temp_dir: temp_dir,
        }
    }

    /// Run symex against the test program
    fn run_command(&self, args: &[&str]) -> TestOutput {
        let output = Command::new(&self.symex_bin)
            .args(args)
            .arg("--program")
            .arg(&self.program_path)
            .env_remove("SYMEX_PROGRAM")
            .env_remove("SYMEX_CONFIG")
            .output()
            .expect("Failed to run symex");

        TestOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.run_command(args);
        assert!(output.status.success(), "stderr: {}", output.stderr);
        serde_json::from_str(&output.stdout).unwrap()
    }
}

#[test]
fn test_run_human_output() {
    let ctx = TestContext::new();
    let output = ctx.run_command(&["run", "--method", "demo.Calc.div"]);
    assert!(output.status.success(), "stderr: {}", output.stderr);
    assert!(output.stdout.contains("Exploring demo.Calc.div(int,int)"));
    assert!(output.stdout.contains("ArithmeticException"));
    assert!(output.stdout.contains("2 results"));
}

#[test]
fn test_run_json_output() {
    let ctx = TestContext::new();
    let json = ctx.json(&["run", "--method", "demo.Calc.div", "--output", "json"]);
    assert_eq!(json["tool"], "symex");
    let results = json["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["type"] == "execution"));
    let outcomes: Vec<&str> = results
        .iter()
        .map(|r| r["result"]["outcome"].as_str().unwrap())
        .collect();
    assert!(outcomes.contains(&"success"));
    assert!(outcomes.contains(&"failure"));
    assert_eq!(json["data"]["stats"]["executions"], 2);
}

#[test]
fn test_run_pretty_output_is_indented() {
    let ctx = TestContext::new();
    let output = ctx.run_command(&["run", "--method", "demo.Calc.div", "--output", "pretty", "--strategy", "dfs"]);
    assert!(output.status.success(), "stderr: {}", output.stderr);
    assert!(output.stdout.contains("\n  \"data\""));
    let json: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
    assert_eq!(json["data"]["results"].as_array().unwrap().len(), 2);
}

#[test]
fn test_run_limit_stops_early() {
    let ctx = TestContext::new();
    let json = ctx.json(&["run", "--method", "demo.Calc.div", "--output", "json", "--limit", "1"]);
    assert_eq!(json["data"]["results"].as_array().unwrap().len(), 1);
}

#[test]
fn test_run_native_method_reports_error() {
    let ctx = TestContext::new();
    let json = ctx.json(&["run", "--method", "demo.Calc.native", "--output", "json"]);
    let results = json["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["type"], "error");
}

#[test]
fn test_methods_lists_signatures() {
    let ctx = TestContext::new();
    let output = ctx.run_command(&["methods"]);
    assert!(output.status.success());
    assert!(output.stdout.contains("static int demo.Calc.div(int,int)"));
    assert!(output.stdout.contains("(no body)"));

    let json = ctx.json(&["methods", "--output", "json", "--class", "demo.Calc"]);
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

#[test]
fn test_cfg_formats() {
    let ctx = TestContext::new();
    let dot = ctx.run_command(&["cfg", "--method", "demo.Calc.div", "--format", "dot"]);
    assert!(dot.status.success());
    assert!(dot.stdout.starts_with("digraph"));

    let json = ctx.json(&["cfg", "--method", "demo.Calc.div", "--output", "json"]);
    assert_eq!(json["data"]["nodes"].as_array().unwrap().len(), 4);

    let human = ctx.run_command(&["cfg", "--method", "demo.Calc.div"]);
    assert!(human.status.success());
    assert!(human.stdout.contains("demo.Calc.div"));
}

#[test]
fn test_unknown_method_exits_not_found() {
    let ctx = TestContext::new();
    let output = ctx.run_command(&["run", "--method", "demo.Calc.missing", "--output", "json"]);
    assert_eq!(output.status.code(), Some(6));
    let json: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
    assert_eq!(json["data"]["error"], "MethodNotFound");
}

#[test]
fn test_missing_program_file() {
    let ctx = TestContext::new();
    let output = Command::new(&ctx.symex_bin)
        .args(["methods", "--program", "/nonexistent/program.json"])
        .env_remove("SYMEX_PROGRAM")
        .output()
        .expect("Failed to run symex");
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn test_config_file_is_applied() {
    let ctx = TestContext::new();
    let config = ctx._temp_dir.path().join("config.json");
    std::fs::write(&config, r#"{"max_steps": 1}"#).unwrap();
    let json = ctx.json(&[
        "run",
        "--method",
        "demo.Calc.div",
        "--output",
        "json",
        "--config",
        config.to_str().unwrap(),
    ]);
    assert_eq!(json["data"]["stats"]["steps"], 1);
    assert_eq!(json["data"]["results"].as_array().unwrap().len(), 0);
}
