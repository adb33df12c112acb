// Output formatting for the symex CLI

use is_terminal::IsTerminal;
use serde::Serialize;

// Colors for terminal output (when supported)
pub const RED: &str = "\x1b[0;31m";
pub const GREEN: &str = "\x1b[0;32m";
pub const YELLOW: &str = "\x1b[1;33m";
pub const CYAN: &str = "\x1b[0;36m";
pub const BOLD: &str = "\x1b[1m";
pub const NC: &str = "\x1b[0m"; // No Color

/// Check if stdout is a terminal (for color output)
#[inline]
pub fn is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

fn paint(color: &'static str) -> (&'static str, &'static str) {
    if is_terminal() {
        (color, NC)
    } else {
        ("", "")
    }
}

pub fn info(msg: &str) {
    let (color, reset) = paint(GREEN);
    println!("{}[INFO]{} {}", color, reset, msg);
}

pub fn warn(msg: &str) {
    let (color, reset) = paint(YELLOW);
    eprintln!("{}[WARN]{} {}", color, reset, msg);
}

pub fn error(msg: &str) {
    let (color, reset) = paint(RED);
    eprintln!("{}[ERROR]{} {}", color, reset, msg);
}

/// Print section header
pub fn header(msg: &str) {
    let (bold, reset) = paint(BOLD);
    println!("{}===>{} {}", bold, reset, msg);
    println!();
}

/// One labelled line of a result, colored by outcome
pub fn outcome(label: &str, good: bool, msg: &str) {
    let (color, reset) = paint(if good { GREEN } else { RED });
    println!("{}[{}]{} {}", color, label, reset, msg);
}

pub fn detail(msg: &str) {
    let (color, reset) = paint(CYAN);
    println!("    {}{}{}", color, msg, reset);
}

/// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_PROGRAM: i32 = 3;
pub const EXIT_FILE_NOT_FOUND: i32 = 4;
pub const EXIT_CONFIG: i32 = 5;
pub const EXIT_NOT_FOUND: i32 = 6;

/// Exit with usage error
pub fn exit_usage(msg: &str) -> ! {
    error(msg);
    std::process::exit(EXIT_USAGE);
}

pub fn exit_file_not_found(path: &str) -> ! {
    error(&format!("File not found: {}", path));
    std::process::exit(EXIT_FILE_NOT_FOUND);
}

// ============================================================================
// Error Codes and Remediation
// ============================================================================

/// Error codes for JSON error responses
pub const E_PROGRAM_NOT_FOUND: &str = "E001";
pub const E_METHOD_NOT_FOUND: &str = "E002";
pub const E_INVALID_PROGRAM: &str = "E003";
pub const E_INVALID_CONFIG: &str = "E004";

pub const R_HINT_PROGRAM: &str = "Pass --program FILE or set SYMEX_PROGRAM";
pub const R_HINT_LIST_METHODS: &str = "Run 'symex methods' to see available methods";

/// JSON output wrapper
#[derive(Debug, Clone, Serialize)]
pub struct JsonResponse<T> {
    pub schema_version: String,
    pub execution_id: String,
    pub tool: String,
    pub timestamp: String,
    pub data: T,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn new(data: T) -> Self {
        let now = chrono::Utc::now();
        let exec_id = format!("{:x}-{}", now.timestamp(), std::process::id());

        JsonResponse {
            schema_version: "1.0.0".to_string(),
            execution_id: exec_id,
            tool: "symex".to_string(),
            timestamp: now.to_rfc3339(),
            data,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Error response format for JSON mode
#[derive(Debug, Clone, Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl JsonError {
    pub fn new(category: &str, message: &str, code: &str) -> Self {
        JsonError {
            error: category.to_string(),
            message: message.to_string(),
            code: code.to_string(),
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, remediation: &str) -> Self {
        self.remediation = Some(remediation.to_string());
        self
    }

    pub fn program_not_found(path: &str) -> Self {
        Self::new(
            "ProgramNotFound",
            &format!("Program file not found: {}", path),
            E_PROGRAM_NOT_FOUND,
        )
        .with_remediation(R_HINT_PROGRAM)
    }

    pub fn method_not_found(target: &str, reason: &str) -> Self {
        Self::new(
            "MethodNotFound",
            &format!("Method '{}' not found: {}", target, reason),
            E_METHOD_NOT_FOUND,
        )
        .with_remediation(R_HINT_LIST_METHODS)
    }

    pub fn invalid_program(reason: &str) -> Self {
        Self::new("InvalidProgram", reason, E_INVALID_PROGRAM)
    }

    pub fn invalid_config(reason: &str) -> Self {
        Self::new("InvalidConfig", reason, E_INVALID_CONFIG)
    }
}
