//! Error values and error codes for Flow scripts
//!
//! Runtime errors are ordinary values (`Val::Error`) so scripts can catch them
//! with `try/catch`. `ScriptError` is what escapes an evaluation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/* ===================== Error Codes ===================== */

pub const UNDEFINED_VARIABLE: &str = "UndefinedVariable";
pub const PROPERTY_NOT_FOUND: &str = "PropertyNotFound";
pub const TYPE_ERROR: &str = "TypeError";
pub const NOT_A_FUNCTION: &str = "NotAFunction";
pub const WRONG_ARG_COUNT: &str = "WrongArgumentCount";
pub const WRONG_ARG_TYPE: &str = "WrongArgumentType";
pub const INDEX_OUT_OF_BOUNDS: &str = "IndexOutOfBounds";
pub const DIVISION_BY_ZERO: &str = "DivisionByZero";
pub const HOST_ERROR: &str = "HostError";
pub const THROWN: &str = "Thrown";

/* ===================== ErrorInfo ===================== */

/// Error payload carried by `Val::Error` and by thrown values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn wrong_arg_count(func: &str, expected: usize, got: usize) -> Self {
        Self::new(
            WRONG_ARG_COUNT,
            format!("{}() expected {} argument(s), got {}", func, expected, got),
        )
    }

    pub fn wrong_arg_type(func: &str, expected: &str) -> Self {
        Self::new(WRONG_ARG_TYPE, format!("{}() expected {}", func, expected))
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(HOST_ERROR, message)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/* ===================== ScriptError ===================== */

/// Error escaping a call into the engine
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// Source text failed to parse
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Uncaught error raised while the script ran
    #[error("script raised {0}")]
    Raised(ErrorInfo),

    /// Evaluation exceeded the configured operation budget
    #[error("script exceeded the limit of {0} operations")]
    OperationLimit(u64),

    /// A binding name is not a valid identifier
    #[error("cannot bind '{0}': not a valid identifier")]
    InvalidBinding(String),
}

impl ScriptError {
    /// True for faults of the interpreter itself rather than of the
    /// application logic in the script
    pub fn is_interpreter_fault(&self) -> bool {
        matches!(self, ScriptError::Syntax(_) | ScriptError::OperationLimit(_))
    }
}
