//! Tool error taxonomy.

use serde_json::{Value, json};
use thiserror::Error;

use crate::database::DatabaseError;
use crate::structure::StructureError;
use crate::workspace::{ExecutionFailure, WorkspaceError};

/// Errors from invoking a tool through the registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    /// No tool with this name is registered (or bound to the caller).
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Arguments did not match the tool's parameter schema.
    #[error("invalid arguments for {tool}: {message}")]
    SchemaViolation {
        /// Tool name
        tool: String,
        /// What was wrong
        message: String,
    },
    /// The handler failed, or returned a result that breaks its contract.
    #[error("{0}")]
    HandlerFailure(String),
    /// A path resolved outside the workspace.
    #[error("path escapes the workspace: {0}")]
    PathEscape(String),
    /// The workspace policy forbids the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// A file or material does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Running code failed.
    #[error(transparent)]
    ExecutionFailure(ExecutionFailure),
}

impl ToolError {
    /// Stable snake_case identifier for this error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::HandlerFailure(_) => "handler_failure",
            Self::PathEscape(_) => "path_escape",
            Self::AccessDenied(_) => "access_denied",
            Self::NotFound(_) => "not_found",
            Self::ExecutionFailure(ExecutionFailure::Timeout { .. }) => "timeout",
            Self::ExecutionFailure(_) => "execution_failure",
        }
    }

    /// Whether the error means the workspace refused the operation outright.
    pub fn is_disallowed(&self) -> bool {
        matches!(self, Self::PathEscape(_) | Self::AccessDenied(_))
    }

    /// The `{"error": {...}}` object handed back to the model in place of a
    /// result.
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        match self {
            Self::ExecutionFailure(ExecutionFailure::NonZeroExit {
                exit_code,
                stdout,
                stderr,
            }) => {
                error["exit_code"] = json!(exit_code);
                error["stdout"] = json!(stdout);
                error["stderr"] = json!(stderr);
            }
            Self::ExecutionFailure(ExecutionFailure::Timeout { timeout }) => {
                error["timeout_secs"] = json!(timeout.as_secs_f64());
            }
            Self::SchemaViolation { tool, .. } => {
                error["tool"] = json!(tool);
            }
            _ => {}
        }
        json!({ "error": error })
    }
}

impl From<WorkspaceError> for ToolError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::PathEscape(p) => Self::PathEscape(p),
            WorkspaceError::AccessDenied(p) => Self::AccessDenied(p),
            WorkspaceError::NotFound(p) => Self::NotFound(p),
            WorkspaceError::Execution(f) => Self::ExecutionFailure(f),
            other => Self::HandlerFailure(other.to_string()),
        }
    }
}

impl From<StructureError> for ToolError {
    fn from(err: StructureError) -> Self {
        Self::HandlerFailure(err.to_string())
    }
}

impl From<DatabaseError> for ToolError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(id) => Self::NotFound(id),
            other => Self::HandlerFailure(other.to_string()),
        }
    }
}
