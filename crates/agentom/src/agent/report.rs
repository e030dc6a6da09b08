//! What a capability agent hands back.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::tools::ToolError;

/// How an agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// The model produced a final answer.
    Completed,
    /// The tool-round ceiling was reached first.
    StepLimit,
}

/// One tool call made during an agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Tool name as requested by the model
    pub tool: String,
    /// Arguments as sent by the model
    pub arguments: Value,
    /// Result or error
    pub outcome: Result<Value, ToolError>,
    /// Wall time of the call
    pub duration: Duration,
}

impl ToolInvocation {
    /// The JSON the model saw: the result, or `{"error": {...}}`.
    pub fn output_json(&self) -> Value {
        match &self.outcome {
            Ok(value) => value.clone(),
            Err(error) => error.to_json(),
        }
    }

    /// Whether the call failed.
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Outcome of one delegated task.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReport {
    /// Name of the agent that ran
    pub agent: String,
    /// Final text (or a note on why the run stopped)
    pub text: String,
    /// How the run ended
    pub status: ReportStatus,
    /// Tool calls, in order
    pub invocations: Vec<ToolInvocation>,
    /// Workspace paths written by successful tool calls
    pub artifacts: Vec<String>,
}

impl AgentReport {
    /// Errors from failed tool calls, in order.
    pub fn errors(&self) -> impl Iterator<Item = &ToolError> {
        self.invocations.iter().filter_map(|i| i.outcome.as_ref().err())
    }

    /// Whether the last tool call failed and nothing succeeded after it.
    pub fn ended_in_error(&self) -> Option<&ToolError> {
        self.invocations.last().and_then(|i| i.outcome.as_ref().err())
    }

    /// JSON handed back to the coordinator model.
    pub fn to_json(&self) -> Value {
        let errors: Vec<Value> = self.errors().map(|e| e.to_json()["error"].clone()).collect();
        serde_json::json!({
            "agent": self.agent,
            "status": self.status,
            "response": self.text,
            "tool_calls": self.invocations.iter().map(|i| i.tool.as_str()).collect::<Vec<_>>(),
            "artifacts": self.artifacts,
            "errors": errors,
        })
    }
}
