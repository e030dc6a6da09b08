//! Session state and the interactive loop.

mod runtime;
mod transcript;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use runtime::{HELP_TEXT, LineAction, SessionRuntime};
pub use transcript::{
    TranscriptStats, format_assistant_message, format_delegation, format_tool_call,
    format_tool_result, format_user_message, parse_transcript_stats,
};

use crate::agent::ToolInvocation;
use crate::coordinator::{Delegation, TurnOutcome, TurnStatus};

/// One user message and everything done to answer it.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// When the user message arrived
    pub started_at: DateTime<Utc>,
    /// The user message
    pub input: String,
    /// The reply shown to the user
    pub reply: String,
    /// How the turn ended
    pub status: TurnStatus,
    /// Delegations, in order
    pub delegations: Vec<Delegation>,
}

impl Turn {
    /// Tool invocations across all delegations, in order.
    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.delegations
            .iter()
            .flat_map(|d| d.report.invocations.iter())
    }
}

/// Summary of a session, suitable for logging as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    /// Session id
    pub id: Uuid,
    /// When the session started (RFC3339)
    pub started_at: String,
    /// When the last turn started (RFC3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Number of turns
    pub turn_count: usize,
    /// Number of delegations
    pub delegation_count: usize,
    /// Number of tool calls
    pub tool_call_count: usize,
    /// Number of failed tool calls
    pub tool_error_count: usize,
}

/// In-memory record of one conversation.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    turns: Vec<Turn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Start a new session.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Turns so far.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Record a finished turn.
    pub fn record(&mut self, started_at: DateTime<Utc>, input: &str, outcome: TurnOutcome) {
        self.turns.push(Turn {
            started_at,
            input: input.to_string(),
            reply: outcome.reply,
            status: outcome.status,
            delegations: outcome.delegations,
        });
    }

    /// Workspace paths written during the session, in first-written order.
    pub fn artifacts(&self) -> Vec<String> {
        let mut artifacts: Vec<String> = Vec::new();
        for delegation in self.turns.iter().flat_map(|t| t.delegations.iter()) {
            for path in &delegation.report.artifacts {
                if !artifacts.contains(path) {
                    artifacts.push(path.clone());
                }
            }
        }
        artifacts
    }

    /// Render the transcript.
    pub fn transcript(&self) -> String {
        let mut output = String::new();
        for turn in &self.turns {
            output.push_str(&format_user_message(&turn.input));
            for delegation in &turn.delegations {
                output.push_str(&format_delegation(&delegation.agent, &delegation.task));
                for invocation in &delegation.report.invocations {
                    output.push_str(&format_tool_call(&invocation.tool, &invocation.arguments));
                    output.push_str(&format_tool_result(&invocation.output_json()));
                }
            }
            output.push_str(&format_assistant_message(&turn.reply));
        }
        output
    }

    /// Counts and timestamps.
    pub fn metadata(&self) -> SessionMetadata {
        let invocations: Vec<&ToolInvocation> =
            self.turns.iter().flat_map(Turn::invocations).collect();
        SessionMetadata {
            id: self.id,
            started_at: self.started_at.to_rfc3339(),
            updated_at: self.turns.last().map(|t| t.started_at.to_rfc3339()),
            turn_count: self.turns.len(),
            delegation_count: self.turns.iter().map(|t| t.delegations.len()).sum(),
            tool_call_count: invocations.len(),
            tool_error_count: invocations.iter().filter(|i| i.is_error()).count(),
        }
    }
}
