//! Capability agents.
//!
//! A capability agent receives a task from the coordinator, works on it with
//! the tools it is bound to, and returns an [`AgentReport`]. Tool failures
//! are folded into the conversation and the report; only a backend failure
//! ends a run early.

mod report;
mod runner;
mod specialists;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

pub use report::{AgentReport, ReportStatus, ToolInvocation};
pub use runner::{DEFAULT_MAX_TOOL_ROUNDS, ToolAgent};
pub use specialists::{DATA_ACCESS_AGENT, STRUCTURE_AGENT, data_access_agent, structure_agent};

use crate::backend::BackendError;
use crate::tools::ToolKind;

/// Static description of an agent, used for routing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentDescriptor {
    /// Unique agent name
    pub name: String,
    /// What the agent can do; shown to the coordinator
    pub description: String,
    /// Tools the agent may call
    pub tools: Vec<ToolKind>,
    /// Model the agent runs on
    pub model: String,
}

impl AgentDescriptor {
    /// Whether `kind` is bound to this agent.
    pub fn binds(&self, kind: ToolKind) -> bool {
        self.tools.contains(&kind)
    }
}

/// An independent reasoning unit the coordinator can delegate to.
#[async_trait]
pub trait CapabilityAgent: Send + Sync + fmt::Debug {
    /// Who this agent is.
    fn descriptor(&self) -> &AgentDescriptor;

    /// Work on `task` until done or out of tool rounds.
    async fn run(&self, task: &str) -> Result<AgentReport, BackendError>;
}
