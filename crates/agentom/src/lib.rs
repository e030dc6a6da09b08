//! Agentom: multi-agent orchestration for computational materials science.
//!
//! A [`Coordinator`] routes each user request to one of a small set of
//! [capability agents](agent::CapabilityAgent). Each agent drives an
//! inference backend through a tool-call loop over the tools it is bound to.
//! Every tool reaches the filesystem and spawns processes only through the
//! sandboxed [`Workspace`].

pub mod agent;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod limits;
pub mod retry;
pub mod session;
pub mod structure;
pub mod tools;
pub mod workspace;

pub use agent::{AgentDescriptor, AgentReport, CapabilityAgent, ToolAgent};
pub use backend::{InferenceBackend, OpenAiBackend, Reply, ScriptedBackend};
pub use config::{Config, ConfigError};
pub use coordinator::{Coordinator, CoordinatorState, TurnOutcome, TurnStatus};
pub use database::{MaterialsDatabase, MaterialsProjectClient, StaticDatabase};
pub use limits::ExecLimits;
pub use session::{Session, SessionRuntime};
pub use structure::Structure;
pub use tools::{ToolContext, ToolError, ToolKind, ToolRegistry};
pub use workspace::{Workspace, WorkspaceError};
