//! Sandboxed access to the agent workspace.
//!
//! Every file read, file write and process spawn performed by a tool goes
//! through [`Workspace`]. Paths are confined to the workspace root and then
//! checked against a [`PolicyHandler`].

mod exec;
mod gateway;
mod policy;

pub use exec::{ExecutionFailure, ExecutionResult};
pub use gateway::{INPUTS_DIR, LOGS_DIR, OUTPUTS_DIR, TEMP_DIR, Workspace, WorkspaceError};
pub use policy::{
    Operation, Policy, PolicyBuilder, PolicyDecision, PolicyHandler, workspace_policy,
};
