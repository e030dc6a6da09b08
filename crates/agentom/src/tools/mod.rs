//! Tool registry and the built-in tools.
//!
//! A tool is a [`ToolDescriptor`] (what the model sees and what arguments
//! are accepted) paired with a [`ToolHandler`] (what runs). The
//! [`ToolRegistry`] validates arguments before a handler is called and
//! checks the handler's result against the declared return fields.
//!
//! Built-in handlers reach the filesystem only through the
//! [`Workspace`](crate::workspace::Workspace) held in the [`ToolContext`].

mod builtin;
mod descriptor;
mod error;
mod registry;

use std::fmt;
use std::sync::Arc;

pub use descriptor::{
    ParamSpec, ReturnField, SideEffect, ToolDescriptor, ToolKind, ValueType, generate_index_txt,
};
pub use error::ToolError;
pub use registry::{ToolHandler, ToolRegistry, ToolRequest, ToolResult};

use crate::database::MaterialsDatabase;
use crate::limits::ExecLimits;
use crate::workspace::Workspace;

/// Default interpreter for `run_python_script`.
pub const DEFAULT_PYTHON: &str = "python3";

/// Resources shared by every tool invocation.
pub struct ToolContext {
    /// The sandboxed workspace
    pub workspace: Arc<Workspace>,
    /// Materials database used by the search and download tools
    pub database: Arc<dyn MaterialsDatabase>,
    /// Limits for code execution
    pub limits: ExecLimits,
    /// Python interpreter for `run_python_script`
    pub python: String,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("workspace", &self.workspace.root())
            .field("database", &self.database)
            .field("limits", &self.limits)
            .field("python", &self.python)
            .finish()
    }
}

impl ToolContext {
    /// A context with default limits and interpreter.
    pub fn new(workspace: Arc<Workspace>, database: Arc<dyn MaterialsDatabase>) -> Self {
        Self {
            workspace,
            database,
            limits: ExecLimits::default(),
            python: DEFAULT_PYTHON.to_string(),
        }
    }

    /// Use different execution limits.
    pub fn with_limits(mut self, limits: ExecLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Use a different Python interpreter.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}
