//! Agentom MCP Server
//!
//! Exposes every tool in an Agentom [`ToolRegistry`] over MCP. Calls go
//! through [`ToolRegistry::invoke`], so arguments are validated and every
//! file access stays inside the workspace.

use std::sync::Arc;

use agentom::config::{Config, ConfigError};
use agentom::tools::{ToolDescriptor, ToolError, ToolRegistry};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
};
use serde_json::{Map, Value};

/// MCP server over the workspace tools.
#[derive(Clone)]
pub struct AgentomServer {
    registry: ToolRegistry,
}

impl std::fmt::Debug for AgentomServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentomServer")
            .field("tools", &self.registry.kinds())
            .finish_non_exhaustive()
    }
}

impl AgentomServer {
    /// Serve the tools in `registry`.
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Serve the built-in tools over the workspace and database in `config`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let context = config.tool_context()?;
        Ok(Self::new(ToolRegistry::with_builtins(Arc::new(context))))
    }

    /// Tool listing for `tools/list`.
    pub fn tools(&self) -> Vec<Tool> {
        self.registry
            .descriptors()
            .iter()
            .map(|d| to_tool(d))
            .collect()
    }

    /// Run one tool.
    ///
    /// Unknown tools and bad arguments are protocol errors; failures inside
    /// a tool are reported as an error result carrying the folded
    /// `{"error": {...}}` object.
    pub async fn call(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let args = Value::Object(arguments.unwrap_or_default());
        match self.registry.invoke(name, args).await {
            Ok(value) => Ok(CallToolResult::success(vec![Content::text(pretty(&value))])),
            Err(e @ (ToolError::UnknownTool(_) | ToolError::SchemaViolation { .. })) => {
                Err(McpError::invalid_params(e.to_string(), Some(e.to_json())))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(pretty(
                &e.to_json(),
            ))])),
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn to_tool(descriptor: &ToolDescriptor) -> Tool {
    let input_schema = match descriptor.json_schema() {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(Map::new()),
    };
    Tool {
        name: descriptor.name().into(),
        title: None,
        description: Some(descriptor.description.clone().into()),
        input_schema,
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

impl ServerHandler for AgentomServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Agentom exposes materials-science tools over a sandboxed workspace: searching \
                and downloading Materials Project structures, reading and analysing structure \
                files, building supercells, surfaces and interfaces, and running Python scripts. \
                All paths are relative to the workspace root."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: self.tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call(request.name.as_ref(), request.arguments).await
    }
}
