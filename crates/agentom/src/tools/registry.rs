//! Name → (descriptor, handler) dispatch with validation on both sides.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::builtin;
use super::{ToolContext, ToolDescriptor, ToolError, ToolKind};

/// What a handler returns.
pub type ToolResult = Result<Value, ToolError>;

/// A validated invocation handed to a [`ToolHandler`].
#[derive(Debug, Clone)]
pub struct ToolRequest {
    /// Which tool is being called
    pub tool: ToolKind,
    /// Arguments, already checked against the parameter schema
    pub args: Map<String, Value>,
    /// Shared resources: workspace, database, limits
    pub context: Arc<ToolContext>,
}

/// Implementation of one tool.
///
/// Handlers only ever see arguments that passed validation.
///
/// # Example
///
/// ```rust,ignore
/// registry.register(descriptor, |req: ToolRequest| async move {
///     Ok(serde_json::json!({ "echo": req.args }))
/// });
/// ```
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool.
    async fn invoke(&self, request: ToolRequest) -> ToolResult;
}

/// Blanket implementation for async closures.
#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(ToolRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ToolResult> + Send,
{
    async fn invoke(&self, request: ToolRequest) -> ToolResult {
        self(request).await
    }
}

#[derive(Clone)]
struct Entry {
    descriptor: Arc<ToolDescriptor>,
    handler: Arc<dyn ToolHandler>,
}

/// The callable tools, keyed by kind.
///
/// Cloning is cheap; descriptors and handlers are shared.
#[derive(Clone)]
pub struct ToolRegistry {
    entries: BTreeMap<ToolKind, Entry>,
    context: Arc<ToolContext>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.entries.keys().collect::<Vec<_>>())
            .field("context", &self.context)
            .finish()
    }
}

impl ToolRegistry {
    /// An empty registry over `context`.
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self {
            entries: BTreeMap::new(),
            context,
        }
    }

    /// A registry holding every built-in tool.
    pub fn with_builtins(context: Arc<ToolContext>) -> Self {
        let mut registry = Self::new(context);
        builtin::register_all(&mut registry);
        registry
    }

    /// Register a tool, replacing any earlier entry of the same kind.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: impl ToolHandler + 'static) {
        self.register_arc(Arc::new(descriptor), Arc::new(handler));
    }

    fn register_arc(&mut self, descriptor: Arc<ToolDescriptor>, handler: Arc<dyn ToolHandler>) {
        let kind = descriptor.kind;
        if self
            .entries
            .insert(kind, Entry { descriptor, handler })
            .is_some()
        {
            tracing::warn!(tool = %kind, "tool registered twice; replacing earlier handler");
        }
    }

    /// A view restricted to `kinds`. Kinds not registered here are skipped.
    pub fn subset(&self, kinds: &[ToolKind]) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(kind, _)| kinds.contains(kind))
                .map(|(kind, entry)| (*kind, entry.clone()))
                .collect(),
            context: Arc::clone(&self.context),
        }
    }

    /// Whether `kind` is registered.
    pub fn contains(&self, kind: ToolKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Registered kinds, in enum order.
    pub fn kinds(&self) -> Vec<ToolKind> {
        self.entries.keys().copied().collect()
    }

    /// Descriptors of the registered tools, in enum order.
    pub fn descriptors(&self) -> Vec<Arc<ToolDescriptor>> {
        self.entries
            .values()
            .map(|e| Arc::clone(&e.descriptor))
            .collect()
    }

    /// Descriptor of one tool.
    pub fn descriptor(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        let kind = ToolKind::from_name(name)?;
        self.entries.get(&kind).map(|e| Arc::clone(&e.descriptor))
    }

    /// The shared tool context.
    pub fn context(&self) -> &Arc<ToolContext> {
        &self.context
    }

    /// Validate `args`, run the handler, validate its result.
    ///
    /// The handler is never called when validation fails.
    pub async fn invoke(&self, name: &str, args: Value) -> ToolResult {
        let entry = ToolKind::from_name(name)
            .and_then(|kind| self.entries.get(&kind))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let descriptor = &entry.descriptor;

        let args = descriptor.validate_args(&args).inspect_err(|e| {
            tracing::warn!(tool = name, error = %e, "rejected tool arguments");
        })?;

        let started = Instant::now();
        let result = entry
            .handler
            .invoke(ToolRequest {
                tool: descriptor.kind,
                args,
                context: Arc::clone(&self.context),
            })
            .await
            .and_then(|value| descriptor.validate_result(&value).map(|()| value));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => tracing::info!(tool = name, elapsed_ms, "tool succeeded"),
            Err(e) => tracing::warn!(tool = name, elapsed_ms, kind = e.kind(), error = %e, "tool failed"),
        }
        result
    }
}
