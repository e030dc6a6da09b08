use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use super::{AgentDescriptor, AgentReport, CapabilityAgent, ReportStatus, ToolInvocation};
use crate::backend::{
    BackendError, CompletionRequest, FunctionSpec, InferenceBackend, Message, Reply, ToolCall,
};
use crate::tools::{SideEffect, ToolError, ToolKind, ToolRegistry, generate_index_txt};

/// Tool rounds an agent gets per task unless configured otherwise.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 12;

/// Result fields that name a file a tool wrote.
const ARTIFACT_FIELDS: [&str; 3] = ["path", "output_path", "results_path"];

/// A capability agent driven by a backend over a bound set of tools.
#[derive(Clone)]
pub struct ToolAgent {
    descriptor: AgentDescriptor,
    prompt: String,
    registry: ToolRegistry,
    backend: Arc<dyn InferenceBackend>,
    max_tool_rounds: usize,
}

impl fmt::Debug for ToolAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolAgent")
            .field("descriptor", &self.descriptor)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish_non_exhaustive()
    }
}

impl ToolAgent {
    /// Create an agent bound to `descriptor.tools`.
    ///
    /// The agent sees only the part of `registry` it is bound to.
    pub fn new(
        descriptor: AgentDescriptor,
        prompt: impl Into<String>,
        registry: &ToolRegistry,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        let registry = registry.subset(&descriptor.tools);
        for kind in &descriptor.tools {
            if !registry.contains(*kind) {
                tracing::warn!(agent = %descriptor.name, tool = %kind, "bound tool is not registered");
            }
        }
        Self {
            descriptor,
            prompt: prompt.into(),
            registry,
            backend,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    /// Limit the number of tool rounds per task.
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// The tools this agent can reach.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn system_prompt(&self) -> String {
        let descriptors = self.registry.descriptors();
        let index = generate_index_txt(descriptors.iter().map(|d| d.as_ref()));
        format!("{}\n\nTools:\n{}", self.prompt, index)
    }

    fn functions(&self) -> Vec<FunctionSpec> {
        self.registry
            .descriptors()
            .iter()
            .map(|d| FunctionSpec::from(d.as_ref()))
            .collect()
    }

    async fn call_tool(&self, call: &ToolCall) -> ToolInvocation {
        let started = Instant::now();
        let outcome = match ToolKind::from_name(&call.name).filter(|k| self.descriptor.binds(*k)) {
            Some(_) => self.registry.invoke(&call.name, call.arguments.clone()).await,
            None => {
                tracing::warn!(agent = %self.descriptor.name, tool = %call.name, "refused call to unbound tool");
                Err(ToolError::UnknownTool(call.name.clone()))
            }
        };
        ToolInvocation {
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
            outcome,
            duration: started.elapsed(),
        }
    }

    fn is_write(&self, tool: &str) -> bool {
        self.registry
            .descriptor(tool)
            .is_some_and(|d| d.side_effect == SideEffect::Write)
    }
}

// Read-class tools only contribute their `results_path` dump.
fn artifacts_of(value: &Value, write: bool) -> impl Iterator<Item = &str> {
    ARTIFACT_FIELDS
        .iter()
        .filter(move |field| write || **field == "results_path")
        .filter_map(|field| value.get(*field).and_then(Value::as_str))
}

#[async_trait]
impl CapabilityAgent for ToolAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn run(&self, task: &str) -> Result<AgentReport, BackendError> {
        let name = self.descriptor.name.as_str();
        tracing::info!(agent = name, "agent started");

        let mut messages = vec![Message::system(self.system_prompt()), Message::user(task)];
        let functions = self.functions();
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut artifacts: Vec<String> = Vec::new();

        for round in 0..self.max_tool_rounds {
            let reply = self
                .backend
                .complete(CompletionRequest {
                    model: self.descriptor.model.clone(),
                    messages: messages.clone(),
                    functions: functions.clone(),
                })
                .await?;

            let calls = match reply {
                Reply::Text(text) => {
                    tracing::info!(agent = name, rounds = round, calls = invocations.len(), "agent finished");
                    return Ok(AgentReport {
                        agent: name.to_string(),
                        text,
                        status: ReportStatus::Completed,
                        invocations,
                        artifacts,
                    });
                }
                Reply::ToolCalls(calls) => calls,
            };

            messages.push(Message::assistant_with_calls(calls.clone()));
            for call in &calls {
                let invocation = self.call_tool(call).await;
                if let Ok(value) = &invocation.outcome {
                    for path in artifacts_of(value, self.is_write(&invocation.tool)) {
                        if !artifacts.iter().any(|a| a == path) {
                            artifacts.push(path.to_string());
                        }
                    }
                }
                messages.push(Message::tool_result(
                    call.id.clone(),
                    invocation.output_json().to_string(),
                ));
                invocations.push(invocation);
            }
        }

        tracing::warn!(agent = name, rounds = self.max_tool_rounds, "agent hit the tool-round ceiling");
        Ok(AgentReport {
            agent: name.to_string(),
            text: format!(
                "Stopped after {} tool rounds without a final answer.",
                self.max_tool_rounds
            ),
            status: ReportStatus::StepLimit,
            invocations,
            artifacts,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::backend::{Role, ScriptedBackend};
    use crate::tools::testing::context;
    use crate::tools::{ToolDescriptor, ToolRequest, ValueType};

    fn descriptor(tools: Vec<ToolKind>) -> AgentDescriptor {
        AgentDescriptor {
            name: "tester".into(),
            description: "test agent".into(),
            tools,
            model: "test-model".into(),
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args)
    }

    #[tokio::test]
    async fn test_text_reply_completes_without_tools() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::with_builtins(ctx);
        let backend = Arc::new(ScriptedBackend::new([Reply::Text("nothing to do".into())]));
        let agent = ToolAgent::new(
            descriptor(vec![ToolKind::ListFiles]),
            "You list files.",
            &registry,
            backend.clone(),
        );

        let report = agent.run("say hi").await.unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.text, "nothing to do");
        assert!(report.invocations.is_empty());

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "test-model");
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert!(requests[0].messages[0].content.contains("list_files"));
        assert_eq!(requests[0].last_user_message(), Some("say hi"));
        assert!(requests[0].offers("list_files"));
        assert!(!requests[0].offers("read_file"));
    }

    #[tokio::test]
    async fn test_tool_results_are_fed_back() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::with_builtins(ctx);
        let backend = Arc::new(ScriptedBackend::new([
            Reply::ToolCalls(vec![call(
                "c1",
                "write_file",
                json!({"path": "outputs/note.txt", "content": "hello"}),
            )]),
            Reply::ToolCalls(vec![call("c2", "read_file", json!({"path": "outputs/note.txt"}))]),
            Reply::Text("done".into()),
        ]));
        let agent = ToolAgent::new(
            descriptor(vec![ToolKind::WriteFile, ToolKind::ReadFile]),
            "You write files.",
            &registry,
            backend.clone(),
        );

        let report = agent.run("write a note").await.unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.invocations.len(), 2);
        assert!(report.invocations.iter().all(|i| !i.is_error()));
        assert_eq!(report.artifacts, vec!["outputs/note.txt".to_string()]);

        let last = backend.requests().pop().unwrap();
        let tool_message = last.messages.last().unwrap();
        assert_eq!(tool_message.role, Role::Tool);
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("c2"));
        let result: Value = serde_json::from_str(&tool_message.content).unwrap();
        assert_eq!(result["content"], "hello");
    }

    #[tokio::test]
    async fn test_unbound_tool_never_reaches_registry() {
        let (_dir, ctx) = context();
        let mut registry = ToolRegistry::new(ctx);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register(
            ToolDescriptor::new(ToolKind::WriteFile, SideEffect::Write, "Write")
                .param("path", ValueType::String, "path"),
            move |_req: ToolRequest| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({}))
                }
            },
        );
        let backend = Arc::new(ScriptedBackend::new([
            Reply::ToolCalls(vec![call("c1", "write_file", json!({"path": "x"}))]),
            Reply::Text("gave up".into()),
        ]));
        let agent = ToolAgent::new(
            descriptor(vec![ToolKind::ReadFile]),
            "Read only.",
            &registry,
            backend.clone(),
        );

        let report = agent.run("write x").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            report.invocations[0].outcome,
            Err(ToolError::UnknownTool(_))
        ));
        let requests = backend.requests();
        let folded = &requests[1].messages.last().unwrap().content;
        assert!(folded.contains("unknown_tool"));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::with_builtins(ctx);
        let looping = |_req: CompletionRequest| async move {
            Ok::<_, BackendError>(Reply::ToolCalls(vec![ToolCall::new(
                "again",
                "list_all_files",
                json!({}),
            )]))
        };
        let agent = ToolAgent::new(
            descriptor(vec![ToolKind::ListAllFiles]),
            "Loop.",
            &registry,
            Arc::new(looping),
        )
        .with_max_tool_rounds(3);

        let report = agent.run("forever").await.unwrap();
        assert_eq!(report.status, ReportStatus::StepLimit);
        assert_eq!(report.invocations.len(), 3);
    }

    #[tokio::test]
    async fn test_backend_failure_escapes() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::with_builtins(ctx);
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_error(BackendError::Unavailable("down".into()));
        let agent = ToolAgent::new(
            descriptor(vec![ToolKind::ListFiles]),
            "p",
            &registry,
            backend,
        );
        assert!(matches!(
            agent.run("x").await,
            Err(BackendError::Unavailable(_))
        ));
    }
}
