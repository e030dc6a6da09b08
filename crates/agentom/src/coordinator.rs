//! The coordinator: routes each user turn to at most one capability agent at
//! a time and composes the reply.
//!
//! A turn moves through [`CoordinatorState`]:
//!
//! ```text
//! AwaitingInput -> Routing -> (Delegating -> ComposingReply)* -> AwaitingInput
//! ```
//!
//! Routing offers the model one `transfer_to_<agent>` function per agent.
//! A text reply ends the turn. A single transfer runs that agent and feeds
//! its report back; the model may then answer or transfer again, up to
//! `max_delegations_per_turn`. Several transfers in one reply, or a transfer
//! to an agent that does not exist, end the turn with a clarifying question.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;

use crate::agent::{AgentDescriptor, AgentReport, CapabilityAgent, ReportStatus};
use crate::backend::{
    BackendError, CompletionRequest, FunctionSpec, InferenceBackend, Message, Reply, ToolCall,
};
use crate::tools::ToolError;
use crate::workspace::ExecutionFailure;

/// Default bound on sequential delegations within one turn.
pub const DEFAULT_MAX_DELEGATIONS_PER_TURN: usize = 4;

const TRANSFER_PREFIX: &str = "transfer_to_";

const COORDINATOR_PROMPT: &str = "\
You coordinate a team of specialist agents working on computational materials science tasks.

For every request decide which specialist is best suited and transfer the task to it with a \
clear, self-contained task description (include file paths, material ids and indices the \
specialist will need). Transfer to one specialist at a time; when a task needs several \
specialists, transfer to them one after another and pass along what the previous one produced.

Answer directly, without transferring, when the request needs no tools.
When the specialists are done, reply to the user with a concise summary of the results, \
including numbers with their units and the paths of files that were created.";

/// Where the coordinator is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the next user message.
    AwaitingInput,
    /// Asking the model which agent should handle the request.
    Routing,
    /// A capability agent is working.
    Delegating,
    /// Turning results into the reply.
    ComposingReply,
}

/// The model's routing decision could not be acted on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ambiguous routing between: {}", .candidates.join(", "))]
pub struct RoutingAmbiguous {
    /// Agents that could handle the request
    pub candidates: Vec<String>,
}

/// One task handed to a capability agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Delegation {
    /// Agent name
    pub agent: String,
    /// Task text sent to the agent
    pub task: String,
    /// What the agent returned
    pub report: AgentReport,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStatus {
    /// The reply answers the request.
    Answered,
    /// The reply is a clarifying question.
    Clarification(RoutingAmbiguous),
    /// The backend failed; the reply is an apology.
    BackendFailure(BackendError),
}

/// Result of one user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Text shown to the user
    pub reply: String,
    /// How the turn ended
    pub status: TurnStatus,
    /// Delegations made during the turn, in order
    pub delegations: Vec<Delegation>,
}

/// Routes user turns to capability agents.
pub struct Coordinator {
    model: String,
    backend: Arc<dyn InferenceBackend>,
    agents: Vec<Arc<dyn CapabilityAgent>>,
    history: Vec<Message>,
    state: CoordinatorState,
    max_delegations_per_turn: usize,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("model", &self.model)
            .field("agents", &self.agents)
            .field("history", &self.history.len())
            .field("state", &self.state)
            .field("max_delegations_per_turn", &self.max_delegations_per_turn)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// A coordinator over `agents`. Agent names must be unique; later
    /// duplicates are dropped.
    pub fn new(
        model: impl Into<String>,
        backend: Arc<dyn InferenceBackend>,
        agents: Vec<Arc<dyn CapabilityAgent>>,
    ) -> Self {
        let mut unique: Vec<Arc<dyn CapabilityAgent>> = Vec::with_capacity(agents.len());
        for agent in agents {
            let name = &agent.descriptor().name;
            if unique.iter().any(|a| &a.descriptor().name == name) {
                tracing::warn!(agent = %name, "duplicate agent name; ignoring");
                continue;
            }
            unique.push(agent);
        }
        Self {
            model: model.into(),
            backend,
            agents: unique,
            history: Vec::new(),
            state: CoordinatorState::AwaitingInput,
            max_delegations_per_turn: DEFAULT_MAX_DELEGATIONS_PER_TURN,
        }
    }

    /// Bound sequential delegations within one turn.
    pub fn with_max_delegations_per_turn(mut self, max: usize) -> Self {
        self.max_delegations_per_turn = max;
        self
    }

    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Descriptors of the agents, in routing order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.iter().map(|a| a.descriptor())
    }

    /// The conversation so far, without the system prompt.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    fn transition(&mut self, to: CoordinatorState) {
        tracing::debug!(from = ?self.state, to = ?to, "coordinator transition");
        self.state = to;
    }

    fn system_prompt(&self) -> String {
        let mut prompt = COORDINATOR_PROMPT.to_string();
        prompt.push_str("\n\nSpecialists:\n");
        for agent in self.agents() {
            prompt.push_str(&format!("- {}: {}\n", agent.name, agent.description));
        }
        prompt
    }

    fn functions(&self) -> Vec<FunctionSpec> {
        self.agents()
            .map(|agent| FunctionSpec {
                name: format!("{TRANSFER_PREFIX}{}", agent.name),
                description: format!("Transfer a task to {}. {}", agent.name, agent.description),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "task": {
                            "type": "string",
                            "description": "Self-contained description of what the agent should do",
                        }
                    },
                    "required": ["task"],
                    "additionalProperties": false,
                }),
            })
            .collect()
    }

    fn request(&self) -> CompletionRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(Message::system(self.system_prompt()));
        messages.extend(self.history.iter().cloned());
        CompletionRequest {
            model: self.model.clone(),
            messages,
            functions: self.functions(),
        }
    }

    fn find_agent(&self, function: &str) -> Option<&Arc<dyn CapabilityAgent>> {
        let name = function.strip_prefix(TRANSFER_PREFIX).unwrap_or(function);
        self.agents.iter().find(|a| a.descriptor().name == name)
    }

    /// Pick the agent for a reply's function calls.
    ///
    /// Exactly one call naming a known agent is accepted.
    fn route(
        &self,
        calls: &[ToolCall],
        fallback_task: &str,
    ) -> Result<(Arc<dyn CapabilityAgent>, String), RoutingAmbiguous> {
        let all_candidates = || RoutingAmbiguous {
            candidates: self.agents().map(|a| a.name.clone()).collect(),
        };
        match calls {
            [call] => {
                let agent = self.find_agent(&call.name).ok_or_else(all_candidates)?;
                let task = call
                    .arguments
                    .get("task")
                    .and_then(Value::as_str)
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or(fallback_task)
                    .to_string();
                Ok((Arc::clone(agent), task))
            }
            _ => {
                let mut candidates: Vec<String> = Vec::new();
                for call in calls {
                    if let Some(agent) = self.find_agent(&call.name) {
                        let name = &agent.descriptor().name;
                        if !candidates.contains(name) {
                            candidates.push(name.clone());
                        }
                    }
                }
                if candidates.is_empty() {
                    Err(all_candidates())
                } else {
                    Err(RoutingAmbiguous { candidates })
                }
            }
        }
    }

    /// Handle one user message.
    ///
    /// Never fails: backend failures become an apology and the conversation
    /// before the turn is kept.
    pub async fn handle_turn(&mut self, input: &str) -> TurnOutcome {
        let checkpoint = self.history.len();
        self.history.push(Message::user(input));
        self.transition(CoordinatorState::Routing);

        let mut delegations = Vec::new();
        let (reply, status) = match self.drive(input, &mut delegations).await {
            Ok(done) => done,
            Err(error) => {
                tracing::error!(error = %error, "turn ended on backend failure");
                self.history.truncate(checkpoint);
                self.history.push(Message::user(input));
                (apology(&error), TurnStatus::BackendFailure(error))
            }
        };

        self.history.push(Message::assistant(reply.clone()));
        self.transition(CoordinatorState::AwaitingInput);
        TurnOutcome {
            reply,
            status,
            delegations,
        }
    }

    async fn drive(
        &mut self,
        input: &str,
        delegations: &mut Vec<Delegation>,
    ) -> Result<(String, TurnStatus), BackendError> {
        loop {
            let calls = match self.backend.complete(self.request()).await? {
                Reply::Text(text) => {
                    self.transition(CoordinatorState::ComposingReply);
                    return Ok((with_notes(text, delegations), TurnStatus::Answered));
                }
                Reply::ToolCalls(calls) => calls,
            };

            let (agent, task) = match self.route(&calls, input) {
                Ok(routed) => routed,
                Err(ambiguous) => {
                    tracing::warn!(candidates = ?ambiguous.candidates, calls = calls.len(), "routing ambiguous");
                    let question = with_notes(clarifying_question(&ambiguous, self), delegations);
                    return Ok((question, TurnStatus::Clarification(ambiguous)));
                }
            };

            if delegations.len() >= self.max_delegations_per_turn {
                tracing::warn!(
                    max = self.max_delegations_per_turn,
                    "delegation ceiling reached; composing reply from last report"
                );
                self.transition(CoordinatorState::ComposingReply);
                let text = delegations
                    .last()
                    .map(|d| d.report.text.clone())
                    .unwrap_or_else(|| "I was not able to hand this request to a specialist.".to_string());
                return Ok((with_notes(text, delegations), TurnStatus::Answered));
            }

            self.transition(CoordinatorState::Delegating);
            let name = agent.descriptor().name.clone();
            tracing::info!(agent = %name, "delegating");
            let report = agent.run(&task).await?;

            // Only one call was made, so the call/result pair stays well formed.
            if let [call] = calls.as_slice() {
                self.history.push(Message::assistant_with_calls(vec![call.clone()]));
                self.history
                    .push(Message::tool_result(call.id.clone(), report.to_json().to_string()));
            }
            delegations.push(Delegation {
                agent: name,
                task,
                report,
            });
            self.transition(CoordinatorState::ComposingReply);
        }
    }
}

fn clarifying_question(ambiguous: &RoutingAmbiguous, coordinator: &Coordinator) -> String {
    let mut question =
        String::from("I'm not sure which specialist should handle this. The candidates are:\n");
    for name in &ambiguous.candidates {
        let description = coordinator
            .agents()
            .find(|a| &a.name == name)
            .map(|a| a.description.as_str())
            .unwrap_or_default();
        question.push_str(&format!("- {name}: {description}\n"));
    }
    question.push_str("Could you say which of these you want, or narrow the request down?");
    question
}

fn apology(error: &BackendError) -> String {
    let cause = match error {
        BackendError::Unavailable(_) => "the language model service is unavailable",
        BackendError::InvalidResponse(_) => "the language model returned an unusable response",
        BackendError::Rejected(_) => "the language model service rejected the request",
    };
    format!(
        "Sorry, I couldn't complete that request because {cause}. \
         Nothing from this request was lost; please try again."
    )
}

fn with_notes(text: String, delegations: &[Delegation]) -> String {
    let notes = failure_notes(delegations);
    if notes.is_empty() {
        return text;
    }
    let mut reply = text;
    if !reply.is_empty() {
        reply.push_str("\n\n");
    }
    for note in notes {
        reply.push_str("Note: ");
        reply.push_str(&note);
        reply.push('\n');
    }
    reply.truncate(reply.trim_end().len());
    reply
}

/// User-facing notes for tool failures that were not later recovered from.
fn failure_notes(delegations: &[Delegation]) -> Vec<String> {
    let mut notes: Vec<String> = Vec::new();
    for delegation in delegations {
        let invocations = &delegation.report.invocations;
        for (i, invocation) in invocations.iter().enumerate() {
            let Err(error) = &invocation.outcome else {
                continue;
            };
            let recovered = invocations[i + 1..]
                .iter()
                .any(|later| later.tool == invocation.tool && later.outcome.is_ok());
            if recovered {
                continue;
            }
            let note = failure_note(&invocation.tool, error);
            if !notes.contains(&note) {
                notes.push(note);
            }
        }
        if delegation.report.status == ReportStatus::StepLimit {
            notes.push(format!(
                "{} stopped before finishing because it reached its tool-call limit.",
                delegation.agent
            ));
        }
    }
    notes
}

fn failure_note(tool: &str, error: &ToolError) -> String {
    match error {
        ToolError::PathEscape(_) => format!(
            "{tool} was disallowed because the path is outside the workspace; the workspace was left unmodified."
        ),
        ToolError::AccessDenied(_) => format!(
            "{tool} was disallowed by the workspace rules; the workspace was left unmodified."
        ),
        ToolError::ExecutionFailure(ExecutionFailure::Timeout { timeout }) => format!(
            "{tool} timed out after {}s and was stopped.",
            timeout.as_secs_f64()
        ),
        ToolError::ExecutionFailure(ExecutionFailure::NonZeroExit { exit_code, .. }) => {
            format!("{tool} exited with code {exit_code}.")
        }
        ToolError::ExecutionFailure(ExecutionFailure::Spawn { .. }) => {
            format!("{tool} could not be started.")
        }
        ToolError::NotFound(what) => format!("{tool} failed: {what} was not found."),
        ToolError::SchemaViolation { .. } => {
            format!("{tool} was called with invalid arguments.")
        }
        ToolError::UnknownTool(name) => format!("a call to the unavailable tool {name} was refused."),
        ToolError::HandlerFailure(_) => format!("{tool} failed."),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::agent::ToolInvocation;
    use crate::backend::ScriptedBackend;
    use crate::tools::ToolKind;

    #[derive(Debug)]
    struct CannedAgent {
        descriptor: AgentDescriptor,
        report: AgentReport,
    }

    impl CannedAgent {
        fn new(name: &str, invocations: Vec<ToolInvocation>) -> Arc<dyn CapabilityAgent> {
            Arc::new(Self {
                descriptor: AgentDescriptor {
                    name: name.to_string(),
                    description: format!("{name} does things"),
                    tools: vec![ToolKind::ReadFile],
                    model: "m".into(),
                },
                report: AgentReport {
                    agent: name.to_string(),
                    text: format!("{name} finished"),
                    status: ReportStatus::Completed,
                    invocations,
                    artifacts: vec![],
                },
            })
        }
    }

    #[async_trait]
    impl CapabilityAgent for CannedAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        async fn run(&self, _task: &str) -> Result<AgentReport, BackendError> {
            Ok(self.report.clone())
        }
    }

    fn transfer(id: &str, agent: &str, task: &str) -> ToolCall {
        ToolCall::new(id, format!("transfer_to_{agent}"), json!({ "task": task }))
    }

    fn coordinator(backend: Arc<ScriptedBackend>, agents: Vec<Arc<dyn CapabilityAgent>>) -> Coordinator {
        Coordinator::new("coord-model", backend, agents)
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let backend = Arc::new(ScriptedBackend::new([Reply::Text("Hello!".into())]));
        let mut coord = coordinator(backend.clone(), vec![CannedAgent::new("alpha", vec![])]);
        let outcome = coord.handle_turn("hi").await;
        assert_eq!(outcome.reply, "Hello!");
        assert_eq!(outcome.status, TurnStatus::Answered);
        assert!(outcome.delegations.is_empty());
        assert_eq!(coord.state(), CoordinatorState::AwaitingInput);

        let request = &backend.requests()[0];
        assert!(request.offers("transfer_to_alpha"));
        assert!(request.messages[0].content.contains("alpha does things"));
    }

    #[tokio::test]
    async fn test_single_delegation_then_compose() {
        let backend = Arc::new(ScriptedBackend::new([
            Reply::ToolCalls(vec![transfer("t1", "beta", "do the beta thing")]),
            Reply::Text("All done.".into()),
        ]));
        let mut coord = coordinator(
            backend.clone(),
            vec![CannedAgent::new("alpha", vec![]), CannedAgent::new("beta", vec![])],
        );
        let outcome = coord.handle_turn("please").await;
        assert_eq!(outcome.reply, "All done.");
        assert_eq!(outcome.delegations.len(), 1);
        assert_eq!(outcome.delegations[0].agent, "beta");
        assert_eq!(outcome.delegations[0].task, "do the beta thing");

        let compose = &backend.requests()[1];
        let result = compose.messages.last().unwrap();
        assert_eq!(result.tool_call_id.as_deref(), Some("t1"));
        assert!(result.content.contains("beta finished"));
    }

    #[tokio::test]
    async fn test_several_transfers_ask_for_clarification() {
        let backend = Arc::new(ScriptedBackend::new([Reply::ToolCalls(vec![
            transfer("t1", "alpha", "a"),
            transfer("t2", "beta", "b"),
        ])]));
        let mut coord = coordinator(
            backend,
            vec![CannedAgent::new("alpha", vec![]), CannedAgent::new("beta", vec![])],
        );
        let outcome = coord.handle_turn("do both").await;
        let TurnStatus::Clarification(ambiguous) = &outcome.status else {
            panic!("expected clarification, got {:?}", outcome.status);
        };
        assert_eq!(ambiguous.candidates, vec!["alpha", "beta"]);
        assert!(outcome.reply.contains("alpha"));
        assert!(outcome.reply.contains("beta"));
        assert!(outcome.delegations.is_empty());
        assert_eq!(coord.state(), CoordinatorState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_unknown_agent_lists_all_candidates() {
        let backend = Arc::new(ScriptedBackend::new([Reply::ToolCalls(vec![transfer(
            "t1", "gamma", "x",
        )])]));
        let mut coord = coordinator(
            backend,
            vec![CannedAgent::new("alpha", vec![]), CannedAgent::new("beta", vec![])],
        );
        let outcome = coord.handle_turn("x").await;
        assert!(matches!(
            &outcome.status,
            TurnStatus::Clarification(a) if a.candidates == vec!["alpha", "beta"]
        ));
    }

    #[tokio::test]
    async fn test_delegation_ceiling_uses_last_report() {
        let backend = Arc::new(ScriptedBackend::new([
            Reply::ToolCalls(vec![transfer("t1", "alpha", "one")]),
            Reply::ToolCalls(vec![transfer("t2", "alpha", "two")]),
            Reply::ToolCalls(vec![transfer("t3", "alpha", "three")]),
        ]));
        let mut coord = coordinator(backend.clone(), vec![CannedAgent::new("alpha", vec![])])
            .with_max_delegations_per_turn(2);
        let outcome = coord.handle_turn("loop").await;
        assert_eq!(outcome.delegations.len(), 2);
        assert_eq!(outcome.reply, "alpha finished");
        assert_eq!(backend.remaining(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_apologizes_and_keeps_history() {
        let backend = Arc::new(ScriptedBackend::new([Reply::Text("first".into())]));
        let mut coord = coordinator(backend.clone(), vec![CannedAgent::new("alpha", vec![])]);
        coord.handle_turn("one").await;
        assert_eq!(coord.history().len(), 2);

        backend.push_error(BackendError::Unavailable("down".into()));
        let outcome = coord.handle_turn("two").await;
        assert!(matches!(outcome.status, TurnStatus::BackendFailure(_)));
        assert!(outcome.reply.starts_with("Sorry"));
        assert!(!outcome.reply.contains("down"));
        assert_eq!(coord.history().len(), 4);
        assert_eq!(coord.history()[0].content, "one");
        assert_eq!(coord.state(), CoordinatorState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_failure_notes() {
        let escape = ToolInvocation {
            tool: "write_file".into(),
            arguments: json!({"path": "/etc/passwd"}),
            outcome: Err(ToolError::PathEscape("/etc/passwd".into())),
            duration: Duration::from_millis(1),
        };
        let timeout = ToolInvocation {
            tool: "run_python_script".into(),
            arguments: json!({}),
            outcome: Err(ToolError::ExecutionFailure(ExecutionFailure::Timeout {
                timeout: Duration::from_secs(2),
            })),
            duration: Duration::from_secs(2),
        };
        let backend = Arc::new(ScriptedBackend::new([
            Reply::ToolCalls(vec![transfer("t1", "alpha", "write")]),
            Reply::Text("Could not do it.".into()),
        ]));
        let mut coord = coordinator(backend, vec![CannedAgent::new("alpha", vec![escape, timeout])]);
        let outcome = coord.handle_turn("write /etc/passwd").await;
        assert!(outcome.reply.starts_with("Could not do it."));
        assert!(outcome.reply.contains("disallowed"));
        assert!(outcome.reply.contains("workspace was left unmodified"));
        assert!(outcome.reply.contains("timed out"));
        assert!(!outcome.reply.contains("/etc/passwd"));
    }

    #[test]
    fn test_recovered_failure_has_no_note() {
        let failed = ToolInvocation {
            tool: "read_file".into(),
            arguments: json!({}),
            outcome: Err(ToolError::NotFound("a.txt".into())),
            duration: Duration::ZERO,
        };
        let succeeded = ToolInvocation {
            outcome: Ok(json!({})),
            ..failed.clone()
        };
        let delegation = Delegation {
            agent: "alpha".into(),
            task: "t".into(),
            report: AgentReport {
                agent: "alpha".into(),
                text: "ok".into(),
                status: ReportStatus::Completed,
                invocations: vec![failed, succeeded],
                artifacts: vec![],
            },
        };
        assert!(failure_notes(&[delegation]).is_empty());
    }

    #[tokio::test]
    async fn test_routing_is_deterministic() {
        let script = || {
            Arc::new(ScriptedBackend::new([
                Reply::ToolCalls(vec![transfer("t1", "beta", "task")]),
                Reply::Text("done".into()),
            ]))
        };
        let agents = || vec![CannedAgent::new("alpha", vec![]), CannedAgent::new("beta", vec![])];
        let first = coordinator(script(), agents()).handle_turn("same input").await;
        let second = coordinator(script(), agents()).handle_turn("same input").await;
        assert_eq!(first, second);
        assert_eq!(first.delegations[0].agent, "beta");
    }
}
