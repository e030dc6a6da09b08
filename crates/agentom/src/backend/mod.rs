//! Inference backends.
//!
//! An [`InferenceBackend`] turns a conversation plus a set of callable
//! functions into either a text reply or a list of function calls. The
//! coordinator and every capability agent talk to the model only through
//! this trait.

mod openai;
mod scripted;

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use openai::{DEFAULT_OPENAI_ENDPOINT, OpenAiBackend};
pub use scripted::ScriptedBackend;

use crate::tools::ToolDescriptor;

/// Errors from an inference backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The backend could not be reached, or kept failing after retries.
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with something that is not a usable reply.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    /// The backend refused the request (bad credentials, bad request).
    #[error("backend rejected the request: {0}")]
    Rejected(String),
}

/// Who said a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions
    System,
    /// The human (or the coordinator, for a capability agent)
    User,
    /// The model
    Assistant,
    /// A function result
    Tool,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned call id, echoed back with the result
    pub id: String,
    /// Function name
    pub name: String,
    /// Arguments as sent by the model
    pub arguments: Value,
}

impl ToolCall {
    /// Create a call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author
    pub role: Role,
    /// Text content (may be empty for assistant tool-call messages)
    pub content: String,
    /// Calls made in this assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// A plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant message that made function calls.
    pub fn assistant_with_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, "")
        }
    }

    /// The result of call `id`.
    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Function name
    pub name: String,
    /// What it does
    pub description: String,
    /// JSON Schema of the arguments
    pub parameters: Value,
}

impl From<&ToolDescriptor> for FunctionSpec {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name().to_string(),
            description: descriptor.description.clone(),
            parameters: descriptor.json_schema(),
        }
    }
}

/// One step of a conversation sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model name
    pub model: String,
    /// Conversation so far, system prompt first
    pub messages: Vec<Message>,
    /// Functions the model may call
    pub functions: Vec<FunctionSpec>,
}

impl CompletionRequest {
    /// Whether a function with this name is offered.
    pub fn offers(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
    }

    /// Content of the last user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// What the model answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// A final text answer
    Text(String),
    /// One or more function calls, in order
    ToolCalls(Vec<ToolCall>),
}

/// A chat model with function calling.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Produce the next reply.
    async fn complete(&self, request: CompletionRequest) -> Result<Reply, BackendError>;
}

/// Blanket implementation for async closures.
#[async_trait]
impl<F, Fut> InferenceBackend for F
where
    F: Fn(CompletionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply, BackendError>> + Send,
{
    async fn complete(&self, request: CompletionRequest) -> Result<Reply, BackendError> {
        self(request).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tools::{SideEffect, ToolKind, ValueType};

    #[test]
    fn test_function_spec_from_descriptor() {
        let descriptor = ToolDescriptor::new(ToolKind::ListFiles, SideEffect::Read, "List files")
            .param("directory", ValueType::String, "dir");
        let spec = FunctionSpec::from(&descriptor);
        assert_eq!(spec.name, "list_files");
        assert_eq!(spec.parameters["required"], json!(["directory"]));
    }

    #[tokio::test]
    async fn test_closure_backend() {
        let backend = |request: CompletionRequest| async move {
            Ok::<_, BackendError>(Reply::Text(format!(
                "echo: {}",
                request.last_user_message().unwrap_or_default()
            )))
        };
        let reply = backend
            .complete(CompletionRequest {
                model: "m".into(),
                messages: vec![Message::system("s"), Message::user("hello")],
                functions: vec![],
            })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Text("echo: hello".into()));
    }
}
