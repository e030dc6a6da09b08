//! OpenAI-compatible chat completions backend.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{BackendError, CompletionRequest, InferenceBackend, Message, Reply, Role, ToolCall};
use crate::retry::RetryPolicy;

/// Default endpoint when none is configured.
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

/// Talks to `{endpoint}/chat/completions` with function calling.
#[derive(Clone)]
pub struct OpenAiBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    temperature: Option<f32>,
    retry: RetryPolicy,
}

impl fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("endpoint", &self.endpoint)
            .field("temperature", &self.temperature)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunction,
}

#[derive(Debug, Deserialize)]
struct ChatFunction {
    name: String,
    // JSON string
    #[serde(default)]
    arguments: String,
}

/// A failed attempt, tagged with whether trying again could help.
#[derive(Debug)]
struct Attempt {
    transient: bool,
    error: BackendError,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl OpenAiBackend {
    /// Create a backend.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            temperature: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Use a different retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_json).collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if !request.functions.is_empty() {
            let tools: Vec<Value> = request
                .functions
                .iter()
                .map(|f| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": f.name,
                            "description": f.description,
                            "parameters": f.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<ChatResponse, Attempt> {
        let url = format!("{}/chat/completions", self.endpoint);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt {
                transient: true,
                error: BackendError::Unavailable(e.to_string()),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let text: String = text.chars().take(300).collect();
            let transient = status.as_u16() == 429 || status.is_server_error();
            let error = if transient {
                BackendError::Unavailable(format!("HTTP {status}: {text}"))
            } else {
                BackendError::Rejected(format!("HTTP {status}: {text}"))
            };
            return Err(Attempt { transient, error });
        }

        response.json().await.map_err(|e| Attempt {
            transient: false,
            error: BackendError::InvalidResponse(format!("failed to parse response: {e}")),
        })
    }
}

fn message_json(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut msg = json!({ "role": role, "content": message.content });
    if let Some(id) = &message.tool_call_id {
        msg["tool_call_id"] = json!(id);
    }
    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        msg["tool_calls"] = json!(calls);
        if message.content.is_empty() {
            msg["content"] = Value::Null;
        }
    }
    msg
}

fn parse_reply(response: ChatResponse) -> Result<Reply, BackendError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse("no choices in response".to_string()))?;

    match choice.message.tool_calls {
        Some(calls) if !calls.is_empty() => Ok(Reply::ToolCalls(
            calls
                .into_iter()
                .map(|tc| {
                    // Unparseable arguments are passed on as a string so the
                    // registry reports them back to the model.
                    let arguments = if tc.function.arguments.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&tc.function.arguments)
                            .unwrap_or(Value::String(tc.function.arguments))
                    };
                    ToolCall::new(tc.id, tc.function.name, arguments)
                })
                .collect(),
        )),
        _ => Ok(Reply::Text(choice.message.content.unwrap_or_default())),
    }
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<Reply, BackendError> {
        let body = self.request_body(&request);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            functions = request.functions.len(),
            "chat completion request"
        );
        let response = self
            .retry
            .run("chat completion", || self.post(&body), |a: &Attempt| a.transient)
            .await
            .map_err(|a| a.error)?;
        parse_reply(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::FunctionSpec;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new("http://127.0.0.1:9/v1/", "sk-test", Duration::from_secs(1))
            .unwrap()
            .with_retry(RetryPolicy::none())
    }

    #[test]
    fn test_request_body() {
        let request = CompletionRequest {
            model: "qwen3-max".into(),
            messages: vec![
                Message::system("be brief"),
                Message::assistant_with_calls(vec![ToolCall::new(
                    "call_1",
                    "list_files",
                    json!({"directory": "outputs"}),
                )]),
                Message::tool_result("call_1", "{\"files\":[]}"),
            ],
            functions: vec![FunctionSpec {
                name: "list_files".into(),
                description: "List".into(),
                parameters: json!({"type": "object"}),
            }],
        };
        let body = backend().with_temperature(0.0).request_body(&request);
        assert_eq!(body["model"], "qwen3-max");
        assert_eq!(body["messages"][1]["content"], Value::Null);
        assert_eq!(
            body["messages"][1]["tool_calls"][0]["function"]["arguments"],
            "{\"directory\":\"outputs\"}"
        );
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["name"], "list_files");
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn test_parse_tool_calls() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "a", "type": "function", "function": {"name": "read_file", "arguments": "{\"path\":\"x\"}"}},
                {"id": "b", "type": "function", "function": {"name": "list_all_files", "arguments": ""}},
                {"id": "c", "type": "function", "function": {"name": "read_file", "arguments": "{broken"}}
            ]}}]
        }))
        .unwrap();
        let Reply::ToolCalls(calls) = parse_reply(response).unwrap() else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].arguments, json!({"path": "x"}));
        assert_eq!(calls[1].arguments, json!({}));
        assert_eq!(calls[2].arguments, json!("{broken"));
    }

    #[test]
    fn test_parse_text_and_empty() {
        let response: ChatResponse =
            serde_json::from_value(json!({"choices": [{"message": {"content": "hi"}}]})).unwrap();
        assert_eq!(parse_reply(response).unwrap(), Reply::Text("hi".into()));

        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            parse_reply(response),
            Err(BackendError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        let request = CompletionRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            functions: vec![],
        };
        let err = backend().complete(request).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[test]
    fn test_debug_hides_key() {
        assert!(!format!("{:?}", backend()).contains("sk-test"));
    }
}
