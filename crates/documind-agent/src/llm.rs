//! Chat-model seam and the Ollama `/api/chat` client.
//!
//! The model runtime serves a 4-bit quantized instruct model; quantization is
//! a property of the served model tag (e.g. `qwen2.5:3b-instruct-q4_K_M`), not
//! of this client.

use async_trait::async_trait;
use documind_core::AgentConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model runtime not reachable at {base_url}. Start it with 'ollama serve'.")]
    Unreachable { base_url: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model '{0}' not found. Pull it with 'ollama pull {0}'.")]
    ModelNotFound(String),
    #[error("model runtime returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `tool` messages: which tool produced the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn tool(name: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: Some(name.to_string()),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Function-tool declaration offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A chat-completion backend with tool calling.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// One assistant turn for the conversation so far. `tools` may be empty.
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec])
    -> Result<ChatMessage, LlmError>;
}

/// Client for Ollama's `/api/chat`.
#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: Client,
    base_url: String,
    model_id: String,
    temperature: f32,
    max_new_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "<[ToolSpec]>::is_empty")]
    tools: &'a [ToolSpec],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct OllamaErrorBody {
    error: String,
}

impl OllamaChat {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            temperature: config.temperature,
            max_new_tokens: config.max_new_tokens,
        }
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(
            model_id = %self.model_id,
            messages = messages.len(),
            tools = tools.len(),
            "requesting chat turn"
        );

        let body = ChatRequest {
            model: &self.model_id,
            messages,
            tools,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_new_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, base_url = %self.base_url, "failed to reach model runtime");
                if e.is_connect() {
                    LlmError::Unreachable {
                        base_url: self.base_url.clone(),
                    }
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!(status = %status, body = %text, "model runtime returned error status");
            let not_found = status == reqwest::StatusCode::NOT_FOUND
                || serde_json::from_str::<OllamaErrorBody>(&text)
                    .map(|b| b.error.contains("not found"))
                    .unwrap_or(false);
            if not_found {
                return Err(LlmError::ModelNotFound(self.model_id.clone()));
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        debug!(
            content_len = parsed.message.content.len(),
            tool_calls = parsed.message.tool_calls.len(),
            "received chat turn"
        );
        Ok(parsed.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(base_url: &str) -> AgentConfig {
        AgentConfig {
            model_id: "qwen2.5:3b-instruct-q4_K_M".into(),
            base_url: base_url.into(),
            temperature: 0.1,
            max_new_tokens: 512,
            max_steps: 4,
        }
    }

    #[test]
    fn tool_message_serializes_with_name() {
        let msg = ChatMessage::tool("document_classifier", "Governing Laws");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_name"], "document_classifier");
        assert!(json.get("tool_calls").is_none());
    }

    #[tokio::test]
    async fn chat_posts_options_and_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "qwen2.5:3b-instruct-q4_K_M",
                "stream": false,
                "options": {"num_predict": 512}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "model": "qwen2.5:3b-instruct-q4_K_M",
                    "message": {
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [
                            {"function": {"name": "document_classifier", "arguments": {"text": "clause"}}}
                        ]
                    },
                    "done": true
                }"#,
            )
            .create_async()
            .await;

        let model = OllamaChat::new(&config(&server.url()));
        let reply = model
            .chat(&[ChatMessage::user("classify")], &[])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].function.name, "document_classifier");
        assert_eq!(reply.tool_calls[0].function.arguments["text"], "clause");
    }

    #[tokio::test]
    async fn missing_model_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body(r#"{"error": "model 'qwen2.5:3b-instruct-q4_K_M' not found"}"#)
            .create_async()
            .await;

        let model = OllamaChat::new(&config(&server.url()));
        let err = model
            .chat(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ModelNotFound(_)));
    }
}
