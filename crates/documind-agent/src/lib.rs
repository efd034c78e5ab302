//! Agent layer: a chat model that may call the document classifier once, then
//! summarizes.

mod error;
pub mod llm;
pub mod pipeline;
pub mod tool;

pub use error::AgentError;
pub use llm::{ChatMessage, ChatModel, LlmError, OllamaChat, Role, ToolCall, ToolSpec};
pub use pipeline::{AGENT_ERROR_MESSAGE, AgentPipeline, AgentRun, ToolCallRecord, build_prompt};
pub use tool::{ClassifierTool, TOOL_NAME};
