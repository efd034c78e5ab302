use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("chat model error: {0}")]
    Llm(#[from] LlmError),

    #[error("model requested unknown tool `{0}`")]
    UnknownTool(String),

    #[error("invalid tool arguments: {0}")]
    ToolArguments(String),

    #[error("tool execution failed: {0}")]
    ToolFailed(String),

    #[error("model returned an empty final answer")]
    EmptyAnswer,

    #[error("no final answer after {0} model turns")]
    StepLimit(usize),
}
