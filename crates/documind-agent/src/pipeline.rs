//! Agent Pipeline: a single-tool ReAct loop over the chat model.
//!
//! The model is offered the classifier until it has used it once; after that
//! the tool is withdrawn and the next reply without a tool call is the final
//! answer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use documind_ai::predict::{Classify, ERROR_LABEL, PredictError, PredictionTool};
use documind_core::{AgentConfig, PredictionConfig};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::llm::{ChatMessage, ChatModel, OllamaChat, ToolSpec};
use crate::tool::{ClassifierTool, TOOL_NAME};

/// Returned by [`AgentPipeline::run`] whenever the loop fails.
pub const AGENT_ERROR_MESSAGE: &str = "Agent Error - Check logs.";

const DEFAULT_MAX_STEPS: usize = 4;

const ALREADY_USED: &str =
    "The document_classifier tool has already been used. Summarize the result now.";

/// The instruction sent as the sole user message.
pub fn build_prompt(document_text: &str) -> String {
    format!(
        "Task: Classify this legal text and find the risk.\n\
         Text: \"{document_text}\"\n\
         First, use the '{TOOL_NAME}' tool.\n\
         Then, summarize the result."
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

/// Final message plus the tool-call trail of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRun {
    pub output: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl AgentRun {
    /// Label returned by the classifier tool, if it ran and succeeded.
    pub fn classification(&self) -> Option<&str> {
        self.tool_calls
            .iter()
            .find(|c| c.tool == TOOL_NAME)
            .map(|c| c.output.as_str())
            .filter(|label| *label != ERROR_LABEL)
    }
}

pub struct AgentPipeline {
    model: Arc<dyn ChatModel>,
    tool: ClassifierTool,
    max_steps: usize,
}

impl AgentPipeline {
    pub fn new(model: Arc<dyn ChatModel>, classifier: Arc<dyn Classify>) -> Self {
        Self {
            model,
            tool: ClassifierTool::new(classifier),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Load the classification artifact and connect the Ollama client.
    pub fn from_config(
        agent: &AgentConfig,
        prediction: &PredictionConfig,
    ) -> Result<Self, PredictError> {
        let classifier = PredictionTool::load(&prediction.model_path)?;
        info!(model_id = %agent.model_id, base_url = %agent.base_url, "using chat model");
        let model = OllamaChat::new(agent);
        Ok(Self::new(Arc::new(model), Arc::new(classifier)).with_max_steps(agent.max_steps))
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run the agent on `document_text`, returning the final message or
    /// [`AGENT_ERROR_MESSAGE`].
    pub async fn run(&self, document_text: &str) -> String {
        match self.run_detailed(document_text).await {
            Ok(run) => run.output,
            Err(e) => {
                error!(error = %e, "agent failed");
                AGENT_ERROR_MESSAGE.to_string()
            }
        }
    }

    pub async fn run_detailed(&self, document_text: &str) -> Result<AgentRun, AgentError> {
        info!(
            model_id = %self.model.model_id(),
            chars = document_text.chars().count(),
            "starting agent run"
        );
        let mut messages = vec![ChatMessage::user(build_prompt(document_text))];
        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
        let spec = [self.tool.spec()];

        for step in 1..=self.max_steps {
            let offered: &[ToolSpec] = if tool_calls.is_empty() { &spec } else { &[] };
            let reply = self.model.chat(&messages, offered).await?;
            debug!(step, tool_calls = reply.tool_calls.len(), "model turn");

            if let Some(call) = reply.tool_calls.first() {
                if !tool_calls.is_empty() {
                    warn!(step, tool = %call.function.name, "tool call after withdrawal ignored");
                    messages.push(reply.clone());
                    messages.push(ChatMessage::user(ALREADY_USED));
                    continue;
                }
                if call.function.name != TOOL_NAME {
                    return Err(AgentError::UnknownTool(call.function.name.clone()));
                }
                let input = ClassifierTool::parse_input(&call.function.arguments)?;
                let output = self.tool.call(&input).await?;
                info!(step, tool = TOOL_NAME, output = %output, "tool invoked");

                tool_calls.push(ToolCallRecord {
                    tool: TOOL_NAME.to_string(),
                    input,
                    output: output.clone(),
                    timestamp: Utc::now(),
                });
                messages.push(reply.clone());
                messages.push(ChatMessage::tool(TOOL_NAME, output));
                continue;
            }

            let output = reply.content.trim();
            if output.is_empty() {
                return Err(AgentError::EmptyAnswer);
            }
            info!(steps = step, tool_calls = tool_calls.len(), "agent finished");
            return Ok(AgentRun {
                output: output.to_string(),
                tool_calls,
            });
        }

        Err(AgentError::StepLimit(self.max_steps))
    }
}
