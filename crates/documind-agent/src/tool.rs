//! The `document_classifier` tool exposed to the chat model.

use std::sync::Arc;

use documind_ai::predict::{Classify, ERROR_LABEL};
use serde_json::{Value, json};
use tracing::{error, info};

use crate::error::AgentError;
use crate::llm::{FunctionSpec, ToolSpec};

pub const TOOL_NAME: &str = "document_classifier";

const TOOL_DESCRIPTION: &str = "Useful for when you need to know what kind of legal document or \
clause you are reading. Input should be the text of the clause.";

/// Wraps the Prediction Tool. Inference is blocking, so it runs off the async
/// executor.
#[derive(Clone)]
pub struct ClassifierTool {
    classifier: Arc<dyn Classify>,
}

impl ClassifierTool {
    pub fn new(classifier: Arc<dyn Classify>) -> Self {
        Self { classifier }
    }

    pub fn name(&self) -> &'static str {
        TOOL_NAME
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            kind: "function".into(),
            function: FunctionSpec {
                name: TOOL_NAME.into(),
                description: TOOL_DESCRIPTION.into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "text": {
                            "type": "string",
                            "description": "The text of the clause to classify."
                        }
                    },
                    "required": ["text"]
                }),
            },
        }
    }

    /// Pull the clause text out of the model's call arguments. Small models
    /// sometimes pass a bare string or use another key, so any single string
    /// value is accepted.
    pub fn parse_input(arguments: &Value) -> Result<String, AgentError> {
        match arguments {
            Value::String(s) => Ok(s.clone()),
            Value::Object(map) => {
                if let Some(Value::String(s)) = map.get("text") {
                    return Ok(s.clone());
                }
                let mut strings = map.values().filter_map(Value::as_str);
                match (strings.next(), strings.next()) {
                    (Some(s), None) => Ok(s.to_string()),
                    _ => Err(AgentError::ToolArguments(arguments.to_string())),
                }
            }
            other => Err(AgentError::ToolArguments(other.to_string())),
        }
    }

    /// Classify `text`, returning the label name or `"Error"`.
    pub async fn call(&self, text: &str) -> Result<String, AgentError> {
        let classifier = Arc::clone(&self.classifier);
        let input = text.to_string();
        let result = tokio::task::spawn_blocking(move || classifier.classify(&input))
            .await
            .map_err(|e| AgentError::ToolFailed(e.to_string()))?;

        match result {
            Ok(prediction) => {
                info!(
                    label = %prediction.label,
                    confidence = prediction.confidence,
                    "classifier tool returned"
                );
                Ok(prediction.label)
            }
            Err(e) => {
                error!(error = %e, "prediction error");
                Ok(ERROR_LABEL.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use documind_ai::predict::{PredictError, Prediction};

    struct Fixed(&'static str);

    impl Classify for Fixed {
        fn classify(&self, _text: &str) -> Result<Prediction, PredictError> {
            Ok(Prediction {
                label_id: 0,
                label: self.0.to_string(),
                confidence: 0.9,
            })
        }
    }

    struct Broken;

    impl Classify for Broken {
        fn classify(&self, _text: &str) -> Result<Prediction, PredictError> {
            Err(PredictError::Poisoned)
        }
    }

    #[test]
    fn spec_declares_text_parameter() {
        let tool = ClassifierTool::new(Arc::new(Fixed("Notices")));
        let spec = serde_json::to_value(tool.spec()).unwrap();
        assert_eq!(spec["type"], "function");
        assert_eq!(spec["function"]["name"], "document_classifier");
        assert_eq!(spec["function"]["parameters"]["required"][0], "text");
    }

    #[test]
    fn input_parsing_accepts_common_shapes() {
        assert_eq!(
            ClassifierTool::parse_input(&json!({"text": "a clause"})).unwrap(),
            "a clause"
        );
        assert_eq!(
            ClassifierTool::parse_input(&json!({"clause": "a clause"})).unwrap(),
            "a clause"
        );
        assert_eq!(ClassifierTool::parse_input(&json!("a clause")).unwrap(), "a clause");
        assert!(ClassifierTool::parse_input(&json!({"a": "x", "b": "y"})).is_err());
        assert!(ClassifierTool::parse_input(&json!(42)).is_err());
    }

    #[tokio::test]
    async fn call_returns_label() {
        let tool = ClassifierTool::new(Arc::new(Fixed("Governing Laws")));
        assert_eq!(tool.call("governed by").await.unwrap(), "Governing Laws");
    }

    #[tokio::test]
    async fn prediction_failure_yields_error_label() {
        let tool = ClassifierTool::new(Arc::new(Broken));
        assert_eq!(tool.call("anything").await.unwrap(), "Error");
    }
}
