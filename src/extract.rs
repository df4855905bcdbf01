//! Schema-constrained structured extraction
//!
//! Converts model output into validated lab records. A record is described by
//! a JSON schema offered to the model as a tool; the tool arguments are then
//! decoded and validated. There is exactly one attempt per call and a failure
//! is returned to the caller as a typed error.

use crate::lab::{BriefingInput, LabRequirements, LabTitle, Question, ValidationError};
use crate::llm::{LlmError, LlmMessage, LlmRequest, ToolChoice, ToolDefinition};
use crate::runtime::LlmClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// A record the model can be asked to produce
pub trait StructuredOutput: DeserializeOwned + Serialize + Send {
    /// Tool name the schema is offered under
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    /// JSON schema for the record
    fn schema() -> Value;

    /// Record invariants beyond what the schema expresses
    fn validate(&self) -> Result<(), ValidationError>;

    fn tool_definition() -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: Self::DESCRIPTION.to_string(),
            input_schema: Self::schema(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("model request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("model did not produce a `{0}` record")]
    NoOutput(&'static str),
    #[error("model produced {count} `{name}` records, expected exactly one")]
    MultipleOutputs { name: &'static str, count: usize },
    #[error("malformed `{name}` record: {reason}")]
    Malformed { name: &'static str, reason: String },
    #[error("invalid `{name}` record: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: ValidationError,
    },
}

/// Decode and validate one record from tool arguments
pub fn parse_structured<T: StructuredOutput>(input: &Value) -> Result<T, ExtractionError> {
    // Some models double-encode arguments as a JSON string
    let decoded = match input {
        Value::String(raw) => serde_json::from_str::<Value>(raw).map_err(|e| {
            ExtractionError::Malformed {
                name: T::NAME,
                reason: e.to_string(),
            }
        })?,
        other => other.clone(),
    };

    let record: T = serde_json::from_value(decoded).map_err(|e| ExtractionError::Malformed {
        name: T::NAME,
        reason: e.to_string(),
    })?;

    record.validate().map_err(|source| ExtractionError::Invalid {
        name: T::NAME,
        source,
    })?;

    Ok(record)
}

/// Ask the model for exactly one `T`, forcing the schema tool
pub async fn extract<T, L>(
    llm: &L,
    system: String,
    messages: Vec<LlmMessage>,
) -> Result<T, ExtractionError>
where
    T: StructuredOutput,
    L: LlmClient + ?Sized,
{
    let request = LlmRequest::new(system, messages)
        .with_tools(vec![T::tool_definition()])
        .with_tool_choice(ToolChoice::Required(T::NAME.to_string()));

    let response = llm.complete(&request).await?;

    let calls: Vec<&Value> = response
        .tool_uses()
        .into_iter()
        .filter(|(_, name, _)| *name == T::NAME)
        .map(|(_, _, input)| input)
        .collect();

    match calls.as_slice() {
        [] => Err(ExtractionError::NoOutput(T::NAME)),
        [input] => {
            let record = parse_structured::<T>(input)?;
            tracing::debug!(record = T::NAME, "Structured extraction succeeded");
            Ok(record)
        }
        many => Err(ExtractionError::MultipleOutputs {
            name: T::NAME,
            count: many.len(),
        }),
    }
}

impl StructuredOutput for LabRequirements {
    const NAME: &'static str = "set_lab_requirements";
    const DESCRIPTION: &'static str = "Record the lab requirements once the topic, target persona and difficulty level are all known. Call again if the user asks for changes.";

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["topic", "target_persona", "difficulty_level"],
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "The subject the lab covers"
                },
                "target_persona": {
                    "type": "string",
                    "description": "Who the lab is for"
                },
                "difficulty_level": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 7,
                    "description": "Difficulty level of the lab, 1 (easiest) to 7 (hardest)"
                }
            }
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        LabRequirements::validate(self)
    }
}

impl StructuredOutput for LabTitle {
    const NAME: &'static str = "set_lab_title";
    const DESCRIPTION: &'static str =
        "Record the lab title together with a short explanation of why it fits the requirements.";

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["title", "explanation"],
            "properties": {
                "title": {
                    "type": "string",
                    "description": "A short, catchy lab title"
                },
                "explanation": {
                    "type": "string",
                    "description": "One or two sentences explaining the title to the user"
                }
            }
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        LabTitle::validate(self)
    }
}

impl StructuredOutput for BriefingInput {
    const NAME: &'static str = "set_briefing";
    const DESCRIPTION: &'static str =
        "Replace the lab briefing with an updated version that takes the user's feedback into account.";

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["briefing"],
            "properties": {
                "briefing": {
                    "type": "string",
                    "description": "The full briefing text, at most one paragraph, markdown allowed"
                }
            }
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        BriefingInput::validate(self)
    }
}

impl StructuredOutput for Question {
    const NAME: &'static str = "create_question";
    const DESCRIPTION: &'static str =
        "Create one multiple-choice question for the lab quiz. Create questions one at a time.";

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["title", "options", "correct_option_index"],
            "properties": {
                "title": {
                    "type": "string",
                    "description": "The question text"
                },
                "options": {
                    "type": "array",
                    "minItems": 2,
                    "items": { "type": "string" },
                    "description": "The answer options"
                },
                "correct_option_index": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Index of the correct option, starting from 0"
                }
            }
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Question::validate(self)
    }
}
