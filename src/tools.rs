//! Stage actions offered to the model as tools
//!
//! Each stage permits a fixed set of actions. A tool call is parsed into a
//! typed [`Action`] here; applying it to the thread is the state machine's job.

use crate::extract::{parse_structured, ExtractionError, StructuredOutput};
use crate::lab::{BriefingInput, LabRequirements, LabTitle, Question, ValidationError};
use crate::llm::ToolDefinition;
use crate::state_machine::Stage;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

pub const TRANSFER_TO_NEXT_STAGE: &str = "transfer_to_next_stage";

/// A validated, model-signaled intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetLabRequirements(LabRequirements),
    SetLabTitle(LabTitle),
    SetBriefing(BriefingInput),
    CreateQuestion(Question),
    TransferToNextStage,
}

/// Why a tool call was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("`{action}` is not available in the {stage} stage")]
    NotPermitted { action: String, stage: Stage },
    #[error("malformed `{action}` arguments: {reason}")]
    Malformed { action: &'static str, reason: String },
    #[error("invalid `{action}` arguments: {source}")]
    Invalid {
        action: &'static str,
        #[source]
        source: ValidationError,
    },
}

/// An action the model may call
pub trait StageTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> String;

    fn input_schema(&self) -> Value;

    /// Decode and validate the call arguments
    fn parse(&self, input: &Value) -> Result<Action, ActionError>;
}

/// Tool that records one structured lab record
struct RecordTool<T> {
    wrap: fn(T) -> Action,
}

impl<T: StructuredOutput> StageTool for RecordTool<T> {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn description(&self) -> String {
        T::DESCRIPTION.to_string()
    }

    fn input_schema(&self) -> Value {
        T::schema()
    }

    fn parse(&self, input: &Value) -> Result<Action, ActionError> {
        parse_structured::<T>(input)
            .map(self.wrap)
            .map_err(|e| match e {
                ExtractionError::Invalid { name, source } => ActionError::Invalid {
                    action: name,
                    source,
                },
                ExtractionError::Malformed { name, reason } => ActionError::Malformed {
                    action: name,
                    reason,
                },
                other => ActionError::Malformed {
                    action: T::NAME,
                    reason: other.to_string(),
                },
            })
    }
}

struct TransferTool;

impl StageTool for TransferTool {
    fn name(&self) -> &'static str {
        TRANSFER_TO_NEXT_STAGE
    }

    fn description(&self) -> String {
        "Move on to the next stage of building the lab. Call this as soon as the user confirms they are happy to proceed.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn parse(&self, _input: &Value) -> Result<Action, ActionError> {
        Ok(Action::TransferToNextStage)
    }
}

/// Actions permitted in one stage
pub struct ActionRegistry {
    stage: Stage,
    tools: Vec<Arc<dyn StageTool>>,
}

impl ActionRegistry {
    pub fn for_stage(stage: Stage) -> Self {
        let record: Option<Arc<dyn StageTool>> = match stage {
            Stage::Requirements => Some(Arc::new(RecordTool::<LabRequirements> {
                wrap: Action::SetLabRequirements,
            })),
            Stage::Title => Some(Arc::new(RecordTool::<LabTitle> {
                wrap: Action::SetLabTitle,
            })),
            Stage::Briefing => Some(Arc::new(RecordTool::<BriefingInput> {
                wrap: Action::SetBriefing,
            })),
            Stage::Questions => Some(Arc::new(RecordTool::<Question> {
                wrap: Action::CreateQuestion,
            })),
            Stage::Complete => None,
        };

        let mut tools: Vec<Arc<dyn StageTool>> = record.into_iter().collect();
        if !stage.is_terminal() {
            tools.push(Arc::new(TransferTool));
        }

        Self { stage, tools }
    }

    /// Tool definitions for the LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Parse a tool call, rejecting actions the stage does not permit
    pub fn parse(&self, name: &str, input: &Value) -> Result<Action, ActionError> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ActionError::NotPermitted {
                action: name.to_string(),
                stage: self.stage,
            })?
            .parse(input)
    }
}
