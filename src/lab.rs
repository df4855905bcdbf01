//! Lab domain records
//!
//! The structured data a conversation accumulates: requirements, title,
//! briefing and quiz questions. Every record validates its own invariants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inclusive difficulty bounds
pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 7;

/// Minimum number of options for a multiple-choice question
pub const MIN_OPTIONS: usize = 2;

/// Invariant violations on lab records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("difficulty_level must be between {MIN_DIFFICULTY} and {MAX_DIFFICULTY}, got {0}")]
    DifficultyOutOfRange(i64),
    #[error("a question needs at least {MIN_OPTIONS} options, got {0}")]
    TooFewOptions(usize),
    #[error("correct_option_index {index} is out of bounds for {len} options")]
    CorrectOptionOutOfBounds { index: i64, len: usize },
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty { field })
    } else {
        Ok(())
    }
}

/// Requirements needed to create a lab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabRequirements {
    pub topic: String,
    pub target_persona: String,
    /// Kept wide so out-of-range model output reaches `validate` instead of
    /// failing as a decode error
    #[serde(default = "default_difficulty")]
    pub difficulty_level: i64,
}

fn default_difficulty() -> i64 {
    i64::from(MIN_DIFFICULTY)
}

impl LabRequirements {
    pub fn new(
        topic: impl Into<String>,
        target_persona: impl Into<String>,
        difficulty_level: i64,
    ) -> Result<Self, ValidationError> {
        let requirements = Self {
            topic: topic.into(),
            target_persona: target_persona.into(),
            difficulty_level,
        };
        requirements.validate()?;
        Ok(requirements)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("topic", &self.topic)?;
        require_text("target_persona", &self.target_persona)?;
        let range = i64::from(MIN_DIFFICULTY)..=i64::from(MAX_DIFFICULTY);
        if !range.contains(&self.difficulty_level) {
            return Err(ValidationError::DifficultyOutOfRange(self.difficulty_level));
        }
        Ok(())
    }
}

/// A proposed lab title with the reasoning shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabTitle {
    pub title: String,
    #[serde(default)]
    pub explanation: String,
}

impl LabTitle {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)
    }
}

/// Input for replacing the briefing text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BriefingInput {
    pub briefing: String,
}

impl BriefingInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("briefing", &self.briefing)
    }
}

/// A multiple-choice quiz question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub title: String,
    pub options: Vec<String>,
    /// Zero-based index into `options`
    pub correct_option_index: i64,
}

impl Question {
    pub fn new(
        title: impl Into<String>,
        options: Vec<String>,
        correct_option_index: i64,
    ) -> Result<Self, ValidationError> {
        let question = Self {
            title: title.into(),
            options,
            correct_option_index,
        };
        question.validate()?;
        Ok(question)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        if self.options.len() < MIN_OPTIONS {
            return Err(ValidationError::TooFewOptions(self.options.len()));
        }
        for option in &self.options {
            require_text("option", option)?;
        }
        let in_bounds = usize::try_from(self.correct_option_index)
            .is_ok_and(|index| index < self.options.len());
        if !in_bounds {
            return Err(ValidationError::CorrectOptionOutOfBounds {
                index: self.correct_option_index,
                len: self.options.len(),
            });
        }
        Ok(())
    }

    /// The text of the correct option
    pub fn correct_option(&self) -> Option<&str> {
        usize::try_from(self.correct_option_index)
            .ok()
            .and_then(|index| self.options.get(index))
            .map(String::as_str)
    }
}

/// Structured state accumulated over the whole conversation.
///
/// Survives stage transfers even when message history is cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabRecord {
    #[serde(default)]
    pub requirements: Option<LabRequirements>,
    #[serde(default)]
    pub title: Option<LabTitle>,
    #[serde(default)]
    pub briefing: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl LabRecord {
    /// Validate every populated field
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(requirements) = &self.requirements {
            requirements.validate()?;
        }
        if let Some(title) = &self.title {
            title.validate()?;
        }
        if let Some(briefing) = &self.briefing {
            require_text("briefing", briefing)?;
        }
        for question in &self.questions {
            question.validate()?;
        }
        Ok(())
    }

    /// Render the record for a system prompt
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(req) = &self.requirements {
            lines.push(format!("Topic: {}", req.topic));
            lines.push(format!("Target persona: {}", req.target_persona));
            lines.push(format!(
                "Difficulty level: {} (of {MAX_DIFFICULTY})",
                req.difficulty_level
            ));
        }
        if let Some(title) = &self.title {
            lines.push(format!("Title: {}", title.title));
        }
        if let Some(briefing) = &self.briefing {
            lines.push(format!("Briefing: {briefing}"));
        }
        if !self.questions.is_empty() {
            lines.push(format!("Questions written so far: {}", self.questions.len()));
            for (i, q) in self.questions.iter().enumerate() {
                lines.push(format!("  {}. {}", i + 1, q.title));
            }
        }
        if lines.is_empty() {
            "(nothing gathered yet)".to_string()
        } else {
            lines.join("\n")
        }
    }
}
