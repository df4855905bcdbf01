//! The lab-building flow graph

use crate::lab::LabRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node of the flow graph, in graph order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Requirements,
    Title,
    Briefing,
    Questions,
    Complete,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Requirements,
        Stage::Title,
        Stage::Briefing,
        Stage::Questions,
        Stage::Complete,
    ];

    /// The stage a transfer leads to, `None` from the terminal stage
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Requirements => Some(Stage::Title),
            Stage::Title => Some(Stage::Briefing),
            Stage::Briefing => Some(Stage::Questions),
            Stage::Questions => Some(Stage::Complete),
            Stage::Complete => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Requirements => "requirements",
            Stage::Title => "title",
            Stage::Briefing => "briefing",
            Stage::Questions => "questions",
            Stage::Complete => "complete",
        }
    }

    /// Whether the record this stage produces is present
    pub fn precondition_met(self, lab: &LabRecord) -> bool {
        match self {
            Stage::Requirements => lab.requirements.is_some(),
            Stage::Title => lab.title.is_some(),
            Stage::Briefing => lab.briefing.is_some(),
            Stage::Questions => !lab.questions.is_empty(),
            Stage::Complete => false,
        }
    }

    /// What is missing before the stage can be left
    pub fn precondition(self) -> &'static str {
        match self {
            Stage::Requirements => "the lab requirements have been set",
            Stage::Title => "a lab title has been set",
            Stage::Briefing => "a briefing has been set",
            Stage::Questions => "at least one question has been created",
            Stage::Complete => "never (this is the final stage)",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
