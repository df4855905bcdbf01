//! API request and response types

use crate::db::ThreadSummary;
use crate::lab::LabRecord;
use crate::runtime::TurnRequest;
use crate::state_machine::{StreamEvent, ThreadValues};
use serde::{Deserialize, Serialize};

/// Thread used by `POST /` when the body names none
pub const DEFAULT_THREAD_ID: &str = "1";

/// Lab data the client already holds for this thread
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabContext {
    #[serde(default)]
    pub lab: LabRecord,
}

/// Body of every turn-starting request
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub message: Option<String>,
    /// Only read by `POST /`; thread routes take the id from the path
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub context: Option<LabContext>,
}

impl RunRequest {
    pub fn into_turn(self) -> TurnRequest {
        TurnRequest {
            message: self.message,
            context: self.context.map(|c| c.lab),
        }
    }
}

/// Result of running a turn without streaming
#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub events: Vec<StreamEvent>,
    pub values: ThreadValues,
}

/// Response with a list of threads
#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<ThreadSummary>,
}

/// Response for a newly created thread
#[derive(Debug, Serialize)]
pub struct ThreadCreatedResponse {
    pub thread_id: String,
    pub values: ThreadValues,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
