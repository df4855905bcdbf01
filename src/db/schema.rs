//! Database schema and types

use crate::state_machine::{ConvState, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    stage TEXT NOT NULL DEFAULT 'requirements',
    state TEXT NOT NULL DEFAULT '{"type":"idle"}',
    snapshot TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_updated ON threads(updated_at DESC);
"#;

/// Phases that only exist while a turn is running
pub const RESET_IN_FLIGHT: &str = r#"
UPDATE threads
SET state = '{"type":"idle"}',
    snapshot = json_set(snapshot, '$.phase', json('{"type":"idle"}')),
    updated_at = ?1
WHERE json_extract(state, '$.type') NOT IN ('idle', 'error')
"#;

/// Thread listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub stage: Stage,
    pub state: ConvState,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
