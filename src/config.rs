//! Service configuration from environment variables

use crate::state_machine::state::DEFAULT_MAX_STEPS;
use crate::state_machine::HistoryPolicy;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3004;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    /// SQLite file for durable threads; in-memory when unset
    pub db_path: Option<PathBuf>,
    pub history_policy: HistoryPolicy,
    pub max_steps_per_turn: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: None,
            history_policy: HistoryPolicy::default(),
            max_steps_per_turn: DEFAULT_MAX_STEPS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values fall back to defaults
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let port = lookup("LAB_BUILDER_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let db_path = lookup("LAB_BUILDER_DB_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let history_policy = match lookup("LAB_BUILDER_HISTORY_POLICY") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring LAB_BUILDER_HISTORY_POLICY");
                defaults.history_policy
            }),
            None => defaults.history_policy,
        };

        let max_steps_per_turn = lookup("LAB_BUILDER_MAX_STEPS")
            .and_then(|s| s.parse().ok())
            .filter(|&n: &u32| n > 0)
            .unwrap_or(defaults.max_steps_per_turn);

        Self {
            port,
            db_path,
            history_policy,
            max_steps_per_turn,
        }
    }
}
