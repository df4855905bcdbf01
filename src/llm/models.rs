//! Model definitions
//!
//! All chat models the service can route to, in one table.

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID
    pub id: &'static str,
    /// Name sent to the provider API
    pub api_name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gpt-4.1",
            api_name: "gpt-4.1",
            description: "GPT-4.1 (default, strong tool use)",
            context_window: 1_000_000,
        },
        ModelDef {
            id: "gpt-4.1-mini",
            api_name: "gpt-4.1-mini",
            description: "GPT-4.1 Mini (fast, cheap)",
            context_window: 1_000_000,
        },
        ModelDef {
            id: "gpt-4o",
            api_name: "gpt-4o",
            description: "GPT-4o (balanced)",
            context_window: 128_000,
        },
        ModelDef {
            id: "gpt-4o-mini",
            api_name: "gpt-4o-mini",
            description: "GPT-4o Mini (fast, efficient)",
            context_window: 128_000,
        },
    ]
}

/// Look up a model definition by ID
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    all_models().iter().find(|m| m.id == id)
}
