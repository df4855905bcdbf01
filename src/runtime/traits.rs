//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Database, DbError, ThreadSummary};
use crate::llm::{LlmError, LlmRequest, LlmResponse, ModelRegistry};
use crate::state_machine::ThreadState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Checkpoint storage for thread state
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Load a thread, `None` if it was never saved
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>, String>;

    /// Save the full thread state
    async fn save(&self, thread: &ThreadState) -> Result<(), String>;

    /// All known threads, most recently updated first
    async fn list(&self) -> Result<Vec<ThreadSummary>, String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete an LLM request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ThreadStore + ?Sized> ThreadStore for Arc<T> {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>, String> {
        (**self).load(thread_id).await
    }

    async fn save(&self, thread: &ThreadState) -> Result<(), String> {
        (**self).save(thread).await
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>, String> {
        (**self).list().await
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

struct StoredThread {
    thread: ThreadState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory checkpoint keyed by thread id; contents are lost on restart
#[derive(Default)]
pub struct MemoryStore {
    threads: RwLock<HashMap<String, StoredThread>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>, String> {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        Ok(threads.get(thread_id).map(|stored| stored.thread.clone()))
    }

    async fn save(&self, thread: &ThreadState) -> Result<(), String> {
        let now = Utc::now();
        let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
        threads
            .entry(thread.thread_id.clone())
            .and_modify(|stored| {
                stored.thread = thread.clone();
                stored.updated_at = now;
            })
            .or_insert_with(|| StoredThread {
                thread: thread.clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>, String> {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        let mut summaries: Vec<ThreadSummary> = threads
            .values()
            .map(|stored| ThreadSummary {
                id: stored.thread.thread_id.clone(),
                stage: stored.thread.stage,
                state: stored.thread.phase.clone(),
                message_count: i64::try_from(stored.thread.messages.len()).unwrap_or(i64::MAX),
                created_at: stored.created_at,
                updated_at: stored.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

/// Adapter to use Database as a ThreadStore
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ThreadStore for DatabaseStorage {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>, String> {
        match self.db.get_thread(thread_id) {
            Ok(thread) => Ok(Some(thread)),
            Err(DbError::ThreadNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn save(&self, thread: &ThreadState) -> Result<(), String> {
        self.db.save_thread(thread).map_err(|e| e.to_string())
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>, String> {
        self.db.list_threads().map_err(|e| e.to_string())
    }
}

/// Adapter to use ModelRegistry as LlmClient
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }
}

#[async_trait]
impl LlmClient for RegistryLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let llm = self
            .registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::auth("No LLM available; set OPENAI_API_KEY"))?;
        llm.complete(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
