//! Runtime for executing conversations
//!
//! Owns the per-thread turn locks and spawns one `ConversationRuntime` task
//! per turn. Stream events flow back to the caller over an mpsc channel that
//! closes when the turn is over.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;
pub use traits::*;

use crate::db::ThreadSummary;
use crate::lab::{LabRecord, ValidationError};
use crate::state_machine::{
    ConvContext, ConvState, Event, HistoryPolicy, StreamEvent, ThreadState, ThreadValues,
    TransitionError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};

/// Shared store handle used in production
pub type SharedStore = Arc<dyn ThreadStore>;

/// Shared model client handle used in production
pub type SharedLlm = Arc<dyn LlmClient>;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = ConversationRuntime<SharedStore, SharedLlm>;

/// Capacity of the per-turn stream channel
const STREAM_BUFFER: usize = 64;

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Held for the duration of one turn. Dropping it releases the thread and
/// removes the map entry once nobody else refers to it.
struct ThreadLock {
    thread_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for ThreadLock {
    fn drop(&mut self) {
        // Release first so the guard's reference is not counted below
        drop(self.guard.take());
        prune_lock(&self.locks, &self.thread_id);
    }
}

/// Remove a thread's entry if the map holds its only reference
fn prune_lock(locks: &LockMap, thread_id: &str) {
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    // New references are only taken under this mutex
    if locks
        .get(thread_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(thread_id);
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("A turn is already running on thread {0}")]
    Busy(String),
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Thread {0} already has history; a message is required")]
    MissingMessage(String),
    #[error("Invalid lab context: {0}")]
    InvalidContext(#[from] ValidationError),
    #[error("Storage error: {0}")]
    Store(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Client input for one turn
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub message: Option<String>,
    pub context: Option<LabRecord>,
}

/// Manager for all conversation runtimes
pub struct RuntimeManager {
    store: SharedStore,
    llm: SharedLlm,
    history_policy: HistoryPolicy,
    max_steps: u32,
    locks: LockMap,
}

impl RuntimeManager {
    pub fn new(store: SharedStore, llm: SharedLlm) -> Self {
        Self {
            store,
            llm,
            history_policy: HistoryPolicy::default(),
            max_steps: crate::state_machine::state::DEFAULT_MAX_STEPS,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_history_policy(mut self, policy: HistoryPolicy) -> Self {
        self.history_policy = policy;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    fn context(&self, thread_id: &str) -> ConvContext {
        ConvContext::new(thread_id)
            .with_history_policy(self.history_policy)
            .with_max_steps(self.max_steps)
    }

    /// Take the thread's turn lock without waiting
    fn try_lock_thread(&self, thread_id: &str) -> Result<ThreadLock, RuntimeError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(thread_id.to_string()).or_default())
        };
        let Ok(guard) = lock.try_lock_owned() else {
            // The holder may have finished while we looked; drop its entry if so
            prune_lock(&self.locks, thread_id);
            return Err(RuntimeError::Busy(thread_id.to_string()));
        };
        Ok(ThreadLock {
            thread_id: thread_id.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        })
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Start a turn on a thread, creating the thread on first use.
    ///
    /// Returns the stream of events for this turn; the channel closes once
    /// the turn has settled and the thread lock has been released.
    pub async fn begin_turn(
        &self,
        thread_id: &str,
        request: TurnRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, RuntimeError> {
        let guard = self.try_lock_thread(thread_id)?;

        if let Some(lab) = &request.context {
            lab.validate()?;
        }

        let mut state = self
            .store
            .load(thread_id)
            .await
            .map_err(RuntimeError::Store)?
            .unwrap_or_else(|| ThreadState::new(thread_id));

        // We hold the lock, so a busy phase was left behind by a dead turn
        if state.phase.is_busy() {
            tracing::warn!(
                thread_id = %thread_id,
                state = state.phase.name(),
                "Recovering thread left mid-turn"
            );
            state.phase = ConvState::Idle;
        }

        let events = turn_events(&state, request)?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut runtime: ProductionRuntime = ConversationRuntime::new(
            self.context(thread_id),
            state,
            Arc::clone(&self.store),
            Arc::clone(&self.llm),
            tx,
        );

        let thread_id = thread_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = runtime.run_turn(events).await {
                tracing::warn!(thread_id = %thread_id, error = %e, "Turn ended with error");
            }
            // Unlock before the sink closes so a caller reacting to the end
            // of the stream can start the next turn immediately
            drop(guard);
            drop(runtime);
        });

        Ok(rx)
    }

    /// Current values of a thread
    pub async fn snapshot(&self, thread_id: &str) -> Result<ThreadValues, RuntimeError> {
        self.store
            .load(thread_id)
            .await
            .map_err(RuntimeError::Store)?
            .map(|state| state.values())
            .ok_or_else(|| RuntimeError::ThreadNotFound(thread_id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<ThreadSummary>, RuntimeError> {
        self.store.list().await.map_err(RuntimeError::Store)
    }

    /// Create and persist an empty thread with a fresh id
    pub async fn create_thread(&self) -> Result<ThreadState, RuntimeError> {
        let state = ThreadState::new(uuid::Uuid::new_v4().to_string());
        self.store.save(&state).await.map_err(RuntimeError::Store)?;
        tracing::info!(thread_id = %state.thread_id, "Created thread");
        Ok(state)
    }
}

/// Translate a turn request into the client events that start the turn
fn turn_events(state: &ThreadState, request: TurnRequest) -> Result<Vec<Event>, RuntimeError> {
    let seeded = request.context.is_some();
    let mut events: Vec<Event> = request
        .context
        .map(|lab| Event::SeedContext { lab })
        .into_iter()
        .collect();

    match request.message.filter(|m| !m.trim().is_empty()) {
        Some(text) => events.push(Event::user_message(text)),
        // Opening a thread, or just refreshing its lab data
        None if state.is_fresh() || seeded => events.push(Event::Start),
        None => return Err(RuntimeError::MissingMessage(state.thread_id.clone())),
    }
    Ok(events)
}
