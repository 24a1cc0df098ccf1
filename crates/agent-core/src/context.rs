//! Per-user Context Store
//!
//! Memory-resident conversation state, one [`ConversationState`] per user id.
//! Everything here lives for the lifetime of the process and is lost on
//! restart.
//!
//! Locking is two-level: the index maps user ids to shared
//! [`UserContext`] handles and is locked only for the lookup itself, never
//! across an `.await`; each handle guards its own state. Work on different
//! users therefore never waits on anything but a hash-map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Conversation state for one user
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationState {
    /// Stable user identifier
    pub user_id: String,

    /// Conversation history, in conversational order (no system prompt)
    pub history: Vec<Message>,

    /// User preferences, last write wins
    pub preferences: HashMap<String, String>,

    /// Refreshed on every read-modify-write
    pub last_active_at: DateTime<Utc>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            history: Vec::new(),
            preferences: HashMap::new(),
            last_active_at: now,
            created_at: now,
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

/// Shared handle to one user's state
#[derive(Debug)]
pub struct UserContext {
    user_id: String,
    state: Mutex<ConversationState>,
}

impl UserContext {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: Mutex::new(ConversationState::new(user_id)),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // A panic while holding the lock cannot leave the state half-written in a
    // way later readers care about, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ConversationState {
        self.lock().clone()
    }

    /// Read without copying
    pub fn read<R>(&self, f: impl FnOnce(&ConversationState) -> R) -> R {
        f(&self.lock())
    }

    /// Atomic read-modify-write; refreshes `last_active_at`
    pub fn modify<R>(&self, f: impl FnOnce(&mut ConversationState) -> R) -> R {
        let mut state = self.lock();
        let out = f(&mut state);
        state.touch();
        out
    }
}

/// Shared per-user handle returned by the store
pub type SharedContext = Arc<UserContext>;

/// Store of per-user conversation state
pub trait ContextStore: Send + Sync {
    /// Return the user's state, creating it on first access. Concurrent first
    /// calls for the same id all observe the same instance.
    fn get_or_create(&self, user_id: &str) -> SharedContext;

    /// Return the user's state if it exists
    fn get(&self, user_id: &str) -> Option<SharedContext>;

    /// Replace the stored state for `state.user_id`; last writer wins
    fn update(&self, state: ConversationState);

    /// Remove the user's state. Unknown users are not an error.
    fn clear(&self, user_id: &str);

    /// Ids of all users with state
    fn user_ids(&self) -> Vec<String>;

    /// Atomic read-modify-write of one user's state
    fn modify(&self, user_id: &str, f: &mut dyn FnMut(&mut ConversationState)) {
        self.get_or_create(user_id).modify(|state| f(state));
    }

    /// Set a preference (last write wins)
    fn set_preference(&self, user_id: &str, key: &str, value: &str) {
        self.get_or_create(user_id).modify(|state| {
            state.preferences.insert(key.to_string(), value.to_string());
        });
    }

    /// Read a preference
    fn preference(&self, user_id: &str, key: &str) -> Option<String> {
        self.get_or_create(user_id)
            .read(|state| state.preferences.get(key).cloned())
    }
}

/// In-memory context store
#[derive(Default)]
pub struct MemoryContextStore {
    contexts: RwLock<HashMap<String, SharedContext>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with state
    pub fn len(&self) -> usize {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContextStore for MemoryContextStore {
    fn get_or_create(&self, user_id: &str) -> SharedContext {
        if let Some(ctx) = self.get(user_id) {
            return ctx;
        }

        // Re-check under the write lock: another caller may have won the race.
        let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        contexts
            .entry(user_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(user_id = %user_id, "Creating conversation state");
                Arc::new(UserContext::new(user_id))
            })
            .clone()
    }

    fn get(&self, user_id: &str) -> Option<SharedContext> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    fn update(&self, mut state: ConversationState) {
        let ctx = self.get_or_create(&state.user_id);
        tracing::debug!(user_id = %state.user_id, messages = state.history.len(), "Updating conversation state");
        ctx.modify(|current| {
            state.touch();
            *current = state;
        });
    }

    fn clear(&self, user_id: &str) {
        let removed = self
            .contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
        tracing::debug!(user_id = %user_id, existed = removed.is_some(), "Cleared conversation state");
    }

    fn user_ids(&self) -> Vec<String> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}
