//! Session Driver
//!
//! Entry point for user input. Resolves the user's state in the
//! [`ContextStore`], runs one turn through the [`Orchestrator`], and commits
//! the grown history only when the turn succeeds.
//!
//! Turns for the same user are serialized by a per-user gate; turns for
//! different users run fully in parallel. The gates live here rather than in
//! the store so a context clear never leaves an in-flight turn holding a gate
//! that a later turn cannot see.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as TurnGate, OwnedMutexGuard};
use tracing::{debug, info};

use crate::context::ContextStore;
use crate::error::{AgentError, Result};
use crate::orchestrator::{Orchestrator, TurnControl};

/// Input that wipes the user's context instead of starting a turn
pub const CLEAR_CONTEXT_COMMAND: &str = "clear my context";

/// Whether `input` is the clear-context command (case-insensitive)
pub fn is_clear_command(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case(CLEAR_CONTEXT_COMMAND)
}

/// What a handled input produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Final answer of a completed turn
    Answer(String),

    /// The user's context was wiped; no turn ran
    ContextCleared,
}

impl Reply {
    /// Text to show the user
    pub fn text(&self) -> &str {
        match self {
            Reply::Answer(text) => text,
            Reply::ContextCleared => "Context cleared.",
        }
    }
}

type GateMap = Mutex<HashMap<String, Arc<TurnGate<()>>>>;

/// Drives turns against the context store
pub struct SessionDriver {
    store: Arc<dyn ContextStore>,
    orchestrator: Arc<Orchestrator>,
    gates: GateMap,
}

/// One caller's handle on a user's turn gate.
///
/// Handles are only created under the map lock, so when the last one drops
/// the entry is removed and idle users leave nothing behind.
struct GateLease<'a> {
    gates: &'a GateMap,
    user_id: String,
    gate: Arc<TurnGate<()>>,
}

impl GateLease<'_> {
    async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.gate.clone().lock_owned().await
    }
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        // The map's handle plus ours: nobody else is waiting on or holding it.
        let last = Arc::strong_count(&self.gate) == 2
            && gates.get(&self.user_id).is_some_and(|g| Arc::ptr_eq(g, &self.gate));
        if last {
            gates.remove(&self.user_id);
        }
    }
}

impl SessionDriver {
    pub fn new(store: Arc<dyn ContextStore>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn lease(&self, user_id: &str) -> GateLease<'_> {
        let gate = self
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.to_string())
            .or_default()
            .clone();
        GateLease {
            gates: &self.gates,
            user_id: user_id.to_string(),
            gate,
        }
    }

    /// Users with a turn or clear queued or running
    pub fn busy_users(&self) -> usize {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Handle one input for `user_id`
    pub async fn handle(&self, user_id: &str, input: &str) -> Result<Reply> {
        self.handle_with(user_id, input, &TurnControl::default()).await
    }

    /// Handle one input with live events and cancellation.
    ///
    /// On failure or cancellation the stored history is left exactly as it
    /// was before the call.
    pub async fn handle_with(&self, user_id: &str, input: &str, control: &TurnControl) -> Result<Reply> {
        let lease = self.lease(user_id);
        let _turn = tokio::select! {
            biased;
            _ = control.cancel_token().cancelled() => return Err(AgentError::Cancelled),
            guard = lease.acquire() => guard,
        };

        if is_clear_command(input) {
            self.store.clear(user_id);
            info!(user_id = %user_id, "Context cleared on request");
            return Ok(Reply::ContextCleared);
        }

        let history = self
            .store
            .get_or_create(user_id)
            .read(|state| state.history.clone());

        let outcome = self.orchestrator.run(user_id, &history, input, control).await?;
        debug!(
            user_id = %user_id,
            before = history.len(),
            after = outcome.messages.len(),
            "Committing turn"
        );

        // Only the history is replaced so preferences written by tools during
        // the turn survive the commit.
        let mut grown = Some(outcome.messages);
        self.store.modify(user_id, &mut |state| {
            if let Some(messages) = grown.take() {
                state.history = messages;
            }
        });

        Ok(Reply::Answer(outcome.answer))
    }

    /// Wipe the user's context once any in-flight turn has finished
    pub async fn clear(&self, user_id: &str) {
        let lease = self.lease(user_id);
        let _turn = lease.acquire().await;
        self.store.clear(user_id);
        info!(user_id = %user_id, "Context cleared");
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContextStore;
    use crate::message::Message;
    use crate::orchestrator::OrchestratorBuilder;
    use crate::provider::scripted::{ScriptedProvider, ScriptedRound};

    fn driver(rounds: Vec<ScriptedRound>) -> (SessionDriver, Arc<MemoryContextStore>) {
        let store = Arc::new(MemoryContextStore::new());
        let orchestrator = OrchestratorBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(rounds)))
            .build()
            .unwrap();
        (SessionDriver::new(store.clone(), Arc::new(orchestrator)), store)
    }

    #[test]
    fn test_clear_command_matching() {
        assert!(is_clear_command("clear my context"));
        assert!(is_clear_command("  Clear My CONTEXT "));
        assert!(!is_clear_command("please clear my context"));
    }

    #[tokio::test]
    async fn test_answer_commits_history() {
        let (driver, store) = driver(vec![ScriptedRound::text(&["Hi there"])]);

        let reply = driver.handle("u1", "hello").await.unwrap();
        assert_eq!(reply, Reply::Answer("Hi there".into()));

        let state = store.get_or_create("u1").snapshot();
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[0].content, "hello");
    }

    #[tokio::test]
    async fn test_clear_command_bypasses_turn() {
        let (driver, store) = driver(vec![]);
        store.modify("u1", &mut |s| s.history.push(Message::user("old")));
        store.set_preference("u1", "city", "Paris");

        let reply = driver.handle("u1", "CLEAR MY CONTEXT").await.unwrap();
        assert_eq!(reply, Reply::ContextCleared);

        let state = store.get_or_create("u1").snapshot();
        assert!(state.history.is_empty());
        assert!(state.preferences.is_empty());
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_history_untouched() {
        let (driver, store) = driver(vec![ScriptedRound::failure("", "backend down")]);
        store.modify("u1", &mut |s| s.history.push(Message::user("kept")));

        let err = driver.handle("u1", "hello").await.unwrap_err();
        assert!(err.is_turn_failure());

        let state = store.get_or_create("u1").snapshot();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].content, "kept");
    }

    #[tokio::test]
    async fn test_gates_are_dropped_once_idle() {
        let store = Arc::new(MemoryContextStore::new());
        let provider = ScriptedProvider::new(vec![]).with_fallback(ScriptedRound::text(&["hi"]));
        let orchestrator = OrchestratorBuilder::new()
            .provider(Arc::new(provider))
            .build()
            .unwrap();
        let driver = SessionDriver::new(store.clone(), Arc::new(orchestrator));

        for i in 0..100 {
            let user = format!("user-{}", i);
            driver.handle(&user, "hi").await.unwrap();
            driver.clear(&user).await;
        }
        let (a, b) = tokio::join!(driver.handle("u1", "one"), driver.handle("u1", "two"));
        a.unwrap();
        b.unwrap();
        assert_eq!(driver.handle("u1", "clear my context").await.unwrap(), Reply::ContextCleared);

        assert_eq!(store.len(), 0);
        assert_eq!(driver.busy_users(), 0);
    }

    #[tokio::test]
    async fn test_failed_turn_releases_gate() {
        let (driver, _store) = driver(vec![ScriptedRound::failure("", "backend down")]);
        driver.handle("u1", "hello").await.unwrap_err();
        assert_eq!(driver.busy_users(), 0);
    }
}
