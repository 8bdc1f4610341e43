//! Simulation Scheduler state: running flag, chat-id cache and the random
//! choices made on each tick.
//!
//! The timing loop itself lives in [`crate::server`], which owns the task
//! handle; this module only decides *what* a tick does.

use std::time::Duration;

use pulse_core::seed::{random_body, random_sender};
use pulse_core::{ChatStore, StoreError};
use rand::seq::SliceRandom;
use rand::Rng;

/// Upper bound on chats pulled into the id cache.
pub const CHAT_ID_CACHE_LIMIT: usize = 999;

/// A message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender: &'static str,
    pub body: &'static str,
}

impl MessageDraft {
    pub fn random(rng: &mut impl Rng) -> Self {
        Self {
            sender: random_sender(rng),
            body: random_body(rng),
        }
    }
}

/// Scheduler state. `Stopped` is `running == false`.
#[derive(Debug, Default)]
pub struct SimulationState {
    running: bool,
    chat_ids: Vec<i64>,
}

impl SimulationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Replace the chat-id cache wholesale from the store.
    pub fn refresh_chat_ids(&mut self, store: &dyn ChatStore) -> Result<usize, StoreError> {
        self.chat_ids = store
            .get_chats(CHAT_ID_CACHE_LIMIT, 0)?
            .into_iter()
            .map(|chat| chat.id)
            .collect();
        Ok(self.chat_ids.len())
    }

    pub fn chat_ids(&self) -> &[i64] {
        &self.chat_ids
    }

    /// Uniform pick from the cache; `None` when it is empty.
    pub fn random_chat_id(&self, rng: &mut impl Rng) -> Option<i64> {
        self.chat_ids.choose(rng).copied()
    }
}

/// Uniform delay in `[min, max]` (inclusive, millisecond resolution).
///
/// Bounds beyond `u64::MAX` milliseconds saturate.
pub fn random_delay(range: (Duration, Duration), rng: &mut impl Rng) -> Duration {
    let (min, max) = range;
    let min_ms = whole_millis(min);
    let max_ms = whole_millis(max).max(min_ms);
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
