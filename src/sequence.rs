//! A single inference sequence: memory-state snapshot plus its lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::tensor::Tensor;

/// Memory blobs keyed by the runtime's state names.
pub type SequenceMemoryState = BTreeMap<String, Tensor>;

/// A live sequence. The memory map doubles as the per-sequence lock: holding
/// its guard serializes requests on this sequence.
pub struct Sequence {
    id: u64,
    memory: Arc<AsyncMutex<SequenceMemoryState>>,
    last_used: Mutex<Instant>,
}

impl Sequence {
    pub fn new(id: u64) -> Self {
        Sequence {
            id,
            memory: Arc::new(AsyncMutex::new(SequenceMemoryState::new())),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Refreshes the idle clock.
    pub fn touch(&self) {
        let mut last_used = self
            .last_used
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last_used = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        let last_used = self
            .last_used
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        now.saturating_duration_since(*last_used)
    }

    pub(crate) async fn lock_owned(&self) -> OwnedMutexGuard<SequenceMemoryState> {
        Arc::clone(&self.memory).lock_owned().await
    }

    /// Non-blocking lock attempt; used by the sweeper to skip sequences that
    /// are in flight.
    pub(crate) fn try_lock_owned(&self) -> Option<OwnedMutexGuard<SequenceMemoryState>> {
        Arc::clone(&self.memory).try_lock_owned().ok()
    }
}
