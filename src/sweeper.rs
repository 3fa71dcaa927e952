//! Background eviction of idle sequences.
//!
//! One sweeper serves the whole process. Stateful models register their
//! sequence manager on load (when `idle_sequence_cleanup` is enabled) and
//! unregister on retirement; the periodic task walks the registry and evicts
//! quiescent sequences without ever blocking a request path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::sequence_manager::SequenceManager;

pub struct SequenceSweeper {
    managers: Mutex<HashMap<(String, u64), Weak<SequenceManager>>>,
    interval: Duration,
    max_idle: Duration,
}

impl SequenceSweeper {
    pub fn new(interval: Duration, max_idle: Duration) -> Self {
        SequenceSweeper {
            managers: Mutex::new(HashMap::new()),
            interval,
            max_idle,
        }
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    pub fn register(&self, manager: &Arc<SequenceManager>) {
        let key = (
            manager.model_name().to_string(),
            manager.model_version(),
        );
        debug!(model = %key.0, version = key.1, "registered for idle sequence cleanup");
        let mut managers = self
            .managers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        managers.insert(key, Arc::downgrade(manager));
    }

    pub fn unregister(&self, model_name: &str, model_version: u64) {
        let mut managers = self
            .managers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if managers
            .remove(&(model_name.to_string(), model_version))
            .is_some()
        {
            debug!(model = model_name, version = model_version, "unregistered from idle sequence cleanup");
        }
    }

    /// One sweep over every registered manager. Dead registrations are
    /// dropped along the way. Returns the number of evicted sequences.
    pub async fn sweep_all(&self) -> usize {
        let managers: Vec<Arc<SequenceManager>> = {
            let mut registry = self
                .managers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registry.retain(|_, weak| weak.strong_count() > 0);
            registry.values().filter_map(Weak::upgrade).collect()
        };
        let now = Instant::now();
        let mut removed = 0;
        for manager in managers {
            removed += manager.sweep_idle(now, self.max_idle).await;
        }
        removed
    }

    /// Spawns the periodic sweep task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                max_idle_secs = self.max_idle.as_secs(),
                "starting idle sequence sweeper"
            );
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh server
            // does not sweep at startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep_all().await;
                if removed > 0 {
                    debug!(removed, "idle sequence sweep finished");
                }
            }
        })
    }
}
