//! Live-sequence tracking with per-sequence serialization.
//!
//! The manager lock is held only long enough to resolve or insert a sequence
//! and take its per-sequence lock; it is released before inference runs, so
//! requests on distinct sequences proceed in parallel while requests on the
//! same sequence serialize in manager-lock arrival order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::sequence::{Sequence, SequenceMemoryState};
use crate::status::StatusCode;

/// Sequence control signals carried by the `sequence_control_input` tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceControl {
    NoControl,
    Start,
    End,
}

impl SequenceControl {
    pub const NO_CONTROL_INPUT: u32 = 0;
    pub const SEQUENCE_START: u32 = 1;
    pub const SEQUENCE_END: u32 = 2;

    /// The wire value set is closed; anything else is rejected.
    pub fn from_u32(raw: u32) -> Result<Self, StatusCode> {
        match raw {
            Self::NO_CONTROL_INPUT => Ok(SequenceControl::NoControl),
            Self::SEQUENCE_START => Ok(SequenceControl::Start),
            Self::SEQUENCE_END => Ok(SequenceControl::End),
            _ => Err(StatusCode::InvalidSequenceControlInput),
        }
    }
}

/// Ephemeral per-request routing decision extracted during validation. On a
/// `Start` with id 0 the manager fills in the assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceProcessingSpec {
    pub control: SequenceControl,
    pub sequence_id: u64,
}

impl SequenceProcessingSpec {
    pub fn new(control: SequenceControl, sequence_id: u64) -> Self {
        SequenceProcessingSpec {
            control,
            sequence_id,
        }
    }
}

/// A sequence bound to one in-flight request. Holds the per-sequence lock;
/// dropping it releases the sequence for the next request.
pub struct BoundSequence {
    sequence: Arc<Sequence>,
    guard: OwnedMutexGuard<SequenceMemoryState>,
}

impl BoundSequence {
    pub fn id(&self) -> u64 {
        self.sequence.id()
    }

    pub fn memory(&self) -> &SequenceMemoryState {
        &self.guard
    }

    pub fn memory_mut(&mut self) -> &mut SequenceMemoryState {
        &mut self.guard
    }
}

pub struct SequenceManager {
    model_name: String,
    model_version: u64,
    max_sequence_number: u32,
    sequences: AsyncMutex<BTreeMap<u64, Arc<Sequence>>>,
    auto_id: AtomicU64,
}

impl SequenceManager {
    pub fn new(max_sequence_number: u32, model_name: impl Into<String>, model_version: u64) -> Self {
        SequenceManager {
            model_name: model_name.into(),
            model_version,
            max_sequence_number,
            sequences: AsyncMutex::new(BTreeMap::new()),
            auto_id: AtomicU64::new(1),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_version(&self) -> u64 {
        self.model_version
    }

    pub fn max_sequence_number(&self) -> u32 {
        self.max_sequence_number
    }

    /// Applies the requested lifecycle transition and takes the per-sequence
    /// lock, all under the manager lock; the manager lock is released before
    /// this returns.
    pub async fn bind(&self, spec: &mut SequenceProcessingSpec) -> Result<BoundSequence, StatusCode> {
        let mut sequences = self.sequences.lock().await;
        let sequence = self.process_spec(&mut sequences, spec)?;
        // Waiting here keeps manager-lock arrival order as the per-sequence
        // serialization order.
        let guard = sequence.lock_owned().await;
        drop(sequences);
        Ok(BoundSequence { sequence, guard })
    }

    fn process_spec(
        &self,
        sequences: &mut BTreeMap<u64, Arc<Sequence>>,
        spec: &mut SequenceProcessingSpec,
    ) -> Result<Arc<Sequence>, StatusCode> {
        match spec.control {
            SequenceControl::Start => {
                if spec.sequence_id != 0 && sequences.contains_key(&spec.sequence_id) {
                    return Err(StatusCode::SequenceAlreadyExists);
                }
                if sequences.len() >= self.max_sequence_number as usize {
                    debug!(
                        model = %self.model_name,
                        version = self.model_version,
                        max = self.max_sequence_number,
                        "max sequence number reached"
                    );
                    return Err(StatusCode::MaxSequenceNumberReached);
                }
                if spec.sequence_id == 0 {
                    spec.sequence_id = self.assign_id(sequences);
                }
                let sequence = Arc::new(Sequence::new(spec.sequence_id));
                sequences.insert(spec.sequence_id, Arc::clone(&sequence));
                debug!(
                    model = %self.model_name,
                    version = self.model_version,
                    sequence_id = spec.sequence_id,
                    "sequence started"
                );
                Ok(sequence)
            }
            SequenceControl::NoControl | SequenceControl::End => {
                if spec.sequence_id == 0 {
                    return Err(StatusCode::SequenceIdNotProvided);
                }
                let sequence = sequences
                    .get(&spec.sequence_id)
                    .cloned()
                    .ok_or(StatusCode::SequenceMissing)?;
                sequence.touch();
                Ok(sequence)
            }
        }
    }

    /// Picks a fresh nonzero id that is not currently live.
    fn assign_id(&self, sequences: &BTreeMap<u64, Arc<Sequence>>) -> u64 {
        loop {
            let candidate = self.auto_id.fetch_add(1, Ordering::Relaxed);
            if candidate != 0 && !sequences.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Removes a sequence. The caller must not hold the per-sequence lock.
    pub async fn remove(&self, sequence_id: u64) -> Result<(), StatusCode> {
        let mut sequences = self.sequences.lock().await;
        sequences
            .remove(&sequence_id)
            .map(|_| ())
            .ok_or(StatusCode::SequenceMissing)
    }

    pub async fn has_sequence(&self, sequence_id: u64) -> bool {
        self.sequences.lock().await.contains_key(&sequence_id)
    }

    pub async fn sequence_count(&self) -> usize {
        self.sequences.lock().await.len()
    }

    /// Drops every live sequence; used on retirement.
    pub async fn clear(&self) {
        self.sequences.lock().await.clear();
    }

    /// Evicts sequences idle past `max_idle` whose lock is free right now.
    /// Contended sequences are skipped and retried on the next tick.
    pub async fn sweep_idle(&self, now: Instant, max_idle: Duration) -> usize {
        let mut sequences = self.sequences.lock().await;
        let stale: Vec<u64> = sequences
            .iter()
            .filter(|(_, sequence)| {
                sequence.idle_for(now) > max_idle && sequence.try_lock_owned().is_some()
            })
            .map(|(&id, _)| id)
            .collect();
        for id in &stale {
            sequences.remove(id);
        }
        if !stale.is_empty() {
            debug!(
                model = %self.model_name,
                version = self.model_version,
                removed = stale.len(),
                "swept idle sequences"
            );
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SequenceManager {
        SequenceManager::new(4, "test-model", 1)
    }

    async fn start(manager: &SequenceManager, id: u64) -> Result<u64, StatusCode> {
        let mut spec = SequenceProcessingSpec::new(SequenceControl::Start, id);
        manager.bind(&mut spec).await?;
        Ok(spec.sequence_id)
    }

    #[tokio::test]
    async fn start_creates_and_duplicate_start_fails() {
        let manager = manager();
        start(&manager, 42).await.expect("first start");
        assert!(manager.has_sequence(42).await);
        assert_eq!(
            start(&manager, 42).await,
            Err(StatusCode::SequenceAlreadyExists)
        );
    }

    #[tokio::test]
    async fn start_with_zero_assigns_a_fresh_live_id() {
        let manager = manager();
        let first = start(&manager, 0).await.expect("assigned id");
        let second = start(&manager, 0).await.expect("assigned id");
        assert_ne!(first, 0);
        assert_ne!(second, 0);
        assert_ne!(first, second);
        assert!(manager.has_sequence(first).await);
        assert!(manager.has_sequence(second).await);
    }

    #[tokio::test]
    async fn assigned_ids_skip_live_sequences() {
        let manager = manager();
        start(&manager, 1).await.expect("client-chosen id");
        let assigned = start(&manager, 0).await.expect("assigned id");
        assert_ne!(assigned, 1);
    }

    #[tokio::test]
    async fn missing_sequence_is_reported_for_continue_and_end() {
        let manager = manager();
        for control in [SequenceControl::NoControl, SequenceControl::End] {
            let mut spec = SequenceProcessingSpec::new(control, 9);
            assert!(matches!(
                manager.bind(&mut spec).await,
                Err(StatusCode::SequenceMissing)
            ));
        }
    }

    #[tokio::test]
    async fn zero_id_without_start_is_rejected() {
        let manager = manager();
        let mut spec = SequenceProcessingSpec::new(SequenceControl::NoControl, 0);
        assert!(matches!(
            manager.bind(&mut spec).await,
            Err(StatusCode::SequenceIdNotProvided)
        ));
    }

    #[tokio::test]
    async fn capacity_cap_is_enforced() {
        let manager = manager();
        for id in 1..=4 {
            start(&manager, id).await.expect("under cap");
        }
        assert_eq!(
            start(&manager, 5).await,
            Err(StatusCode::MaxSequenceNumberReached)
        );
        manager.remove(1).await.expect("remove");
        start(&manager, 5).await.expect("capacity freed");
    }

    #[tokio::test]
    async fn remove_missing_sequence_fails() {
        let manager = manager();
        assert_eq!(manager.remove(3).await, Err(StatusCode::SequenceMissing));
    }

    #[tokio::test]
    async fn sweep_evicts_idle_but_skips_held_sequences() {
        let manager = manager();
        start(&manager, 1).await.expect("start");
        start(&manager, 2).await.expect("start");

        // Hold sequence 1 the way an in-flight request would.
        let mut spec = SequenceProcessingSpec::new(SequenceControl::NoControl, 1);
        let bound = manager.bind(&mut spec).await.expect("bind");

        let later = Instant::now() + Duration::from_secs(60);
        let removed = manager.sweep_idle(later, Duration::from_secs(1)).await;
        assert_eq!(removed, 1);
        assert!(manager.has_sequence(1).await);
        assert!(!manager.has_sequence(2).await);

        drop(bound);
        let removed = manager.sweep_idle(later, Duration::from_secs(1)).await;
        assert_eq!(removed, 1);
        assert_eq!(manager.sequence_count().await, 0);
    }

    #[tokio::test]
    async fn fresh_sequences_survive_the_sweep() {
        let manager = manager();
        start(&manager, 1).await.expect("start");
        let removed = manager
            .sweep_idle(Instant::now(), Duration::from_secs(60))
            .await;
        assert_eq!(removed, 0);
        assert!(manager.has_sequence(1).await);
    }
}
