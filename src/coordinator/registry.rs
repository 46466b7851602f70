//! Attack registry
//!
//! Shared bookkeeping between the client listener (which submits attacks and
//! waits for them) and the worker links (which report checkpoints, guesses,
//! and partition outcomes, possibly concurrently for the same attack).
//!
//! All per-attack mutable state sits behind one mutex so that the pending
//! count, the per-partition states, and the guess list can never be observed
//! mid-transition. A partition leaves the `Outstanding` state exactly once,
//! and only that transition decrements the pending count; duplicate or stray
//! reports from a worker that was already timed out are absorbed here and
//! never double-count.

use crate::dictionary::Partition;
use crate::protocol::Guess;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown attack id {0}")]
    NotFound(u64),
}

/// Lifecycle of one partition within an attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Dispatched (or queued for dispatch); a worker may be scanning it.
    Outstanding,
    /// Fully scanned.
    Done,
    /// Permanently unprocessable, either because the ciphertext is corrupt
    /// or because the reassignment budget was exhausted.
    Failed,
}

#[derive(Debug)]
struct PartitionSlot {
    partition: Partition,
    state: PartitionState,
    /// Highest line index confirmed scanned, used as the resume point when
    /// the partition is reassigned.
    checkpoint: usize,
    /// Dispatch count so far (1 after the first dispatch).
    attempts: u32,
}

#[derive(Debug, Default)]
struct Progress {
    slots: Vec<PartitionSlot>,
    guesses: Vec<Guess>,
    /// Partitions still in [`PartitionState::Outstanding`].
    pending: usize,
    /// Partitions that ended in [`PartitionState::Failed`].
    failed: usize,
}

impl Progress {
    fn resolved(&self) -> bool {
        self.pending == 0
    }
}

/// Outcome of asking the registry what to do with an abandoned sub-job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignDecision {
    /// Dispatch the partition again, resuming from the given line index.
    Requeue { resume_index: usize },
    /// Reassignment budget exhausted; the partition is now failed.
    GiveUp,
    /// The partition already resolved through another path; nothing to do.
    AlreadyResolved,
}

/// One in-flight attack.
#[derive(Debug)]
pub struct Attack {
    id: u64,
    progress: Mutex<Progress>,
    notify: Notify,
}

impl Attack {
    fn new(id: u64, partitions: &[Partition]) -> Self {
        let slots: Vec<PartitionSlot> = partitions
            .iter()
            .map(|&partition| PartitionSlot {
                partition,
                state: PartitionState::Outstanding,
                checkpoint: partition.min,
                attempts: 0,
            })
            .collect();
        let pending = slots.len();
        Self {
            id,
            progress: Mutex::new(Progress {
                slots,
                guesses: Vec::new(),
                pending,
                failed: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Count a dispatch of the given partition.
    pub async fn record_dispatch(&self, partition_index: usize) {
        let mut progress = self.progress.lock().await;
        if let Some(slot) = progress.slots.get_mut(partition_index) {
            slot.attempts += 1;
        }
    }

    /// Record a scan checkpoint. Checkpoints only ever move forward; a late
    /// report from a stale worker cannot rewind the resume point. Returns
    /// false for a stray report (unknown index or already-resolved
    /// partition).
    pub async fn record_checkpoint(&self, partition_index: usize, current_index: usize) -> bool {
        let mut progress = self.progress.lock().await;
        match progress.slots.get_mut(partition_index) {
            Some(slot) if slot.state == PartitionState::Outstanding => {
                slot.checkpoint = slot.checkpoint.max(current_index);
                true
            }
            _ => false,
        }
    }

    /// Record a matched key. Duplicate deliveries of the same key (a
    /// reassigned worker re-scanning lines before a guess that was already
    /// reported) collapse to one entry.
    pub async fn record_guess(&self, guess: Guess) {
        let mut progress = self.progress.lock().await;
        if !progress.guesses.iter().any(|g| g.key == guess.key) {
            progress.guesses.push(guess);
        }
    }

    /// Mark a partition fully scanned. Returns false for a stray report;
    /// the pending count is only ever decremented on the first resolution.
    pub async fn complete_partition(&self, partition_index: usize) -> bool {
        let mut progress = self.progress.lock().await;
        match progress.slots.get_mut(partition_index) {
            Some(slot) if slot.state == PartitionState::Outstanding => {
                slot.state = PartitionState::Done;
                slot.checkpoint = slot.partition.max;
                progress.pending -= 1;
                if progress.resolved() {
                    self.notify.notify_waiters();
                }
                true
            }
            _ => false,
        }
    }

    /// Mark a partition permanently failed. Returns false for a stray
    /// report.
    pub async fn fail_partition(&self, partition_index: usize) -> bool {
        let mut progress = self.progress.lock().await;
        match progress.slots.get_mut(partition_index) {
            Some(slot) if slot.state == PartitionState::Outstanding => {
                slot.state = PartitionState::Failed;
                progress.pending -= 1;
                progress.failed += 1;
                if progress.resolved() {
                    self.notify.notify_waiters();
                }
                true
            }
            _ => false,
        }
    }

    /// Decide the fate of a partition whose worker went silent.
    ///
    /// The attempt accounting and the possible failure transition happen
    /// under one lock acquisition, so the attack can never be observed with
    /// the partition neither outstanding nor resolved.
    pub async fn reassign_or_fail(
        &self,
        partition_index: usize,
        max_reassignments: u32,
    ) -> ReassignDecision {
        let mut progress = self.progress.lock().await;
        match progress.slots.get_mut(partition_index) {
            Some(slot) if slot.state == PartitionState::Outstanding => {
                // attempts counts dispatches, so `max_reassignments` extra
                // dispatches are allowed beyond the first.
                if slot.attempts > max_reassignments {
                    slot.state = PartitionState::Failed;
                    progress.pending -= 1;
                    progress.failed += 1;
                    if progress.resolved() {
                        self.notify.notify_waiters();
                    }
                    ReassignDecision::GiveUp
                } else {
                    let resume_index = slot.checkpoint;
                    ReassignDecision::Requeue { resume_index }
                }
            }
            _ => ReassignDecision::AlreadyResolved,
        }
    }

    /// Partition bounds for a slot, used when requeueing.
    pub async fn partition(&self, partition_index: usize) -> Option<Partition> {
        let progress = self.progress.lock().await;
        progress.slots.get(partition_index).map(|s| s.partition)
    }

    /// Wait until every partition has resolved (done or failed).
    pub async fn wait_resolved(&self) {
        loop {
            let notified = self.notify.notified();
            if self.progress.lock().await.resolved() {
                return;
            }
            notified.await;
        }
    }

    /// Collect the final result: the guesses gathered so far and whether
    /// every partition was actually scanned.
    pub async fn take_result(&self) -> (Vec<Guess>, bool) {
        let mut progress = self.progress.lock().await;
        let complete = progress.failed == 0;
        (std::mem::take(&mut progress.guesses), complete)
    }
}

/// Registry of in-flight attacks, keyed by attack id.
#[derive(Debug, Default)]
pub struct AttackRegistry {
    next_id: AtomicU64,
    attacks: Mutex<HashMap<u64, Arc<Attack>>>,
}

impl AttackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new attack over the given partitions and return it.
    pub async fn register(&self, partitions: &[Partition]) -> Arc<Attack> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let attack = Arc::new(Attack::new(id, partitions));
        self.attacks.lock().await.insert(id, Arc::clone(&attack));
        attack
    }

    pub async fn get(&self, attack_id: u64) -> Result<Arc<Attack>, RegistryError> {
        self.attacks
            .lock()
            .await
            .get(&attack_id)
            .cloned()
            .ok_or(RegistryError::NotFound(attack_id))
    }

    /// Drop a finished attack. Reports arriving afterwards resolve to
    /// [`RegistryError::NotFound`] and are discarded by the caller.
    pub async fn remove(&self, attack_id: u64) {
        self.attacks.lock().await.remove(&attack_id);
    }
}
