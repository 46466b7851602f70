//! Checkpoint reporter
//!
//! Side task that publishes the scan thread's progress to the coordinator
//! at a fixed interval. Checkpoints are fire-and-forget progress markers;
//! their second job is keeping the link visibly alive so the coordinator's
//! liveness timeout only fires for workers that are actually gone.

use crate::protocol::{write_message_to_write_half, CheckpointMessage, Message};
use crate::worker::SharedWriter;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodic checkpoint publisher for one sub-job.
pub struct CheckpointReporter {
    write_half: SharedWriter,
    worker_id: String,
    attack_id: u64,
    partition_index: usize,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CheckpointReporter {
    /// Spawn the reporter task. It publishes `progress` every
    /// `interval_ms`, repeating unchanged values: a stalled-but-alive scan
    /// must still look alive to the coordinator's read timeout.
    pub fn spawn(
        write_half: SharedWriter,
        worker_id: String,
        attack_id: u64,
        partition_index: usize,
        progress: Arc<AtomicU64>,
        interval_ms: u64,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task_write_half = Arc::clone(&write_half);
        let task_worker_id = worker_id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let current = progress.load(Ordering::Relaxed);
                        let msg = Message::Checkpoint(CheckpointMessage {
                            worker_id: task_worker_id.clone(),
                            attack_id,
                            partition_index,
                            current_index: current as usize,
                        });
                        let mut write = task_write_half.lock().await;
                        if write_message_to_write_half(&mut write, &msg).await.is_err() {
                            // Link is gone; the session task handles teardown.
                            break;
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        Self {
            write_half,
            worker_id,
            attack_id,
            partition_index,
            stop_tx,
            handle,
        }
    }

    /// Stop the periodic task and publish one final checkpoint, normally
    /// the partition's end index.
    pub async fn finish(self, final_index: usize) -> Result<()> {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;

        let msg = Message::Checkpoint(CheckpointMessage {
            worker_id: self.worker_id.clone(),
            attack_id: self.attack_id,
            partition_index: self.partition_index,
            current_index: final_index,
        });
        let mut write = self.write_half.lock().await;
        write_message_to_write_half(&mut write, &msg)
            .await
            .context("Failed to send final checkpoint")
    }

    /// Stop the periodic task without a final checkpoint, used when the
    /// sub-job dies and the progress value is no longer meaningful.
    pub async fn abort(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}
