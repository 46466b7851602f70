//! Sub-job dispatch
//!
//! The coordinator keeps one link task per configured worker. Each link
//! pulls sub-jobs from a shared queue, drives them over its TCP connection,
//! and feeds the worker's reports back into the attack registry.
//!
//! Liveness is enforced on the read side: a worker that is scanning sends a
//! checkpoint at least every `checkpoint_interval_ms`, so a read that sits
//! silent for `liveness_timeout_ms` means the worker (or its link) is gone.
//! The abandoned sub-job goes back on the queue with its resume index set to
//! the last received checkpoint, until the reassignment budget runs out and
//! the partition is written off as failed.

use crate::config::TuningConfig;
use crate::coordinator::registry::{Attack, AttackRegistry, ReassignDecision};
use crate::dictionary::Partition;
use crate::protocol::*;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// One partition's worth of work for one attack.
#[derive(Debug, Clone)]
pub struct SubJob {
    pub attack_id: u64,
    pub partition_index: usize,
    pub partition: Partition,
    pub resume_index: usize,
    pub cipher_text: Arc<Vec<u8>>,
    pub known_text: Arc<Vec<u8>>,
}

/// Shared sub-job queue.
///
/// Unbounded: the queue only ever holds at most one sub-job per partition,
/// and partitions are bounded by the dictionary size. Every link task holds
/// the same receiver behind a mutex, so an idle worker picks up whatever
/// arrives first.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<SubJob>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<SubJob>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn push(&self, job: SubJob) {
        // Send only fails when the receiver is gone, i.e. during shutdown.
        let _ = self.tx.send(job);
    }

    async fn pull(&self) -> Option<SubJob> {
        self.rx.lock().await.recv().await
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// How a driven sub-job ended on the wire.
enum DriveOutcome {
    /// Worker reported the partition done or permanently failed.
    Resolved,
    /// The connection died or the worker went silent past the liveness
    /// timeout; the sub-job may need reassignment.
    Abandoned,
}

/// Link task for one worker.
///
/// Connects (and reconnects) to the worker, performs the handshake, then
/// pulls and drives sub-jobs until the queue closes.
pub async fn worker_link(
    worker_addr: String,
    queue: JobQueue,
    registry: Arc<AttackRegistry>,
    dictionary_len: usize,
    tuning: TuningConfig,
) {
    loop {
        let mut stream = connect_worker(&worker_addr, dictionary_len, &tuning).await;

        println!("Worker {} connected", worker_addr);

        loop {
            let job = match queue.pull().await {
                Some(job) => job,
                None => return,
            };

            let attack = match registry.get(job.attack_id).await {
                Ok(attack) => attack,
                Err(_) => {
                    // Attack already collected; stale sub-job.
                    println!(
                        "Dropping sub-job for collected attack {} (partition {})",
                        job.attack_id, job.partition_index
                    );
                    continue;
                }
            };

            attack.record_dispatch(job.partition_index).await;

            match drive_sub_job(&mut stream, &job, &attack, &tuning).await {
                Ok(DriveOutcome::Resolved) => continue,
                Ok(DriveOutcome::Abandoned) | Err(_) => {
                    handle_abandoned(&queue, &job, &attack, &tuning, &worker_addr).await;
                    break; // reconnect with a fresh stream
                }
            }
        }
    }
}

/// Connect to a worker and complete the handshake, retrying forever with a
/// fixed backoff. The link task is aborted externally when the coordinator
/// shuts down.
async fn connect_worker(
    worker_addr: &str,
    dictionary_len: usize,
    tuning: &TuningConfig,
) -> TcpStream {
    loop {
        match try_connect_worker(worker_addr, dictionary_len).await {
            Ok(stream) => return stream,
            Err(e) => {
                eprintln!("Worker {} unavailable: {:#}", worker_addr, e);
                sleep(Duration::from_millis(tuning.reconnect_backoff_ms)).await;
            }
        }
    }
}

async fn try_connect_worker(worker_addr: &str, dictionary_len: usize) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(worker_addr)
        .await
        .with_context(|| format!("Failed to connect to worker {}", worker_addr))?;

    write_message(
        &mut stream,
        &Message::Handshake(HandshakeMessage {
            protocol_version: PROTOCOL_VERSION,
            dictionary_len,
        }),
    )
    .await
    .context("Failed to send handshake")?;

    match read_message(&mut stream).await.context("Failed to read hello")? {
        Message::Hello(hello) => {
            if hello.protocol_version != PROTOCOL_VERSION {
                anyhow::bail!(
                    "Protocol version mismatch with {}: coordinator={}, worker={}",
                    worker_addr,
                    PROTOCOL_VERSION,
                    hello.protocol_version
                );
            }
            if hello.dictionary_len != dictionary_len {
                anyhow::bail!(
                    "Dictionary mismatch with {}: coordinator has {} lines, worker has {}",
                    worker_addr,
                    dictionary_len,
                    hello.dictionary_len
                );
            }
            println!("Worker {} identified as {}", worker_addr, hello.worker_id);
            Ok(stream)
        }
        other => anyhow::bail!("Expected HELLO from {}, got {:?}", worker_addr, other),
    }
}

/// Send one sub-job and consume reports until the partition resolves or the
/// worker goes silent.
async fn drive_sub_job(
    stream: &mut TcpStream,
    job: &SubJob,
    attack: &Arc<Attack>,
    tuning: &TuningConfig,
) -> Result<DriveOutcome> {
    write_message(
        stream,
        &Message::SubJob(SubJobMessage {
            attack_id: job.attack_id,
            partition_index: job.partition_index,
            partition: job.partition,
            resume_index: job.resume_index,
            cipher_text: (*job.cipher_text).clone(),
            known_text: (*job.known_text).clone(),
        }),
    )
    .await
    .context("Failed to send sub-job")?;

    let liveness = Duration::from_millis(tuning.liveness_timeout_ms);

    loop {
        let msg = match tokio::time::timeout(liveness, read_message(stream)).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => {
                eprintln!("Worker link error: {:#}", e);
                return Ok(DriveOutcome::Abandoned);
            }
            Err(_) => {
                eprintln!(
                    "Worker silent for {}ms on attack {} partition {}",
                    tuning.liveness_timeout_ms, job.attack_id, job.partition_index
                );
                return Ok(DriveOutcome::Abandoned);
            }
        };

        match msg {
            Message::Checkpoint(cp) => {
                if cp.attack_id != job.attack_id || cp.partition_index != job.partition_index {
                    println!(
                        "Dropping stray checkpoint from {} (attack {} partition {})",
                        cp.worker_id, cp.attack_id, cp.partition_index
                    );
                    continue;
                }
                if !attack.record_checkpoint(cp.partition_index, cp.current_index).await {
                    println!(
                        "Dropping checkpoint for resolved partition {} of attack {}",
                        cp.partition_index, cp.attack_id
                    );
                }
            }
            Message::FoundGuess(found) => {
                if found.attack_id != job.attack_id {
                    println!(
                        "Dropping stray guess from {} (attack {})",
                        found.worker_id, found.attack_id
                    );
                    continue;
                }
                println!(
                    "Guess from {}: key '{}' (line {})",
                    found.worker_id, found.guess.key, found.line_index
                );
                attack.record_guess(found.guess).await;
            }
            Message::PartitionDone(done) => {
                if done.attack_id != job.attack_id || done.partition_index != job.partition_index {
                    println!(
                        "Dropping stray completion from {} (attack {} partition {})",
                        done.worker_id, done.attack_id, done.partition_index
                    );
                    continue;
                }
                if !attack.complete_partition(done.partition_index).await {
                    println!(
                        "Dropping duplicate completion for partition {} of attack {}",
                        done.partition_index, done.attack_id
                    );
                }
                return Ok(DriveOutcome::Resolved);
            }
            Message::PartitionFailed(failed) => {
                if failed.attack_id != job.attack_id
                    || failed.partition_index != job.partition_index
                {
                    println!(
                        "Dropping stray failure from {} (attack {} partition {})",
                        failed.worker_id, failed.attack_id, failed.partition_index
                    );
                    continue;
                }
                eprintln!(
                    "Partition {} of attack {} failed on {}: {}",
                    failed.partition_index, failed.attack_id, failed.worker_id, failed.error
                );
                attack.fail_partition(failed.partition_index).await;
                return Ok(DriveOutcome::Resolved);
            }
            other => {
                println!("Unexpected message from worker: {:?}", other);
            }
        }
    }
}

/// Decide what happens to a sub-job whose worker went silent: requeue from
/// the last checkpoint, or fail the partition once the budget is spent.
async fn handle_abandoned(
    queue: &JobQueue,
    job: &SubJob,
    attack: &Arc<Attack>,
    tuning: &TuningConfig,
    worker_addr: &str,
) {
    match attack
        .reassign_or_fail(job.partition_index, tuning.max_reassignments)
        .await
    {
        ReassignDecision::Requeue { resume_index } => {
            println!(
                "Requeueing partition {} of attack {} from index {} (worker {} lost)",
                job.partition_index, job.attack_id, resume_index, worker_addr
            );
            let mut requeued = job.clone();
            requeued.resume_index = resume_index;
            queue.push(requeued);
        }
        ReassignDecision::GiveUp => {
            eprintln!(
                "Giving up on partition {} of attack {} after {} reassignments",
                job.partition_index, job.attack_id, tuning.max_reassignments
            );
        }
        ReassignDecision::AlreadyResolved => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn job(attack_id: u64, partition_index: usize) -> SubJob {
        SubJob {
            attack_id,
            partition_index,
            partition: Partition::new(0, 10),
            resume_index: 0,
            cipher_text: Arc::new(vec![0u8; 8]),
            known_text: Arc::new(b"frag".to_vec()),
        }
    }

    #[tokio::test]
    async fn test_queue_delivers_in_order() {
        let queue = JobQueue::new();
        queue.push(job(1, 0));
        queue.push(job(1, 1));

        let first = queue.pull().await.unwrap();
        let second = queue.pull().await.unwrap();
        assert_eq!(first.partition_index, 0);
        assert_eq!(second.partition_index, 1);
    }

    #[tokio::test]
    async fn test_queue_is_shared_between_consumers() {
        let queue = JobQueue::new();
        let other = queue.clone();
        queue.push(job(1, 0));

        // A clone drains the same underlying channel.
        let pulled = other.pull().await.unwrap();
        assert_eq!(pulled.attack_id, 1);
    }

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        (accepted.unwrap().0, connected.unwrap())
    }

    #[tokio::test]
    async fn test_silent_worker_is_abandoned_and_requeued_from_checkpoint() {
        let (mut coordinator_side, mut worker_side) = tcp_pair().await;

        // Fake worker: acknowledge the sub-job with one checkpoint at line
        // 5, then go quiet with the link still open.
        let silent_worker = tokio::spawn(async move {
            let dispatched = match read_message(&mut worker_side).await.unwrap() {
                Message::SubJob(dispatched) => dispatched,
                other => panic!("expected sub-job, got {:?}", other),
            };
            write_message(
                &mut worker_side,
                &Message::Checkpoint(CheckpointMessage {
                    worker_id: "fake:9901".to_string(),
                    attack_id: dispatched.attack_id,
                    partition_index: dispatched.partition_index,
                    current_index: 5,
                }),
            )
            .await
            .unwrap();
            sleep(Duration::from_secs(30)).await;
        });

        let registry = AttackRegistry::new();
        let attack = registry.register(&[Partition::new(0, 10)]).await;
        attack.record_dispatch(0).await;

        let tuning = TuningConfig {
            liveness_timeout_ms: 100,
            ..TuningConfig::default()
        };
        let sub_job = job(attack.id(), 0);

        let outcome = drive_sub_job(&mut coordinator_side, &sub_job, &attack, &tuning)
            .await
            .unwrap();
        assert!(matches!(outcome, DriveOutcome::Abandoned));

        let queue = JobQueue::new();
        handle_abandoned(&queue, &sub_job, &attack, &tuning, "fake:9901").await;

        let requeued = queue.pull().await.expect("abandoned sub-job must be requeued");
        assert_eq!(requeued.partition_index, 0);
        assert_eq!(requeued.resume_index, 5, "resume from the last checkpoint");

        // Net of the reassignment the partition is still outstanding, with
        // the same resume point available to the next dispatch.
        assert_eq!(
            attack.reassign_or_fail(0, 99).await,
            ReassignDecision::Requeue { resume_index: 5 }
        );

        silent_worker.abort();
    }
}
