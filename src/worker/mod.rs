//! Worker service
//!
//! Runs on each worker node. The service:
//! - Listens for connections from the coordinator
//! - Handshakes protocol version and dictionary length
//! - Scans dispatched partitions against the ciphertext
//! - Publishes periodic checkpoints while scanning
//! - Reports guesses, completion, or permanent partition failure
//!
//! The scan itself is pure CPU work and runs on a blocking thread; the
//! session task stays on the runtime, pumping scan events onto the wire and
//! keeping the checkpoint reporter alive.

pub mod checkpoint;

use crate::cipher::{provision, Cipher, CipherError};
use crate::config::TuningConfig;
use crate::dictionary::{DictionaryView, RangeError};
use crate::protocol::*;
use crate::worker::checkpoint::CheckpointReporter;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Write half of the coordinator link, shared between the session task and
/// the checkpoint reporter.
pub(crate) type SharedWriter = Arc<tokio::sync::Mutex<tokio::net::tcp::OwnedWriteHalf>>;

/// Scan-side failures. Everything here condemns at least the whole sub-job;
/// per-key rejections are handled inside the scan loop and never surface.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The ciphertext can never be decrypted, under any key.
    #[error("partition unprocessable: {0}")]
    PartitionCorrupt(String),

    /// The decrypt capability disappeared mid-scan. The partition itself is
    /// fine; the worker is not.
    #[error("cipher backend '{0}' unavailable")]
    Unavailable(String),

    #[error(transparent)]
    Range(#[from] RangeError),
}

impl ScanError {
    /// True for failures that condemn the worker process, not just the
    /// sub-job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Unavailable(_))
    }
}

/// Event stream from the scan thread to the session task. Events arrive in
/// scan order, so an advance past an index can never overtake a guess found
/// at that index.
enum ScanEvent {
    Guess { line_index: usize, guess: Guess },
    Scanned { next_index: usize },
}

/// Worker service
pub struct WorkerService {
    worker_id: String,
    dictionary: DictionaryView,
    cipher: Arc<dyn Cipher>,
    tuning: TuningConfig,
}

impl WorkerService {
    /// Create a worker service. A cipher backend that cannot be provisioned
    /// is fatal: a worker without its decrypt capability is useless.
    pub fn new(
        dictionary: DictionaryView,
        cipher_name: &str,
        tuning: TuningConfig,
    ) -> Result<Self> {
        let cipher = provision(cipher_name)
            .with_context(|| format!("Failed to provision cipher backend '{}'", cipher_name))?;

        Ok(Self {
            worker_id: node_hostname(),
            dictionary,
            cipher: Arc::from(cipher),
            tuning,
        })
    }

    /// Bind the listen port and serve coordinator sessions forever.
    pub async fn run(self, listen_port: u16) -> Result<()> {
        let addr = format!("0.0.0.0:{}", listen_port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind worker on {}", addr))?;
        self.serve(listener).await
    }

    /// Serve coordinator sessions on an already-bound listener, one at a
    /// time. The coordinator holds a single long-lived connection and sends
    /// sub-jobs serially over it.
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        let port = listener
            .local_addr()
            .context("Failed to read worker listen address")?
            .port();
        self.worker_id = format!("{}:{}", self.worker_id, port);

        println!("keysweep worker {} listening", self.worker_id);
        println!("  Dictionary: {} keys", self.dictionary.count_all_lines());
        println!("  Cipher: {}", self.cipher.name());

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .context("Failed to accept coordinator connection")?;
            println!("Coordinator connected from {}", peer);

            if let Err(e) = self.handle_session(stream).await {
                if e.downcast_ref::<ScanError>().map_or(false, |s| s.is_fatal()) {
                    return Err(e.context("Worker shutting down"));
                }
                eprintln!("Session with {} ended: {:#}", peer, e);
            }
            println!("Waiting for next coordinator connection...");
        }
    }

    /// Drive one coordinator session: handshake, then scan sub-jobs until
    /// the connection drops.
    async fn handle_session(&self, mut stream: TcpStream) -> Result<()> {
        let handshake = match read_message(&mut stream).await? {
            Message::Handshake(handshake) => handshake,
            other => anyhow::bail!("Expected HANDSHAKE, got {:?}", other),
        };

        let dictionary_len = self.dictionary.count_all_lines();
        write_message(
            &mut stream,
            &Message::Hello(HelloMessage {
                protocol_version: PROTOCOL_VERSION,
                worker_id: self.worker_id.clone(),
                dictionary_len,
            }),
        )
        .await
        .context("Failed to send hello")?;

        if handshake.protocol_version != PROTOCOL_VERSION {
            anyhow::bail!(
                "Protocol version mismatch: coordinator={}, worker={}",
                handshake.protocol_version,
                PROTOCOL_VERSION
            );
        }
        if handshake.dictionary_len != dictionary_len {
            anyhow::bail!(
                "Dictionary mismatch: coordinator has {} lines, this worker has {}",
                handshake.dictionary_len,
                dictionary_len
            );
        }

        let (mut read_half, write_half) = stream.into_split();
        let write_half: SharedWriter = Arc::new(tokio::sync::Mutex::new(write_half));

        loop {
            match read_message_from_read_half(&mut read_half).await? {
                Message::SubJob(job) => {
                    println!(
                        "Sub-job: attack {} partition {} {} (resume {})",
                        job.attack_id, job.partition_index, job.partition, job.resume_index
                    );
                    self.run_sub_job(job, Arc::clone(&write_half)).await?;
                }
                other => {
                    println!("Unexpected message from coordinator: {:?}", other);
                }
            }
        }
    }

    /// Scan one partition, streaming checkpoints and guesses while the scan
    /// thread works through the key range.
    async fn run_sub_job(&self, job: SubJobMessage, write_half: SharedWriter) -> Result<()> {
        let view = match self.dictionary.restrict(job.partition.min, job.partition.max) {
            Ok(view) => view,
            Err(e) => {
                // Partition outside this worker's dictionary copy; nothing
                // to scan and nothing another worker could do differently.
                return self
                    .send_partition_failed(&write_half, &job, &e.to_string())
                    .await;
            }
        };

        let resume_index = job.resume_index.clamp(job.partition.min, job.partition.max);
        let mut view = view;
        view.seek(resume_index as i64 - job.partition.min as i64);

        let progress = Arc::new(AtomicU64::new(resume_index as u64));
        let reporter = CheckpointReporter::spawn(
            Arc::clone(&write_half),
            self.worker_id.clone(),
            job.attack_id,
            job.partition_index,
            Arc::clone(&progress),
            self.tuning.checkpoint_interval_ms,
        );

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let cipher = Arc::clone(&self.cipher);
        let cipher_text = job.cipher_text.clone();
        let known_text = job.known_text.clone();
        let scan_handle = tokio::task::spawn_blocking(move || {
            scan_partition(view, &*cipher, &cipher_text, &known_text, &event_tx)
        });

        // The channel closes when the scan thread finishes and drops its
        // sender, so this pump drains every guess before the join below.
        // Progress is advanced here, in event order, only after the guesses
        // found before it are on the wire: a checkpoint published from the
        // progress cell can never cover an undelivered guess, so a resumed
        // partition re-scans at most lines whose guesses already arrived.
        while let Some(event) = event_rx.recv().await {
            match event {
                ScanEvent::Guess { line_index, guess } => {
                    println!("Match at line {}: '{}'", line_index, guess.key);
                    let msg = Message::FoundGuess(FoundGuessMessage {
                        worker_id: self.worker_id.clone(),
                        attack_id: job.attack_id,
                        partition_index: job.partition_index,
                        line_index,
                        guess,
                    });
                    if let Err(e) = self.deliver_with_retry(&write_half, &msg).await {
                        reporter.abort().await;
                        return Err(e);
                    }
                }
                ScanEvent::Scanned { next_index } => {
                    progress.store(next_index as u64, Ordering::Relaxed);
                }
            }
        }

        let scan_result = scan_handle.await.context("Scan thread panicked")?;

        match scan_result {
            Ok(()) => {
                reporter.finish(job.partition.max).await?;
                let mut write = write_half.lock().await;
                write_message_to_write_half(
                    &mut write,
                    &Message::PartitionDone(PartitionDoneMessage {
                        worker_id: self.worker_id.clone(),
                        attack_id: job.attack_id,
                        partition_index: job.partition_index,
                    }),
                )
                .await
                .context("Failed to send completion")?;
                println!(
                    "Partition {} of attack {} done",
                    job.partition_index, job.attack_id
                );
                Ok(())
            }
            Err(e) => {
                eprintln!(
                    "Partition {} of attack {} failed: {}",
                    job.partition_index, job.attack_id, e
                );
                reporter.abort().await;
                if e.is_fatal() {
                    // No PartitionFailed here: the partition is scannable,
                    // this worker is not. Dropping the link lets the
                    // coordinator resume it on another worker.
                    return Err(anyhow::Error::new(e).context("Cipher capability lost"));
                }
                self.send_partition_failed(&write_half, &job, &e.to_string())
                    .await
            }
        }
    }

    async fn send_partition_failed(
        &self,
        write_half: &SharedWriter,
        job: &SubJobMessage,
        error: &str,
    ) -> Result<()> {
        let mut write = write_half.lock().await;
        write_message_to_write_half(
            &mut write,
            &Message::PartitionFailed(PartitionFailedMessage {
                worker_id: self.worker_id.clone(),
                attack_id: job.attack_id,
                partition_index: job.partition_index,
                error: error.to_string(),
            }),
        )
        .await
        .context("Failed to send partition failure")
    }

    /// Deliver a guess, retrying with backoff. A guess is never dropped
    /// silently: if delivery keeps failing the whole session is given up,
    /// and the coordinator rescans the partition elsewhere.
    async fn deliver_with_retry(&self, write_half: &SharedWriter, msg: &Message) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=self.tuning.delivery_retry_max {
            let result = {
                let mut write = write_half.lock().await;
                write_message_to_write_half(&mut write, msg).await
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    eprintln!(
                        "Guess delivery attempt {}/{} failed: {:#}",
                        attempt, self.tuning.delivery_retry_max, e
                    );
                    last_err = Some(e);
                    sleep(Duration::from_millis(self.tuning.delivery_retry_backoff_ms)).await;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("delivery retry budget is zero"))
            .context("Failed to deliver guess, abandoning session"))
    }
}

/// Walk the view's key range, trying every candidate against the
/// ciphertext. Never touches the published progress directly: each advance
/// goes through the event channel behind any guess found at that index, and
/// the session task applies them in order.
fn scan_partition(
    mut view: DictionaryView,
    cipher: &dyn Cipher,
    cipher_text: &[u8],
    known_text: &[u8],
    events: &mpsc::UnboundedSender<ScanEvent>,
) -> Result<(), ScanError> {
    while view.ready() {
        let index = view.position();
        let key = view.read_line()?.to_string();

        match cipher.decrypt(&key, cipher_text) {
            Ok(message) => {
                if contains_subslice(&message, known_text) {
                    // Send failure means the session is tearing down.
                    let _ = events.send(ScanEvent::Guess {
                        line_index: index,
                        guess: Guess { key, message },
                    });
                }
            }
            Err(CipherError::KeyRejected) => {}
            Err(CipherError::MalformedCiphertext(m)) => {
                return Err(ScanError::PartitionCorrupt(m));
            }
            Err(CipherError::Unavailable(name)) => {
                return Err(ScanError::Unavailable(name));
            }
        }

        let _ = events.send(ScanEvent::Scanned {
            next_index: index + 1,
        });
    }
    Ok(())
}

/// Substring search over bytes. An empty fragment matches anything.
fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn node_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
