//! Attack coordinator
//!
//! The coordinator owns the dictionary, partitions each submitted attack
//! across its workers, and resolves the attack once every partition has
//! been scanned or written off. It:
//! - Maintains one link task per configured worker
//! - Accepts attack submissions from clients
//! - Splits the dictionary into balanced partitions per attack
//! - Collects guesses and partition outcomes from workers
//! - Reassigns partitions abandoned by dead workers

pub mod dispatch;
pub mod registry;

use crate::config::Config;
use crate::coordinator::dispatch::{worker_link, JobQueue, SubJob};
use crate::coordinator::registry::AttackRegistry;
use crate::dictionary::{balanced_split, DictionaryView};
use crate::protocol::*;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Attack coordinator
pub struct Coordinator {
    config: Config,
    worker_addresses: Vec<String>,
    dictionary: DictionaryView,
    registry: Arc<AttackRegistry>,
    queue: JobQueue,
}

impl Coordinator {
    /// Create a coordinator, loading the dictionary from the configuration.
    pub fn new(config: Config, worker_addresses: Vec<String>) -> Result<Self> {
        if worker_addresses.is_empty() {
            anyhow::bail!("No workers specified for coordinator mode");
        }

        let dictionary = DictionaryView::load(&config.dictionary)?;
        if dictionary.is_empty() {
            eprintln!("Warning: dictionary is empty, attacks will resolve with no guesses");
        }

        Ok(Self {
            config,
            worker_addresses,
            dictionary,
            registry: Arc::new(AttackRegistry::new()),
            queue: JobQueue::new(),
        })
    }

    /// Run the coordinator: start worker links and accept attack
    /// submissions until the process is stopped.
    pub async fn run(self, listen_port: u16) -> Result<()> {
        println!("keysweep coordinator");
        println!("  Dictionary: {} keys", self.dictionary.count_all_lines());
        println!("  Workers: {}", self.worker_addresses.len());

        let coordinator = Arc::new(self);
        coordinator.spawn_worker_links();

        let addr = format!("0.0.0.0:{}", listen_port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind coordinator on {}", addr))?;
        println!("Accepting attack submissions on port {}", listen_port);

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .context("Failed to accept client connection")?;
            println!("Client connected from {}", peer);

            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                if let Err(e) = handle_client(coordinator, stream).await {
                    eprintln!("Client {} session failed: {:#}", peer, e);
                }
            });
        }
    }

    /// Spawn one link task per configured worker. Links reconnect on their
    /// own, so this is only done once.
    fn spawn_worker_links(self: &Arc<Self>) {
        for addr in &self.worker_addresses {
            tokio::spawn(worker_link(
                addr.clone(),
                self.queue.clone(),
                Arc::clone(&self.registry),
                self.dictionary.count_all_lines(),
                self.config.tuning.clone(),
            ));
        }
    }

    /// Run one attack to resolution: partition the dictionary, dispatch the
    /// sub-jobs, and block until every partition is done or written off.
    ///
    /// Returns the attack id, the collected guesses, and whether the whole
    /// dictionary was actually covered.
    pub async fn attack(
        &self,
        cipher_text: Vec<u8>,
        known_text: Vec<u8>,
    ) -> Result<(u64, Vec<Guess>, bool)> {
        let mut view = self.dictionary.clone();
        let n = self.config.effective_partitions(self.worker_addresses.len());
        let partitions = balanced_split(&mut view, n)?;

        let attack = self.registry.register(&partitions).await;
        let attack_id = attack.id();
        println!(
            "Attack {}: {} partitions over {} keys",
            attack_id,
            partitions.len(),
            view.count_lines()
        );

        let cipher_text = Arc::new(cipher_text);
        let known_text = Arc::new(known_text);
        for (partition_index, &partition) in partitions.iter().enumerate() {
            self.queue.push(SubJob {
                attack_id,
                partition_index,
                partition,
                resume_index: partition.min,
                cipher_text: Arc::clone(&cipher_text),
                known_text: Arc::clone(&known_text),
            });
        }

        attack.wait_resolved().await;
        let (guesses, complete) = attack.take_result().await;
        self.registry.remove(attack_id).await;

        println!(
            "Attack {} resolved: {} guesses, {}",
            attack_id,
            guesses.len(),
            if complete { "complete" } else { "partial" }
        );
        Ok((attack_id, guesses, complete))
    }
}

/// Serve one submitting client: read the attack request, run the attack to
/// resolution, send the response back.
async fn handle_client(coordinator: Arc<Coordinator>, mut stream: TcpStream) -> Result<()> {
    match read_message(&mut stream).await? {
        Message::AttackRequest(request) => {
            let (attack_id, guesses, complete) = coordinator
                .attack(request.cipher_text, request.known_text)
                .await?;
            write_message(
                &mut stream,
                &Message::AttackResponse(AttackResponseMessage {
                    attack_id,
                    guesses,
                    complete,
                }),
            )
            .await
            .context("Failed to send attack response")?;
            Ok(())
        }
        other => anyhow::bail!("Expected ATTACK_REQUEST from client, got {:?}", other),
    }
}
