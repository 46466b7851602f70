//! keysweep CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use keysweep::cipher::provision;
use keysweep::config::{self, cli::Cli, ExecutionMode};
use keysweep::coordinator::Coordinator;
use keysweep::dictionary::DictionaryView;
use keysweep::protocol::{
    read_message, write_message, AttackRequestMessage, AttackResponseMessage, Message,
};
use keysweep::worker::WorkerService;

fn main() -> Result<()> {
    println!("keysweep v{}", env!("CARGO_PKG_VERSION"));
    println!("Distributed known-plaintext dictionary attack");
    println!();

    let cli = Cli::parse();
    cli.validate().map_err(|e| anyhow::anyhow!(e))?;

    match cli.mode {
        ExecutionMode::Attack => run_attack(cli),
        ExecutionMode::Coordinator => run_coordinator(cli),
        ExecutionMode::Worker => run_worker(cli),
        ExecutionMode::Encrypt => run_encrypt(cli),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create tokio runtime")
}

/// Run the coordinator: load the dictionary, link up with the workers, and
/// serve attack submissions.
fn run_coordinator(cli: Cli) -> Result<()> {
    let config = config::build_config(&cli)?;
    let workers = cli.worker_addresses()?;

    runtime()?.block_on(async {
        let coordinator =
            Coordinator::new(config, workers).context("Failed to create coordinator")?;
        coordinator.run(cli.listen_port).await
    })
}

/// Run a worker node: load the dictionary copy, provision the cipher, and
/// serve the coordinator.
fn run_worker(cli: Cli) -> Result<()> {
    let config = config::build_config(&cli)?;

    runtime()?.block_on(async {
        let dictionary = DictionaryView::load(&config.dictionary)?;
        let worker = WorkerService::new(dictionary, &config.cipher, config.tuning.clone())?;
        worker.run(cli.worker_port).await
    })
}

/// Submit one attack to a running coordinator and print the result. Blocks
/// until the coordinator resolves the attack.
fn run_attack(cli: Cli) -> Result<()> {
    // validate() has already established these.
    let cipher_file = cli.cipher_file.clone().context("missing --cipher-file")?;
    let known_text = cli.known_text.clone().context("missing --known-text")?;

    let cipher_text = std::fs::read(&cipher_file)
        .with_context(|| format!("Failed to read ciphertext file: {}", cipher_file.display()))?;

    let response = runtime()?.block_on(async {
        let mut stream = tokio::net::TcpStream::connect(&cli.coordinator)
            .await
            .with_context(|| format!("Coordinator unavailable at {}", cli.coordinator))?;

        write_message(
            &mut stream,
            &Message::AttackRequest(AttackRequestMessage {
                cipher_text,
                known_text: known_text.into_bytes(),
            }),
        )
        .await
        .context("Failed to submit attack")?;

        println!(
            "Attack submitted to {}, waiting for result...",
            cli.coordinator
        );

        match read_message(&mut stream)
            .await
            .context("Failed to read attack response")?
        {
            Message::AttackResponse(response) => Ok(response),
            other => anyhow::bail!("Expected ATTACK_RESPONSE, got {:?}", other),
        }
    })?;

    print_attack_response(&response, cli.json_output)
}

fn print_attack_response(response: &AttackResponseMessage, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "attack_id": response.attack_id,
            "complete": response.complete,
            "guesses": response.guesses.iter().map(|g| serde_json::json!({
                "key": g.key,
                "message": String::from_utf8_lossy(&g.message),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    if response.complete {
        println!("Attack {} completed", response.attack_id);
    } else {
        println!(
            "Attack {} finished with unscanned partitions - guesses below are a partial set",
            response.attack_id
        );
    }

    if response.guesses.is_empty() {
        println!("No key in the dictionary decrypted the ciphertext.");
    } else {
        for guess in &response.guesses {
            println!(
                "  key '{}' -> {}",
                guess.key,
                String::from_utf8_lossy(&guess.message)
            );
        }
    }
    Ok(())
}

/// Produce a ciphertext for exercising an attack setup end to end.
fn run_encrypt(cli: Cli) -> Result<()> {
    let key = cli.key.clone().context("missing --key")?;
    let plaintext_file = cli.plaintext_file.clone().context("missing --plaintext-file")?;
    let output = cli.output.clone().context("missing --output")?;

    let plaintext = std::fs::read(&plaintext_file)
        .with_context(|| format!("Failed to read plaintext file: {}", plaintext_file.display()))?;

    let cipher = provision(&cli.cipher)?;
    let cipher_text = cipher.encrypt(&key, &plaintext)?;

    std::fs::write(&output, &cipher_text)
        .with_context(|| format!("Failed to write ciphertext to {}", output.display()))?;

    println!(
        "Encrypted {} plaintext bytes to {} ({} bytes, cipher {})",
        plaintext.len(),
        output.display(),
        cipher_text.len(),
        cipher.name()
    );
    Ok(())
}
