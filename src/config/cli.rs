//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Attack mode (default) - submit an attack to a running coordinator
    Attack,
    /// Coordinator mode - partition attacks across workers
    Coordinator,
    /// Worker mode - scan dictionary partitions on behalf of a coordinator
    Worker,
    /// Encrypt mode - produce a ciphertext for testing an attack setup
    Encrypt,
}

/// keysweep - Distributed known-plaintext dictionary attack
#[derive(Parser, Debug)]
#[command(name = "keysweep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: attack, coordinator, worker, or encrypt
    #[arg(long, value_enum, default_value = "attack")]
    pub mode: ExecutionMode,

    /// Coordinator address to submit attacks to (attack mode only)
    #[arg(long, default_value = "127.0.0.1:9900")]
    pub coordinator: String,

    /// Port for the coordinator to accept attack submissions on
    #[arg(long, default_value = "9900")]
    pub listen_port: u16,

    /// Port for a worker to accept coordinator connections on
    #[arg(long, default_value = "9901")]
    pub worker_port: u16,

    /// Comma-separated list of worker addresses for coordinator mode
    /// (e.g., "10.0.1.10:9901,10.0.1.11:9901")
    #[arg(long)]
    pub host_list: Option<String>,

    /// File containing worker addresses (one per line, for coordinator mode)
    #[arg(long)]
    pub workers_file: Option<PathBuf>,

    /// Dictionary file (newline-delimited candidate keys)
    ///
    /// Required in coordinator and worker modes; both sides must hold the
    /// same copy.
    #[arg(short = 'w', long)]
    pub dictionary: Option<PathBuf>,

    /// Cipher backend name
    #[arg(long, default_value = "block64")]
    pub cipher: String,

    /// Number of partitions per attack (default: workers × CPU count)
    #[arg(short = 'p', long)]
    pub partitions: Option<usize>,

    /// TOML configuration file (CLI flags take precedence)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Attack Options ===
    /// Ciphertext file to attack
    #[arg(long)]
    pub cipher_file: Option<PathBuf>,

    /// Known plaintext fragment expected inside the decrypted message
    #[arg(long)]
    pub known_text: Option<String>,

    /// Print the attack result as JSON instead of text
    #[arg(long)]
    pub json_output: bool,

    // === Encrypt Options ===
    /// Encryption key (encrypt mode only)
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Plaintext file to encrypt (encrypt mode only)
    #[arg(long)]
    pub plaintext_file: Option<PathBuf>,

    /// Output file for the produced ciphertext (encrypt mode only)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

impl Cli {
    /// Validate mode-specific argument combinations.
    pub fn validate(&self) -> Result<(), String> {
        match self.mode {
            ExecutionMode::Attack => {
                if self.cipher_file.is_none() {
                    return Err("Attack mode requires --cipher-file".to_string());
                }
                if self.known_text.is_none() {
                    return Err("Attack mode requires --known-text".to_string());
                }
            }
            ExecutionMode::Coordinator => {
                if self.host_list.is_none() && self.workers_file.is_none() {
                    return Err(
                        "Coordinator mode requires --host-list or --workers-file".to_string()
                    );
                }
                if self.dictionary.is_none() && self.config.is_none() {
                    return Err("Coordinator mode requires --dictionary".to_string());
                }
            }
            ExecutionMode::Worker => {
                if self.dictionary.is_none() && self.config.is_none() {
                    return Err("Worker mode requires --dictionary".to_string());
                }
            }
            ExecutionMode::Encrypt => {
                if self.key.is_none() {
                    return Err("Encrypt mode requires --key".to_string());
                }
                if self.plaintext_file.is_none() {
                    return Err("Encrypt mode requires --plaintext-file".to_string());
                }
                if self.output.is_none() {
                    return Err("Encrypt mode requires --output".to_string());
                }
            }
        }
        Ok(())
    }

    /// Worker addresses for coordinator mode, from `--host-list` or
    /// `--workers-file` (CLI list takes precedence).
    pub fn worker_addresses(&self) -> anyhow::Result<Vec<String>> {
        use anyhow::Context;

        if let Some(ref list) = self.host_list {
            let addrs: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            return Ok(addrs);
        }

        if let Some(ref path) = self.workers_file {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read workers file: {}", path.display()))?;
            let addrs: Vec<String> = contents
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .collect();
            return Ok(addrs);
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_attack_mode_requires_ciphertext_and_fragment() {
        let cli = Cli::parse_from(["keysweep", "--mode", "attack"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from([
            "keysweep",
            "--mode",
            "attack",
            "--cipher-file",
            "secret.bin",
            "--known-text",
            "attack at dawn",
        ]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_coordinator_mode_requires_workers() {
        let cli = Cli::parse_from([
            "keysweep",
            "--mode",
            "coordinator",
            "--dictionary",
            "words.txt",
        ]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from([
            "keysweep",
            "--mode",
            "coordinator",
            "--dictionary",
            "words.txt",
            "--host-list",
            "10.0.1.10:9901,10.0.1.11:9901",
        ]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_host_list_parsing() {
        let cli = Cli::parse_from([
            "keysweep",
            "--mode",
            "coordinator",
            "--dictionary",
            "words.txt",
            "--host-list",
            "a:9901, b:9901 ,c:9901",
        ]);
        assert_eq!(cli.worker_addresses().unwrap(), vec!["a:9901", "b:9901", "c:9901"]);
    }

    #[test]
    fn test_workers_file_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# lab rack").unwrap();
        writeln!(file, "10.0.1.10:9901").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "10.0.1.11:9901").unwrap();
        drop(file);

        let cli = Cli::parse_from([
            "keysweep",
            "--mode",
            "coordinator",
            "--dictionary",
            "words.txt",
            "--workers-file",
            path.to_str().unwrap(),
        ]);
        assert_eq!(
            cli.worker_addresses().unwrap(),
            vec!["10.0.1.10:9901", "10.0.1.11:9901"]
        );
    }

    #[test]
    fn test_encrypt_mode_requires_key_material() {
        let cli = Cli::parse_from(["keysweep", "--mode", "encrypt", "--key", "opensesame"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from([
            "keysweep",
            "--mode",
            "encrypt",
            "--key",
            "opensesame",
            "--plaintext-file",
            "message.txt",
            "--output",
            "secret.bin",
        ]);
        assert!(cli.validate().is_ok());
    }
}
