//! Coordinator/worker wire protocol
//!
//! Messages between the coordinator, its workers, and submitting clients
//! are serialized with MessagePack (rmp-serde) and framed with a 4-byte
//! little-endian length prefix:
//!
//! ```text
//! [4 bytes: message length (little-endian u32)][N bytes: MessagePack message]
//! ```
//!
//! # Message flow
//!
//! ```text
//! Coordinator                      Worker
//!     |-------- HANDSHAKE ---------->|
//!     |<------- HELLO ---------------|
//!     |-------- SUB_JOB ------------>|
//!     |<------- CHECKPOINT ----------|   (periodic, fire-and-forget)
//!     |<------- FOUND_GUESS ---------|   (zero or more)
//!     |<------- PARTITION_DONE ------|   (or PARTITION_FAILED)
//!
//! Client                           Coordinator
//!     |-------- ATTACK_REQUEST ----->|
//!     |<------- ATTACK_RESPONSE -----|   (blocks until the attack resolves)
//! ```
//!
//! Coordinator and workers must agree on [`PROTOCOL_VERSION`] and on the
//! dictionary length; both are cross-checked during the handshake so a
//! worker holding a different dictionary copy is rejected before it can
//! scan the wrong key ranges.

use crate::dictionary::Partition;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Protocol version.
///
/// Increment when making breaking changes to the message set. Coordinator
/// and workers refuse to pair across versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum accepted frame size. Ciphertexts are small; anything larger is a
/// corrupt length prefix.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A candidate key whose decryption contained the known-plaintext fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guess {
    /// The dictionary key that decrypted the ciphertext.
    pub key: String,
    /// The full decrypted message.
    pub message: Vec<u8>,
}

/// Protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Handshake (Coordinator → Worker), sent immediately after connecting.
    Handshake(HandshakeMessage),

    /// Handshake reply (Worker → Coordinator).
    Hello(HelloMessage),

    /// Sub-job dispatch (Coordinator → Worker): one partition of one attack.
    SubJob(SubJobMessage),

    /// Scan progress report (Worker → Coordinator, fire-and-forget).
    ///
    /// The coordinator uses these both for liveness detection and as the
    /// resume index should the partition need reassignment.
    Checkpoint(CheckpointMessage),

    /// A key matched (Worker → Coordinator). Never dropped silently; the
    /// worker retries delivery on failure.
    FoundGuess(FoundGuessMessage),

    /// Partition scanned to the end (Worker → Coordinator).
    PartitionDone(PartitionDoneMessage),

    /// Partition unprocessable (Worker → Coordinator), e.g. ciphertext
    /// violating the cipher's block constraints. Not retried: the same
    /// ciphertext fails on every worker.
    PartitionFailed(PartitionFailedMessage),

    /// Attack submission (Client → Coordinator).
    AttackRequest(AttackRequestMessage),

    /// Attack result (Coordinator → Client), sent once the attack resolves.
    AttackResponse(AttackResponseMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub protocol_version: u32,
    /// Line count of the coordinator's dictionary, cross-checked by the
    /// worker against its own copy.
    pub dictionary_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    pub protocol_version: u32,
    /// Worker identifier (hostname:port).
    pub worker_id: String,
    pub dictionary_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubJobMessage {
    pub attack_id: u64,
    /// Index of the partition within the attack's partition list.
    pub partition_index: usize,
    pub partition: Partition,
    /// First line index to scan. Equals `partition.min` on first dispatch,
    /// or the last received checkpoint when the sub-job is reassigned.
    pub resume_index: usize,
    pub cipher_text: Vec<u8>,
    pub known_text: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMessage {
    pub worker_id: String,
    pub attack_id: u64,
    pub partition_index: usize,
    /// Last line index the worker has finished scanning.
    pub current_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundGuessMessage {
    pub worker_id: String,
    pub attack_id: u64,
    pub partition_index: usize,
    /// Dictionary line index of the matching key.
    pub line_index: usize,
    pub guess: Guess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDoneMessage {
    pub worker_id: String,
    pub attack_id: u64,
    pub partition_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionFailedMessage {
    pub worker_id: String,
    pub attack_id: u64,
    pub partition_index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackRequestMessage {
    pub cipher_text: Vec<u8>,
    pub known_text: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackResponseMessage {
    pub attack_id: u64,
    /// Guesses in arrival order, not dictionary order.
    pub guesses: Vec<Guess>,
    /// False when one or more partitions could not be scanned; the guesses
    /// are then a documented partial set, distinct from "zero found".
    pub complete: bool,
}

/// Serialize a message with its length prefix.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg).context("Failed to serialize message")?;

    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from a buffer holding a complete frame.
///
/// Returns (message, bytes consumed including the length prefix).
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!(
            "Buffer too small for message length (need 4 bytes, got {})",
            buf.len()
        );
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + msg_len {
        anyhow::bail!(
            "Incomplete message (need {} bytes, got {})",
            4 + msg_len,
            buf.len()
        );
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len]).context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read a complete message from a TCP stream.
pub async fn read_message(stream: &mut tokio::net::TcpStream) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_SIZE {
        anyhow::bail!("Message too large: {} bytes", msg_len);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream
        .read_exact(&mut msg_buf)
        .await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf).context("Failed to deserialize message")?;
    Ok(msg)
}

/// Write a message to a TCP stream, flushing immediately.
pub async fn write_message(stream: &mut tokio::net::TcpStream, msg: &Message) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let framed = serialize_message(msg)?;
    stream
        .write_all(&framed)
        .await
        .context("Failed to write message")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

/// Read a message from a split read half.
pub async fn read_message_from_read_half(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    let mut len_buf = [0u8; 4];
    read_half
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_SIZE {
        anyhow::bail!("Message too large: {} bytes", msg_len);
    }

    let mut msg_buf = vec![0u8; msg_len];
    read_half
        .read_exact(&mut msg_buf)
        .await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf).context("Failed to deserialize message")?;
    Ok(msg)
}

/// Write a message to a split write half, flushing immediately.
pub async fn write_message_to_write_half(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    msg: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let framed = serialize_message(msg)?;
    write_half
        .write_all(&framed)
        .await
        .context("Failed to write message")?;
    write_half.flush().await.context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize_sub_job() {
        let msg = Message::SubJob(SubJobMessage {
            attack_id: 7,
            partition_index: 2,
            partition: Partition::new(30, 45),
            resume_index: 38,
            cipher_text: vec![1, 2, 3, 4, 5, 6, 7, 8],
            known_text: b"secret".to_vec(),
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, consumed) = deserialize_message(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());

        match deserialized {
            Message::SubJob(job) => {
                assert_eq!(job.attack_id, 7);
                assert_eq!(job.partition_index, 2);
                assert_eq!(job.partition, Partition::new(30, 45));
                assert_eq!(job.resume_index, 38);
                assert_eq!(job.known_text, b"secret");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_serialize_deserialize_found_guess() {
        let msg = Message::FoundGuess(FoundGuessMessage {
            worker_id: "node-a:9901".to_string(),
            attack_id: 3,
            partition_index: 0,
            line_index: 11,
            guess: Guess {
                key: "opensesame".to_string(),
                message: b"the plain message".to_vec(),
            },
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, _) = deserialize_message(&bytes).unwrap();

        match deserialized {
            Message::FoundGuess(found) => {
                assert_eq!(found.worker_id, "node-a:9901");
                assert_eq!(found.line_index, 11);
                assert_eq!(found.guess.key, "opensesame");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_serialize_deserialize_checkpoint() {
        let msg = Message::Checkpoint(CheckpointMessage {
            worker_id: "node-b:9901".to_string(),
            attack_id: 1,
            partition_index: 4,
            current_index: 512,
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, _) = deserialize_message(&bytes).unwrap();

        match deserialized {
            Message::Checkpoint(cp) => {
                assert_eq!(cp.current_index, 512);
                assert_eq!(cp.partition_index, 4);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_message_framing() {
        let msg = Message::PartitionDone(PartitionDoneMessage {
            worker_id: "w".to_string(),
            attack_id: 0,
            partition_index: 0,
        });
        let bytes = serialize_message(&msg).unwrap();

        assert!(bytes.len() >= 4);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + msg_len);
    }

    #[test]
    fn test_incomplete_frame_rejected() {
        let msg = Message::AttackRequest(AttackRequestMessage {
            cipher_text: vec![0; 16],
            known_text: b"frag".to_vec(),
        });
        let bytes = serialize_message(&msg).unwrap();
        assert!(deserialize_message(&bytes[..bytes.len() - 1]).is_err());
        assert!(deserialize_message(&bytes[..2]).is_err());
    }

    #[test]
    fn test_protocol_version() {
        assert_eq!(PROTOCOL_VERSION, 1);
    }
}
