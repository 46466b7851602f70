//! keysweep - Distributed known-plaintext dictionary attack
//!
//! keysweep brute-forces a ciphertext against a dictionary of candidate
//! keys, spread across a set of worker nodes. A coordinator partitions the
//! dictionary into balanced disjoint ranges, workers scan their ranges
//! through an opaque decrypt capability, and the coordinator reassembles
//! the surviving guesses into one result.
//!
//! # Architecture
//!
//! - **Shared dictionary views**: one in-memory word list, cheap
//!   range-restricted cursors per partition
//! - **Balanced partitioning**: sizes differ by at most one line
//! - **Checkpointed scans**: workers report progress, dead workers are
//!   detected by silence and their partitions resumed elsewhere
//! - **Typed failure taxonomy**: a rejected key, a corrupt ciphertext, and
//!   a missing cipher backend all fail at different blast radii

pub mod cipher;
pub mod config;
pub mod coordinator;
pub mod dictionary;
pub mod protocol;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::Coordinator;
pub use worker::WorkerService;

/// Result type used throughout keysweep
pub type Result<T> = anyhow::Result<T>;
