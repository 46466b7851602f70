//! Decrypt capability abstraction
//!
//! The attack treats the block cipher as an opaque capability: workers hand
//! it a candidate key and the ciphertext, and classify the outcome. The
//! [`Cipher`] trait keeps the scan loop agnostic to the actual primitive,
//! and [`provision`] turns an unknown backend name into a typed error
//! instead of assuming the primitive is always present.
//!
//! # Outcome classification
//!
//! - `Ok(plaintext)` — the key decrypted the ciphertext; the caller still
//!   has to check for the known-plaintext fragment.
//! - `Err(KeyRejected)` — the key is structurally unusable (wrong length,
//!   bad padding after decryption). This is the dominant, expected case in
//!   a dictionary scan and is recovered by skipping to the next key.
//! - `Err(MalformedCiphertext)` — the ciphertext itself violates the
//!   cipher's block constraints. No key can ever decrypt it, so the failure
//!   belongs to the whole sub-job, not to one key.

use thiserror::Error;

pub mod block64;

/// Cipher backend errors, classified by blast radius.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Candidate key structurally unusable by the cipher. Expected and
    /// high-frequency during a scan; recovered by skipping the key.
    #[error("key rejected by cipher")]
    KeyRejected,

    /// Ciphertext malformed relative to the cipher's block constraints.
    /// Unrecoverable for the whole sub-job.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// The requested cipher backend cannot be instantiated. Fatal to the
    /// worker process.
    #[error("cipher backend '{0}' is not available")]
    Unavailable(String),
}

/// Symmetric decrypt/encrypt capability.
///
/// Implementations must be `Send + Sync`: a worker shares one instance
/// between its scan thread and its session task.
pub trait Cipher: Send + Sync {
    /// Backend name, as accepted by [`provision`].
    fn name(&self) -> &'static str;

    /// Encrypt `plaintext` under `key`.
    fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Attempt to decrypt `ciphertext` with `key`.
    fn decrypt(&self, key: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Instantiate a cipher backend by name.
///
/// An unknown name is a provisioning failure, not a per-key failure: the
/// caller is expected to treat it as fatal.
pub fn provision(name: &str) -> Result<Box<dyn Cipher>, CipherError> {
    match name {
        "block64" => Ok(Box::new(block64::Block64::new())),
        other => Err(CipherError::Unavailable(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_known_backend() {
        let cipher = provision("block64").unwrap();
        assert_eq!(cipher.name(), "block64");
    }

    #[test]
    fn test_provision_unknown_backend_is_typed_error() {
        match provision("quantum") {
            Err(CipherError::Unavailable(name)) => assert_eq!(name, "quantum"),
            other => panic!("expected Unavailable, got {:?}", other.map(|c| c.name())),
        }
    }
}
