//! Error types for the codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while sealing or opening a payload.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material could not be produced from the configured secret.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed: wrong key, tampered data or malformed input.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Raw key material had the wrong length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
