//! Codec key material.
//!
//! A [`CodecKey`] is resolved once per process from a configured secret.
//! Secrets of the form `base64:<32 bytes>` are used verbatim; anything else
//! is stretched with Argon2id under a fixed, domain-separating salt so that
//! every process sharing the secret arrives at the same key.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of codec keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Prefix marking a secret that already is raw key material.
const RAW_KEY_PREFIX: &str = "base64:";

/// Salt used when stretching a passphrase-style secret.
const ENVELOPE_SALT: [u8; SALT_SIZE] = *b"hearth-envelope1";

/// Symmetric key for the license envelope, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CodecKey {
    bytes: [u8; KEY_SIZE],
}

impl CodecKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Resolves a key from a configured secret.
    ///
    /// `base64:`-prefixed secrets must decode to exactly [`KEY_SIZE`] bytes.
    /// Other secrets are derived with Argon2id and the default [`KdfParams`].
    pub fn from_secret(secret: &str) -> CryptoResult<Self> {
        Self::from_secret_with(secret, &KdfParams::default())
    }

    /// Same as [`CodecKey::from_secret`] with explicit derivation parameters.
    pub fn from_secret_with(secret: &str, params: &KdfParams) -> CryptoResult<Self> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(CryptoError::KeyDerivation("empty secret".to_string()));
        }

        match secret.strip_prefix(RAW_KEY_PREFIX) {
            Some(encoded) => {
                let raw = STANDARD
                    .decode(encoded)
                    .map_err(|e| CryptoError::KeyDerivation(format!("invalid base64 key: {e}")))?;
                let bytes: [u8; KEY_SIZE] =
                    raw.as_slice()
                        .try_into()
                        .map_err(|_| CryptoError::InvalidKeyLength {
                            expected: KEY_SIZE,
                            actual: raw.len(),
                        })?;
                Ok(Self::from_bytes(bytes))
            }
            None => derive_key(secret, &Salt::from_bytes(ENVELOPE_SALT), params),
        }
    }
}

impl std::fmt::Debug for CodecKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Salt for key derivation.
#[derive(Clone, Debug)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }
}

/// Argon2id parameters.
#[derive(Clone, Debug)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP recommendations for Argon2id (2023)
        Self {
            memory_cost: 19 * 1024, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Derives a codec key from a secret using Argon2id.
pub fn derive_key(secret: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<CodecKey> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut key_bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = CodecKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

/// Generates a random codec key.
pub fn generate_random_key() -> CodecKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    CodecKey::from_bytes(bytes)
}
