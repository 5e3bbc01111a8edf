//! ChaCha20-Poly1305 codec for the license payload.
//!
//! The ciphertext string is `base64(nonce || ciphertext || tag)`. Every
//! payload is bound to [`ENVELOPE_AAD`], so a ciphertext lifted from some
//! other context that happens to share the key still fails to open.

use crate::error::{CryptoError, CryptoResult};
use crate::key::CodecKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Associated data authenticated alongside every envelope payload.
pub const ENVELOPE_AAD: &[u8] = b"hearth-license/envelope/v1";

/// A sealed payload split into its nonce and tagged ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedPayload {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// Encodes as the opaque string stored in the envelope.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        STANDARD.encode(&bytes)
    }

    /// Parses the opaque envelope string.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;

        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption("data too short".to_string()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);

        Ok(Self {
            nonce,
            ciphertext: bytes[NONCE_SIZE..].to_vec(),
        })
    }
}

/// Encrypts `plaintext` and returns the opaque ciphertext string.
pub fn encrypt(key: &CodecKey, plaintext: &[u8]) -> CryptoResult<String> {
    Ok(seal(key, plaintext)?.to_base64())
}

/// Decrypts a string produced by [`encrypt`].
///
/// Fails with [`CryptoError::Decryption`] on tamper, wrong key or malformed
/// input; never returns unauthenticated bytes.
pub fn decrypt(key: &CodecKey, ciphertext: &str) -> CryptoResult<Vec<u8>> {
    open(key, &SealedPayload::from_base64(ciphertext)?)
}

fn seal(key: &CodecKey, plaintext: &[u8]) -> CryptoResult<SealedPayload> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: ENVELOPE_AAD,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(SealedPayload {
        nonce: nonce_bytes,
        ciphertext,
    })
}

fn open(key: &CodecKey, sealed: &SealedPayload) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: sealed.ciphertext.as_ref(),
                aad: ENVELOPE_AAD,
            },
        )
        .map_err(|_| {
            CryptoError::Decryption("authentication failed (wrong key or tampered data)".to_string())
        })
}

/// Process-wide codec bound to one key.
#[derive(Clone, Debug)]
pub struct Codec {
    key: CodecKey,
}

impl Codec {
    pub fn new(key: CodecKey) -> Self {
        Self { key }
    }

    /// See [`encrypt`].
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<String> {
        encrypt(&self.key, plaintext)
    }

    /// See [`decrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> CryptoResult<Vec<u8>> {
        decrypt(&self.key, ciphertext)
    }

    /// Decrypts and requires the plaintext to be UTF-8.
    pub fn decrypt_string(&self, ciphertext: &str) -> CryptoResult<String> {
        let plaintext = self.decrypt(ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::Decryption(format!("invalid UTF-8: {e}")))
    }
}
