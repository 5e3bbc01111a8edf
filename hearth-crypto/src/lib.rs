//! Authenticated symmetric codec for the license envelope.
//!
//! The license record is stored as an opaque string produced by
//! [`Codec::encrypt`]. Decryption is authenticated (ChaCha20-Poly1305), so a
//! substituted or corrupted payload is rejected instead of yielding garbage.
//!
//! Key material is process-wide: build one [`CodecKey`] at startup (see
//! [`CodecKey::from_secret`]) and share the resulting [`Codec`].

mod codec;
mod error;
mod key;

pub use codec::{decrypt, encrypt, Codec, SealedPayload, ENVELOPE_AAD, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, CodecKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
