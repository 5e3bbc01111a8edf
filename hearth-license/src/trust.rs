//! Authority trust resolution and signature verification.
//!
//! Key resolution order:
//! 1. With a `kid` and a configured authority, the authority's key set is
//!    fetched and the matching entry's leaf certificate key is used.
//! 2. Otherwise the bundled public key shipped with the deployment.
//!
//! Signatures are RSASSA-PKCS1-v1_5 / SHA-256 over the canonical JSON form
//! of the payload (see [`canonical_json`]). Any failure along the way is a
//! verification failure; there is no path that passes by default.

use crate::authority::AuthorityClient;
use crate::error::{AuthorityError, SignatureError, SignatureResult, TrustError};
use crate::keyset::parse_public_key_pem;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use serde_json::Value;
use sha2::Sha256;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Where the key used for a verification came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    KeySet { kid: String },
    Bundled,
}

/// Why the boot self-check did not run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoAuthority,
    NoBundledKey,
    AuthorityUnreachable(String),
    MalformedKeySet(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAuthority => f.write_str("no authority configured"),
            Self::NoBundledKey => f.write_str("no bundled public key"),
            Self::AuthorityUnreachable(e) => write!(f, "authority unreachable: {e}"),
            Self::MalformedKeySet(e) => write!(f, "key set unusable: {e}"),
        }
    }
}

/// Non-fatal result of the boot self-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfCheck {
    /// The bundled key is among the authority's published keys.
    Matched { kid: Option<String> },
    /// The check could not be performed; startup continues.
    Skipped(SkipReason),
}

/// Resolves the authority's key and verifies detached signatures.
///
/// Holds no persistent state beyond the bundled key read at construction.
#[derive(Debug, Clone)]
pub struct TrustResolver {
    authority: Option<AuthorityClient>,
    bundled_key: Option<RsaPublicKey>,
}

impl TrustResolver {
    pub fn new(authority: Option<AuthorityClient>, bundled_key: Option<RsaPublicKey>) -> Self {
        Self {
            authority,
            bundled_key,
        }
    }

    /// Reads the bundled key from `path`.
    ///
    /// A missing or unparseable file yields `None`; verification then relies
    /// on the key set alone and fails closed without it.
    pub fn load_bundled_key(path: &Path) -> Option<RsaPublicKey> {
        let pem = match std::fs::read_to_string(path) {
            Ok(pem) => pem,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "bundled public key not readable");
                return None;
            }
        };
        match parse_public_key_pem(&pem) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "bundled public key is invalid");
                None
            }
        }
    }

    #[must_use]
    pub fn bundled_key(&self) -> Option<&RsaPublicKey> {
        self.bundled_key.as_ref()
    }

    #[must_use]
    pub fn authority(&self) -> Option<&AuthorityClient> {
        self.authority.as_ref()
    }

    /// Resolves the verification key for `kid`.
    pub async fn resolve_key(
        &self,
        kid: Option<&str>,
    ) -> SignatureResult<(RsaPublicKey, KeySource)> {
        let mut timed_out = false;

        if let (Some(kid), Some(authority)) = (kid.filter(|k| !k.is_empty()), &self.authority) {
            match authority.fetch_key_set().await {
                Ok(set) => match set.find(kid).map(|jwk| jwk.leaf_public_key()) {
                    Some(Ok(key)) => {
                        return Ok((
                            key,
                            KeySource::KeySet {
                                kid: kid.to_string(),
                            },
                        ));
                    }
                    Some(Err(e)) => debug!(kid, error = %e, "key set entry has no usable certificate"),
                    None => debug!(kid, "kid not present in authority key set"),
                },
                Err(AuthorityError::Timeout) => {
                    timed_out = true;
                    warn!(kid, "key set fetch timed out; falling back to bundled key");
                }
                Err(e) => debug!(kid, error = %e, "key set fetch failed; falling back to bundled key"),
            }
        }

        match &self.bundled_key {
            Some(key) => Ok((key.clone(), KeySource::Bundled)),
            None if timed_out => Err(SignatureError::Timeout),
            None => Err(SignatureError::KeyUnavailable),
        }
    }

    /// Verifies `signature` over the canonical form of the JSON `payload`.
    pub async fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        kid: Option<&str>,
    ) -> SignatureResult<()> {
        let canonical = canonical_json(payload)?;
        let (key, source) = self.resolve_key(kid).await?;
        verify_with_key(&key, &canonical, signature).inspect_err(|e| {
            debug!(?source, error = %e, "signature rejected");
        })?;
        debug!(?source, "signature verified");
        Ok(())
    }

    /// Compares the bundled key with the authority's published key set.
    ///
    /// Only a reachable authority serving a usable key set that does not
    /// contain the bundled key is fatal; everything else is logged and skipped.
    pub async fn self_check(&self) -> Result<SelfCheck, TrustError> {
        let Some(authority) = &self.authority else {
            return Ok(skipped(SkipReason::NoAuthority));
        };
        let Some(bundled) = &self.bundled_key else {
            return Ok(skipped(SkipReason::NoBundledKey));
        };

        let set = match authority.fetch_key_set().await {
            Ok(set) => set,
            Err(AuthorityError::UnexpectedResponse(e)) => {
                return Ok(skipped(SkipReason::MalformedKeySet(e)));
            }
            Err(e) => return Ok(skipped(SkipReason::AuthorityUnreachable(e.to_string()))),
        };
        if set.is_empty() {
            return Ok(skipped(SkipReason::MalformedKeySet("no keys published".into())));
        }

        match set.find_matching(bundled) {
            Some(jwk) => {
                info!(kid = ?jwk.kid, "bundled public key matches authority key set");
                Ok(SelfCheck::Matched {
                    kid: jwk.kid.clone(),
                })
            }
            None => {
                error!(
                    authority = authority.base_url(),
                    "bundled public key matches none of the authority's published keys"
                );
                Err(TrustError::BundledKeyMismatch)
            }
        }
    }
}

fn skipped(reason: SkipReason) -> SelfCheck {
    warn!(%reason, "skipping bundled key self-check");
    SelfCheck::Skipped(reason)
}

/// Verifies a PKCS#1 v1.5 SHA-256 signature over `message`.
pub fn verify_with_key(key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> SignatureResult<()> {
    if signature.is_empty() {
        return Err(SignatureError::Malformed("empty signature".into()));
    }
    let signature = Signature::try_from(signature)
        .map_err(|e| SignatureError::Malformed(format!("signature bytes: {e}")))?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(message, &signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// Canonical byte form of a JSON document: object keys sorted, no
/// insignificant whitespace, strings escaped as `serde_json` escapes them
/// (`/` is not escaped).
///
/// Signer and verifier must both sign/verify exactly these bytes.
pub fn canonical_json(payload: &[u8]) -> SignatureResult<Vec<u8>> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| SignatureError::Malformed(format!("payload is not JSON: {e}")))?;
    Ok(canonical_value(&value).into_bytes())
}

/// Canonical string form of an already-parsed JSON value.
pub fn canonical_value(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
