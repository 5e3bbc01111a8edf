//! Authority key set (JWKS) and RSA key material helpers.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

/// One published verification key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kty: Option<String>,
    /// Base64url modulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Base64url public exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Certificate chain, leaf first, standard base64 DER.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x5c: Vec<String>,
}

impl Jwk {
    /// Public key of the leaf certificate in `x5c`.
    pub fn leaf_public_key(&self) -> Result<RsaPublicKey, String> {
        let leaf = self
            .x5c
            .first()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| "key has no certificate chain".to_string())?;
        public_key_from_certificate(leaf)
    }

    /// Compares this entry's modulus and exponent against `key` in constant
    /// time. Entries without `n`/`e` are compared through their leaf certificate.
    pub fn matches_key(&self, key: &RsaPublicKey) -> bool {
        let (local_n, local_e) = rsa_components_b64url(key);
        let (n, e) = match (self.n.clone(), self.e.clone()) {
            (Some(n), Some(e)) => (n, e),
            _ => match self.leaf_public_key() {
                Ok(leaf) => rsa_components_b64url(&leaf),
                Err(_) => return false,
            },
        };
        let n_eq = n.as_bytes().ct_eq(local_n.as_bytes());
        let e_eq = e.as_bytes().ct_eq(local_e.as_bytes());
        bool::from(n_eq & e_eq)
    }
}

/// A rotating set of authority keys, looked up by `kid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

impl KeySet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys
            .iter()
            .find(|k| k.kid.as_deref().is_some_and(|k| k == kid))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// First entry whose modulus and exponent equal `key`'s.
    pub fn find_matching(&self, key: &RsaPublicKey) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.matches_key(key))
    }
}

/// Base64url (unpadded) big-endian modulus and exponent.
pub fn rsa_components_b64url(key: &RsaPublicKey) -> (String, String) {
    (
        URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
        URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
    )
}

/// Parses a PEM public key, SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`).
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, String> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| format!("not an RSA public key: {e}"))
}

/// Extracts the RSA public key from a base64 DER certificate.
pub fn public_key_from_certificate(der_b64: &str) -> Result<RsaPublicKey, String> {
    let compact: String = der_b64.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|e| format!("certificate is not base64: {e}"))?;
    let cert = Certificate::from_der(&der).map_err(|e| format!("invalid certificate: {e}"))?;
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| format!("invalid subject public key: {e}"))?;
    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| format!("certificate key is not RSA: {e}"))
}
