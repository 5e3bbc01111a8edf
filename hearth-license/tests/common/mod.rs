//! Shared test helpers for license tests.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use hearth_crypto::{Codec, CodecKey};
use hearth_license::{
    canonical_json, parse_public_key_pem, rsa_components_b64url, LicenseData, LicenseRecord,
    LicenseStore, OverrideStore, RsaPublicKey,
};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const HOST: &str = "shop.example.ro";
pub const KID: &str = "authority-2026";

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

pub fn authority_private() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(&fixture("authority_private.pem")).unwrap()
}

pub fn authority_public() -> RsaPublicKey {
    parse_public_key_pem(&fixture("authority_public.pem")).unwrap()
}

pub fn rogue_private() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(&fixture("rogue_private.pem")).unwrap()
}

pub fn rogue_public() -> RsaPublicKey {
    parse_public_key_pem(&fixture("rogue_public.pem")).unwrap()
}

/// Signs the canonical form of `payload`, returning standard base64.
pub fn sign(key: &RsaPrivateKey, payload: &[u8]) -> String {
    let canonical = canonical_json(payload).unwrap();
    let signer = SigningKey::<Sha256>::new(key.clone());
    STANDARD.encode(signer.sign(&canonical).to_bytes())
}

/// Base64 DER body of a PEM certificate fixture.
pub fn cert_der_b64(name: &str) -> String {
    fixture(name)
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect::<String>()
}

/// Key set publishing `cert` (a fixture name) under `kid`.
pub fn jwks_with_cert(kid: &str, cert: &str) -> Value {
    json!({ "keys": [{ "kid": kid, "kty": "RSA", "x5c": [cert_der_b64(cert)] }] })
}

/// Key set publishing only the modulus and exponent of `key`.
pub fn jwks_with_components(kid: &str, key: &RsaPublicKey) -> Value {
    let (n, e) = rsa_components_b64url(key);
    json!({ "keys": [{ "kid": kid, "kty": "RSA", "n": n, "e": e }] })
}

pub fn test_codec() -> Codec {
    Codec::new(CodecKey::from_bytes([7u8; 32]))
}

pub fn temp_store(dir: &Path) -> Arc<LicenseStore> {
    Arc::new(LicenseStore::new(dir.join("license.json"), test_codec()))
}

pub fn temp_overrides(dir: &Path) -> OverrideStore {
    OverrideStore::new(dir.join("license_client_unlock.json"))
}

/// Fixed "now" used across tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 15, 10, 0, 0).unwrap()
}

pub fn valid_record(domain: &str, expires_at: Option<DateTime<Utc>>) -> LicenseRecord {
    LicenseRecord::new("HEARTH-1234-5678", domain, LicenseData::active(expires_at), now())
}

/// A signed push payload for `domain`.
pub fn push_payload(domain: &str) -> String {
    json!({
        "license_key": "HEARTH-1234-5678",
        "domain": domain,
        "data": { "valid": true, "expires_at": "2030-01-01T00:00:00Z", "plan": "business" }
    })
    .to_string()
}
