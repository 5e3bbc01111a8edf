//! License record and its on-disk envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Authority-declared license state.
///
/// Recognized keys are typed; anything else the authority sends is kept in
/// `extra` and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseData {
    #[serde(default)]
    pub valid: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        alias = "expires",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub issued_by_manual_upload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl LicenseData {
    /// An active license, optionally expiring.
    pub fn active(expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            valid: true,
            expires_at,
            ..Self::default()
        }
    }

    /// Returns true if `expires_at` is set and strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }
}

/// The decrypted license record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub license_key: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub data: LicenseData,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub authority: Option<String>,
}

impl LicenseRecord {
    pub fn new(
        license_key: impl Into<String>,
        domain: impl Into<String>,
        data: LicenseData,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            license_key: license_key.into(),
            domain: domain.into(),
            data,
            fetched_at,
            authority: None,
        }
    }

    pub fn with_authority(mut self, authority: Option<String>) -> Self {
        self.authority = authority;
        self
    }

    /// Only an exact `valid: true` counts.
    pub fn is_valid(&self) -> bool {
        self.data.valid
    }
}

/// Versioned wrapper around the encrypted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub encrypted: bool,
    pub version: u32,
    pub payload: String,
}

impl EncryptedEnvelope {
    /// Current envelope format version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(payload: String) -> Self {
        Self {
            encrypted: true,
            version: Self::CURRENT_VERSION,
            payload,
        }
    }

    /// Checks the fields that must hold before decryption is attempted.
    pub fn check(&self) -> Result<(), String> {
        if !self.encrypted {
            return Err("envelope is not marked encrypted".to_string());
        }
        if self.version != Self::CURRENT_VERSION {
            return Err(format!("unsupported envelope version {}", self.version));
        }
        if self.payload.trim().is_empty() {
            return Err("envelope payload is empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unknown_data_keys_survive_roundtrip() {
        let json = r#"{"valid":true,"plan":"enterprise","seats":12}"#;
        let data: LicenseData = serde_json::from_str(json).unwrap();
        assert!(data.valid);
        assert_eq!(data.extra.get("plan"), Some(&Value::from("enterprise")));

        let back = serde_json::to_value(&data).unwrap();
        assert_eq!(back["seats"], Value::from(12));
    }

    #[test]
    fn expires_alias_is_accepted() {
        let data: LicenseData =
            serde_json::from_str(r#"{"valid":true,"expires":"2030-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(
            data.expires_at,
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn missing_flags_default_to_false() {
        let data: LicenseData = serde_json::from_str("{}").unwrap();
        assert!(!data.valid);
        assert!(!data.pending);
        assert!(!data.issued_by_manual_upload);
    }

    #[test]
    fn expiry_is_strict() {
        let t = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let data = LicenseData::active(Some(t));
        assert!(!data.is_expired_at(t));
        assert!(data.is_expired_at(t + chrono::Duration::seconds(1)));
        assert!(!LicenseData::active(None).is_expired_at(t));
    }

    #[test]
    fn envelope_check_rejects_bad_shapes() {
        assert!(EncryptedEnvelope::new("abc".into()).check().is_ok());

        let mut env = EncryptedEnvelope::new("abc".into());
        env.encrypted = false;
        assert!(env.check().is_err());

        let mut env = EncryptedEnvelope::new("abc".into());
        env.version = 2;
        assert!(env.check().is_err());

        assert!(EncryptedEnvelope::new("  ".into()).check().is_err());
    }
}
