//! Authority-initiated license push.

use crate::error::{PushError, PushResult};
use crate::record::{LicenseData, LicenseRecord};
use crate::store::LicenseStore;
use crate::trust::TrustResolver;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Body of a push request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    /// The signed license document, as a JSON string.
    #[serde(default)]
    pub payload: Option<String>,
    /// Standard base64 RSA signature over the canonical payload.
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
}

/// Liveness response for the push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushHealth {
    pub ok: bool,
    pub service: String,
}

/// Verifies pushed payloads and installs them.
#[derive(Debug, Clone)]
pub struct PushReceiver {
    resolver: Arc<TrustResolver>,
    store: Arc<LicenseStore>,
    host: String,
    authority_url: Option<String>,
}

impl PushReceiver {
    pub fn new(
        resolver: Arc<TrustResolver>,
        store: Arc<LicenseStore>,
        host: impl Into<String>,
        authority_url: Option<String>,
    ) -> Self {
        Self {
            resolver,
            store,
            host: host.into(),
            authority_url,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Verifies and stores a pushed license, replacing whatever was stored.
    ///
    /// The store is only written after every check has passed.
    #[instrument(skip_all, fields(kid = request.kid.as_deref()))]
    pub async fn receive(&self, request: PushRequest, now: DateTime<Utc>) -> PushResult<()> {
        let (payload, signature) = match (
            request.payload.filter(|p| !p.is_empty()),
            request.signature.filter(|s| !s.trim().is_empty()),
        ) {
            (Some(p), Some(s)) => (p, s),
            _ => {
                return Err(PushError::MalformedRequest(
                    "payload and signature required".into(),
                ));
            }
        };

        let signature = STANDARD
            .decode(signature.trim())
            .map_err(|_| PushError::MalformedRequest("invalid signature encoding".into()))?;

        self.resolver
            .verify(payload.as_bytes(), &signature, request.kid.as_deref())
            .await
            .map_err(|e| {
                warn!(error = %e, "rejected pushed license");
                PushError::SignatureInvalid(e)
            })?;

        let record = self.parse_record(&payload, now)?;

        if record.domain != self.host {
            warn!(licensed = %record.domain, current = %self.host, "pushed license is for another domain");
            return Err(PushError::DomainMismatch {
                licensed: record.domain,
                current: self.host.clone(),
            });
        }

        self.store.save(&record).map_err(PushError::StorageFailure)?;
        info!(domain = %record.domain, valid = record.data.valid, "pushed license installed");
        Ok(())
    }

    fn parse_record(&self, payload: &str, now: DateTime<Utc>) -> PushResult<LicenseRecord> {
        let invalid = || PushError::MalformedPayload("invalid payload format".into());

        let doc: Value = serde_json::from_str(payload).map_err(|_| invalid())?;
        let field = |name: &str| {
            doc.get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let (Some(license_key), Some(domain)) = (field("license_key"), field("domain")) else {
            return Err(invalid());
        };

        let data = match doc.get("data") {
            None | Some(Value::Null) => LicenseData::default(),
            Some(data) => serde_json::from_value::<LicenseData>(data.clone())
                .map_err(|e| PushError::MalformedPayload(format!("invalid license data: {e}")))?,
        };

        Ok(LicenseRecord::new(license_key, domain, data, now)
            .with_authority(self.authority_url.clone()))
    }

    /// Fixed liveness answer; touches nothing.
    pub fn health(&self) -> PushHealth {
        health()
    }
}

/// Fixed liveness answer for the push endpoint.
pub fn health() -> PushHealth {
    PushHealth {
        ok: true,
        service: "push-license".to_string(),
    }
}
