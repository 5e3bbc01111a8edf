//! HTTP client for the license authority.
//!
//! Every call is bounded by the configured timeout. Connection failures are
//! reported as [`AuthorityError::Unreachable`] so callers can fall back or
//! ask the operator to retry.

use crate::error::{AuthorityError, AuthorityResult};
use crate::keyset::KeySet;
use crate::record::LicenseData;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument};

/// Paths on the authority, relative to its base URL.
#[derive(Debug, Clone)]
pub struct AuthorityEndpoints {
    pub verify: String,
    pub pem: String,
    pub jwks: String,
}

impl Default for AuthorityEndpoints {
    fn default() -> Self {
        Self {
            verify: "/api/verify".to_string(),
            pem: "/keys/pem".to_string(),
            jwks: "/.well-known/jwks.json".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    license_key: &'a str,
    domain: &'a str,
}

/// What the authority said about a license key.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityVerdict {
    /// A signed license body; must pass the trust resolver before use.
    Signed {
        data: Value,
        signature: String,
        kid: Option<String>,
    },
    /// The authority knows the key but has not activated it yet.
    Pending,
    /// A plain validity attestation over the authenticated channel.
    Attested {
        valid: bool,
        message: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
}

impl AuthorityVerdict {
    /// Interprets a verify response body.
    pub fn from_json(body: &Value) -> AuthorityResult<Self> {
        let obj = body
            .as_object()
            .ok_or_else(|| AuthorityError::UnexpectedResponse("body is not an object".into()))?;

        if let (Some(data), Some(signature)) = (
            obj.get("data").filter(|d| d.is_object()),
            obj.get("signature").and_then(Value::as_str),
        ) {
            return Ok(Self::Signed {
                data: data.clone(),
                signature: signature.to_string(),
                kid: obj.get("kid").and_then(Value::as_str).map(str::to_string),
            });
        }

        if obj.get("status").and_then(Value::as_str) == Some("pending") {
            return Ok(Self::Pending);
        }

        if let Some(valid) = obj.get("valid").and_then(Value::as_bool) {
            return Ok(Self::Attested {
                valid,
                message: obj.get("message").and_then(Value::as_str).map(str::to_string),
                expires_at: attested_expiry(obj)?,
            });
        }

        Err(AuthorityError::UnexpectedResponse(
            "expected signed data, a pending status or a validity flag".into(),
        ))
    }

    /// License data implied by an unsigned verdict.
    pub fn unsigned_data(&self) -> Option<LicenseData> {
        match self {
            Self::Signed { .. } => None,
            Self::Pending => Some(LicenseData {
                pending: true,
                ..LicenseData::default()
            }),
            Self::Attested {
                valid,
                message,
                expires_at,
            } => Some(LicenseData {
                valid: *valid,
                message: message.clone(),
                expires_at: *expires_at,
                ..LicenseData::default()
            }),
        }
    }
}

/// `expires_at` (or its `expires` alias). Present but unparseable is an error,
/// never "no expiry".
fn attested_expiry(obj: &Map<String, Value>) -> AuthorityResult<Option<DateTime<Utc>>> {
    let raw = match obj
        .get("expires_at")
        .filter(|v| !v.is_null())
        .or_else(|| obj.get("expires"))
    {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(raw)) => raw,
        Some(other) => {
            return Err(AuthorityError::UnexpectedResponse(format!(
                "expiry is not a timestamp: {other}"
            )));
        }
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|d| Some(d.with_timezone(&Utc)))
        .map_err(|e| AuthorityError::UnexpectedResponse(format!("expiry {raw:?}: {e}")))
}

/// Client for one authority.
#[derive(Debug, Clone)]
pub struct AuthorityClient {
    client: Client,
    base_url: String,
    endpoints: AuthorityEndpoints,
}

impl AuthorityClient {
    pub fn new(
        base_url: &str,
        endpoints: AuthorityEndpoints,
        timeout: Duration,
    ) -> AuthorityResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(3)))
            .build()
            .map_err(|e| AuthorityError::Unreachable(format!("HTTP client setup: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            endpoints,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// `POST <verify>` with `{license_key, domain}`.
    #[instrument(skip(self, license_key), fields(authority = %self.base_url))]
    pub async fn verify_license(
        &self,
        license_key: &str,
        domain: &str,
    ) -> AuthorityResult<AuthorityVerdict> {
        let resp = self
            .client
            .post(self.url(&self.endpoints.verify))
            .json(&VerifyRequest {
                license_key,
                domain,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthorityError::Status(status.as_u16()));
        }
        let body: Value = resp.json().await?;
        let verdict = AuthorityVerdict::from_json(&body)?;
        debug!(?verdict, "authority verdict received");
        Ok(verdict)
    }

    /// `GET <jwks>`.
    pub async fn fetch_key_set(&self) -> AuthorityResult<KeySet> {
        let resp = self.client.get(self.url(&self.endpoints.jwks)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthorityError::Status(status.as_u16()));
        }
        resp.json::<KeySet>()
            .await
            .map_err(|e| AuthorityError::UnexpectedResponse(format!("key set: {e}")))
    }

    /// `GET <pem>`, returning the PEM text as published.
    pub async fn fetch_public_key_pem(&self) -> AuthorityResult<String> {
        let resp = self.client.get(self.url(&self.endpoints.pem)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthorityError::Status(status.as_u16()));
        }
        let text = resp.text().await?;
        if !text.contains("-----BEGIN") {
            return Err(AuthorityError::UnexpectedResponse(
                "public key endpoint did not return PEM".into(),
            ));
        }
        Ok(text)
    }
}
