//! Operator-facing license management: inspect, install, re-verify, remove.
//!
//! Unlike enforcement, these flows talk to the authority. Network failures
//! come back as [`ManageError::AuthorityUnavailable`] so the operator can
//! simply try again.

use crate::authority::{AuthorityClient, AuthorityVerdict};
use crate::error::{
    AuthorityError, ManageError, ManageResult, SignatureError, StoreError, StoreResult,
};
use crate::record::{LicenseData, LicenseRecord};
use crate::store::LicenseStore;
use crate::trust::TrustResolver;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What is currently installed.
#[derive(Debug, Clone, PartialEq)]
pub enum LicenseStatusView {
    Missing,
    Installed(LicenseRecord),
    Unreadable(String),
}

pub struct LicenseManager {
    store: Arc<LicenseStore>,
    resolver: Arc<TrustResolver>,
    host: String,
}

impl LicenseManager {
    pub fn new(store: Arc<LicenseStore>, resolver: Arc<TrustResolver>, host: impl Into<String>) -> Self {
        Self {
            store,
            resolver,
            host: host.into(),
        }
    }

    pub fn status(&self) -> LicenseStatusView {
        match self.store.load() {
            Ok(record) => LicenseStatusView::Installed(record),
            Err(StoreError::NotFound) => LicenseStatusView::Missing,
            Err(e) => LicenseStatusView::Unreadable(e.to_string()),
        }
    }

    /// Confirms the stored envelope still decrypts. No network.
    pub fn check_local(&self) -> ManageResult<()> {
        match self.store.load() {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound) => Err(ManageError::NotInstalled),
            Err(e) => Err(e.into()),
        }
    }

    /// Asks the authority about `license_key` and installs the result for this host.
    ///
    /// Refused with [`ManageError::AlreadyLicensed`] while a valid license is
    /// stored; use [`reverify`](Self::reverify) for that one.
    #[instrument(skip(self, license_key, now), fields(host = %self.host))]
    pub async fn install(&self, license_key: &str, now: DateTime<Utc>) -> ManageResult<LicenseRecord> {
        let license_key = license_key.trim();
        if license_key.is_empty() {
            return Err(ManageError::EmptyKey);
        }
        ensure_replaceable(self.store.load())?;

        let mut data = self.fetch_data(license_key, &self.host).await?;
        data.issued_by_manual_upload = true;
        data.verified_at = Some(now);

        let record = LicenseRecord::new(license_key, self.host.clone(), data, now)
            .with_authority(self.authority()?.base_url().to_string().into());
        // A push may have landed while the authority was answering.
        let record = self.store.update(|current| {
            ensure_replaceable(current)?;
            Ok::<_, ManageError>(record)
        })?;
        info!(valid = record.data.valid, pending = record.data.pending, "license installed");
        Ok(record)
    }

    /// Re-runs the authority check for the stored license and updates it in place.
    ///
    /// Fails with [`ManageError::Conflict`] if the stored record changed
    /// while the authority was being asked.
    #[instrument(skip(self, now))]
    pub async fn reverify(&self, now: DateTime<Utc>) -> ManageResult<LicenseRecord> {
        let original = match self.store.load() {
            Ok(record) => record,
            Err(StoreError::NotFound) => return Err(ManageError::NotInstalled),
            Err(e) => return Err(e.into()),
        };

        let domain = if original.domain.is_empty() {
            self.host.clone()
        } else {
            original.domain.clone()
        };
        let mut data = self.fetch_data(&original.license_key, &domain).await?;
        data.issued_by_manual_upload = original.data.issued_by_manual_upload;
        data.verified_at = Some(now);

        let mut updated = original.clone();
        updated.data = data;
        updated.fetched_at = now;

        let record = self.store.update(|current| match current {
            Ok(current) if current == original => Ok(updated),
            Ok(_) | Err(StoreError::NotFound) => {
                warn!("stored license changed during re-verification");
                Err(ManageError::Conflict)
            }
            Err(e) => Err(e.into()),
        })?;
        info!(valid = record.data.valid, pending = record.data.pending, "license re-verified");
        Ok(record)
    }

    /// Removes the stored license. Valid licenses are refused.
    pub fn remove(&self) -> ManageResult<()> {
        match self.store.delete() {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(ManageError::NotInstalled),
            Err(e) => Err(e.into()),
        }
    }

    fn authority(&self) -> ManageResult<&AuthorityClient> {
        self.resolver
            .authority()
            .ok_or(ManageError::Authority(AuthorityError::NotConfigured))
    }

    async fn fetch_data(&self, license_key: &str, domain: &str) -> ManageResult<LicenseData> {
        let verdict = self.authority()?.verify_license(license_key, domain).await?;

        match verdict {
            AuthorityVerdict::Signed {
                data,
                signature,
                kid,
            } => {
                let signature = STANDARD
                    .decode(signature.trim())
                    .map_err(|e| SignatureError::Malformed(format!("signature is not base64: {e}")))?;
                let payload = serde_json::to_vec(&data)
                    .map_err(|e| SignatureError::Malformed(e.to_string()))?;
                self.resolver
                    .verify(&payload, &signature, kid.as_deref())
                    .await
                    .inspect_err(|e| warn!(error = %e, "authority response failed verification"))?;

                serde_json::from_value(data).map_err(|e| {
                    ManageError::Authority(AuthorityError::UnexpectedResponse(format!(
                        "license data: {e}"
                    )))
                })
            }
            other => other.unsigned_data().ok_or_else(|| {
                ManageError::Authority(AuthorityError::UnexpectedResponse(
                    "verdict carried no license data".into(),
                ))
            }),
        }
    }
}

/// Install may replace a missing, inactive or unreadable record, never a valid one.
fn ensure_replaceable(current: StoreResult<LicenseRecord>) -> ManageResult<()> {
    match current {
        Ok(record) if record.is_valid() => Err(ManageError::AlreadyLicensed),
        Ok(_) | Err(StoreError::NotFound) | Err(StoreError::Corrupt(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
