//! Per-request enforcement decision.
//!
//! The hosting request pipeline calls [`Gate::check`] (or
//! [`EnforcementEngine::decide`] once it has applied its own bypass list)
//! and turns the returned [`Decision`] into a response. Rules are evaluated
//! in order and the first match wins:
//!
//! 1. console execution allows
//! 2. bypassed path allows (in [`Gate`], never inside the engine)
//! 3. active panic override allows
//! 4. no stored license blocks, unless this host is its own authority and an
//!    injected local source has an active license for it
//! 5. unreadable envelope blocks as invalid
//! 6. `valid` not exactly true blocks (or reports pending)
//! 7. past `expires_at` blocks
//! 8. a `domain` different from the current host blocks
//! 9. otherwise allow
//!
//! Only local file I/O happens here; nothing touches the network.

use crate::error::StoreError;
use crate::overrides::OverrideStore;
use crate::record::{LicenseData, LicenseRecord};
use crate::store::LicenseStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Message shown while the authority has not yet activated the license.
pub const PENDING_MESSAGE: &str =
    "Your license is awaiting activation by the license authority. Please try again later.";

/// Message attached to the synthesized local-authority record.
pub const LOCAL_FALLBACK_MESSAGE: &str = "License active (local DB fallback)";

/// How the current code is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Serving an inbound web request.
    Web,
    /// Administrative or background tooling.
    Console,
}

/// What the engine needs to know about the current request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub execution: ExecutionContext,
    pub path: &'a str,
    /// Host the deployment serves as; compared case-sensitively to the license domain.
    pub host: &'a str,
}

impl<'a> RequestContext<'a> {
    pub fn web(path: &'a str, host: &'a str) -> Self {
        Self {
            execution: ExecutionContext::Web,
            path,
            host,
        }
    }

    pub fn console(host: &'a str) -> Self {
        Self {
            execution: ExecutionContext::Console,
            path: "",
            host,
        }
    }
}

/// Why a request was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    Console,
    Bypassed,
    PanicOverride,
    LocalAuthority,
    Licensed,
}

/// Why a request was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementReason {
    NotPresent,
    Invalid,
    NotActive,
    Expired,
    DomainMismatch,
}

impl EnforcementReason {
    /// Fixed message shown to visitors. There is deliberately no way to change it.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotPresent => {
                "A valid license is required to run this application. Please contact support."
            }
            Self::Invalid => {
                "The installed license appears to be invalid or corrupt. Please reinstall the license."
            }
            Self::NotActive => "The license is not active. Activate the license or contact support.",
            Self::Expired => "Your license has expired. Please renew the license to continue.",
            Self::DomainMismatch => "This license is not valid for this domain.",
        }
    }

    /// Stable machine-readable key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::NotPresent => "not_present",
            Self::Invalid => "invalid",
            Self::NotActive => "not_active",
            Self::Expired => "expired",
            Self::DomainMismatch => "domain_mismatch",
        }
    }
}

/// Outcome of one enforcement evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    Block(EnforcementReason),
    /// The authority has the license pending; treated as not allowed.
    Pending,
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Visitor-facing message for non-allow outcomes.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::Allow(_) => None,
            Self::Block(reason) => Some(reason.message()),
            Self::Pending => Some(PENDING_MESSAGE),
        }
    }
}

/// Active license known to a local authority database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalLicense {
    pub license_key: String,
    pub domain: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Optional capability provided by hosts that are their own authority.
pub trait LocalLicenseSource: Send + Sync {
    /// An active license for `domain`, if the local database has one.
    fn active_license(&self, domain: &str) -> Option<LocalLicense>;
}

/// Request path prefixes that skip enforcement.
#[derive(Debug, Clone, Default)]
pub struct BypassList {
    prefixes: Vec<String>,
}

impl BypassList {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

struct SelfAuthority {
    source: Arc<dyn LocalLicenseSource>,
    authority_url: String,
}

/// Stateless decision engine over the license store and override token.
pub struct EnforcementEngine {
    store: Arc<LicenseStore>,
    overrides: OverrideStore,
    self_authority: Option<SelfAuthority>,
}

impl std::fmt::Debug for EnforcementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementEngine")
            .field("store", &self.store.path())
            .field("overrides", &self.overrides.path())
            .field("self_authority", &self.self_authority.is_some())
            .finish()
    }
}

impl EnforcementEngine {
    pub fn new(store: Arc<LicenseStore>, overrides: OverrideStore) -> Self {
        Self {
            store,
            overrides,
            self_authority: None,
        }
    }

    /// Enables the local-authority fallback. Only call this when the
    /// configured authority resolves to this deployment's own host.
    pub fn with_local_authority(
        mut self,
        source: Arc<dyn LocalLicenseSource>,
        authority_url: impl Into<String>,
    ) -> Self {
        self.self_authority = Some(SelfAuthority {
            source,
            authority_url: authority_url.into(),
        });
        self
    }

    /// Evaluates rules 1 and 3–9 for a request.
    pub fn decide(&self, ctx: &RequestContext<'_>, now: DateTime<Utc>) -> Decision {
        let decision = self.evaluate(ctx, now);
        match decision {
            Decision::Allow(reason) => trace!(path = ctx.path, ?reason, "request allowed"),
            Decision::Block(reason) => {
                warn!(path = ctx.path, reason = reason.key(), "request blocked by license gate")
            }
            Decision::Pending => warn!(path = ctx.path, "request blocked: license pending"),
        }
        decision
    }

    fn evaluate(&self, ctx: &RequestContext<'_>, now: DateTime<Utc>) -> Decision {
        if ctx.execution == ExecutionContext::Console {
            return Decision::Allow(AllowReason::Console);
        }

        if self
            .overrides
            .load()
            .is_some_and(|token| token.is_active_at(now))
        {
            return Decision::Allow(AllowReason::PanicOverride);
        }

        let record = match self.store.load() {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                return match self.local_authority_fallback(ctx.host, now) {
                    Some(decision) => decision,
                    None => Decision::Block(EnforcementReason::NotPresent),
                };
            }
            Err(_) => return Decision::Block(EnforcementReason::Invalid),
        };

        if record.license_key.trim().is_empty() {
            return Decision::Block(EnforcementReason::Invalid);
        }

        if !record.data.valid {
            return if record.data.pending {
                Decision::Pending
            } else {
                Decision::Block(EnforcementReason::NotActive)
            };
        }

        if record.data.is_expired_at(now) {
            return Decision::Block(EnforcementReason::Expired);
        }

        if !record.domain.is_empty() && record.domain != ctx.host {
            return Decision::Block(EnforcementReason::DomainMismatch);
        }

        Decision::Allow(AllowReason::Licensed)
    }

    fn local_authority_fallback(&self, host: &str, now: DateTime<Utc>) -> Option<Decision> {
        let authority = self.self_authority.as_ref()?;
        let local = authority.source.active_license(host)?;
        if local.expires_at.is_some_and(|exp| exp <= now) {
            debug!(domain = %local.domain, "local authority license has expired");
            return None;
        }

        let record = LicenseRecord::new(
            local.license_key,
            local.domain,
            LicenseData {
                message: Some(LOCAL_FALLBACK_MESSAGE.to_string()),
                ..LicenseData::active(local.expires_at)
            },
            now,
        )
        .with_authority(Some(authority.authority_url.clone()));

        if let Err(e) = self.store.save(&record) {
            warn!(error = %e, "could not persist local authority license; allowing anyway");
        }
        Some(Decision::Allow(AllowReason::LocalAuthority))
    }
}

/// Bypass list in front of the engine: the composition a request pipeline uses.
#[derive(Debug)]
pub struct Gate {
    bypass: BypassList,
    engine: EnforcementEngine,
}

impl Gate {
    pub fn new(bypass: BypassList, engine: EnforcementEngine) -> Self {
        Self { bypass, engine }
    }

    #[must_use]
    pub fn engine(&self) -> &EnforcementEngine {
        &self.engine
    }

    pub fn check(&self, ctx: &RequestContext<'_>, now: DateTime<Utc>) -> Decision {
        if ctx.execution == ExecutionContext::Web && self.bypass.matches(ctx.path) {
            return Decision::Allow(AllowReason::Bypassed);
        }
        self.engine.decide(ctx, now)
    }
}
