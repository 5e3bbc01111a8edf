//! License gate for a self-hosted web application.
//!
//! This crate handles:
//! - Encrypted, versioned storage of the license issued by the authority
//! - Verification of authority-signed payloads (key set first, bundled key second)
//! - The per-request enforcement decision
//! - Ingestion of licenses pushed by the authority
//! - Time-boxed panic overrides
//! - Operator install / re-verify / remove flows
//!
//! # Design Principles
//!
//! - **Fail closed**: a corrupt file, a bad signature or an unknown key never allows
//! - **No network on the request path**: enforcement reads two local files only
//! - **Fixed messages**: block messages cannot be changed by the host application
//! - **One fatal condition**: a reachable authority that no longer publishes the bundled key

mod authority;
mod config;
mod enforcement;
mod error;
mod host;
mod keyset;
mod manage;
mod overrides;
mod persist;
mod push;
mod record;
mod store;
mod trust;

pub use authority::{AuthorityClient, AuthorityEndpoints, AuthorityVerdict};
pub use config::{
    CodecSecret, GateConfig, DEFAULT_AUTHORITY_URL, DEFAULT_BYPASS_PATHS, LICENSE_FILE,
    OVERRIDE_FILE,
};
pub use enforcement::{
    AllowReason, BypassList, Decision, EnforcementEngine, EnforcementReason, ExecutionContext,
    Gate, LocalLicense, LocalLicenseSource, RequestContext, LOCAL_FALLBACK_MESSAGE,
    PENDING_MESSAGE,
};
pub use error::{
    AuthorityError, AuthorityResult, ConfigError, ConfigResult, ManageError, ManageResult,
    OverrideError, OverrideResult, PushError, PushResult, SignatureError, SignatureResult,
    StoreError, StoreResult, TrustError,
};
pub use host::{machine_hostname, url_host};
pub use keyset::{parse_public_key_pem, public_key_from_certificate, rsa_components_b64url, Jwk, KeySet};
pub use manage::{LicenseManager, LicenseStatusView};
pub use overrides::{OverrideStore, OverrideToken, PanicUnlock, RemoveOutcome};
pub use push::{health, PushHealth, PushReceiver, PushRequest};
pub use record::{EncryptedEnvelope, LicenseData, LicenseRecord};
pub use store::LicenseStore;
pub use trust::{canonical_json, canonical_value, verify_with_key, KeySource, SelfCheck, SkipReason, TrustResolver};

pub use rsa::RsaPublicKey;
