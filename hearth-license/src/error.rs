//! Error types for the license gate.
//!
//! Every variant here resolves to the restrictive outcome at the call site:
//! enforcement blocks, push ingestion rejects, the boot self-check aborts.

use thiserror::Error;

/// Result type for license store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the encrypted license store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No envelope exists on disk.
    #[error("no license installed")]
    NotFound,

    /// The envelope exists but cannot be parsed or decrypted.
    #[error("license envelope is corrupt: {0}")]
    Corrupt(String),

    /// The stored license is valid and may not be removed interactively.
    #[error("a valid license cannot be removed")]
    Forbidden,

    /// Filesystem failure.
    #[error("license storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be encoded or encrypted for writing.
    #[error("license could not be encoded: {0}")]
    Encode(String),
}

/// Result type for signature verification.
pub type SignatureResult<T> = Result<T, SignatureError>;

/// Errors from signature verification. None of these is ever a pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Neither the key set nor the bundled key yielded a usable public key.
    #[error("no verification key available")]
    KeyUnavailable,

    /// The signature does not match the payload under the resolved key.
    #[error("signature does not match payload")]
    Mismatch,

    /// A network step exceeded its deadline and no fallback applied.
    #[error("verification timed out")]
    Timeout,

    /// Signature bytes or payload were not in a verifiable form.
    #[error("malformed signature input: {0}")]
    Malformed(String),
}

/// Fatal trust-anchor errors raised by the boot self-check.
#[derive(Debug, Error)]
pub enum TrustError {
    /// The authority is reachable but publishes no key matching the bundled one.
    #[error(
        "bundled public key does not match any key published by the authority; \
         refusing to run with a verification key the authority no longer trusts"
    )]
    BundledKeyMismatch,
}

/// Result type for authority calls.
pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Errors talking to the license authority.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// No authority URL is configured.
    #[error("no license authority configured")]
    NotConfigured,

    /// Connection failure. Safe to retry.
    #[error("license authority unreachable: {0}")]
    Unreachable(String),

    /// The call exceeded the configured deadline. Safe to retry.
    #[error("license authority timed out")]
    Timeout,

    /// The authority answered with a non-success status.
    #[error("license authority returned HTTP {0}")]
    Status(u16),

    /// The authority answered with a body we do not understand.
    #[error("unexpected response from license authority: {0}")]
    UnexpectedResponse(String),
}

impl AuthorityError {
    /// Returns true if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AuthorityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() {
            Self::Unreachable(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() {
            Self::UnexpectedResponse(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Result type for push ingestion.
pub type PushResult<T> = Result<T, PushError>;

/// Rejections from the authority push endpoint.
#[derive(Debug, Error)]
pub enum PushError {
    /// Payload or signature missing, or the signature is not valid base64.
    #[error("malformed push request: {0}")]
    MalformedRequest(String),

    /// The verified payload is not a usable license.
    #[error("invalid payload format: {0}")]
    MalformedPayload(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    SignatureInvalid(#[source] SignatureError),

    /// The payload is bound to a different host.
    #[error("domain mismatch: license is for {licensed}, this host is {current}")]
    DomainMismatch { licensed: String, current: String },

    /// The verified license could not be written.
    #[error("failed to save license: {0}")]
    StorageFailure(#[source] StoreError),
}

impl PushError {
    /// HTTP status code the push endpoint answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequest(_) | Self::MalformedPayload(_) => 400,
            Self::SignatureInvalid(SignatureError::KeyUnavailable) => 500,
            Self::SignatureInvalid(_) | Self::DomainMismatch { .. } => 403,
            Self::StorageFailure(_) => 500,
        }
    }
}

/// Result type for override token operations.
pub type OverrideResult<T> = Result<T, OverrideError>;

/// Errors creating or removing the panic override.
#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("override token I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("override token could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for interactive license management.
pub type ManageResult<T> = Result<T, ManageError>;

/// Errors surfaced to the interactive management flow.
#[derive(Debug, Error)]
pub enum ManageError {
    #[error("license key is empty")]
    EmptyKey,

    #[error("no license installed")]
    NotInstalled,

    /// A valid license is stored; only re-verification or a push replaces it.
    #[error("a valid license is already installed")]
    AlreadyLicensed,

    #[error("stored license changed during re-verification, run it again")]
    Conflict,

    /// The authority could not be reached; the caller may try again.
    #[error("license authority is temporarily unavailable, please retry: {0}")]
    AuthorityUnavailable(String),

    #[error(transparent)]
    Authority(AuthorityError),

    #[error("authority response signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthorityError> for ManageError {
    fn from(err: AuthorityError) -> Self {
        if err.is_retryable() {
            Self::AuthorityUnavailable(err.to_string())
        } else {
            Self::Authority(err)
        }
    }
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors loading deployment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("codec key unavailable: {0}")]
    Codec(#[from] hearth_crypto::CryptoError),
}
