//! Deployment configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, and environment variables. Nothing here is request-time input.

use crate::error::{ConfigError, ConfigResult};
use crate::host::{machine_hostname, url_host};
use hearth_crypto::{Codec, CodecKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default authority base URL.
pub const DEFAULT_AUTHORITY_URL: &str = "https://hearth.master-data.ro";

/// Envelope file name inside the storage directory.
pub const LICENSE_FILE: &str = "license.json";

/// Override token file name inside the storage directory.
pub const OVERRIDE_FILE: &str = "license_client_unlock.json";

/// Paths that bypass enforcement by default (prefix match).
pub const DEFAULT_BYPASS_PATHS: &[&str] = &[
    "/health",
    "/.well-known/push-license",
    "/.well-known/jwks.json",
    "/keys/pem",
    "/licente",
    "/licenta",
    "/setari",
];

/// Secret the codec key is resolved from. Never printed or written back out.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct CodecSecret(String);

impl CodecSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for CodecSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CodecSecret([REDACTED])")
    }
}

/// License gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Base URL of the license authority. `None` disables all network trust steps.
    pub authority_url: Option<String>,
    /// Public URL of this application; its host is the licensed domain.
    pub app_url: Option<String>,
    /// Verify endpoint, relative to the authority.
    pub verify_endpoint: String,
    /// Public key PEM endpoint, relative to the authority.
    pub pem_endpoint: String,
    /// Key set endpoint, relative to the authority.
    pub jwks_path: String,
    /// Deadline for every authority call, in seconds.
    pub remote_timeout_secs: u64,
    /// Directory holding the envelope and override token.
    pub storage_dir: PathBuf,
    /// PEM file with the bundled authority public key.
    pub bundled_key_path: Option<PathBuf>,
    /// Request path prefixes that skip enforcement.
    pub bypass_paths: Vec<String>,
    /// Lifetime of a panic override, in seconds.
    pub max_unlock_ttl_secs: u64,
    /// Whether panic override changes are audit-logged.
    pub audit_unlocks: bool,
    #[serde(skip_serializing)]
    pub codec_secret: Option<CodecSecret>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            authority_url: Some(DEFAULT_AUTHORITY_URL.to_string()),
            app_url: None,
            verify_endpoint: "/api/verify".to_string(),
            pem_endpoint: "/keys/pem".to_string(),
            jwks_path: "/.well-known/jwks.json".to_string(),
            remote_timeout_secs: 5,
            storage_dir: default_storage_dir(),
            bundled_key_path: None,
            bypass_paths: DEFAULT_BYPASS_PATHS.iter().map(|p| p.to_string()).collect(),
            max_unlock_ttl_secs: 3600,
            audit_unlocks: true,
            codec_secret: None,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("hearth-license"))
        .unwrap_or_else(|| PathBuf::from("storage"))
}

impl GateConfig {
    /// Loads defaults, then `path` (if given), then the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(toml: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(toml)?)
    }

    /// Applies environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LICENSE_AUTHORITY_URL") {
            self.authority_url = Some(v);
        }
        if let Some(v) = get("LICENSE_VERIFY_ENDPOINT") {
            self.verify_endpoint = v;
        }
        if let Some(v) = get("LICENSE_PEM_ENDPOINT") {
            self.pem_endpoint = v;
        }
        if let Some(v) = get("APP_URL") {
            self.app_url = Some(v);
        }
        if let Some(v) = get("LICENSE_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LICENSE_BUNDLED_KEY") {
            self.bundled_key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LICENSE_REMOTE_TIMEOUT") {
            self.remote_timeout_secs = parse_secs("LICENSE_REMOTE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("LICENSE_MAX_UNLOCK_TTL") {
            self.max_unlock_ttl_secs = parse_secs("LICENSE_MAX_UNLOCK_TTL", &v)?;
        }
        if let Some(v) = get("LICENSE_AUDIT_UNLOCKS") {
            self.audit_unlocks = parse_bool("LICENSE_AUDIT_UNLOCKS", &v)?;
        }
        if let Some(v) = get("LICENSE_CODEC_KEY").or_else(|| get("APP_KEY")) {
            self.codec_secret = Some(CodecSecret::new(v));
        }
        Ok(())
    }

    /// Rejects values that would make the gate misbehave silently.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = &self.authority_url {
            if url_host(url).is_none() {
                return Err(ConfigError::InvalidValue {
                    name: "authority_url",
                    reason: format!("not an absolute URL: {url}"),
                });
            }
        }
        if self.remote_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "remote_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_unlock_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_unlock_ttl_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Host this deployment is licensed for: the host of `app_url`, else the
    /// machine hostname.
    #[must_use]
    pub fn app_host(&self) -> String {
        self.app_url
            .as_deref()
            .and_then(url_host)
            .unwrap_or_else(machine_hostname)
    }

    /// Authority base URL without a trailing slash.
    #[must_use]
    pub fn authority_base(&self) -> Option<&str> {
        self.authority_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
    }

    /// True when this deployment is its own licensing authority.
    #[must_use]
    pub fn is_self_authority(&self) -> bool {
        let Some(authority_host) = self.authority_base().and_then(url_host) else {
            return false;
        };
        authority_host.eq_ignore_ascii_case(&self.app_host())
    }

    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    #[must_use]
    pub fn max_unlock_ttl(&self) -> Duration {
        Duration::from_secs(self.max_unlock_ttl_secs)
    }

    #[must_use]
    pub fn license_path(&self) -> PathBuf {
        self.storage_dir.join(LICENSE_FILE)
    }

    #[must_use]
    pub fn override_path(&self) -> PathBuf {
        self.storage_dir.join(OVERRIDE_FILE)
    }

    /// Builds the process-wide envelope codec from the configured secret.
    pub fn codec(&self) -> ConfigResult<Codec> {
        let secret = self
            .codec_secret
            .as_ref()
            .ok_or_else(|| ConfigError::InvalidValue {
                name: "codec_secret",
                reason: "not configured (set LICENSE_CODEC_KEY or APP_KEY)".to_string(),
            })?;
        Ok(Codec::new(CodecKey::from_secret(secret.expose())?))
    }
}

fn parse_secs(name: &'static str, value: &str) -> ConfigResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            name,
            reason: e.to_string(),
        })
}

fn parse_bool(name: &'static str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            name,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}
