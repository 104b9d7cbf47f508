//! Configuration loading and representation.
//!
//! A JSON file named by `TRUSTGATE_CONFIG` (optional) provides the base;
//! individual `TRUSTGATE_*` environment variables override it. Every field
//! has a default, so an empty environment yields a runnable development setup.

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use jsonwebtoken::Algorithm;
use jsonwebtoken::jwk::Jwk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use trustgate_auth::{KeyError, KeyMaterial};
use trustgate_core::{ClientId, KeyId};

use crate::broker::BrokerSettings;
use crate::issuer::IssuerSettings;

const DEV_SECRET: &str = "trustgate-insecure-development-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("{0}")]
    Missing(&'static str),
}

fn default_bind_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_issuer() -> String {
    "http://localhost:9000".to_string()
}

fn default_access_ttl() -> u64 {
    3600
}

fn default_refresh_ttl() -> u64 {
    86400
}

fn default_role_prefix() -> String {
    "ROLE_".to_string()
}

fn default_rotate_refresh() -> bool {
    true
}

fn default_open_paths() -> Vec<String> {
    [
        "/api/auth/login",
        "/api/auth/register",
        "/api/auth/refreshtoken",
        "/api/auth/logout",
        "/oauth2/token",
        "/.well-known/jwks.json",
        "/actuator",
        "/health",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustgateConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default)]
    pub signing: SigningConfig,

    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Clock skew tolerated by verifiers.
    #[serde(default)]
    pub leeway_secs: u64,

    #[serde(default = "default_role_prefix")]
    pub role_prefix: String,

    #[serde(default = "default_rotate_refresh")]
    pub rotate_refresh_tokens: bool,

    /// Path prefixes the gateway lets through without a bearer token.
    #[serde(default = "default_open_paths")]
    pub open_paths: Vec<String>,

    #[serde(default)]
    pub broker: BrokerConfig,
}

impl Default for TrustgateConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            issuer: default_issuer(),
            signing: SigningConfig::default(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            leeway_secs: 0,
            role_prefix: default_role_prefix(),
            rotate_refresh_tokens: default_rotate_refresh(),
            open_paths: default_open_paths(),
            broker: BrokerConfig::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SigningConfig {
    pub kid: String,
    pub algorithm: Algorithm,
    /// HMAC shared secret.
    pub secret: Option<String>,
    /// PEM files for asymmetric algorithms.
    pub private_key_path: Option<PathBuf>,
    pub public_key_path: Option<PathBuf>,
    /// Public JWK (JSON file) published at the JWKS endpoint.
    pub public_jwk_path: Option<PathBuf>,
}

impl core::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .field("public_jwk_path", &self.public_jwk_path)
            .finish()
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            kid: "trustgate-1".to_string(),
            algorithm: Algorithm::HS256,
            secret: None,
            private_key_path: None,
            public_key_path: None,
            public_jwk_path: None,
        }
    }
}

/// Outbound service identity for the client-credentials broker.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BrokerConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_url: Option<String>,
    /// Base URL of the product service called by the sample order routes.
    pub product_service_url: Option<String>,
    pub timeout_ms: u64,
    pub refresh_ratio: f64,
}

impl core::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("token_url", &self.token_url)
            .field("product_service_url", &self.product_service_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("refresh_ratio", &self.refresh_ratio)
            .finish()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: None,
            product_service_url: None,
            timeout_ms: 5000,
            refresh_ratio: 0.8,
        }
    }
}

impl BrokerConfig {
    pub fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            timeout: StdDuration::from_millis(self.timeout_ms),
            refresh_ratio: self.refresh_ratio,
        }
    }

    /// Broker identity, when fully configured.
    pub fn identity(&self) -> Result<Option<(ClientId, String, String)>, ConfigError> {
        let (Some(id), Some(secret), Some(url)) =
            (&self.client_id, &self.client_secret, &self.token_url)
        else {
            return Ok(None);
        };
        let id = ClientId::parse(id).map_err(|e| ConfigError::InvalidVar {
            var: "TRUSTGATE_BROKER_CLIENT_ID",
            reason: e.to_string(),
        })?;
        Ok(Some((id, secret.clone(), url.clone())))
    }
}

impl TrustgateConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` for variable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup("TRUSTGATE_CONFIG") {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };

        if let Some(v) = lookup("TRUSTGATE_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Some(v) = lookup("TRUSTGATE_ISSUER") {
            cfg.issuer = v;
        }
        if let Some(v) = lookup("TRUSTGATE_SIGNING_KID") {
            cfg.signing.kid = v;
        }
        if let Some(v) = lookup("TRUSTGATE_SIGNING_ALGORITHM") {
            cfg.signing.algorithm = v.parse().map_err(|_| ConfigError::InvalidVar {
                var: "TRUSTGATE_SIGNING_ALGORITHM",
                reason: format!("unsupported algorithm '{v}'"),
            })?;
        }
        if let Some(v) = lookup("TRUSTGATE_SIGNING_SECRET") {
            cfg.signing.secret = Some(v);
        }
        if let Some(v) = lookup("TRUSTGATE_SIGNING_PRIVATE_KEY_PATH") {
            cfg.signing.private_key_path = Some(v.into());
        }
        if let Some(v) = lookup("TRUSTGATE_SIGNING_PUBLIC_KEY_PATH") {
            cfg.signing.public_key_path = Some(v.into());
        }
        if let Some(v) = lookup("TRUSTGATE_SIGNING_PUBLIC_JWK_PATH") {
            cfg.signing.public_jwk_path = Some(v.into());
        }
        if let Some(v) = lookup("TRUSTGATE_ACCESS_TOKEN_TTL_SECS") {
            cfg.access_token_ttl_secs = parse_var("TRUSTGATE_ACCESS_TOKEN_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("TRUSTGATE_REFRESH_TOKEN_TTL_SECS") {
            cfg.refresh_token_ttl_secs = parse_var("TRUSTGATE_REFRESH_TOKEN_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("TRUSTGATE_LEEWAY_SECS") {
            cfg.leeway_secs = parse_var("TRUSTGATE_LEEWAY_SECS", &v)?;
        }
        if let Some(v) = lookup("TRUSTGATE_ROLE_PREFIX") {
            cfg.role_prefix = v;
        }
        if let Some(v) = lookup("TRUSTGATE_ROTATE_REFRESH_TOKENS") {
            cfg.rotate_refresh_tokens = parse_var("TRUSTGATE_ROTATE_REFRESH_TOKENS", &v)?;
        }
        if let Some(v) = lookup("TRUSTGATE_OPEN_PATHS") {
            cfg.open_paths = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("TRUSTGATE_BROKER_CLIENT_ID") {
            cfg.broker.client_id = Some(v);
        }
        if let Some(v) = lookup("TRUSTGATE_BROKER_CLIENT_SECRET") {
            cfg.broker.client_secret = Some(v);
        }
        if let Some(v) = lookup("TRUSTGATE_BROKER_TOKEN_URL") {
            cfg.broker.token_url = Some(v);
        }
        if let Some(v) = lookup("TRUSTGATE_BROKER_PRODUCT_SERVICE_URL") {
            cfg.broker.product_service_url = Some(v);
        }
        if let Some(v) = lookup("TRUSTGATE_BROKER_TIMEOUT_MS") {
            cfg.broker.timeout_ms = parse_var("TRUSTGATE_BROKER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("TRUSTGATE_BROKER_REFRESH_RATIO") {
            cfg.broker.refresh_ratio = parse_var("TRUSTGATE_BROKER_REFRESH_RATIO", &v)?;
        }

        if cfg.access_token_ttl_secs == 0 || cfg.refresh_token_ttl_secs == 0 {
            return Err(ConfigError::InvalidVar {
                var: "TRUSTGATE_*_TOKEN_TTL_SECS",
                reason: "token lifetimes must be positive".into(),
            });
        }
        Ok(cfg)
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn issuer_settings(&self) -> IssuerSettings {
        IssuerSettings {
            issuer: Some(self.issuer.clone()),
            access_ttl: secs(self.access_token_ttl_secs),
            refresh_ttl: secs(self.refresh_token_ttl_secs),
            role_prefix: self.role_prefix.clone(),
            rotate_refresh: self.rotate_refresh_tokens,
            leeway_secs: self.leeway_secs,
        }
    }

    /// Build the signing key described by `signing`.
    ///
    /// HMAC without a configured secret falls back to an insecure development
    /// secret.
    pub fn signing_key(&self) -> Result<KeyMaterial, ConfigError> {
        let signing = &self.signing;
        let kid = KeyId::parse(&signing.kid).map_err(|e| ConfigError::InvalidVar {
            var: "TRUSTGATE_SIGNING_KID",
            reason: e.to_string(),
        })?;

        if matches!(signing.algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            let secret = match &signing.secret {
                Some(secret) => secret.clone(),
                None => {
                    tracing::warn!("TRUSTGATE_SIGNING_SECRET not set; using insecure dev default");
                    DEV_SECRET.to_string()
                }
            };
            return Ok(KeyMaterial::hmac(kid, signing.algorithm, secret.as_bytes())?);
        }

        let public_path = signing
            .public_key_path
            .clone()
            .ok_or(ConfigError::Missing(
                "asymmetric signing requires TRUSTGATE_SIGNING_PUBLIC_KEY_PATH",
            ))?;
        let private_path = signing
            .private_key_path
            .clone()
            .ok_or(ConfigError::Missing(
                "asymmetric signing requires TRUSTGATE_SIGNING_PRIVATE_KEY_PATH",
            ))?;
        let public_pem = read_bytes(public_path)?;
        let private_pem = read_bytes(private_path)?;
        let mut key =
            KeyMaterial::asymmetric_pem(kid, signing.algorithm, Some(&private_pem), &public_pem)?;

        if let Some(path) = signing.public_jwk_path.clone() {
            let raw = read_bytes(path.clone())?;
            let jwk: Jwk =
                serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse { path, source })?;
            key = key.with_public_jwk(jwk);
        }
        Ok(key)
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

fn read_bytes(path: PathBuf) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(&path).map_err(|source| ConfigError::Read { path, source })
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: core::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidVar {
        var,
        reason: e.to_string(),
    })
}
