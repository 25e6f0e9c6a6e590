//! Gateway configuration.
//!
//! Base URLs for the DID/VC provider and the minting service plus the
//! provider service key. Built from environment variables by the binary, or
//! explicitly for tests.

use url::Url;
use zeroize::Zeroizing;

/// Configuration for the outbound HTTP collaborators.
///
/// Custom `Debug` implementation redacts the `service_key` field
/// to prevent credential leakage in log output.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Base URL of the DID/VC provider.
    pub did_url: Url,
    /// Base URL of the minting service.
    pub minter_url: Url,
    /// Key identifying this market to the DID provider.
    pub service_key: Zeroizing<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("did_url", &self.did_url)
            .field("minter_url", &self.minter_url)
            .field("service_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `NFTM_DID_URL` (default: `http://127.0.0.1:8090`)
    /// - `NFTM_MINTER_URL` (default: `http://127.0.0.1:8091`)
    /// - `NFTM_DID_SERVICE_KEY` (required)
    /// - `NFTM_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let service_key =
            std::env::var("NFTM_DID_SERVICE_KEY").map_err(|_| ConfigError::MissingServiceKey)?;

        Ok(Self {
            did_url: env_url("NFTM_DID_URL", "http://127.0.0.1:8090")?,
            minter_url: env_url("NFTM_MINTER_URL", "http://127.0.0.1:8091")?,
            service_key: Zeroizing::new(service_key),
            timeout_secs: env_u64("NFTM_TIMEOUT_SECS", 30)?,
        })
    }

    /// Create a configuration pointing to local mock servers (for testing).
    ///
    /// The DID provider listens on `base_port`, the minter on `base_port + 1`.
    pub fn local_mock(base_port: u16) -> Result<Self, ConfigError> {
        let make_url = |port: u16| -> Result<Url, ConfigError> {
            Url::parse(&format!("http://127.0.0.1:{port}"))
                .map_err(|e| ConfigError::InvalidUrl("localhost".to_string(), e.to_string()))
        };
        Ok(Self {
            did_url: make_url(base_port)?,
            minter_url: make_url(base_port.saturating_add(1))?,
            service_key: Zeroizing::new("test-service-key".to_string()),
            timeout_secs: 5,
        })
    }
}

fn env_url(var: &str, default: &str) -> Result<Url, ConfigError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

fn env_u64(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("NFTM_DID_SERVICE_KEY environment variable is required")]
    MissingServiceKey,
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid value for {0}: {1:?}")]
    InvalidValue(String, String),
}
