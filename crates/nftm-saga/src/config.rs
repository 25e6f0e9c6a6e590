//! Saga configuration.
//!
//! Everything the saga would otherwise read from the environment mid-flight
//! is collected here and passed explicitly into each component.

use std::time::Duration;

/// How long a synchronous caller waits for an asynchronous mint result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyPolicy {
    /// Delay between two polls.
    pub poll_interval: Duration,
    /// Number of polls before giving up. A value of 0 still polls once:
    /// the listing is always read at least one time before a timeout.
    pub max_retries: u32,
}

impl Default for ConsistencyPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_retries: 10,
        }
    }
}

/// Mint outbox dispatch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxPolicy {
    /// Entries handled per worker pass.
    pub batch_size: i64,
    /// Dispatch attempts before an entry is left for operators.
    pub max_attempts: i32,
    /// Delay between two worker passes.
    pub worker_tick: Duration,
    /// Age after which an unfinished claim may be taken over.
    pub claim_lease: Duration,
    /// How long an accepted mint may go unobserved before its entry is
    /// failed and becomes eligible for another dispatch.
    pub mint_deadline: Duration,
}

impl Default for OutboxPolicy {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 5,
            worker_tick: Duration::from_secs(2),
            claim_lease: Duration::from_secs(60),
            mint_deadline: Duration::from_secs(15 * 60),
        }
    }
}

/// Top-level saga configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub consistency: ConsistencyPolicy,
    pub outbox: OutboxPolicy,
    /// Credential type issued when a seller's wallet names none.
    pub default_vc_type: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyPolicy::default(),
            outbox: OutboxPolicy::default(),
            default_vc_type: "NftOwnershipCredential".to_string(),
        }
    }
}

impl SagaConfig {
    /// Load configuration from environment variables, falling back to
    /// [`SagaConfig::default`] for anything unset.
    ///
    /// Variables:
    /// - `NFTM_POLL_INTERVAL_MS`
    /// - `NFTM_POLL_RETRIES`
    /// - `NFTM_OUTBOX_BATCH`
    /// - `NFTM_OUTBOX_MAX_ATTEMPTS`
    /// - `NFTM_WORKER_TICK_MS`
    /// - `NFTM_OUTBOX_LEASE_SECS`
    /// - `NFTM_MINT_DEADLINE_SECS`
    /// - `NFTM_DEFAULT_VC_TYPE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_retries = env_parse("NFTM_POLL_RETRIES", defaults.consistency.max_retries)?;
        if max_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "NFTM_POLL_RETRIES".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            consistency: ConsistencyPolicy {
                poll_interval: Duration::from_millis(env_parse(
                    "NFTM_POLL_INTERVAL_MS",
                    millis(defaults.consistency.poll_interval),
                )?),
                max_retries,
            },
            outbox: OutboxPolicy {
                batch_size: env_parse("NFTM_OUTBOX_BATCH", defaults.outbox.batch_size)?,
                max_attempts: env_parse("NFTM_OUTBOX_MAX_ATTEMPTS", defaults.outbox.max_attempts)?,
                worker_tick: Duration::from_millis(env_parse(
                    "NFTM_WORKER_TICK_MS",
                    millis(defaults.outbox.worker_tick),
                )?),
                claim_lease: Duration::from_secs(env_parse(
                    "NFTM_OUTBOX_LEASE_SECS",
                    defaults.outbox.claim_lease.as_secs(),
                )?),
                mint_deadline: Duration::from_secs(env_parse(
                    "NFTM_MINT_DEADLINE_SECS",
                    defaults.outbox.mint_deadline.as_secs(),
                )?),
            },
            default_vc_type: std::env::var("NFTM_DEFAULT_VC_TYPE").unwrap_or(defaults.default_vc_type),
        })
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
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
    #[error("invalid value for {0}: {1:?}")]
    InvalidValue(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SagaConfig::default();
        assert!(cfg.consistency.max_retries >= 1);
        assert!(cfg.outbox.max_attempts >= 1);
        assert!(cfg.outbox.mint_deadline > cfg.outbox.claim_lease);
        assert_eq!(cfg.default_vc_type, "NftOwnershipCredential");
    }

    #[test]
    fn env_parse_falls_back_and_rejects() {
        assert_eq!(env_parse("NFTM_NONEXISTENT_VAR_9917", 7u32).unwrap(), 7);
        std::env::set_var("NFTM_TEST_BAD_BATCH", "many");
        let result = env_parse::<i64>("NFTM_TEST_BAD_BATCH", 50);
        std::env::remove_var("NFTM_TEST_BAD_BATCH");
        assert!(result.is_err());
    }
}
