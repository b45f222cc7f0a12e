use std::str::FromStr;
use std::time::Duration;

use crate::error::{TestkitError, TestkitResult};

use super::is_ci_from;

/// Connection retry and health-check policy, consumed once when provisioning.
///
/// Attempts are bounded by `max_retries + 1`. The delay before retry `n`
/// (1-based) is `initial_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for opening the pool on a single attempt
    pub connect_timeout: Duration,
    /// Upper bound for the `SELECT 1` validation query
    pub validation_timeout: Duration,
    /// Run the validation query after connecting
    pub health_check: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            validation_timeout: Duration::from_secs(5),
            health_check: true,
        }
    }
}

impl RetryPolicy {
    /// Slower, more patient settings for CI where the database container may start late
    pub fn ci() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            validation_timeout: Duration::from_secs(5),
            health_check: true,
        }
    }

    /// Default retries without the validation query
    pub fn disabled() -> Self {
        Self {
            health_check: false,
            ..Self::default()
        }
    }

    /// CI preset under CI, default otherwise, plus `TEST_DB_*` overrides
    pub fn from_env() -> TestkitResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> TestkitResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = if is_ci_from(&lookup) {
            Self::ci()
        } else {
            Self::default()
        };

        if let Some(v) = parse_var::<u32, _>(&lookup, "TEST_DB_MAX_RETRIES")? {
            policy.max_retries = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "TEST_DB_INITIAL_DELAY_MS")? {
            policy.initial_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "TEST_DB_MAX_DELAY_MS")? {
            policy.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "TEST_DB_CONNECT_TIMEOUT_MS")? {
            policy.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "TEST_DB_VALIDATION_TIMEOUT_MS")? {
            policy.validation_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, "TEST_DB_HEALTH_CHECK")? {
            policy.health_check = v;
        }

        Ok(policy)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Upper bound on the wall-clock time a fully failing provisioning run can take
    pub fn worst_case_duration(&self) -> Duration {
        let per_attempt = if self.health_check {
            self.connect_timeout + self.validation_timeout
        } else {
            self.connect_timeout
        };
        let attempts = self.max_attempts();
        let backoff: Duration = (1..attempts).map(|n| self.backoff_delay(n)).sum();
        per_attempt * attempts + backoff
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> TestkitResult<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .to_lowercase()
            .parse::<T>()
            .map(Some)
            .map_err(|_| TestkitError::Config(format!("invalid value for {}: {:?}", key, raw))),
    }
}
