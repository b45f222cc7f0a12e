pub mod retry;

pub use retry::RetryPolicy;

use once_cell::sync::Lazy;
use regex::Regex;
use std::env;

use crate::error::{TestkitError, TestkitResult};
use crate::infrastructure::db::PoolLimits;

/// Environment variables checked for the test database URL, in priority order
pub const DATABASE_URL_VARS: [&str; 3] = ["DATABASE_URL", "SCRY_TEST_DB_URL", "SCRY_DATABASE_URL"];

const CI_VARS: [&str; 6] = [
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "CIRCLECI",
    "TRAVIS",
];

static URL_PASSWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>[a-zA-Z][a-zA-Z0-9+.-]*://[^:/@]*):[^@]*@").unwrap());

#[derive(Clone)]
pub struct TestDbConfig {
    pub database_url: String,
    /// Name of the environment variable the URL was read from
    pub url_source: &'static str,
    pub retry: RetryPolicy,
    pub pool: PoolLimits,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for TestDbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDbConfig")
            .field("database_url", &self.masked_url())
            .field("url_source", &self.url_source)
            .field("retry", &self.retry)
            .field("pool", &self.pool)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

impl TestDbConfig {
    /// Load configuration from the process environment (and `.env`, if present)
    pub fn from_env() -> TestkitResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`TestDbConfig::from_env`], but `None` when no database URL is configured
    pub fn try_from_env() -> Option<Self> {
        dotenvy::dotenv().ok();
        resolve_database_url_from(|key| env::var(key).ok())?;
        Self::from_lookup(|key| env::var(key).ok()).ok()
    }

    pub fn from_lookup<F>(lookup: F) -> TestkitResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (url_source, database_url) = resolve_database_url_from(&lookup).ok_or_else(|| {
            TestkitError::Config(format!(
                "no database URL available; set one of {}",
                DATABASE_URL_VARS.join(", ")
            ))
        })?;

        let config = TestDbConfig {
            database_url,
            url_source,
            retry: RetryPolicy::from_lookup(&lookup)?,
            pool: PoolLimits::default(),
            log_format: lookup("LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(LogFormat::Pretty),
        };

        tracing::debug!(
            source = config.url_source,
            url = %mask_database_url(&config.database_url),
            ci = is_ci_from(&lookup),
            "Resolved test database configuration"
        );

        Ok(config)
    }

    pub fn masked_url(&self) -> String {
        mask_database_url(&self.database_url)
    }
}

/// Resolve the test database URL from the environment
pub fn resolve_database_url() -> Option<(&'static str, String)> {
    resolve_database_url_from(|key| env::var(key).ok())
}

pub fn resolve_database_url_from<F>(lookup: F) -> Option<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    DATABASE_URL_VARS.iter().find_map(|var| {
        lookup(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| (*var, value))
    })
}

/// True when running under a CI system
pub fn is_ci() -> bool {
    is_ci_from(|key| env::var(key).ok())
}

pub fn is_ci_from<F>(lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    CI_VARS.iter().any(|var| {
        lookup(var)
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

/// Replace the password component of a connection URL with `****`
pub fn mask_database_url(url: &str) -> String {
    URL_PASSWORD.replace(url, "$prefix:****@").into_owned()
}
