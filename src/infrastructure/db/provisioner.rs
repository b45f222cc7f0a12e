use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;

use super::migrator::{EmbeddedMigrator, SchemaMigrator};
use super::{check_connection, pool_options, DbPool, PoolLimits};
use crate::error::{TestkitError, TestkitResult};
use crate::infrastructure::config::{mask_database_url, RetryPolicy, TestDbConfig};

/// Why a single connection attempt failed. Never leaves this module:
/// callers only see `RetriesExhausted` or `DeadlineExceeded`.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connect failed: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("validation query timed out after {0:?}")]
    ValidationTimeout(Duration),

    #[error("validation query failed: {0}")]
    Validation(#[source] sqlx::Error),
}

/// Opens pools against the test database, retrying transient failures, and
/// applies the schema exactly once per instance.
pub struct Provisioner {
    database_url: String,
    policy: RetryPolicy,
    pool_limits: PoolLimits,
    deadline: Option<Duration>,
    migrator: Arc<dyn SchemaMigrator>,
    migrated: OnceCell<()>,
    migration_runs: AtomicU32,
    handle: OnceCell<DbPool>,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("database_url", &self.masked_url())
            .field("policy", &self.policy)
            .field("pool_limits", &self.pool_limits)
            .field("deadline", &self.deadline)
            .field("migrator", &self.migrator.name())
            .field("migrated", &self.is_migrated())
            .finish()
    }
}

impl Provisioner {
    pub fn new(database_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            database_url: database_url.into(),
            policy,
            pool_limits: PoolLimits::default(),
            deadline: None,
            migrator: Arc::new(EmbeddedMigrator),
            migrated: OnceCell::new(),
            migration_runs: AtomicU32::new(0),
            handle: OnceCell::new(),
        }
    }

    pub fn from_config(config: &TestDbConfig) -> Self {
        Self::new(config.database_url.clone(), config.retry).with_pool_limits(config.pool)
    }

    pub fn from_env() -> TestkitResult<Self> {
        Ok(Self::from_config(&TestDbConfig::from_env()?))
    }

    pub fn with_migrator(mut self, migrator: impl SchemaMigrator + 'static) -> Self {
        self.migrator = Arc::new(migrator);
        self
    }

    pub fn with_pool_limits(mut self, limits: PoolLimits) -> Self {
        self.pool_limits = limits;
        self
    }

    /// Bound the whole connect phase; retries stop once it would be exceeded
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn masked_url(&self) -> String {
        mask_database_url(&self.database_url)
    }

    /// How many times the migrator has been started by this instance
    pub fn migration_runs(&self) -> u32 {
        self.migration_runs.load(Ordering::SeqCst)
    }

    pub fn is_migrated(&self) -> bool {
        self.migrated.initialized()
    }

    /// Open a pool and validate it, retrying with exponential backoff.
    pub async fn connect(&self) -> TestkitResult<DbPool> {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts();
        let mut last_error = String::from("no connection attempt made");

        for attempt in 1..=max_attempts {
            let budget = match self.remaining(started) {
                Some(budget) if budget.is_zero() => {
                    return Err(self.deadline_exceeded(attempt - 1, last_error));
                }
                budget => budget,
            };

            match self.try_connect(budget).await {
                Ok(pool) => {
                    tracing::info!(
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        url = %self.masked_url(),
                        "Test database connection established"
                    );
                    return Ok(pool);
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        url = %self.masked_url(),
                        "Test database connection attempt failed"
                    );
                    last_error = err.to_string();
                }
            }

            if attempt == max_attempts {
                break;
            }

            let delay = self.policy.backoff_delay(attempt);
            if let Some(deadline) = self.deadline {
                if started.elapsed() + delay >= deadline {
                    return Err(self.deadline_exceeded(attempt, last_error));
                }
            }
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Retrying test database connection");
            tokio::time::sleep(delay).await;
        }

        tracing::error!(
            attempts = max_attempts,
            error = %last_error,
            url = %self.masked_url(),
            "Test database unreachable, giving up"
        );
        Err(TestkitError::RetriesExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Run the migrator through this instance's once-gate.
    ///
    /// Concurrent callers wait for the single run. A failed run leaves the
    /// gate open so a later call may try again.
    pub async fn ensure_migrated(&self, pool: &DbPool) -> TestkitResult<()> {
        self.migrated
            .get_or_try_init(|| async {
                let run = self.migration_runs.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(migrator = self.migrator.name(), run, "Applying schema migrations");

                self.migrator.migrate(pool).await.map_err(|err| match err {
                    TestkitError::Migration(_) => err,
                    other => TestkitError::Migration(other.to_string()),
                })?;

                tracing::info!(migrator = self.migrator.name(), "Schema migrations applied");
                Ok::<(), TestkitError>(())
            })
            .await?;
        Ok(())
    }

    /// Connect and migrate, returning a fresh pool
    pub async fn provision(&self) -> TestkitResult<DbPool> {
        let pool = self.connect().await?;
        if let Err(err) = self.ensure_migrated(&pool).await {
            pool.close().await;
            return Err(err);
        }
        Ok(pool)
    }

    /// The pool shared by every caller of this instance, provisioned on first use
    pub async fn handle(&self) -> TestkitResult<DbPool> {
        self.handle
            .get_or_try_init(|| self.provision())
            .await
            .map(Clone::clone)
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_sub(started.elapsed()))
    }

    fn deadline_exceeded(&self, attempts: u32, last_error: String) -> TestkitError {
        let deadline = self.deadline.unwrap_or_default();
        tracing::error!(
            deadline_ms = deadline.as_millis() as u64,
            attempts,
            error = %last_error,
            "Test database provisioning deadline exceeded"
        );
        TestkitError::DeadlineExceeded {
            deadline,
            attempts,
            last_error,
        }
    }

    async fn try_connect(&self, budget: Option<Duration>) -> Result<DbPool, AttemptError> {
        let attempt_started = Instant::now();
        let connect_timeout = clamp(self.policy.connect_timeout, budget);

        let options = pool_options(&self.pool_limits).acquire_timeout(connect_timeout);
        let pool = match tokio::time::timeout(connect_timeout, options.connect(&self.database_url))
            .await
        {
            Err(_) => return Err(AttemptError::ConnectTimeout(connect_timeout)),
            Ok(Err(err)) => return Err(AttemptError::Connect(err)),
            Ok(Ok(pool)) => pool,
        };

        if !self.policy.health_check {
            return Ok(pool);
        }

        let budget = budget.map(|b| b.saturating_sub(attempt_started.elapsed()));
        let validation_timeout = clamp(self.policy.validation_timeout, budget);
        let result = match tokio::time::timeout(validation_timeout, check_connection(&pool)).await {
            Err(_) => Err(AttemptError::ValidationTimeout(validation_timeout)),
            Ok(Err(err)) => Err(AttemptError::Validation(err)),
            Ok(Ok(_)) => Ok(()),
        };

        match result {
            Ok(()) => Ok(pool),
            Err(err) => {
                pool.close().await;
                Err(err)
            }
        }
    }
}

fn clamp(timeout: Duration, budget: Option<Duration>) -> Duration {
    match budget {
        Some(budget) => timeout.min(budget),
        None => timeout,
    }
}
