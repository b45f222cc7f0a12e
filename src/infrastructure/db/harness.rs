use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::OnceCell;

use super::provisioner::Provisioner;
use super::scope::{with_tx, with_tx_config, ScopeConfig, TxScope};
use super::DbPool;
use crate::error::TestkitResult;

/// Provisioner shared by every `with_test_tx` call in the process
static SHARED_PROVISIONER: OnceCell<Provisioner> = OnceCell::new();

/// Entry point for tests: provisions once, then runs each body in its own
/// rolled-back scope.
///
/// The cached pool belongs to the runtime that first used the harness. Share
/// a harness between tests only when they run on the same runtime; otherwise
/// use [`with_test_tx`].
#[derive(Debug, Clone)]
pub struct TestHarness {
    provisioner: Arc<Provisioner>,
    scope_config: ScopeConfig,
}

impl TestHarness {
    pub fn new(provisioner: Provisioner) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            scope_config: ScopeConfig::default(),
        }
    }

    pub fn from_env() -> TestkitResult<Self> {
        Ok(Self::new(Provisioner::from_env()?))
    }

    pub fn with_scope_config(mut self, config: ScopeConfig) -> Self {
        self.scope_config = config;
        self
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// The migrated pool, provisioned on first call
    pub async fn pool(&self) -> TestkitResult<DbPool> {
        self.provisioner.handle().await
    }

    pub async fn run<T, F>(&self, f: F) -> TestkitResult<T>
    where
        F: for<'s> FnOnce(&'s mut TxScope) -> BoxFuture<'s, T>,
    {
        let pool = self.pool().await?;
        with_tx_config(&pool, &self.scope_config, f).await
    }
}

/// Run `f` in a rolled-back transaction against the database configured in
/// the environment.
///
/// Migrations run once per process. The pool is opened for the calling
/// runtime and closed afterwards, so this works from any `#[tokio::test]`.
pub async fn with_test_tx<T, F>(f: F) -> TestkitResult<T>
where
    F: for<'s> FnOnce(&'s mut TxScope) -> BoxFuture<'s, T>,
{
    let provisioner = SHARED_PROVISIONER.get_or_try_init(Provisioner::from_env)?;
    let pool = provisioner.provision().await?;

    let result = with_tx(&pool, f).await;
    pool.close().await;
    result
}
