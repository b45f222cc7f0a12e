use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use super::DbPool;
use crate::error::{TestkitError, TestkitResult};

/// Postgres SQLSTATE for "no transaction in progress"
const NO_ACTIVE_SQL_TRANSACTION: &str = "25P01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Transaction begun, callback not started
    Created,
    /// Callback running
    Active,
    /// Rolled back. Terminal.
    Terminated,
}

#[derive(Debug, Clone, Default)]
pub struct ScopeConfig {
    /// Applied with `SET LOCAL statement_timeout` right after `BEGIN`
    pub statement_timeout: Option<Duration>,
}

impl ScopeConfig {
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }
}

/// One isolated unit of work. There is no commit: the transaction ends in
/// rollback, either explicitly or when the scope is dropped.
pub struct TxScope {
    id: Uuid,
    tx: Option<Transaction<'static, Postgres>>,
    state: ScopeState,
}

impl std::fmt::Debug for TxScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxScope")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl TxScope {
    pub async fn begin(pool: &DbPool) -> TestkitResult<Self> {
        Self::begin_with(pool, &ScopeConfig::default()).await
    }

    pub async fn begin_with(pool: &DbPool, config: &ScopeConfig) -> TestkitResult<Self> {
        let mut tx = pool.begin().await.map_err(TestkitError::BeginTransaction)?;

        if let Some(timeout) = config.statement_timeout {
            // SET does not accept bind parameters
            let statement = format!(
                "SET LOCAL statement_timeout = {}",
                statement_timeout_millis(timeout)
            );
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        let scope = Self {
            id: Uuid::new_v4(),
            tx: Some(tx),
            state: ScopeState::Created,
        };
        tracing::debug!(scope_id = %scope.id, "Transaction scope created");
        Ok(scope)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ScopeState::Terminated
    }

    /// The connection leased by this scope
    pub fn conn(&mut self) -> TestkitResult<&mut PgConnection> {
        let id = self.id;
        self.tx
            .as_deref_mut()
            .ok_or(TestkitError::ScopeTerminated(id))
    }

    /// Roll back and terminate the scope. Safe to call any number of times.
    pub async fn rollback(&mut self) -> TestkitResult<()> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => return Ok(()),
        };
        self.state = ScopeState::Terminated;

        match tx.rollback().await {
            Ok(()) => {
                tracing::debug!(scope_id = %self.id, "Transaction scope rolled back");
                Ok(())
            }
            Err(err) if is_transaction_already_closed(&err) => {
                tracing::debug!(scope_id = %self.id, "Transaction already closed");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn activate(&mut self) {
        if self.state == ScopeState::Created {
            self.state = ScopeState::Active;
        }
    }
}

impl Drop for TxScope {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(
                scope_id = %self.id,
                "Transaction scope dropped while open; rollback left to the driver"
            );
        }
    }
}

/// Whole milliseconds for `statement_timeout`, rounded up. Postgres reads 0
/// as "no timeout", so any nonzero duration maps to at least 1.
fn statement_timeout_millis(timeout: Duration) -> u128 {
    if timeout.is_zero() {
        return 0;
    }
    timeout.as_micros().div_ceil(1000).max(1)
}

fn is_transaction_already_closed(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map_or(false, |code| code == NO_ACTIVE_SQL_TRANSACTION)
}

/// Run `f` inside a transaction that is always rolled back.
///
/// ```ignore
/// let count = with_tx(&pool, |tx| Box::pin(async move {
///     insert_user(tx.conn()?, &TestUser::new("x@example.com")).await?;
///     count_users_by_email(tx.conn()?, "x@example.com").await
/// }))
/// .await?;
/// ```
pub async fn with_tx<T, F>(pool: &DbPool, f: F) -> TestkitResult<T>
where
    F: for<'s> FnOnce(&'s mut TxScope) -> BoxFuture<'s, T>,
{
    with_tx_config(pool, &ScopeConfig::default(), f).await
}

/// [`with_tx`] with per-scope settings.
///
/// A panic inside `f` is caught, the transaction rolled back, and the panic
/// resumed. This covers a panic raised before `f` returns its future. A
/// rollback failure is logged and never replaces the callback's outcome.
pub async fn with_tx_config<T, F>(pool: &DbPool, config: &ScopeConfig, f: F) -> TestkitResult<T>
where
    F: for<'s> FnOnce(&'s mut TxScope) -> BoxFuture<'s, T>,
{
    let mut scope = TxScope::begin_with(pool, config).await?;
    scope.activate();

    let outcome = AssertUnwindSafe(async { f(&mut scope).await })
        .catch_unwind()
        .await;

    if let Err(err) = scope.rollback().await {
        tracing::warn!(
            scope_id = %scope.id(),
            error = %err,
            "Failed to roll back transaction scope"
        );
    }

    match outcome {
        Ok(value) => Ok(value),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
