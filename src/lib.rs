//! Transaction-scoped database isolation for integration tests.
//!
//! Every test body runs inside its own Postgres transaction that is always
//! rolled back, so tests can share one database and run in parallel:
//!
//! ```ignore
//! use scry_testkit::{with_test_tx, domain::user::{create_user, count_users_by_email}};
//!
//! #[tokio::test]
//! async fn creates_user() {
//!     let count = with_test_tx(|tx| Box::pin(async move {
//!         create_user(tx.conn()?, "x@example.com").await?;
//!         count_users_by_email(tx.conn()?, "x@example.com").await
//!     }))
//!     .await
//!     .unwrap()
//!     .unwrap();
//!     assert_eq!(count, 1);
//! }
//! ```
//!
//! Connections come from a [`Provisioner`], which retries transient failures
//! under a [`RetryPolicy`] and applies migrations once per instance.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorResponse, TestkitError, TestkitResult};
pub use infrastructure::config::{mask_database_url, RetryPolicy, TestDbConfig};
pub use infrastructure::db::{
    with_test_tx, with_tx, with_tx_config, DbPool, PoolLimits, Provisioner, ScopeConfig,
    ScopeState, SchemaMigrator, TestHarness, TxScope,
};
pub use infrastructure::logging::{init_test_logging, CapturedEvent, LogCapture};
