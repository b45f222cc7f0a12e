pub mod harness;
pub mod migrator;
pub mod provisioner;
pub mod scope;

pub use harness::{with_test_tx, TestHarness};
pub use migrator::{DirectoryMigrator, EmbeddedMigrator, NoopMigrator, SchemaMigrator};
pub use provisioner::Provisioner;
pub use scope::{with_tx, with_tx_config, ScopeConfig, ScopeState, TxScope};

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

pub type DbPool = Pool<Postgres>;

/// Pool limits applied to every provisioned pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            idle_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(5 * 60),
        }
    }
}

pub fn pool_options(limits: &PoolLimits) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(limits.max_connections)
        .min_connections(limits.min_connections)
        .idle_timeout(limits.idle_timeout)
        .max_lifetime(limits.max_lifetime)
        .acquire_timeout(Duration::from_secs(3))
}

pub async fn check_connection(pool: &DbPool) -> Result<bool, sqlx::Error> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map(|_| true)
}
