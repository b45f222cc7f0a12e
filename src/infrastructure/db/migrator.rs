use async_trait::async_trait;
use sqlx::migrate::Migrator;
use std::path::PathBuf;

use super::DbPool;
use crate::error::TestkitResult;

/// Migrations bundled with this crate (`migrations/`)
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Applies a versioned schema to a pool.
///
/// Implementations must be idempotent: running against an already migrated
/// database is a no-op. The provisioner still calls `migrate` at most once
/// per instance.
#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    fn name(&self) -> &str;

    async fn migrate(&self, pool: &DbPool) -> TestkitResult<()>;
}

/// The crate's compiled-in migrations
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedMigrator;

#[async_trait]
impl SchemaMigrator for EmbeddedMigrator {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn migrate(&self, pool: &DbPool) -> TestkitResult<()> {
        MIGRATOR.run(pool).await?;
        Ok(())
    }
}

/// Migrations read from a directory at runtime
#[derive(Debug, Clone)]
pub struct DirectoryMigrator {
    dir: PathBuf,
}

impl DirectoryMigrator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SchemaMigrator for DirectoryMigrator {
    fn name(&self) -> &str {
        "directory"
    }

    async fn migrate(&self, pool: &DbPool) -> TestkitResult<()> {
        tracing::debug!(dir = %self.dir.display(), "Loading migrations from directory");
        let migrator = Migrator::new(self.dir.clone()).await?;
        migrator.run(pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaMigrator for Migrator {
    fn name(&self) -> &str {
        "sqlx"
    }

    async fn migrate(&self, pool: &DbPool) -> TestkitResult<()> {
        self.run(pool).await?;
        Ok(())
    }
}

/// For schemas managed outside the test process
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMigrator;

#[async_trait]
impl SchemaMigrator for NoopMigrator {
    fn name(&self) -> &str {
        "noop"
    }

    async fn migrate(&self, _pool: &DbPool) -> TestkitResult<()> {
        Ok(())
    }
}
