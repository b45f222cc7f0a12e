use crate::helpers::{self, TestContext};

use scry_testkit::infrastructure::config::resolve_database_url;
use scry_testkit::infrastructure::db::{check_connection, EmbeddedMigrator, NoopMigrator};
use scry_testkit::{with_test_tx, Provisioner, RetryPolicy, TestHarness, TestkitError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_context::test_context;

#[tokio::test]
async fn it_should_give_up_after_max_retries() {
    let policy = helpers::failing_policy(2);
    let provisioner = Provisioner::new(helpers::UNREACHABLE_URL, policy).with_migrator(NoopMigrator);

    let started = Instant::now();
    let err = provisioner.provision().await.unwrap_err();

    assert!(matches!(err, TestkitError::RetriesExhausted { attempts: 3, .. }));
    assert!(err.is_fatal());
    assert!(started.elapsed() <= policy.worst_case_duration() + Duration::from_secs(2));
    assert_eq!(provisioner.migration_runs(), 0);
}

#[tokio::test]
async fn it_should_not_leak_password_in_errors() {
    let provisioner = Provisioner::new(helpers::UNREACHABLE_URL, helpers::failing_policy(0));

    let err = provisioner.connect().await.unwrap_err();

    assert!(!err.to_string().contains("hunter2"));
    assert!(!format!("{:?}", provisioner).contains("hunter2"));
}

#[tokio::test]
async fn it_should_honour_caller_deadline() {
    let policy = RetryPolicy {
        max_retries: 100,
        ..helpers::failing_policy(100)
    };
    let provisioner = Provisioner::new(helpers::UNREACHABLE_URL, policy)
        .with_deadline(Duration::from_millis(600));

    let started = Instant::now();
    let err = provisioner.connect().await.unwrap_err();

    assert!(matches!(err, TestkitError::DeadlineExceeded { .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test_context(TestContext)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn it_should_migrate_once_for_concurrent_provisions(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let provisioner = Arc::new(
        Provisioner::new(db.url.clone(), helpers::test_policy()).with_migrator(EmbeddedMigrator),
    );

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let provisioner = provisioner.clone();
            tokio::spawn(async move {
                let pool = provisioner.provision().await?;
                let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                    .fetch_one(&pool)
                    .await?;
                pool.close().await;
                Ok::<i64, TestkitError>(users)
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert!(task.unwrap().unwrap() >= 0);
    }
    assert_eq!(provisioner.migration_runs(), 1);
    assert!(provisioner.is_migrated());
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_share_suite_migration_gate(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };

    assert!(db.provisioner().is_migrated());
    assert_eq!(db.provisioner().migration_runs(), 1);
    assert!(check_connection(&db.pool).await.unwrap());
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_reuse_harness_handle(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let harness = TestHarness::new(
        Provisioner::new(db.url.clone(), helpers::test_policy()).with_migrator(EmbeddedMigrator),
    );

    let first = harness
        .run(|tx| Box::pin(async move { tx.id() }))
        .await
        .unwrap();
    let second = harness
        .run(|tx| Box::pin(async move { tx.id() }))
        .await
        .unwrap();

    assert_ne!(first, second, "each run gets its own scope");
    assert_eq!(harness.provisioner().migration_runs(), 1);
    harness.pool().await.unwrap().close().await;
}

#[tokio::test]
async fn it_should_run_body_with_env_configured_database() {
    if resolve_database_url().is_none() {
        eprintln!("skipping: no database URL in the environment");
        return;
    }

    let email = scry_testkit::domain::unique_email("with-test-tx");
    let inside = with_test_tx(|tx| {
        let email = email.clone();
        Box::pin(async move {
            scry_testkit::domain::user::create_user(tx.conn()?, &email).await?;
            scry_testkit::domain::user::count_users_by_email(tx.conn()?, &email).await
        })
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(inside, 1);
}
