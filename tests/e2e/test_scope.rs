use crate::helpers::TestContext;

use futures::FutureExt;
use scry_testkit::domain::unique_email;
use scry_testkit::domain::user::{count_users_by_email, create_user, find_user_by_email};
use scry_testkit::{
    with_tx, with_tx_config, LogCapture, ScopeConfig, ScopeState, TestkitError, TxScope,
};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use test_context::test_context;
use tracing::instrument::WithSubscriber;
use tracing::Level;

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_see_own_writes_inside_scope(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let email = unique_email("own-writes");

    let found = with_tx(&db.pool, |tx| {
        let email = email.clone();
        Box::pin(async move {
            let created = create_user(tx.conn()?, &email).await?;
            let found = find_user_by_email(tx.conn()?, &email).await?;
            Ok::<_, TestkitError>(found.map(|u| u.id) == Some(created.id))
        })
    })
    .await
    .unwrap()
    .unwrap();

    assert!(found);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_roll_back_writes_after_success(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let email = unique_email("rolled-back");

    let inside = with_tx(&db.pool, |tx| {
        let email = email.clone();
        Box::pin(async move {
            create_user(tx.conn()?, &email).await?;
            count_users_by_email(tx.conn()?, &email).await
        })
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(inside, 1);
    assert_eq!(count_users_by_email(&db.pool, &email).await.unwrap(), 0);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_roll_back_and_resume_panic(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let email = unique_email("panicking");

    let email_in_scope = email.clone();
    let outcome = AssertUnwindSafe(with_tx(&db.pool, move |tx| {
        Box::pin(async move {
            create_user(tx.conn().unwrap(), &email_in_scope).await.unwrap();
            panic!("assertion failed inside scope");
        })
    }))
    .catch_unwind()
    .await;

    let panic = outcome.expect_err("panic should propagate out of with_tx");
    let message = panic.downcast_ref::<&str>().copied().unwrap_or_default();
    assert_eq!(message, "assertion failed inside scope");
    assert_eq!(count_users_by_email(&db.pool, &email).await.unwrap(), 0);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_roll_back_when_callback_panics_before_returning_future(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let capture = LogCapture::new();

    let outcome = AssertUnwindSafe(with_tx::<(), _>(&db.pool, |tx| {
        assert_eq!(tx.state(), ScopeState::Active);
        panic!("panicked while building the body");
    }))
    .catch_unwind()
    .with_subscriber(capture.subscriber())
    .await;

    let panic = outcome.expect_err("panic should propagate out of with_tx");
    let message = panic.downcast_ref::<&str>().copied().unwrap_or_default();
    assert_eq!(message, "panicked while building the body");

    assert!(capture.matching(Level::WARN, "dropped while open").is_empty());
    assert_eq!(capture.matching(Level::DEBUG, "Transaction scope rolled back").len(), 1);
    assert!(count_users_by_email(&db.pool, "nobody@example.com").await.is_ok());
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_roll_back_when_body_returns_error(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let email = unique_email("failing-body");

    let result = with_tx(&db.pool, |tx| {
        let email = email.clone();
        Box::pin(async move {
            create_user(tx.conn()?, &email).await?;
            // duplicate email violates users_email_key
            create_user(tx.conn()?, &email).await?;
            Ok::<_, TestkitError>(())
        })
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(TestkitError::Database(_))));
    assert_eq!(count_users_by_email(&db.pool, &email).await.unwrap(), 0);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_treat_repeated_rollback_as_noop(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };

    let mut scope = TxScope::begin(&db.pool).await.unwrap();
    let scope_id = scope.id();
    assert_eq!(scope.state(), ScopeState::Created);

    scope.rollback().await.unwrap();
    scope.rollback().await.unwrap();

    assert_eq!(scope.state(), ScopeState::Terminated);
    assert!(matches!(scope.conn(), Err(TestkitError::ScopeTerminated(id)) if id == scope_id));
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_tolerate_body_rolling_back_itself(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };

    let state = with_tx(&db.pool, |tx| {
        Box::pin(async move {
            assert_eq!(tx.state(), ScopeState::Active);
            tx.rollback().await.unwrap();
            tx.state()
        })
    })
    .await
    .unwrap();

    assert_eq!(state, ScopeState::Terminated);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_tolerate_raw_rollback_statement(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };

    let result = with_tx(&db.pool, |tx| {
        Box::pin(async move {
            sqlx::query("ROLLBACK").execute(tx.conn()?).await?;
            Ok::<_, TestkitError>(())
        })
    })
    .await;

    assert!(matches!(result, Ok(Ok(()))));
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_apply_statement_timeout(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let config = ScopeConfig::default().with_statement_timeout(Duration::from_millis(50));

    let result = with_tx_config(&db.pool, &config, |tx| {
        Box::pin(async move {
            sqlx::query("SELECT pg_sleep(2)").execute(tx.conn()?).await?;
            Ok::<_, TestkitError>(())
        })
    })
    .await
    .unwrap();

    match result {
        Err(TestkitError::Database(err)) => {
            let code = err.as_database_error().and_then(|e| e.code()).unwrap_or_default();
            // query_canceled
            assert_eq!(code, "57014");
        }
        other => panic!("expected statement timeout, got {:?}", other),
    }
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_round_sub_millisecond_statement_timeout_up(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let config = ScopeConfig::default().with_statement_timeout(Duration::from_micros(500));

    let result = with_tx_config(&db.pool, &config, |tx| {
        Box::pin(async move {
            sqlx::query("SELECT pg_sleep(0.3)").execute(tx.conn()?).await?;
            Ok::<_, TestkitError>(())
        })
    })
    .await
    .unwrap();

    match result {
        Err(TestkitError::Database(err)) => {
            let code = err.as_database_error().and_then(|e| e.code()).unwrap_or_default();
            assert_eq!(code, "57014");
        }
        other => panic!("expected a 1ms statement timeout, got {:?}", other),
    }
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_keep_body_outcome_when_rollback_fails(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let capture = LogCapture::new();

    let result = with_tx(&db.pool, |tx| {
        Box::pin(async move {
            // Kills this scope's own connection, so the final ROLLBACK cannot be sent
            let _ = sqlx::query("SELECT pg_terminate_backend(pg_backend_pid())")
                .execute(tx.conn().unwrap())
                .await;
            42
        })
    })
    .with_subscriber(capture.subscriber())
    .await;

    assert_eq!(result.unwrap(), 42);
    let warnings = capture.matching(Level::WARN, "Failed to roll back transaction scope");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].fields.contains_key("error"));
}
