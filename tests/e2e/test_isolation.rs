use crate::helpers::TestContext;

use scry_testkit::domain::unique_email;
use scry_testkit::domain::user::{count_users_by_email, create_user, find_user_by_email};
use scry_testkit::{with_tx, TestkitError};
use test_context::test_context;

const SHARED_EMAIL: &str = "x@example.com";

#[test_context(TestContext)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn it_should_isolate_concurrent_scopes_inserting_same_email(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };

    let insert_and_check = |pool: sqlx::PgPool| async move {
        with_tx(&pool, |tx| {
            Box::pin(async move {
                let created = create_user(tx.conn()?, SHARED_EMAIL).await?;
                let visible = find_user_by_email(tx.conn()?, SHARED_EMAIL).await?;
                Ok::<_, TestkitError>(visible.map(|u| u.id) == Some(created.id))
            })
        })
        .await
    };

    let a = tokio::spawn(insert_and_check(db.pool.clone()));
    let b = tokio::spawn(insert_and_check(db.pool.clone()));
    let (a, b) = tokio::join!(a, b);

    assert!(a.unwrap().unwrap().unwrap(), "scope A should see its own row");
    assert!(b.unwrap().unwrap().unwrap(), "scope B should see its own row");
    assert_eq!(count_users_by_email(&db.pool, SHARED_EMAIL).await.unwrap(), 0);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_not_leak_rows_between_invocations(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let email = unique_email("leak-check");

    let first = email.clone();
    with_tx(&db.pool, move |tx| {
        Box::pin(async move { create_user(tx.conn()?, &first).await })
    })
    .await
    .unwrap()
    .unwrap();

    let second = email.clone();
    let found = with_tx(&db.pool, move |tx| {
        Box::pin(async move { find_user_by_email(tx.conn()?, &second).await })
    })
    .await
    .unwrap()
    .unwrap();

    assert!(found.is_none());
}

#[test_context(TestContext)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn it_should_run_many_scopes_in_parallel(ctx: &TestContext) {
    let Some(db) = ctx.db() else { return };
    let email = unique_email("parallel");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pool = db.pool.clone();
            let email = email.clone();
            tokio::spawn(async move {
                with_tx(&pool, |tx| {
                    Box::pin(async move {
                        create_user(tx.conn()?, &email).await?;
                        count_users_by_email(tx.conn()?, &email).await
                    })
                })
                .await
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert_eq!(task.unwrap().unwrap().unwrap(), 1);
    }
    assert_eq!(count_users_by_email(&db.pool, &email).await.unwrap(), 0);
}
