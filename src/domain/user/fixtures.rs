use sqlx::PgExecutor;
use uuid::Uuid;

use super::model::TestUser;
use crate::error::TestkitResult;

/// Insert `user` as given and return the stored row.
///
/// Works with a scope connection (`tx.conn()?`) or a pool (`&pool`).
pub async fn insert_user<'e, E>(executor: E, user: &TestUser) -> TestkitResult<TestUser>
where
    E: PgExecutor<'e>,
{
    let stored = sqlx::query_as::<_, TestUser>(
        r#"
        INSERT INTO users (id, email, hashed_password, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, email, hashed_password, created_at, updated_at
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.hashed_password)
    .bind(user.created_at)
    .bind(user.updated_at)
    .fetch_one(executor)
    .await?;

    Ok(stored)
}

/// Insert a fresh user with the given email
pub async fn create_user<'e, E>(executor: E, email: &str) -> TestkitResult<TestUser>
where
    E: PgExecutor<'e>,
{
    insert_user(executor, &TestUser::new(email)).await
}

pub async fn find_user_by_id<'e, E>(executor: E, user_id: Uuid) -> TestkitResult<Option<TestUser>>
where
    E: PgExecutor<'e>,
{
    let user = sqlx::query_as::<_, TestUser>(
        "SELECT id, email, hashed_password, created_at, updated_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    Ok(user)
}

pub async fn find_user_by_email<'e, E>(executor: E, email: &str) -> TestkitResult<Option<TestUser>>
where
    E: PgExecutor<'e>,
{
    let user = sqlx::query_as::<_, TestUser>(
        "SELECT id, email, hashed_password, created_at, updated_at FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(executor)
    .await?;

    Ok(user)
}

pub async fn count_users_by_email<'e, E>(executor: E, email: &str) -> TestkitResult<i64>
where
    E: PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(executor)
        .await?;

    Ok(count)
}
