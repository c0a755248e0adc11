use crate::user_models::{CurrentUser, User, UserSummary};
use anyhow::{Context, Result};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct UserStorage {
    pool: SqlitePool,
}

impl UserStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a user and returns the new id. A duplicate username that got
    /// past [`Self::username_exists`] fails on the `UNIQUE` constraint.
    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO users (username, password) VALUES (?, ?)")
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert user {username}"))?;

        Ok(result.last_insert_rowid())
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check username")?;

        Ok(count > 0)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT id, username, password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up user by name")
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<CurrentUser>> {
        sqlx::query_as::<_, CurrentUser>("SELECT id, username FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up user by id")
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        sqlx::query_as::<_, UserSummary>(
            "SELECT u.id, u.username, COUNT(v.id) AS video_count
             FROM users u LEFT JOIN videos v ON v.user_id = u.id
             GROUP BY u.id ORDER BY u.id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")
    }
}
