//! # SQLite
//!
//! Three tables: `users`, `videos` and `sessions`. There is no migration
//! history, [`create_tables`] runs `CREATE TABLE IF NOT EXISTS` on every start.
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username VARCHAR(150) NOT NULL UNIQUE,
        password VARCHAR(150) NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS videos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title VARCHAR(200) NOT NULL,
        description TEXT,
        filename VARCHAR(200) NOT NULL,
        upload_date TIMESTAMP NOT NULL,
        user_id INTEGER NOT NULL REFERENCES users(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_videos_upload_date ON videos(upload_date)",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id INTEGER REFERENCES users(id),
        flashes TEXT NOT NULL DEFAULT '[]',
        created_at TIMESTAMP NOT NULL,
        expires_at TIMESTAMP NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)",
];

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {database_url}"))
}

pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create tables")?;
    }

    info!("Database schema ready");
    Ok(())
}

/// Opens the pool and makes sure the schema exists.
pub async fn init(database_url: &str) -> Result<SqlitePool> {
    let pool = connect(database_url).await?;
    create_tables(&pool).await?;
    Ok(pool)
}
