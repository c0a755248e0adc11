use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use cookie::Key;
use sqlx::SqlitePool;
use tera::Tera;

use crate::{
    config::Config,
    database,
    files::FileStore,
    password::PasswordHasher,
    session::{cookie_key, SessionStore},
    storage::VideoStorage,
    templates,
    user_storage::UserStorage,
};

pub struct AppState {
    pub config: Config,
    pub allowed_extensions: HashSet<String>,
    pub users: UserStorage,
    pub videos: VideoStorage,
    pub sessions: SessionStore,
    pub files: FileStore,
    pub hasher: PasswordHasher,
    pub templates: Tera,
    pub cookie_key: Key,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let pool = database::init(&config.database_url).await?;
        Self::with_pool(config, pool)
    }

    pub fn with_pool(config: Config, pool: SqlitePool) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            allowed_extensions: config.extension_set(),
            users: UserStorage::new(pool.clone()),
            videos: VideoStorage::new(pool.clone()),
            sessions: SessionStore::new(pool, Duration::hours(config.session_ttl_hours)),
            files: FileStore::new(config.upload_dir.clone()),
            hasher: PasswordHasher::new(config.pbkdf2_rounds),
            templates: templates::load()?,
            cookie_key: cookie_key(&config.secret_key),
            config,
        }))
    }
}
