//! Database-backed sessions with flash messages.
//!
//! The browser only holds a signed cookie with an opaque session id. Rows are
//! written lazily: a visitor gets a `sessions` row (and the cookie) the first
//! time something is stored for them, a flash or a login. Logging in always
//! moves the visitor to a fresh id, so a cookie obtained before login never
//! becomes an authenticated one.
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{Duration, Utc};
use cookie::{Cookie, CookieJar, Key, SameSite};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use sqlx::{FromRow, SqlitePool};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{error::AppError, state::AppState, user_models::CurrentUser};

pub const SESSION_COOKIE: &str = "darktube_session";
pub const LOGIN_REQUIRED: &str = "Please log in to access this page.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Info,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: Level,
    pub message: String,
}

impl Flash {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Level::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Level::Info, message)
    }

    pub fn danger(message: impl Into<String>) -> Self {
        Self::new(Level::Danger, message)
    }
}

/// Request-scoped session, inserted into request extensions by [`session_layer`].
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user: Option<CurrentUser>,
}

/// Response extension telling [`session_layer`] to send the cookie for a
/// session id that replaced the request's one.
#[derive(Debug, Clone)]
pub struct IssuedSession(pub String);

#[derive(Debug, FromRow)]
struct SessionRow {
    user_id: Option<i64>,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// The user bound to an unexpired session. `None` when the session is
    /// unknown or expired.
    async fn load(&self, id: &str) -> Result<Option<SessionRow>> {
        sqlx::query_as::<_, SessionRow>("SELECT user_id FROM sessions WHERE id = ? AND expires_at > ?")
            .bind(id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load session")
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.load(id).await?.is_some())
    }

    async fn ensure(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (id, user_id, flashes, created_at, expires_at) VALUES (?, NULL, '[]', ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id)
        .bind(now)
        .bind(now + self.ttl)
        .execute(&self.pool)
        .await
        .context("Failed to create session")?;

        Ok(())
    }

    /// Replaces session `id` with a new one bound to `user_id` and returns the
    /// new id. Pending flashes move across; the old row is deleted.
    pub async fn login(&self, id: &str, user_id: i64) -> Result<String> {
        let new_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("Failed to start session transaction")?;

        let flashes: Option<(String,)> = sqlx::query_as("SELECT flashes FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to read session")?;

        sqlx::query("INSERT INTO sessions (id, user_id, flashes, created_at, expires_at) VALUES (?, ?, ?, ?, ?)")
            .bind(&new_id)
            .bind(user_id)
            .bind(flashes.map(|(json,)| json).unwrap_or_else(|| "[]".to_string()))
            .bind(now)
            .bind(now + self.ttl)
            .execute(&mut *tx)
            .await
            .context("Failed to create session")?;

        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to drop old session")?;

        tx.commit().await.context("Failed to commit session")?;
        Ok(new_id)
    }

    pub async fn logout(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET user_id = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to clear session user")?;

        Ok(())
    }

    pub async fn push_flash(&self, id: &str, flash: Flash) -> Result<()> {
        self.ensure(id).await?;

        let mut flashes = self.read_flashes(id).await?;
        flashes.push(flash);
        self.write_flashes(id, &flashes).await
    }

    /// Returns pending flashes and clears them.
    pub async fn take_flashes(&self, id: &str) -> Result<Vec<Flash>> {
        let flashes = self.read_flashes(id).await?;
        if !flashes.is_empty() {
            self.write_flashes(id, &[]).await?;
        }
        Ok(flashes)
    }

    async fn read_flashes(&self, id: &str) -> Result<Vec<Flash>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT flashes FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read flashes")?;

        match row {
            Some((json,)) => serde_json::from_str(&json).context("Failed to parse flashes"),
            None => Ok(Vec::new()),
        }
    }

    async fn write_flashes(&self, id: &str, flashes: &[Flash]) -> Result<()> {
        let json = serde_json::to_string(flashes).context("Failed to serialize flashes")?;
        sqlx::query("UPDATE sessions SET flashes = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to write flashes")?;

        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .context("Failed to purge sessions")?;

        Ok(result.rows_affected())
    }

    /// Runs [`SessionStore::purge_expired`] every `period`, starting now.
    pub fn spawn_purge_task(self, period: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match self.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => info!("Purged {purged} expired sessions"),
                    Err(e) => warn!("Session purge failed: {e:#}"),
                }
            }
        })
    }

    #[cfg(test)]
    async fn expire(&self, id: &str, at: chrono::DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Derives the 64-byte cookie signing key from the configured secret.
pub fn cookie_key(secret: &str) -> Key {
    Key::from(Sha512::digest(secret.as_bytes()).as_slice())
}

fn read_session_id(headers: &HeaderMap, key: &Key) -> Option<String> {
    let mut jar = CookieJar::new();
    for value in headers.get_all(COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for cookie in Cookie::split_parse(value).flatten() {
            jar.add_original(cookie.into_owned());
        }
    }

    jar.signed(key)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

fn session_cookie(id: &str, key: &Key) -> Option<HeaderValue> {
    let mut jar = CookieJar::new();
    jar.signed_mut(key).add(
        Cookie::build((SESSION_COOKIE, id.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax),
    );

    jar.get(SESSION_COOKIE)
        .and_then(|cookie| HeaderValue::from_str(&cookie.to_string()).ok())
}

/// Resolves the session cookie to a [`Session`] for the handler and sets the
/// cookie on the response once a new session has been persisted.
pub async fn session_layer(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let existing = match read_session_id(request.headers(), &state.cookie_key) {
        Some(id) => state.sessions.load(&id).await?.map(|row| (id, row)),
        None => None,
    };

    let (session, is_new) = match existing {
        Some((id, row)) => {
            let user = match row.user_id {
                Some(user_id) => state.users.get_user_by_id(user_id).await?,
                None => None,
            };
            (Session { id, user }, false)
        }
        None => (
            Session {
                id: Uuid::new_v4().to_string(),
                user: None,
            },
            true,
        ),
    };

    let id = session.id.clone();
    request.extensions_mut().insert(session);
    let mut response = next.run(request).await;

    let issued = match response.extensions_mut().remove::<IssuedSession>() {
        Some(IssuedSession(new_id)) => Some(new_id),
        None if is_new => state.sessions.exists(&id).await?.then_some(id),
        None => None,
    };

    if let Some(id) = issued {
        debug!("Issuing session cookie");
        if let Some(cookie) = session_cookie(&id, &state.cookie_key) {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
    }

    Ok(response)
}

/// Extracts the logged-in user, or flashes [`LOGIN_REQUIRED`] and redirects to
/// `/login` before the handler body (and its request body) is touched.
pub struct AuthUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("session layer not installed")).into_response())?;

        if let Some(user) = session.user {
            return Ok(AuthUser(user));
        }

        state
            .sessions
            .push_flash(&session.id, Flash::info(LOGIN_REQUIRED))
            .await
            .map_err(|e| AppError::from(e).into_response())?;

        Err(Redirect::to("/login").into_response())
    }
}
