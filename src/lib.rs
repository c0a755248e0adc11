//! DarkTube, a small video sharing site.
//!
//! Users register, log in, upload videos and browse or search the listing.
//! Everything lives in one SQLite database plus an upload directory.
//!
//! | Method | Path | Auth |
//! |---|---|---|
//! | GET | `/` (`?q=` to search titles) | none |
//! | GET/POST | `/register` | none |
//! | GET/POST | `/login` | none |
//! | GET | `/logout` | session |
//! | GET/POST | `/upload` | session |
//! | GET | `/video/{id}` | none |
//! | GET | `/uploads/{filename}` | none |
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod database;
pub mod error;
pub mod files;
pub mod forms;
pub mod models;
pub mod password;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;
pub mod templates;
pub mod user_models;
pub mod user_storage;

use state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/register", get(routes::register_form).post(routes::register))
        .route("/login", get(routes::login_form).post(routes::login))
        .route("/logout", get(routes::logout))
        .route("/upload", get(routes::upload_form).post(routes::upload))
        .route("/video/:id", get(routes::video))
        .route("/uploads/:filename", get(routes::uploaded_file))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), session::session_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
