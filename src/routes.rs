use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    extract::{Multipart, Path, Query, Request, State},
    response::{IntoResponse, Redirect, Response},
    Extension, Form,
};
use serde::Deserialize;
use tera::Context;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{info, warn};

use crate::{
    error::AppError,
    forms::{CredentialsForm, RawUpload},
    models::NewVideo,
    session::{AuthUser, Flash, IssuedSession, Session},
    state::AppState,
    storage::RECOMMENDED_LIMIT,
    templates::render,
};

type AppResult = Result<Response, AppError>;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

async fn flash_redirect(state: &AppState, session: &Session, flash: Flash, to: &str) -> AppResult {
    state.sessions.push_flash(&session.id, flash).await?;
    Ok(Redirect::to(to).into_response())
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Query(params): Query<SearchParams>,
) -> AppResult {
    let query = params.q.filter(|q| !q.is_empty());
    let videos = state.videos.list_videos(query.as_deref()).await?;

    let mut context = Context::new();
    context.insert("videos", &videos);
    context.insert("query", &query);

    Ok(render(&state, &session, "index.html", context).await?.into_response())
}

pub async fn register_form(State(state): State<Arc<AppState>>, Extension(session): Extension<Session>) -> AppResult {
    Ok(render(&state, &session, "register.html", Context::new()).await?.into_response())
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<CredentialsForm>,
) -> AppResult {
    let credentials = match form.validate() {
        Ok(credentials) => credentials,
        Err(e) => return flash_redirect(&state, &session, Flash::danger(e.to_string()), "/register").await,
    };

    if state.users.username_exists(&credentials.username).await? {
        info!("Registration rejected, {} already taken", credentials.username);
        return flash_redirect(
            &state,
            &session,
            Flash::danger("A user with that name already exists"),
            "/register",
        )
        .await;
    }

    let hasher = state.hasher;
    let password = credentials.password;
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .context("Password hashing task failed")??;

    let user_id = state.users.create_user(&credentials.username, &password_hash).await?;
    info!("Registered user {} ({user_id})", credentials.username);

    flash_redirect(
        &state,
        &session,
        Flash::success("Registration successful. Please log in."),
        "/login",
    )
    .await
}

pub async fn login_form(State(state): State<Arc<AppState>>, Extension(session): Extension<Session>) -> AppResult {
    Ok(render(&state, &session, "login.html", Context::new()).await?.into_response())
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<CredentialsForm>,
) -> AppResult {
    let invalid = || Flash::danger("Invalid username or password");

    let Ok(credentials) = form.validate() else {
        return flash_redirect(&state, &session, invalid(), "/login").await;
    };

    let Some(user) = state.users.get_user_by_username(&credentials.username).await? else {
        info!("Login failed for unknown user {}", credentials.username);
        return flash_redirect(&state, &session, invalid(), "/login").await;
    };

    let hasher = state.hasher;
    let password = credentials.password;
    let digest = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || hasher.verify(&password, &digest))
        .await
        .context("Password verification task failed")?;

    if !valid {
        info!("Login failed for {}", user.username);
        return flash_redirect(&state, &session, invalid(), "/login").await;
    }

    let session_id = state.sessions.login(&session.id, user.id).await?;
    state
        .sessions
        .push_flash(&session_id, Flash::success("You have logged in successfully"))
        .await?;
    info!("{} logged in", user.username);

    let mut response = Redirect::to("/").into_response();
    response.extensions_mut().insert(IssuedSession(session_id));
    Ok(response)
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    AuthUser(user): AuthUser,
) -> AppResult {
    state.sessions.logout(&session.id).await?;
    info!("{} logged out", user.username);

    flash_redirect(&state, &session, Flash::info("You have been logged out"), "/").await
}

pub async fn upload_form(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    AuthUser(_user): AuthUser,
) -> AppResult {
    Ok(render(&state, &session, "upload.html", Context::new()).await?.into_response())
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> AppResult {
    let raw = RawUpload::from_multipart(multipart, &state.files).await?;

    let form = match raw.validate(&state.allowed_extensions) {
        Ok(form) => form,
        Err(e) => {
            warn!("Upload from {} rejected: {e}", user.username);
            return flash_redirect(&state, &session, Flash::danger(e.to_string()), "/upload").await;
        }
    };

    let size = form.file.size();
    let path = form.file.persist(&form.filename).await?;
    let video = NewVideo::new(form.title, form.description, form.filename, user.id);
    let video_id = state.videos.add_video(&video).await?;
    info!(
        "{} uploaded video {video_id} ({size} bytes) to {}",
        user.username,
        path.display()
    );

    flash_redirect(&state, &session, Flash::success("Video uploaded successfully"), "/").await
}

pub async fn video(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> AppResult {
    let id: i64 = id.parse().map_err(|_| AppError::NotFound)?;
    let video = state.videos.get_video(id).await?.ok_or(AppError::NotFound)?;
    let recommended = state.videos.get_recommended(id, RECOMMENDED_LIMIT).await?;

    let mut context = Context::new();
    context.insert("video", &video);
    context.insert("recommended_videos", &recommended);

    Ok(render(&state, &session, "video.html", context).await?.into_response())
}

/// Streams the file with a content type guessed from its extension. Range
/// requests are honoured, which browsers use to seek in `<video>`.
pub async fn uploaded_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    request: Request,
) -> AppResult {
    let path = state.files.path_of(&filename).ok_or(AppError::NotFound)?;
    let response = ServeFile::new(path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});

    Ok(response.into_response())
}
