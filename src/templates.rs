use anyhow::{Context as _, Result};
use axum::response::Html;
use tera::{Context, Tera};

use crate::{error::AppError, session::Session, state::AppState};

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../templates/base.html")),
    ("index.html", include_str!("../templates/index.html")),
    ("register.html", include_str!("../templates/register.html")),
    ("login.html", include_str!("../templates/login.html")),
    ("upload.html", include_str!("../templates/upload.html")),
    ("video.html", include_str!("../templates/video.html")),
];

/// Templates are compiled into the binary so the server runs from any cwd.
pub fn load() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(TEMPLATES.iter().copied())
        .context("Failed to compile templates")?;
    Ok(tera)
}

/// Renders `name` with the page context plus `current_user` and the pending
/// flashes, which are consumed.
pub async fn render(
    state: &AppState,
    session: &Session,
    name: &str,
    mut context: Context,
) -> Result<Html<String>, AppError> {
    let flashes = state.sessions.take_flashes(&session.id).await?;
    context.insert("flashes", &flashes);
    context.insert("current_user", &session.user);

    Ok(Html(state.templates.render(name, &context)?))
}
