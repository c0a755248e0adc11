use std::collections::HashSet;

use axum::extract::Multipart;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    error::AppError,
    files::{has_allowed_extension, sanitize_filename, FileStore, PendingUpload},
};

/// Name of the multipart field carrying the video file.
pub const VIDEO_FIELD: &str = "video";

/// Raw `username`/`password` form body. Registration and login post the
/// same two fields, so one type serves both.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("Username and password are required")]
    Missing,
}

impl CredentialsForm {
    /// Trims the username; both fields must be present and non-empty.
    pub fn validate(self) -> Result<Credentials, CredentialsError> {
        let username = self.username.map(|u| u.trim().to_string()).unwrap_or_default();
        let password = self.password.unwrap_or_default();

        if username.is_empty() || password.is_empty() {
            return Err(CredentialsError::Missing);
        }

        Ok(Credentials { username, password })
    }
}

/// Rejections for the upload form, checked in declaration order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("No file part")]
    MissingFile,

    #[error("No selected file")]
    EmptyFilename,

    #[error("Unsupported file format")]
    UnsupportedFormat,

    #[error("Invalid file name")]
    InvalidFilename,

    #[error("Title is required")]
    MissingTitle,
}

#[derive(Debug, Default)]
pub struct RawUpload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub file: Option<(String, PendingUpload)>,
}

#[derive(Debug)]
pub struct UploadForm {
    pub title: String,
    pub description: Option<String>,
    pub filename: String,
    pub file: PendingUpload,
}

impl RawUpload {
    /// Collects the known fields, streaming the `video` part into a temporary
    /// file under `files`. A `video` part without a filename is a plain text
    /// field, not a file.
    pub async fn from_multipart(mut multipart: Multipart, files: &FileStore) -> Result<Self, AppError> {
        let mut raw = RawUpload::default();

        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            let file_name = field.file_name().map(str::to_owned);

            match (name.as_deref(), file_name) {
                (Some(VIDEO_FIELD), Some(file_name)) => {
                    let mut upload = files.begin_upload().await?;
                    while let Some(chunk) = field.chunk().await? {
                        upload.write(&chunk).await?;
                    }
                    raw.file = Some((file_name, upload));
                }
                (Some("title"), _) => raw.title = Some(field.text().await?),
                (Some("description"), _) => raw.description = Some(field.text().await?),
                _ => {}
            }
        }

        Ok(raw)
    }

    /// Dropping `self` on a rejection also discards the temporary file.
    pub fn validate(self, allowed: &HashSet<String>) -> Result<UploadForm, UploadError> {
        let (original, file) = self.file.ok_or(UploadError::MissingFile)?;

        if original.is_empty() {
            return Err(UploadError::EmptyFilename);
        }

        if !has_allowed_extension(&original, allowed) {
            return Err(UploadError::UnsupportedFormat);
        }

        let filename = sanitize_filename(&original);
        if filename.is_empty() {
            return Err(UploadError::InvalidFilename);
        }

        let title = self.title.ok_or(UploadError::MissingTitle)?;
        let description = self.description.filter(|d| !d.trim().is_empty());

        Ok(UploadForm {
            title,
            description,
            filename,
            file,
        })
    }
}
