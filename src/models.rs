use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A video row joined with its uploader's name.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Video {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub user_id: i64,
    pub uploader: String,
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub title: String,
    pub description: Option<String>,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub user_id: i64,
}

impl NewVideo {
    pub fn new(title: String, description: Option<String>, filename: String, user_id: i64) -> Self {
        Self {
            title,
            description,
            filename,
            upload_date: Utc::now(),
            user_id,
        }
    }
}
