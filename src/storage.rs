use crate::models::{NewVideo, Video};
use anyhow::{Context, Result};
use sqlx::SqlitePool;

const VIDEO_COLUMNS: &str = "SELECT v.id, v.title, v.description, v.filename, v.upload_date, v.user_id, u.username AS uploader
     FROM videos v JOIN users u ON u.id = v.user_id";

pub const RECOMMENDED_LIMIT: i64 = 5;

#[derive(Clone)]
pub struct VideoStorage {
    pool: SqlitePool,
}

impl VideoStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_video(&self, video: &NewVideo) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO videos (title, description, filename, upload_date, user_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.filename)
        .bind(video.upload_date)
        .bind(video.user_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert video {}", video.filename))?;

        Ok(result.last_insert_rowid())
    }

    /// Newest first. With a query, only titles containing it (case-sensitive).
    pub async fn list_videos(&self, query: Option<&str>) -> Result<Vec<Video>> {
        let videos = match query {
            Some(q) => {
                sqlx::query_as::<_, Video>(&format!(
                    "{VIDEO_COLUMNS} WHERE instr(v.title, ?) > 0 ORDER BY v.upload_date DESC, v.id DESC"
                ))
                .bind(q)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Video>(&format!(
                    "{VIDEO_COLUMNS} ORDER BY v.upload_date DESC, v.id DESC"
                ))
                .fetch_all(&self.pool)
                .await
            }
        };

        videos.context("Failed to list videos")
    }

    pub async fn get_video(&self, id: i64) -> Result<Option<Video>> {
        sqlx::query_as::<_, Video>(&format!("{VIDEO_COLUMNS} WHERE v.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch video {id}"))
    }

    /// The most recent videos other than `exclude_id`.
    pub async fn get_recommended(&self, exclude_id: i64, limit: i64) -> Result<Vec<Video>> {
        sqlx::query_as::<_, Video>(&format!(
            "{VIDEO_COLUMNS} WHERE v.id != ? ORDER BY v.upload_date DESC, v.id DESC LIMIT ?"
        ))
        .bind(exclude_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recommendations")
    }
}
