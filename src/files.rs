use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Temporary names start with a dot, which [`sanitize_filename`] never
/// produces, so they cannot collide with or be served as stored videos.
const INCOMING_PREFIX: &str = ".incoming-";

/// Uploaded files on local disk, keyed by sanitized filename.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a stored file. `None` when the name is not a plain
    /// sanitized filename.
    pub fn path_of(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty() || sanitize_filename(filename) != filename {
            return None;
        }
        Some(self.root.join(filename))
    }

    /// Opens a hidden temporary file in the upload directory, creating the
    /// directory if needed.
    pub async fn begin_upload(&self) -> Result<PendingUpload> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create upload directory {}", self.root.display()))?;

        let path = self.root.join(format!("{INCOMING_PREFIX}{}", Uuid::new_v4()));
        let file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;

        Ok(PendingUpload {
            root: self.root.clone(),
            path,
            file: Some(file),
            size: 0,
            persisted: false,
        })
    }
}

/// An upload streamed to a temporary file. Dropping it without calling
/// [`PendingUpload::persist`] deletes the file.
#[derive(Debug)]
pub struct PendingUpload {
    root: PathBuf,
    path: PathBuf,
    file: Option<File>,
    size: u64,
    persisted: bool,
}

impl PendingUpload {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self.file.as_mut().context("Upload file already closed")?;
        file.write_all(chunk)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Moves the upload to `filename`, replacing any file already there.
    /// `filename` must come from [`sanitize_filename`].
    pub async fn persist(mut self, filename: &str) -> Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        }

        let target = self.root.join(filename);
        fs::rename(&self.path, &target)
            .await
            .with_context(|| format!("Failed to move upload to {}", target.display()))?;
        self.persisted = true;

        Ok(target)
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if !self.persisted {
            drop(self.file.take());
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Reduces a client-supplied name to `[A-Za-z0-9_.-]`. The name is NFKD
/// normalized so accented letters keep their base letter, path separators and
/// whitespace runs become `_`, other characters are dropped, and leading or
/// trailing `.`/`_` are trimmed. May return an empty string.
pub fn sanitize_filename(filename: &str) -> String {
    let spaced: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c: char| c == '.' || c == '_')
        .to_string()
}

/// Case-insensitive check of the text after the last `.`.
pub fn has_allowed_extension(filename: &str, allowed: &HashSet<String>) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| allowed.contains(&ext.to_lowercase()))
        .unwrap_or(false)
}
