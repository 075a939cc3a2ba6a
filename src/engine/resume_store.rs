//! Resume checkpoint store for bulk downloads
//!
//! One sealed record per download directory:
//! `{query, top_id, last_page, is_complete, updated_at}`.
//!
//! Reads never fail: a missing, unreadable or undecryptable file is the same
//! as no checkpoint. Writes replace the file atomically and log on failure.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::security::SecretBox;

pub const RESUME_FILE_NAME: &str = ".danbooru_resume.json";

fn default_page() -> u32 {
    1
}

/// Persisted progress of the last bulk run in a directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub query: String,
    /// Newest post seen by the last run. `None` when that run saw nothing.
    #[serde(default)]
    pub top_id: Option<u64>,
    #[serde(default = "default_page")]
    pub last_page: u32,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Resume inputs with defaults applied for the absent case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeState {
    pub top_id: Option<u64>,
    pub last_page: u32,
    pub is_complete: bool,
}

impl Default for ResumeState {
    fn default() -> Self {
        Self {
            top_id: None,
            last_page: 1,
            is_complete: false,
        }
    }
}

/// Case-insensitive comparison of two tag expressions.
pub fn queries_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Checkpoint file of one download directory
pub struct ResumeStore {
    path: PathBuf,
    secret: SecretBox,
    checkpoint: Option<Checkpoint>,
}

impl ResumeStore {
    /// Read the checkpoint of `directory`, if any.
    pub async fn load(directory: &Path, secret: SecretBox) -> Self {
        let path = directory.join(RESUME_FILE_NAME);
        let checkpoint = read_checkpoint(&path, &secret).await;

        match &checkpoint {
            Some(c) => info!(
                query = %c.query,
                top_id = ?c.top_id,
                last_page = c.last_page,
                is_complete = c.is_complete,
                "Loaded resume checkpoint"
            ),
            None => debug!("No resume checkpoint at {}", path.display()),
        }

        Self { path, secret, checkpoint }
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub fn query(&self) -> Option<&str> {
        self.checkpoint.as_ref().map(|c| c.query.as_str())
    }

    pub fn state(&self) -> ResumeState {
        self.checkpoint
            .as_ref()
            .map(|c| ResumeState {
                top_id: c.top_id,
                last_page: c.last_page.max(1),
                is_complete: c.is_complete,
            })
            .unwrap_or_default()
    }

    /// Persist a checkpoint. Returns false, keeping the previous in-memory
    /// state, when the write fails.
    pub async fn save(&mut self, query: &str, top_id: Option<u64>, last_page: u32, is_complete: bool) -> bool {
        let checkpoint = Checkpoint {
            query: query.to_string(),
            top_id,
            last_page,
            is_complete,
            updated_at: Some(Utc::now().to_rfc3339()),
        };

        match self.write(&checkpoint).await {
            Ok(()) => {
                debug!(
                    query,
                    top_id = ?top_id,
                    last_page,
                    is_complete,
                    "Saved resume checkpoint"
                );
                self.checkpoint = Some(checkpoint);
                true
            }
            Err(e) => {
                warn!("Failed to save resume checkpoint to {}: {}", self.path.display(), e);
                false
            }
        }
    }

    async fn write(&self, checkpoint: &Checkpoint) -> io::Result<()> {
        let json = serde_json::to_string(checkpoint)?;
        let sealed = self
            .secret
            .seal(&json)
            .map_err(|e| io::Error::other(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&self.path, sealed.as_bytes()).await
    }
}

async fn read_checkpoint(path: &Path, secret: &SecretBox) -> Option<Checkpoint> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read resume checkpoint {}: {}", path.display(), e);
            return None;
        }
    };

    let json = match secret.open(&raw) {
        Ok(json) => json,
        Err(_) => {
            debug!("Checkpoint is not sealed, reading as plain JSON");
            raw.trim().to_string()
        }
    };

    match serde_json::from_str(&json) {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            warn!("Ignoring unreadable resume checkpoint {}: {}", path.display(), e);
            None
        }
    }
}

/// Write to a uniquely named sibling, fsync, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        Uuid::new_v4()
    );
    let temp_path = path.with_file_name(&temp_name);

    let result = async {
        let mut file = File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
        return result;
    }

    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
    }

    Ok(())
}
