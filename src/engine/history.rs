//! Recent search queries, newest first, stored sealed on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::engine::security::SecretBox;

pub const MAX_HISTORY: usize = 5;

pub struct SearchHistory {
    path: PathBuf,
    secret: SecretBox,
    entries: Vec<String>,
}

impl SearchHistory {
    /// Load the history file. Any failure yields an empty history.
    pub fn load(path: &Path, secret: SecretBox) -> Self {
        let entries = read_entries(path, &secret);
        debug!("Loaded {} search history entries", entries.len());

        Self {
            path: path.to_path_buf(),
            secret,
            entries,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Move `query` to the front, keeping at most [`MAX_HISTORY`] entries, and persist.
    pub fn record(&mut self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }

        self.entries.retain(|q| q != query);
        self.entries.insert(0, query.to_string());
        self.entries.truncate(MAX_HISTORY);
        self.save();
    }

    fn save(&self) {
        let result = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| e.to_string())
            .and_then(|json| self.secret.seal(&json).map_err(|e| e.to_string()))
            .and_then(|sealed| {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(&self.path, sealed).map_err(|e| e.to_string())
            });

        if let Err(e) = result {
            warn!("Error saving search history to {}: {}", self.path.display(), e);
        }
    }
}

fn read_entries(path: &Path, secret: &SecretBox) -> Vec<String> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };

    let json = secret.open_or_plain(raw.trim());
    let mut entries: Vec<String> = serde_json::from_str(&json).unwrap_or_default();
    entries.truncate(MAX_HISTORY);
    entries
}
