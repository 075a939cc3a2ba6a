use serde::Deserialize;

/// Extension used when the board omits one.
pub const DEFAULT_FILE_EXT: &str = "jpg";

/// Post data from the board API.
///
/// Only `id`, `file_url` and `file_ext` matter to the download pipeline; the
/// rest is shown in listings.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Post {
    pub id: u64,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_ext: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub fav_count: i64,
    #[serde(default)]
    pub tag_string: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub preview_file_url: Option<String>,
}

impl Post {
    /// File extension, falling back to [`DEFAULT_FILE_EXT`].
    pub fn extension(&self) -> &str {
        match self.file_ext.as_deref() {
            Some(ext) if !ext.is_empty() => ext,
            _ => DEFAULT_FILE_EXT,
        }
    }

    /// File URL if the board exposed one (restricted posts have none).
    pub fn resolvable_url(&self) -> Option<&str> {
        self.file_url.as_deref().filter(|url| !url.is_empty())
    }

    /// One-line summary used by the interactive listing.
    pub fn summary(&self, max_tags_len: usize) -> String {
        let tags = if self.tag_string.chars().count() > max_tags_len {
            let cut: String = self.tag_string.chars().take(max_tags_len).collect();
            format!("{}...", cut)
        } else {
            self.tag_string.clone()
        };

        format!(
            "ID: {} | {} | Rating: {} | Score: {} | Favs: {} | {}",
            self.id,
            self.created_at.as_deref().map(|c| c.get(..10).unwrap_or(c)).unwrap_or("?"),
            self.rating.as_deref().unwrap_or("?"),
            self.score,
            self.fav_count,
            tags,
        )
    }
}
