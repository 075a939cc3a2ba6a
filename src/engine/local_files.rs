use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static POST_FILE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\..+$").unwrap());

/// Whether `name` looks like `{id}.{ext}`. Partial transfers do not count.
pub fn is_post_file_name(name: &str) -> bool {
    POST_FILE_NAME.is_match(name) && !name.ends_with(".part")
}

/// Number of post files directly inside `directory`.
pub fn count_local_files(directory: &Path) -> usize {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Error counting local files in {}: {}", directory.display(), e);
            }
            return 0;
        }
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| is_post_file_name(&entry.file_name().to_string_lossy()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_counts_only_post_files() {
        let dir = tempdir().unwrap();
        for name in ["1.jpg", "22.png", "333.webm", "cover.jpg", ".danbooru_resume.json", "4.jpg.0f3a.part"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("5.dir")).unwrap();

        assert_eq!(count_local_files(dir.path()), 3);
    }

    #[test]
    fn test_missing_directory_is_zero() {
        let dir = tempdir().unwrap();
        assert_eq!(count_local_files(&dir.path().join("nope")), 0);
    }
}
