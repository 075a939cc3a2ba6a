//! Download of an explicit, user-chosen set of posts.
//!
//! No paging and no checkpoint writes. The only checkpoint interaction is the
//! advisory query mismatch check callers run before confirming.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::danbooru::Post;
use crate::engine::dispatcher::BatchDispatcher;
use crate::engine::events::{BatchReport, EventSender};
use crate::engine::resume_store::{ResumeStore, queries_match};
use crate::engine::security::SecretBox;

/// The directory's checkpoint was recorded for another query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMismatch {
    pub stored: String,
    pub active: String,
}

/// Compare the checkpoint query of `directory` with `active_query`.
pub async fn check_query_mismatch(directory: &Path, active_query: &str, secret: &SecretBox) -> Option<QueryMismatch> {
    let store = ResumeStore::load(directory, secret.clone()).await;
    let stored = store.query()?.trim();

    if stored.is_empty() || queries_match(stored, active_query) {
        return None;
    }

    warn!(stored, active = active_query, "Download directory holds files from another query");
    Some(QueryMismatch {
        stored: stored.to_string(),
        active: active_query.trim().to_string(),
    })
}

pub struct SelectiveDownloader {
    dispatcher: Arc<BatchDispatcher>,
    directory: PathBuf,
}

impl SelectiveDownloader {
    pub fn new(dispatcher: Arc<BatchDispatcher>, directory: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher,
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Download `posts` as a single batch.
    pub async fn download(&self, posts: &[Post], events: Option<&EventSender>) -> BatchReport {
        let token = self.dispatcher.fetcher().control().begin_run();
        info!(count = posts.len(), "Downloading selected posts");

        let report = self
            .dispatcher
            .dispatch(posts, &self.directory, &token, events)
            .await
            .wait()
            .await;

        info!(
            done = report.done,
            skipped = report.skipped,
            failed = report.failed,
            "Selected downloads finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::control::TransferControl;
    use crate::engine::fetcher::{Fetcher, FetcherConfig};
    use crate::engine::resume_store::RESUME_FILE_NAME;
    use crate::engine::testing::{MemoryTransport, post};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_mismatch_detection() {
        let dir = tempdir().unwrap();
        let secret = SecretBox::load_or_generate(&dir.path().join("key")).unwrap();

        assert_eq!(check_query_mismatch(dir.path(), "anything", &secret).await, None);

        let mut store = ResumeStore::load(dir.path(), secret.clone()).await;
        store.save("Cat_Ears", Some(1), 1, false).await;

        assert_eq!(check_query_mismatch(dir.path(), "cat_ears", &secret).await, None);
        assert_eq!(
            check_query_mismatch(dir.path(), "dog_ears", &secret).await,
            Some(QueryMismatch { stored: "Cat_Ears".to_string(), active: "dog_ears".to_string() })
        );
    }

    #[tokio::test]
    async fn test_selected_posts_download_without_checkpoint() {
        let dir = tempdir().unwrap();
        let fetcher = Fetcher::new(
            Arc::new(MemoryTransport::new()),
            TransferControl::new(),
            FetcherConfig::default(),
        );
        let dispatcher = Arc::new(BatchDispatcher::new(Arc::new(fetcher), 2));
        let downloader = SelectiveDownloader::new(dispatcher, dir.path());

        let report = downloader.download(&[post(11), post(12)], None).await;
        assert_eq!(report.done, 2);

        let again = downloader.download(&[post(11)], None).await;
        assert_eq!(again.skipped, 1);

        assert!(dir.path().join("12.jpg").exists());
        assert!(!dir.path().join(RESUME_FILE_NAME).exists());
    }
}
