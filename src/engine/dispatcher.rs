//! Batch dispatcher for the Danbooru Downloader
//!
//! Fans a page of posts out to a bounded pool of fetch tasks and hands back a
//! handle the caller awaits before moving on to the next page.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::danbooru::Post;
use crate::engine::events::{BatchReport, DownloadEvent, EventSender, Outcome, emit};
use crate::engine::fetcher::Fetcher;

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const MAX_CONCURRENCY: usize = 32;

/// Clamp a configured worker count into `1..=MAX_CONCURRENCY`.
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}

/// `{directory}/{id}.{ext}`
pub fn destination_path(directory: &Path, post: &Post) -> PathBuf {
    directory.join(format!("{}.{}", post.id, post.extension()))
}

/// Submits fetch tasks under a shared worker bound
pub struct BatchDispatcher {
    fetcher: Arc<Fetcher>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl BatchDispatcher {
    pub fn new(fetcher: Arc<Fetcher>, concurrency: usize) -> Self {
        let concurrency = clamp_concurrency(concurrency);
        Self {
            fetcher,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    /// Submit one fetch per post with a resolvable URL, in the given order.
    /// Nothing is submitted once `token` is cancelled.
    pub async fn dispatch(
        &self,
        posts: &[Post],
        directory: &Path,
        token: &CancellationToken,
        events: Option<&EventSender>,
    ) -> BatchHandle {
        let mut handle = BatchHandle {
            tasks: JoinSet::new(),
            unsubmitted: 0,
        };

        if let Err(e) = fs::create_dir_all(directory).await {
            error!("Failed to create download directory {}: {}", directory.display(), e);
        }

        for (index, post) in posts.iter().enumerate() {
            if token.is_cancelled() {
                handle.unsubmitted = posts[index..]
                    .iter()
                    .filter(|p| p.resolvable_url().is_some())
                    .count();
                info!("Batch stopped before submitting {} post(s)", handle.unsubmitted);
                break;
            }

            let Some(url) = post.resolvable_url() else {
                debug!(post_id = post.id, "Post has no file URL, skipping");
                continue;
            };

            let post_id = post.id;
            let url = url.to_string();
            let destination = destination_path(directory, post);
            let fetcher = self.fetcher.clone();
            let semaphore = self.semaphore.clone();
            let token = token.clone();
            let events = events.cloned();

            handle.tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return None,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Some(Outcome::Failed("worker pool closed".to_string())),
                    },
                };

                let outcome = fetcher
                    .fetch(&url, &destination, &token, |fraction| {
                        emit(events.as_ref(), DownloadEvent::Progress { post_id, fraction });
                    })
                    .await
                    .into_outcome();

                match &outcome {
                    Some(Outcome::Failed(message)) => warn!(post_id, "Download failed: {}", message),
                    Some(Outcome::Done(path)) => debug!(post_id, "Downloaded {}", path.display()),
                    Some(Outcome::Skipped(_)) => debug!(post_id, "Already present"),
                    None => {}
                }

                if let Some(outcome) = &outcome {
                    emit(
                        events.as_ref(),
                        DownloadEvent::Finished { post_id, outcome: outcome.clone() },
                    );
                }

                outcome
            });
        }

        handle
    }
}

/// Outstanding tasks of one batch
pub struct BatchHandle {
    tasks: JoinSet<Option<Outcome>>,
    unsubmitted: usize,
}

impl BatchHandle {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task of the batch to reach a terminal state.
    pub async fn wait(mut self) -> BatchReport {
        let mut report = BatchReport {
            cancelled: self.unsubmitted,
            ..Default::default()
        };

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome.as_ref()),
                Err(e) => {
                    error!("Download task failed to complete: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
