//! Bulk Resume Engine for the Danbooru Downloader
//!
//! This module provides functionality for:
//! 1. Walking the live, newest-first result stream page by page
//! 2. Locating the previous run's frontier and downloading the gap above it
//! 3. Jumping back to the depth an interrupted run had reached
//! 4. Checkpointing after every fully processed page
//!
//! Pages are strictly sequential: a page's batch settles before the next page
//! is fetched, so the checkpoint always describes a fully processed prefix.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::danbooru::{ApiError, Post, PostSource};
use crate::engine::dispatcher::BatchDispatcher;
use crate::engine::events::{BatchReport, DownloadEvent, EventSender, emit};
use crate::engine::resume_store::{ResumeState, ResumeStore, queries_match};
use crate::engine::security::SecretBox;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Error types for the bulk engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Query failed on page {page}: {source}")]
    Query {
        page: u32,
        #[source]
        source: ApiError,
    },
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// How a run treats the stored checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Bridge the gap above the previous frontier, then resume where the last run stopped.
    #[default]
    SmartResume,
    /// Ignore the checkpoint and walk every page.
    Repair,
}

#[derive(Debug, Clone)]
pub struct BulkConfig {
    pub directory: PathBuf,
    pub page_size: u32,
}

impl BulkConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// An empty page was returned.
    EndOfResults,
    /// The gap was bridged and the previous run had already reached the end.
    CaughtUp,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub end: RunEnd,
    pub pages_fetched: u32,
    pub last_page: u32,
    pub jumped_to: Option<u32>,
    pub gap_bridged: bool,
    pub report: BatchReport,
}

/// Page loop over a [`PostSource`]
pub struct BulkEngine<S: PostSource> {
    source: Arc<S>,
    dispatcher: Arc<BatchDispatcher>,
    secret: SecretBox,
    config: BulkConfig,
}

impl<S: PostSource> BulkEngine<S> {
    pub fn new(source: Arc<S>, dispatcher: Arc<BatchDispatcher>, secret: SecretBox, config: BulkConfig) -> Self {
        Self {
            source,
            dispatcher,
            secret,
            config,
        }
    }

    /// Run the page loop for `query` until end of results, catch-up or cancellation.
    ///
    /// A failed page fetch aborts the run with the checkpoint left at the last
    /// page that was fully processed.
    #[instrument(skip(self, events), fields(directory = %self.config.directory.display()))]
    pub async fn run(&self, query: &str, mode: RunMode, events: Option<&EventSender>) -> EngineResult<RunSummary> {
        let token = self.dispatcher.fetcher().control().begin_run();
        let mut store = ResumeStore::load(&self.config.directory, self.secret.clone()).await;

        let prior = match mode {
            RunMode::Repair => {
                info!("Repair mode: scanning every page");
                None
            }
            RunMode::SmartResume => match store.checkpoint() {
                Some(checkpoint) if queries_match(&checkpoint.query, query) => Some(store.state()),
                Some(checkpoint) => {
                    warn!(
                        stored = %checkpoint.query,
                        "Checkpoint belongs to a different query, starting fresh"
                    );
                    None
                }
                None => None,
            },
        };
        let prior_top = prior.and_then(|p| p.top_id);

        let page_size = self.config.page_size.max(1);
        let mut page: u32 = 1;
        let mut current_top: Option<u64> = None;
        let mut summary = RunSummary {
            end: RunEnd::Cancelled,
            pages_fetched: 0,
            last_page: 0,
            jumped_to: None,
            gap_bridged: false,
            report: BatchReport::default(),
        };

        loop {
            if token.is_cancelled() {
                break;
            }

            emit(events, DownloadEvent::PageStarted { page });
            // Dropping the request also interrupts its retry backoff.
            let posts = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                posts = self.source.fetch_page(query, page, page_size) => {
                    posts.map_err(|source| EngineError::Query { page, source })?
                }
            };
            summary.pages_fetched += 1;
            summary.last_page = page;

            if token.is_cancelled() {
                break;
            }

            if posts.is_empty() {
                info!(page, "End of results");
                if mode == RunMode::SmartResume {
                    store.save(query, current_top.or(prior_top), page, true).await;
                }
                summary.end = RunEnd::EndOfResults;
                break;
            }

            if current_top.is_none() {
                current_top = Some(posts[0].id);
                debug!(top_id = posts[0].id, "Newest post of this run");
            }

            let mut batch: &[Post] = &posts;

            if let Some(prior) = prior.filter(|_| !summary.gap_bridged) {
                if let Some(frontier) = find_frontier(&posts, &prior) {
                    summary.gap_bridged = true;
                    info!(page, new_posts = frontier, "Found previous frontier");

                    let report = self.download(&posts[..frontier], &token, events).await;
                    summary.report.merge(report);
                    if token.is_cancelled() {
                        break;
                    }

                    if prior.is_complete {
                        store.save(query, current_top, prior.last_page, true).await;
                        summary.end = RunEnd::CaughtUp;
                        break;
                    }

                    if prior.last_page > page {
                        info!(from = page, to = prior.last_page, "Resuming previous scan depth");
                        emit(events, DownloadEvent::Jumped { from: page, to: prior.last_page });
                        summary.jumped_to = Some(prior.last_page);
                        page = prior.last_page;
                        continue;
                    }

                    batch = &posts[frontier..];
                }
            }

            let report = self.download(batch, &token, events).await;
            summary.report.merge(report);
            if token.is_cancelled() {
                break;
            }

            if mode == RunMode::SmartResume {
                store.save(query, current_top.or(prior_top), page, false).await;
            }
            page += 1;
        }

        info!(
            end = ?summary.end,
            pages = summary.pages_fetched,
            done = summary.report.done,
            skipped = summary.report.skipped,
            failed = summary.report.failed,
            "Bulk run finished"
        );

        Ok(summary)
    }

    async fn download(&self, posts: &[Post], token: &CancellationToken, events: Option<&EventSender>) -> BatchReport {
        if posts.is_empty() {
            return BatchReport::default();
        }

        self.dispatcher
            .dispatch(posts, &self.config.directory, token, events)
            .await
            .wait()
            .await
    }
}

/// Offset of the previous run's newest post within `posts`.
fn find_frontier(posts: &[Post], prior: &ResumeState) -> Option<usize> {
    let top_id = prior.top_id?;
    posts.iter().position(|p| p.id == top_id)
}
