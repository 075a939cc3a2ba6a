//! In-memory transport and post source shared by the engine tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::StatusCode;

use crate::danbooru::{ApiError, ApiResult, Post, PostSource};
use crate::engine::fetcher::{RemoteBody, TransferError, TransferResult, Transport};

/// Serves registered bodies in fixed-size chunks. Unregistered URLs serve
/// their own bytes as the body.
#[derive(Default)]
pub(crate) struct MemoryTransport {
    bodies: Mutex<HashMap<String, Vec<Bytes>>>,
    failures: Mutex<HashMap<String, (usize, StatusCode)>>,
    stall_after: Mutex<HashMap<String, usize>>,
    chunk_delay: Duration,
    opened: Mutex<Vec<String>>,
}

fn chunked(body: Vec<u8>, chunk_size: usize) -> Vec<Bytes> {
    body.chunks(chunk_size.max(1)).map(Bytes::copy_from_slice).collect()
}

impl MemoryTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_body(self, url: &str, body: Vec<u8>, chunk_size: usize) -> Self {
        self.set_body(url, body, chunk_size);
        self
    }

    pub(crate) fn set_body(&self, url: &str, body: Vec<u8>, chunk_size: usize) {
        self.bodies.lock().insert(url.to_string(), chunked(body, chunk_size));
    }

    /// Fail the first `count` opens of `url` with `status`.
    pub(crate) fn with_failures(self, url: &str, count: usize, status: StatusCode) -> Self {
        self.failures.lock().insert(url.to_string(), (count, status));
        self
    }

    /// Yield `chunks` chunks of `url`, then never finish.
    pub(crate) fn with_stall_after(self, url: &str, chunks: usize) -> Self {
        self.stall_after.lock().insert(url.to_string(), chunks);
        self
    }

    pub(crate) fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub(crate) fn open_count(&self, url: &str) -> usize {
        self.opened.lock().iter().filter(|u| u.as_str() == url).count()
    }

    pub(crate) fn total_opens(&self) -> usize {
        self.opened.lock().len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> TransferResult<RemoteBody> {
        self.opened.lock().push(url.to_string());

        if let Some((remaining, status)) = self.failures.lock().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransferError::Status(*status));
            }
        }

        let chunks = self
            .bodies
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| vec![Bytes::copy_from_slice(url.as_bytes())]);
        let content_length = chunks.iter().map(|c| c.len() as u64).sum();

        let delay = self.chunk_delay;
        let body = stream::iter(chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<Bytes, TransferError>(chunk)
        });

        let stream = match self.stall_after.lock().get(url).copied() {
            Some(n) => body.take(n).chain(stream::pending()).boxed(),
            None => body.boxed(),
        };

        Ok(RemoteBody {
            content_length: Some(content_length),
            stream,
        })
    }
}

/// Post with a `mem://` URL the [`MemoryTransport`] serves.
pub(crate) fn post(id: u64) -> Post {
    Post {
        id,
        file_url: Some(format!("mem://{}", id)),
        file_ext: Some("jpg".to_string()),
        ..Default::default()
    }
}

/// Newest-first pages of posts with descending ids from `top` down to `bottom`.
pub(crate) fn pages(top: u64, bottom: u64, page_size: usize) -> Vec<Vec<Post>> {
    let ids: Vec<u64> = (bottom..=top).rev().collect();
    ids.chunks(page_size.max(1))
        .map(|chunk| chunk.iter().copied().map(post).collect())
        .collect()
}

/// Paged post source that records every page request.
#[derive(Default)]
pub(crate) struct MemorySource {
    pages: Mutex<Vec<Vec<Post>>>,
    requested: Mutex<Vec<u32>>,
    fail_on: Mutex<Option<u32>>,
    stall_on: Mutex<Option<u32>>,
}

impl MemorySource {
    pub(crate) fn new(pages: Vec<Vec<Post>>) -> Self {
        Self {
            pages: Mutex::new(pages),
            ..Default::default()
        }
    }

    pub(crate) fn set_pages(&self, pages: Vec<Vec<Post>>) {
        *self.pages.lock() = pages;
    }

    pub(crate) fn fail_on(&self, page: u32) {
        *self.fail_on.lock() = Some(page);
    }

    /// Never answer requests for `page`.
    pub(crate) fn stall_on(&self, page: u32) {
        *self.stall_on.lock() = Some(page);
    }

    pub(crate) fn requested(&self) -> Vec<u32> {
        self.requested.lock().clone()
    }

    pub(crate) fn clear_requested(&self) {
        self.requested.lock().clear();
    }
}

#[async_trait]
impl PostSource for MemorySource {
    async fn fetch_page(&self, _tags: &str, page: u32, _limit: u32) -> ApiResult<Vec<Post>> {
        self.requested.lock().push(page);

        if *self.fail_on.lock() == Some(page) {
            return Err(ApiError::Decode("simulated outage".to_string()));
        }

        let stalled = *self.stall_on.lock() == Some(page);
        if stalled {
            std::future::pending::<()>().await;
        }

        let index = page.saturating_sub(1) as usize;
        Ok(self.pages.lock().get(index).cloned().unwrap_or_default())
    }

    async fn count(&self, _tags: &str) -> ApiResult<u64> {
        Ok(self.pages.lock().iter().map(|p| p.len() as u64).sum())
    }
}
