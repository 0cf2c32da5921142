//! Page fetch stage: one task per page, fanned into the batch channel.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use super::ErrorSink;
use crate::error::{Failure, Stage};
use crate::service::RecordSource;
use crate::types::{House, PageRequest};

/// Fetches pages `1..=num_pages` concurrently and forwards their houses.
pub struct PageFetchStage {
    source: Arc<dyn RecordSource>,
    base_url: String,
    num_pages: u32,
    per_page: u32,
    limit: Arc<Semaphore>,
    errors: Arc<ErrorSink>,
    cancel_on_failure: bool,
}

impl PageFetchStage {
    /// Create a stage running at most `max_concurrent` page fetches at once
    pub fn new(
        source: Arc<dyn RecordSource>,
        base_url: impl Into<String>,
        num_pages: u32,
        per_page: u32,
        max_concurrent: usize,
        errors: Arc<ErrorSink>,
    ) -> Self {
        Self {
            source,
            base_url: base_url.into(),
            num_pages,
            per_page,
            limit: Arc::new(Semaphore::new(max_concurrent.clamp(1, Semaphore::MAX_PERMITS))),
            errors,
            cancel_on_failure: false,
        }
    }

    /// Stop launching page fetches once a failure has been reported
    pub fn cancel_on_failure(mut self, enabled: bool) -> Self {
        self.cancel_on_failure = enabled;
        self
    }

    /// Run every page fetch to completion, returning how many were launched
    ///
    /// `batches` is closed once this returns: each task holds a clone of the
    /// sender and the stage's own handle is dropped after the last spawn.
    pub async fn run(self, batches: mpsc::Sender<Vec<House>>) -> u32 {
        let mut tasks = JoinSet::new();
        let mut launched = 0;

        for page in 1..=self.num_pages {
            let permit = match Arc::clone(&self.limit).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            // Checked with the permit held so a failure reported while waiting counts
            if self.cancel_on_failure && self.errors.has_failed() {
                tracing::info!(
                    launched,
                    remaining = self.num_pages - launched,
                    "Failure reported, not launching remaining page fetches"
                );
                break;
            }

            let source = Arc::clone(&self.source);
            let errors = Arc::clone(&self.errors);
            let batches = batches.clone();
            let request = PageRequest::new(self.base_url.clone(), page, self.per_page);

            tasks.spawn(async move {
                let _permit = permit;
                if let Err(e) = source.fetch_page(&request, &batches).await {
                    errors.report(Failure::fetch(request.page, e));
                }
            });
            launched += 1;
        }
        drop(batches);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                self.errors.report(Failure {
                    stage: Stage::Fetch,
                    context: "page task".to_string(),
                    error: e.into(),
                });
            }
        }

        tracing::debug!(launched, "All page fetches finished");
        launched
    }
}
