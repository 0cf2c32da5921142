//! Download pipeline: page fetching, photo downloading, and run coordination.
//!
//! - [`fetch_stage`] - one task per page, houses forwarded as batches
//! - [`download_stage`] - one task per house, photo written to disk
//! - [`error_sink`] - first-failure latch shared by both stages
//!
//! [`Pipeline`] wires the stages together with a bounded channel and decides the
//! outcome of a run.

mod download_stage;
mod error_sink;
mod fetch_stage;

pub use download_stage::DownloadStage;
pub use error_sink::ErrorSink;
pub use fetch_stage::PageFetchStage;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::{Failure, Result, Stage};
use crate::service::{AssetStore, HouseServiceClient, RecordSource};
use crate::types::RunState;

/// Final result of a pipeline run
#[derive(Debug)]
pub enum RunOutcome {
    /// Every page was fetched and every launched download finished without failure
    Completed,
    /// The first failure reported by any task
    Failed(Failure),
    /// The run was stopped by a termination signal
    Interrupted,
}

impl RunOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Failed(_) => 1,
            RunOutcome::Interrupted => 130,
        }
    }

    /// Whether the run completed successfully
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    /// Log how the run ended
    pub fn log_summary(&self) {
        match self {
            RunOutcome::Completed => tracing::info!("Run completed"),
            // Already logged at error level when it was reported
            RunOutcome::Failed(failure) => tracing::debug!(error = %failure, "Run failed"),
            RunOutcome::Interrupted => tracing::warn!("Run interrupted by signal"),
        }
    }
}

/// Coordinates one run of the page fetch and photo download stages
pub struct Pipeline {
    config: Config,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn AssetStore>,
    state_tx: watch::Sender<RunState>,
}

impl Pipeline {
    /// Create a pipeline over explicit record source and asset store
    pub fn new(config: Config, source: Arc<dyn RecordSource>, store: Arc<dyn AssetStore>) -> Self {
        let (state_tx, _) = watch::channel(RunState::Running);
        Self {
            config,
            source,
            store,
            state_tx,
        }
    }

    /// Create a pipeline backed by one shared [`HouseServiceClient`]
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(HouseServiceClient::from_config(&config)?);
        Ok(Self::new(config, client.clone(), client))
    }

    /// Subscribe to run state transitions
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        *self.state_tx.borrow()
    }

    /// Run both stages until every download finished or the first failure
    ///
    /// Returning [`RunOutcome::Failed`] does not stop tasks that are already
    /// running; they continue in the background until they finish or the
    /// runtime shuts down.
    pub async fn run(&self) -> RunOutcome {
        let service = &self.config.service;
        let download = &self.config.download;

        self.set_state(RunState::Running);
        tracing::info!(
            url = %service.house_service_url,
            num_pages = service.num_pages,
            per_page = service.num_per_page,
            output_dir = %download.output_dir.display(),
            page_attempts = self.config.retry.page.max_attempts,
            photo_attempts = self.config.retry.photo.max_attempts,
            "Starting photo download run"
        );

        if let Err(e) = tokio::fs::create_dir_all(&download.output_dir).await {
            let failure = Failure {
                stage: Stage::Download,
                context: format!("output directory {}", download.output_dir.display()),
                error: e.into(),
            };
            tracing::error!(error = %failure, "Cannot prepare output directory");
            self.set_state(RunState::Failed);
            return RunOutcome::Failed(failure);
        }

        let errors = Arc::new(ErrorSink::new());
        let (batch_tx, batch_rx) = mpsc::channel(service.num_pages.max(1) as usize);

        let fetch_stage = PageFetchStage::new(
            Arc::clone(&self.source),
            service.house_service_url.clone(),
            service.num_pages,
            service.num_per_page,
            download.max_concurrent_fetches,
            Arc::clone(&errors),
        )
        .cancel_on_failure(download.cancel_on_failure);

        let download_stage = DownloadStage::new(
            Arc::clone(&self.store),
            download.output_dir.clone(),
            download.max_concurrent_downloads,
            Arc::clone(&errors),
        )
        .cancel_on_failure(download.cancel_on_failure);

        let mut fetch = tokio::spawn(fetch_stage.run(batch_tx));
        let mut downloads = tokio::spawn(download_stage.run(batch_rx));
        let mut fetching = true;

        loop {
            tokio::select! {
                biased;

                () = errors.tripped() => break,

                joined = &mut fetch, if fetching => {
                    fetching = false;
                    self.on_fetch_finished(joined, &errors);
                }

                joined = &mut downloads => {
                    match joined {
                        Ok(launched) => tracing::debug!(launched, "Download stage finished"),
                        Err(e) => {
                            errors.report(Failure {
                                stage: Stage::Download,
                                context: "download stage".to_string(),
                                error: e.into(),
                            });
                        }
                    }
                    // The channel closed, so every page task is done; only the
                    // stage's own join loop can still be running
                    if fetching {
                        let joined = (&mut fetch).await;
                        self.on_fetch_finished(joined, &errors);
                    }
                    break;
                }
            }
        }

        match errors.take_failure() {
            Some(failure) => {
                self.set_state(RunState::Failed);
                RunOutcome::Failed(failure)
            }
            None => {
                self.set_state(RunState::Completed);
                tracing::info!("All photos downloaded");
                RunOutcome::Completed
            }
        }
    }

    fn on_fetch_finished(
        &self,
        joined: std::result::Result<u32, tokio::task::JoinError>,
        errors: &ErrorSink,
    ) {
        match joined {
            Ok(launched) => {
                tracing::debug!(launched, "Page fetch stage finished");
                self.set_state(RunState::Draining);
            }
            Err(e) => {
                errors.report(Failure {
                    stage: Stage::Fetch,
                    context: "fetch stage".to_string(),
                    error: e.into(),
                });
            }
        }
    }

    fn set_state(&self, state: RunState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Run state changed");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
