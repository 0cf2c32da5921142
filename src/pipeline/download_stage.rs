//! Photo download stage: one task per house, fed by the batch channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;

use super::ErrorSink;
use crate::error::{Failure, Stage};
use crate::filename::photo_filename;
use crate::service::AssetStore;
use crate::types::House;

/// Downloads the photo of every house received until the channel closes.
pub struct DownloadStage {
    store: Arc<dyn AssetStore>,
    output_dir: PathBuf,
    limit: Arc<Semaphore>,
    errors: Arc<ErrorSink>,
    cancel_on_failure: bool,
}

impl DownloadStage {
    /// Create a stage writing into `output_dir` with at most `max_concurrent`
    /// downloads in flight
    pub fn new(
        store: Arc<dyn AssetStore>,
        output_dir: impl Into<PathBuf>,
        max_concurrent: usize,
        errors: Arc<ErrorSink>,
    ) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            limit: Arc::new(Semaphore::new(max_concurrent.clamp(1, Semaphore::MAX_PERMITS))),
            errors,
            cancel_on_failure: false,
        }
    }

    /// Stop launching downloads once a failure has been reported; later
    /// batches are discarded
    pub fn cancel_on_failure(mut self, enabled: bool) -> Self {
        self.cancel_on_failure = enabled;
        self
    }

    /// Consume batches until the channel closes, then wait for every launched
    /// download; returns how many downloads were launched
    pub async fn run(self, mut batches: mpsc::Receiver<Vec<House>>) -> usize {
        let mut tasks = JoinSet::new();
        let mut launched = 0;

        while let Some(batch) = batches.recv().await {
            if self.cancel_on_failure && self.errors.has_failed() {
                tracing::info!(houses = batch.len(), "Failure reported, discarding batch");
                continue;
            }

            for house in batch {
                let permit = match Arc::clone(&self.limit).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                // A failure may have been reported while waiting for the permit
                if self.cancel_on_failure && self.errors.has_failed() {
                    tracing::info!(house_id = house.id, "Failure reported, not launching remaining downloads");
                    break;
                }
                tasks.spawn(save_house_photo(
                    house,
                    self.output_dir.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.errors),
                    permit,
                ));
                launched += 1;
            }

            while let Some(joined) = tasks.try_join_next() {
                self.check_join(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.check_join(joined);
        }

        tracing::debug!(launched, "All photo downloads finished");
        launched
    }

    fn check_join(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            self.errors.report(Failure {
                stage: Stage::Download,
                context: "download task".to_string(),
                error: e.into(),
            });
        }
    }
}

/// Create the destination file, stream the photo into it, and close it.
///
/// The photo is written to a temporary name and renamed into place once the
/// file was shut down. The temporary file is removed when any step fails.
async fn save_house_photo(
    house: House,
    output_dir: PathBuf,
    store: Arc<dyn AssetStore>,
    errors: Arc<ErrorSink>,
    _permit: OwnedSemaphorePermit,
) {
    let name = photo_filename(&house);
    let path = output_dir.join(&name);
    let part = output_dir.join(partial_name(&name));

    let mut file = match tokio::fs::File::create(&part).await {
        Ok(f) => f,
        Err(e) => {
            errors.report(Failure::download(house.id, e.into()));
            return;
        }
    };

    let saved = store.save_photo(&mut file, &house.photo_url).await;
    let closed = file.shutdown().await;
    drop(file);

    let result = match (saved, closed) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e.into()),
        (Ok(bytes), Ok(())) => tokio::fs::rename(&part, &path)
            .await
            .map(|()| bytes)
            .map_err(Into::into),
    };

    match result {
        Ok(bytes) => {
            tracing::debug!(house_id = house.id, path = %path.display(), bytes, "Photo saved");
        }
        Err(e) => {
            // Removed before reporting so a returning coordinator never sees it
            remove_partial(&part).await;
            errors.report(Failure::download(house.id, e));
        }
    }
}

/// Hidden, per-task name the photo is written under until it is complete
///
/// Houses mapping to the same file name never share a handle; the last one to
/// finish replaces the file atomically.
fn partial_name(name: &str) -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!(".{name}.{}.part", NEXT.fetch_add(1, Ordering::Relaxed))
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial photo file");
    }
}
