//! # house-photo-dl
//!
//! Downloads the photo of every house listed by a paginated, flaky house
//! listing service.
//!
//! Pages are fetched concurrently and retried on non-200 answers; every house
//! on a page gets its own download task. The run ends on the first failure or
//! once every launched download has finished.
//!
//! ## Quick Start
//!
//! ```no_run
//! use house_photo_dl::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(".")?;
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     let mut states = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while states.changed().await.is_ok() {
//!             println!("State: {}", *states.borrow());
//!         }
//!     });
//!
//!     let outcome = house_photo_dl::run_with_shutdown(&pipeline).await;
//!     println!("exit code {}", outcome.exit_code());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types and `app.env` loading
pub mod config;
/// Error types
pub mod error;
/// Destination file naming
pub mod filename;
/// Fetch and download stages plus the run coordinator
pub mod pipeline;
/// Retry logic with configurable delays
pub mod retry;
/// House listing service client
pub mod service;
/// Core data types
pub mod types;

pub use config::{Config, DownloadConfig, RetryConfig, ServiceConfig};
pub use error::{Error, Failure, Result, Stage};
pub use pipeline::{Pipeline, RunOutcome};
pub use service::{AssetStore, HouseServiceClient, RecordSource};
pub use types::{House, PageRequest, RunState};

/// Run the pipeline until it finishes or a termination signal arrives.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Tasks still running when the signal arrives are not awaited.
pub async fn run_with_shutdown(pipeline: &Pipeline) -> RunOutcome {
    tokio::select! {
        outcome = pipeline.run() => outcome,
        () = wait_for_signal() => {
            tracing::warn!(state = %pipeline.state(), "Run interrupted");
            RunOutcome::Interrupted
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
