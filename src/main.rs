use std::process::ExitCode;

use house_photo_dl::{Config, Pipeline, run_with_shutdown};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for invalid or missing configuration
const CONFIG_ERROR_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::load(".") {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };

    let pipeline = match Pipeline::from_config(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Failed to set up download pipeline");
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };

    let outcome = run_with_shutdown(&pipeline).await;
    outcome.log_summary();

    ExitCode::from(outcome.exit_code())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
