pub mod assemble;
pub mod batch;
pub mod config;
pub mod dates;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod loader;
pub mod message;
pub mod normalize;
pub mod pipeline;

pub use assemble::{render_markdown, RenderedThread, SortOrder, Thread};
pub use error::{Diagnostic, ThreadError};
pub use pipeline::{process, EngineConfig};

use anyhow::Result;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

pub async fn run() -> Result<()> {
    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, abandoning unfinished files...");
            cancel_on_signal.cancel();
        }
    });

    let summary = batch::run_batch(&config, cancel).await;
    signal_task.abort();
    let summary = summary?;

    info!(
        "Batch complete: {} processed, {} failed, {} cancelled",
        summary.processed.len(),
        summary.failed.len(),
        summary.cancelled.len()
    );
    for failed in &summary.failed {
        warn!("Failed: {}: {}", failed.input.display(), failed.error);
    }

    Ok(())
}
