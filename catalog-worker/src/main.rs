use tracing::{error, info};

mod auto_import;
mod config;
mod error;
mod ingestion;

use crate::config::{StorageLayout, load_config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting catalog worker v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let layout = StorageLayout::from(&config.storage);
    layout.ensure_dirs()?;
    info!(root = %layout.root().display(), "Storage layout ready");

    // Loads pdfium, the detector model and Tesseract before any file is accepted
    let worker = match auto_import::start_worker(config.clone()).await {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %e.display_chain(), "Extraction worker failed to start");
            return Err(e.into());
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    };

    let watched = auto_import::run_watcher(
        layout.intake_dir(),
        &config.watcher,
        worker.jobs(),
        shutdown,
    )
    .await;

    worker.shutdown().await;
    watched?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("catalog_worker=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
