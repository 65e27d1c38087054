//! Live Annotator CLI
//!
//! Serves a live view of a video source, records it on demand and collects
//! timestamped annotations from the browser.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use live_annotator::{
    capture::FrameSource,
    config::FileConfig,
    server::{AppState, StreamServer},
};
use tracing::{error, info, warn};

/// Live video viewer, recorder and annotator.
#[derive(Debug, Parser)]
#[command(name = "live-annotator", version, about)]
struct Cli {
    /// Video source: http(s):// MJPEG URL or MJPEG file path
    #[arg(long)]
    source: Option<String>,

    /// Host to bind [default: 127.0.0.1]
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to bind [default: 5000]
    #[arg(long)]
    port: Option<u16>,

    /// Resize width for viewing and recording, keeping aspect; 0 disables [default: 960]
    #[arg(long)]
    width: Option<u32>,

    /// Recording frame rate [default: 25]
    #[arg(long)]
    fps: Option<f64>,

    /// Directory for recordings and session records [default: .]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut FileConfig) {
        if let Some(source) = self.source {
            config.source.locator = source;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(width) = self.width {
            config.source.width = width;
        }
        if let Some(fps) = self.fps {
            config.recording.fps = fps;
        }
        if let Some(dir) = self.output_dir {
            config.recording.output_dir = dir;
        }
    }
}

fn load_config(cli: Cli) -> Result<FileConfig, String> {
    let mut config = match &cli.config {
        Some(path) => FileConfig::from_file(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?,
        None => FileConfig::default(),
    };
    cli.apply(&mut config);
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match load_config(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    info!("Live Annotator v{}", live_annotator::VERSION);

    let source = Arc::new(FrameSource::new(config.source.clone()));
    let state = match AppState::new(config, Arc::clone(&source)) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            eprintln!("Failed to create metrics registry: {}", e);
            std::process::exit(1);
        }
    };

    source.start();

    let on_interrupt = Arc::clone(&state);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, shutting down");
        on_interrupt.request_shutdown();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let result = StreamServer::new(Arc::clone(&state)).run().await;

    // Same finalize path as /stop; a no-op if /stop already ran.
    let finalizing = Arc::clone(&state);
    if let Err(e) = tokio::task::spawn_blocking(move || finalizing.finish_on_exit()).await {
        error!(error = %e, "Finalize task failed");
    }

    if let Err(e) = result {
        error!(error = %e, "Server failed");
        std::process::exit(1);
    }
    info!("Done");
}
