//! Sagasu
//!
//! `sagasu serve` shares a directory and accepts verified chunked uploads.
//! `sagasu upload` pushes a local file to a running server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sagasu::config::{check_chunk_size, Config};
use sagasu::state::AppState;
use sagasu::upload::{ChunkPlan, ChunkSource, DestinationPath, FileSource, Uploader};

#[derive(Parser)]
#[command(name = "sagasu", version, about = "Lightweight remote file system")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a directory and accept uploads into it
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,
        /// Root directory to serve
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Upload a local file to a running server
    Upload {
        /// File to upload
        file: PathBuf,
        /// Destination path on the server; a trailing `/` keeps the file name
        destination: String,
        /// Server WebSocket base URL, e.g. ws://host:8080
        #[arg(long)]
        endpoint: Option<String>,
        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Give up after this many consecutive rejections of one chunk
        #[arg(long)]
        max_resends: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "sagasu=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let mut config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    match Cli::parse().command {
        Command::Serve { host, port, root } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(root) = root {
                config.storage.root = root;
            }
            serve(config).await
        }
        Command::Upload { file, destination, endpoint, chunk_size, max_resends } => {
            if let Some(endpoint) = endpoint {
                config.upload.endpoint = endpoint;
            }
            if let Some(chunk_size) = chunk_size {
                config.upload.chunk_size = check_chunk_size("--chunk-size", chunk_size)?;
            }
            if max_resends.is_some() {
                config.upload.max_resends = max_resends;
            }
            upload(config, file, destination).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let root = tokio::fs::canonicalize(&config.storage.root)
        .await
        .with_context(|| format!("cannot open directory: {}", config.storage.root.display()))?;

    tracing::info!("Starting Sagasu v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Serving root: {}", root.display());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!("invalid bind address {}:{}", config.server.host, config.server.port)
        })?;

    let mut config = config;
    config.storage.root = root;
    let app = sagasu::app(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Sagasu listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn upload(config: Config, file: PathBuf, destination: String) -> anyhow::Result<()> {
    let source = FileSource::open(&file)
        .await
        .with_context(|| format!("cannot open {}", file.display()))?;

    // A destination given as a directory (trailing `/`) keeps the source name
    let keep_name = destination.is_empty() || destination.ends_with('/');
    let mut destination = DestinationPath::parse(&destination);
    if keep_name {
        let name = file
            .file_name()
            .context("source has no file name")?
            .to_string_lossy()
            .into_owned();
        destination = DestinationPath::new(destination.segments().iter().cloned().chain([name]));
    }

    let upload_config = config.upload.to_upload_config();
    let count = ChunkPlan::new(source.size(), upload_config.chunk_size).count();

    let bar = ProgressBar::new(count);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{bar:40}] {pos}/{len} chunks ({elapsed})")?
            .progress_chars("=> "),
    );
    bar.set_message(destination.to_string());

    let uploader = Uploader::new(upload_config);
    let result = uploader
        .upload(&config.upload.endpoint, &destination, &source, |index, _| {
            bar.set_position(index + 1)
        })
        .await;

    match result {
        Ok(()) => {
            bar.finish_with_message(format!("{destination} uploaded"));
            Ok(())
        }
        Err(e) => {
            bar.abandon_with_message(format!("{destination} failed"));
            Err(e).with_context(|| format!("upload of {} failed", file.display()))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
