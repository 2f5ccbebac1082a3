//! `serialcam` - CLI for receiving framed images over serial.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use serialcam::cli::{
    CaptureCommand, Cli, Command, ConfigCommand, ImagesCommand, ReplayCommand, ServeCommand,
};
use serialcam::web::{build_router, AppState};
use serialcam::{init_logging, Config, ImageStore, ScriptedSource, SerialManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    match cli.command {
        Command::Config(ConfigCommand::Path) => {
            println!("{}", Config::default_config_path().display());
            Ok(())
        }
        Command::Config(ConfigCommand::Validate { file }) => {
            handle_validate(file.or(cli.config));
            Ok(())
        }
        command => {
            let config = Config::load_from(cli.config).context("failed to load configuration")?;
            match command {
                Command::Serve(cmd) => handle_serve(config, cmd).await,
                Command::Capture(cmd) => handle_capture(&config, cmd).await,
                Command::Replay(cmd) => handle_replay(&config, cmd).await,
                Command::Images(cmd) => handle_images(&config, cmd).await,
                Command::Config(ConfigCommand::Show { json }) => handle_show(&config, json),
                Command::Config(_) => Ok(()),
            }
        }
    }
}

async fn handle_serve(mut config: Config, cmd: ServeCommand) -> anyhow::Result<()> {
    if let Some(bind) = cmd.bind {
        config.server.bind_addr = bind;
    }
    let addr = config.bind_addr()?;
    let connect = cmd.connect || config.serial.auto_connect;

    let state = Arc::new(AppState::from_config(config).context("failed to open image store")?);

    if connect {
        let (port, baud_rate) = (
            state.config.serial.port.clone(),
            state.config.serial.baud_rate,
        );
        if let Err(err) = state.serial.lock().await.connect(&port, baud_rate).await {
            warn!("Could not connect to {} at startup: {}", port, err);
        }
    }

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.serial.lock().await.disconnect().await;
    Ok(())
}

async fn handle_capture(config: &Config, cmd: CaptureCommand) -> anyhow::Result<()> {
    let port = cmd.port.unwrap_or_else(|| config.serial.port.clone());
    let baud_rate = cmd.baud.unwrap_or(config.serial.baud_rate);

    let store = Arc::new(ImageStore::from_config(config)?);
    let mut manager = SerialManager::from_config(config, store.clone());
    manager
        .connect(&port, baud_rate)
        .await
        .with_context(|| format!("failed to open {port}"))?;

    println!("Capturing from {port} at {baud_rate} baud into {}", store.dir().display());
    println!("Press Ctrl-C to stop.");

    tokio::select! {
        () = shutdown_signal() => {}
        () = manager.closed() => warn!("Serial port {} closed", port),
    }

    if let Some(exit) = manager.disconnect().await {
        info!("Capture ended: {}", exit);
    }
    let stats = manager.status().stats;
    println!(
        "Stored {} image(s), rejected {}, abandoned {}",
        stats.images_stored, stats.images_rejected, stats.captures_abandoned
    );
    Ok(())
}

async fn handle_replay(config: &Config, cmd: ReplayCommand) -> anyhow::Result<()> {
    let chunk_size = cmd.chunk_size.unwrap_or(config.serial.chunk_size);
    let source = ScriptedSource::from_file(&cmd.file, chunk_size)
        .await
        .with_context(|| format!("failed to read {}", cmd.file.display()))?;

    let store = Arc::new(ImageStore::from_config(config)?);
    let mut manager = SerialManager::from_config(config, store.clone());
    manager.attach(Box::new(source), 0).await?;
    manager.wait().await;

    let stats = manager.status().stats;

    println!(
        "Replayed {} bytes: {} image(s) stored, {} rejected, {} abandoned",
        stats.bytes_read, stats.images_stored, stats.images_rejected, stats.captures_abandoned
    );
    Ok(())
}

async fn handle_images(config: &Config, cmd: ImagesCommand) -> anyhow::Result<()> {
    let store = ImageStore::from_config(config)?;

    match cmd {
        ImagesCommand::List { json } => {
            let names = store.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if names.is_empty() {
                println!("No images in {}", store.dir().display());
            } else {
                for name in names {
                    println!("{name}");
                }
            }
        }
        ImagesCommand::Recent { limit, json } => {
            let images = store.recent(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&images)?);
            } else {
                for image in images {
                    println!(
                        "{}  {:>9} bytes  {}  {}",
                        image.captured_at.format("%Y-%m-%d %H:%M:%S"),
                        image.size_bytes,
                        image.file_name,
                        image.source.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        ImagesCommand::Stats { json } => {
            let stats = store.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Images:   {}", stats.total_images);
                println!("Bytes:    {}", stats.total_bytes);
                if let Some(oldest) = stats.oldest_capture {
                    println!("Oldest:   {oldest}");
                }
                if let Some(newest) = stats.newest_capture {
                    println!("Newest:   {newest}");
                }
            }
        }
    }
    Ok(())
}

fn handle_show(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Serial]");
    println!("  Port:               {}", config.serial.port);
    println!("  Baud rate:          {}", config.serial.baud_rate);
    println!("  Read timeout (ms):  {}", config.serial.read_timeout_ms);
    println!("  Chunk size:         {}", config.serial.chunk_size);
    println!("  Auto connect:       {}", config.serial.auto_connect);
    println!();
    println!("[Framing]");
    println!("  Start marker:       {}", config.framing.start_marker);
    println!("  End marker:         {}", config.framing.end_marker);
    println!("  Span chunks:        {}", config.framing.span_chunks);
    println!("  Max image bytes:    {}", config.framing.max_image_bytes);
    println!("  Capture timeout (s): {}", config.framing.capture_timeout_secs);
    println!();
    println!("[Storage]");
    println!("  Images dir:         {}", config.images_dir().display());
    println!("  Catalog:            {}", config.catalog_path().display());
    println!("  Validate JPEG:      {}", config.storage.validate_jpeg);
    println!("  Skip duplicates:    {}", config.storage.skip_duplicates);
    println!();
    println!("[Server]");
    println!("  Bind address:       {}", config.server.bind_addr);
    println!("  CORS origins:       {}", config.server.cors_origins.join(", "));
    Ok(())
}

fn handle_validate(file: Option<std::path::PathBuf>) {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path)) {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => println!("Configuration error: {e}"),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
