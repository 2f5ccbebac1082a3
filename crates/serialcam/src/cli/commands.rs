//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides `server.bind_addr`)
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Connect to the configured serial port at startup
    #[arg(long)]
    pub connect: bool,
}

/// Capture command arguments.
#[derive(Debug, Args)]
pub struct CaptureCommand {
    /// Serial port to read (overrides `serial.port`)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate (overrides `serial.baud_rate`)
    #[arg(short, long)]
    pub baud: Option<u32>,
}

/// Replay command arguments.
#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// Recorded byte stream to feed through the reassembler
    pub file: PathBuf,

    /// Bytes per simulated read (overrides `serial.chunk_size`)
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

/// Image inspection commands.
#[derive(Debug, Subcommand)]
pub enum ImagesCommand {
    /// List image files in the images directory
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the most recently catalogued images
    Recent {
        /// Maximum number of images
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show catalog statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
