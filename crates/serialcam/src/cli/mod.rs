//! Command-line interface for serialcam.
//!
//! This module provides the CLI structure for the `serialcam` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{CaptureCommand, ConfigCommand, ImagesCommand, ReplayCommand, ServeCommand};

/// serialcam - Receive framed JPEG images over a serial link
///
/// Reads marker-delimited images from a serial port, stores them as files
/// and serves them over HTTP.
#[derive(Debug, Parser)]
#[command(name = "serialcam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeCommand),

    /// Read images from a serial port until interrupted
    Capture(CaptureCommand),

    /// Extract images from a recorded byte stream
    Replay(ReplayCommand),

    /// Inspect stored images
    #[command(subcommand)]
    Images(ImagesCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Verbosity;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "serialcam");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["serialcam", "-q", "serve"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["serialcam", "serve"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["serialcam", "-v", "serve"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["serialcam", "-vv", "serve"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_serve() {
        let cli = parse(&["serialcam", "serve", "--bind", "127.0.0.1:9000", "--connect"]);
        match cli.command {
            Command::Serve(cmd) => {
                assert_eq!(cmd.bind.as_deref(), Some("127.0.0.1:9000"));
                assert!(cmd.connect);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_capture() {
        let cli = parse(&["serialcam", "capture", "-p", "COM4", "-b", "921600"]);
        match cli.command {
            Command::Capture(cmd) => {
                assert_eq!(cmd.port.as_deref(), Some("COM4"));
                assert_eq!(cmd.baud, Some(921_600));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_replay() {
        let cli = parse(&["serialcam", "replay", "dump.bin", "--chunk-size", "64"]);
        match cli.command {
            Command::Replay(cmd) => {
                assert_eq!(cmd.file, PathBuf::from("dump.bin"));
                assert_eq!(cmd.chunk_size, Some(64));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_images() {
        let cli = parse(&["serialcam", "images", "recent", "--limit", "3"]);
        assert!(matches!(
            cli.command,
            Command::Images(ImagesCommand::Recent { limit: 3, json: false })
        ));

        let cli = parse(&["serialcam", "images", "stats", "--json"]);
        assert!(matches!(
            cli.command,
            Command::Images(ImagesCommand::Stats { json: true })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["serialcam", "-c", "/custom/config.toml", "config", "path"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Path)));
    }

    #[test]
    fn test_replay_requires_file() {
        assert!(Cli::try_parse_from(["serialcam", "replay"]).is_err());
    }
}
