//! `serialcam` - Receive framed JPEG images over a serial link
//!
//! A device streams images as raw bytes wrapped in text start and end
//! markers. This library reassembles those frames from arbitrarily chunked
//! reads, stores each completed image as a timestamped file with a `SQLite`
//! catalog entry, and exposes the results over HTTP.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod framing;
pub mod logging;
pub mod receiver;
pub mod source;
pub mod storage;
pub mod web;

pub use config::Config;
pub use error::{Error, Result};
pub use framing::{CaptureState, FrameReassembler, Markers};
pub use logging::init_logging;
pub use receiver::{ReceiverExit, SerialManager, SerialStatus};
pub use source::{ByteSource, ScriptedSource, SerialSource};
pub use storage::{ImageSink, ImageStore, StoredImage};
