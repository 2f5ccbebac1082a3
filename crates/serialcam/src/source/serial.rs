//! Serial-port byte source.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::info;

use crate::error::{Error, Result};

use super::ByteSource;

/// A serial port read with a per-read timeout.
///
/// Reads are driven by port readiness; the timeout only bounds how long one
/// read waits before returning an empty chunk.
pub struct SerialSource {
    port: String,
    baud_rate: u32,
    stream: SerialStream,
    read_timeout: Duration,
    buf: Vec<u8>,
}

impl SerialSource {
    /// Open `port` at `baud_rate`, 8N1, no flow control.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the port cannot be opened or
    /// configured.
    pub fn open(
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
        chunk_size: usize,
    ) -> Result<Self> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open_native_async()
            .map_err(|err| Error::source_unavailable(port, err.to_string()))?;

        info!("Opened serial port {} at {} baud", port, baud_rate);
        Ok(Self {
            port: port.to_string(),
            baud_rate,
            stream,
            read_timeout,
            buf: vec![0; chunk_size.max(1)],
        })
    }
}

impl std::fmt::Debug for SerialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSource")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ByteSource for SerialSource {
    fn name(&self) -> &str {
        &self.port
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let read = tokio::time::timeout(self.read_timeout, self.stream.read(&mut self.buf)).await;

        match read {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(Error::source_closed(&self.port)),
            Ok(Ok(n)) => Ok(self.buf[..n].to_vec()),
            Ok(Err(err)) if err.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Ok(Err(source)) => Err(Error::SourceRead {
                name: self.port.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_is_unavailable() {
        let result = SerialSource::open(
            "/dev/serialcam-does-not-exist",
            115_200,
            Duration::from_millis(100),
            64,
        );
        match result {
            Err(Error::SourceUnavailable { port, .. }) => {
                assert_eq!(port, "/dev/serialcam-does-not-exist");
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }
}
