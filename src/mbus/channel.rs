//! # Byte Channel
//!
//! The transaction engine talks to the bus through [`ByteChannel`], a duplex
//! byte pipe with a bounded read. Opening a serial device and setting its baud
//! rate happens outside this crate; any tokio stream (a `tokio_serial`
//! port, a TCP connection to a serial gateway, an in-memory duplex) can be
//! wrapped in a [`StreamChannel`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::MBusError;

/// Duplex byte channel to an M-Bus segment.
#[async_trait]
pub trait ByteChannel: Send {
    /// Writes all bytes to the bus.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), MBusError>;

    /// Reads at most `max_bytes`. Returns an empty buffer if nothing arrived
    /// within `timeout`.
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, MBusError>;

    /// Reads and discards until the line stays quiet for `quiet`. Returns the
    /// number of bytes thrown away.
    async fn drain(&mut self, quiet: Duration) -> Result<usize, MBusError> {
        let mut discarded = 0;
        loop {
            let chunk = self.read(crate::constants::MBUS_READ_CHUNK, quiet).await?;
            if chunk.is_empty() {
                return Ok(discarded);
            }
            discarded += chunk.len();
        }
    }
}

/// [`ByteChannel`] over any tokio byte stream.
#[derive(Debug)]
pub struct StreamChannel<S> {
    stream: S,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S> ByteChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, wait: Duration) -> Result<Vec<u8>, MBusError> {
        let mut buf = vec![0u8; max_bytes];
        match timeout(wait, self.stream.read(&mut buf)).await {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(MBusError::ChannelError("stream closed".into())),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }
}
