//! Newline-delimited JSON channel
//!
//! Both ends of the anchor control connection speak one JSON document per
//! line. The channel owns the two halves of the stream and can be closed
//! any number of times.

use crate::error::{ConfluxError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace, warn};

/// Longest line accepted from the peer, newline included
pub const MAX_LINE_BYTES: usize = 1 << 20;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// JSON-lines channel over any byte stream
pub struct LineChannel {
    reader: Option<BufReader<BoxedReader>>,
    writer: Option<BoxedWriter>,
    line: String,
}

impl LineChannel {
    /// Wrap a reader/writer pair
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Some(BufReader::new(Box::new(reader) as BoxedReader)),
            writer: Some(Box::new(writer) as BoxedWriter),
            line: String::new(),
        }
    }

    /// Whether the channel has been closed (locally or by the peer)
    pub fn is_closed(&self) -> bool {
        self.writer.is_none() || self.reader.is_none()
    }

    /// Write one message
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut payload = serde_json::to_vec(message)?;
        payload.push(b'\n');

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ConfluxError::TransportUnavailable("channel is closed".to_string()))?;

        let written = async {
            writer.write_all(&payload).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            self.close().await;
            return Err(ConfluxError::TransportUnavailable(format!(
                "Failed to write to channel: {}",
                e
            )));
        }

        trace!("Sent {} bytes", payload.len());
        Ok(())
    }

    /// Read the next message; `None` once the peer has closed the stream
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| ConfluxError::TransportUnavailable("channel is closed".to_string()))?;

            self.line.clear();
            let mut limited = (&mut *reader).take(MAX_LINE_BYTES as u64 + 1);
            match limited.read_line(&mut self.line).await {
                Ok(n) if n > MAX_LINE_BYTES => {
                    // The rest of the line is still buffered; the stream cannot resync
                    warn!("Peer sent a line longer than {} bytes", MAX_LINE_BYTES);
                    self.close().await;
                    return Err(ConfluxError::Serialization(format!(
                        "Message exceeds {} bytes",
                        MAX_LINE_BYTES
                    )));
                }
                Ok(0) => {
                    debug!("Peer closed the channel");
                    self.close().await;
                    return Ok(None);
                }
                Ok(_) => {
                    let message = self.line.trim();
                    if message.is_empty() {
                        continue;
                    }
                    trace!("Received: {}", message);
                    return serde_json::from_str(message).map(Some).map_err(|e| {
                        ConfluxError::Serialization(format!("Malformed message: {}", e))
                    });
                }
                Err(e) => {
                    self.close().await;
                    return Err(ConfluxError::TransportUnavailable(format!(
                        "Failed to read from channel: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Send a request and wait for exactly one reply
    pub async fn request<Req, Resp>(&mut self, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.send(request).await?;
        self.recv().await?.ok_or_else(|| {
            ConfluxError::TransportUnavailable("peer closed the channel before replying".to_string())
        })
    }

    /// Shut down the write half and drop both halves; safe to call repeatedly
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Ignoring error while closing channel: {}", e);
            }
        }
        self.reader = None;
    }
}
