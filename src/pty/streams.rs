//! PTY Streams
//!
//! Provides async-friendly interfaces for PTY I/O by bridging blocking
//! PTY master reads/writes to async code using channels.

use async_trait::async_trait;
use std::sync::mpsc::Sender as StdSender;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::console::ConsoleIo;
use crate::error::{Error, Result};

/// PTY I/O streams wrapper
pub struct PtyStreams {
    /// Receiver for output bytes from the PTY (console output)
    output_rx: UnboundedReceiver<Vec<u8>>,
    /// Sender for input bytes to the PTY (console input)
    input_tx: StdSender<Vec<u8>>,
}

impl PtyStreams {
    /// Create new PTY streams from channels
    pub fn from_channels(
        output_rx: UnboundedReceiver<Vec<u8>>,
        input_tx: StdSender<Vec<u8>>,
    ) -> Self {
        Self {
            output_rx,
            input_tx,
        }
    }

    /// Queue data for the PTY writer thread
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|e| Error::PtyInputSendFailed {
                reason: e.to_string(),
            })
    }

    /// Next chunk of PTY output; `None` once the reader thread has stopped
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        self.output_rx.recv().await
    }
}

#[async_trait]
impl ConsoleIo for PtyStreams {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.read().await)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.write(data)
    }
}
