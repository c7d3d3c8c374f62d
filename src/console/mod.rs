//! Console Session
//!
//! Line-oriented dialogue with the emulator's serial console: wait for a
//! marker with a deadline, inject a line, keep mirroring output. The
//! session is generic over its transport so the orchestrator can be driven
//! by a PTY in production and by a scripted stub in tests.

pub mod pattern;
pub mod transcript;

pub use pattern::Pattern;
pub use transcript::Transcript;

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::error::{Error, Result};

/// Default cap on buffered, unmatched console output
pub const DEFAULT_MATCH_BUFFER: usize = 64 * 1024;

/// Byte transport underneath a console session
///
/// `read_chunk` must be cancel safe: the session races it against deadlines.
#[async_trait]
pub trait ConsoleIo: Send {
    /// Next chunk of console output; `None` once the stream has ended
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Send bytes to the console
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// Result of a successful wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Output received before the marker
    pub before: String,
    /// The marker text as it appeared
    pub matched: String,
}

/// A console session over one transport
pub struct Console<C> {
    io: C,
    transcript: Transcript,
    buffer: Vec<u8>,
    max_buffer: usize,
    closed: bool,
}

impl<C: ConsoleIo> Console<C> {
    /// Create a session mirroring into `transcript`
    pub fn new(io: C, transcript: Transcript) -> Self {
        Self {
            io,
            transcript,
            buffer: Vec::new(),
            max_buffer: DEFAULT_MATCH_BUFFER,
            closed: false,
        }
    }

    /// Set the cap on buffered, unmatched output
    pub fn with_buffer_limit(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer.max(1);
        self
    }

    /// Block until `pattern` appears, the deadline passes, or the stream ends.
    ///
    /// The deadline is fixed when the call starts. On success the buffer is
    /// consumed up to the end of the match.
    pub async fn expect(&mut self, pattern: &Pattern, timeout: Duration) -> Result<Match> {
        let deadline = Instant::now() + timeout;
        trace!("Waiting up to {:?} for '{}'", timeout, pattern);

        loop {
            if let Some(found) = self.take_match(pattern) {
                return Ok(found);
            }

            if self.closed {
                return Err(Error::ProcessEndedUnexpectedly {
                    context: format!("while waiting for '{}'", pattern),
                });
            }

            match timeout_at(deadline, self.io.read_chunk()).await {
                Err(_) => {
                    return Err(Error::ConsoleTimeout {
                        pattern: pattern.to_string(),
                        timeout,
                    })
                }
                Ok(chunk) => self.accept(chunk?)?,
            }
        }
    }

    /// Let `duration` pass without looking for anything, still mirroring output
    pub async fn idle(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;

        while !self.closed {
            match timeout_at(deadline, self.io.read_chunk()).await {
                Err(_) => return Ok(()),
                Ok(chunk) => self.accept(chunk?)?,
            }
        }

        sleep_until(deadline).await;
        Ok(())
    }

    /// Send `line` followed by Enter
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        if self.closed {
            return Err(Error::ProcessEndedUnexpectedly {
                context: format!("before sending '{}'", line),
            });
        }
        debug!("Sending console line: {:?}", line);
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\r');
        self.io.write_all(&data).await
    }

    /// Send raw bytes
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.io.write_all(data).await
    }

    /// Read the next chunk without matching, mirroring it; `None` at end of stream
    pub async fn pump(&mut self) -> Result<Option<usize>> {
        if self.closed {
            return Ok(None);
        }
        match self.io.read_chunk().await? {
            Some(chunk) => {
                self.transcript.mirror(&chunk)?;
                Ok(Some(chunk.len()))
            }
            None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    /// Write an orchestrator status line into the transcript
    pub fn announce(&mut self, text: &str) -> Result<()> {
        self.transcript.line(text)
    }

    /// Whether the console stream has ended
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Output received but not yet consumed by a match
    pub fn pending_output(&self) -> &[u8] {
        &self.buffer
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    fn accept(&mut self, chunk: Option<Vec<u8>>) -> Result<()> {
        match chunk {
            Some(bytes) => {
                // Mirror first so the terminal sees exactly what arrived
                self.transcript.mirror(&bytes)?;
                self.buffer.extend_from_slice(&bytes);
                if self.buffer.len() > self.max_buffer {
                    let excess = self.buffer.len() - self.max_buffer;
                    self.buffer.drain(..excess);
                }
            }
            None => {
                debug!("Console stream reached end of file");
                self.closed = true;
            }
        }
        Ok(())
    }

    fn take_match(&mut self, pattern: &Pattern) -> Option<Match> {
        let (start, end) = pattern.find(&self.buffer)?;
        let found = Match {
            before: String::from_utf8_lossy(&self.buffer[..start]).into_owned(),
            matched: String::from_utf8_lossy(&self.buffer[start..end]).into_owned(),
        };
        self.buffer.drain(..end);
        Some(found)
    }
}
