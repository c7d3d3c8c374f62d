//! Interactive handover
//!
//! Once configuration is done the console belongs to the user: local input
//! goes to the emulator and emulator output goes to the terminal, with no
//! pattern matching in between. The session ends when the emulator exits,
//! the input closes, the escape key is pressed or the run is interrupted.

use crossterm::terminal;
use futures::future::BoxFuture;
use std::io::IsTerminal;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::console::{Console, ConsoleIo};
use crate::error::{Error, Result};
use crate::orchestrator::Mode;
use crate::pty::ProcessControl;

/// Why an interactive session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverEnd {
    /// The emulator closed the console (it exited)
    ConsoleClosed,
    /// Local input reached end of file
    InputClosed,
    /// The user pressed the escape key
    Escaped,
    /// The run was interrupted by a signal
    Interrupted,
}

/// RAII guard that restores the terminal to its original mode on drop.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enter raw terminal mode.
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().map_err(Error::Io)?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Console in passthrough mode, together with the process behind it
pub struct Passthrough<C, P> {
    console: Console<C>,
    process: P,
    escape: Option<u8>,
}

impl<C: ConsoleIo, P: ProcessControl> Passthrough<C, P> {
    pub(crate) fn new(console: Console<C>, process: P, escape: Option<u8>) -> Self {
        Self {
            console,
            process,
            escape,
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::Passthrough
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    /// Attach the local terminal (raw mode when stdin is a TTY)
    pub async fn attach_terminal(&mut self, interrupt: BoxFuture<'_, ()>) -> Result<HandoverEnd> {
        let _guard = if std::io::stdin().is_terminal() {
            Some(RawModeGuard::enter()?)
        } else {
            None
        };
        self.interact(tokio::io::stdin(), interrupt).await
    }

    /// Pass bytes both ways until one side ends
    pub async fn interact<R>(
        &mut self,
        mut input: R,
        mut interrupt: BoxFuture<'_, ()>,
    ) -> Result<HandoverEnd>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                pumped = self.console.pump() => {
                    if pumped?.is_none() {
                        info!("Console closed during handover");
                        return Ok(HandoverEnd::ConsoleClosed);
                    }
                }
                read = input.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        info!("Input closed during handover");
                        return Ok(HandoverEnd::InputClosed);
                    }

                    let data = &buf[..n];
                    let escape_at = self
                        .escape
                        .and_then(|escape| data.iter().position(|b| *b == escape));

                    match escape_at {
                        Some(pos) => {
                            if pos > 0 {
                                self.console.send(&data[..pos]).await?;
                            }
                            info!("Escape key pressed, leaving handover");
                            return Ok(HandoverEnd::Escaped);
                        }
                        None => self.console.send(data).await?,
                    }
                }
                _ = &mut interrupt => {
                    return Ok(HandoverEnd::Interrupted);
                }
            }
        }
    }

    /// Stop the emulator if it is still running
    pub async fn finish(mut self) -> Result<()> {
        if self.process.has_exited() {
            return Ok(());
        }
        self.process.terminate().await
    }
}
