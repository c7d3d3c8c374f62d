//! PTY Process Spawning
//!
//! Starts the emulator inside a pseudoterminal using the portable-pty crate
//! and wires its master side to a pair of I/O threads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtyPair, PtySize,
};
use std::fmt;
use std::io::{Read, Write};
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;

use super::signals;
use super::streams::PtyStreams;
use crate::error::{Error, Result};

/// Lifecycle state of the emulator process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    /// Process has been created but not started
    #[default]
    Created,
    /// Process is currently running
    Running,
    /// Process has terminated
    Terminated,
}

/// Control surface the orchestrator needs over the child process
#[async_trait]
pub trait ProcessControl: Send {
    /// OS process identifier, if known
    fn pid(&self) -> Option<u32>;

    /// Whether the process has exited; reaps it if so
    fn has_exited(&mut self) -> bool;

    /// Stop the process, escalating from SIGTERM to SIGKILL
    async fn terminate(&mut self) -> Result<()>;
}

/// Process spawning configuration
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Terminal size presented to the emulator
    pub size: PtySize,
    /// Grace period between SIGTERM and SIGKILL
    pub terminate_grace: Duration,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            size: PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            },
            terminate_grace: Duration::from_secs(3),
        }
    }
}

/// The emulator child process and the PTY it runs in
pub struct EmulatorProcess {
    /// OS process identifier
    pub pid: Option<u32>,
    /// Current state of the process
    pub state: ProcessState,
    /// When the process was started
    pub start_time: Option<DateTime<Utc>>,
    /// When the process was seen to exit
    pub end_time: Option<DateTime<Utc>>,
    /// Exit code, once the process has terminated
    pub exit_code: Option<u32>,
    /// Executable that was launched
    pub command: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    terminate_grace: Duration,
}

impl fmt::Debug for EmulatorProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatorProcess")
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("start_time", &self.start_time)
            .field("exit_code", &self.exit_code)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl EmulatorProcess {
    /// Resize the terminal the emulator sees
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
    }

    fn mark_terminated(&mut self, exit_code: Option<u32>) {
        if self.state != ProcessState::Terminated {
            self.state = ProcessState::Terminated;
            self.end_time = Some(Utc::now());
            self.exit_code = exit_code;
        }
    }
}

#[async_trait]
impl ProcessControl for EmulatorProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        if self.state == ProcessState::Terminated {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("Emulator exited with code {}", status.exit_code());
                self.mark_terminated(Some(status.exit_code()));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to query emulator status: {}", e);
                false
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }

        info!("Stopping emulator (pid {:?})", self.pid);

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                let child = &mut self.child;
                let mut exit_code = None;
                let result = signals::terminate_gracefully(pid, self.terminate_grace, || {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            exit_code = Some(status.exit_code());
                            true
                        }
                        _ => false,
                    }
                })
                .await;
                self.mark_terminated(exit_code);
                return result;
            }
        }

        self.child.kill()?;
        let exit_code = self.child.try_wait().ok().flatten().map(|s| s.exit_code());
        self.mark_terminated(exit_code);
        Ok(())
    }
}

/// Spawn the emulator inside a new PTY
pub fn spawn_pty_process(
    command: &str,
    args: &[String],
    config: &SpawnConfig,
) -> Result<(EmulatorProcess, PtyStreams)> {
    // Get the native PTY system
    let pty_system = native_pty_system();

    // Create a new PTY pair
    let pair = pty_system
        .openpty(config.size)
        .map_err(|e| Error::PtyCreationFailed {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    let mut cmd_builder = CommandBuilder::new(command);
    cmd_builder.args(args);
    if let Ok(cwd) = std::env::current_dir() {
        cmd_builder.cwd(cwd);
    }

    let PtyPair { master, slave } = pair;

    // Spawn the process
    let child = slave
        .spawn_command(cmd_builder)
        .map_err(|e| Error::LaunchFailed {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    // Only the child keeps the slave side open, so its exit produces EOF
    drop(slave);

    let pid = child.process_id();
    info!("Spawned {} (pid {:?})", command, pid);

    let streams = create_pty_streams(master.as_ref())?;

    let process = EmulatorProcess {
        pid,
        state: ProcessState::Running,
        start_time: Some(Utc::now()),
        end_time: None,
        exit_code: None,
        command: command.to_string(),
        args: args.to_vec(),
        child,
        master,
        terminate_grace: config.terminate_grace,
    };

    Ok((process, streams))
}

/// Create PTY streams from the master side of a PTY
fn create_pty_streams(master: &(dyn MasterPty + Send)) -> Result<PtyStreams> {
    // Bridge blocking PTY I/O to async via channels and a background thread
    let mut master_reader = master
        .try_clone_reader()
        .map_err(|e| Error::PtyReaderCloneFailed {
            reason: e.to_string(),
        })?;
    let mut master_writer = master
        .take_writer()
        .map_err(|e| Error::PtyWriterTakeFailed {
            reason: e.to_string(),
        })?;

    // Channel: PTY output -> async consumer
    let (tx_async_out, rx_async_out) = unbounded_channel::<Vec<u8>>();
    // Channel: async producer (console input) -> PTY writer thread
    let (tx_stdin, rx_stdin) = channel::<Vec<u8>>();

    // Reader thread: read from PTY master and forward to async channel
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut consecutive_errors = 0;
        const MAX_CONSECUTIVE_ERRORS: u32 = 5;

        loop {
            match master_reader.read(&mut buf) {
                Ok(0) => {
                    debug!("PTY read EOF - emulator terminated");
                    break;
                }
                Ok(n) => {
                    consecutive_errors = 0;
                    if tx_async_out.send(buf[..n].to_vec()).is_err() {
                        debug!("PTY read: receiver dropped, stopping reader thread");
                        break;
                    }
                }
                Err(e) => {
                    if e.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }

                    // Linux reports EIO on the master once the slave side is gone
                    if e.raw_os_error() == Some(5) {
                        debug!("PTY read EIO - emulator terminated");
                        break;
                    }

                    if e.kind() == std::io::ErrorKind::WouldBlock {
                        thread::sleep(Duration::from_millis(10));
                        continue;
                    }

                    consecutive_errors += 1;
                    warn!(
                        "PTY read error ({}): {} (attempt {}/{})",
                        e.kind(),
                        e,
                        consecutive_errors,
                        MAX_CONSECUTIVE_ERRORS
                    );

                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!("PTY read: too many consecutive errors, stopping reader thread");
                        break;
                    }

                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
        debug!("PTY reader thread exiting");
    });

    // Writer thread: receive console input and write it to the PTY master
    thread::spawn(move || {
        let mut consecutive_errors = 0;
        const MAX_CONSECUTIVE_ERRORS: u32 = 3;

        while let Ok(data) = rx_stdin.recv() {
            let mut attempts = 0;
            const MAX_ATTEMPTS: u32 = 3;

            loop {
                match master_writer.write_all(&data) {
                    Ok(()) => {
                        consecutive_errors = 0;
                        if let Err(e) = master_writer.flush() {
                            debug!("PTY flush error: {}", e);
                        }
                        break;
                    }
                    Err(e) => {
                        attempts += 1;

                        if e.kind() == std::io::ErrorKind::Interrupted {
                            continue;
                        }

                        if e.kind() == std::io::ErrorKind::WouldBlock && attempts < MAX_ATTEMPTS {
                            thread::sleep(Duration::from_millis(10));
                            continue;
                        }

                        consecutive_errors += 1;
                        warn!(
                            "PTY write error ({}): {} (consecutive errors: {}/{})",
                            e.kind(),
                            e,
                            consecutive_errors,
                            MAX_CONSECUTIVE_ERRORS
                        );

                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            error!("PTY write: too many consecutive errors, stopping writer thread");
                            return;
                        }

                        break;
                    }
                }
            }
        }
        debug!("PTY writer thread exiting");
    });

    Ok(PtyStreams::from_channels(rx_async_out, tx_stdin))
}
