//! Test Utilities and Mocks
//!
//! A scripted stand-in for the emulator console, a fake process that counts
//! termination attempts, and a shared buffer for capturing the transcript.

#![allow(dead_code)]

use async_trait::async_trait;
use openwrt_vm_setup::config::Config;
use openwrt_vm_setup::error::Result;
use openwrt_vm_setup::{Console, ConsoleIo, Orchestrator, ProcessControl, Transcript};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

pub const BOOT_MARKER: &str = "Please press Enter to activate this console.";
pub const PROMPT: &str = "root@OpenWrt:/# ";

/// Line the stub received, with the (virtual) time it arrived
#[derive(Debug, Clone, PartialEq)]
pub struct SentLine {
    pub text: String,
    pub at: Instant,
}

/// What the stub does when a complete line arrives
#[derive(Debug, Clone)]
enum Reaction {
    /// Echo the line and print a prompt after `delay`
    Prompt { delay: Duration },
    /// Print nothing
    Silent,
    /// End the stream
    Close,
}

/// Everything the stub received, readable after the orchestrator took the stub
#[derive(Debug, Clone, Default)]
pub struct StubLog {
    lines: Arc<Mutex<Vec<SentLine>>>,
    raw: Arc<Mutex<Vec<u8>>>,
}

impl StubLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .map(|l| l.text.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<SentLine> {
        self.lines.lock().unwrap().clone()
    }

    pub fn raw(&self) -> Vec<u8> {
        self.raw.lock().unwrap().clone()
    }
}

/// Scripted console: timed output plus per-line reactions
pub struct StubConsole {
    pending: VecDeque<(Instant, Vec<u8>)>,
    close_at: Option<Instant>,
    default_reaction: Reaction,
    overrides: Vec<(String, Reaction)>,
    partial: Vec<u8>,
    log: StubLog,
}

impl StubConsole {
    /// A console that prints nothing and never answers
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            close_at: None,
            default_reaction: Reaction::Silent,
            overrides: Vec::new(),
            partial: Vec::new(),
            log: StubLog::default(),
        }
    }

    /// A console that boots after `boot_after` and answers every line with a prompt
    pub fn booting(boot_after: Duration) -> Self {
        Self::new()
            .emit_after(Duration::ZERO, "SeaBIOS (version 1.16.3)\r\n")
            .emit_after(
                boot_after,
                &format!("[   10.000000] br-lan: link up\r\n{}\r\n", BOOT_MARKER),
            )
            .prompt_after_each_line(Duration::ZERO)
    }

    /// Print `text` once `delay` has passed since the stub was built
    pub fn emit_after(mut self, delay: Duration, text: &str) -> Self {
        self.schedule(Instant::now() + delay, text.as_bytes().to_vec());
        self
    }

    /// End the stream once `delay` has passed
    pub fn close_after(mut self, delay: Duration) -> Self {
        self.close_at = Some(Instant::now() + delay);
        self
    }

    /// Answer every line with a prompt after `delay`
    pub fn prompt_after_each_line(mut self, delay: Duration) -> Self {
        self.default_reaction = Reaction::Prompt { delay };
        self
    }

    /// Never answer `line`
    pub fn ignore_line(mut self, line: &str) -> Self {
        self.overrides.push((line.to_string(), Reaction::Silent));
        self
    }

    /// End the stream when `line` arrives
    pub fn close_on_line(mut self, line: &str) -> Self {
        self.overrides.push((line.to_string(), Reaction::Close));
        self
    }

    pub fn log(&self) -> StubLog {
        self.log.clone()
    }

    fn schedule(&mut self, at: Instant, bytes: Vec<u8>) {
        let index = self
            .pending
            .iter()
            .position(|(when, _)| *when > at)
            .unwrap_or(self.pending.len());
        self.pending.insert(index, (at, bytes));
    }

    fn react(&mut self, line: String) {
        let now = Instant::now();
        self.log.lines.lock().unwrap().push(SentLine {
            text: line.clone(),
            at: now,
        });

        let reaction = self
            .overrides
            .iter()
            .find(|(text, _)| *text == line)
            .map(|(_, reaction)| reaction.clone())
            .unwrap_or_else(|| self.default_reaction.clone());

        match reaction {
            Reaction::Prompt { delay } => {
                self.schedule(now + delay, format!("{}\r\n{}", line, PROMPT).into_bytes())
            }
            Reaction::Silent => {}
            Reaction::Close => {
                self.pending.clear();
                self.close_at = Some(now);
            }
        }
    }
}

#[async_trait]
impl ConsoleIo for StubConsole {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        // Deadlines are only read here and entries are popped after the
        // sleep, so a cancelled read loses nothing.
        let next = self.pending.front().map(|(at, _)| *at);
        match (next, self.close_at) {
            (Some(at), close) if close.map_or(true, |c| at < c) => {
                sleep_until(at).await;
                Ok(self.pending.pop_front().map(|(_, bytes)| bytes))
            }
            (_, Some(close)) => {
                sleep_until(close).await;
                Ok(None)
            }
            (_, None) => std::future::pending().await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.log.raw.lock().unwrap().extend_from_slice(data);
        for byte in data {
            if *byte == b'\r' {
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                self.react(line);
            } else {
                self.partial.push(*byte);
            }
        }
        Ok(())
    }
}

/// Process double that records termination attempts
#[derive(Debug, Clone, Default)]
pub struct FakeProcess {
    pub terminate_calls: Arc<AtomicUsize>,
    pub exited: Arc<AtomicBool>,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminations(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessControl for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.exited.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Cloneable in-memory writer
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Orchestrator over a stub console, plus handles for inspecting it afterwards
pub struct Harness {
    pub orchestrator: Orchestrator<StubConsole, FakeProcess>,
    pub log: StubLog,
    pub process: FakeProcess,
    pub transcript: SharedBuffer,
}

pub fn harness(stub: StubConsole, config: Config) -> Harness {
    let log = stub.log();
    let process = FakeProcess::new();
    let transcript = SharedBuffer::default();
    let console = Console::new(stub, Transcript::from_writer(transcript.clone()));
    let orchestrator = Orchestrator::new(console, process.clone(), config).unwrap();
    Harness {
        orchestrator,
        log,
        process,
        transcript,
    }
}

/// The seven commands in their required order
pub fn expected_commands(config: &Config) -> Vec<String> {
    config
        .script
        .network
        .iter()
        .chain(config.script.services.iter())
        .cloned()
        .collect()
}
