//! Console transcript
//!
//! Everything the emulator prints is mirrored here, interleaved with the
//! progress and failure lines written by the orchestrator. The default sink
//! is the user's terminal; a log file can be added alongside it.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Fan-out writer for console output and status lines
pub struct Transcript {
    sinks: Vec<Box<dyn Write + Send>>,
    log_path: Option<PathBuf>,
}

impl Transcript {
    /// Transcript that writes to standard output
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    /// Transcript over an arbitrary writer
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sinks: vec![Box::new(writer)],
            log_path: None,
        }
    }

    /// Transcript that discards everything
    pub fn sink() -> Self {
        Self {
            sinks: Vec::new(),
            log_path: None,
        }
    }

    /// Also append everything to `path`, creating it (and its parent) if needed
    pub fn with_log_file(mut self, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "\n--- session started {} ---", Utc::now().to_rfc3339())?;
        self.sinks.push(Box::new(file));
        self.log_path = Some(path.to_path_buf());
        Ok(self)
    }

    /// Log file receiving a copy of the transcript, if any
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Mirror raw console bytes, unmodified
    pub fn mirror(&mut self, data: &[u8]) -> Result<()> {
        for sink in &mut self.sinks {
            sink.write_all(data)?;
            sink.flush()?;
        }
        Ok(())
    }

    /// Write an orchestrator status line
    pub fn line(&mut self, text: &str) -> Result<()> {
        self.mirror(format!("{}\n", text).as_bytes())
    }
}
