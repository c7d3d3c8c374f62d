//! Pseudoterminal (PTY) Management
//!
//! Runs the emulator inside a pseudoterminal so its serial console behaves
//! like a real terminal, bridges the blocking PTY I/O to async code, and
//! stops the emulator when the run is over.

pub mod process;
pub mod signals;
pub mod streams;

// Re-exports for convenience
pub use process::{spawn_pty_process, EmulatorProcess, ProcessControl, ProcessState, SpawnConfig};
pub use signals::{send_signal, terminate_gracefully, Signal};
pub use streams::PtyStreams;
