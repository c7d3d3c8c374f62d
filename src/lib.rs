//! openwrt-vm-setup - boot an OpenWrt image under QEMU and configure it
//! over the serial console
//!
//! The tool starts QEMU inside a pseudoterminal and waits for the guest to
//! finish booting. It then wakes a root shell and switches the LAN
//! interface from a static address to DHCP. After restarting networking,
//! SSH and the web UI, it hands the console over to the user.
//!
//! ## Module Organization
//!
//! - [`orchestrator`] - The staged boot-and-configure procedure
//! - [`console`] - Console session: marker waits, line injection, transcript
//! - [`passthrough`] - Interactive handover of the console to the user
//! - [`pty`] - Emulator process in a PTY, async I/O bridge, termination
//! - [`config`] - Configuration model, defaults, validation and loading
//! - [`mod@error`] - Error types, Result alias and exit statuses
//!
//! ## Flow
//!
//! ```text
//! Launch -> AwaitBoot -> ActivateShell -> Configure -> Settle
//!        -> RestartServices -> Handover (passthrough)
//! ```
//!
//! Each wait has its own deadline (180s for boot, 30s for prompts) and is
//! never retried. Any failure terminates the emulator once and maps to exit
//! status 1. A user interrupt also terminates it and exits with 0.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod console;
pub mod error;
pub mod orchestrator;
pub mod passthrough;
pub mod pty;

// Re-exports for core functionality
pub use config::loader::ConfigLoader;
pub use config::Config;
pub use console::{Console, ConsoleIo, Pattern, Transcript};
pub use error::{Error, Result};
pub use orchestrator::{CommandScript, Failure, Mode, Orchestrator, Stage};
pub use passthrough::{HandoverEnd, Passthrough};
pub use pty::{EmulatorProcess, ProcessControl};
