//! Boot-and-Configure Orchestrator
//!
//! Drives the emulator through a fixed dialogue: wait for boot, wake the
//! shell, run the network script, let networking settle, restart the
//! services, print access instructions, then hand the console to the user.
//!
//! Every wait has its own deadline and nothing is retried. The first
//! failure stops the run, the emulator is terminated exactly once, and the
//! caller gets a [`Failure`] carrying the stage and the error.

mod script;

pub use script::CommandScript;

use futures::future::BoxFuture;
use std::fmt;

use crate::config::Config;
use crate::console::{Console, ConsoleIo, Pattern, Transcript};
use crate::error::{Error, Result};
use crate::passthrough::Passthrough;
use crate::pty::{spawn_pty_process, EmulatorProcess, ProcessControl, PtyStreams, SpawnConfig};

const RULE: &str = "============================================================";

/// Where the run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Launch,
    AwaitBoot,
    ActivateShell,
    Configure,
    Settle,
    RestartServices,
    Handover,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Launch => "launch",
            Stage::AwaitBoot => "await boot",
            Stage::ActivateShell => "activate shell",
            Stage::Configure => "configure network",
            Stage::Settle => "settle",
            Stage::RestartServices => "restart services",
            Stage::Handover => "handover",
        };
        f.write_str(name)
    }
}

/// Who drives the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The orchestrator sends commands and matches output
    Scripted,
    /// Bytes pass straight between the user and the console
    Passthrough,
}

/// A run that stopped before handover
#[derive(Debug)]
pub struct Failure {
    pub stage: Stage,
    pub error: Error,
}

impl Failure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (during {})", self.error, self.stage)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Scripted driver for one emulator process
pub struct Orchestrator<C, P> {
    console: Console<C>,
    process: P,
    config: Config,
    boot_marker: Pattern,
    prompt: Pattern,
    stage: Stage,
    terminated: bool,
}

impl Orchestrator<PtyStreams, EmulatorProcess> {
    /// Start the emulator described by `config` and attach a console session
    pub fn launch(config: Config, mut transcript: Transcript) -> std::result::Result<Self, Failure> {
        let launch_failure = |error: Error| Failure {
            stage: Stage::Launch,
            error,
        };

        let qemu = &config.qemu;
        if !qemu.image.exists() {
            return Err(launch_failure(Error::LaunchFailed {
                command: qemu.binary.clone(),
                reason: format!("disk image '{}' does not exist", qemu.image.display()),
            }));
        }

        transcript.line("Starting QEMU...").map_err(launch_failure)?;
        info!("Launching: {}", qemu.command_line());

        let spawn_config = SpawnConfig {
            terminate_grace: config.console.terminate_grace(),
            ..SpawnConfig::default()
        };
        let (process, streams) =
            spawn_pty_process(&qemu.binary, &qemu.to_args(), &spawn_config)
                .map_err(launch_failure)?;

        let console = Console::new(streams, transcript)
            .with_buffer_limit(config.console.match_buffer_bytes);
        Self::new(console, process, config).map_err(launch_failure)
    }
}

impl<C: ConsoleIo, P: ProcessControl> Orchestrator<C, P> {
    /// Wrap an already attached console and process
    pub fn new(console: Console<C>, process: P, config: Config) -> Result<Self> {
        let boot_marker = Pattern::literal(config.console.boot_marker.clone());
        let prompt = Pattern::regex(&config.console.prompt_pattern)?;
        Ok(Self {
            console,
            process,
            config,
            boot_marker,
            prompt,
            stage: Stage::Launch,
            terminated: false,
        })
    }

    /// Stage the run is in (or failed in)
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn mode(&self) -> Mode {
        Mode::Scripted
    }

    /// Run the scripted part, racing it against `interrupt`.
    ///
    /// On success the console moves to passthrough mode. On any failure,
    /// interrupts included, the emulator has been terminated before this
    /// returns.
    pub async fn run(
        mut self,
        mut interrupt: BoxFuture<'_, ()>,
    ) -> std::result::Result<Passthrough<C, P>, Failure> {
        let outcome = tokio::select! {
            result = self.run_scripted() => result,
            _ = &mut interrupt => Err(Error::UserInterrupted),
        };

        match outcome {
            Ok(()) => Ok(self.handover()),
            Err(error) => {
                let stage = self.stage;
                self.report_failure(&error);
                self.shutdown().await;
                Err(Failure { stage, error })
            }
        }
    }

    /// Stages from boot wait up to the access instructions
    pub async fn run_scripted(&mut self) -> Result<()> {
        self.await_boot().await?;
        self.activate_shell().await?;

        let network = CommandScript::new(self.config.script.network.clone());
        self.configure_network(&network).await?;

        self.settle().await?;

        let services = CommandScript::new(self.config.script.services.clone());
        self.restart_services(&services).await?;

        self.enter_stage(Stage::Handover);
        self.print_access_instructions()
    }

    async fn await_boot(&mut self) -> Result<()> {
        self.enter_stage(Stage::AwaitBoot);
        self.console
            .announce("\nWaiting for boot... (this takes 60-120 seconds)")?;

        let timeout = self.config.console.boot_timeout();
        match self.console.expect(&self.boot_marker, timeout).await {
            Ok(_) => {}
            Err(Error::ConsoleTimeout { pattern, timeout }) => {
                return Err(Error::BootTimeout {
                    marker: pattern,
                    timeout,
                })
            }
            Err(e) => return Err(e),
        }

        self.console.announce("\n✓ Boot complete!")
    }

    async fn activate_shell(&mut self) -> Result<()> {
        self.enter_stage(Stage::ActivateShell);
        tokio::time::sleep(self.config.console.activation_delay()).await;

        self.console.announce("\nActivating console...")?;
        self.console.send_line("").await?;
        self.console
            .expect(&self.prompt, self.config.console.prompt_timeout())
            .await?;

        self.console
            .announce("\n✓ Console active. Configuring network...")
    }

    async fn configure_network(&mut self, script: &CommandScript) -> Result<()> {
        self.enter_stage(Stage::Configure);
        let delay = self.config.console.command_delay();

        for command in script.iter() {
            self.console.announce(&format!("  Running: {}", command))?;
            self.run_command(command).await?;
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }

    /// Blind wait: the network restart prints nothing reliable to match on
    async fn settle(&mut self) -> Result<()> {
        self.enter_stage(Stage::Settle);
        let settle = self.config.console.settle();
        self.console.announce(&format!(
            "\nWaiting for network to restart ({} seconds)...",
            settle.as_secs()
        ))?;
        self.console.idle(settle).await
    }

    async fn restart_services(&mut self, script: &CommandScript) -> Result<()> {
        self.enter_stage(Stage::RestartServices);
        self.console.announce("\nRestarting services...")?;

        for command in script.iter() {
            self.run_command(command).await?;
        }

        Ok(())
    }

    /// Send one command and wait for the prompt to come back
    async fn run_command(&mut self, command: &str) -> Result<()> {
        self.console.send_line(command).await?;
        self.console
            .expect(&self.prompt, self.config.console.prompt_timeout())
            .await?;
        debug!("Prompt returned after '{}'", command);
        Ok(())
    }

    fn print_access_instructions(&mut self) -> Result<()> {
        let qemu = &self.config.qemu;
        let handover = &self.config.handover;

        let mut lines = vec![
            format!("\n{}", RULE),
            "✓ Configuration complete!".to_string(),
            RULE.to_string(),
            String::new(),
            format!("Access LuCI at: http://{}:{}", handover.host, qemu.http_port),
            format!(
                "SSH access: ssh -p {} {}@{}",
                qemu.ssh_port, handover.ssh_user, handover.host
            ),
            String::new(),
        ];
        if handover.interact {
            lines.push("Press Ctrl+A then X to exit QEMU".to_string());
            lines.push(format!(
                "Or {} to detach and stop the VM",
                describe_key(handover.escape_byte)
            ));
            lines.push(String::new());
        }

        for line in lines {
            self.console.announce(&line)?;
        }
        Ok(())
    }

    fn report_failure(&mut self, error: &Error) {
        let message = match error {
            Error::UserInterrupted => "\n\nInterrupted by user".to_string(),
            Error::BootTimeout { .. }
            | Error::ConsoleTimeout { .. }
            | Error::ProcessEndedUnexpectedly { .. } => format!("\n✗ {}", error),
            _ => format!("\n✗ {} failed: {}", self.stage, error),
        };

        if error.exit_code() == 0 {
            info!("Run cancelled during {}", self.stage);
        } else {
            error!("Run failed during {}: {}", self.stage, error);
        }

        let mut result = self.console.announce(&message);
        if error.exit_code() != 0 {
            if let Some(log) = self.console.transcript().log_path() {
                let hint = format!("Check {} for details", log.display());
                result = result.and_then(|_| self.console.announce(&hint));
            }
        }
        if let Err(e) = result {
            warn!("Failed to write failure report: {}", e);
        }
    }

    /// Best-effort termination; runs at most once per orchestrator
    async fn shutdown(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        if let Err(e) = self.process.terminate().await {
            warn!("Failed to stop emulator: {}", e);
        }
    }

    fn enter_stage(&mut self, stage: Stage) {
        info!("Stage: {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Switch from scripted to passthrough mode; the scripted driver is gone
    fn handover(self) -> Passthrough<C, P> {
        info!("Mode: {:?} -> {:?}", Mode::Scripted, Mode::Passthrough);
        Passthrough::new(
            self.console,
            self.process,
            Some(self.config.handover.escape_byte),
        )
    }
}

/// Human name for a control byte, e.g. 0x1d -> "Ctrl+]"
pub fn describe_key(byte: u8) -> String {
    match byte {
        0x01..=0x1a => format!("Ctrl+{}", (b'A' + byte - 1) as char),
        0x1b..=0x1f => format!("Ctrl+{}", (b'[' + byte - 0x1b) as char),
        0x7f => "Del".to_string(),
        b => format!("'{}'", (b as char).escape_default()),
    }
}
