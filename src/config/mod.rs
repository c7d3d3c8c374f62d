//! Configuration management for openwrt-vm-setup
//!
//! Holds the emulator invocation, the console markers and stage timeouts,
//! the command script and the handover settings. Every section defaults to
//! the stock OpenWrt-under-QEMU setup, so an empty file (or no file at all)
//! reproduces the fixed behaviour.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Emulator invocation
    pub qemu: QemuConfig,

    /// Console markers and stage timeouts
    pub console: ConsoleConfig,

    /// Commands sent to the guest shell
    pub script: ScriptConfig,

    /// Access instructions and interactive handover
    pub handover: HandoverConfig,
}

/// Emulator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QemuConfig {
    /// Emulator executable
    pub binary: String,

    /// Machine type (`-M`)
    pub machine: String,

    /// Guest memory in MiB (`-m`)
    pub memory_mb: u32,

    /// Guest CPU count (`-smp`)
    pub smp: u32,

    /// Disk image path
    pub image: PathBuf,

    /// Disk image format
    pub image_format: String,

    /// Disk transport (`if=`)
    pub drive_interface: String,

    /// Emulated NIC model
    pub nic_model: String,

    /// Identifier tying the NIC to the user-mode backend
    pub netdev_id: String,

    /// Host address the forwarded ports bind to
    pub host_address: String,

    /// Host port forwarded to the guest web UI
    pub http_port: u16,

    /// Guest web UI port
    pub guest_http_port: u16,

    /// Host port forwarded to the guest SSH daemon
    pub ssh_port: u16,

    /// Guest SSH port
    pub guest_ssh_port: u16,

    /// Run without a graphical display
    pub nographic: bool,

    /// Appended verbatim after the generated arguments
    pub extra_args: Vec<String>,
}

impl Default for QemuConfig {
    fn default() -> Self {
        Self {
            binary: "qemu-system-x86_64".to_string(),
            machine: "q35".to_string(),
            memory_mb: 512,
            smp: 2,
            image: PathBuf::from("vm/openwrt.img"),
            image_format: "raw".to_string(),
            drive_interface: "virtio".to_string(),
            nic_model: "e1000".to_string(),
            netdev_id: "net0".to_string(),
            host_address: "127.0.0.1".to_string(),
            http_port: 8080,
            guest_http_port: 80,
            ssh_port: 2222,
            guest_ssh_port: 22,
            nographic: true,
            extra_args: Vec::new(),
        }
    }
}

impl QemuConfig {
    /// Build the emulator argument vector (without the executable)
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            self.machine.clone(),
            "-m".to_string(),
            self.memory_mb.to_string(),
            "-smp".to_string(),
            self.smp.to_string(),
            "-drive".to_string(),
            format!(
                "file={},format={},if={}",
                self.image.display(),
                self.image_format,
                self.drive_interface
            ),
            "-device".to_string(),
            format!("{},netdev={}", self.nic_model, self.netdev_id),
            "-netdev".to_string(),
            format!(
                "user,id={},hostfwd=tcp:{}:{}-:{},hostfwd=tcp:{}:{}-:{}",
                self.netdev_id,
                self.host_address,
                self.http_port,
                self.guest_http_port,
                self.host_address,
                self.ssh_port,
                self.guest_ssh_port
            ),
        ];

        if self.nographic {
            args.push("-nographic".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Full command line, for display
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.binary.clone()];
        parts.extend(self.to_args());
        parts.join(" ")
    }
}

/// Console markers and stage timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Literal text printed by the guest once boot has finished
    pub boot_marker: String,

    /// Regex matching the root shell prompt
    pub prompt_pattern: String,

    /// Bound on the boot wait, in seconds
    pub boot_timeout_secs: u64,

    /// Bound on every prompt wait after boot, in seconds
    pub prompt_timeout_secs: u64,

    /// Pause between the boot marker and the activating empty line
    pub activation_delay_secs: u64,

    /// Pause after each network script command
    pub command_delay_secs: u64,

    /// Blind wait after the network script before restarting services
    pub settle_secs: u64,

    /// Upper bound on buffered, not yet matched console output
    pub match_buffer_bytes: usize,

    /// Grace period between SIGTERM and SIGKILL when stopping the emulator
    pub terminate_grace_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            boot_marker: "Please press Enter to activate this console.".to_string(),
            prompt_pattern: r"root@.*:/#".to_string(),
            boot_timeout_secs: 180,
            prompt_timeout_secs: 30,
            activation_delay_secs: 2,
            command_delay_secs: 1,
            settle_secs: 15,
            match_buffer_bytes: 64 * 1024,
            terminate_grace_ms: 3000,
        }
    }
}

impl ConsoleConfig {
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn activation_delay(&self) -> Duration {
        Duration::from_secs(self.activation_delay_secs)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_secs(self.command_delay_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Commands sent to the guest shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Switches the LAN to DHCP and restarts networking
    pub network: Vec<String>,

    /// Restarts the services that bind to the LAN address
    pub services: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            network: vec![
                "uci set network.lan.proto='dhcp'".to_string(),
                "uci delete network.lan.ipaddr".to_string(),
                "uci delete network.lan.netmask".to_string(),
                "uci commit network".to_string(),
                "/etc/init.d/network restart".to_string(),
            ],
            services: vec![
                "/etc/init.d/dropbear restart".to_string(),
                "/etc/init.d/uhttpd restart".to_string(),
            ],
        }
    }
}

/// Access instructions and interactive handover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoverConfig {
    /// Host name shown in the access instructions
    pub host: String,

    /// User shown in the SSH instruction
    pub ssh_user: String,

    /// Hand the console to the user once configuration is done
    pub interact: bool,

    /// Byte that detaches from the console during handover (Ctrl+] by default)
    pub escape_byte: u8,
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            ssh_user: "root".to_string(),
            interact: true,
            escape_byte: 0x1d,
        }
    }
}

impl Config {
    /// Check the configuration for values that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        let qemu = &self.qemu;
        if qemu.binary.trim().is_empty() {
            return Err(ConfigError::EmptyField("qemu.binary"));
        }
        if qemu.memory_mb == 0 {
            return Err(ConfigError::ZeroValue("qemu.memory_mb"));
        }
        if qemu.smp == 0 {
            return Err(ConfigError::ZeroValue("qemu.smp"));
        }
        if qemu.image.as_os_str().is_empty() {
            return Err(ConfigError::EmptyField("qemu.image"));
        }
        for (field, port) in [
            ("qemu.http_port", qemu.http_port),
            ("qemu.guest_http_port", qemu.guest_http_port),
            ("qemu.ssh_port", qemu.ssh_port),
            ("qemu.guest_ssh_port", qemu.guest_ssh_port),
        ] {
            if port == 0 {
                return Err(ConfigError::InvalidPort(field));
            }
        }
        if qemu.http_port == qemu.ssh_port {
            return Err(ConfigError::PortConflict(qemu.http_port));
        }

        let console = &self.console;
        if console.boot_marker.is_empty() {
            return Err(ConfigError::EmptyField("console.boot_marker"));
        }
        if console.prompt_pattern.is_empty() {
            return Err(ConfigError::EmptyField("console.prompt_pattern"));
        }
        regex::bytes::Regex::new(&console.prompt_pattern).map_err(|e| {
            ConfigError::InvalidPromptPattern {
                pattern: console.prompt_pattern.clone(),
                reason: e.to_string(),
            }
        })?;
        if console.boot_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("console.boot_timeout_secs"));
        }
        if console.prompt_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("console.prompt_timeout_secs"));
        }
        if console.match_buffer_bytes < console.boot_marker.len() {
            return Err(ConfigError::BufferTooSmall(console.match_buffer_bytes));
        }

        if self.script.network.is_empty() {
            return Err(ConfigError::EmptyScript);
        }
        if let Some(line) = self
            .script
            .network
            .iter()
            .chain(self.script.services.iter())
            .find(|line| line.contains('\n') || line.contains('\r'))
        {
            return Err(ConfigError::MultiLineCommand(line.clone()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("{0} must be a non-zero port")]
    InvalidPort(&'static str),

    #[error("web UI and SSH cannot both be forwarded from host port {0}")]
    PortConflict(u16),

    #[error("invalid prompt pattern '{pattern}': {reason}")]
    InvalidPromptPattern { pattern: String, reason: String },

    #[error("match buffer of {0} bytes cannot hold the boot marker")]
    BufferTooSmall(usize),

    #[error("script.network must contain at least one command")]
    EmptyScript,

    #[error("script command spans several lines: {0:?}")]
    MultiLineCommand(String),
}
