//! openwrt-vm-setup - boots OpenWrt under QEMU, switches the LAN to DHCP
//! over the serial console, then hands the console to the user.

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use openwrt_vm_setup::config::loader::CONFIG_ENV_VAR;
use openwrt_vm_setup::error::{EXIT_CONFIG, EXIT_FAILURE, EXIT_OK};
use openwrt_vm_setup::{Config, ConfigLoader, Error, HandoverEnd, Orchestrator, Transcript};

const DEBUG_ENV_VAR: &str = "OPENWRT_VM_SETUP_DEBUG";

/// Boot an OpenWrt image under QEMU and switch its LAN interface to DHCP
#[derive(Debug, Parser)]
#[command(name = "openwrt-vm-setup", version, about)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Disk image to boot
    #[arg(long)]
    image: Option<PathBuf>,

    /// Emulator executable
    #[arg(long)]
    qemu: Option<String>,

    /// Guest memory in MiB
    #[arg(long)]
    memory: Option<u32>,

    /// Guest CPU count
    #[arg(long)]
    smp: Option<u32>,

    /// Host port forwarded to the guest web UI
    #[arg(long)]
    http_port: Option<u16>,

    /// Host port forwarded to the guest SSH daemon
    #[arg(long)]
    ssh_port: Option<u16>,

    /// Seconds to wait for the boot marker
    #[arg(long)]
    boot_timeout: Option<u64>,

    /// Seconds to wait for each shell prompt
    #[arg(long)]
    prompt_timeout: Option<u64>,

    /// Seconds to wait after restarting the network
    #[arg(long)]
    settle: Option<u64>,

    /// Append the console transcript to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Stop the VM after configuring instead of handing over the console
    #[arg(long)]
    no_interact: bool,

    /// Print the emulator command and the script, then exit
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let code = run(cli).await;
    debug!("Exiting with status {}", code);
    process::exit(code);
}

fn init_logging(debug: bool) {
    let debug = debug
        || env::var(DEBUG_ENV_VAR).map_or(false, |v| v == "1" || v.to_lowercase() == "true");
    let log_level = if debug { "debug" } else { "warn" };

    let env_filter = env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

async fn run(cli: Cli) -> i32 {
    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            return config_exit_code(&e);
        }
    };

    if cli.dry_run {
        print_plan(&config);
        return EXIT_OK;
    }

    print_banner();

    let transcript = match open_transcript(cli.log_file.as_deref()) {
        Ok(transcript) => transcript,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            return EXIT_FAILURE;
        }
    };

    // Listen before launch so Ctrl+C never hits the default handler
    let mut interrupt = interrupt_signal();

    let interact = config.handover.interact;
    let orchestrator = match Orchestrator::launch(config, transcript) {
        Ok(orchestrator) => orchestrator,
        Err(failure) => {
            println!("\n✗ {}", failure.error);
            return failure.exit_code();
        }
    };

    // Failure reporting and emulator shutdown happen inside `run`
    let mut session = match orchestrator.run((&mut interrupt).boxed()).await {
        Ok(session) => session,
        Err(failure) => return failure.exit_code(),
    };

    if interact {
        if let Ok((cols, rows)) = crossterm::terminal::size() {
            if let Err(e) = session.process().resize(cols, rows) {
                debug!("Could not resize console to {}x{}: {}", cols, rows, e);
            }
        }
        match session.attach_terminal((&mut interrupt).boxed()).await {
            Ok(HandoverEnd::ConsoleClosed) => println!("\nQEMU exited"),
            Ok(HandoverEnd::Escaped) => println!("\nDetached, stopping the VM"),
            Ok(HandoverEnd::InputClosed) => println!("\nInput closed, stopping the VM"),
            Ok(HandoverEnd::Interrupted) => println!("\n\nInterrupted by user"),
            Err(e) => warn!("Interactive session failed: {}", e),
        }
    } else {
        info!("Interactive handover disabled");
    }

    if let Err(e) = session.finish().await {
        warn!("Failed to stop emulator: {}", e);
    }

    EXIT_OK
}

/// Status for a configuration that could not be loaded
fn config_exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<Error>()
        .map(Error::exit_code)
        .unwrap_or(EXIT_CONFIG)
}

/// Defaults, then the config file, then command line flags
fn load_configuration(cli: &Cli) -> anyhow::Result<Config> {
    let explicit = cli
        .config
        .clone()
        .or_else(|| env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

    let mut loader = ConfigLoader::new();
    let mut config = loader
        .load(explicit.as_deref())
        .context("Failed to load configuration")?;
    if let Some(path) = loader.current_path() {
        debug!("Using configuration from {}", path.display());
    }

    apply_overrides(&mut config, cli);
    config
        .validate()
        .map_err(Error::from)
        .context("Invalid configuration")?;

    Ok(config)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(image) = &cli.image {
        config.qemu.image = image.clone();
    }
    if let Some(qemu) = &cli.qemu {
        config.qemu.binary = qemu.clone();
    }
    if let Some(memory) = cli.memory {
        config.qemu.memory_mb = memory;
    }
    if let Some(smp) = cli.smp {
        config.qemu.smp = smp;
    }
    if let Some(port) = cli.http_port {
        config.qemu.http_port = port;
    }
    if let Some(port) = cli.ssh_port {
        config.qemu.ssh_port = port;
    }
    if let Some(secs) = cli.boot_timeout {
        config.console.boot_timeout_secs = secs;
    }
    if let Some(secs) = cli.prompt_timeout {
        config.console.prompt_timeout_secs = secs;
    }
    if let Some(secs) = cli.settle {
        config.console.settle_secs = secs;
    }
    if cli.no_interact {
        config.handover.interact = false;
    }
}

fn open_transcript(log_file: Option<&std::path::Path>) -> anyhow::Result<Transcript> {
    let transcript = Transcript::stdout();
    match log_file {
        Some(path) => transcript
            .with_log_file(path)
            .with_context(|| format!("Failed to open log file {}", path.display())),
        None => Ok(transcript),
    }
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed.
///
/// The handler is registered when this is called, not when first polled.
fn interrupt_signal() -> BoxFuture<'static, ()> {
    #[cfg(unix)]
    let listener = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt());
    #[cfg(windows)]
    let listener = tokio::signal::windows::ctrl_c();

    match listener {
        Ok(mut listener) => async move {
            listener.recv().await;
        }
        .boxed(),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            futures::future::pending::<()>().boxed()
        }
    }
}

fn print_banner() {
    let rule = "=".repeat(60);
    println!("{}", rule);
    println!("OpenWrt VM Automatic Setup");
    println!("{}", rule);
    println!();
}

fn print_plan(config: &Config) {
    println!("{}", config.qemu.command_line());
    println!();
    println!("Waits for: {:?}", config.console.boot_marker);
    println!("Prompt:    {}", config.console.prompt_pattern);
    println!();
    for command in &config.script.network {
        println!("  {}", command);
    }
    println!("  (wait {}s)", config.console.settle_secs);
    for command in &config.script.services {
        println!("  {}", command);
    }
}
