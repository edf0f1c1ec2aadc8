//! DreamScaler USB controller tool
//!
//! Tests and demo effects for the LED strip behind the keyboard.
//!
//! Usage:
//!   dreamscaler /dev/ttyACM0        # Interactive menu
//!   dreamscaler COM3 8              # Run menu item 8 and exit
//!   dreamscaler --simulate          # Menu against a simulated controller
//!   dreamscaler --list-ports        # Show serial ports

mod demos;
mod effects;
mod keymap;
mod menu;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dreamscaler_core::cleanup::CleanupHook;
use dreamscaler_core::protocol::sim::SimulatedOpener;
use dreamscaler_core::protocol::{list_ports, Connection, ConnectionConfig};
use tracing::{info, warn};

use crate::demos::DemoContext;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status after an interrupt (128 + SIGINT)
const INTERRUPTED: i32 = 130;

/// DreamScaler LED strip controller tool
#[derive(Parser)]
#[command(name = "dreamscaler", version = VERSION, about)]
struct Cli {
    /// Serial port, e.g. /dev/ttyACM0 or COM3
    port: Option<String>,

    /// Run this menu item once and exit
    choice: Option<usize>,

    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JSON connection config; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Talk to a simulated controller instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print device info as JSON
    #[arg(long)]
    json: bool,

    /// Seconds each effect runs
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{vid:04x}:{pid:04x}] {}",
                port.name,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
}

/// Defaults, then the config file, then the port argument and flags
fn build_config(cli: &Cli) -> Result<ConnectionConfig> {
    let mut config = match &cli.config {
        Some(path) => ConnectionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConnectionConfig::default(),
    };

    if let Some(port) = &cli.port {
        config.port_name = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }

    if cli.simulate {
        if config.port_name.is_empty() {
            config.port_name = "simulated".to_string();
        }
        config.boot_settle_ms = 0;
    } else if config.port_name.is_empty() {
        bail!("no serial port given (try --list-ports or --simulate)");
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if cli.list_ports {
        print_ports();
        return Ok(());
    }

    let config = build_config(&cli)?;
    info!("DreamScaler v{VERSION}, connecting to {}", config.port_name);

    let conn = if cli.simulate {
        Connection::with_opener(config, SimulatedOpener::default())
    } else {
        Connection::new(config)
    };
    let conn = Arc::new(Mutex::new(conn));
    let hook = CleanupHook::new(Arc::clone(&conn));
    let _guard = hook.guard();

    // Installed before connecting: an interrupt during boot settle or the
    // handshake waits for connect to return, then cleans up
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    let signal_hook = hook.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
        eprintln!("\nInterrupted, cleaning up...");
        signal_hook.run();
        std::process::exit(INTERRUPTED);
    }) {
        warn!("could not install signal handler: {e}");
    }

    let device = conn
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .connect()
        .context("connecting to controller")?;
    println!(
        "Connected: {} LEDs on pin {}, protocol v{}",
        device.led_count, device.led_pin, device.protocol_version
    );

    let ctx = DemoContext {
        running,
        effect_duration: Duration::from_secs(cli.duration),
        json: cli.json,
    };

    match cli.choice {
        Some(0) => Ok(()),
        Some(choice) => {
            let action = menu::lookup(choice)
                .with_context(|| format!("no menu item {choice}"))?;
            menu::run_action(&conn, &ctx, action)
        }
        None => menu::interactive(&conn, &ctx),
    }
}
