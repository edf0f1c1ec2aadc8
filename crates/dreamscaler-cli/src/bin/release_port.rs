//! Release a serial port left locked by a killed process
//!
//! Usage:
//!   release-port /dev/ttyACM0
//!
//! Exits 0 once the port could be opened and closed again, 1 otherwise.

use std::process::ExitCode;

use clap::Parser;
use dreamscaler_core::protocol::release_port;

/// Free a wedged serial port
#[derive(Parser)]
#[command(name = "release-port", version, about)]
struct Cli {
    /// Serial port, e.g. /dev/ttyACM0 or COM3
    port: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if release_port(&cli.port) {
        println!("{} released", cli.port);
        ExitCode::SUCCESS
    } else {
        eprintln!("Could not release {}", cli.port);
        eprintln!("Unplug and reconnect the device, or close the program holding it.");
        ExitCode::FAILURE
    }
}
