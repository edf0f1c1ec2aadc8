//! Serial port release
//!
//! A port closed while a process is being torn down by a signal can stay
//! locked at the OS level, blocking every later open, including a fresh run
//! of this program. Reopening it briefly with different settings and closing
//! it again resets that state on the drivers we have seen it on.
//!
//! This relies on OS/driver side effects and is not guaranteed to help.
//! Nothing in the session depends on it succeeding.

use std::time::Duration;

use super::{PortOpener, PortSettings, SerialOpener, Transport, DEFAULT_BAUD_RATE, RELEASE_BAUD_RATE};

/// Read timeout for the short-lived release handles
const RELEASE_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after each standalone attempt so the OS can let go of the port
pub const RELEASE_ATTEMPT_DELAY: Duration = Duration::from_millis(500);

/// Settings tried in order by [`release_port`]
pub const RELEASE_ATTEMPTS: [(u32, bool); 3] = [
    (DEFAULT_BAUD_RATE, false),
    (RELEASE_BAUD_RATE, false),
    (DEFAULT_BAUD_RATE, true),
];

/// Reopen `port_name` at `baud_rate`, reset it and close it again.
///
/// Every failure is logged and swallowed; this runs on the teardown path.
pub fn forced_release(
    opener: &mut dyn PortOpener,
    port_name: &str,
    baud_rate: u32,
    delay: Duration,
) {
    std::thread::sleep(delay);

    let settings = PortSettings::new(baud_rate, RELEASE_TIMEOUT);
    let mut transport = match opener.open(port_name, settings) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(port = port_name, "forced release: reopen failed: {e}");
            return;
        }
    };

    reset_quietly(transport.as_mut(), port_name);
    if let Err(e) = transport.clear_flow_control() {
        tracing::warn!(port = port_name, "forced release: clearing DTR/RTS failed: {e}");
    }

    std::thread::sleep(delay);
    drop(transport);
    // Give the OS time to actually let go of the port
    std::thread::sleep(delay * 2);
    tracing::debug!(port = port_name, baud_rate, "forced release done");
}

/// Standalone recovery for a port left wedged by an earlier process.
///
/// Needs no [`Connection`](super::Connection). Returns `true` as soon as one
/// open/reset/close cycle completes.
pub fn release_port(port_name: &str) -> bool {
    release_port_with(&mut SerialOpener, port_name, RELEASE_ATTEMPT_DELAY)
}

/// [`release_port`] through an arbitrary opener
pub fn release_port_with(opener: &mut dyn PortOpener, port_name: &str, delay: Duration) -> bool {
    for (attempt, (baud_rate, exclusive)) in RELEASE_ATTEMPTS.into_iter().enumerate() {
        tracing::info!(
            port = port_name,
            baud_rate,
            exclusive,
            "release attempt {}/{}",
            attempt + 1,
            RELEASE_ATTEMPTS.len()
        );

        let settings = PortSettings::new(baud_rate, RELEASE_TIMEOUT).exclusive(exclusive);
        match opener.open(port_name, settings) {
            Ok(mut transport) => {
                reset_quietly(transport.as_mut(), port_name);
                drop(transport);
                std::thread::sleep(delay);
                tracing::info!(port = port_name, "port released");
                return true;
            }
            Err(e) => {
                tracing::warn!(port = port_name, "release attempt {} failed: {e}", attempt + 1);
            }
        }
    }

    false
}

fn reset_quietly(transport: &mut dyn Transport, port_name: &str) {
    if let Err(e) = transport.reset_input_buffer() {
        tracing::warn!(port = port_name, "release: input reset failed: {e}");
    }
    if let Err(e) = transport.reset_output_buffer() {
        tracing::warn!(port = port_name, "release: output reset failed: {e}");
    }
}
