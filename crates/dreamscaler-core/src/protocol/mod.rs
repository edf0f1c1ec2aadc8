//! Serial Protocol Communication
//!
//! Implements the binary command/response protocol spoken by the strip
//! controller over a USB serial link.
//!
//! Commands are one opcode byte plus a fixed-length payload. Responses are a
//! single tag byte, optionally followed by a fixed trailer (INFO, ERROR).
//! The protocol has no request IDs, so exactly one request may be in flight
//! on a link at a time.

mod bulk;
pub mod commands;
mod connection;
mod error;
pub mod frame;
pub mod release;
pub mod serial;
mod session;
pub mod sim;
mod transport;

pub use commands::{Command, FrameBuilder, Opcode};
pub use connection::{Connection, ConnectionConfig, ConnectionState, TrafficStats};
pub use error::{ProtocolError, Violation};
pub use frame::{decode_response, DeviceInfo, ErrorCode, Response, ResponseTag};
pub use release::{forced_release, release_port, release_port_with};
pub use serial::{list_ports, PortInfo, SerialOpener, SerialTransport};
pub use session::Session;
pub use transport::{ByteCounts, ExtendedTimeout, Metered, PortOpener, PortSettings, Transport};

/// Default baud rate of the controller firmware
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for a single response in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Timeout for both bulk-transfer handshakes in milliseconds.
/// The controller has to prepare its buffer before it acknowledges.
pub const BULK_TIMEOUT_MS: u64 = 5000;

/// Time the board needs after the port opens (the Arduino resets on open)
pub const BOOT_SETTLE_MS: u64 = 2000;

/// Alternate baud rate used to shake a wedged port loose
pub const RELEASE_BAUD_RATE: u32 = 9600;

/// Pixels on the strip mounted behind the keyboard
pub const DEFAULT_LED_COUNT: u16 = 144;

/// Protocol version this host implements
pub const PROTOCOL_VERSION: u8 = 1;
