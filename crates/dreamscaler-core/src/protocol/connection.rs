//! Connection management
//!
//! Handles the connection lifecycle (open, settle, handshake, teardown,
//! forced port release) and exposes one method per controller command.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{
    forced_release, ByteCounts, Command, DeviceInfo, Metered, PortOpener, PortSettings,
    ProtocolError, SerialOpener, Session, Transport, BOOT_SETTLE_MS, BULK_TIMEOUT_MS, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS,
    RELEASE_BAUD_RATE,
};
use crate::pixel::Rgbw;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connecting (port open, handshake in progress)
    Connecting,
    /// Connected and ready
    Connected,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
    /// Timeout around bulk handshakes in milliseconds
    pub bulk_timeout_ms: u64,
    /// Wait after opening the port before talking to the board
    pub boot_settle_ms: u64,
    /// Baud rate used by the forced release after closing
    pub release_baud_rate: u32,
    /// Pause between the steps of closing and releasing the port
    pub release_delay_ms: u64,
    /// Clear the strip before closing the port
    pub clear_on_disconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            bulk_timeout_ms: BULK_TIMEOUT_MS,
            boot_settle_ms: BOOT_SETTLE_MS,
            release_baud_rate: RELEASE_BAUD_RATE,
            release_delay_ms: 100,
            clear_on_disconnect: true,
        }
    }
}

impl ConnectionConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON config; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text).map_err(|e| {
            ProtocolError::InvalidParameter(format!("{}: {e}", path.as_ref().display()))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_timeout_ms)
    }

    fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }
}

/// Cumulative traffic on a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Command frames written, answered or not
    pub commands: u64,
    /// Bulk frames latched by the controller
    pub bulk_frames: u64,
}

/// Connection to the strip controller.
///
/// Owns its transport exclusively. Dropping the connection runs
/// [`disconnect`](Self::disconnect).
pub struct Connection {
    /// Opens the port for connect and for the forced release
    opener: Box<dyn PortOpener>,
    /// Open transport while Connecting or Connected
    transport: Option<Metered<Box<dyn Transport>>>,
    state: ConnectionState,
    config: ConnectionConfig,
    /// Controller configuration, refreshed on connect
    info: Option<DeviceInfo>,
    /// The port was opened since the last forced release
    needs_release: bool,
    /// Bytes moved by transports already closed
    closed_bytes: ByteCounts,
    commands: u64,
    bulk_frames: u64,
}

impl Connection {
    /// Create a new connection over a real serial port (not yet connected)
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_opener(config, SerialOpener)
    }

    /// Create a connection that opens its port through `opener`
    pub fn with_opener(config: ConnectionConfig, opener: impl PortOpener + 'static) -> Self {
        Self {
            opener: Box::new(opener),
            transport: None,
            state: ConnectionState::Disconnected,
            config,
            info: None,
            needs_release: false,
            closed_bytes: ByteCounts::default(),
            commands: 0,
            bulk_frames: 0,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Controller configuration as of the last connect and commands since
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// Number of pixels on the strip, as reported by the controller
    pub fn led_count(&self) -> u16 {
        self.info.map(|i| i.led_count).unwrap_or(0)
    }

    /// Traffic since the connection was created, across reconnects
    pub fn stats(&self) -> TrafficStats {
        let mut bytes = self.closed_bytes;
        if let Some(transport) = &self.transport {
            bytes += transport.counts();
        }
        TrafficStats {
            tx_bytes: bytes.tx,
            rx_bytes: bytes.rx,
            commands: self.commands,
            bulk_frames: self.bulk_frames,
        }
    }

    /// Open the port, wait for the board to boot, drain startup noise, then
    /// PING and GET_INFO. Only a completed handshake leaves the connection
    /// Connected; on failure the port is closed and released again.
    pub fn connect(&mut self) -> Result<DeviceInfo, ProtocolError> {
        if self.state == ConnectionState::Connected {
            return Err(ProtocolError::AlreadyConnected);
        }

        self.state = ConnectionState::Connecting;
        let settings = PortSettings::new(self.config.baud_rate, self.config.timeout());
        let transport = match self.opener.open(&self.config.port_name, settings) {
            Ok(t) => t,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(match e {
                    ProtocolError::ConnectionFailed(_) => e,
                    other => ProtocolError::ConnectionFailed(other.to_string()),
                });
            }
        };
        self.transport = Some(Metered::new(transport));
        self.needs_release = true;

        match self.handshake() {
            Ok(info) => {
                tracing::info!(
                    port = %self.config.port_name,
                    led_count = info.led_count,
                    led_pin = info.led_pin,
                    version = info.protocol_version,
                    "connected to controller"
                );
                self.info = Some(info);
                self.state = ConnectionState::Connected;
                Ok(info)
            }
            Err(e) => {
                tracing::warn!(port = %self.config.port_name, "handshake failed: {e}");
                self.disconnect();
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<DeviceInfo, ProtocolError> {
        let settle = Duration::from_millis(self.config.boot_settle_ms);
        tracing::debug!("waiting {:?} for controller boot", settle);
        std::thread::sleep(settle);

        let transport = self.transport.as_mut().ok_or(ProtocolError::NotConnected)?;
        // Bootloader output and init messages
        transport.reset_input_buffer()?;
        transport.reset_output_buffer()?;

        self.with_session(|session| {
            session.ping()?;
            session.get_info()
        })
    }

    /// Close the link. Never fails and is safe to call any number of times.
    ///
    /// Graceful part: reset buffers, clear the strip, drop DTR/RTS, close.
    /// Then the forced release reopens the port at the alternate baud rate and
    /// closes it again, so a port left wedged by an interrupted process is
    /// usable by the next one. The release depends on OS/driver behavior and
    /// is best-effort only.
    pub fn disconnect(&mut self) {
        let was_connected = self.state == ConnectionState::Connected;

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.reset_input_buffer() {
                tracing::warn!("disconnect: input reset failed: {e}");
            }
            if let Err(e) = transport.reset_output_buffer() {
                tracing::warn!("disconnect: output reset failed: {e}");
            }

            if was_connected && self.config.clear_on_disconnect {
                let mut session =
                    Session::new(&mut transport).with_bulk_timeout(self.config.bulk_timeout());
                if let Err(e) = session.expect(&Command::ClearAll) {
                    tracing::warn!("disconnect: clearing strip failed: {e}");
                }
                self.commands += session.commands_sent();
            }

            if let Err(e) = transport.clear_flow_control() {
                tracing::warn!("disconnect: clearing DTR/RTS failed: {e}");
            }

            std::thread::sleep(self.config.release_delay());
            self.closed_bytes += transport.counts();
            drop(transport);
            tracing::info!(port = %self.config.port_name, "disconnected");
        }

        self.state = ConnectionState::Disconnected;
        self.info = None;

        if self.needs_release {
            self.needs_release = false;
            forced_release(
                self.opener.as_mut(),
                &self.config.port_name,
                self.config.release_baud_rate,
                self.config.release_delay(),
            );
        }
    }

    /// Run `f` on a session over the open transport, counting the commands
    /// it sends whether or not they succeed
    fn with_session<R>(
        &mut self,
        f: impl FnOnce(&mut Session<'_, Metered<Box<dyn Transport>>>) -> Result<R, ProtocolError>,
    ) -> Result<R, ProtocolError> {
        let bulk_timeout = self.config.bulk_timeout();
        let transport = self.transport.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut session = Session::new(transport).with_bulk_timeout(bulk_timeout);
        let result = f(&mut session);
        self.commands += session.commands_sent();
        result
    }

    /// Run one command that must be answered with its expected tag
    fn command(&mut self, command: Command) -> Result<(), ProtocolError> {
        self.with_session(|session| session.expect(&command).map(|_| ()))
    }

    fn update_info(&mut self, f: impl FnOnce(&mut DeviceInfo)) {
        if let Some(info) = self.info.as_mut() {
            f(info);
        }
    }

    /// Test the link
    pub fn ping(&mut self) -> Result<(), ProtocolError> {
        self.command(Command::Ping)
    }

    /// Read the controller configuration and refresh the cached copy
    pub fn get_info(&mut self) -> Result<DeviceInfo, ProtocolError> {
        let info = self.with_session(|session| session.get_info())?;
        self.info = Some(info);
        Ok(info)
    }

    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        self.command(Command::Reset)
    }

    pub fn set_led_count(&mut self, count: u16) -> Result<(), ProtocolError> {
        self.command(Command::SetLedCount(count))?;
        self.update_info(|i| i.led_count = count);
        Ok(())
    }

    pub fn set_led_pin(&mut self, pin: u8) -> Result<(), ProtocolError> {
        self.command(Command::SetLedPin(pin))?;
        self.update_info(|i| i.led_pin = pin);
        Ok(())
    }

    /// Initialize the strip with the current count and pin
    pub fn init_strip(&mut self) -> Result<(), ProtocolError> {
        self.command(Command::InitStrip)?;
        self.update_info(|i| i.initialized = true);
        Ok(())
    }

    pub fn set_pixel(&mut self, index: u16, color: Rgbw) -> Result<(), ProtocolError> {
        self.command(Command::SetPixelRgbw { index, color })
    }

    /// Set a pixel from RGB; the controller leaves W at 0
    pub fn set_pixel_rgb(&mut self, index: u16, r: u8, g: u8, b: u8) -> Result<(), ProtocolError> {
        self.command(Command::SetPixelRgb { index, r, g, b })
    }

    pub fn set_pixel_white(&mut self, index: u16, w: u8) -> Result<(), ProtocolError> {
        self.command(Command::SetPixelW { index, w })
    }

    /// Fill `start..=end` with one color
    pub fn set_range(&mut self, start: u16, end: u16, color: Rgbw) -> Result<(), ProtocolError> {
        self.command(Command::SetRangeRgbw { start, end, color })
    }

    pub fn set_all(&mut self, color: Rgbw) -> Result<(), ProtocolError> {
        self.command(Command::SetAllRgbw(color))
    }

    pub fn clear_all(&mut self) -> Result<(), ProtocolError> {
        self.command(Command::ClearAll)
    }

    pub fn buffer_begin(&mut self) -> Result<(), ProtocolError> {
        self.command(Command::BufferStart)
    }

    pub fn buffer_set_pixel(&mut self, index: u16, color: Rgbw) -> Result<(), ProtocolError> {
        self.command(Command::BufferPixel { index, color })
    }

    /// End the buffer and show it
    pub fn buffer_end(&mut self) -> Result<(), ProtocolError> {
        self.command(Command::BufferEnd)
    }

    /// Update a sparse set of pixels and show them together
    pub fn buffer_update(&mut self, pixels: &[(u16, Rgbw)]) -> Result<(), ProtocolError> {
        self.with_session(|session| session.buffer_update(pixels))
    }

    pub fn stream_begin(&mut self, count: u16) -> Result<(), ProtocolError> {
        self.command(Command::StreamStart { count })
    }

    /// Next pixel of the stream, in index order
    pub fn stream_pixel(&mut self, color: Rgbw) -> Result<(), ProtocolError> {
        self.command(Command::StreamData(color))
    }

    pub fn stream_end(&mut self) -> Result<(), ProtocolError> {
        self.command(Command::StreamEnd)
    }

    /// Full frame through stream mode, one round trip per pixel
    pub fn stream_update(&mut self, pixels: &[Rgbw]) -> Result<(), ProtocolError> {
        self.with_session(|session| session.stream_update(pixels))
    }

    /// Full frame in a single exchange. On failure the frame is dropped and
    /// the error returned; the next frame may be tried as usual.
    pub fn bulk_update(&mut self, pixels: &[Rgbw]) -> Result<(), ProtocolError> {
        self.with_session(|session| session.bulk_update(pixels))?;
        self.bulk_frames += 1;
        Ok(())
    }

    /// Show the current buffer on the strip
    pub fn sync(&mut self) -> Result<(), ProtocolError> {
        self.command(Command::Sync)
    }

    /// Linear gradient over `start..=end`
    pub fn fill_gradient(
        &mut self,
        start: u16,
        end: u16,
        from: Rgbw,
        to: Rgbw,
    ) -> Result<(), ProtocolError> {
        self.command(Command::FillGradient {
            start,
            end,
            from,
            to,
        })
    }

    /// Global brightness, 0 = off, 255 = full
    pub fn set_brightness(&mut self, level: u8) -> Result<(), ProtocolError> {
        self.command(Command::Brightness(level))?;
        self.update_info(|i| i.brightness = level);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout(), Duration::from_secs(2));
        assert_eq!(config.bulk_timeout(), Duration::from_secs(5));
        assert_eq!(config.release_baud_rate, 9600);
        assert!(config.clear_on_disconnect);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config =
            ConnectionConfig::from_json(r#"{ "port_name": "COM3", "boot_settle_ms": 0 }"#)
                .unwrap();
        assert_eq!(config.port_name, "COM3");
        assert_eq!(config.boot_settle_ms, 0);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_connection_state() {
        let conn = Connection::new(ConnectionConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.device_info().is_none());
        assert_eq!(conn.led_count(), 0);
    }

    #[test]
    fn test_commands_require_connection() {
        let mut conn = Connection::new(ConnectionConfig::default());
        assert!(matches!(conn.ping(), Err(ProtocolError::NotConnected)));
        assert!(matches!(
            conn.bulk_update(&[Rgbw::OFF]),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_disconnect_without_connect_is_noop() {
        let mut conn = Connection::new(ConnectionConfig::default());
        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
