//! Serial port handling
//!
//! Provides the [`Transport`] implementation over a real serial port, plus
//! port discovery.

use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use super::{PortOpener, PortSettings, ProtocolError, Transport};

/// A serial port found on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// e.g. "/dev/ttyACM0" or "COM3"
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }

    /// USB CDC/serial adapters, which is how the controller shows up
    pub fn is_usb(&self) -> bool {
        self.vid.is_some()
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let SerialPortType::UsbPort(usb) = info.port_type else {
            return Self::bare(info.port_name);
        };
        Self {
            name: info.port_name,
            vid: Some(usb.vid),
            pid: Some(usb.pid),
            manufacturer: usb.manufacturer,
            product: usb.product,
        }
    }
}

/// Listing order: Arduino CDC ports (ttyACM) first, then USB serial
/// adapters (ttyUSB), then COM ports, then the rest; numeric within a group
fn port_rank(name: &str) -> (u8, usize, &str) {
    let base = name.rsplit('/').next().unwrap_or(name);
    let groups = [("ttyACM", 0), ("ttyUSB", 1), ("COM", 2)];

    for (prefix, group) in groups {
        if let Some(Ok(n)) = base.strip_prefix(prefix).map(str::parse::<usize>) {
            return (group, n, base);
        }
    }
    (3, 0, base)
}

/// CDC devices that exist in /dev but are missing from enumeration
#[cfg(target_os = "linux")]
fn dev_nodes() -> Vec<String> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("ttyACM") || name.starts_with("ttyUSB"))
        .map(|name| format!("/dev/{name}"))
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn dev_nodes() -> Vec<String> {
    Vec::new()
}

/// Every serial port we can see, controller candidates first
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: BTreeMap<String, PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .map(|p| (p.name.clone(), p))
        .collect();

    for name in dev_nodes() {
        ports
            .entry(name.clone())
            .or_insert_with(|| PortInfo::bare(name));
    }

    let mut ports: Vec<PortInfo> = ports.into_values().collect();
    ports.sort_by(|a, b| port_rank(&a.name).cmp(&port_rank(&b.name)));
    tracing::debug!(count = ports.len(), "serial ports enumerated");
    ports
}

/// Configure a serial port for 8-N-1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;
    Ok(())
}

/// [`Transport`] over an open serial port. Dropping it closes the port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    timeout: Duration,
}

impl SerialTransport {
    /// Open and configure `name`
    pub fn open(name: &str, settings: PortSettings) -> Result<Self, ProtocolError> {
        let mut port = open_raw(name, settings)
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{name}: {e}")))?;
        configure_port(port.as_mut())?;

        tracing::debug!(
            port = name,
            baud = settings.baud_rate,
            exclusive = settings.exclusive,
            "serial port opened"
        );

        Ok(Self {
            port,
            name: name.to_string(),
            timeout: settings.timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(unix)]
fn open_raw(name: &str, settings: PortSettings) -> serialport::Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(name, settings.baud_rate)
        .timeout(settings.timeout)
        .open_native()?;
    port.set_exclusive(settings.exclusive)?;
    Ok(Box::new(port))
}

/// Windows ports are always opened exclusively
#[cfg(not(unix))]
fn open_raw(name: &str, settings: PortSettings) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(name, settings.baud_rate)
        .timeout(settings.timeout)
        .open()
}

fn io_error(e: io::Error) -> ProtocolError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProtocolError::Timeout,
        _ => ProtocolError::Io(e),
    }
}

/// What the read loop needs from a port
trait TimedRead: Read {
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError>;
}

impl TimedRead for Box<dyn SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        (**self).set_timeout(timeout)?;
        Ok(())
    }
}

/// Fill `buf` before `timeout` runs out, across as many reads as it takes.
///
/// Each read waits at most for the time left. The port timeout also governs
/// writes, so it is set back to `timeout` before returning.
fn read_within<P: TimedRead + ?Sized>(
    port: &mut P,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let result = fill_before(port, buf, Instant::now() + timeout);
    let restored = port.set_read_timeout(timeout);
    result.and(restored)
}

fn fill_before<P: TimedRead + ?Sized>(
    port: &mut P,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<(), ProtocolError> {
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::debug!("read timed out after {} of {} bytes", offset, buf.len());
            return Err(ProtocolError::Timeout);
        }
        port.set_read_timeout(remaining)?;

        match port.read(&mut buf[offset..]) {
            Ok(0) => {
                tracing::debug!("read returned EOF after {} bytes", offset);
                return Err(ProtocolError::Timeout);
            }
            Ok(n) => {
                tracing::trace!("rx {:02x?}", &buf[offset..offset + n]);
                offset += n;
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }

    Ok(())
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        tracing::trace!("tx {} bytes: {:02x?}", bytes.len(), &bytes[..bytes.len().min(16)]);
        self.port.write_all(bytes).map_err(io_error)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        read_within(&mut self.port, buf, self.timeout)
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        self.port.flush().map_err(io_error)
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn reset_output_buffer(&mut self) -> Result<(), ProtocolError> {
        self.port.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        self.port.set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_flow_control(&mut self) -> Result<(), ProtocolError> {
        self.port.write_data_terminal_ready(false)?;
        self.port.write_request_to_send(false)?;
        Ok(())
    }
}

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(
        &mut self,
        port_name: &str,
        settings: PortSettings,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        Ok(Box::new(SerialTransport::open(port_name, settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports_does_not_panic() {
        for port in list_ports() {
            assert!(!port.name.is_empty());
        }
    }

    #[test]
    fn test_port_rank_order() {
        let mut names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "COM3",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ];
        names.sort_by_key(|&n| port_rank(n));

        assert_eq!(
            names,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "COM3",
                "/dev/someport",
            ]
        );
    }

    /// Hands out one scripted chunk per read and records every timeout set
    struct ChunkedPort {
        chunks: Vec<Vec<u8>>,
        timeouts: Vec<Duration>,
    }

    impl Read for ChunkedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                if let Some(wait) = self.timeouts.last() {
                    std::thread::sleep(*wait);
                }
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    impl TimedRead for ChunkedPort {
        fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
            self.timeouts.push(timeout);
            Ok(())
        }
    }

    #[test]
    fn test_split_read_restores_port_timeout() {
        let timeout = Duration::from_secs(2);
        let mut port = ChunkedPort {
            chunks: vec![vec![0xF2, 1], vec![0, 107], vec![6, 1, 255]],
            timeouts: Vec::new(),
        };
        let mut buf = [0u8; 7];

        read_within(&mut port, &mut buf, timeout).unwrap();
        assert_eq!(buf, [0xF2, 1, 0, 107, 6, 1, 255]);
        assert_eq!(port.timeouts.len(), 4);
        assert!(port.timeouts[..3].iter().all(|t| *t <= timeout));
        assert_eq!(port.timeouts.last(), Some(&timeout));
    }

    #[test]
    fn test_timed_out_read_restores_port_timeout() {
        let timeout = Duration::from_millis(20);
        let mut port = ChunkedPort {
            chunks: vec![vec![0xF2]],
            timeouts: Vec::new(),
        };
        let mut buf = [0u8; 7];

        assert!(read_within(&mut port, &mut buf, timeout).unwrap_err().is_timeout());
        assert_eq!(port.timeouts.last(), Some(&timeout));
    }

    #[test]
    fn test_bare_port_is_not_usb() {
        assert!(!PortInfo::bare("/dev/ttyS0".to_string()).is_usb());
    }

    #[test]
    fn test_open_missing_port_is_connection_failure() {
        let err = SerialTransport::open("/dev/does-not-exist-dreamscaler", PortSettings::default())
            .err()
            .expect("opening a missing port must fail");
        assert!(matches!(err, ProtocolError::ConnectionFailed(_)));
    }
}
