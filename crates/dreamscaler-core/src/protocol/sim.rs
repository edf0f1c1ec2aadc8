//! Simulated strip controller
//!
//! An in-process model of the controller firmware, driven through the same
//! [`Transport`] and [`PortOpener`] seams as a real serial port. Used by the
//! test suite and by the CLI's `--simulate` mode.
//!
//! The model parses host bytes by their fixed frame lengths, keeps a pixel
//! buffer of `led_count` pixels and answers the way the firmware does,
//! including the two-step handshake of BULK_UPDATE. Reads never block: a read
//! that cannot be satisfied from queued replies fails with
//! [`ProtocolError::Timeout`] immediately.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use super::{
    DeviceInfo, ErrorCode, Opcode, PortOpener, PortSettings, ProtocolError, Response, Transport,
    DEFAULT_LED_COUNT, PROTOCOL_VERSION,
};
use crate::pixel::Rgbw;

/// What the firmware prints on boot, before it listens for commands
pub const BOOT_BANNER: &[u8] = b"DreamScaler LED controller ready\r\n";

/// One call to [`SimulatedOpener::open`], successful or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenRecord {
    pub port_name: String,
    pub baud_rate: u32,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Every pixel write is shown immediately
    Direct,
    /// Pixel writes collect until BUFFER_END
    Buffer,
    /// STREAM_DATA fills pixels `next..count`
    Stream { next: u16, count: u16 },
    /// Raw RGBW bytes of a bulk frame are arriving
    Bulk { count: u16 },
}

/// Controller state shared by every handle opened on the simulated port
#[derive(Debug)]
pub struct DeviceModel {
    info: DeviceInfo,
    /// Working buffer written by pixel commands
    pixels: Vec<Rgbw>,
    /// Last frame latched onto the strip
    shown: Vec<Rgbw>,
    latched_frames: u64,
    mode: Mode,
    /// Host bytes not yet parsed
    rx: Vec<u8>,
    /// Reply bytes waiting for the host
    tx: VecDeque<u8>,
    /// Every byte the host ever wrote
    received: Vec<u8>,
    opens: Vec<OpenRecord>,
    boot_banner: Vec<u8>,
    unresponsive: bool,
    failing_opens: usize,
}

impl DeviceModel {
    fn new(info: DeviceInfo) -> Self {
        let pixels = vec![Rgbw::OFF; usize::from(info.led_count)];
        Self {
            info,
            shown: pixels.clone(),
            pixels,
            latched_frames: 0,
            mode: Mode::Direct,
            rx: Vec::new(),
            tx: VecDeque::new(),
            received: Vec::new(),
            opens: Vec::new(),
            boot_banner: BOOT_BANNER.to_vec(),
            unresponsive: false,
            failing_opens: 0,
        }
    }

    /// Feed host bytes and run every complete frame
    fn receive(&mut self, bytes: &[u8]) {
        self.received.extend_from_slice(bytes);
        if self.unresponsive {
            return;
        }
        self.rx.extend_from_slice(bytes);

        loop {
            if let Mode::Bulk { count } = self.mode {
                let needed = usize::from(count) * 4;
                if self.rx.len() < needed {
                    return;
                }
                let payload: Vec<u8> = self.rx.drain(..needed).collect();
                for (pixel, chunk) in self.pixels.iter_mut().zip(payload.chunks_exact(4)) {
                    *pixel = Rgbw::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
                self.mode = Mode::Direct;
                self.latch();
                self.reply(Response::Ok);
                continue;
            }

            let Some(&first) = self.rx.first() else {
                return;
            };
            let Some(opcode) = Opcode::from_byte(first) else {
                self.rx.remove(0);
                self.reply(Response::UnknownCommand);
                continue;
            };
            if self.rx.len() < opcode.frame_len() {
                return;
            }
            let frame: Vec<u8> = self.rx.drain(..opcode.frame_len()).collect();
            let response = match self.execute(opcode, &frame[1..]) {
                Ok(response) => response,
                Err(code) => Response::Error(code),
            };
            self.reply(response);
        }
    }

    fn reply(&mut self, response: Response) {
        self.tx.extend(response.to_bytes());
    }

    fn latch(&mut self) {
        self.shown.clone_from(&self.pixels);
        self.latched_frames += 1;
    }

    /// Show the frame unless a buffered or streamed update is in progress
    fn show_if_direct(&mut self) {
        if self.mode == Mode::Direct {
            self.latch();
        }
    }

    fn check_index(&self, index: u16) -> Result<usize, ErrorCode> {
        if index < self.info.led_count {
            Ok(usize::from(index))
        } else {
            Err(ErrorCode::OutOfRange)
        }
    }

    fn check_span(&self, start: u16, end: u16) -> Result<(usize, usize), ErrorCode> {
        if start > end {
            return Err(ErrorCode::InvalidParam);
        }
        Ok((self.check_index(start)?, self.check_index(end)?))
    }

    fn require_init(&self) -> Result<(), ErrorCode> {
        if self.info.initialized {
            Ok(())
        } else {
            Err(ErrorCode::NotInitialized)
        }
    }

    fn execute(&mut self, opcode: Opcode, p: &[u8]) -> Result<Response, ErrorCode> {
        let u16_at = |at: usize| BigEndian::read_u16(&p[at..at + 2]);
        let rgbw_at = |at: usize| Rgbw::from_bytes([p[at], p[at + 1], p[at + 2], p[at + 3]]);

        match opcode {
            Opcode::Ping => return Ok(Response::Pong),
            Opcode::GetInfo => return Ok(Response::Info(self.info)),
            Opcode::Reset => {
                self.pixels.fill(Rgbw::OFF);
                self.mode = Mode::Direct;
                self.latch();
            }
            Opcode::SetLedCount => {
                let count = u16_at(0);
                if count == 0 {
                    return Err(ErrorCode::InvalidParam);
                }
                self.info.led_count = count;
                self.info.initialized = false;
                // A buffered or streamed update cannot survive a resize
                self.mode = Mode::Direct;
                self.pixels = vec![Rgbw::OFF; usize::from(count)];
                self.shown = self.pixels.clone();
            }
            Opcode::SetLedPin => {
                self.info.led_pin = p[0];
                self.info.initialized = false;
            }
            Opcode::InitStrip => {
                self.info.initialized = true;
                self.mode = Mode::Direct;
            }
            Opcode::SetPixelRgbw | Opcode::SetPixelRgb | Opcode::SetPixelW => {
                self.require_init()?;
                let index = self.check_index(u16_at(0))?;
                self.pixels[index] = match opcode {
                    Opcode::SetPixelRgbw => rgbw_at(2),
                    Opcode::SetPixelRgb => Rgbw::from_rgb(p[2], p[3], p[4]),
                    _ => Rgbw::white(p[2]),
                };
                self.show_if_direct();
            }
            Opcode::SetRangeRgbw => {
                self.require_init()?;
                let (start, end) = self.check_span(u16_at(0), u16_at(2))?;
                self.pixels[start..=end].fill(rgbw_at(4));
                self.show_if_direct();
            }
            Opcode::SetAllRgbw => {
                self.require_init()?;
                self.pixels.fill(rgbw_at(0));
                self.show_if_direct();
            }
            Opcode::ClearAll => {
                self.require_init()?;
                self.pixels.fill(Rgbw::OFF);
                self.mode = Mode::Direct;
                self.latch();
            }
            Opcode::BufferStart => {
                self.require_init()?;
                self.mode = Mode::Buffer;
            }
            Opcode::BufferPixel => {
                if self.mode != Mode::Buffer {
                    return Err(ErrorCode::InvalidParam);
                }
                let index = self.check_index(u16_at(0))?;
                self.pixels[index] = rgbw_at(2);
            }
            Opcode::BufferEnd => {
                if self.mode != Mode::Buffer {
                    return Err(ErrorCode::InvalidParam);
                }
                self.mode = Mode::Direct;
                self.latch();
            }
            Opcode::StreamStart => {
                self.require_init()?;
                let count = u16_at(0);
                if count > self.info.led_count {
                    return Err(ErrorCode::OutOfRange);
                }
                self.mode = Mode::Stream { next: 0, count };
            }
            Opcode::StreamData => {
                let Mode::Stream { next, count } = self.mode else {
                    return Err(ErrorCode::InvalidParam);
                };
                if next >= count {
                    return Err(ErrorCode::BufferOverflow);
                }
                let pixel = self
                    .pixels
                    .get_mut(usize::from(next))
                    .ok_or(ErrorCode::OutOfRange)?;
                *pixel = rgbw_at(0);
                self.mode = Mode::Stream {
                    next: next + 1,
                    count,
                };
            }
            Opcode::StreamEnd => {
                if !matches!(self.mode, Mode::Stream { .. }) {
                    return Err(ErrorCode::InvalidParam);
                }
                self.mode = Mode::Direct;
                self.latch();
            }
            Opcode::BulkUpdate => {
                self.require_init()?;
                let count = u16_at(0);
                if count > self.info.led_count {
                    return Err(ErrorCode::OutOfRange);
                }
                // Ready; the payload is consumed by the receive loop
                self.mode = Mode::Bulk { count };
            }
            Opcode::Sync => {
                self.require_init()?;
                self.latch();
            }
            Opcode::FillGradient => {
                self.require_init()?;
                let (start, end) = self.check_span(u16_at(0), u16_at(2))?;
                let (from, to) = (rgbw_at(4), rgbw_at(8));
                let span = (end - start).max(1) as f32;
                for (offset, pixel) in self.pixels[start..=end].iter_mut().enumerate() {
                    *pixel = lerp(from, to, offset as f32 / span);
                }
                self.show_if_direct();
            }
            Opcode::Brightness => {
                self.info.brightness = p[0];
            }
        }
        Ok(Response::Ok)
    }
}

fn lerp(from: Rgbw, to: Rgbw, t: f32) -> Rgbw {
    let channel = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8;
    Rgbw::new(
        channel(from.r, to.r),
        channel(from.g, to.g),
        channel(from.b, to.b),
        channel(from.w, to.w),
    )
}

fn lock(model: &Mutex<DeviceModel>) -> MutexGuard<'_, DeviceModel> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A handle on the simulated controller; what a real port would be
pub struct SimulatedDevice {
    model: Arc<Mutex<DeviceModel>>,
    timeout: Duration,
}

impl Transport for SimulatedDevice {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        lock(&self.model).receive(bytes);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let mut model = lock(&self.model);
        if model.tx.len() < buf.len() {
            // A short read consumes what did arrive, like a real port
            model.tx.clear();
            return Err(ProtocolError::Timeout);
        }
        let n = buf.len();
        for (slot, byte) in buf.iter_mut().zip(model.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        lock(&self.model).tx.clear();
        Ok(())
    }

    fn reset_output_buffer(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_flow_control(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Opens handles on one shared simulated controller.
///
/// Clones share the controller, so a test can keep one clone for inspection
/// while a [`Connection`](super::Connection) owns another.
#[derive(Clone)]
pub struct SimulatedOpener {
    model: Arc<Mutex<DeviceModel>>,
}

impl Default for SimulatedOpener {
    fn default() -> Self {
        Self::new(DeviceInfo {
            protocol_version: PROTOCOL_VERSION,
            led_count: DEFAULT_LED_COUNT,
            led_pin: 6,
            initialized: true,
            brightness: 255,
        })
    }
}

impl SimulatedOpener {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            model: Arc::new(Mutex::new(DeviceModel::new(info))),
        }
    }

    /// Replace the text emitted on every open; empty for none
    pub fn with_boot_banner(self, banner: &[u8]) -> Self {
        lock(&self.model).boot_banner = banner.to_vec();
        self
    }

    /// A handle that bypasses open: no banner, nothing recorded
    pub fn device(&self) -> SimulatedDevice {
        SimulatedDevice {
            model: Arc::clone(&self.model),
            timeout: PortSettings::default().timeout,
        }
    }

    /// Stop answering; everything written is swallowed
    pub fn set_unresponsive(&self, unresponsive: bool) {
        lock(&self.model).unresponsive = unresponsive;
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.model).failing_opens = count;
    }

    /// Queue raw bytes for the host, as if the controller had sent them
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.model).tx.extend(bytes.iter().copied());
    }

    /// Current controller configuration
    pub fn info(&self) -> DeviceInfo {
        lock(&self.model).info
    }

    /// Pixels currently lit on the strip
    pub fn shown_frame(&self) -> Vec<Rgbw> {
        lock(&self.model).shown.clone()
    }

    /// How many frames have been latched onto the strip
    pub fn latched_frames(&self) -> u64 {
        lock(&self.model).latched_frames
    }

    /// Every byte the host has written
    pub fn received(&self) -> Vec<u8> {
        lock(&self.model).received.clone()
    }

    /// Every open attempt, in order
    pub fn opens(&self) -> Vec<OpenRecord> {
        lock(&self.model).opens.clone()
    }
}

impl PortOpener for SimulatedOpener {
    fn open(
        &mut self,
        port_name: &str,
        settings: PortSettings,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        let mut model = lock(&self.model);
        model.opens.push(OpenRecord {
            port_name: port_name.to_string(),
            baud_rate: settings.baud_rate,
            exclusive: settings.exclusive,
        });

        if model.failing_opens > 0 {
            model.failing_opens -= 1;
            return Err(ProtocolError::ConnectionFailed(format!(
                "{port_name}: simulated port busy"
            )));
        }

        tracing::debug!(port = port_name, baud_rate = settings.baud_rate, "simulated open");
        // The board resets when the port opens
        model.rx.clear();
        model.mode = Mode::Direct;
        let banner = model.boot_banner.clone();
        model.tx.extend(banner);
        drop(model);

        Ok(Box::new(SimulatedDevice {
            model: Arc::clone(&self.model),
            timeout: settings.timeout,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Session};
    use pretty_assertions::assert_eq;

    fn small(led_count: u16, initialized: bool) -> SimulatedOpener {
        SimulatedOpener::new(DeviceInfo {
            protocol_version: PROTOCOL_VERSION,
            led_count,
            led_pin: 6,
            initialized,
            brightness: 255,
        })
    }

    #[test]
    fn test_ping_and_info() {
        let sim = small(107, true);
        let mut device = sim.device();
        let mut session = Session::new(&mut device);
        session.ping().unwrap();
        assert_eq!(session.get_info().unwrap().led_count, 107);
    }

    #[test]
    fn test_unknown_opcode_answers_unknown_command() {
        let sim = small(4, true);
        let mut device = sim.device();
        device.write_all(&[0x99]).unwrap();
        let mut tag = [0u8; 1];
        device.read_exact(&mut tag).unwrap();
        assert_eq!(tag, [0xFF]);
    }

    #[test]
    fn test_split_frame_waits_for_payload() {
        let sim = small(4, true);
        let mut device = sim.device();
        device.write_all(&[0x20, 0x00]).unwrap();
        let mut tag = [0u8; 1];
        assert!(device.read_exact(&mut tag).unwrap_err().is_timeout());

        device.write_all(&[0x01, 1, 2, 3, 4]).unwrap();
        device.read_exact(&mut tag).unwrap();
        assert_eq!(tag, [0xF0]);
        assert_eq!(sim.shown_frame()[1], Rgbw::new(1, 2, 3, 4));
    }

    #[test]
    fn test_pixel_out_of_range() {
        let sim = small(4, true);
        let mut device = sim.device();
        let err = Session::new(&mut device)
            .expect(&Command::SetPixelRgbw {
                index: 4,
                color: Rgbw::OFF,
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DeviceError(ErrorCode::OutOfRange)));
    }

    #[test]
    fn test_uninitialized_strip_rejects_pixels() {
        let sim = small(4, false);
        let mut device = sim.device();
        let mut session = Session::new(&mut device);
        let err = session.expect(&Command::SetAllRgbw(Rgbw::white(9))).unwrap_err();
        assert!(matches!(err, ProtocolError::DeviceError(ErrorCode::NotInitialized)));

        session.expect(&Command::InitStrip).unwrap();
        session.expect(&Command::SetAllRgbw(Rgbw::white(9))).unwrap();
        assert_eq!(sim.shown_frame(), vec![Rgbw::white(9); 4]);
    }

    #[test]
    fn test_buffer_mode_latches_on_end() {
        let sim = small(3, true);
        let mut device = sim.device();
        let mut session = Session::new(&mut device);
        session.expect(&Command::BufferStart).unwrap();
        session
            .expect(&Command::BufferPixel {
                index: 2,
                color: Rgbw::from_rgb(0, 0, 9),
            })
            .unwrap();
        assert_eq!(sim.shown_frame()[2], Rgbw::OFF);
        session.expect(&Command::BufferEnd).unwrap();
        assert_eq!(sim.shown_frame()[2], Rgbw::from_rgb(0, 0, 9));
    }

    #[test]
    fn test_stream_overflow() {
        let sim = small(3, true);
        let mut device = sim.device();
        let mut session = Session::new(&mut device);
        session.expect(&Command::StreamStart { count: 1 }).unwrap();
        session.expect(&Command::StreamData(Rgbw::white(1))).unwrap();
        let err = session
            .expect(&Command::StreamData(Rgbw::white(2)))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DeviceError(ErrorCode::BufferOverflow)));
    }

    #[test]
    fn test_resize_ends_open_stream() {
        let sim = small(8, true);
        let mut device = sim.device();
        let mut session = Session::new(&mut device);
        session.expect(&Command::StreamStart { count: 5 }).unwrap();
        session.expect(&Command::StreamData(Rgbw::white(1))).unwrap();
        session.expect(&Command::SetLedCount(2)).unwrap();

        for _ in 0..3 {
            let err = session
                .expect(&Command::StreamData(Rgbw::white(2)))
                .unwrap_err();
            assert!(matches!(err, ProtocolError::DeviceError(ErrorCode::InvalidParam)));
        }
        assert_eq!(sim.info().led_count, 2);
        assert_eq!(sim.shown_frame(), vec![Rgbw::OFF; 2]);
    }

    #[test]
    fn test_gradient_endpoints() {
        let sim = small(5, true);
        let mut device = sim.device();
        Session::new(&mut device)
            .expect(&Command::FillGradient {
                start: 0,
                end: 4,
                from: Rgbw::new(0, 0, 0, 0),
                to: Rgbw::new(200, 0, 100, 0),
            })
            .unwrap();
        let frame = sim.shown_frame();
        assert_eq!(frame[0], Rgbw::OFF);
        assert_eq!(frame[2], Rgbw::new(100, 0, 50, 0));
        assert_eq!(frame[4], Rgbw::new(200, 0, 100, 0));
    }

    #[test]
    fn test_open_emits_banner_and_records() {
        let mut sim = small(4, true);
        let mut port = sim
            .open("/dev/ttyACM0", PortSettings::new(9600, Duration::from_millis(100)))
            .unwrap();
        let mut banner = vec![0u8; BOOT_BANNER.len()];
        port.read_exact(&mut banner).unwrap();
        assert_eq!(banner, BOOT_BANNER);
        assert_eq!(
            sim.opens(),
            vec![OpenRecord {
                port_name: "/dev/ttyACM0".to_string(),
                baud_rate: 9600,
                exclusive: false,
            }]
        );
    }
}
