//! Protocol commands
//!
//! Every command is one opcode byte followed by a payload whose length is
//! fixed by the opcode. Multi-byte integers are big-endian.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::frame::ResponseTag;
use crate::pixel::Rgbw;

/// Opcode bytes understood by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Ping = 0x01,
    GetInfo = 0x02,
    Reset = 0x03,

    SetLedCount = 0x10,
    SetLedPin = 0x11,
    InitStrip = 0x12,

    SetPixelRgbw = 0x20,
    SetPixelRgb = 0x21,
    SetPixelW = 0x22,

    SetRangeRgbw = 0x30,
    SetAllRgbw = 0x31,
    ClearAll = 0x32,

    BufferStart = 0x40,
    BufferPixel = 0x41,
    BufferEnd = 0x42,

    StreamStart = 0x50,
    StreamData = 0x51,
    StreamEnd = 0x52,

    BulkUpdate = 0x55,

    Sync = 0x60,

    FillGradient = 0x70,
    Brightness = 0x71,
}

impl Opcode {
    pub const ALL: [Opcode; 22] = [
        Opcode::Ping,
        Opcode::GetInfo,
        Opcode::Reset,
        Opcode::SetLedCount,
        Opcode::SetLedPin,
        Opcode::InitStrip,
        Opcode::SetPixelRgbw,
        Opcode::SetPixelRgb,
        Opcode::SetPixelW,
        Opcode::SetRangeRgbw,
        Opcode::SetAllRgbw,
        Opcode::ClearAll,
        Opcode::BufferStart,
        Opcode::BufferPixel,
        Opcode::BufferEnd,
        Opcode::StreamStart,
        Opcode::StreamData,
        Opcode::StreamEnd,
        Opcode::BulkUpdate,
        Opcode::Sync,
        Opcode::FillGradient,
        Opcode::Brightness,
    ];

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.byte() == byte)
    }

    /// Payload length in bytes, excluding the opcode.
    ///
    /// For BULK_UPDATE this is only the count header; the pixel stream that
    /// follows the ready handshake is not part of the command frame.
    pub fn payload_len(self) -> usize {
        match self {
            Opcode::Ping
            | Opcode::GetInfo
            | Opcode::Reset
            | Opcode::InitStrip
            | Opcode::ClearAll
            | Opcode::BufferStart
            | Opcode::BufferEnd
            | Opcode::StreamEnd
            | Opcode::Sync => 0,
            Opcode::SetLedPin | Opcode::Brightness => 1,
            Opcode::SetLedCount | Opcode::StreamStart | Opcode::BulkUpdate => 2,
            Opcode::SetPixelW => 3,
            Opcode::SetAllRgbw | Opcode::StreamData => 4,
            Opcode::SetPixelRgb => 5,
            Opcode::SetPixelRgbw | Opcode::BufferPixel => 6,
            Opcode::SetRangeRgbw => 8,
            Opcode::FillGradient => 12,
        }
    }

    /// Total frame length: opcode plus payload
    pub fn frame_len(self) -> usize {
        1 + self.payload_len()
    }
}

/// A command with its typed payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    GetInfo,
    Reset,
    SetLedCount(u16),
    SetLedPin(u8),
    InitStrip,
    SetPixelRgbw { index: u16, color: Rgbw },
    SetPixelRgb { index: u16, r: u8, g: u8, b: u8 },
    SetPixelW { index: u16, w: u8 },
    /// `end` is inclusive
    SetRangeRgbw { start: u16, end: u16, color: Rgbw },
    SetAllRgbw(Rgbw),
    ClearAll,
    BufferStart,
    BufferPixel { index: u16, color: Rgbw },
    BufferEnd,
    StreamStart { count: u16 },
    StreamData(Rgbw),
    StreamEnd,
    /// Count header of a bulk transfer; see [`Session::bulk_update`](super::Session::bulk_update)
    BulkUpdate { count: u16 },
    Sync,
    FillGradient { start: u16, end: u16, from: Rgbw, to: Rgbw },
    Brightness(u8),
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Ping => Opcode::Ping,
            Command::GetInfo => Opcode::GetInfo,
            Command::Reset => Opcode::Reset,
            Command::SetLedCount(_) => Opcode::SetLedCount,
            Command::SetLedPin(_) => Opcode::SetLedPin,
            Command::InitStrip => Opcode::InitStrip,
            Command::SetPixelRgbw { .. } => Opcode::SetPixelRgbw,
            Command::SetPixelRgb { .. } => Opcode::SetPixelRgb,
            Command::SetPixelW { .. } => Opcode::SetPixelW,
            Command::SetRangeRgbw { .. } => Opcode::SetRangeRgbw,
            Command::SetAllRgbw(_) => Opcode::SetAllRgbw,
            Command::ClearAll => Opcode::ClearAll,
            Command::BufferStart => Opcode::BufferStart,
            Command::BufferPixel { .. } => Opcode::BufferPixel,
            Command::BufferEnd => Opcode::BufferEnd,
            Command::StreamStart { .. } => Opcode::StreamStart,
            Command::StreamData(_) => Opcode::StreamData,
            Command::StreamEnd => Opcode::StreamEnd,
            Command::BulkUpdate { .. } => Opcode::BulkUpdate,
            Command::Sync => Opcode::Sync,
            Command::FillGradient { .. } => Opcode::FillGradient,
            Command::Brightness(_) => Opcode::Brightness,
        }
    }

    /// The response tag a successful execution produces
    pub fn expected_response(&self) -> ResponseTag {
        match self {
            Command::Ping => ResponseTag::Pong,
            Command::GetInfo => ResponseTag::Info,
            _ => ResponseTag::Ok,
        }
    }

    /// Encode into a complete frame of exactly `opcode().frame_len()` bytes
    pub fn encode(&self) -> Vec<u8> {
        let builder = FrameBuilder::new(self.opcode());
        let builder = match *self {
            Command::Ping
            | Command::GetInfo
            | Command::Reset
            | Command::InitStrip
            | Command::ClearAll
            | Command::BufferStart
            | Command::BufferEnd
            | Command::StreamEnd
            | Command::Sync => builder,
            Command::SetLedCount(count) => builder.u16_be(count),
            Command::SetLedPin(pin) => builder.byte(pin),
            Command::SetPixelRgbw { index, color } | Command::BufferPixel { index, color } => {
                builder.u16_be(index).rgbw(color)
            }
            Command::SetPixelRgb { index, r, g, b } => {
                builder.u16_be(index).byte(r).byte(g).byte(b)
            }
            Command::SetPixelW { index, w } => builder.u16_be(index).byte(w),
            Command::SetRangeRgbw { start, end, color } => {
                builder.u16_be(start).u16_be(end).rgbw(color)
            }
            Command::SetAllRgbw(color) | Command::StreamData(color) => builder.rgbw(color),
            Command::StreamStart { count } | Command::BulkUpdate { count } => {
                builder.u16_be(count)
            }
            Command::FillGradient {
                start,
                end,
                from,
                to,
            } => builder.u16_be(start).u16_be(end).rgbw(from).rgbw(to),
            Command::Brightness(level) => builder.byte(level),
        };

        let frame = builder.build();
        debug_assert_eq!(frame.len(), self.opcode().frame_len());
        frame
    }
}

/// Builder for fixed-layout command frames
pub struct FrameBuilder {
    bytes: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(opcode: Opcode) -> Self {
        let mut bytes = Vec::with_capacity(opcode.frame_len());
        bytes.push(opcode.byte());
        Self { bytes }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.bytes.push(b);
        self
    }

    /// Add a 16-bit value (big-endian)
    pub fn u16_be(mut self, value: u16) -> Self {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Add a color as R, G, B, W
    pub fn rgbw(mut self, color: Rgbw) -> Self {
        self.bytes.extend_from_slice(&color.to_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}
