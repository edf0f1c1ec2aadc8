//! Response frame decoding
//!
//! Every response starts with a single tag byte. Two tags carry a fixed
//! trailer:
//! - INFO (0xF2): 6 bytes: protocol version, LED count (u16, big-endian),
//!   data pin, initialized flag, brightness
//! - ERROR (0xFE): 1 byte error code
//!
//! A frame is only interpreted once all of its bytes have arrived. A short
//! read surfaces as [`ProtocolError::Timeout`] from the transport, never as
//! malformed data.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::{ProtocolError, Transport, Violation};

/// Length of the INFO trailer
pub const INFO_BODY_LEN: usize = 6;

/// Response tag bytes sent by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseTag {
    Ok = 0xF0,
    Pong = 0xF1,
    Info = 0xF2,
    Error = 0xFE,
    UnknownCommand = 0xFF,
}

impl ResponseTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0xF0 => Some(Self::Ok),
            0xF1 => Some(Self::Pong),
            0xF2 => Some(Self::Info),
            0xFE => Some(Self::Error),
            0xFF => Some(Self::UnknownCommand),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Number of bytes that follow the tag
    pub fn trailer_len(self) -> usize {
        match self {
            Self::Info => INFO_BODY_LEN,
            Self::Error => 1,
            _ => 0,
        }
    }
}

/// Faults reported by the controller in an ERROR frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    BufferOverflow = 0x01,
    InvalidParam = 0x02,
    NotInitialized = 0x03,
    OutOfRange = 0x04,
    Timeout = 0x05,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 5] = [
        ErrorCode::BufferOverflow,
        ErrorCode::InvalidParam,
        ErrorCode::NotInitialized,
        ErrorCode::OutOfRange,
        ErrorCode::Timeout,
    ];

    /// Resolve a wire byte. Unknown codes are a protocol violation, never a default.
    pub fn from_byte(byte: u8) -> Result<Self, Violation> {
        match byte {
            0x01 => Ok(Self::BufferOverflow),
            0x02 => Ok(Self::InvalidParam),
            0x03 => Ok(Self::NotInitialized),
            0x04 => Ok(Self::OutOfRange),
            0x05 => Ok(Self::Timeout),
            other => Err(Violation::UnknownErrorCode(other)),
        }
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::BufferOverflow => "BUFFER_OVERFLOW",
            Self::InvalidParam => "INVALID_PARAM",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of the controller configuration, as reported by GET_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub protocol_version: u8,
    pub led_count: u16,
    pub led_pin: u8,
    pub initialized: bool,
    pub brightness: u8,
}

impl DeviceInfo {
    pub fn from_bytes(body: &[u8; INFO_BODY_LEN]) -> Self {
        Self {
            protocol_version: body[0],
            led_count: BigEndian::read_u16(&body[1..3]),
            led_pin: body[3],
            initialized: body[4] != 0,
            brightness: body[5],
        }
    }

    pub fn to_bytes(&self) -> [u8; INFO_BODY_LEN] {
        let mut body = [0u8; INFO_BODY_LEN];
        body[0] = self.protocol_version;
        BigEndian::write_u16(&mut body[1..3], self.led_count);
        body[3] = self.led_pin;
        body[4] = u8::from(self.initialized);
        body[5] = self.brightness;
        body
    }
}

/// A fully decoded response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ok,
    Pong,
    Info(DeviceInfo),
    Error(ErrorCode),
    UnknownCommand,
}

impl Response {
    pub fn tag(&self) -> ResponseTag {
        match self {
            Response::Ok => ResponseTag::Ok,
            Response::Pong => ResponseTag::Pong,
            Response::Info(_) => ResponseTag::Info,
            Response::Error(_) => ResponseTag::Error,
            Response::UnknownCommand => ResponseTag::UnknownCommand,
        }
    }

    /// Encode as the controller would send it
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.tag().byte()];
        match self {
            Response::Info(info) => bytes.extend_from_slice(&info.to_bytes()),
            Response::Error(code) => bytes.push(code.byte()),
            _ => {}
        }
        bytes
    }
}

/// Decode one response frame from the transport.
///
/// Reads exactly one tag byte plus the tag's fixed trailer, under the
/// transport's current timeout.
pub fn decode_response<T: Transport + ?Sized>(transport: &mut T) -> Result<Response, ProtocolError> {
    let mut tag_byte = [0u8; 1];
    transport.read_exact(&mut tag_byte)?;
    let tag = ResponseTag::from_byte(tag_byte[0])
        .ok_or(Violation::UnknownResponseTag(tag_byte[0]))?;

    let response = match tag {
        ResponseTag::Ok => Response::Ok,
        ResponseTag::Pong => Response::Pong,
        ResponseTag::UnknownCommand => Response::UnknownCommand,
        ResponseTag::Error => {
            let mut code = [0u8; 1];
            transport.read_exact(&mut code)?;
            Response::Error(ErrorCode::from_byte(code[0])?)
        }
        ResponseTag::Info => {
            let mut body = [0u8; INFO_BODY_LEN];
            transport.read_exact(&mut body)?;
            Response::Info(DeviceInfo::from_bytes(&body))
        }
    };

    tracing::trace!(?response, "decoded response");
    Ok(response)
}
