//! Request/response sequencing
//!
//! A [`Session`] borrows a transport for the duration of one or more
//! exchanges. Each exchange is: reset input, write frame, flush, read exactly
//! one response frame. Nothing is retried here; retry policy belongs to the
//! caller.

use std::time::Duration;

use super::{
    decode_response, Command, DeviceInfo, ProtocolError, Response, ResponseTag, Transport,
    Violation, BULK_TIMEOUT_MS,
};
use crate::pixel::Rgbw;

/// Synchronous command sequencer over a borrowed transport
pub struct Session<'a, T: Transport + ?Sized> {
    pub(super) transport: &'a mut T,
    pub(super) bulk_timeout: Duration,
    sent: u64,
}

impl<'a, T: Transport + ?Sized> Session<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            bulk_timeout: Duration::from_millis(BULK_TIMEOUT_MS),
            sent: 0,
        }
    }

    /// Override the timeout used around bulk handshakes
    pub fn with_bulk_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_timeout = timeout;
        self
    }

    /// Commands written through this session, answered or not
    pub fn commands_sent(&self) -> u64 {
        self.sent
    }

    /// Send one command and read exactly one response frame.
    ///
    /// An ERROR frame becomes [`ProtocolError::DeviceError`]; every other
    /// response is returned as-is, including UNKNOWN_COMMAND.
    pub fn execute(&mut self, command: &Command) -> Result<Response, ProtocolError> {
        let frame = command.encode();
        tracing::trace!(opcode = ?command.opcode(), "sending {:02x?}", frame);

        // Stale bytes from an aborted exchange or the boot banner would be
        // read as this command's response
        self.transport.reset_input_buffer()?;
        self.transport.write_all(&frame)?;
        self.sent += 1;
        self.transport.flush()?;

        match decode_response(&mut *self.transport)? {
            Response::Error(code) => Err(ProtocolError::DeviceError(code)),
            response => Ok(response),
        }
    }

    /// Execute and require the command's expected response tag
    pub fn expect(&mut self, command: &Command) -> Result<Response, ProtocolError> {
        let response = self.execute(command)?;
        let expected = command.expected_response();
        if response.tag() != expected {
            return Err(Violation::UnexpectedResponse {
                expected,
                actual: response.tag(),
            }
            .into());
        }
        Ok(response)
    }

    /// PING; succeeds only on PONG
    pub fn ping(&mut self) -> Result<(), ProtocolError> {
        self.expect(&Command::Ping).map(|_| ())
    }

    /// GET_INFO
    pub fn get_info(&mut self) -> Result<DeviceInfo, ProtocolError> {
        match self.expect(&Command::GetInfo)? {
            Response::Info(info) => Ok(info),
            other => Err(Violation::UnexpectedResponse {
                expected: ResponseTag::Info,
                actual: other.tag(),
            }
            .into()),
        }
    }

    /// Buffered frame: BUFFER_START, one BUFFER_PIXEL per entry, BUFFER_END.
    /// The strip only updates on BUFFER_END.
    pub fn buffer_update(&mut self, pixels: &[(u16, Rgbw)]) -> Result<(), ProtocolError> {
        self.expect(&Command::BufferStart)?;
        for &(index, color) in pixels {
            self.expect(&Command::BufferPixel { index, color })?;
        }
        self.expect(&Command::BufferEnd)?;
        Ok(())
    }

    /// Streamed frame: STREAM_START with the count, one STREAM_DATA per
    /// pixel in order, STREAM_END. Each pixel is a round trip; prefer
    /// [`bulk_update`](Self::bulk_update) for full frames.
    pub fn stream_update(&mut self, pixels: &[Rgbw]) -> Result<(), ProtocolError> {
        let count = u16::try_from(pixels.len()).map_err(|_| {
            ProtocolError::InvalidParameter(format!("{} pixels exceed u16 count", pixels.len()))
        })?;
        self.expect(&Command::StreamStart { count })?;
        for &color in pixels {
            self.expect(&Command::StreamData(color))?;
        }
        self.expect(&Command::StreamEnd)?;
        Ok(())
    }
}
