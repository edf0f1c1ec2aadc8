//! Bulk frame transfer
//!
//! The fast path for full-strip updates. One exchange, two handshakes:
//!
//! 1. host: `BULK_UPDATE` + pixel count (u16, big-endian)
//! 2. controller: `OK` once its receive buffer is ready
//! 3. host: `count * 4` raw RGBW bytes, no framing
//! 4. controller: `OK` once the frame is latched onto the strip
//!
//! The payload is never written before the first `OK`. If it were, the
//! controller would parse pixel bytes as opcodes and the link would stay
//! desynchronized.

use super::{
    decode_response, Command, ExtendedTimeout, ProtocolError, Response, ResponseTag, Session,
    Transport, Violation,
};
use crate::pixel::Rgbw;

/// Bytes per pixel on the wire
pub const BYTES_PER_PIXEL: usize = 4;

impl<T: Transport + ?Sized> Session<'_, T> {
    /// Push a full frame, pixel 0 first
    pub fn bulk_update(&mut self, pixels: &[Rgbw]) -> Result<(), ProtocolError> {
        let payload: Vec<u8> = pixels.iter().flat_map(|p| p.to_bytes()).collect();
        self.bulk_update_bytes(&payload)
    }

    /// Push a frame already flattened to R, G, B, W bytes.
    ///
    /// The count header is derived from `payload.len()`; a length that is not
    /// a whole number of pixels is rejected before anything is sent.
    pub fn bulk_update_bytes(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let pixels = payload.len() / BYTES_PER_PIXEL;
        let declared = pixels * BYTES_PER_PIXEL;
        if declared != payload.len() {
            return Err(ProtocolError::PayloadMismatch {
                declared,
                actual: payload.len(),
            });
        }
        let count = u16::try_from(pixels).map_err(|_| {
            ProtocolError::InvalidParameter(format!("{pixels} pixels exceed u16 count"))
        })?;
        let header = Command::BulkUpdate { count }.encode();

        self.transport.reset_input_buffer()?;
        let mut link = ExtendedTimeout::new(&mut *self.transport, self.bulk_timeout)?;

        link.write_all(&header)?;
        link.flush()?;
        await_ok(&mut *link, "ready")?;

        link.write_all(payload)?;
        link.flush()?;
        await_ok(&mut *link, "latch")?;

        tracing::trace!(pixels, "bulk frame latched");
        Ok(())
    }
}

fn await_ok<T: Transport + ?Sized>(transport: &mut T, stage: &str) -> Result<(), ProtocolError> {
    let result = match decode_response(transport) {
        Ok(Response::Ok) => Ok(()),
        Ok(Response::Error(code)) => Err(ProtocolError::DeviceError(code)),
        Ok(other) => Err(Violation::UnexpectedResponse {
            expected: ResponseTag::Ok,
            actual: other.tag(),
        }
        .into()),
        Err(e) => Err(e),
    };

    if let Err(ref e) = result {
        tracing::debug!(stage, "bulk handshake failed: {e}");
    }
    result
}
