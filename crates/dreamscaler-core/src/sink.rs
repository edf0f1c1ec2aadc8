//! Frame sinks
//!
//! Effects render into a [`PixelSink`] and never see the wire protocol. The
//! controller connection is one sink; [`FrameBuffer`] is another, kept in
//! memory for previews and tests.

use crate::pixel::Rgbw;
use crate::protocol::{Connection, ProtocolError};

/// Something that can display a strip's worth of pixels
pub trait PixelSink {
    /// Number of addressable pixels
    fn pixel_count(&self) -> usize;

    /// Set and show a single pixel
    fn set_pixel(&mut self, index: usize, color: Rgbw) -> Result<(), ProtocolError>;

    /// Replace the whole strip with `frame`, pixel 0 first
    fn show_frame(&mut self, frame: &[Rgbw]) -> Result<(), ProtocolError>;

    /// Turn every pixel off
    fn clear(&mut self) -> Result<(), ProtocolError>;
}

fn pixel_index(index: usize) -> Result<u16, ProtocolError> {
    u16::try_from(index)
        .map_err(|_| ProtocolError::InvalidParameter(format!("pixel index {index} out of range")))
}

impl PixelSink for Connection {
    fn pixel_count(&self) -> usize {
        usize::from(self.led_count())
    }

    fn set_pixel(&mut self, index: usize, color: Rgbw) -> Result<(), ProtocolError> {
        Connection::set_pixel(self, pixel_index(index)?, color)
    }

    /// Frames go out through the bulk transfer
    fn show_frame(&mut self, frame: &[Rgbw]) -> Result<(), ProtocolError> {
        self.bulk_update(frame)
    }

    fn clear(&mut self) -> Result<(), ProtocolError> {
        self.clear_all()
    }
}

/// In-memory strip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pixels: Vec<Rgbw>,
    frames_shown: u64,
}

impl FrameBuffer {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            pixels: vec![Rgbw::OFF; pixel_count],
            frames_shown: 0,
        }
    }

    pub fn pixels(&self) -> &[Rgbw] {
        &self.pixels
    }

    /// Number of updates shown so far
    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }
}

impl PixelSink for FrameBuffer {
    fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgbw) -> Result<(), ProtocolError> {
        let pixel = self.pixels.get_mut(index).ok_or_else(|| {
            ProtocolError::InvalidParameter(format!("pixel index {index} out of range"))
        })?;
        *pixel = color;
        self.frames_shown += 1;
        Ok(())
    }

    fn show_frame(&mut self, frame: &[Rgbw]) -> Result<(), ProtocolError> {
        if frame.len() > self.pixels.len() {
            return Err(ProtocolError::InvalidParameter(format!(
                "frame of {} pixels on a {}-pixel strip",
                frame.len(),
                self.pixels.len()
            )));
        }
        self.pixels[..frame.len()].copy_from_slice(frame);
        self.frames_shown += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), ProtocolError> {
        self.pixels.fill(Rgbw::OFF);
        self.frames_shown += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_buffer_partial_frame() {
        let mut fb = FrameBuffer::new(4);
        fb.show_frame(&[Rgbw::white(1), Rgbw::white(2)]).unwrap();
        assert_eq!(
            fb.pixels(),
            &[Rgbw::white(1), Rgbw::white(2), Rgbw::OFF, Rgbw::OFF]
        );
        assert_eq!(fb.frames_shown(), 1);
    }

    #[test]
    fn test_frame_buffer_rejects_oversized() {
        let mut fb = FrameBuffer::new(2);
        assert!(fb.show_frame(&[Rgbw::OFF; 3]).is_err());
        assert!(fb.set_pixel(2, Rgbw::OFF).is_err());
        assert_eq!(fb.frames_shown(), 0);
    }

    #[test]
    fn test_frame_buffer_clear() {
        let mut fb = FrameBuffer::new(3);
        fb.set_pixel(1, Rgbw::from_rgb(9, 9, 9)).unwrap();
        fb.clear().unwrap();
        assert!(fb.pixels().iter().all(Rgbw::is_off));
    }
}
