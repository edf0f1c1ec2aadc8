//! Pixel colors
//!
//! Every pixel on the strip has four independent 8-bit channels. Channel
//! values are carried as `u8`, so anything above 255 is rejected at the
//! boundary where wider integers come in (see [`Rgbw::try_from_channels`])
//! and can never reach the wire.

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Four-channel SK6812 pixel color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgbw {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

impl Rgbw {
    /// All channels off
    pub const OFF: Rgbw = Rgbw::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w }
    }

    /// RGB color with the white channel off
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, w: 0 }
    }

    /// Only the dedicated white LED lit
    pub const fn white(w: u8) -> Self {
        Self { r: 0, g: 0, b: 0, w }
    }

    /// Build a color from wider integers, rejecting anything outside 0..=255
    pub fn try_from_channels(r: i32, g: i32, b: i32, w: i32) -> Result<Self, ProtocolError> {
        fn channel(name: &str, value: i32) -> Result<u8, ProtocolError> {
            u8::try_from(value).map_err(|_| {
                ProtocolError::InvalidParameter(format!(
                    "channel {name} = {value} is outside 0..=255"
                ))
            })
        }

        Ok(Self {
            r: channel("r", r)?,
            g: channel("g", g)?,
            b: channel("b", b)?,
            w: channel("w", w)?,
        })
    }

    /// Wire order: R, G, B, W
    pub const fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.w]
    }

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }

    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }
}

impl From<(u8, u8, u8, u8)> for Rgbw {
    fn from((r, g, b, w): (u8, u8, u8, u8)) -> Self {
        Self::new(r, g, b, w)
    }
}

/// Convert HSV to RGB
/// h: hue (0-360)
/// s: saturation (0-1)
/// v: value/brightness (0-1)
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let h = h.rem_euclid(360.0);
    let s = s.clamp(0.0, 1.0);
    let v = v.clamp(0.0, 1.0);

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

/// Move the common grey component of an RGB color onto the white LED
pub fn rgb_to_rgbw(r: u8, g: u8, b: u8) -> Rgbw {
    let w = r.min(g).min(b);
    Rgbw::new(r - w, g - w, b - w, w)
}
