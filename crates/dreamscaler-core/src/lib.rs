//! # DreamScaler Core Library
//!
//! Host side of the DreamScaler LED strip controller: a microcontroller
//! driving 144 SK6812 RGBW pixels mounted behind a 49-key keyboard.
//!
//! This library provides:
//! - The binary command/response protocol and its codec
//! - A serial transport with timeouts and buffer control
//! - The bulk frame transfer with its two-step handshake
//! - Connection lifecycle, including forced release of a wedged port
//! - A simulated controller for tests and demo mode
//!
//! ## Example
//!
//! ```rust,ignore
//! use dreamscaler_core::prelude::*;
//!
//! let mut conn = Connection::new(ConnectionConfig::new("/dev/ttyACM0"));
//! let info = conn.connect()?;
//!
//! let frame = vec![Rgbw::from_rgb(255, 0, 0); usize::from(info.led_count)];
//! conn.bulk_update(&frame)?;
//! conn.disconnect();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cleanup;
pub mod pixel;
pub mod protocol;
pub mod sink;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cleanup::{CleanupGuard, CleanupHook};
    pub use crate::pixel::{hsv_to_rgb, rgb_to_rgbw, Rgbw};
    pub use crate::protocol::{
        Connection, ConnectionConfig, ConnectionState, DeviceInfo, ErrorCode, ProtocolError,
    };
    pub use crate::sink::{FrameBuffer, PixelSink};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
