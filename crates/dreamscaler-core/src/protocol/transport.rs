//! Byte transport abstraction
//!
//! The session and the bulk engine only ever see a [`Transport`]. The real
//! implementation is [`SerialTransport`](super::SerialTransport); tests and
//! demo mode plug in [`SimulatedDevice`](super::sim::SimulatedDevice).

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// A byte-oriented, unframed link to the controller
pub trait Transport: Send {
    /// Write all bytes to the link
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Fill `buf` completely within the current timeout.
    ///
    /// Fewer bytes than requested before the deadline is
    /// [`ProtocolError::Timeout`].
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError>;

    /// Block until written bytes have left the host
    fn flush(&mut self) -> Result<(), ProtocolError>;

    /// Discard anything received but not yet read
    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError>;

    /// Discard anything written but not yet transmitted
    fn reset_output_buffer(&mut self) -> Result<(), ProtocolError>;

    /// Set the per-read timeout
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError>;

    /// Current per-read timeout
    fn timeout(&self) -> Duration;

    /// Drop DTR and RTS
    fn clear_flow_control(&mut self) -> Result<(), ProtocolError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        (**self).write_all(bytes)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        (**self).read_exact(buf)
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        (**self).flush()
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        (**self).reset_input_buffer()
    }

    fn reset_output_buffer(&mut self) -> Result<(), ProtocolError> {
        (**self).reset_output_buffer()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn clear_flow_control(&mut self) -> Result<(), ProtocolError> {
        (**self).clear_flow_control()
    }
}

/// Parameters used to open a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub timeout: Duration,
    /// Request exclusive access (honored on Unix; always exclusive on Windows)
    pub exclusive: bool,
}

impl PortSettings {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self {
            baud_rate,
            timeout,
            exclusive: false,
        }
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

/// Opens named ports. The connection and the recovery routine never open a
/// port any other way.
pub trait PortOpener: Send {
    fn open(
        &mut self,
        port_name: &str,
        settings: PortSettings,
    ) -> Result<Box<dyn Transport>, ProtocolError>;
}

/// Raises the transport timeout for the lifetime of the guard and restores
/// the previous value when dropped, on every exit path.
pub struct ExtendedTimeout<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    previous: Duration,
}

impl<'a, T: Transport + ?Sized> ExtendedTimeout<'a, T> {
    pub fn new(transport: &'a mut T, timeout: Duration) -> Result<Self, ProtocolError> {
        let previous = transport.timeout();
        transport.set_timeout(timeout)?;
        Ok(Self {
            transport,
            previous,
        })
    }
}

impl<T: Transport + ?Sized> Deref for ExtendedTimeout<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<T: Transport + ?Sized> DerefMut for ExtendedTimeout<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.transport
    }
}

impl<T: Transport + ?Sized> Drop for ExtendedTimeout<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.set_timeout(self.previous) {
            tracing::warn!("failed to restore timeout to {:?}: {e}", self.previous);
        }
    }
}

/// Bytes that crossed a transport in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteCounts {
    pub tx: u64,
    pub rx: u64,
}

impl std::ops::AddAssign for ByteCounts {
    fn add_assign(&mut self, other: Self) {
        self.tx += other.tx;
        self.rx += other.rx;
    }
}

/// Counts every byte written to and read from the wrapped transport.
///
/// Writes are counted once accepted by the inner transport, reads once
/// delivered to the caller; bytes discarded by a buffer reset are not.
pub struct Metered<T> {
    inner: T,
    counts: ByteCounts,
}

impl<T: Transport> Metered<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            counts: ByteCounts::default(),
        }
    }

    pub fn counts(&self) -> ByteCounts {
        self.counts
    }
}

impl<T: Transport> Transport for Metered<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.inner.write_all(bytes)?;
        self.counts.tx += bytes.len() as u64;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        self.inner.read_exact(buf)?;
        self.counts.rx += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        self.inner.flush()
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        self.inner.reset_input_buffer()
    }

    fn reset_output_buffer(&mut self) -> Result<(), ProtocolError> {
        self.inner.reset_output_buffer()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        self.inner.set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    fn clear_flow_control(&mut self) -> Result<(), ProtocolError> {
        self.inner.clear_flow_control()
    }
}
