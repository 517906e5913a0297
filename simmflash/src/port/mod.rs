//! Transport abstraction for the programmer's USB CDC serial link.
//!
//! The engine never reads from the transport: received bytes arrive as
//! [`HostEvent::Data`](crate::HostEvent::Data) and are pushed into the engine
//! by the host loop. The transport only needs to open a port by name, write
//! bytes and close.
//!
//! ```text
//! +------------------+        +------------------+
//! |    Programmer    | -----> |  Transport trait |
//! |  (state machine) | writes +--------+---------+
//! +--------+---------+                 |
//!          ^                           v
//!          |  HostEvent::Data  +-------+----------+
//!          +------------------ | NativeTransport  |
//!              (mpsc)          | reader thread    |
//!                              +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate. The board is a CDC device and ignores it, but the host
    /// driver still wants one.
    pub baud_rate: u32,
    /// How long a single read may block before the reader thread checks
    /// whether it should stop.
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            read_timeout: Duration::from_millis(50),
        }
    }
}

impl SerialConfig {
    /// Set the read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Byte sink the engine writes commands and data chunks to.
pub trait Transport {
    /// Open the named port, closing any previously open one.
    fn open(&mut self, port_name: &str) -> Result<()>;

    /// Close the port. Closing a closed port is a no-op.
    fn close(&mut self);

    /// Whether a port is currently open.
    fn is_open(&self) -> bool;

    /// Write all bytes.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()>;
}

#[cfg(feature = "native")]
pub use native::NativeTransport;
