//! Host-side events and port discovery helpers.
//!
//! Everything that happens outside the engine (bytes from the serial reader
//! thread, USB arrivals and removals from the port watcher, reader failures)
//! is funneled into one channel of [`HostEvent`]s. The owner of the
//! [`Programmer`](crate::Programmer) drains that channel and hands each event
//! to [`Programmer::handle_event`](crate::Programmer::handle_event).

use crate::device::DetectedPort;

/// USB serial device arrival or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbPortEvent {
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// Serial port name/path of the device.
    pub port_name: String,
}

impl UsbPortEvent {
    /// Create an event.
    pub fn new(vid: u16, pid: u16, port_name: impl Into<String>) -> Self {
        Self {
            vid,
            pid,
            port_name: port_name.into(),
        }
    }
}

/// Event delivered to the engine by the host loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Bytes received from the board.
    Data(Vec<u8>),
    /// A USB serial device appeared (after the settle delay).
    Attached(UsbPortEvent),
    /// A USB serial device went away.
    Detached(UsbPortEvent),
    /// The serial reader failed while the port was open.
    PortError(String),
}

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports that belong to programmer boards.
#[must_use]
pub fn discover_programmer_ports() -> Vec<DetectedPort> {
    crate::device::detect_programmer_ports()
}

/// Auto-detect the programmer board.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> crate::Result<DetectedPort> {
    crate::device::auto_detect_port()
}
