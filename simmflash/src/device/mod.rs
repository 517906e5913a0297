//! Programmer board discovery and classification.
//!
//! Boards enumerate as USB CDC serial ports. They are recognized by USB
//! vendor/product ID; [`watch`] turns periodic scans into attach/detach
//! events.

#[cfg(feature = "native")]
pub mod watch;

#[cfg(feature = "native")]
use {
    crate::error::{Error, Result},
    log::{debug, info, trace},
};

/// USB vendor/product ID pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsbId {
    /// Vendor ID.
    pub vid: u16,
    /// Product ID.
    pub pid: u16,
}

impl UsbId {
    /// Create an ID pair.
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// Known programmer board kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoardKind {
    /// Current programmer board.
    SimmProgrammer,
    /// Older programmer board (Atmel LUFA CDC IDs).
    LegacySimmProgrammer,
    /// Anything else.
    Unknown,
}

/// Known USB IDs of programmer boards.
const KNOWN_USB_DEVICES: &[(UsbId, BoardKind)] = &[
    (UsbId::new(0x16D0, 0x06AA), BoardKind::SimmProgrammer),
    (UsbId::new(0x03EB, 0x204B), BoardKind::LegacySimmProgrammer),
];

/// USB IDs the presence tracker and port watcher match against.
pub fn programmer_ids() -> Vec<UsbId> {
    KNOWN_USB_DEVICES.iter().map(|(id, _)| *id).collect()
}

impl BoardKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(id, _)| id.vid == vid && id.pid == pid)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SimmProgrammer => "SIMM Programmer",
            Self::LegacySimmProgrammer => "SIMM Programmer (legacy IDs)",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a programmer board.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered serial port.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g. "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified board kind.
    pub board: BoardKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Whether this port belongs to a programmer board.
    pub fn is_programmer(&self) -> bool {
        self.board.is_known()
    }

    /// USB ID pair, if the port is a USB device.
    pub fn usb_id(&self) -> Option<UsbId> {
        Some(UsbId::new(self.vid?, self.pid?))
    }
}

/// Enumerate all serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info.port_name.clone(),
                    board: BoardKind::Unknown,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.board = BoardKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Board: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.board
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Enumerate serial ports (no native serial support compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Enumerate ports that belong to programmer boards.
pub fn detect_programmer_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_programmer)
        .collect()
}

/// Find the programmer board, preferring current boards over legacy IDs.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_programmer_ports();

    let port = ports
        .iter()
        .find(|p| p.board == BoardKind::SimmProgrammer)
        .or_else(|| ports.first())
        .cloned()
        .ok_or(Error::DeviceNotFound)?;

    info!("Auto-detected {}: {}", port.board.name(), port.name);
    Ok(port)
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if port.board.is_known() {
            format!(" [{}]", port.board.name())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, device_info, product_info));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            board: match (vid, pid) {
                (Some(v), Some(p)) => BoardKind::from_vid_pid(v, p),
                _ => BoardKind::Unknown,
            },
            vid,
            pid,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    #[test]
    fn test_board_kind_from_vid_pid() {
        assert_eq!(BoardKind::from_vid_pid(0x16D0, 0x06AA), BoardKind::SimmProgrammer);
        assert_eq!(
            BoardKind::from_vid_pid(0x03EB, 0x204B),
            BoardKind::LegacySimmProgrammer
        );
        assert_eq!(BoardKind::from_vid_pid(0x16D0, 0x0001), BoardKind::Unknown);
        assert_eq!(BoardKind::from_vid_pid(0x1A86, 0x7523), BoardKind::Unknown);
    }

    #[test]
    fn test_programmer_ids() {
        let ids = programmer_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&UsbId::new(0x16D0, 0x06AA)));
        assert!(ids.contains(&UsbId::new(0x03EB, 0x204B)));
    }

    #[test]
    fn test_detected_port_usb_id() {
        let p = port("/dev/ttyACM0", Some(0x16D0), Some(0x06AA));
        assert!(p.is_programmer());
        assert_eq!(p.usb_id(), Some(UsbId::new(0x16D0, 0x06AA)));

        let serial = port("/dev/ttyS0", None, None);
        assert!(!serial.is_programmer());
        assert_eq!(serial.usb_id(), None);
    }

    #[test]
    fn test_format_port_list() {
        let mut known = port("/dev/ttyACM0", Some(0x16D0), Some(0x06AA));
        known.product = Some("ROM SIMM Programmer".to_string());
        let ports = vec![
            known,
            port("/dev/ttyUSB1", Some(0x1A86), Some(0x7523)),
            port("/dev/ttyS0", None, None),
        ];

        let formatted = format_port_list(&ports);
        assert_eq!(formatted.len(), 3);
        assert_eq!(
            formatted[0],
            "/dev/ttyACM0 [SIMM Programmer] - ROM SIMM Programmer"
        );
        assert_eq!(formatted[1], "/dev/ttyUSB1 [VID:1A86 PID:7523]");
        assert_eq!(formatted[2], "/dev/ttyS0");
    }
}
