//! # simmflash
//!
//! Host-side protocol engine for the USB ROM SIMM programmer board.
//!
//! The board speaks a byte-oriented command/reply protocol over a USB CDC
//! serial port. This crate provides:
//!
//! - The [`Programmer`] state machine: write (with erase, partial erase,
//!   chip masks and verification), read, chip identification, the
//!   shorted-pin electrical test and firmware flashing
//! - Bootloader/programmer mode negotiation across the board's reboot
//! - Feature negotiation with older board firmware
//! - SIMM geometry helpers: chip masks, regions and per-chip interleaving
//! - Port discovery and a polling port watcher for attach/detach events
//!
//! ## Features
//!
//! - `native` (default): serial port I/O and port discovery via `serialport`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::sync::mpsc;
//!
//! use simmflash::{HostEvent, NativeTransport, Programmer, ProgrammerEvent, VerifyMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (host_tx, host_rx) = mpsc::channel::<HostEvent>();
//!     let (event_tx, event_rx) = mpsc::channel::<ProgrammerEvent>();
//!
//!     let mut programmer = Programmer::new(NativeTransport::new(host_tx), event_tx);
//!     programmer.set_port_name(simmflash::auto_detect_port()?.name);
//!     programmer.set_verify_mode(VerifyMode::AfterWrite);
//!     programmer.begin_write(File::open("rom.bin")?, Default::default())?;
//!
//!     while programmer.is_busy() {
//!         programmer.handle_event(host_rx.recv()?);
//!         for event in event_rx.try_iter() {
//!             println!("{event:?}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod host;
pub mod port;
pub mod presence;
pub mod programmer;
pub mod protocol;
pub mod simm;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use host::auto_detect_port;
#[cfg(feature = "native")]
pub use port::NativeTransport;
pub use {
    device::{BoardKind, DetectedPort, UsbId},
    error::{Error, Result},
    host::{HostEvent, UsbPortEvent, discover_ports, discover_programmer_ports},
    port::{SerialConfig, Transport},
    presence::{DevicePresence, PresenceState},
    programmer::{
        ChipIds, DataSink, DataSource, ElectricalTestStatus, FirmwareFlashStatus,
        IdentificationResult, IdentificationStatus, Phase, Programmer, ProgrammerEvent,
        ReadStatus, StartStatus, VerifyMode, WriteOptions, WriteStatus,
    },
    protocol::pin_name,
    simm::{
        AddressMode, ChipMask, ChipType, Region, SimmConfig, deinterleave, interleave,
        parse_capacity,
    },
};
