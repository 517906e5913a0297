//! The programmer protocol engine.
//!
//! [`Programmer`] is a byte-driven state machine. A `begin_*` driver checks
//! local preconditions, stores the operation in a session and starts mode
//! negotiation; from then on every byte handed to [`Programmer::handle_data`]
//! advances the machine by one step. Results come out as
//! [`ProgrammerEvent`]s on the channel given at construction.
//!
//! The engine never blocks and owns no timers or threads. When the board has
//! to reboot into the other firmware, the engine closes the port and resumes
//! on the next matching [`HostEvent::Attached`]. Deadlines belong to the
//! owner, who calls [`Programmer::handle_timeout`] when one expires.
//!
//! ```rust,no_run
//! use std::sync::mpsc;
//! use simmflash::{
//!     ChipType, DataSink, HostEvent, NativeTransport, Programmer, ProgrammerEvent, SimmConfig,
//! };
//!
//! fn main() -> simmflash::Result<()> {
//!     let (host_tx, host_rx) = mpsc::channel::<HostEvent>();
//!     let (event_tx, event_rx) = mpsc::channel::<ProgrammerEvent>();
//!
//!     let mut programmer = Programmer::new(NativeTransport::new(host_tx), event_tx);
//!     programmer.configure_simm(SimmConfig::new(8 * 1024 * 1024, ChipType::TsopX8));
//!     programmer.set_port_name("/dev/ttyACM0");
//!     programmer.begin_read(DataSink::memory(), None)?;
//!
//!     while programmer.is_busy() {
//!         if let Ok(event) = host_rx.recv() {
//!             programmer.handle_event(event);
//!         }
//!         for event in event_rx.try_iter() {
//!             println!("{event:?}");
//!         }
//!     }
//!     let image = programmer.take_read_data();
//!     println!("read {} bytes", image.map_or(0, |d| d.len()));
//!     Ok(())
//! }
//! ```

mod event;
mod machine;
mod session;
mod state;
mod verify;


use std::mem;
use std::sync::mpsc::Sender;

use log::{debug, info, warn};

pub use event::{
    ElectricalTestStatus, FirmwareFlashStatus, IdentificationStatus, Phase, ProgrammerEvent,
    ReadStatus, StartStatus, WriteStatus,
};
pub use session::{ChipIds, DataSink, DataSource};
pub use verify::{VerifyMode, bad_chip_mask};

use crate::error::{Error, Result};
use crate::host::{HostEvent, UsbPortEvent};
use crate::port::Transport;
use crate::presence::DevicePresence;
use crate::protocol::command::chunk_aligned;
use crate::protocol::{BoardMode, Command};
use crate::simm::{AddressMode, ChipMask, Region, SimmConfig};

use session::{
    FirmwareJob, IdentifyJob, Operation, ReadJob, ReadTarget, Session, WriteJob, source_len,
};
use state::{Pending, State};

/// Options for [`Programmer::begin_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Chips to write. Defaults to all four.
    pub chip_mask: ChipMask,
    /// Block-aligned region to erase and write. `None` erases the whole SIMM
    /// and writes from offset zero.
    pub region: Option<Region>,
}

/// Captured chip IDs per unlock address mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdentificationResult {
    /// Capture with straight unlock addresses.
    pub straight: Option<ChipIds>,
    /// Capture with shifted unlock addresses.
    pub shifted: Option<ChipIds>,
}

impl IdentificationResult {
    /// Capture for `mode`, falling back to the other one.
    pub fn for_mode(&self, mode: AddressMode) -> Option<&ChipIds> {
        match mode {
            AddressMode::Straight => self.straight.as_ref().or(self.shifted.as_ref()),
            AddressMode::Shifted => self.shifted.as_ref().or(self.straight.as_ref()),
        }
    }

    fn store(&mut self, mode: AddressMode, ids: ChipIds) {
        match mode {
            AddressMode::Straight => self.straight = Some(ids),
            AddressMode::Shifted => self.shifted = Some(ids),
        }
    }
}

/// Host side of the SIMM programmer protocol.
pub struct Programmer<T: Transport> {
    transport: T,
    events: Sender<ProgrammerEvent>,
    simm: SimmConfig,
    verify_mode: VerifyMode,
    presence: DevicePresence,
    state: State,
    session: Option<Session>,
    identification: IdentificationResult,
    read_data: Option<Vec<u8>>,
    /// Port whose loss was already reported through a port error.
    lost_port: Option<String>,
}

impl<T: Transport> Programmer<T> {
    /// Create an idle engine writing to `transport` and reporting to `events`.
    pub fn new(transport: T, events: Sender<ProgrammerEvent>) -> Self {
        Self {
            transport,
            events,
            simm: SimmConfig::default(),
            verify_mode: VerifyMode::default(),
            presence: DevicePresence::default(),
            state: State::Idle,
            session: None,
            identification: IdentificationResult::default(),
            read_data: None,
            lost_port: None,
        }
    }

    /// Set the SIMM capacity and chip type used by later operations.
    pub fn configure_simm(&mut self, config: SimmConfig) {
        debug!(
            "SIMM configured: {} bytes, {}",
            config.capacity, config.chip_type
        );
        self.simm = config;
    }

    /// Current SIMM configuration.
    pub fn simm(&self) -> &SimmConfig {
        &self.simm
    }

    /// Set how later writes are verified.
    pub fn set_verify_mode(&mut self, mode: VerifyMode) {
        self.verify_mode = mode;
    }

    /// Current verify mode.
    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    /// Use an explicit port instead of waiting for the port watcher.
    pub fn set_port_name(&mut self, port_name: impl Into<String>) {
        self.presence.set_port_override(port_name);
    }

    /// Board presence as seen by the engine.
    pub fn presence(&self) -> &DevicePresence {
        &self.presence
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether an operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.session.is_some()
    }

    /// IDs captured by the last identification.
    pub fn identification(&self) -> &IdentificationResult {
        &self.identification
    }

    /// `(manufacturer, device)` of a chip position, using the configured
    /// address mode's capture when there is one.
    pub fn chip_identity(&self, position: usize) -> Option<(u8, u8)> {
        self.identification
            .for_mode(self.simm.address_mode())?
            .chip(position)
    }

    /// Data of the last completed in-memory read.
    pub fn take_read_data(&mut self) -> Option<Vec<u8>> {
        self.read_data.take()
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Erase and write `source` to the SIMM.
    ///
    /// Local precondition failures (unreadable source, misaligned region,
    /// data too big) are reported as write statuses without touching the
    /// board. Returns [`Error::Busy`] if another operation is in flight.
    pub fn begin_write(
        &mut self,
        source: impl DataSource + 'static,
        options: WriteOptions,
    ) -> Result<()> {
        self.ensure_idle()?;
        let mut source: Box<dyn DataSource> = Box::new(source);

        let len = match source_len(source.as_mut()) {
            Ok(len) => len,
            Err(e) => {
                warn!("Cannot read write source: {e}");
                self.emit(ProgrammerEvent::Write(WriteStatus::Error));
                return Ok(());
            },
        };
        let total = u32::try_from(len).unwrap_or(u32::MAX);
        self.emit(ProgrammerEvent::TotalLength(Phase::Write, total));
        self.emit(ProgrammerEvent::CompletionLength(Phase::Write, 0));

        if let Some(status) = self.check_write(len, options.region) {
            warn!("Write rejected: {status}");
            self.emit(ProgrammerEvent::Write(status));
            return Ok(());
        }

        let target = options.region.map_or_else(
            || "whole SIMM".to_string(),
            |r| format!("{:#X}+{:#X}", r.offset, r.length),
        );
        info!(
            "Writing {total} bytes to {target} (chip mask {})",
            options.chip_mask
        );
        self.session = Some(Session::new(Operation::Write(WriteJob {
            source,
            chip_mask: options.chip_mask,
            region: options.region,
            verify_mode: self.verify_mode,
            total,
            remaining: total,
            written: 0,
        })));
        self.start_command(BoardMode::Programmer, self.size_command(), State::WriteSetSizeReply);
        Ok(())
    }

    fn check_write(&self, len: u64, region: Option<Region>) -> Option<WriteStatus> {
        match region {
            Some(region) if !region.is_block_aligned() => Some(WriteStatus::EraseBlockWrongSize),
            Some(region) if !region.fits(&self.simm) || len > u64::from(region.length) => {
                Some(WriteStatus::FileTooBig)
            },
            None if len > u64::from(self.simm.capacity) => Some(WriteStatus::FileTooBig),
            _ if u32::try_from(len).ok().and_then(chunk_aligned).is_none() => {
                Some(WriteStatus::FileTooBig)
            },
            _ => None,
        }
    }

    /// Read the SIMM, or `range` of it, into `sink`.
    pub fn begin_read(&mut self, sink: DataSink, range: Option<Region>) -> Result<()> {
        self.ensure_idle()?;
        let region = range.unwrap_or_else(|| Region::whole(&self.simm));
        let sendable = chunk_aligned(region.length).is_some();
        if region.length == 0 || !region.fits(&self.simm) || !sendable {
            warn!(
                "Read range {:#X}+{:#X} cannot be read from the {} byte SIMM",
                region.offset, region.length, self.simm.capacity
            );
            self.emit(ProgrammerEvent::Read(ReadStatus::Error));
            return Ok(());
        }

        self.read_data = None;
        self.emit(ProgrammerEvent::TotalLength(Phase::Read, region.length));
        self.emit(ProgrammerEvent::CompletionLength(Phase::Read, 0));
        info!("Reading {:#X}+{:#X}", region.offset, region.length);
        self.start_read(ReadTarget::Sink(sink), region);
        Ok(())
    }

    fn start_read(&mut self, target: ReadTarget, region: Region) {
        let whole = region.covers(&self.simm);
        self.session = Some(Session::new(Operation::Read(ReadJob::new(target, region))));
        if whole {
            self.start_command(BoardMode::Programmer, Command::ReadChips, State::ReadStartReply);
        } else {
            self.start_command(
                BoardMode::Programmer,
                Command::ReadChipsAt,
                State::ReadStartOffsetReply,
            );
        }
    }

    /// Read the chip IDs using the configured address mode.
    pub fn begin_identify(&mut self) -> Result<()> {
        self.start_identify(false)
    }

    /// Read the chip IDs with straight and then shifted unlock addresses.
    pub fn begin_identify_all_layouts(&mut self) -> Result<()> {
        self.start_identify(true)
    }

    fn start_identify(&mut self, all_layouts: bool) -> Result<()> {
        self.ensure_idle()?;
        let mode = if all_layouts {
            AddressMode::Straight
        } else {
            self.simm.address_mode()
        };
        self.identification = IdentificationResult::default();
        self.session = Some(Session::new(Operation::Identify(IdentifyJob {
            all_layouts,
            mode,
            ids: ChipIds::default(),
            started: false,
        })));
        info!("Identifying chips");
        self.start_command(
            BoardMode::Programmer,
            self.size_command(),
            State::IdentifySetSizeReply,
        );
        Ok(())
    }

    /// Run the shorted-pin test.
    pub fn begin_electrical_test(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.session = Some(Session::new(Operation::ElectricalTest {
            failures: 0,
            started: false,
        }));
        info!("Starting electrical test");
        self.start_command(
            BoardMode::Programmer,
            Command::DoElectricalTest,
            State::TestStartReply,
        );
        Ok(())
    }

    /// Replace the board's programmer firmware with `source`.
    pub fn begin_firmware_flash(&mut self, source: impl DataSource + 'static) -> Result<()> {
        self.ensure_idle()?;
        let mut source: Box<dyn DataSource> = Box::new(source);
        let total = match source_len(source.as_mut()).map(u32::try_from) {
            Ok(Ok(len)) => len,
            Ok(Err(_)) => {
                warn!("Firmware image is too large");
                self.emit(ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::Error));
                return Ok(());
            },
            Err(e) => {
                warn!("Cannot read firmware image: {e}");
                self.emit(ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::Error));
                return Ok(());
            },
        };
        self.emit(ProgrammerEvent::TotalLength(Phase::FirmwareFlash, total));
        self.emit(ProgrammerEvent::CompletionLength(Phase::FirmwareFlash, 0));

        self.session = Some(Session::new(Operation::FirmwareFlash(FirmwareJob {
            source,
            remaining: total,
            written: 0,
        })));
        info!("Flashing {total} bytes of programmer firmware");
        self.start_command(
            BoardMode::Bootloader,
            Command::BootloaderEraseAndWriteProgram,
            State::FirmwareStartOkReply,
        );
        Ok(())
    }

    /// Start a thread that reports programmer boards coming and going.
    #[cfg(feature = "native")]
    pub fn begin_port_watch(
        &self,
        sender: Sender<HostEvent>,
    ) -> Result<crate::device::watch::PortWatcher> {
        crate::device::watch::PortWatcher::spawn(
            self.presence.ids().to_vec(),
            crate::device::watch::POLL_INTERVAL,
            sender,
        )
    }

    /// Feed one host event.
    pub fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Data(bytes) => self.handle_data(&bytes),
            HostEvent::Attached(usb) => self.device_attached(&usb),
            HostEvent::Detached(usb) => self.device_detached(&usb),
            HostEvent::PortError(message) => self.port_error(&message),
        }
    }

    /// Feed bytes received from the board.
    pub fn handle_data(&mut self, data: &[u8]) {
        for &byte in data {
            self.handle_byte(byte);
        }
    }

    fn handle_byte(&mut self, byte: u8) {
        let state = mem::take(&mut self.state);
        if matches!(state, State::Idle) || state.is_switching() {
            // Nothing expected; stale bytes from a closing port.
            self.state = state;
            return;
        }
        match self.step(state, byte) {
            Ok(next) => self.state = next,
            Err(e) => {
                warn!("{e}");
                self.fail();
            },
        }
    }

    /// A serial device appeared.
    pub fn device_attached(&mut self, event: &UsbPortEvent) {
        if !self.presence.attach(event) {
            return;
        }
        self.lost_port = None;
        match mem::take(&mut self.state) {
            State::SwitchingMode(pending) | State::AwaitingReconnect(pending) => {
                info!("Programmer is back on {}", event.port_name);
                self.resume(pending);
            },
            State::Idle if !self.is_busy() => {
                info!("Programmer connected on {}", event.port_name);
                self.emit(ProgrammerEvent::BoardConnected);
            },
            other => self.state = other,
        }
    }

    /// A serial device went away.
    pub fn device_detached(&mut self, event: &UsbPortEvent) {
        if !self.presence.detach(event) {
            return;
        }
        let already_reported = self.lost_port.take().is_some_and(|p| p == event.port_name);
        match mem::take(&mut self.state) {
            State::SwitchingMode(pending) | State::AwaitingReconnect(pending) => {
                debug!("Programmer left for its reboot");
                self.state = State::AwaitingReconnect(pending);
            },
            State::Idle if !self.is_busy() && already_reported => {
                debug!("Programmer removal already reported");
            },
            State::Idle if !self.is_busy() => {
                info!("Programmer disconnected");
                self.emit(ProgrammerEvent::BoardDisconnected);
            },
            _ => self.disconnected_during_operation(),
        }
    }

    /// The open port failed. Mid-operation this is the board being unplugged;
    /// the port watcher only notices the removal later.
    fn port_error(&mut self, message: &str) {
        if !self.is_busy() || self.state.is_switching() || !self.transport.is_open() {
            debug!("Ignoring port error while not on the wire: {message}");
            return;
        }
        warn!("Serial port failed: {message}");
        self.lost_port = self.presence.port_name().map(str::to_string);
        self.disconnected_during_operation();
    }

    fn disconnected_during_operation(&mut self) {
        warn!("Programmer disconnected during an operation");
        self.transport.close();
        self.session = None;
        self.state = State::Idle;
        self.emit(ProgrammerEvent::BoardDisconnectedDuringOperation);
    }

    /// Ask the running operation to stop at its next chunk boundary.
    ///
    /// Only the write, read and firmware data phases can be cancelled, and
    /// the operation ends only once the board confirms. Returns whether an
    /// operation was running.
    pub fn request_cancel(&mut self) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                info!("Cancel requested");
                session.cancel_requested = true;
                true
            },
            None => false,
        }
    }

    /// Abort the running operation because the owner's deadline expired.
    pub fn handle_timeout(&mut self) {
        if let Some(session) = &self.session {
            let event = session.timed_out_event();
            warn!("Operation timed out in {:?}", self.state);
            self.state = self.finish(event);
        }
    }

    fn emit(&self, event: ProgrammerEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver gone, dropping {event:?}");
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.write_bytes(bytes)
    }

    fn send_command(&mut self, command: Command) -> Result<()> {
        debug!("Sending {command:?}");
        self.send(&[command.byte()])
    }

    /// End the session: close the port, report `event`, go idle.
    fn finish(&mut self, event: ProgrammerEvent) -> State {
        self.transport.close();
        self.session = None;
        self.emit(event);
        State::Idle
    }

    /// End the session with its operation's error status.
    fn fail(&mut self) {
        let event = self.session.as_ref().map(Session::error_event);
        self.state = match event {
            Some(event) => self.finish(event),
            None => {
                self.transport.close();
                State::Idle
            },
        };
    }

    /// Open the port and ask which firmware runs; the real command follows
    /// once the board is in `mode`.
    fn start_command(&mut self, mode: BoardMode, command: Command, next: State) {
        self.lost_port = None;
        let pending = Pending::new(mode, command, next);
        let Some(port_name) = self.presence.port_name().map(str::to_string) else {
            warn!("No programmer board found");
            self.fail();
            return;
        };
        if let Err(e) = self.transport.open(&port_name) {
            warn!("Cannot open {port_name}: {e}");
            self.fail();
            return;
        }
        match self.send_command(Command::GetBootloaderState) {
            Ok(()) => self.state = State::AwaitingModeOk(pending),
            Err(e) => {
                warn!("{e}");
                self.fail();
            },
        }
    }

    /// Continue after the board re-enumerated in the right firmware.
    fn resume(&mut self, pending: Pending) {
        let Some(port_name) = self.presence.port_name().map(str::to_string) else {
            self.fail();
            return;
        };
        if let Err(e) = self.transport.open(&port_name) {
            warn!("Cannot reopen {port_name}: {e}");
            self.fail();
            return;
        }
        self.emit(ProgrammerEvent::Start(StartStatus::Initialized));
        match self.send_command(pending.command) {
            Ok(()) => self.state = *pending.next,
            Err(e) => {
                warn!("{e}");
                self.fail();
            },
        }
    }

    fn size_command(&self) -> Command {
        if self.simm.is_legacy_size() {
            Command::SetSimmTypePlcc32_2MB
        } else {
            Command::SetSimmTypeLarger
        }
    }
}
