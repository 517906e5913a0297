//! Per-state reply handlers.
//!
//! `step` consumes one byte in the current state and returns the next state.
//! Handlers that end the session return [`Programmer::finish`]'s `Idle`; an
//! `Err` ends it with the operation's error status.

use std::io::Write as _;
use std::mem;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Transport;
use crate::protocol::command::{
    CHUNK_SIZE, IDENTIFY_DONE, IDENTIFY_PAYLOAD_LEN, chunk_aligned, encode_word, encode_words,
};
use crate::protocol::{
    BoardMode, BootloaderReply, BootloaderRequest, Capability, Command, CommandReply,
    ElectricalTestReply, EraseReply, ReadAck, ReadReply, WriteReply, WriteRequest,
};
use crate::simm::{AddressMode, ChipMask, Region};

use super::Programmer;
use super::event::{
    ElectricalTestStatus, FirmwareFlashStatus, IdentificationStatus, Phase, ProgrammerEvent,
    ReadStatus, StartStatus, WriteStatus,
};
use super::session::{
    ChipIds, DataSink, FirmwareJob, IdentifyJob, Operation, ReadJob, ReadTarget, WriteJob,
};
use super::state::{Pending, State};
use super::verify::{Verification, VerifyMode};

fn unexpected(byte: u8, state: &str) -> Error {
    Error::Protocol(format!("unexpected reply 0x{byte:02X} while waiting for {state}"))
}

fn too_long(length: u32) -> Error {
    Error::Protocol(format!("length {length:#X} cannot be sent in whole chunks"))
}

fn address_command(mode: AddressMode) -> Command {
    match mode {
        AddressMode::Straight => Command::SetAddressStraight,
        AddressMode::Shifted => Command::SetAddressShifted,
    }
}

impl<T: Transport> Programmer<T> {
    pub(super) fn step(&mut self, state: State, byte: u8) -> Result<State> {
        if !state.is_bulk() {
            trace!("{state:?} <- 0x{byte:02X}");
        }
        match state {
            State::Idle | State::SwitchingMode(_) | State::AwaitingReconnect(_) => Ok(state),

            State::AwaitingModeOk(pending) => match CommandReply::from(byte) {
                CommandReply::Ok => Ok(State::AwaitingModeReply(pending)),
                _ => Err(unexpected(byte, "the mode query to be accepted")),
            },
            State::AwaitingModeReply(pending) => self.on_mode_reply(pending, byte),

            State::WriteSetSizeReply => self.on_write_size(byte),
            State::WriteSetLayoutReply => self.on_write_layout(byte),
            State::WriteSetVerifyReply => self.on_write_verify(byte),
            State::WriteSetChipMaskReply => self.on_write_chip_mask(byte),
            State::WriteSetChipMaskValueReply => match CommandReply::from(byte) {
                CommandReply::Ok => self.start_erase(),
                _ => Err(unexpected(byte, "the chip mask to be accepted")),
            },
            State::WriteEraseReply => self.on_erase(byte),
            State::WriteErasePortionReply => self.on_erase_portion(byte),
            State::WriteErasePortionConfirm => self.on_erase_portion_confirm(byte),
            State::WriteErasePortionResult => self.on_erase_portion_result(byte),
            State::WriteAtReply => self.on_write_at(byte),
            State::WriteReply => self.on_write_reply(byte),
            State::WriteMoreReply => self.on_write_more(byte),
            State::WriteFinishReply => self.on_write_finish(byte),
            State::WriteCancelReply => match WriteReply::from(byte) {
                WriteReply::ConfirmCancel => Ok(self.cancelled()),
                _ => Err(unexpected(byte, "the write cancel confirmation")),
            },

            State::ReadStartReply => match CommandReply::from(byte) {
                CommandReply::Ok => self.start_read_data(),
                _ => Err(unexpected(byte, "the read to start")),
            },
            State::ReadStartOffsetReply => match CommandReply::from(byte) {
                CommandReply::Ok => {
                    let offset = self.read_job()?.offset;
                    self.send(&encode_word(offset))?;
                    Ok(State::ReadLengthReply)
                },
                _ => Err(unexpected(byte, "the ranged read to be accepted")),
            },
            State::ReadLengthReply => match CommandReply::from(byte) {
                CommandReply::Ok => {
                    let length = self.read_job()?.length;
                    let wire = chunk_aligned(length).ok_or_else(|| too_long(length))?;
                    self.send(&encode_word(wire))?;
                    Ok(State::ReadStartReply)
                },
                _ => Err(unexpected(byte, "the read offset to be accepted")),
            },
            State::ReadData { chunk } => self.on_read_data(chunk, byte),
            State::ReadStatusReply => self.on_read_status(byte),

            State::IdentifySetSizeReply => self.on_identify_size(byte),
            State::IdentifySetLayoutReply => self.on_identify_layout(byte),
            State::IdentifyOkReply => self.on_identify_ok(byte),
            State::IdentifyData { index } => {
                self.identify_job()?.ids.set(index, byte);
                if index + 1 >= IDENTIFY_PAYLOAD_LEN {
                    Ok(State::IdentifyDoneReply)
                } else {
                    Ok(State::IdentifyData { index: index + 1 })
                }
            },
            State::IdentifyDoneReply => self.on_identify_done(byte),

            State::TestStartReply => match CommandReply::from(byte) {
                CommandReply::Ok => {
                    if let Some(session) = self.session.as_mut() {
                        session.op = Operation::ElectricalTest {
                            failures: 0,
                            started: true,
                        };
                    }
                    self.emit(ProgrammerEvent::ElectricalTest(ElectricalTestStatus::Started));
                    Ok(State::TestNextStatus)
                },
                _ => {
                    warn!("Board refused to start the electrical test (0x{byte:02X})");
                    Ok(self.finish(ProgrammerEvent::ElectricalTest(
                        ElectricalTestStatus::CouldntStart,
                    )))
                },
            },
            State::TestNextStatus => self.on_test_status(byte),
            State::TestFirstFail => Ok(State::TestSecondFail { first: byte }),
            State::TestSecondFail { first } => {
                debug!("Short between pins {first} and {byte}");
                self.emit(ProgrammerEvent::ElectricalTestFailLocation(first, byte));
                Ok(State::TestNextStatus)
            },

            State::FirmwareStartOkReply => match CommandReply::from(byte) {
                CommandReply::Ok => {
                    self.emit(ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::Starting));
                    self.firmware_next_request()
                },
                _ => Err(unexpected(byte, "the bootloader to accept the firmware")),
            },
            State::FirmwareWriteMoreReply => match BootloaderReply::from(byte) {
                BootloaderReply::Ok => {
                    let job = self.firmware_job()?;
                    let chunk = job.next_chunk()?;
                    let written = job.written;
                    self.send(&chunk)?;
                    self.emit(ProgrammerEvent::CompletionLength(Phase::FirmwareFlash, written));
                    Ok(State::FirmwareWriteReply)
                },
                _ => Err(unexpected(byte, "the bootloader to accept a chunk")),
            },
            State::FirmwareWriteReply => match BootloaderReply::from(byte) {
                BootloaderReply::Ok => self.firmware_next_request(),
                _ => Err(unexpected(byte, "a firmware chunk to be written")),
            },
            State::FirmwareFinishReply => match BootloaderReply::from(byte) {
                BootloaderReply::Ok => {
                    info!("Firmware flash complete");
                    Ok(self.finish(ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::Complete)))
                },
                _ => Err(unexpected(byte, "the firmware to be finalized")),
            },
            State::FirmwareCancelReply => match BootloaderReply::from(byte) {
                BootloaderReply::ConfirmCancel => Ok(self.cancelled()),
                _ => Err(unexpected(byte, "the firmware cancel confirmation")),
            },
        }
    }

    fn on_mode_reply(&mut self, pending: Pending, byte: u8) -> Result<State> {
        let mode = BoardMode::from_reply(byte)
            .ok_or_else(|| unexpected(byte, "the board mode"))?;
        if mode == pending.mode {
            debug!("Board already in {mode:?} mode");
            self.emit(ProgrammerEvent::Start(StartStatus::Initialized));
            self.send_command(pending.command)?;
            return Ok(*pending.next);
        }

        info!("Board is in {mode:?} mode, switching to {:?}", pending.mode);
        self.emit(ProgrammerEvent::Start(StartStatus::Initializing));
        self.send_command(pending.mode.enter_command())?;
        self.transport.close();
        Ok(State::SwitchingMode(pending))
    }

    // Write setup. Each refusal is resolved with the benign-default rule.

    fn on_write_size(&mut self, byte: u8) -> Result<State> {
        let legacy = self.simm.is_legacy_size();
        match CommandReply::from(byte).negotiate(legacy) {
            Capability::Accepted | Capability::LegacyDefault => {
                self.send_command(address_command(self.simm.address_mode()))?;
                Ok(State::WriteSetLayoutReply)
            },
            Capability::Missing => {
                Ok(self.needs_update(WriteStatus::NeedsFirmwareUpdateBiggerSimm))
            },
            Capability::Unexpected(b) => Err(unexpected(b, "the SIMM size to be accepted")),
        }
    }

    fn on_write_layout(&mut self, byte: u8) -> Result<State> {
        let straight = self.simm.address_mode() == AddressMode::Straight;
        match CommandReply::from(byte).negotiate(straight) {
            Capability::Accepted | Capability::LegacyDefault => {
                let verify = self.write_job()?.verify_mode;
                self.send_command(if verify == VerifyMode::WhileWriting {
                    Command::SetVerifyWhileWriting
                } else {
                    Command::SetNoVerifyWhileWriting
                })?;
                Ok(State::WriteSetVerifyReply)
            },
            Capability::Missing => {
                Ok(self.needs_update(WriteStatus::NeedsFirmwareUpdateAddressMode))
            },
            Capability::Unexpected(b) => Err(unexpected(b, "the address mode to be accepted")),
        }
    }

    fn on_write_verify(&mut self, byte: u8) -> Result<State> {
        let default = self.write_job()?.verify_mode != VerifyMode::WhileWriting;
        match CommandReply::from(byte).negotiate(default) {
            Capability::Accepted | Capability::LegacyDefault => {
                self.send_command(Command::SetChipsMask)?;
                Ok(State::WriteSetChipMaskReply)
            },
            Capability::Missing => {
                Ok(self.needs_update(WriteStatus::NeedsFirmwareUpdateVerifyWhileWrite))
            },
            Capability::Unexpected(b) => Err(unexpected(b, "the verify mode to be accepted")),
        }
    }

    fn on_write_chip_mask(&mut self, byte: u8) -> Result<State> {
        let mask = self.write_job()?.chip_mask;
        match CommandReply::from(byte).negotiate(mask.is_all()) {
            Capability::Accepted => {
                self.send(&[mask.bits()])?;
                Ok(State::WriteSetChipMaskValueReply)
            },
            Capability::LegacyDefault => self.start_erase(),
            Capability::Missing => {
                Ok(self.needs_update(WriteStatus::NeedsFirmwareUpdateIndividualChips))
            },
            Capability::Unexpected(b) => Err(unexpected(b, "the chip mask command")),
        }
    }

    fn start_erase(&mut self) -> Result<State> {
        let partial = self.write_job()?.region.is_some();
        self.emit(ProgrammerEvent::Write(WriteStatus::Erasing));
        if partial {
            self.send_command(Command::ErasePortion)?;
            Ok(State::WriteErasePortionReply)
        } else {
            self.send_command(Command::EraseChips)?;
            Ok(State::WriteEraseReply)
        }
    }

    fn on_erase(&mut self, byte: u8) -> Result<State> {
        match CommandReply::from(byte) {
            CommandReply::Ok => {
                self.emit(ProgrammerEvent::Write(WriteStatus::EraseComplete));
                self.send_command(Command::WriteChips)?;
                Ok(State::WriteReply)
            },
            CommandReply::Error | CommandReply::Invalid => {
                warn!("Erase failed");
                Ok(self.finish(ProgrammerEvent::Write(WriteStatus::EraseFailed)))
            },
            CommandReply::Unexpected(b) => Err(unexpected(b, "the erase result")),
        }
    }

    fn on_erase_portion(&mut self, byte: u8) -> Result<State> {
        let region = self.write_job()?.region.unwrap_or_else(|| Region::whole(&self.simm));
        match CommandReply::from(byte).negotiate(region.covers(&self.simm)) {
            Capability::Accepted => {
                self.send(&encode_words(region.offset, region.length))?;
                Ok(State::WriteErasePortionConfirm)
            },
            Capability::LegacyDefault => {
                debug!("Partial erase unsupported, erasing the whole SIMM");
                self.send_command(Command::EraseChips)?;
                Ok(State::WriteEraseReply)
            },
            Capability::Missing => {
                Ok(self.needs_update(WriteStatus::NeedsFirmwareUpdateErasePortion))
            },
            Capability::Unexpected(b) => Err(unexpected(b, "the partial erase command")),
        }
    }

    fn on_erase_portion_confirm(&mut self, byte: u8) -> Result<State> {
        match EraseReply::from(byte) {
            EraseReply::Ok => Ok(State::WriteErasePortionResult),
            EraseReply::Error | EraseReply::OffsetError => {
                warn!("Board rejected the erase region (0x{byte:02X})");
                Ok(self.finish(ProgrammerEvent::Write(WriteStatus::EraseFailed)))
            },
            _ => Err(unexpected(byte, "the erase region to be accepted")),
        }
    }

    fn on_erase_portion_result(&mut self, byte: u8) -> Result<State> {
        match EraseReply::from(byte) {
            EraseReply::Finished => {
                self.emit(ProgrammerEvent::Write(WriteStatus::EraseComplete));
                self.send_command(Command::WriteChipsAt)?;
                Ok(State::WriteAtReply)
            },
            EraseReply::Error => {
                warn!("Partial erase failed");
                Ok(self.finish(ProgrammerEvent::Write(WriteStatus::EraseFailed)))
            },
            _ => Err(unexpected(byte, "the partial erase to finish")),
        }
    }

    fn on_write_at(&mut self, byte: u8) -> Result<State> {
        match CommandReply::from(byte) {
            CommandReply::Ok => {
                let job = self.write_job()?;
                let wire = chunk_aligned(job.total).ok_or_else(|| too_long(job.total))?;
                let words = encode_words(job.offset(), wire);
                self.send(&words)?;
                Ok(State::WriteReply)
            },
            _ => Err(unexpected(byte, "the offset write to be accepted")),
        }
    }

    // Write data phase: OK -> More -> OK -> chunk -> OK ... -> Finish -> OK.

    fn on_write_reply(&mut self, byte: u8) -> Result<State> {
        match WriteReply::from(byte) {
            WriteReply::Ok => {
                let cancel = self.session.as_ref().is_some_and(|s| s.cancel_requested);
                let remaining = self.write_job()?.remaining;
                if cancel {
                    self.send(&[WriteRequest::Cancel as u8])?;
                    Ok(State::WriteCancelReply)
                } else if remaining > 0 {
                    self.send(&[WriteRequest::More as u8])?;
                    Ok(State::WriteMoreReply)
                } else {
                    self.send(&[WriteRequest::Finish as u8])?;
                    Ok(State::WriteFinishReply)
                }
            },
            WriteReply::VerifyFailure(mask) => self.verify_failed(mask),
            _ => Err(unexpected(byte, "a chunk to be written")),
        }
    }

    fn on_write_more(&mut self, byte: u8) -> Result<State> {
        match WriteReply::from(byte) {
            WriteReply::Ok => {
                let job = self.write_job()?;
                let chunk = job.next_chunk()?;
                let written = job.written;
                self.send(&chunk)?;
                self.emit(ProgrammerEvent::CompletionLength(Phase::Write, written));
                Ok(State::WriteReply)
            },
            WriteReply::VerifyFailure(mask) => self.verify_failed(mask),
            _ => Err(unexpected(byte, "the board to accept a chunk")),
        }
    }

    fn on_write_finish(&mut self, byte: u8) -> Result<State> {
        match WriteReply::from(byte) {
            WriteReply::Ok => match self.write_job()?.verify_mode {
                VerifyMode::None => {
                    info!("Write complete");
                    Ok(self.finish(ProgrammerEvent::Write(WriteStatus::CompleteNoVerify)))
                },
                VerifyMode::WhileWriting => {
                    info!("Write complete, verified by the board");
                    Ok(self.finish(ProgrammerEvent::Write(WriteStatus::CompleteVerifyOk)))
                },
                VerifyMode::AfterWrite => self.start_verify(),
            },
            WriteReply::VerifyFailure(mask) => self.verify_failed(mask),
            _ => Err(unexpected(byte, "the write to finish")),
        }
    }

    fn verify_failed(&mut self, mask: ChipMask) -> Result<State> {
        let written = self.write_job()?.chip_mask;
        let bad = mask & written;
        if bad.is_empty() {
            info!("Board flagged only chips outside {written}, write verified");
            return Ok(self.finish(ProgrammerEvent::Write(WriteStatus::CompleteVerifyOk)));
        }
        warn!("Board reported a verification failure on chips {bad}");
        Ok(self.finish(ProgrammerEvent::Write(WriteStatus::VerificationFailure(bad))))
    }

    /// Turn the finished write into a read-back of the same range.
    fn start_verify(&mut self) -> Result<State> {
        let Some(session) = self.session.take() else {
            return Err(Error::Protocol("no write session".to_string()));
        };
        let Operation::Write(job) = session.op else {
            return Err(Error::Protocol("no write session".to_string()));
        };
        let offset = job.offset();
        let WriteJob {
            source,
            chip_mask,
            total,
            ..
        } = job;

        self.transport.close();
        self.emit(ProgrammerEvent::Write(WriteStatus::Verifying));
        if total == 0 {
            return Ok(self.finish(ProgrammerEvent::Write(WriteStatus::CompleteVerifyOk)));
        }
        self.emit(ProgrammerEvent::TotalLength(Phase::Verify, total));
        self.emit(ProgrammerEvent::CompletionLength(Phase::Verify, 0));
        info!("Write complete, reading back {total} bytes");

        let verification = Verification::new(source, chip_mask, total);
        self.start_read(ReadTarget::Verify(verification), Region::new(offset, total));
        Ok(mem::take(&mut self.state))
    }

    fn needs_update(&mut self, status: WriteStatus) -> State {
        warn!("{status}");
        self.finish(ProgrammerEvent::Write(status))
    }

    // Read data phase.

    fn start_read_data(&mut self) -> Result<State> {
        let verify = self.read_job()?.is_verify();
        self.emit(if verify {
            ProgrammerEvent::Write(WriteStatus::VerifyStarting)
        } else {
            ProgrammerEvent::Read(ReadStatus::Starting)
        });
        Ok(State::ReadData { chunk: 0 })
    }

    fn on_read_data(&mut self, chunk: usize, byte: u8) -> Result<State> {
        let job = self.read_job()?;
        job.chunk.push(byte);
        if chunk + 1 < CHUNK_SIZE {
            return Ok(State::ReadData { chunk: chunk + 1 });
        }

        job.flush_chunk()?;
        let phase = if job.is_verify() { Phase::Verify } else { Phase::Read };
        let forwarded = job.forwarded;
        self.emit(ProgrammerEvent::CompletionLength(phase, forwarded));

        let cancel = self.session.as_ref().is_some_and(|s| s.cancel_requested);
        let ack = if cancel { ReadAck::Cancel } else { ReadAck::Ok };
        self.send(&[ack as u8])?;
        Ok(State::ReadStatusReply)
    }

    fn on_read_status(&mut self, byte: u8) -> Result<State> {
        match ReadReply::from(byte) {
            ReadReply::MoreData => Ok(State::ReadData { chunk: 0 }),
            ReadReply::Finished => self.read_complete(),
            ReadReply::ConfirmCancel => Ok(self.cancelled()),
            _ => Err(unexpected(byte, "the read status")),
        }
    }

    fn read_complete(&mut self) -> Result<State> {
        self.transport.close();
        let Some(session) = self.session.take() else {
            return Err(Error::Protocol("no read session".to_string()));
        };
        let Operation::Read(ReadJob { target, forwarded, .. }) = session.op else {
            return Err(Error::Protocol("no read session".to_string()));
        };

        let event = match target {
            ReadTarget::Sink(DataSink::Writer(mut writer)) => match writer.flush() {
                Ok(()) => ProgrammerEvent::Read(ReadStatus::Complete),
                Err(e) => {
                    warn!("Cannot flush read data: {e}");
                    ProgrammerEvent::Read(ReadStatus::Error)
                },
            },
            ReadTarget::Sink(DataSink::Buffer(data)) => {
                self.read_data = Some(data);
                ProgrammerEvent::Read(ReadStatus::Complete)
            },
            ReadTarget::Verify(verification) => match verification.finish() {
                Ok(bad) if bad.is_empty() => {
                    info!("Verification passed");
                    ProgrammerEvent::Write(WriteStatus::CompleteVerifyOk)
                },
                Ok(bad) => {
                    warn!("Verification failed on chips {bad}");
                    ProgrammerEvent::Write(WriteStatus::VerificationFailure(bad))
                },
                Err(e) => {
                    warn!("Cannot re-read write source: {e}");
                    ProgrammerEvent::Write(WriteStatus::VerifyError)
                },
            },
        };
        if event == ProgrammerEvent::Read(ReadStatus::Complete) {
            info!("Read complete ({forwarded} bytes)");
        }
        Ok(self.finish(event))
    }

    // Identification.

    fn on_identify_size(&mut self, byte: u8) -> Result<State> {
        let legacy = self.simm.is_legacy_size();
        match CommandReply::from(byte).negotiate(legacy) {
            Capability::Accepted | Capability::LegacyDefault => {
                let mode = self.identify_job()?.mode;
                self.send_command(address_command(mode))?;
                Ok(State::IdentifySetLayoutReply)
            },
            Capability::Missing => Ok(self.identify_needs_update()),
            Capability::Unexpected(b) => Err(unexpected(b, "the SIMM size to be accepted")),
        }
    }

    fn on_identify_layout(&mut self, byte: u8) -> Result<State> {
        let mode = self.identify_job()?.mode;
        match CommandReply::from(byte).negotiate(mode == AddressMode::Straight) {
            Capability::Accepted | Capability::LegacyDefault => {
                self.send_command(Command::IdentifyChips)?;
                Ok(State::IdentifyOkReply)
            },
            Capability::Missing => Ok(self.identify_needs_update()),
            Capability::Unexpected(b) => Err(unexpected(b, "the address mode to be accepted")),
        }
    }

    fn on_identify_ok(&mut self, byte: u8) -> Result<State> {
        match CommandReply::from(byte) {
            CommandReply::Ok => {
                let job = self.identify_job()?;
                let first = !job.started;
                job.started = true;
                if first {
                    self.emit(ProgrammerEvent::Identification(IdentificationStatus::Starting));
                }
                Ok(State::IdentifyData { index: 0 })
            },
            _ => Err(unexpected(byte, "identification to start")),
        }
    }

    fn on_identify_done(&mut self, byte: u8) -> Result<State> {
        if byte != IDENTIFY_DONE {
            return Err(unexpected(byte, "identification to finish"));
        }
        let IdentifyJob {
            all_layouts,
            mode,
            ids,
            ..
        } = *self.identify_job()?;
        debug!("{mode:?} capture: {ids:02X?}");
        self.identification.store(mode, ids);

        if all_layouts && mode == AddressMode::Straight {
            let job = self.identify_job()?;
            job.mode = AddressMode::Shifted;
            job.ids = ChipIds::default();
            self.send_command(Command::SetAddressShifted)?;
            return Ok(State::IdentifySetLayoutReply);
        }

        info!("Identification complete");
        Ok(self.finish(ProgrammerEvent::Identification(IdentificationStatus::Complete)))
    }

    fn identify_needs_update(&mut self) -> State {
        warn!("{}", IdentificationStatus::NeedsFirmwareUpdate);
        self.finish(ProgrammerEvent::Identification(
            IdentificationStatus::NeedsFirmwareUpdate,
        ))
    }

    // Electrical test.

    fn on_test_status(&mut self, byte: u8) -> Result<State> {
        let Some(Operation::ElectricalTest { failures, .. }) =
            self.session.as_mut().map(|s| &mut s.op)
        else {
            return Err(Error::Protocol("no electrical test session".to_string()));
        };
        match ElectricalTestReply::from(byte) {
            ElectricalTestReply::Fail => {
                *failures += 1;
                Ok(State::TestFirstFail)
            },
            ElectricalTestReply::Done => {
                let status = if *failures == 0 {
                    info!("Electrical test passed");
                    ElectricalTestStatus::Passed
                } else {
                    warn!("Electrical test found {failures} short(s)");
                    ElectricalTestStatus::Failed
                };
                Ok(self.finish(ProgrammerEvent::ElectricalTest(status)))
            },
            ElectricalTestReply::Unexpected(b) => Err(unexpected(b, "electrical test status")),
        }
    }

    // Firmware flash.

    fn firmware_next_request(&mut self) -> Result<State> {
        let cancel = self.session.as_ref().is_some_and(|s| s.cancel_requested);
        let remaining = self.firmware_job()?.remaining;
        if cancel {
            self.send(&[BootloaderRequest::Cancel as u8])?;
            Ok(State::FirmwareCancelReply)
        } else if remaining > 0 {
            self.send(&[BootloaderRequest::WriteMore as u8])?;
            Ok(State::FirmwareWriteMoreReply)
        } else {
            self.send(&[BootloaderRequest::Finish as u8])?;
            Ok(State::FirmwareFinishReply)
        }
    }

    fn cancelled(&mut self) -> State {
        let event = self
            .session
            .as_ref()
            .map_or(ProgrammerEvent::Write(WriteStatus::Cancelled), |s| {
                s.cancelled_event()
            });
        info!("Operation cancelled");
        self.finish(event)
    }

    // Session accessors.

    fn write_job(&mut self) -> Result<&mut WriteJob> {
        match self.session.as_mut().map(|s| &mut s.op) {
            Some(Operation::Write(job)) => Ok(job),
            _ => Err(Error::Protocol("no write session".to_string())),
        }
    }

    fn read_job(&mut self) -> Result<&mut ReadJob> {
        match self.session.as_mut().map(|s| &mut s.op) {
            Some(Operation::Read(job)) => Ok(job),
            _ => Err(Error::Protocol("no read session".to_string())),
        }
    }

    fn identify_job(&mut self) -> Result<&mut IdentifyJob> {
        match self.session.as_mut().map(|s| &mut s.op) {
            Some(Operation::Identify(job)) => Ok(job),
            _ => Err(Error::Protocol("no identify session".to_string())),
        }
    }

    fn firmware_job(&mut self) -> Result<&mut FirmwareJob> {
        match self.session.as_mut().map(|s| &mut s.op) {
            Some(Operation::FirmwareFlash(job)) => Ok(job),
            _ => Err(Error::Protocol("no firmware session".to_string())),
        }
    }
}
