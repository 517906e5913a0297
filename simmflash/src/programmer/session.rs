//! The running operation and its data source or sink.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::protocol::command::{CHUNK_SIZE, IDENTIFY_PAYLOAD_LEN, PAD_BYTE};
use crate::simm::{AddressMode, ChipMask, Region};

use super::event::{
    ElectricalTestStatus, FirmwareFlashStatus, IdentificationStatus, ProgrammerEvent, ReadStatus,
    WriteStatus,
};
use super::verify::{Verification, VerifyMode};

/// Seekable byte source for writes and firmware flashing.
pub trait DataSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> DataSource for T {}

/// Length of a source; leaves it positioned at the start.
pub(crate) fn source_len(source: &mut dyn DataSource) -> io::Result<u64> {
    let len = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(0))?;
    Ok(len)
}

/// Where read data goes.
pub enum DataSink {
    /// Any writer, typically a file.
    Writer(Box<dyn Write + Send>),
    /// Collected in memory; fetch with
    /// [`Programmer::take_read_data`](crate::Programmer::take_read_data).
    Buffer(Vec<u8>),
}

impl DataSink {
    /// Stream into a writer.
    pub fn writer(writer: impl Write + Send + 'static) -> Self {
        Self::Writer(Box::new(writer))
    }

    /// Collect into memory.
    pub fn memory() -> Self {
        Self::Buffer(Vec::new())
    }
}

impl std::fmt::Debug for DataSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Writer(_) => f.write_str("DataSink::Writer"),
            Self::Buffer(buf) => write!(f, "DataSink::Buffer({} bytes)", buf.len()),
        }
    }
}

/// Pull one padded chunk from a source.
fn next_chunk(source: &mut dyn DataSource, remaining: &mut u32) -> io::Result<Vec<u8>> {
    let n = (*remaining as usize).min(CHUNK_SIZE);
    let mut chunk = vec![PAD_BYTE; CHUNK_SIZE];
    source.read_exact(&mut chunk[..n])?;
    *remaining -= n as u32;
    Ok(chunk)
}

pub(crate) struct WriteJob {
    pub source: Box<dyn DataSource>,
    pub chip_mask: ChipMask,
    /// Explicit region, erased with `ErasePortion`.
    pub region: Option<Region>,
    pub verify_mode: VerifyMode,
    pub total: u32,
    pub remaining: u32,
    pub written: u32,
}

impl WriteJob {
    pub fn offset(&self) -> u32 {
        self.region.map_or(0, |r| r.offset)
    }

    pub fn next_chunk(&mut self) -> io::Result<Vec<u8>> {
        let before = self.remaining;
        let chunk = next_chunk(self.source.as_mut(), &mut self.remaining)?;
        self.written += before - self.remaining;
        Ok(chunk)
    }
}

pub(crate) enum ReadTarget {
    Sink(DataSink),
    Verify(Verification),
}

pub(crate) struct ReadJob {
    pub target: ReadTarget,
    pub offset: u32,
    /// Bytes wanted by the caller; the wire length is rounded up to a chunk.
    pub length: u32,
    pub forwarded: u32,
    pub chunk: Vec<u8>,
}

impl ReadJob {
    pub fn new(target: ReadTarget, region: Region) -> Self {
        Self {
            target,
            offset: region.offset,
            length: region.length,
            forwarded: 0,
            chunk: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    pub fn is_verify(&self) -> bool {
        matches!(self.target, ReadTarget::Verify(_))
    }

    /// Hand the buffered chunk to the target, dropping bytes past `length`.
    pub fn flush_chunk(&mut self) -> io::Result<()> {
        let wanted = (self.length - self.forwarded) as usize;
        let take = wanted.min(self.chunk.len());
        let data = &self.chunk[..take];
        match &mut self.target {
            ReadTarget::Sink(DataSink::Writer(w)) => w.write_all(data)?,
            ReadTarget::Sink(DataSink::Buffer(buf)) => buf.extend_from_slice(data),
            ReadTarget::Verify(v) => v.push(data),
        }
        self.forwarded += take as u32;
        self.chunk.clear();
        Ok(())
    }
}

/// One chip-ID capture: manufacturer and device ID per chip position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChipIds {
    /// Manufacturer IDs, indexed by chip position.
    pub manufacturers: [u8; 4],
    /// Device IDs, indexed by chip position.
    pub devices: [u8; 4],
}

impl ChipIds {
    /// Store byte `index` of the identification payload.
    pub(crate) fn set(&mut self, index: usize, byte: u8) {
        debug_assert!(index < IDENTIFY_PAYLOAD_LEN);
        let chip = index / 2;
        if index % 2 == 0 {
            self.manufacturers[chip] = byte;
        } else {
            self.devices[chip] = byte;
        }
    }

    /// `(manufacturer, device)` of a chip position.
    pub fn chip(&self, position: usize) -> Option<(u8, u8)> {
        Some((*self.manufacturers.get(position)?, *self.devices.get(position)?))
    }
}

pub(crate) struct IdentifyJob {
    pub all_layouts: bool,
    pub mode: AddressMode,
    pub ids: ChipIds,
    pub started: bool,
}

pub(crate) struct FirmwareJob {
    pub source: Box<dyn DataSource>,
    pub remaining: u32,
    pub written: u32,
}

impl FirmwareJob {
    pub fn next_chunk(&mut self) -> io::Result<Vec<u8>> {
        let before = self.remaining;
        let chunk = next_chunk(self.source.as_mut(), &mut self.remaining)?;
        self.written += before - self.remaining;
        Ok(chunk)
    }
}

pub(crate) enum Operation {
    Write(WriteJob),
    Read(ReadJob),
    Identify(IdentifyJob),
    ElectricalTest { failures: u32, started: bool },
    FirmwareFlash(FirmwareJob),
}

pub(crate) struct Session {
    pub op: Operation,
    pub cancel_requested: bool,
}

impl Session {
    pub fn new(op: Operation) -> Self {
        Self {
            op,
            cancel_requested: false,
        }
    }

    /// Status for an unexpected reply or an I/O failure.
    pub fn error_event(&self) -> ProgrammerEvent {
        match &self.op {
            Operation::Write(_) => ProgrammerEvent::Write(WriteStatus::Error),
            Operation::Read(job) if job.is_verify() => {
                ProgrammerEvent::Write(WriteStatus::VerifyError)
            },
            Operation::Read(_) => ProgrammerEvent::Read(ReadStatus::Error),
            Operation::Identify(_) => ProgrammerEvent::Identification(IdentificationStatus::Error),
            Operation::ElectricalTest { started: true, .. } => {
                ProgrammerEvent::ElectricalTest(ElectricalTestStatus::Failed)
            },
            Operation::ElectricalTest { started: false, .. } => {
                ProgrammerEvent::ElectricalTest(ElectricalTestStatus::CouldntStart)
            },
            Operation::FirmwareFlash(_) => {
                ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::Error)
            },
        }
    }

    /// Status when the owner's deadline expires.
    pub fn timed_out_event(&self) -> ProgrammerEvent {
        match &self.op {
            Operation::Write(_) => ProgrammerEvent::Write(WriteStatus::TimedOut),
            Operation::Read(job) if job.is_verify() => {
                ProgrammerEvent::Write(WriteStatus::VerifyTimedOut)
            },
            Operation::Read(_) => ProgrammerEvent::Read(ReadStatus::TimedOut),
            Operation::Identify(_) => {
                ProgrammerEvent::Identification(IdentificationStatus::TimedOut)
            },
            Operation::ElectricalTest { .. } => {
                ProgrammerEvent::ElectricalTest(ElectricalTestStatus::TimedOut)
            },
            Operation::FirmwareFlash(_) => {
                ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::TimedOut)
            },
        }
    }

    /// Status once the board confirmed a cancel request.
    pub fn cancelled_event(&self) -> ProgrammerEvent {
        match &self.op {
            Operation::Read(job) if job.is_verify() => {
                ProgrammerEvent::Write(WriteStatus::VerifyCancelled)
            },
            Operation::Read(_) => ProgrammerEvent::Read(ReadStatus::Cancelled),
            Operation::FirmwareFlash(_) => {
                ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::Cancelled)
            },
            _ => ProgrammerEvent::Write(WriteStatus::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_source_len_rewinds() {
        let mut source = Cursor::new(vec![1u8; 3000]);
        source.set_position(10);
        assert_eq!(source_len(&mut source).unwrap(), 3000);
        assert_eq!(source.position(), 0);
    }

    #[test]
    fn test_next_chunk_pads_final_chunk() {
        let mut source = Cursor::new(vec![7u8; 1500]);
        let mut remaining = 1500;

        let first = next_chunk(&mut source, &mut remaining).unwrap();
        assert_eq!(first.len(), CHUNK_SIZE);
        assert!(first.iter().all(|b| *b == 7));
        assert_eq!(remaining, 476);

        let last = next_chunk(&mut source, &mut remaining).unwrap();
        assert_eq!(last.len(), CHUNK_SIZE);
        assert!(last[..476].iter().all(|b| *b == 7));
        assert!(last[476..].iter().all(|b| *b == PAD_BYTE));
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_read_job_discards_past_length() {
        let mut job = ReadJob::new(ReadTarget::Sink(DataSink::memory()), Region::new(0, 1500));
        job.chunk.extend_from_slice(&[1u8; CHUNK_SIZE]);
        job.flush_chunk().unwrap();
        job.chunk.extend_from_slice(&[2u8; CHUNK_SIZE]);
        job.flush_chunk().unwrap();
        assert_eq!(job.forwarded, 1500);

        let ReadTarget::Sink(DataSink::Buffer(buf)) = job.target else {
            panic!("expected buffer sink");
        };
        assert_eq!(buf.len(), 1500);
        assert!(buf[1024..].iter().all(|b| *b == 2));
    }

    #[test]
    fn test_chip_ids_layout() {
        let mut ids = ChipIds::default();
        for (i, byte) in [0x01, 0xA4, 0x01, 0xA4, 0xBF, 0xB7, 0xBF, 0xB7].iter().enumerate() {
            ids.set(i, *byte);
        }
        assert_eq!(ids.chip(0), Some((0x01, 0xA4)));
        assert_eq!(ids.chip(3), Some((0xBF, 0xB7)));
        assert_eq!(ids.chip(4), None);
    }

    #[test]
    fn test_electrical_test_error_depends_on_start() {
        let before = Session::new(Operation::ElectricalTest {
            failures: 0,
            started: false,
        });
        assert_eq!(
            before.error_event(),
            ProgrammerEvent::ElectricalTest(ElectricalTestStatus::CouldntStart)
        );
        let after = Session::new(Operation::ElectricalTest {
            failures: 0,
            started: true,
        });
        assert_eq!(
            after.error_event(),
            ProgrammerEvent::ElectricalTest(ElectricalTestStatus::Failed)
        );
    }
}
