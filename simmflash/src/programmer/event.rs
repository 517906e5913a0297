//! Events emitted by the engine.

use std::fmt;

use crate::simm::ChipMask;

/// Transfer phase a length/progress event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Writing the SIMM.
    Write,
    /// Reading the SIMM.
    Read,
    /// Reading back after a write.
    Verify,
    /// Flashing the board firmware.
    FirmwareFlash,
}

/// Mode negotiation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    /// The board is rebooting into the required firmware.
    Initializing,
    /// The board runs the required firmware; the command was sent.
    Initialized,
}

/// Write status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Erase in progress.
    Erasing,
    /// Erase finished, writing starts.
    EraseComplete,
    /// The board could not erase.
    EraseFailed,
    /// Write finished, read-back starts.
    Verifying,
    /// Read-back data is flowing.
    VerifyStarting,
    /// The read-back failed.
    VerifyError,
    /// The read-back was cancelled.
    VerifyCancelled,
    /// The read-back timed out.
    VerifyTimedOut,
    /// Written data does not match on the chips in the mask.
    VerificationFailure(ChipMask),
    /// Written without verification.
    CompleteNoVerify,
    /// Written and verified.
    CompleteVerifyOk,
    /// The write failed.
    Error,
    /// The write was cancelled.
    Cancelled,
    /// The write timed out.
    TimedOut,
    /// The data does not fit the SIMM or region.
    FileTooBig,
    /// Region start or length is not a multiple of the erase block.
    EraseBlockWrongSize,
    /// The firmware only supports 2 MiB SIMMs.
    NeedsFirmwareUpdateBiggerSimm,
    /// The firmware cannot verify while writing.
    NeedsFirmwareUpdateVerifyWhileWrite,
    /// The firmware cannot erase part of the SIMM.
    NeedsFirmwareUpdateErasePortion,
    /// The firmware cannot select individual chips.
    NeedsFirmwareUpdateIndividualChips,
    /// The firmware cannot use shifted unlock addresses.
    NeedsFirmwareUpdateAddressMode,
}

impl WriteStatus {
    /// Whether this status ends the write.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            Self::Erasing | Self::EraseComplete | Self::Verifying | Self::VerifyStarting
        )
    }
}

impl fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erasing => f.write_str("erasing"),
            Self::EraseComplete => f.write_str("erase complete"),
            Self::EraseFailed => f.write_str("erase failed"),
            Self::Verifying => f.write_str("verifying"),
            Self::VerifyStarting => f.write_str("reading back"),
            Self::VerifyError => f.write_str("read-back failed"),
            Self::VerifyCancelled => f.write_str("verification cancelled"),
            Self::VerifyTimedOut => f.write_str("verification timed out"),
            Self::VerificationFailure(mask) => {
                write!(f, "verification failed (bad chip mask {mask})")
            },
            Self::CompleteNoVerify => f.write_str("write complete"),
            Self::CompleteVerifyOk => f.write_str("write complete and verified"),
            Self::Error => f.write_str("write failed"),
            Self::Cancelled => f.write_str("write cancelled"),
            Self::TimedOut => f.write_str("write timed out"),
            Self::FileTooBig => f.write_str("data is too big for the SIMM"),
            Self::EraseBlockWrongSize => {
                f.write_str("region start and length must be multiples of 256 KiB")
            },
            Self::NeedsFirmwareUpdateBiggerSimm => {
                f.write_str("programmer firmware update required for SIMMs larger than 2 MiB")
            },
            Self::NeedsFirmwareUpdateVerifyWhileWrite => {
                f.write_str("programmer firmware update required to verify while writing")
            },
            Self::NeedsFirmwareUpdateErasePortion => {
                f.write_str("programmer firmware update required to write part of the SIMM")
            },
            Self::NeedsFirmwareUpdateIndividualChips => {
                f.write_str("programmer firmware update required to write individual chips")
            },
            Self::NeedsFirmwareUpdateAddressMode => {
                f.write_str("programmer firmware update required for this chip type")
            },
        }
    }
}

/// Read status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Data is flowing.
    Starting,
    /// All data received.
    Complete,
    /// The read failed.
    Error,
    /// The read was cancelled.
    Cancelled,
    /// The read timed out.
    TimedOut,
}

impl fmt::Display for ReadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "reading",
            Self::Complete => "read complete",
            Self::Error => "read failed",
            Self::Cancelled => "read cancelled",
            Self::TimedOut => "read timed out",
        })
    }
}

/// Identification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationStatus {
    /// ID bytes are flowing.
    Starting,
    /// IDs captured.
    Complete,
    /// Identification failed.
    Error,
    /// Identification timed out.
    TimedOut,
    /// The firmware lacks size or address mode selection.
    NeedsFirmwareUpdate,
}

impl fmt::Display for IdentificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "identifying",
            Self::Complete => "identification complete",
            Self::Error => "identification failed",
            Self::TimedOut => "identification timed out",
            Self::NeedsFirmwareUpdate => {
                "programmer firmware update required to identify this SIMM"
            },
        })
    }
}

/// Electrical test status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectricalTestStatus {
    /// The board started testing.
    Started,
    /// No shorts found.
    Passed,
    /// Shorts found (or the test broke off after starting).
    Failed,
    /// The test timed out.
    TimedOut,
    /// The board refused to start.
    CouldntStart,
}

impl fmt::Display for ElectricalTestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "electrical test started",
            Self::Passed => "electrical test passed",
            Self::Failed => "electrical test failed",
            Self::TimedOut => "electrical test timed out",
            Self::CouldntStart => "electrical test could not start",
        })
    }
}

/// Firmware flash status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareFlashStatus {
    /// Firmware data is flowing.
    Starting,
    /// Firmware written.
    Complete,
    /// Flashing failed.
    Error,
    /// Flashing was cancelled.
    Cancelled,
    /// Flashing timed out.
    TimedOut,
}

impl fmt::Display for FirmwareFlashStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "flashing firmware",
            Self::Complete => "firmware flash complete",
            Self::Error => "firmware flash failed",
            Self::Cancelled => "firmware flash cancelled",
            Self::TimedOut => "firmware flash timed out",
        })
    }
}

/// Notification from the engine to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammerEvent {
    /// Mode negotiation progress.
    Start(StartStatus),
    /// Total byte count of a phase.
    TotalLength(Phase, u32),
    /// Bytes completed so far in a phase.
    CompletionLength(Phase, u32),
    /// Write status.
    Write(WriteStatus),
    /// Read status.
    Read(ReadStatus),
    /// Identification status.
    Identification(IdentificationStatus),
    /// Electrical test status.
    ElectricalTest(ElectricalTestStatus),
    /// Two shorted pins (raw indices, see [`pin_name`](crate::protocol::pin_name)).
    ElectricalTestFailLocation(u8, u8),
    /// Firmware flash status.
    FirmwareFlash(FirmwareFlashStatus),
    /// A programmer board appeared while idle.
    BoardConnected,
    /// The programmer board went away while idle.
    BoardDisconnected,
    /// The programmer board went away in the middle of an operation.
    BoardDisconnectedDuringOperation,
}

impl ProgrammerEvent {
    /// Whether this event ends the running operation.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Write(status) => status.is_terminal(),
            Self::Read(status) => *status != ReadStatus::Starting,
            Self::Identification(status) => *status != IdentificationStatus::Starting,
            Self::ElectricalTest(status) => *status != ElectricalTestStatus::Started,
            Self::FirmwareFlash(status) => *status != FirmwareFlashStatus::Starting,
            Self::BoardDisconnectedDuringOperation => true,
            Self::Start(_)
            | Self::TotalLength(..)
            | Self::CompletionLength(..)
            | Self::ElectricalTestFailLocation(..)
            | Self::BoardConnected
            | Self::BoardDisconnected => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(!ProgrammerEvent::Write(WriteStatus::Erasing).is_terminal());
        assert!(!ProgrammerEvent::Write(WriteStatus::Verifying).is_terminal());
        assert!(ProgrammerEvent::Write(WriteStatus::CompleteVerifyOk).is_terminal());
        assert!(ProgrammerEvent::Write(WriteStatus::VerifyTimedOut).is_terminal());
        assert!(!ProgrammerEvent::Read(ReadStatus::Starting).is_terminal());
        assert!(ProgrammerEvent::Read(ReadStatus::Complete).is_terminal());
        assert!(!ProgrammerEvent::ElectricalTest(ElectricalTestStatus::Started).is_terminal());
        assert!(ProgrammerEvent::ElectricalTest(ElectricalTestStatus::CouldntStart).is_terminal());
        assert!(ProgrammerEvent::BoardDisconnectedDuringOperation.is_terminal());
        assert!(!ProgrammerEvent::BoardConnected.is_terminal());
        assert!(!ProgrammerEvent::CompletionLength(Phase::Read, 1024).is_terminal());
    }

    #[test]
    fn test_verification_failure_display() {
        let status = WriteStatus::VerificationFailure(ChipMask::new(0x08));
        assert_eq!(status.to_string(), "verification failed (bad chip mask 0x08)");
    }
}
