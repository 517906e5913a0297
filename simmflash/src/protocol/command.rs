//! Command and reply bytes exchanged with the programmer board.
//!
//! Every exchange is a single byte in each direction, except for the data
//! phases (1024-byte chunks) and the 32-bit little-endian offset/length words
//! sent during ranged reads, ranged writes and partial erases.
//!
//! Replies share a small numeric space (0, 1, 2, ...) whose meaning depends on
//! the request that was sent, so each reply context has its own enum and the
//! raw byte is decoded exactly once by the state that expects it.

use byteorder::{ByteOrder, LittleEndian};

use crate::simm::ChipMask;

/// Size of every read, write and firmware data chunk.
pub const CHUNK_SIZE: usize = 1024;

/// Value of an erased flash byte; used to pad the final chunk of a write.
pub const PAD_BYTE: u8 = 0xFF;

/// Granularity of the partial erase command.
pub const ERASE_BLOCK_SIZE: u32 = 256 * 1024;

/// Number of identification bytes streamed by the board (4 chips x 2 IDs).
pub const IDENTIFY_PAYLOAD_LEN: usize = 8;

/// Commands sent from the computer to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Return to the idle command loop.
    EnterWaitingMode = 0,
    /// Start the shorted-pin electrical test.
    DoElectricalTest = 1,
    /// Read the manufacturer/device IDs of all four chips.
    IdentifyChips = 2,
    /// Read a single byte (unused by this host).
    ReadByte = 3,
    /// Stream the whole SIMM.
    ReadChips = 4,
    /// Erase the whole SIMM.
    EraseChips = 5,
    /// Write from offset zero.
    WriteChips = 6,
    /// Ask whether the board runs the bootloader or the programmer firmware.
    GetBootloaderState = 7,
    /// Reboot into the bootloader.
    EnterBootloader = 8,
    /// Reboot into the programmer firmware.
    EnterProgrammer = 9,
    /// Bootloader: erase and rewrite the programmer firmware.
    BootloaderEraseAndWriteProgram = 10,
    /// Legacy SIMM size (2 MiB, PLCC-32 parts).
    SetSimmTypePlcc32_2MB = 11,
    /// Any SIMM larger than 2 MiB.
    SetSimmTypeLarger = 12,
    /// Board compares each chunk after writing it.
    SetVerifyWhileWriting = 13,
    /// Board writes without comparing.
    SetNoVerifyWhileWriting = 14,
    /// Erase a block-aligned region.
    ErasePortion = 15,
    /// Write starting at an offset.
    WriteChipsAt = 16,
    /// Read a range.
    ReadChipsAt = 17,
    /// Restrict reads/writes to a subset of chip positions.
    SetChipsMask = 18,
    /// Unlock sequences use straight addresses (8-bit parts).
    SetAddressStraight = 19,
    /// Unlock sequences use shifted addresses (16-bit parts).
    SetAddressShifted = 20,
}

impl Command {
    /// Raw byte on the wire.
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Generic reply to a command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReply {
    /// Accepted.
    Ok,
    /// Rejected.
    Error,
    /// Not understood (older firmware).
    Invalid,
    /// Anything else.
    Unexpected(u8),
}

impl From<u8> for CommandReply {
    fn from(byte: u8) -> Self {
        match byte {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::Invalid,
            other => Self::Unexpected(other),
        }
    }
}

/// Outcome of a speculatively sent setup command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The board supports the feature and consumed the request.
    Accepted,
    /// The board refused, but the requested value is what old firmware does
    /// anyway, so the step can be skipped.
    LegacyDefault,
    /// The board refused a non-default value: it needs a firmware update.
    Missing,
    /// The reply is not part of the command reply space.
    Unexpected(u8),
}

impl CommandReply {
    /// Resolve a setup reply with the benign-default rule.
    ///
    /// `Error` and `Invalid` are ambiguous: the feature may be unknown to the
    /// firmware. That is harmless only when `requested_default` is true.
    pub fn negotiate(self, requested_default: bool) -> Capability {
        match self {
            Self::Ok => Capability::Accepted,
            Self::Error | Self::Invalid if requested_default => Capability::LegacyDefault,
            Self::Error | Self::Invalid => Capability::Missing,
            Self::Unexpected(byte) => Capability::Unexpected(byte),
        }
    }
}

/// Reply to [`Command::GetBootloaderState`] (after the command `OK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardMode {
    /// Bootloader firmware is running.
    Bootloader,
    /// Programmer (application) firmware is running.
    Programmer,
}

impl BoardMode {
    /// Decode a mode reply.
    pub fn from_reply(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Bootloader),
            1 => Some(Self::Programmer),
            _ => None,
        }
    }

    /// Command that reboots the board into this mode.
    pub fn enter_command(self) -> Command {
        match self {
            Self::Bootloader => Command::EnterBootloader,
            Self::Programmer => Command::EnterProgrammer,
        }
    }
}

/// Computer acknowledgement after each received read chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadAck {
    /// Send the next chunk.
    Ok = 0,
    /// Stop reading.
    Cancel = 1,
}

/// Board status after a read acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadReply {
    /// Generic OK.
    Ok,
    /// Read failed.
    Error,
    /// Another chunk follows.
    MoreData,
    /// All data sent.
    Finished,
    /// The cancel request was honored.
    ConfirmCancel,
    /// Anything else.
    Unexpected(u8),
}

impl From<u8> for ReadReply {
    fn from(byte: u8) -> Self {
        match byte {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::MoreData,
            3 => Self::Finished,
            4 => Self::ConfirmCancel,
            other => Self::Unexpected(other),
        }
    }
}

/// Computer request during the write data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteRequest {
    /// Another chunk follows.
    More = 0,
    /// No more data.
    Finish = 1,
    /// Abort the write.
    Cancel = 2,
}

/// Board reply during the write data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteReply {
    /// Ready / chunk written.
    Ok,
    /// Write failed.
    Error,
    /// The cancel request was honored.
    ConfirmCancel,
    /// Verify-while-writing found mismatching chips.
    VerifyFailure(ChipMask),
    /// Anything else.
    Unexpected(u8),
}

/// High bit flag marking a verify-while-writing failure.
const VERIFY_FAILURE_FLAG: u8 = 0x80;

impl From<u8> for WriteReply {
    fn from(byte: u8) -> Self {
        // The flag shares the byte with the bad chip mask, so it must be
        // tested before the literal codes.
        if byte & VERIFY_FAILURE_FLAG != 0 {
            return Self::VerifyFailure(ChipMask::new(byte));
        }
        match byte {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::ConfirmCancel,
            other => Self::Unexpected(other),
        }
    }
}

/// Board replies during a partial erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseReply {
    /// Offset and length accepted, erase started.
    Ok,
    /// Erase failed.
    Error,
    /// Offset or length not aligned/in range.
    OffsetError,
    /// Erase finished.
    Finished,
    /// Anything else.
    Unexpected(u8),
}

impl From<u8> for EraseReply {
    fn from(byte: u8) -> Self {
        match byte {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::OffsetError,
            3 => Self::Finished,
            other => Self::Unexpected(other),
        }
    }
}

/// Value sent by the board after the identification payload.
pub const IDENTIFY_DONE: u8 = 0;

/// Board status during the electrical test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectricalTestReply {
    /// A shorted pair follows (two pin index bytes).
    Fail,
    /// Test finished.
    Done,
    /// Anything else.
    Unexpected(u8),
}

impl From<u8> for ElectricalTestReply {
    fn from(byte: u8) -> Self {
        match byte {
            0 => Self::Fail,
            1 => Self::Done,
            other => Self::Unexpected(other),
        }
    }
}

/// Computer request during the firmware data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootloaderRequest {
    /// Another chunk follows.
    WriteMore = 0,
    /// No more data.
    Finish = 1,
    /// Abort.
    Cancel = 2,
}

/// Bootloader reply during the firmware data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderReply {
    /// Ready / chunk written.
    Ok,
    /// Flash failed.
    Error,
    /// The cancel request was honored.
    ConfirmCancel,
    /// Anything else.
    Unexpected(u8),
}

impl From<u8> for BootloaderReply {
    fn from(byte: u8) -> Self {
        match byte {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::ConfirmCancel,
            other => Self::Unexpected(other),
        }
    }
}

/// Encode two 32-bit words (offset, length) LSB first.
pub fn encode_words(first: u32, second: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    LittleEndian::write_u32(&mut buf[..4], first);
    LittleEndian::write_u32(&mut buf[4..], second);
    buf
}

/// Encode a single 32-bit word LSB first.
pub fn encode_word(value: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, value);
    buf
}

/// Round a length up to a whole number of chunks. `None` if that does not fit
/// in a wire word.
pub fn chunk_aligned(len: u32) -> Option<u32> {
    let chunk = CHUNK_SIZE as u32;
    len.div_ceil(chunk).checked_mul(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::GetBootloaderState.byte(), 7);
        assert_eq!(Command::EnterProgrammer.byte(), 9);
        assert_eq!(Command::BootloaderEraseAndWriteProgram.byte(), 10);
        assert_eq!(Command::SetChipsMask.byte(), 18);
        assert_eq!(Command::SetAddressShifted.byte(), 20);
    }

    #[test]
    fn test_negotiate_benign_default() {
        assert_eq!(CommandReply::Ok.negotiate(false), Capability::Accepted);
        assert_eq!(CommandReply::Error.negotiate(true), Capability::LegacyDefault);
        assert_eq!(CommandReply::Invalid.negotiate(true), Capability::LegacyDefault);
        assert_eq!(CommandReply::Error.negotiate(false), Capability::Missing);
        assert_eq!(CommandReply::Invalid.negotiate(false), Capability::Missing);
        assert_eq!(CommandReply::from(9).negotiate(true), Capability::Unexpected(9));
    }

    #[test]
    fn test_write_reply_high_bit_wins() {
        assert_eq!(WriteReply::from(0), WriteReply::Ok);
        assert_eq!(WriteReply::from(2), WriteReply::ConfirmCancel);
        assert_eq!(
            WriteReply::from(0x80 | 0x05),
            WriteReply::VerifyFailure(ChipMask::new(0x05))
        );
        // High bit with an empty mask is still a verification failure
        assert_eq!(WriteReply::from(0x80), WriteReply::VerifyFailure(ChipMask::NONE));
    }

    #[test]
    fn test_board_mode() {
        assert_eq!(BoardMode::from_reply(0), Some(BoardMode::Bootloader));
        assert_eq!(BoardMode::from_reply(1), Some(BoardMode::Programmer));
        assert_eq!(BoardMode::from_reply(2), None);
        assert_eq!(BoardMode::Programmer.enter_command(), Command::EnterProgrammer);
    }

    #[test]
    fn test_encode_words_little_endian() {
        assert_eq!(
            encode_words(0x0004_0000, 0x0000_0400),
            [0x00, 0x00, 0x04, 0x00, 0x00, 0x04, 0x00, 0x00]
        );
        assert_eq!(encode_word(0x1234_5678), [0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_chunk_aligned() {
        assert_eq!(chunk_aligned(0), Some(0));
        assert_eq!(chunk_aligned(1), Some(1024));
        assert_eq!(chunk_aligned(1024), Some(1024));
        assert_eq!(chunk_aligned(1025), Some(2048));
        assert_eq!(chunk_aligned(u32::MAX - 1023), None);
        assert_eq!(chunk_aligned(u32::MAX), None);
    }
}
