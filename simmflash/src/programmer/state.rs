//! Protocol states.

use crate::protocol::{BoardMode, Command};

/// Command to send once the board runs the right firmware.
#[derive(Debug)]
pub(crate) struct Pending {
    /// Firmware the command needs.
    pub mode: BoardMode,
    /// First command of the operation.
    pub command: Command,
    /// State that expects the reply to `command`.
    pub next: Box<State>,
}

impl Pending {
    pub fn new(mode: BoardMode, command: Command, next: State) -> Self {
        Self {
            mode,
            command,
            next: Box::new(next),
        }
    }
}

/// What the engine is waiting for. Each state consumes one reply byte.
#[derive(Debug, Default)]
pub(crate) enum State {
    /// No operation.
    #[default]
    Idle,

    // Mode negotiation
    AwaitingModeOk(Pending),
    AwaitingModeReply(Pending),
    /// Reboot requested, port closed, waiting for the board to go away.
    SwitchingMode(Pending),
    /// Board went away, waiting for it to come back.
    AwaitingReconnect(Pending),

    // Write
    WriteSetSizeReply,
    WriteSetLayoutReply,
    WriteSetVerifyReply,
    WriteSetChipMaskReply,
    WriteSetChipMaskValueReply,
    WriteEraseReply,
    WriteErasePortionReply,
    WriteErasePortionConfirm,
    WriteErasePortionResult,
    WriteAtReply,
    WriteReply,
    WriteMoreReply,
    WriteFinishReply,
    WriteCancelReply,

    // Read
    ReadStartReply,
    ReadStartOffsetReply,
    ReadLengthReply,
    /// Receiving a chunk; `chunk` bytes of it so far.
    ReadData { chunk: usize },
    ReadStatusReply,

    // Identify
    IdentifySetSizeReply,
    IdentifySetLayoutReply,
    IdentifyOkReply,
    IdentifyData { index: usize },
    IdentifyDoneReply,

    // Electrical test
    TestStartReply,
    TestNextStatus,
    TestFirstFail,
    TestSecondFail { first: u8 },

    // Firmware flash
    FirmwareStartOkReply,
    FirmwareWriteMoreReply,
    FirmwareWriteReply,
    FirmwareFinishReply,
    FirmwareCancelReply,
}

impl State {
    /// Waiting on a reboot rather than on the wire.
    pub fn is_switching(&self) -> bool {
        matches!(self, Self::SwitchingMode(_) | Self::AwaitingReconnect(_))
    }

    /// Per-byte data states, kept out of the trace log.
    pub fn is_bulk(&self) -> bool {
        matches!(self, Self::ReadData { .. } | Self::IdentifyData { .. })
    }
}
