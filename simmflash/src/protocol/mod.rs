//! Wire vocabulary of the programmer board.
//!
//! - [`command`]: command bytes, reply decoding, capability negotiation
//! - [`pins`]: electrical test pin labels

pub mod command;
pub mod pins;

pub use command::{
    BoardMode, BootloaderReply, BootloaderRequest, Capability, Command, CommandReply,
    ElectricalTestReply, EraseReply, ReadAck, ReadReply, WriteReply, WriteRequest,
};
pub use pins::pin_name;
