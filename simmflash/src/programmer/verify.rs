//! Write verification.
//!
//! Verify-while-writing happens on the board and surfaces as
//! [`WriteReply::VerifyFailure`](crate::protocol::WriteReply::VerifyFailure).
//! Verify-after-write reads the written range back into a [`Verification`]
//! and compares it with the rewound write source.

use std::io::{self, Read, Seek, SeekFrom};
use std::str::FromStr;

use crate::error::Error;
use crate::programmer::session::DataSource;
use crate::simm::ChipMask;

/// How writes are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum VerifyMode {
    /// Do not verify.
    #[default]
    None,
    /// The board compares each chunk as it writes it.
    WhileWriting,
    /// Read the data back after writing and compare on the host.
    AfterWrite,
}

impl FromStr for VerifyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" | "off" => Ok(Self::None),
            "while-writing" | "while-write" => Ok(Self::WhileWriting),
            "after-write" | "after" => Ok(Self::AfterWrite),
            other => Err(Error::Config(format!(
                "unknown verify mode '{other}' (expected none, while-writing or after-write)"
            ))),
        }
    }
}

/// Chips with at least one mismatching byte, restricted to `written`.
///
/// Byte `k` belongs to chip position `k % 4`. Bytes missing from `actual`
/// count as mismatches.
pub fn bad_chip_mask(expected: &[u8], actual: &[u8], written: ChipMask) -> ChipMask {
    let mut bad = ChipMask::NONE;
    for (k, byte) in expected.iter().enumerate() {
        if actual.get(k) != Some(byte) {
            bad |= ChipMask::for_position(k);
            if bad.is_all() {
                break;
            }
        }
    }
    bad & written
}

/// Read-back in progress for verify-after-write.
pub(crate) struct Verification {
    source: Box<dyn DataSource>,
    chip_mask: ChipMask,
    readback: Vec<u8>,
}

impl Verification {
    pub fn new(source: Box<dyn DataSource>, chip_mask: ChipMask, length: u32) -> Self {
        Self {
            source,
            chip_mask,
            readback: Vec::with_capacity(length as usize),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.readback.extend_from_slice(bytes);
    }

    /// Compare the read-back with the source from its start.
    pub fn finish(mut self) -> io::Result<ChipMask> {
        self.source.seek(SeekFrom::Start(0))?;
        let mut expected = Vec::with_capacity(self.readback.len());
        self.source.read_to_end(&mut expected)?;
        Ok(bad_chip_mask(&expected, &self.readback, self.chip_mask))
    }
}
