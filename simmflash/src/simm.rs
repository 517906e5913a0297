//! SIMM geometry: capacity, chip type, chip mask and byte interleaving.
//!
//! A SIMM carries four flash chips on a 32-bit data bus. The combined image is
//! big-endian interleaved: byte `k` of the image lives in chip position
//! `k % 4`, position 0 being the most significant byte lane. Chip masks use
//! the reverse numbering, so position `p` is bit `3 - p`.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::protocol::command::ERASE_BLOCK_SIZE;

/// Smallest capacity tier; anything at or below it is what old firmware assumes.
pub const SMALLEST_CAPACITY: u32 = 2 * 1024 * 1024;

/// Number of chip positions on a SIMM.
pub const CHIP_COUNT: usize = 4;

/// Flash chip package and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ChipType {
    /// PLCC-32, 8-bit.
    #[default]
    PlccX8,
    /// TSOP, 8-bit.
    TsopX8,
    /// TSOP, 16-bit (byte mode addressing).
    TsopX16,
}

impl ChipType {
    /// Unlock addressing used by this chip type.
    pub fn address_mode(self) -> AddressMode {
        match self {
            Self::PlccX8 | Self::TsopX8 => AddressMode::Straight,
            Self::TsopX16 => AddressMode::Shifted,
        }
    }

    /// Short name as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            Self::PlccX8 => "plcc-x8",
            Self::TsopX8 => "tsop-x8",
            Self::TsopX16 => "tsop-x16",
        }
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChipType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "plcc-x8" | "plcc" | "plcc32" => Ok(Self::PlccX8),
            "tsop-x8" => Ok(Self::TsopX8),
            "tsop-x16" => Ok(Self::TsopX16),
            other => Err(Error::Config(format!(
                "unknown chip type '{other}' (expected plcc-x8, tsop-x8 or tsop-x16)"
            ))),
        }
    }
}

/// Address convention for the flash unlock sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    /// Unlock addresses are used as-is.
    #[default]
    Straight,
    /// Unlock addresses are shifted left by one (x16 parts in byte mode).
    Shifted,
}

/// Capacity and chip type of the inserted SIMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimmConfig {
    /// Total capacity in bytes.
    pub capacity: u32,
    /// Chip type.
    pub chip_type: ChipType,
}

impl Default for SimmConfig {
    fn default() -> Self {
        Self {
            capacity: SMALLEST_CAPACITY,
            chip_type: ChipType::PlccX8,
        }
    }
}

impl SimmConfig {
    /// Create a configuration.
    pub fn new(capacity: u32, chip_type: ChipType) -> Self {
        Self {
            capacity,
            chip_type,
        }
    }

    /// Address mode derived from the chip type.
    pub fn address_mode(&self) -> AddressMode {
        self.chip_type.address_mode()
    }

    /// Whether the capacity is what firmware without size selection assumes.
    pub fn is_legacy_size(&self) -> bool {
        self.capacity <= SMALLEST_CAPACITY
    }
}

/// Parse a capacity such as `8M`, `2MiB`, `512K` or `2097152`.
pub fn parse_capacity(s: &str) -> crate::Result<u32> {
    let s = s.trim();
    let upper = s.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = upper
        .strip_suffix("MIB")
        .or_else(|| upper.strip_suffix("MB"))
        .or_else(|| upper.strip_suffix('M'))
    {
        (n, 1024 * 1024)
    } else if let Some(n) = upper
        .strip_suffix("KIB")
        .or_else(|| upper.strip_suffix("KB"))
        .or_else(|| upper.strip_suffix('K'))
    {
        (n, 1024)
    } else {
        (upper.as_str(), 1)
    };

    digits
        .trim()
        .parse::<u32>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .filter(|n| *n > 0)
        .ok_or_else(|| Error::Config(format!("invalid capacity '{s}'")))
}

/// Selector of participating chip positions. Bit `3 - p` is chip position `p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipMask(u8);

impl ChipMask {
    /// All four chips.
    pub const ALL: Self = Self(0x0F);
    /// No chips.
    pub const NONE: Self = Self(0);

    /// Build from a raw value; only the low four bits are kept.
    pub const fn new(bits: u8) -> Self {
        Self(bits & 0x0F)
    }

    /// Mask with only chip position `position` (0..4) set.
    pub fn for_position(position: usize) -> Self {
        Self(1 << (CHIP_COUNT - 1 - position % CHIP_COUNT))
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether chip position `position` is selected.
    pub fn contains_position(self, position: usize) -> bool {
        !(self & Self::for_position(position)).is_empty()
    }

    /// No bit set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether this is the default all-chips mask.
    pub const fn is_all(self) -> bool {
        self.0 == Self::ALL.0
    }
}

impl Default for ChipMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::ops::BitAnd for ChipMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::ops::BitOr for ChipMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ChipMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ChipMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// A byte range of the SIMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start offset in bytes.
    pub offset: u32,
    /// Length in bytes.
    pub length: u32,
}

impl Region {
    /// Create a region.
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    /// The whole SIMM.
    pub fn whole(config: &SimmConfig) -> Self {
        Self::new(0, config.capacity)
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.length)
    }

    /// Start and length are both multiples of the erase block size.
    pub fn is_block_aligned(&self) -> bool {
        self.offset % ERASE_BLOCK_SIZE == 0 && self.length % ERASE_BLOCK_SIZE == 0
    }

    /// Region lies inside a SIMM of this configuration.
    pub fn fits(&self, config: &SimmConfig) -> bool {
        self.end() <= u64::from(config.capacity)
    }

    /// Region is exactly the whole SIMM.
    pub fn covers(&self, config: &SimmConfig) -> bool {
        self.offset == 0 && self.length == config.capacity
    }
}

/// Combine up to four per-chip streams into one SIMM image.
///
/// `chips[p]` feeds chip position `p` (position 0 is the most significant
/// byte lane). Missing chips and short streams are filled with `0xFF`. The
/// returned mask selects the chips that were supplied.
pub fn interleave(chips: [Option<&[u8]>; CHIP_COUNT]) -> (Vec<u8>, ChipMask) {
    let per_chip = chips.iter().flatten().map(|c| c.len()).max().unwrap_or(0);
    let mut mask = ChipMask::NONE;
    for (position, chip) in chips.iter().enumerate() {
        if chip.is_some() {
            mask |= ChipMask::for_position(position);
        }
    }

    let mut combined = Vec::with_capacity(per_chip * CHIP_COUNT);
    for i in 0..per_chip {
        for chip in &chips {
            combined.push(chip.and_then(|c| c.get(i).copied()).unwrap_or(0xFF));
        }
    }
    (combined, mask)
}

/// Split a SIMM image into its four per-chip streams.
pub fn deinterleave(data: &[u8]) -> [Vec<u8>; CHIP_COUNT] {
    let mut chips: [Vec<u8>; CHIP_COUNT] = Default::default();
    for chip in &mut chips {
        chip.reserve(data.len().div_ceil(CHIP_COUNT));
    }
    for (k, byte) in data.iter().enumerate() {
        chips[k % CHIP_COUNT].push(*byte);
    }
    chips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_type_address_mode() {
        assert_eq!(ChipType::PlccX8.address_mode(), AddressMode::Straight);
        assert_eq!(ChipType::TsopX8.address_mode(), AddressMode::Straight);
        assert_eq!(ChipType::TsopX16.address_mode(), AddressMode::Shifted);
    }

    #[test]
    fn test_chip_type_from_str() {
        assert_eq!("plcc-x8".parse::<ChipType>().unwrap(), ChipType::PlccX8);
        assert_eq!("TSOP_X16".parse::<ChipType>().unwrap(), ChipType::TsopX16);
        assert!("dip".parse::<ChipType>().is_err());
    }

    #[test]
    fn test_parse_capacity() {
        assert_eq!(parse_capacity("2M").unwrap(), 2_097_152);
        assert_eq!(parse_capacity("8MiB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_capacity("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_capacity("4194304").unwrap(), 4_194_304);
        assert!(parse_capacity("0").is_err());
        assert!(parse_capacity("lots").is_err());
        assert!(parse_capacity("9999999M").is_err());
    }

    #[test]
    fn test_legacy_size() {
        assert!(SimmConfig::new(SMALLEST_CAPACITY, ChipType::PlccX8).is_legacy_size());
        assert!(!SimmConfig::new(8 * 1024 * 1024, ChipType::TsopX8).is_legacy_size());
    }

    #[test]
    fn test_chip_mask_positions() {
        assert_eq!(ChipMask::for_position(0).bits(), 0x08);
        assert_eq!(ChipMask::for_position(3).bits(), 0x01);
        assert!(ChipMask::ALL.contains_position(2));
        assert!(!ChipMask::new(0x08).contains_position(1));
        assert_eq!(ChipMask::new(0xFF), ChipMask::ALL);
        assert_eq!(ChipMask::new(0x05).to_string(), "0x05");
    }

    #[test]
    fn test_region_alignment() {
        assert!(Region::new(0, ERASE_BLOCK_SIZE).is_block_aligned());
        assert!(Region::new(ERASE_BLOCK_SIZE, 2 * ERASE_BLOCK_SIZE).is_block_aligned());
        assert!(!Region::new(100_000, 100_000).is_block_aligned());
        assert!(!Region::new(0, 100_000).is_block_aligned());
    }

    #[test]
    fn test_region_fits_and_covers() {
        let config = SimmConfig::default();
        assert!(Region::whole(&config).covers(&config));
        assert!(Region::whole(&config).fits(&config));
        assert!(!Region::new(ERASE_BLOCK_SIZE, config.capacity).fits(&config));
        assert!(!Region::new(0, ERASE_BLOCK_SIZE).covers(&config));
    }

    #[test]
    fn test_interleave_most_significant_first() {
        let a = [0xA0, 0xA1];
        let b = [0xB0, 0xB1];
        let (combined, mask) = interleave([Some(&a[..]), Some(&b[..]), None, None]);
        assert_eq!(combined, vec![0xA0, 0xB0, 0xFF, 0xFF, 0xA1, 0xB1, 0xFF, 0xFF]);
        assert_eq!(mask, ChipMask::new(0x0C));
    }

    #[test]
    fn test_interleave_pads_short_streams() {
        let a = [1, 2];
        let d = [4];
        let (combined, mask) = interleave([Some(&a[..]), None, None, Some(&d[..])]);
        assert_eq!(combined, vec![1, 0xFF, 0xFF, 4, 2, 0xFF, 0xFF, 0xFF]);
        assert_eq!(mask, ChipMask::new(0x09));
    }

    #[test]
    fn test_deinterleave_inverts_interleave() {
        let data: Vec<u8> = (0..16).collect();
        let chips = deinterleave(&data);
        assert_eq!(chips[0], vec![0, 4, 8, 12]);
        assert_eq!(chips[3], vec![3, 7, 11, 15]);

        let (combined, mask) = interleave([
            Some(chips[0].as_slice()),
            Some(chips[1].as_slice()),
            Some(chips[2].as_slice()),
            Some(chips[3].as_slice()),
        ]);
        assert_eq!(combined, data);
        assert!(mask.is_all());
    }
}
