//! Write, read, identify and electrical test command implementations.

use anyhow::{Context, Result};
use console::style;
use simmflash::protocol::command::ERASE_BLOCK_SIZE;
use simmflash::simm::CHIP_COUNT;
use simmflash::{
    AddressMode, ChipIds, ChipMask, DataSink, ElectricalTestStatus, IdentificationStatus,
    ProgrammerEvent, ReadStatus, Region, SimmConfig, WriteOptions, WriteStatus, deinterleave,
    interleave,
};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};

use super::{failure, resolve_settings};
use crate::config::Config;
use crate::runner::Runner;
use crate::{Cli, CliError};

/// Parse a `POS=FILE` per-chip image argument.
pub(crate) fn parse_chip_file(s: &str) -> Result<(usize, PathBuf), String> {
    let (position, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected POSITION=FILE, got '{s}'"))?;
    let position: usize = position
        .trim()
        .parse()
        .map_err(|_| format!("invalid chip position '{position}'"))?;
    if position >= CHIP_COUNT {
        return Err(format!(
            "chip position must be 0-{}, got {position}",
            CHIP_COUNT - 1
        ));
    }
    if path.is_empty() {
        return Err("missing file name".to_string());
    }
    Ok((position, PathBuf::from(path)))
}

/// Data to write: a combined image file, or per-chip images merged in memory.
pub(crate) enum WriteImage {
    /// Combined SIMM image on disk.
    File(PathBuf),
    /// Interleaved per-chip images and the chips they cover.
    Chips(Vec<u8>, ChipMask),
}

impl WriteImage {
    /// Load the image named on the command line.
    pub fn new(file: Option<&Path>, chips: &[(usize, PathBuf)]) -> Result<Self> {
        if let Some(file) = file {
            if !file.is_file() {
                anyhow::bail!("Image not found: {}", file.display());
            }
            return Ok(Self::File(file.to_path_buf()));
        }

        let mut per_chip: [Option<Vec<u8>>; CHIP_COUNT] = Default::default();
        for (position, path) in chips {
            if per_chip[*position].is_some() {
                return Err(
                    CliError::Usage(format!("chip position {position} given twice")).into(),
                );
            }
            let data = fs::read(path)
                .with_context(|| format!("Failed to read chip image {}", path.display()))?;
            per_chip[*position] = Some(data);
        }
        if per_chip.iter().all(Option::is_none) {
            return Err(CliError::Usage("no image given".to_string()).into());
        }

        let (combined, mask) = interleave([
            per_chip[0].as_deref(),
            per_chip[1].as_deref(),
            per_chip[2].as_deref(),
            per_chip[3].as_deref(),
        ]);
        Ok(Self::Chips(combined, mask))
    }

    fn len(&self) -> Result<u64> {
        match self {
            Self::File(path) => Ok(fs::metadata(path)
                .with_context(|| format!("Failed to read {}", path.display()))?
                .len()),
            Self::Chips(data, _) => Ok(data.len() as u64),
        }
    }
}

/// Options of the write command.
pub(crate) struct WriteArgs<'a> {
    /// Region start.
    pub offset: Option<u32>,
    /// Region length.
    pub length: Option<u32>,
    /// Raw chip mask.
    pub chips: Option<u32>,
    /// Verify mode override.
    pub verify: Option<&'a str>,
}

/// Erase region requested on the command line; the length defaults to the
/// image size rounded up to whole erase blocks.
fn write_region(offset: Option<u32>, length: Option<u32>, image_len: u64) -> Option<Region> {
    if offset.is_none() && length.is_none() {
        return None;
    }
    let length = length.unwrap_or_else(|| {
        let blocks = image_len.div_ceil(u64::from(ERASE_BLOCK_SIZE));
        u32::try_from(blocks * u64::from(ERASE_BLOCK_SIZE)).unwrap_or(u32::MAX)
    });
    Some(Region::new(offset.unwrap_or(0), length))
}

fn chip_mask(chips: Option<u32>, image: &WriteImage) -> Result<ChipMask> {
    match (chips, image) {
        (Some(_), WriteImage::Chips(..)) => Err(CliError::Usage(
            "--chips cannot be combined with per-chip images".to_string(),
        )
        .into()),
        (Some(bits), _) => match u8::try_from(bits) {
            Ok(bits @ 0x01..=0x0F) => Ok(ChipMask::new(bits)),
            _ => Err(CliError::Usage(format!("chip mask must be 0x1-0xF, got {bits:#X}")).into()),
        },
        (None, WriteImage::Chips(_, mask)) => Ok(*mask),
        (None, WriteImage::File(_)) => Ok(ChipMask::ALL),
    }
}

/// Write command implementation.
pub(crate) fn cmd_write(
    cli: &Cli,
    config: &Config,
    image: &WriteImage,
    args: &WriteArgs<'_>,
) -> Result<()> {
    let settings = resolve_settings(cli, config, args.verify)?;
    let options = WriteOptions {
        chip_mask: chip_mask(args.chips, image)?,
        region: write_region(args.offset, args.length, image.len()?),
    };

    let mut runner = Runner::connect(&settings)?;
    match image {
        WriteImage::File(path) => {
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            runner.programmer().begin_write(file, options)?;
        },
        WriteImage::Chips(data, _) => {
            runner
                .programmer()
                .begin_write(Cursor::new(data.clone()), options)?;
        },
    }

    let outcome = runner.run()?;
    match outcome.event {
        ProgrammerEvent::Write(WriteStatus::CompleteVerifyOk) => {
            if !cli.quiet {
                eprintln!("{} Write complete and verified", style("✓").green());
            }
            Ok(())
        },
        ProgrammerEvent::Write(WriteStatus::CompleteNoVerify) => {
            if !cli.quiet {
                eprintln!("{} Write complete", style("✓").green());
            }
            Ok(())
        },
        ProgrammerEvent::Write(WriteStatus::VerificationFailure(mask)) => {
            if !cli.quiet {
                for position in (0..CHIP_COUNT).filter(|p| mask.contains_position(*p)) {
                    eprintln!("  {} chip {position} does not match", style("✗").red());
                }
            }
            Err(failure(outcome.event))
        },
        event => Err(failure(event)),
    }
}

/// Read region requested on the command line.
fn read_region(
    offset: Option<u32>,
    length: Option<u32>,
    simm: &SimmConfig,
) -> Result<Option<Region>> {
    if offset.is_none() && length.is_none() {
        return Ok(None);
    }
    let offset = offset.unwrap_or(0);
    let length = length.unwrap_or_else(|| simm.capacity.saturating_sub(offset));
    let region = Region::new(offset, length);
    if length == 0 || !region.fits(simm) {
        return Err(CliError::Usage(format!(
            "range {offset:#X}+{length:#X} is outside the {} byte SIMM",
            simm.capacity
        ))
        .into());
    }
    Ok(Some(region))
}

/// Output path of one chip's bytes.
fn chip_path(file: &Path, position: usize) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(format!(".chip{position}"));
    PathBuf::from(name)
}

/// Read command implementation.
pub(crate) fn cmd_read(
    cli: &Cli,
    config: &Config,
    file: &Path,
    offset: Option<u32>,
    length: Option<u32>,
    split: bool,
) -> Result<()> {
    let settings = resolve_settings(cli, config, None)?;
    let region = read_region(offset, length, &settings.simm)?;

    let mut runner = Runner::connect(&settings)?;
    let sink = if split {
        DataSink::memory()
    } else {
        let out =
            File::create(file).with_context(|| format!("Failed to create {}", file.display()))?;
        DataSink::writer(BufWriter::new(out))
    };
    runner.programmer().begin_read(sink, region)?;

    let outcome = runner.run()?;
    if outcome.event != ProgrammerEvent::Read(ReadStatus::Complete) {
        if !split {
            let _ = fs::remove_file(file);
        }
        return Err(failure(outcome.event));
    }

    if split {
        let data = runner.programmer().take_read_data().unwrap_or_default();
        fs::write(file, &data).with_context(|| format!("Failed to write {}", file.display()))?;
        for (position, chip) in deinterleave(&data).iter().enumerate() {
            let path = chip_path(file, position);
            fs::write(&path, chip)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }

    if !cli.quiet {
        eprintln!("{} Read complete: {}", style("✓").green(), file.display());
    }
    Ok(())
}

fn ids_json(ids: Option<&ChipIds>) -> serde_json::Value {
    ids.map_or(serde_json::Value::Null, |ids| {
        (0..CHIP_COUNT)
            .filter_map(|position| ids.chip(position).map(|id| (position, id)))
            .map(|(position, (manufacturer, device))| {
                serde_json::json!({
                    "chip": position,
                    "manufacturer": manufacturer,
                    "device": device,
                })
            })
            .collect()
    })
}

fn print_ids(mode: AddressMode, ids: &ChipIds) {
    let label = match mode {
        AddressMode::Straight => "straight",
        AddressMode::Shifted => "shifted",
    };
    eprintln!("{}", style(format!("Chip IDs ({label} unlock)")).bold().underlined());
    for position in 0..CHIP_COUNT {
        if let Some((manufacturer, device)) = ids.chip(position) {
            eprintln!(
                "  Chip {position}: manufacturer {}  device {}",
                style(format!("{manufacturer:#04X}")).cyan(),
                style(format!("{device:#04X}")).cyan()
            );
        }
    }
}

/// Identify command implementation.
pub(crate) fn cmd_identify(
    cli: &Cli,
    config: &Config,
    all_layouts: bool,
    json: bool,
) -> Result<()> {
    let settings = resolve_settings(cli, config, None)?;
    let mut runner = Runner::connect(&settings)?;
    if all_layouts {
        runner.programmer().begin_identify_all_layouts()?;
    } else {
        runner.programmer().begin_identify()?;
    }

    let outcome = runner.run()?;
    if outcome.event != ProgrammerEvent::Identification(IdentificationStatus::Complete) {
        return Err(failure(outcome.event));
    }

    let result = *runner.programmer().identification();
    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "straight": ids_json(result.straight.as_ref()),
                "shifted": ids_json(result.shifted.as_ref()),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if let Some(ids) = &result.straight {
        print_ids(AddressMode::Straight, ids);
    }
    if let Some(ids) = &result.shifted {
        print_ids(AddressMode::Shifted, ids);
    }
    Ok(())
}

/// Electrical test command implementation.
pub(crate) fn cmd_test(cli: &Cli, config: &Config) -> Result<()> {
    let settings = resolve_settings(cli, config, None)?;
    let mut runner = Runner::connect(&settings)?;
    runner.programmer().begin_electrical_test()?;

    let outcome = runner.run()?;
    match outcome.event {
        ProgrammerEvent::ElectricalTest(ElectricalTestStatus::Passed) => {
            if !cli.quiet {
                eprintln!("{} No shorted pins found", style("✓").green());
            }
            Ok(())
        },
        ProgrammerEvent::ElectricalTest(ElectricalTestStatus::Failed)
            if !outcome.shorts.is_empty() =>
        {
            anyhow::bail!("{} shorted pin pair(s) found", outcome.shorts.len())
        },
        event => Err(failure(event)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simmflash::ChipType;

    #[test]
    fn test_parse_chip_file() {
        assert_eq!(
            parse_chip_file("2=rom_c2.bin"),
            Ok((2, PathBuf::from("rom_c2.bin")))
        );
        assert!(parse_chip_file("4=rom.bin").is_err());
        assert!(parse_chip_file("rom.bin").is_err());
        assert!(parse_chip_file("x=rom.bin").is_err());
        assert!(parse_chip_file("1=").is_err());
    }

    #[test]
    fn test_write_region_defaults() {
        assert_eq!(write_region(None, None, 1000), None);
        assert_eq!(
            write_region(Some(0x40000), None, 1000),
            Some(Region::new(0x40000, ERASE_BLOCK_SIZE))
        );
        assert_eq!(
            write_region(None, Some(0x80000), 1000),
            Some(Region::new(0, 0x80000))
        );
        assert_eq!(
            write_region(Some(0), None, u64::from(ERASE_BLOCK_SIZE) + 1),
            Some(Region::new(0, 2 * ERASE_BLOCK_SIZE))
        );
    }

    #[test]
    fn test_chip_mask_selection() {
        let file = WriteImage::File(PathBuf::from("rom.bin"));
        assert_eq!(chip_mask(None, &file).unwrap(), ChipMask::ALL);
        assert_eq!(chip_mask(Some(0x3), &file).unwrap(), ChipMask::new(0x3));
        assert!(chip_mask(Some(0), &file).is_err());
        assert!(chip_mask(Some(0x10), &file).is_err());

        let chips = WriteImage::Chips(vec![0xFF; 8], ChipMask::new(0x5));
        assert_eq!(chip_mask(None, &chips).unwrap(), ChipMask::new(0x5));
        assert!(chip_mask(Some(0x1), &chips).is_err());
    }

    #[test]
    fn test_write_image_from_chip_files() {
        let dir = tempfile::tempdir().unwrap();
        let chip0 = dir.path().join("c0.bin");
        let chip2 = dir.path().join("c2.bin");
        fs::write(&chip0, [0x11, 0x12]).unwrap();
        fs::write(&chip2, [0x31]).unwrap();

        let image = WriteImage::new(None, &[(0, chip0), (2, chip2)]).unwrap();
        let WriteImage::Chips(data, mask) = image else {
            panic!("expected per-chip image");
        };
        assert_eq!(mask, ChipMask::new(0x05));
        assert_eq!(data, vec![0x11, 0xFF, 0x31, 0xFF, 0x12, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_write_image_rejects_duplicates_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let chip = dir.path().join("c.bin");
        fs::write(&chip, [0u8; 4]).unwrap();

        assert!(WriteImage::new(None, &[(1, chip.clone()), (1, chip)]).is_err());
        assert!(WriteImage::new(Some(&dir.path().join("missing.bin")), &[]).is_err());
    }

    #[test]
    fn test_read_region() {
        let simm = SimmConfig::new(0x200000, ChipType::PlccX8);
        assert_eq!(read_region(None, None, &simm).unwrap(), None);
        assert_eq!(
            read_region(Some(0x1000), None, &simm).unwrap(),
            Some(Region::new(0x1000, 0x1FF000))
        );
        assert!(read_region(Some(0x200000), None, &simm).is_err());
        assert!(read_region(Some(0x100000), Some(0x200000), &simm).is_err());
    }

    #[test]
    fn test_chip_path() {
        assert_eq!(
            chip_path(Path::new("out/rom.bin"), 3),
            PathBuf::from("out/rom.bin.chip3")
        );
    }

    #[test]
    fn test_ids_json() {
        let ids = ChipIds {
            manufacturers: [0x01; 4],
            devices: [0xA4; 4],
        };
        let value = ids_json(Some(&ids));
        assert_eq!(value.as_array().map(Vec::len), Some(4));
        assert_eq!(value[0]["manufacturer"], 1);
        assert_eq!(value[3]["device"], 0xA4);
        assert!(ids_json(None).is_null());
    }
}
