//! Pin index decoding for electrical test failures.

/// Highest address line index.
const LAST_ADDRESS_PIN: u8 = 20;
/// First data line index.
const FIRST_DATA_PIN: u8 = 21;
/// Last data line index.
const LAST_DATA_PIN: u8 = 52;
/// Chip select.
const CS_PIN: u8 = 53;
/// Output enable.
const OE_PIN: u8 = 54;
/// Write enable.
const WE_PIN: u8 = 55;
/// Supply voltage.
const VCC_PIN: u8 = 0xFE;
/// Ground.
const GND_PIN: u8 = 0xFF;

/// Label a pin index reported by the electrical test.
///
/// Data lines are reported in board order, which reverses the byte lanes of
/// the 32-bit data bus relative to the usual D0..D31 labeling.
pub fn pin_name(index: u8) -> String {
    match index {
        0..=LAST_ADDRESS_PIN => format!("A{index}"),
        FIRST_DATA_PIN..=LAST_DATA_PIN => {
            let d = index - FIRST_DATA_PIN;
            let line = match d {
                0..8 => d + 24,
                8..16 => d + 8,
                16..24 => d - 8,
                _ => d - 24,
            };
            format!("D{line}")
        },
        CS_PIN => "CS".to_string(),
        OE_PIN => "OE".to_string(),
        WE_PIN => "WE".to_string(),
        VCC_PIN => "+5V".to_string(),
        GND_PIN => "GND".to_string(),
        _ => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_lines() {
        assert_eq!(pin_name(0), "A0");
        assert_eq!(pin_name(7), "A7");
        assert_eq!(pin_name(20), "A20");
    }

    #[test]
    fn test_data_lines_rotated() {
        assert_eq!(pin_name(21), "D24");
        assert_eq!(pin_name(28), "D31");
        assert_eq!(pin_name(29), "D16");
        assert_eq!(pin_name(37), "D8");
        assert_eq!(pin_name(45), "D0");
        assert_eq!(pin_name(52), "D7");
    }

    #[test]
    fn test_control_and_power() {
        assert_eq!(pin_name(53), "CS");
        assert_eq!(pin_name(54), "OE");
        assert_eq!(pin_name(55), "WE");
        assert_eq!(pin_name(0xFE), "+5V");
        assert_eq!(pin_name(0xFF), "GND");
    }

    #[test]
    fn test_unknown() {
        assert_eq!(pin_name(56), "?");
        assert_eq!(pin_name(200), "?");
    }
}
