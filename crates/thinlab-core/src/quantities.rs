use crate::error::{CoreError, Result};

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

/// Parse a human-readable RAM quantity into an exact byte count.
///
/// Accepts an optional fractional part and a case-insensitive unit suffix.
/// Both decimal-looking ("kb", "mb") and binary ("kib", "mib") suffixes are
/// interpreted as 1024-based, matching how container runtimes read memory
/// limits: `"512MiB"`, `"512mb"` and `"512m"` all mean 536870912 bytes.
pub fn parse_ram(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::invalid_quantity(s, "empty string"));
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| CoreError::invalid_quantity(s, "missing numeric value"))?;

    let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" | "ki" | "kib" => KIB,
        "m" | "mb" | "mi" | "mib" => MIB,
        "g" | "gb" | "gi" | "gib" => GIB,
        "t" | "tb" | "ti" | "tib" => TIB,
        other => {
            return Err(CoreError::invalid_quantity(
                s,
                format!("unknown unit suffix '{}'", other),
            ))
        }
    };

    Ok((value * multiplier) as i64)
}

/// Convert a byte count to the most human-friendly binary-unit string.
///
/// Picks the largest unit that keeps the value >= 1: `"16.0 GiB"`,
/// `"512.0 MiB"`, `"4.0 KiB"`, or raw bytes below one KiB.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ram_plain_bytes() {
        assert_eq!(parse_ram("1024").unwrap(), 1024);
        assert_eq!(parse_ram("0").unwrap(), 0);
        assert_eq!(parse_ram("32b").unwrap(), 32);
    }

    #[test]
    fn test_parse_ram_binary_suffixes() {
        assert_eq!(parse_ram("1Ki").unwrap(), 1024);
        assert_eq!(parse_ram("1kib").unwrap(), 1024);
        assert_eq!(parse_ram("128MiB").unwrap(), 128 * 1024 * 1024);
        assert_eq!(parse_ram("1GiB").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_ram_short_and_decimal_suffixes_are_binary() {
        // The spec equivalence: "512MiB" normalizes to exactly 536870912.
        assert_eq!(parse_ram("512MiB").unwrap(), 536_870_912);
        assert_eq!(parse_ram("512mb").unwrap(), 536_870_912);
        assert_eq!(parse_ram("512m").unwrap(), 536_870_912);
    }

    #[test]
    fn test_parse_ram_fractional() {
        assert_eq!(parse_ram("1.5g").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as i64);
        assert_eq!(parse_ram("0.5k").unwrap(), 512);
    }

    #[test]
    fn test_parse_ram_rejects_garbage() {
        assert!(parse_ram("").is_err());
        assert!(parse_ram("mib").is_err());
        assert!(parse_ram("12parsecs").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(4096), "4.0 KiB");
        assert_eq!(format_bytes(536_870_912), "512.0 MiB");
        assert_eq!(format_bytes(16 * 1024 * 1024 * 1024), "16.0 GiB");
        assert_eq!(format_bytes(1536 * 1024 * 1024), "1.5 GiB");
    }
}
