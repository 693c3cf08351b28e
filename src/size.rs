//! Byte counts to and from human-readable units.
//!
//! All conversions use base 1024 so the figures line up with what `dd`,
//! `ddrescue` and `blockdev` report for block devices.

use lazy_static::lazy_static;
use regex::Regex;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

lazy_static! {
    static ref SIZE_PATTERN: Regex =
        Regex::new(r"^\s*(\d+)(?:\.(\d+))?\s*([kKmMgGtT])?(?:i?[bB])?\s*$")
            .expect("size pattern is valid");
}

fn multiplier(suffix: Option<&str>) -> u64 {
    match suffix.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("k") => 1 << 10,
        Some("m") => 1 << 20,
        Some("g") => 1 << 30,
        Some("t") => 1 << 40,
        _ => 1,
    }
}

/// Parse `"100k"`, `"2M"`, `"1.5G"`, `"500000000B"` into bytes.
///
/// Returns 0 for anything that does not look like a size.
pub fn parse_size(text: &str) -> u64 {
    let Some(caps) = SIZE_PATTERN.captures(text) else {
        return 0;
    };

    let Ok(whole) = caps[1].parse::<u64>() else {
        return 0;
    };
    let mult = multiplier(caps.get(3).map(|m| m.as_str()));
    let mut bytes = whole.saturating_mul(mult);

    if let Some(frac) = caps.get(2) {
        // Nine digits is well below the resolution of any unit we accept
        let digits: String = frac.as_str().chars().take(9).collect();
        if let Ok(numerator) = digits.parse::<u64>() {
            let denominator = 10u64.pow(digits.len() as u32);
            bytes = bytes.saturating_add(numerator.saturating_mul(mult) / denominator);
        }
    }

    bytes
}

/// Convert a byte count into `(value, unit)` with one decimal place.
pub fn format_size(bytes: u64) -> (f64, &'static str) {
    let mut value = bytes as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    ((value * 10.0).round() / 10.0, UNITS[unit])
}

/// `format_size` rendered as `"1.5 KB"`.
pub fn human_size(bytes: u64) -> String {
    let (value, unit) = format_size(bytes);
    format!("{:.1} {}", value, unit)
}
