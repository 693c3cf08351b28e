//! Parsers for tools whose whole output is inspected after they exit.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref HEX_DIGEST: Regex = Regex::new(r"^[0-9a-fA-F]{32,128}$").expect("digest pattern is valid");
    static ref ENT_VERBOSE: Regex =
        Regex::new(r"Entropy\s*=\s*([\d.]+)\s*bits per byte").expect("ent pattern is valid");
    static ref NOT_FROZEN: Regex = Regex::new(r"^not\s+frozen$").expect("frozen pattern is valid");
    static ref NOT_SUPPORTED: Regex = Regex::new(r"^not\s+supported$").expect("supported pattern is valid");
    static ref NOT_LOCKED: Regex = Regex::new(r"^not\s+locked$").expect("locked pattern is valid");
    static ref NOT_ENABLED: Regex = Regex::new(r"^not\s+enabled$").expect("enabled pattern is valid");
    static ref ENHANCED: Regex =
        Regex::new(r"^(not\s+)?supported:\s*enhanced erase").expect("enhanced pattern is valid");
    static ref NVME_FIELD: Regex =
        Regex::new(r"(?i)^\s*(oacs|sanicap|fna)\s*:\s*(0x[0-9a-f]+|\d+)").expect("id-ctrl pattern is valid");
    static ref SSTAT: Regex = Regex::new(r"(?i)\(?sstat\)?\s*:\s*(0x[0-9a-f]+|\d+)")
        .expect("sanitize-log pattern is valid");
}

fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Digest from `sha256sum`-style output: the first token of the first line.
pub fn parse_hash_output(output: &str) -> Option<String> {
    let token = output.lines().next()?.split_whitespace().next()?;
    HEX_DIGEST
        .is_match(token)
        .then(|| token.to_ascii_lowercase())
}

/// Shannon entropy in bits per byte from `ent` or `ent -t` output.
pub fn parse_ent_output(output: &str) -> Option<f64> {
    // Terse form: "0,File-bytes,Entropy,..." header then "1,<bytes>,<entropy>,..."
    for line in output.lines() {
        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.len() > 2 && fields[0] == "1" {
            if let Ok(entropy) = fields[2].trim().parse() {
                return Some(entropy);
            }
        }
    }
    ENT_VERBOSE
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

/// Byte count printed by `blockdev --getsize64`.
pub fn parse_blockdev_size(output: &str) -> Option<u64> {
    output.trim().lines().next()?.trim().parse().ok()
}

/// The security section of `hdparm -I`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AtaSecurityState {
    pub supported: bool,
    pub enabled: bool,
    pub locked: bool,
    pub frozen: bool,
    pub enhanced_erase: bool,
}

impl AtaSecurityState {
    /// `None` when the output has no security section at all.
    pub fn parse(output: &str) -> Option<Self> {
        let mut lines = output.lines().skip_while(|l| !l.trim_start().starts_with("Security:"));
        lines.next()?;

        let mut state = AtaSecurityState::default();
        for raw in lines {
            let line = raw.trim();
            // The section ends at the next unindented heading
            if !raw.starts_with(char::is_whitespace) && !line.is_empty() {
                break;
            }
            if line == "supported" {
                state.supported = true;
            } else if NOT_SUPPORTED.is_match(line) {
                state.supported = false;
            } else if line == "enabled" {
                state.enabled = true;
            } else if NOT_ENABLED.is_match(line) {
                state.enabled = false;
            } else if line == "locked" {
                state.locked = true;
            } else if NOT_LOCKED.is_match(line) {
                state.locked = false;
            } else if line == "frozen" {
                state.frozen = true;
            } else if NOT_FROZEN.is_match(line) {
                state.frozen = false;
            } else if let Some(caps) = ENHANCED.captures(line) {
                state.enhanced_erase = caps.get(1).is_none();
            }
        }
        Some(state)
    }
}

/// Erase-related capabilities from `nvme id-ctrl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NvmeCapabilities {
    pub format_nvm: bool,
    pub sanitize_block_erase: bool,
    pub sanitize_crypto_erase: bool,
    pub sanitize_overwrite: bool,
    pub format_crypto_erase: bool,
}

impl NvmeCapabilities {
    pub fn parse(output: &str) -> Self {
        let mut caps = NvmeCapabilities::default();
        for line in output.lines() {
            if let Some(m) = NVME_FIELD.captures(line) {
                let Some(value) = parse_number(&m[2].to_ascii_lowercase()) else {
                    continue;
                };
                match m[1].to_ascii_lowercase().as_str() {
                    "oacs" => caps.format_nvm = value & 0x2 != 0,
                    "sanicap" => {
                        caps.sanitize_crypto_erase = value & 0x1 != 0;
                        caps.sanitize_block_erase = value & 0x2 != 0;
                        caps.sanitize_overwrite = value & 0x4 != 0;
                    }
                    "fna" => caps.format_crypto_erase = value & 0x4 != 0,
                    _ => {}
                }
                continue;
            }

            // `nvme id-ctrl -H` decodes the bits into sentences
            let lower = line.to_ascii_lowercase();
            if lower.contains("not supported") {
                continue;
            }
            if lower.contains("block erase sanitize operation supported") {
                caps.sanitize_block_erase = true;
            } else if lower.contains("crypto erase sanitize operation supported") {
                caps.sanitize_crypto_erase = true;
            } else if lower.contains("format nvm supported") {
                caps.format_nvm = true;
            }
        }
        caps
    }

    pub fn any_sanitize(&self) -> bool {
        self.sanitize_block_erase || self.sanitize_crypto_erase || self.sanitize_overwrite
    }
}

/// Most recent sanitize status from `nvme sanitize-log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SanitizeStatus {
    NeverSanitized,
    Completed,
    InProgress,
    Failed,
    Unknown(u64),
}

impl SanitizeStatus {
    pub fn parse(output: &str) -> Option<Self> {
        let caps = SSTAT.captures(output)?;
        let value = parse_number(&caps[1].to_ascii_lowercase())?;
        Some(match value & 0x7 {
            0 => SanitizeStatus::NeverSanitized,
            1 => SanitizeStatus::Completed,
            2 => SanitizeStatus::InProgress,
            3 => SanitizeStatus::Failed,
            other => SanitizeStatus::Unknown(other),
        })
    }
}
