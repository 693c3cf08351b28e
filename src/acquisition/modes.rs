//! Recovery modes and when to escalate between them.

use crate::stats::RecoveryStats;
use crate::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecoveryMode {
    Standard = 0,
    LightRecovery = 1,
    AggressiveRecovery = 2,
    DeepRecovery = 3,
    ForensicRecovery = 4,
}

/// Escalation thresholds for one mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeProfile {
    pub mode: RecoveryMode,
    pub name: &'static str,
    pub description: &'static str,
    /// Escalate when the recovery rate ends below this percentage
    pub rate_floor: Option<f64>,
    pub rate_reason: &'static str,
    /// Escalate when more sectors than this are unreadable
    pub bad_sector_ceiling: Option<u64>,
    pub bad_sector_reason: &'static str,
}

const PROFILES: [ModeProfile; 5] = [
    ModeProfile {
        mode: RecoveryMode::Standard,
        name: "Standard",
        description: "Single dd pass for healthy drives",
        rate_floor: Some(99.9),
        rate_reason: "Minor read errors detected",
        bad_sector_ceiling: Some(100),
        bad_sector_reason: "High number of bad sectors detected",
    },
    ModeProfile {
        mode: RecoveryMode::LightRecovery,
        name: "Light Recovery",
        description: "ddrescue quick scan with a retry pass",
        rate_floor: Some(98.0),
        rate_reason: "Multiple read errors detected",
        bad_sector_ceiling: Some(1000),
        bad_sector_reason: "Very high number of bad sectors detected",
    },
    ModeProfile {
        mode: RecoveryMode::AggressiveRecovery,
        name: "Aggressive Recovery",
        description: "Smaller blocks and a scraping pass",
        rate_floor: Some(95.0),
        rate_reason: "Significant data loss detected",
        bad_sector_ceiling: Some(10000),
        bad_sector_reason: "Extreme number of bad sectors detected",
    },
    ModeProfile {
        mode: RecoveryMode::DeepRecovery,
        name: "Deep Recovery",
        description: "Quarter blocks, reverse pass and sector-level scraping",
        rate_floor: Some(90.0),
        rate_reason: "Critical data loss detected",
        bad_sector_ceiling: None,
        bad_sector_reason: "",
    },
    ModeProfile {
        mode: RecoveryMode::ForensicRecovery,
        name: "Forensic Recovery",
        description: "Every ddrescue strategy, then per-range recovery with dc3dd",
        rate_floor: None,
        rate_reason: "",
        bad_sector_ceiling: None,
        bad_sector_reason: "",
    },
];

impl RecoveryMode {
    pub const ALL: [RecoveryMode; 5] = [
        RecoveryMode::Standard,
        RecoveryMode::LightRecovery,
        RecoveryMode::AggressiveRecovery,
        RecoveryMode::DeepRecovery,
        RecoveryMode::ForensicRecovery,
    ];

    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.get(level as usize).copied()
    }

    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn profile(self) -> &'static ModeProfile {
        &PROFILES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.profile().name
    }

    /// The next mode up, `None` from forensic mode.
    pub fn next(self) -> Option<Self> {
        Self::from_level(self.level() + 1)
    }

    pub fn uses_ddrescue(self) -> bool {
        self != RecoveryMode::Standard
    }

    /// Why a job that ended this mode with `stats` should move up, if it should.
    ///
    /// The rate floor is checked before the bad-sector ceiling.
    pub fn escalation_reason(self, stats: &RecoveryStats) -> Option<&'static str> {
        let profile = self.profile();
        if let Some(floor) = profile.rate_floor {
            if stats.recovery_rate < floor {
                return Some(profile.rate_reason);
            }
        }
        if let Some(ceiling) = profile.bad_sector_ceiling {
            if stats.bad_sectors > ceiling {
                return Some(profile.bad_sector_reason);
            }
        }
        None
    }
}

impl fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.level())
    }
}

impl FromStr for RecoveryMode {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        let mode = match normalized.as_str() {
            "0" | "standard" => RecoveryMode::Standard,
            "1" | "light" | "lightrecovery" => RecoveryMode::LightRecovery,
            "2" | "aggressive" | "aggressiverecovery" => RecoveryMode::AggressiveRecovery,
            "3" | "deep" | "deeprecovery" => RecoveryMode::DeepRecovery,
            "4" | "forensic" | "forensicrecovery" => RecoveryMode::ForensicRecovery,
            _ => {
                return Err(EngineError::InvalidOptions(format!(
                    "unknown recovery mode '{}'",
                    s
                )))
            }
        };
        Ok(mode)
    }
}

/// One escalation step. `to` is always `from.next()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeTransition {
    pub from: RecoveryMode,
    pub to: RecoveryMode,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}
