//! Recovery statistics and progress arithmetic.

use crate::parsers::ToolEvent;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Sector size every tool and log in the engine counts in.
pub const SECTOR_SIZE: u64 = 512;

/// Rate drops smaller than this are rounding noise and are ignored.
const RATE_TOLERANCE: f64 = 1e-6;

/// Acquisition progress never reaches 100 until the job has finished.
const MAX_RUNNING_PERCENT: f64 = 99.0;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub total_size: u64,
    pub recovered: u64,
    pub bad_sectors: u64,
    pub retry_sectors: u64,
    /// Percentage in `[0, 100]`
    pub recovery_rate: f64,
    /// Seconds since the job started
    pub elapsed_time: f64,
    pub current_phase: u32,
    pub total_phases: u32,
}

/// Rescued and unreadable byte totals read back from a ddrescue map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapSummary {
    pub rescued_bytes: u64,
    pub unreadable_bytes: u64,
}

/// Folds parser events into [`RecoveryStats`].
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    stats: RecoveryStats,
    started: Instant,
    /// Sectors lost per `dd` read error under `conv=noerror,sync`
    read_error_sectors: u64,
    /// Bytes `dd` reported as written, padding included
    dd_bytes: u64,
}

impl StatsAggregator {
    pub fn new(total_size: u64) -> Self {
        Self {
            stats: RecoveryStats {
                total_size,
                ..Default::default()
            },
            started: Instant::now(),
            read_error_sectors: 0,
            dd_bytes: 0,
        }
    }

    /// Count each `dd` read error as a padded block of `block_bytes`.
    pub fn with_read_error_block(mut self, block_bytes: u64) -> Self {
        self.read_error_sectors = (block_bytes / SECTOR_SIZE).max(1);
        self
    }

    pub fn set_read_error_block(&mut self, block_bytes: u64) {
        self.read_error_sectors = (block_bytes / SECTOR_SIZE).max(1);
    }

    pub fn rate(&self) -> f64 {
        self.stats.recovery_rate
    }

    pub fn bad_sectors(&self) -> u64 {
        self.stats.bad_sectors
    }

    pub fn start_mode(&mut self, total_phases: u32) {
        self.stats.total_phases = total_phases;
        self.stats.current_phase = 0;
        self.dd_bytes = 0;
    }

    pub fn start_phase(&mut self, phase: u32) {
        self.stats.current_phase = phase;
    }

    /// Apply one parser event. Returns true when the statistics changed.
    pub fn apply(&mut self, event: &ToolEvent) -> bool {
        match *event {
            ToolEvent::BytesCopied(bytes) => {
                self.dd_bytes = bytes;
                let padded = self.stats.bad_sectors.saturating_mul(SECTOR_SIZE);
                self.set_recovered(bytes.saturating_sub(padded));
            }
            ToolEvent::ReadError => {
                self.stats.bad_sectors += self.read_error_sectors.max(1);
                let padded = self.stats.bad_sectors.saturating_mul(SECTOR_SIZE);
                self.set_recovered(self.dd_bytes.saturating_sub(padded));
            }
            ToolEvent::Rescued { rescued, errsize } => {
                self.stats.bad_sectors = errsize / SECTOR_SIZE;
                self.set_recovered(rescued);
            }
            ToolEvent::RescuedBytes(bytes) => self.set_recovered(bytes),
            ToolEvent::BadSectorBytes(bytes) => {
                self.stats.bad_sectors = bytes / SECTOR_SIZE;
            }
            ToolEvent::ShredPass { .. } | ToolEvent::PassPercent(_) => return false,
        }
        true
    }

    /// Replace the running figures with the totals read from a map file.
    pub fn apply_map_summary(&mut self, summary: &MapSummary) {
        let previous_bad = self.stats.bad_sectors;
        let bad = summary.unreadable_bytes.div_ceil(SECTOR_SIZE);
        if bad < previous_bad {
            self.stats.retry_sectors += previous_bad - bad;
        }
        self.stats.bad_sectors = bad;
        self.set_recovered(summary.rescued_bytes);
    }

    /// Credit sectors a targeted recovery managed to read.
    pub fn apply_targeted(&mut self, recovered_sectors: u64) {
        let recovered_sectors = recovered_sectors.min(self.stats.bad_sectors);
        self.stats.bad_sectors -= recovered_sectors;
        self.stats.retry_sectors += recovered_sectors;
        let recovered = self
            .stats
            .recovered
            .saturating_add(recovered_sectors * SECTOR_SIZE);
        self.set_recovered(recovered);
    }

    pub fn set_recovered(&mut self, bytes: u64) {
        self.stats.recovered = if self.stats.total_size > 0 {
            bytes.min(self.stats.total_size)
        } else {
            bytes
        };
        self.recompute_rate();
    }

    fn recompute_rate(&mut self) {
        let total = self.stats.total_size;
        let rate = if total == 0 {
            0.0
        } else {
            (self.stats.recovered as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };

        let previous = self.stats.recovery_rate;
        if rate < previous && previous - rate < RATE_TOLERANCE {
            return;
        }
        self.stats.recovery_rate = rate;
    }

    /// Percent to show while the job is still running.
    pub fn progress_percent(&self) -> f64 {
        self.stats.recovery_rate.min(MAX_RUNNING_PERCENT)
    }

    pub fn snapshot(&self) -> RecoveryStats {
        let mut stats = self.stats.clone();
        stats.elapsed_time = self.started.elapsed().as_secs_f64();
        stats
    }
}

/// Overall percent for pass `pass` (1-based) of `total`, `pass_percent` into it.
pub fn weighted_percent(pass: u32, total: u32, pass_percent: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let done = pass.saturating_sub(1).min(total) as f64 / total as f64 * 100.0;
    (done + pass_percent.clamp(0.0, 100.0) / total as f64).clamp(0.0, 100.0)
}

/// Instantaneous throughput from successive byte counters.
#[derive(Debug, Default)]
pub struct Throughput {
    last: Option<(Instant, u64)>,
}

impl Throughput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes per second since the previous sample.
    pub fn sample(&mut self, at: Instant, bytes: u64) -> Option<f64> {
        let previous = self.last.replace((at, bytes));
        let (then, then_bytes) = previous?;
        let elapsed = at.checked_duration_since(then).unwrap_or(Duration::ZERO);
        if elapsed.is_zero() || bytes < then_bytes {
            return None;
        }
        Some((bytes - then_bytes) as f64 / elapsed.as_secs_f64())
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
