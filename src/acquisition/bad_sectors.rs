/// Bad sector extraction from ddrescue map files
///
/// Unreadable areas of a map become sector ranges that are appended to a
/// per-job table. Entries are never rewritten; a range already recorded in
/// this job is not written twice.
use crate::stats::{MapSummary, SECTOR_SIZE};
use crate::EngineResult;
use anyhow::{Context, Result};
use chrono::Local;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Status column of a ddrescue map row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    NonTried,
    NonTrimmed,
    NonScraped,
    BadSector,
    Finished,
}

impl BlockStatus {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '?' => Some(BlockStatus::NonTried),
            '*' => Some(BlockStatus::NonTrimmed),
            '/' => Some(BlockStatus::NonScraped),
            '-' => Some(BlockStatus::BadSector),
            '+' => Some(BlockStatus::Finished),
            _ => None,
        }
    }

    /// Data in this block has not been read (yet).
    pub fn is_unreadable(self) -> bool {
        self != BlockStatus::Finished
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapBlock {
    pub pos: u64,
    pub size: u64,
    pub status: BlockStatus,
}

/// Inclusive range of 512-byte sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BadSectorRange {
    pub start_sector: u64,
    pub end_sector: u64,
}

impl BadSectorRange {
    pub fn size_in_sectors(&self) -> u64 {
        self.end_sector - self.start_sector + 1
    }
}

fn parse_offset(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Data rows of a map file. Comments and the current-status line are skipped.
pub fn parse_map(contents: &str) -> Vec<MapBlock> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return None;
            }
            // The status line reads "pos status [pass]": its second field is not a size
            let pos = parse_offset(fields[0])?;
            let size = parse_offset(fields[1])?;
            let mut status_chars = fields[2].chars();
            let status = BlockStatus::from_char(status_chars.next()?)?;
            if status_chars.next().is_some() {
                return None;
            }
            Some(MapBlock { pos, size, status })
        })
        .collect()
}

pub fn read_map(path: &Path) -> EngineResult<Vec<MapBlock>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_map(&contents))
}

/// Unreadable blocks as sector ranges.
pub fn bad_ranges(blocks: &[MapBlock]) -> Vec<BadSectorRange> {
    blocks
        .iter()
        .filter(|b| b.status.is_unreadable() && b.size > 0)
        .map(|b| BadSectorRange {
            start_sector: b.pos / SECTOR_SIZE,
            end_sector: (b.pos + b.size - 1) / SECTOR_SIZE,
        })
        .collect()
}

pub fn summarize(blocks: &[MapBlock]) -> MapSummary {
    blocks.iter().fold(MapSummary::default(), |mut summary, block| {
        if block.status.is_unreadable() {
            summary.unreadable_bytes += block.size;
        } else {
            summary.rescued_bytes += block.size;
        }
        summary
    })
}

/// Append-only bad sector table for one acquisition.
pub struct BadSectorLog {
    path: PathBuf,
    device_path: String,
    recorded: HashSet<BadSectorRange>,
}

impl BadSectorLog {
    pub fn new(path: impl Into<PathBuf>, device_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device_path: device_path.into(),
            recorded: HashSet::new(),
        }
    }

    /// `<dir>/badsectors_<device>_<timestamp>.txt`
    pub fn default_path(dir: &Path, device_slug: &str, timestamp: &str) -> PathBuf {
        dir.join(format!("badsectors_{}_{}.txt", device_slug, timestamp))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recorded_count(&self) -> usize {
        self.recorded.len()
    }

    /// Append the ranges not yet written. Returns how many were new.
    pub fn append(&mut self, ranges: &[BadSectorRange]) -> Result<usize> {
        let fresh: Vec<BadSectorRange> = ranges
            .iter()
            .copied()
            .filter(|range| !self.recorded.contains(range))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create log directory")?;
        }

        let needs_header = std::fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open bad sector log")?;

        if needs_header {
            writeln!(file, "# Bad sectors for {}", self.device_path)?;
            writeln!(file, "# Extracted on {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
            writeln!(file, "# Format: start_sector end_sector size_in_sectors")?;
        }

        for range in &fresh {
            writeln!(
                file,
                "{} {} {}",
                range.start_sector,
                range.end_sector,
                range.size_in_sectors()
            )
            .context("Failed to write to bad sector log")?;
            self.recorded.insert(*range);
        }

        tracing::warn!(
            device = %self.device_path,
            new_ranges = fresh.len(),
            total_ranges = self.recorded.len(),
            "Bad sector ranges recorded"
        );

        Ok(fresh.len())
    }
}

#[cfg(test)]
#[path = "bad_sectors_tests.rs"]
mod bad_sectors_tests;
