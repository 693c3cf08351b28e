//! Which external tools are installed and what each one is for.

use super::ToolRunner;
use crate::{EngineError, EngineResult};
use serde::Serialize;

const KNOWN_TOOLS: &[(&str, &str)] = &[
    ("dd", "Standard imaging and overwrite passes"),
    ("ddrescue", "Recovery modes 1-4"),
    ("dc3dd", "Targeted sector recovery in forensic mode"),
    ("gzip", "Compressed standard images"),
    ("blockdev", "Device size queries"),
    ("lsblk", "Mount point discovery before a wipe"),
    ("umount", "Unmounting partitions before a wipe"),
    ("wipefs", "Filesystem signature removal"),
    ("blkdiscard", "Discard on flash media"),
    ("shred", "Gutmann wipes and secure erase fallback"),
    ("hdparm", "ATA security erase, lock and freeze detection"),
    ("nvme", "NVMe sanitize and format"),
    ("cryptsetup", "LUKS key slot erasure"),
    ("md5sum", "MD5 image hashes"),
    ("sha1sum", "SHA-1 image hashes"),
    ("sha256sum", "SHA-256 image hashes and erase verification"),
    ("sha512sum", "SHA-512 image hashes"),
    ("ent", "Entropy verification"),
    ("cmp", "Zero-fill sample verification"),
    ("hexdump", "Diagnostic dumps of unexpected data"),
    ("fio", "Thermal stress pass before a wipe"),
    ("smartctl", "Drive health, read by front ends to pick a starting mode"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub purpose: &'static str,
    pub available: bool,
}

pub struct ToolInventory;

impl ToolInventory {
    /// Availability of every tool the engine and its front ends rely on.
    pub fn scan(runner: &dyn ToolRunner) -> Vec<ToolStatus> {
        KNOWN_TOOLS
            .iter()
            .map(|&(name, purpose)| ToolStatus {
                name,
                purpose,
                available: runner.has_tool(name),
            })
            .collect()
    }

    /// `ToolMissing` for the first of `tools` that is not installed.
    pub fn require(runner: &dyn ToolRunner, tools: &[&str]) -> EngineResult<()> {
        match tools.iter().find(|tool| !runner.has_tool(tool)) {
            Some(missing) => Err(EngineError::ToolMissing((*missing).to_string())),
            None => Ok(()),
        }
    }

    /// The subset of `tools` that is not installed.
    pub fn missing<'a>(runner: &dyn ToolRunner, tools: &[&'a str]) -> Vec<&'a str> {
        tools
            .iter()
            .copied()
            .filter(|tool| !runner.has_tool(tool))
            .collect()
    }
}
