//! Device facts queried fresh for every job.

use crate::parsers::capture::parse_blockdev_size;
use crate::process::{CancelToken, CommandSpec, ToolRunner};
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusType {
    Ata,
    Nvme,
}

impl BusType {
    pub fn from_path(path: &str) -> Self {
        if path.contains("nvme") {
            BusType::Nvme
        } else {
            BusType::Ata
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusType::Ata => write!(f, "ATA"),
            BusType::Nvme => write!(f, "NVMe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub path: String,
    pub size_bytes: u64,
    pub bus_type: BusType,
    /// Filled in by the secure erase dispatcher after `hdparm -I`
    pub frozen: bool,
    pub flash: bool,
}

impl Device {
    /// Size, bus and media type for `path`.
    ///
    /// A regular file (an image being re-acquired) is sized by its length;
    /// anything else goes through `blockdev --getsize64`.
    pub fn probe(runner: &dyn ToolRunner, path: &str, cancel: &CancelToken) -> EngineResult<Self> {
        let size_bytes = match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => Self::block_size_of(runner, path, cancel)?,
        };

        let device = Device {
            path: path.to_string(),
            size_bytes,
            bus_type: BusType::from_path(path),
            frozen: false,
            flash: is_flash_media(path),
        };
        tracing::debug!(
            device = %device.path,
            size = device.size_bytes,
            bus = %device.bus_type,
            flash = device.flash,
            "Probed device"
        );
        Ok(device)
    }

    fn block_size_of(runner: &dyn ToolRunner, path: &str, cancel: &CancelToken) -> EngineResult<u64> {
        let output = runner.capture(&CommandSpec::new("blockdev").args(["--getsize64", path]), cancel)?;
        match parse_blockdev_size(&output.stdout).filter(|_| output.success()) {
            Some(size) => Ok(size),
            None => {
                let detail = output.stderr.trim();
                Err(EngineError::DeviceNotFound(if detail.is_empty() {
                    path.to_string()
                } else {
                    format!("{} ({})", path, detail)
                }))
            }
        }
    }

    pub fn is_nvme(&self) -> bool {
        self.bus_type == BusType::Nvme
    }
}

/// Whole-disk kernel name for a device or partition path.
///
/// `/dev/sdb1` → `sdb`, `/dev/nvme0n1p2` → `nvme0n1`, `/dev/mmcblk0p1` → `mmcblk0`.
pub fn base_device_name(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);

    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        if let Some(idx) = name.rfind('p') {
            let (head, tail) = name.split_at(idx);
            if tail.len() > 1 && tail[1..].chars().all(|c| c.is_ascii_digit()) && head.ends_with(|c: char| c.is_ascii_digit()) {
                return head.to_string();
            }
        }
        return name.to_string();
    }

    name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

/// Non-rotational media, where discard is meaningful.
pub fn is_flash_media(path: &str) -> bool {
    let base = base_device_name(path);
    let rotational = Path::new("/sys/block").join(&base).join("queue/rotational");
    match std::fs::read_to_string(rotational) {
        Ok(flag) => flag.trim() == "0",
        Err(_) => base.starts_with("nvme") || base.starts_with("mmcblk"),
    }
}

/// Whether `path` names a block device rather than a regular file.
pub fn is_block_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    if let Ok(meta) = std::fs::metadata(path) {
        return meta.file_type().is_block_device();
    }
    path.starts_with("/dev")
}
