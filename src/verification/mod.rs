//! Verification of acquired images and wiped devices.
//!
//! - Images: full hash comparison when every sector was read, otherwise a
//!   destination hash plus a size plausibility check.
//! - Wipes: entropy of a leading sample, or zero checks on the first MiB and
//!   random 4 KiB blocks.

pub mod entropy;
pub mod sample;

pub use entropy::EntropyCheck;
pub use sample::SampleVerifier;

use crate::events::EventSink;
use crate::parsers::capture::parse_hash_output;
use crate::process::{shell_quote, CancelToken, CommandSpec, FailurePolicy, ToolRunner};
use crate::stats::{RecoveryStats, SECTOR_SIZE};
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn tool(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5sum",
            HashAlgorithm::Sha1 => "sha1sum",
            HashAlgorithm::Sha256 => "sha256sum",
            HashAlgorithm::Sha512 => "sha512sum",
        }
    }

    /// Suffix of the sidecar file the digest is written to.
    pub fn extension(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for HashAlgorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(EngineError::InvalidOptions(format!(
                "unsupported hash algorithm '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMethod {
    FullHash,
    PartialImage,
    Skipped,
    Entropy,
    Sample,
    HashComparison,
}

/// Digest of the source (when hashed) and of the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub algorithm: HashAlgorithm,
    pub source: Option<String>,
    pub destination: String,
}

impl HashRecord {
    pub fn matches(&self) -> bool {
        self.source.as_deref() == Some(self.destination.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub method: VerificationMethod,
    pub passed: bool,
    pub hashes: Vec<HashRecord>,
    pub entropy: Option<f64>,
    pub detail: String,
}

impl VerificationResult {
    pub fn new(method: VerificationMethod, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            method,
            passed,
            hashes: Vec::new(),
            entropy: None,
            detail: detail.into(),
        }
    }
}

/// An image is verified only when nothing was lost and every digest matches.
pub fn verify(stats: &RecoveryStats, hashes: &[HashRecord]) -> bool {
    stats.bad_sectors == 0 && !hashes.is_empty() && hashes.iter().all(HashRecord::matches)
}

/// Hash `path` with `algorithm`, streaming so the run can be cancelled.
pub fn hash_file(
    runner: &dyn ToolRunner,
    algorithm: HashAlgorithm,
    path: &str,
    cancel: &CancelToken,
) -> EngineResult<String> {
    let cmd = CommandSpec::new(algorithm.tool()).arg(path);
    let (_, lines) = runner.run_collect(&cmd, FailurePolicy::Required, cancel)?;
    parse_hash_output(&lines.join("\n")).ok_or_else(|| {
        EngineError::VerificationFailure(format!(
            "{} produced no digest for {}",
            algorithm.tool(),
            path
        ))
    })
}

/// SHA-256 of the first `megabytes` MiB of a device.
pub fn hash_region(
    runner: &dyn ToolRunner,
    device: &str,
    megabytes: u64,
    cancel: &CancelToken,
) -> EngineResult<String> {
    let cmd = CommandSpec::pipeline(format!(
        "dd if={} bs=1M count={} status=none | sha256sum",
        shell_quote(device),
        megabytes
    ));
    let (_, lines) = runner.run_collect(&cmd, FailurePolicy::Required, cancel)?;
    parse_hash_output(&lines.join("\n")).ok_or_else(|| {
        EngineError::VerificationFailure(format!("could not hash the first {} MiB of {}", megabytes, device))
    })
}

/// `<image>.<algorithm>`
pub fn hash_sidecar_path(image: &Path, algorithm: HashAlgorithm) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".");
    name.push(algorithm.extension());
    PathBuf::from(name)
}

/// Post-acquisition checks for a finished image.
pub struct ImageVerifier<'a> {
    runner: &'a dyn ToolRunner,
    sink: &'a EventSink,
    cancel: &'a CancelToken,
    size_tolerance: u64,
}

impl<'a> ImageVerifier<'a> {
    pub fn new(runner: &'a dyn ToolRunner, sink: &'a EventSink, cancel: &'a CancelToken) -> Self {
        Self {
            runner,
            sink,
            cancel,
            size_tolerance: 1024 * 1024,
        }
    }

    pub fn with_size_tolerance(mut self, tolerance: u64) -> Self {
        self.size_tolerance = tolerance;
        self
    }

    pub fn verify_image(
        &self,
        source: &str,
        image: &Path,
        stats: &RecoveryStats,
        algorithms: &[HashAlgorithm],
        compressed: bool,
    ) -> EngineResult<VerificationResult> {
        if compressed {
            self.sink
                .log("Verification skipped for compressed image");
            return Ok(VerificationResult::new(
                VerificationMethod::Skipped,
                true,
                "compressed images are not verified",
            ));
        }

        if stats.bad_sectors == 0 {
            self.full_hash(source, image, stats, algorithms)
        } else {
            self.partial_image(image, stats, algorithms)
        }
    }

    fn hash_destination(&self, image: &Path, algorithm: HashAlgorithm) -> EngineResult<String> {
        let digest = hash_file(self.runner, algorithm, &image.to_string_lossy(), self.cancel)?;
        let sidecar = hash_sidecar_path(image, algorithm);
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Err(err) = std::fs::write(&sidecar, format!("{}  {}\n", digest, file_name)) {
            self.sink.warn(format!("could not write {}: {}", sidecar.display(), err));
        }
        Ok(digest)
    }

    fn full_hash(
        &self,
        source: &str,
        image: &Path,
        stats: &RecoveryStats,
        algorithms: &[HashAlgorithm],
    ) -> EngineResult<VerificationResult> {
        let mut hashes = Vec::with_capacity(algorithms.len());
        for &algorithm in algorithms {
            self.sink.log(format!("Calculating {} of source and image", algorithm));
            let source_digest = hash_file(self.runner, algorithm, source, self.cancel)?;
            let destination = self.hash_destination(image, algorithm)?;
            if source_digest != destination {
                self.sink.warn(format!("{} mismatch between source and image", algorithm));
            }
            hashes.push(HashRecord {
                algorithm,
                source: Some(source_digest),
                destination,
            });
        }

        let passed = verify(stats, &hashes);
        let detail = if passed {
            "all hashes match".to_string()
        } else if hashes.is_empty() {
            "no hash algorithms requested".to_string()
        } else {
            "hash mismatch".to_string()
        };
        Ok(VerificationResult {
            method: VerificationMethod::FullHash,
            passed,
            hashes,
            entropy: None,
            detail,
        })
    }

    fn partial_image(
        &self,
        image: &Path,
        stats: &RecoveryStats,
        algorithms: &[HashAlgorithm],
    ) -> EngineResult<VerificationResult> {
        self.sink.log(format!(
            "Image has {} unreadable sectors; hashing destination only",
            stats.bad_sectors
        ));

        let mut hashes = Vec::with_capacity(algorithms.len());
        for &algorithm in algorithms {
            hashes.push(HashRecord {
                algorithm,
                source: None,
                destination: self.hash_destination(image, algorithm)?,
            });
        }

        let expected = stats
            .total_size
            .saturating_sub(stats.bad_sectors.saturating_mul(SECTOR_SIZE));
        let actual = std::fs::metadata(image)?.len();
        let passed = actual.abs_diff(expected) <= self.size_tolerance;
        let detail = format!("image size {} bytes, expected about {}", actual, expected);
        if !passed {
            self.sink.warn(&detail);
        }

        Ok(VerificationResult {
            method: VerificationMethod::PartialImage,
            passed,
            hashes,
            entropy: None,
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: Option<&str>, destination: &str) -> HashRecord {
        HashRecord {
            algorithm: HashAlgorithm::Sha256,
            source: source.map(str::to_string),
            destination: destination.to_string(),
        }
    }

    #[test]
    fn test_verify_requires_clean_read_and_matching_hashes() {
        let clean = RecoveryStats::default();
        let damaged = RecoveryStats {
            bad_sectors: 2,
            ..Default::default()
        };
        let matching = vec![record(Some("aa"), "aa")];
        let mismatched = vec![record(Some("aa"), "bb")];

        assert!(verify(&clean, &matching));
        assert!(!verify(&clean, &mismatched));
        assert!(!verify(&damaged, &matching));
        assert!(!verify(&clean, &[]));
        assert!(!verify(&clean, &[record(None, "aa")]));
    }

    #[test]
    fn test_hash_algorithm_parsing() {
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap().tool(), "md5sum");
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            hash_sidecar_path(Path::new("/cases/a.img"), HashAlgorithm::Sha1),
            PathBuf::from("/cases/a.img.sha1")
        );
    }
}
