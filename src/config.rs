//! Engine configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `BLACKSTORM__*` environment variables (`BLACKSTORM__ENTROPY_THRESHOLD=7.5`).

use crate::{EngineError, EngineResult};
use ::config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "BLACKSTORM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root for activity logs, bad-sector tables and the tamper log
    pub log_dir: PathBuf,

    /// How often a silent child process is polled for cancellation
    pub poll_interval_ms: u64,

    /// Time between SIGTERM and SIGKILL when a child is terminated
    pub termination_grace_ms: u64,

    /// Wait before re-checking a frozen ATA drive
    pub frozen_recheck_delay_secs: u64,

    /// Erase a still-frozen drive with shred instead of aborting
    pub frozen_fallback_to_shred: bool,

    /// Upper bound for the erase step of a force-brick sequence
    pub brick_erase_timeout_secs: u64,

    /// Interval between NVMe sanitize-log polls
    pub sanitize_poll_secs: u64,

    /// Give up waiting on an NVMe sanitize after this long
    pub sanitize_timeout_secs: u64,

    /// Password used for the temporary ATA security erase
    pub erase_password: String,

    /// Size of the region hashed before and after a hardware erase
    pub hash_sample_mb: u64,

    /// Treat an unobtainable pre/post erase hash as a failed verification
    pub strict_erase_hash: bool,

    pub entropy_threshold: f64,
    pub entropy_sample_mb: u64,

    /// Random 4 KiB blocks read back by the sample verifier
    pub verify_samples: u32,

    /// Allowed difference between a partial image and its expected size
    pub partial_size_tolerance: u64,

    /// Lowest recovery rate an automatic acquisition accepts as a success
    pub min_acceptable_rate: f64,

    /// Refuse a NIST wipe when a partition cannot be unmounted
    pub nist_requires_unmount: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/var/log/blackstorm"),
            poll_interval_ms: 100,
            termination_grace_ms: 2000,
            frozen_recheck_delay_secs: 2,
            frozen_fallback_to_shred: false,
            brick_erase_timeout_secs: 300,
            sanitize_poll_secs: 5,
            sanitize_timeout_secs: 3600,
            erase_password: "NULLDRIVE".to_string(),
            hash_sample_mb: 4,
            strict_erase_hash: false,
            entropy_threshold: 7.9,
            entropy_sample_mb: 100,
            verify_samples: 100,
            partial_size_tolerance: 1024 * 1024,
            min_acceptable_rate: 90.0,
            nist_requires_unmount: true,
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` (or the per-user config file), then the environment.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(EngineError::Config(format!(
                        "configuration file {} does not exist",
                        path.display()
                    )));
                }
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if let Some(default_path) = Self::default_path() {
                    builder = builder.add_source(
                        File::from(default_path)
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// `config.toml` in the platform configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "blackstorm", "blackstorm")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=8.0).contains(&self.entropy_threshold) {
            return Err(EngineError::Config(format!(
                "entropy_threshold must be between 0 and 8 bits per byte, got {}",
                self.entropy_threshold
            )));
        }
        if !(0.0..=100.0).contains(&self.min_acceptable_rate) {
            return Err(EngineError::Config(format!(
                "min_acceptable_rate must be a percentage, got {}",
                self.min_acceptable_rate
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn acquisition_log_dir(&self) -> PathBuf {
        self.log_dir.join("acquisition")
    }

    pub fn wipe_log_dir(&self) -> PathBuf {
        self.log_dir.join("wipe")
    }

    pub fn tamper_log_path(&self) -> PathBuf {
        self.log_dir.join("tamper.log")
    }
}
