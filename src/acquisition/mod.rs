//! Adaptive disk acquisition.
//!
//! A job images `source` into `destination` with the recipe of its current
//! [`RecoveryMode`]. With `auto_mode` set it moves up one mode at a time
//! whenever a mode ends below its rate floor or above its bad-sector
//! ceiling, reusing the same ddrescue map so every mode continues where the
//! previous one stopped.

pub mod bad_sectors;
pub mod commands;
pub mod modes;
pub mod targeted;

pub use bad_sectors::{BadSectorLog, BadSectorRange};
pub use commands::{CommandBuilder, PassCondition, PassPlan};
pub use modes::{ModeProfile, ModeTransition, RecoveryMode};

use crate::config::EngineConfig;
use crate::device::{is_block_device, is_flash_media, Device};
use crate::events::EventSink;
use crate::logging::{device_slug, file_timestamp};
use crate::parsers::Dialect;
use crate::process::{CancelToken, ToolInventory, ToolRunner};
use crate::size::human_size;
use crate::stats::{RecoveryStats, StatsAggregator};
use crate::verification::{HashAlgorithm, ImageVerifier, VerificationResult};
use crate::{EngineError, EngineResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Targeted recovery runs when forensic passes leave the rate below this.
const TARGETED_RECOVERY_BELOW: f64 = 99.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionOptions {
    pub starting_mode: RecoveryMode,
    /// Escalate automatically when a mode leaves too much unread
    pub auto_mode: bool,
    pub verify: bool,
    pub hash_algorithms: Vec<HashAlgorithm>,
    /// ddrescue sector size in bytes
    pub block_size: u64,
    /// Retry passes for the ddrescue retry steps
    pub retries: u32,
    /// gzip the image (single-pass Standard acquisitions only)
    pub compress: bool,
    pub log_bad_sectors: bool,
    /// Discard a flash destination device before a Standard pass
    pub discard_destination: bool,
    /// Overrides the configured minimum acceptable rate
    pub min_acceptable_rate: Option<f64>,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            starting_mode: RecoveryMode::Standard,
            auto_mode: true,
            verify: true,
            hash_algorithms: vec![HashAlgorithm::Sha256],
            block_size: 4096,
            retries: 3,
            compress: false,
            log_bad_sectors: true,
            discard_destination: false,
            min_acceptable_rate: None,
        }
    }
}

impl AcquisitionOptions {
    pub fn validate(&self) -> EngineResult<()> {
        if self.block_size < 512 || self.block_size % 512 != 0 {
            return Err(EngineError::InvalidOptions(format!(
                "block size must be a multiple of 512 bytes, got {}",
                self.block_size
            )));
        }
        if let Some(rate) = self.min_acceptable_rate {
            if !(0.0..=100.0).contains(&rate) {
                return Err(EngineError::InvalidOptions(format!(
                    "minimum acceptable rate must be a percentage, got {}",
                    rate
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub source: String,
    pub destination: PathBuf,
    pub options: AcquisitionOptions,
}

impl AcquisitionRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            options: AcquisitionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AcquisitionOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionOutcome {
    pub success: bool,
    pub message: String,
    pub final_mode: RecoveryMode,
    pub stats: Option<RecoveryStats>,
    pub transitions: Vec<ModeTransition>,
    pub verification: Option<VerificationResult>,
    pub image_path: PathBuf,
    pub bad_sector_log: Option<PathBuf>,
}

impl AcquisitionOutcome {
    /// Outcome of a job that never got to report one itself.
    pub fn aborted(message: impl Into<String>, image_path: PathBuf) -> Self {
        Self {
            success: false,
            message: message.into(),
            final_mode: RecoveryMode::Standard,
            stats: None,
            transitions: Vec::new(),
            verification: None,
            image_path,
            bad_sector_log: None,
        }
    }
}

/// One acquisition, owned by its worker thread.
pub struct AcquisitionJob<'a> {
    runner: &'a dyn ToolRunner,
    config: &'a EngineConfig,
    sink: &'a EventSink,
    cancel: &'a CancelToken,
    request: AcquisitionRequest,
    mode: RecoveryMode,
    transitions: Vec<ModeTransition>,
    stats: Option<RecoveryStats>,
    bad_log: Option<BadSectorLog>,
    verification: Option<VerificationResult>,
}

impl<'a> AcquisitionJob<'a> {
    pub fn new(
        runner: &'a dyn ToolRunner,
        config: &'a EngineConfig,
        sink: &'a EventSink,
        cancel: &'a CancelToken,
        request: AcquisitionRequest,
    ) -> Self {
        let mode = request.options.starting_mode;
        Self {
            runner,
            config,
            sink,
            cancel,
            request,
            mode,
            transitions: Vec::new(),
            stats: None,
            bad_log: None,
            verification: None,
        }
    }

    pub fn with_bad_sector_log(mut self, log: BadSectorLog) -> Self {
        self.bad_log = Some(log);
        self
    }

    fn compress(&self) -> bool {
        let options = &self.request.options;
        options.compress && options.starting_mode == RecoveryMode::Standard && !options.auto_mode
    }

    fn image_path(&self) -> PathBuf {
        commands::image_path(&self.request.destination, self.compress())
    }

    fn min_acceptable_rate(&self) -> f64 {
        self.request
            .options
            .min_acceptable_rate
            .unwrap_or(self.config.min_acceptable_rate)
    }

    /// Run to completion and emit exactly one `Finished` event.
    pub fn run(mut self) -> AcquisitionOutcome {
        let image_path = self.image_path();
        let result = self.execute();

        let (success, message) = match result {
            Ok(message) => (true, message),
            Err(EngineError::Cancelled) => (false, "Acquisition cancelled by user".to_string()),
            Err(EngineError::VerificationFailure(detail)) => {
                (false, format!("Acquisition unsuccessful: {}", detail))
            }
            Err(err) => (false, format!("Acquisition failed: {}", err)),
        };

        if success {
            self.sink.progress(100.0, "Acquisition complete");
        }
        self.sink.finished(success, message.clone(), self.stats.clone());

        AcquisitionOutcome {
            success,
            message,
            final_mode: self.mode,
            stats: self.stats,
            transitions: self.transitions,
            verification: self.verification,
            image_path,
            bad_sector_log: self
                .bad_log
                .filter(|log| log.recorded_count() > 0)
                .map(|log| log.path().to_path_buf()),
        }
    }

    fn preflight(&self) -> EngineResult<()> {
        self.request.options.validate()?;

        let mut required = vec![if self.mode.uses_ddrescue() { "ddrescue" } else { "dd" }];
        if self.compress() {
            required.push("gzip");
        }
        ToolInventory::require(self.runner, &required)?;

        if self.request.options.auto_mode && !self.runner.has_tool("ddrescue") {
            self.sink
                .warn("ddrescue is not installed; automatic escalation will fail if it is needed");
        }
        if self.request.options.compress && !self.compress() {
            self.sink.warn(
                "compression is only available for single-pass Standard acquisitions; writing an uncompressed image",
            );
        }
        Ok(())
    }

    fn execute(&mut self) -> EngineResult<String> {
        self.cancel.check()?;
        self.preflight()?;

        let device = Device::probe(self.runner, &self.request.source, self.cancel)?;
        let image = self.image_path();
        self.sink.log(format!(
            "Starting acquisition of {} ({}) to {}",
            device.path,
            human_size(device.size_bytes),
            image.display()
        ));

        let dest_is_device = is_block_device(&self.request.destination);
        let builder = CommandBuilder::new(self.request.source.clone(), image.clone())
            .with_block_size(self.request.options.block_size)
            .with_retries(self.request.options.retries)
            .with_device_destination(dest_is_device)
            .with_source_size(device.size_bytes);

        let mut agg = StatsAggregator::new(device.size_bytes)
            .with_read_error_block(commands::STANDARD_BLOCK_BYTES);

        loop {
            self.run_mode(&builder, &mut agg, &device, dest_is_device)?;
            let snapshot = agg.snapshot();
            self.stats = Some(snapshot.clone());
            self.sink.stats(&snapshot);

            if !self.request.options.auto_mode {
                break;
            }
            let Some(reason) = self.mode.escalation_reason(&snapshot) else {
                break;
            };
            let Some(next) = self.mode.next() else {
                break;
            };
            self.escalate(next, reason);
        }

        let stats = agg.snapshot();
        self.stats = Some(stats.clone());

        let min_rate = self.min_acceptable_rate();
        if self.request.options.auto_mode && stats.recovery_rate < min_rate {
            return Err(EngineError::VerificationFailure(format!(
                "recovered {:.2}% of {}, below the acceptable {:.1}%",
                stats.recovery_rate,
                human_size(stats.total_size),
                min_rate
            )));
        }

        if self.request.options.verify {
            let result = ImageVerifier::new(self.runner, self.sink, self.cancel)
                .with_size_tolerance(self.config.partial_size_tolerance)
                .verify_image(
                    &self.request.source,
                    &image,
                    &stats,
                    &self.request.options.hash_algorithms,
                    self.compress(),
                )?;
            let passed = result.passed;
            let detail = result.detail.clone();
            self.sink.log(format!("Verification: {}", detail));
            self.verification = Some(result);
            if !passed {
                return Err(EngineError::VerificationFailure(detail));
            }
        }

        Ok(format!(
            "Acquisition completed in {} mode: {:.2}% recovered, {} bad sectors",
            self.mode.name(),
            stats.recovery_rate,
            stats.bad_sectors
        ))
    }

    fn escalate(&mut self, next: RecoveryMode, reason: &str) {
        let transition = ModeTransition {
            from: self.mode,
            to: next,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        tracing::info!(from = ?transition.from, to = ?transition.to, reason, "Escalating recovery mode");
        self.transitions.push(transition);
        self.mode = next;
        self.sink.mode_changed(next, reason);
    }

    fn run_mode(
        &mut self,
        builder: &CommandBuilder,
        agg: &mut StatsAggregator,
        device: &Device,
        dest_is_device: bool,
    ) -> EngineResult<()> {
        let discard = self.request.options.discard_destination
            && dest_is_device
            && is_flash_media(&self.request.destination.to_string_lossy());
        let plan = builder.plan(self.mode, self.compress(), discard);
        let total = plan.len() as u32;
        agg.start_mode(total);

        self.sink.log(format!(
            "Using {} mode: {}",
            self.mode.name(),
            self.mode.profile().description
        ));

        for (idx, pass) in plan.iter().enumerate() {
            self.cancel.check()?;
            if !pass.condition.holds(agg.rate()) {
                self.sink.log(format!(
                    "Skipping {}: {:.2}% already recovered",
                    pass.label.to_lowercase(),
                    agg.rate()
                ));
                continue;
            }

            agg.start_phase(idx as u32 + 1);
            self.sink
                .log(format!("Phase {}/{}: {}", idx + 1, total, pass.label));
            self.sink.log(format!("Running: {}", pass.command));

            let sink = self.sink;
            let outcome = self.runner.run(
                &pass.command,
                &mut |line| {
                    sink.tool_output(line);
                    if let Some(event) = pass.dialect.parse(line) {
                        if agg.apply(&event) {
                            let snapshot = agg.snapshot();
                            sink.stats(&snapshot);
                            sink.progress(
                                agg.progress_percent(),
                                format!(
                                    "{}: {} of {}",
                                    pass.label,
                                    human_size(snapshot.recovered),
                                    human_size(snapshot.total_size)
                                ),
                            );
                        }
                    }
                },
                pass.policy,
                self.cancel,
            )?;
            if let Some(warning) = outcome.warning {
                self.sink.warn(warning);
            }

            if pass.is_ddrescue() {
                self.refresh_from_map(builder, agg, device);
            } else if pass.dialect == Dialect::Dd && !dest_is_device && !self.compress() {
                self.trim_padding(&self.image_path(), device.size_bytes)?;
            }
            self.sink.stats(&agg.snapshot());
        }

        if self.mode == RecoveryMode::ForensicRecovery && agg.rate() < TARGETED_RECOVERY_BELOW {
            self.targeted_recovery(builder, agg)?;
        }
        Ok(())
    }

    /// Cut the zeros `conv=sync` appends to the final short block.
    fn trim_padding(&self, image: &Path, size: u64) -> EngineResult<()> {
        let len = match std::fs::metadata(image) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(()),
        };
        if len > size {
            OpenOptions::new().write(true).open(image)?.set_len(size)?;
            self.sink.log(format!(
                "Trimmed {} of block padding from {}",
                human_size(len - size),
                image.display()
            ));
        }
        Ok(())
    }

    /// Fold the map file into the stats and append new bad ranges.
    fn refresh_from_map(&mut self, builder: &CommandBuilder, agg: &mut StatsAggregator, device: &Device) {
        let blocks = match bad_sectors::read_map(builder.map_file()) {
            Ok(blocks) if !blocks.is_empty() => blocks,
            Ok(_) => return,
            Err(err) => {
                tracing::debug!(error = %err, "Map file not readable yet");
                return;
            }
        };

        agg.apply_map_summary(&bad_sectors::summarize(&blocks));

        if !self.request.options.log_bad_sectors {
            return;
        }
        let ranges = bad_sectors::bad_ranges(&blocks);
        if ranges.is_empty() {
            return;
        }
        let config = self.config;
        let sink = self.sink;
        let log = self.bad_log.get_or_insert_with(|| {
            BadSectorLog::new(
                BadSectorLog::default_path(
                    &config.acquisition_log_dir(),
                    &device_slug(&device.path),
                    &file_timestamp(),
                ),
                device.path.clone(),
            )
        });
        match log.append(&ranges) {
            Ok(0) => {}
            Ok(fresh) => sink.log(format!(
                "Recorded {} new bad sector ranges in {}",
                fresh,
                log.path().display()
            )),
            Err(err) => sink.warn(format!("could not write bad sector log: {:#}", err)),
        }
    }

    fn targeted_recovery(&mut self, builder: &CommandBuilder, agg: &mut StatsAggregator) -> EngineResult<()> {
        if !self.runner.has_tool("dc3dd") {
            self.sink
                .warn("dc3dd is not installed; skipping targeted sector recovery");
            return Ok(());
        }

        let ranges = match bad_sectors::read_map(builder.map_file()) {
            Ok(blocks) => bad_sectors::bad_ranges(&blocks),
            Err(err) => {
                self.sink
                    .warn(format!("could not read map file for targeted recovery: {}", err));
                return Ok(());
            }
        };
        if ranges.is_empty() {
            return Ok(());
        }

        self.sink.log(format!(
            "Attempting targeted recovery of {} bad sector ranges",
            ranges.len()
        ));
        let recovered = targeted::recover_ranges(
            self.runner,
            &self.request.source,
            &self.image_path(),
            &ranges,
            self.sink,
            self.cancel,
        )?;
        agg.apply_targeted(recovered);
        self.sink.log(format!(
            "Targeted recovery read {} additional sectors; recovery rate now {:.4}%",
            recovered,
            agg.rate()
        ));
        Ok(())
    }
}
