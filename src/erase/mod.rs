//! Wipe jobs: software overwrite methods and hardware secure erase over a
//! queue of devices.

pub mod freeze;
pub mod passes;
pub mod secure_erase;
pub mod stress;
pub mod unmount;

pub use freeze::{FreezeMitigation, FreezeStatus};
pub use passes::{PassRunner, PassSource};
pub use secure_erase::{EraseMethod, SecureEraseDispatcher, SecureEraseReport};
pub use stress::ThermalStress;

use crate::config::EngineConfig;
use crate::device::Device;
use crate::events::EventSink;
use crate::logging::{TamperEvent, TamperLog};
use crate::process::{CancelToken, CommandSpec, FailurePolicy, ToolInventory, ToolRunner};
use crate::size::{human_size, parse_size};
use crate::verification::{EntropyCheck, SampleVerifier, VerificationResult};
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WipeMethod {
    /// One pass of zeros
    Quick,
    /// Zeros, ones, random
    Dod,
    /// One pass of zeros after an optional discard
    Nist,
    /// `shred -n 35 -z`
    Gutmann,
    /// `passes` passes alternating `pattern` (when set) with random data
    Custom { pattern: Option<Vec<u8>>, passes: u32 },
    /// Hardware secure erase
    NullDrive,
}

impl WipeMethod {
    pub fn name(&self) -> &'static str {
        match self {
            WipeMethod::Quick => "quick",
            WipeMethod::Dod => "dod",
            WipeMethod::Nist => "nist",
            WipeMethod::Gutmann => "gutmann",
            WipeMethod::Custom { .. } => "custom",
            WipeMethod::NullDrive => "nulldrive",
        }
    }

    /// dd passes for the overwrite methods. Empty for shred and hardware erase.
    pub fn pass_sources(&self) -> Vec<PassSource> {
        match self {
            WipeMethod::Quick | WipeMethod::Nist => vec![PassSource::Zeros],
            WipeMethod::Dod => vec![PassSource::Zeros, PassSource::Ones, PassSource::Random],
            WipeMethod::Custom { pattern, passes } => (0..*passes)
                .map(|i| match pattern {
                    Some(bytes) if i % 2 == 0 => PassSource::Pattern(bytes.clone()),
                    _ => PassSource::Random,
                })
                .collect(),
            WipeMethod::Gutmann | WipeMethod::NullDrive => Vec::new(),
        }
    }

    /// Verification matching what the last pass leaves on the disk.
    pub fn auto_verification(&self) -> Option<VerificationMode> {
        match self {
            WipeMethod::Quick | WipeMethod::Nist | WipeMethod::Gutmann => Some(VerificationMode::Sample),
            WipeMethod::Dod => Some(VerificationMode::Entropy),
            WipeMethod::Custom { .. } => match self.pass_sources().last() {
                Some(PassSource::Random) => Some(VerificationMode::Entropy),
                _ => None,
            },
            WipeMethod::NullDrive => None,
        }
    }

    /// Tools the write passes cannot run without.
    pub fn required_tools(&self) -> Vec<&'static str> {
        match self {
            WipeMethod::Gutmann => vec!["shred"],
            WipeMethod::NullDrive => Vec::new(),
            _ => vec!["dd"],
        }
    }
}

impl fmt::Display for WipeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WipeMethod::Custom { pattern, passes } => write!(
                f,
                "custom ({} passes, {})",
                passes,
                if pattern.is_some() { "pattern" } else { "random" }
            ),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for WipeMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" | "zero" => Ok(WipeMethod::Quick),
            "dod" => Ok(WipeMethod::Dod),
            "nist" => Ok(WipeMethod::Nist),
            "gutmann" => Ok(WipeMethod::Gutmann),
            "custom" => Ok(WipeMethod::Custom {
                pattern: None,
                passes: 1,
            }),
            "nulldrive" | "secure-erase" => Ok(WipeMethod::NullDrive),
            other => Err(EngineError::InvalidOptions(format!(
                "unknown wipe method '{}'",
                other
            ))),
        }
    }
}

/// Parse a byte pattern such as `"00 FF"`, `"0x55,0xAA"` or `"DEADBEEF"`.
pub fn parse_pattern(text: &str) -> EngineResult<Vec<u8>> {
    let invalid = || EngineError::InvalidOptions(format!("invalid wipe pattern '{}'", text));
    let mut bytes = Vec::new();

    for token in text.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()) {
        let hex = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if hex.is_empty() || hex.len() % 2 != 0 {
            return Err(invalid());
        }
        for pair in hex.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(pair).map_err(|_| invalid())?;
            bytes.push(u8::from_str_radix(pair, 16).map_err(|_| invalid())?);
        }
    }

    if bytes.is_empty() {
        return Err(invalid());
    }
    Ok(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostErase {
    #[default]
    None,
    /// Set an ATA user password after the erase
    Lock,
    /// Set a password, interrupt an erase and set it again
    Brick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Pick from the method's final pass
    #[default]
    Auto,
    Sample,
    Entropy,
}

impl FromStr for VerificationMode {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(VerificationMode::Auto),
            "sample" | "basic" => Ok(VerificationMode::Sample),
            "entropy" => Ok(VerificationMode::Entropy),
            other => Err(EngineError::InvalidOptions(format!(
                "unknown verification mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WipeOptions {
    /// dd block size (`bs=`)
    pub block_size: String,
    pub direct_io: bool,
    pub sync_writes: bool,
    /// Keep writing past write errors (`conv=noerror`)
    pub quick_erase: bool,
    pub verify: bool,
    pub verification_mode: VerificationMode,
    /// Overrides the configured entropy threshold
    pub entropy_threshold: Option<f64>,
    /// Discard flash media before writing
    pub discard: bool,
    pub key_wipe: bool,
    pub bootloader_wipe: bool,
    /// Flush and drop the page cache before wiping
    pub memory_wipe: bool,
    /// Run fio random I/O against the drive before wiping
    pub thermal_stress: bool,
    pub stress_duration_secs: u64,
    /// Target drive temperature in °C, recorded with the stress test
    pub stress_temp_c: u32,
    pub post_erase: PostErase,
    pub lock_password: Option<String>,
    pub tamper_log: bool,
    /// Free-form location recorded with tamper events
    pub location: Option<String>,
}

impl Default for WipeOptions {
    fn default() -> Self {
        Self {
            block_size: "1M".to_string(),
            direct_io: false,
            sync_writes: false,
            quick_erase: false,
            verify: true,
            verification_mode: VerificationMode::Auto,
            entropy_threshold: None,
            discard: true,
            key_wipe: false,
            bootloader_wipe: false,
            memory_wipe: false,
            thermal_stress: false,
            stress_duration_secs: 300,
            stress_temp_c: 70,
            post_erase: PostErase::None,
            lock_password: None,
            tamper_log: true,
            location: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WipeRequest {
    pub devices: Vec<String>,
    pub method: WipeMethod,
    pub options: WipeOptions,
}

impl WipeRequest {
    pub fn new(devices: Vec<String>, method: WipeMethod) -> Self {
        Self {
            devices,
            method,
            options: WipeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WipeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.devices.is_empty() {
            return Err(EngineError::InvalidOptions("no devices to wipe".to_string()));
        }
        if parse_size(&self.options.block_size) == 0 {
            return Err(EngineError::InvalidOptions(format!(
                "invalid block size '{}'",
                self.options.block_size
            )));
        }
        if let WipeMethod::Custom { pattern, passes } = &self.method {
            if *passes == 0 {
                return Err(EngineError::InvalidOptions(
                    "custom wipe needs at least one pass".to_string(),
                ));
            }
            if pattern.as_ref().map_or(false, Vec::is_empty) {
                return Err(EngineError::InvalidOptions("wipe pattern is empty".to_string()));
            }
        }
        if self.options.thermal_stress && self.options.stress_duration_secs == 0 {
            return Err(EngineError::InvalidOptions(
                "thermal stress test needs a non-zero duration".to_string(),
            ));
        }
        if self.options.post_erase != PostErase::None
            && self.options.lock_password.as_deref().map_or(true, str::is_empty)
        {
            return Err(EngineError::InvalidOptions(
                "post-erase lock requires a non-empty password".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceOutcome {
    pub device: String,
    pub success: bool,
    pub message: String,
    pub verification: Option<VerificationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WipeOutcome {
    pub success: bool,
    pub message: String,
    pub results: Vec<DeviceOutcome>,
}

/// A queue of devices wiped one after the other by the owning worker.
pub struct WipeJob<'a> {
    runner: &'a dyn ToolRunner,
    config: &'a EngineConfig,
    sink: &'a EventSink,
    cancel: &'a CancelToken,
    tamper: TamperLog,
    request: WipeRequest,
}

impl<'a> WipeJob<'a> {
    pub fn new(
        runner: &'a dyn ToolRunner,
        config: &'a EngineConfig,
        sink: &'a EventSink,
        cancel: &'a CancelToken,
        request: WipeRequest,
    ) -> Self {
        let tamper = if request.options.tamper_log {
            TamperLog::new(config.tamper_log_path())
        } else {
            TamperLog::disabled()
        };
        Self {
            runner,
            config,
            sink,
            cancel,
            tamper,
            request,
        }
    }

    pub fn with_tamper_log(mut self, tamper: TamperLog) -> Self {
        self.tamper = tamper;
        self
    }

    fn tamper_event(&self, event_type: &str, device: &str, message: impl Into<String>) {
        let event = TamperEvent::new(event_type, device, message)
            .with_location(self.request.options.location.clone());
        if let Err(err) = self.tamper.record(&event) {
            self.sink.warn(format!("could not write tamper log: {:#}", err));
        }
    }

    /// Wipe every queued device and emit exactly one `Finished` event.
    pub fn run(self) -> WipeOutcome {
        let outcome = match self.cancel.check().and_then(|_| self.request.validate()) {
            Ok(()) => self.run_queue(),
            Err(EngineError::Cancelled) => WipeOutcome {
                success: false,
                message: "Wipe cancelled by user".to_string(),
                results: Vec::new(),
            },
            Err(err) => WipeOutcome {
                success: false,
                message: format!("Wipe failed: {}", err),
                results: Vec::new(),
            },
        };

        if outcome.success {
            self.sink.progress(100.0, "Wipe complete");
        }
        self.sink.finished(outcome.success, outcome.message.clone(), None);
        outcome
    }

    fn run_queue(&self) -> WipeOutcome {
        let total = self.request.devices.len();
        let mut results = Vec::with_capacity(total);
        let mut cancelled = false;

        for (idx, path) in self.request.devices.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.sink.log(format!(
                "Starting {} wipe on {} ({}/{})",
                self.request.method,
                path,
                idx + 1,
                total
            ));

            let result = self.wipe_device(path);
            let (success, message, verification) = match result {
                Ok((message, verification)) => (true, message, verification),
                Err(EngineError::Cancelled) => {
                    cancelled = true;
                    (false, "Wipe cancelled by user".to_string(), None)
                }
                Err(err) => (false, err.to_string(), None),
            };

            if success {
                self.tamper_event("wipe_complete", path, format!("Wipe completed successfully on {}", path));
            } else {
                self.tamper_event("wipe_failed", path, format!("Wipe failed on {}: {}", path, message));
                tracing::error!(device = %path, %message, "Wipe failed");
            }
            self.sink.device_finished(path.clone(), success, message.clone());
            results.push(DeviceOutcome {
                device: path.clone(),
                success,
                message,
                verification,
            });

            if cancelled {
                break;
            }
        }

        let failed = results.iter().filter(|r| !r.success).count();
        let success = !cancelled && failed == 0 && results.len() == total;
        let message = if cancelled {
            "Wipe cancelled by user".to_string()
        } else if success {
            format!("Wiped {} device(s) with {}", total, self.request.method)
        } else {
            format!("{} of {} device(s) failed", failed, total)
        };

        WipeOutcome {
            success,
            message,
            results,
        }
    }

    fn wipe_device(&self, path: &str) -> EngineResult<(String, Option<VerificationResult>)> {
        let mut device = Device::probe(self.runner, path, self.cancel)?;
        let method = &self.request.method;
        let options = &self.request.options;

        ToolInventory::require(self.runner, &method.required_tools())?;
        self.tamper_event(
            "wipe_start",
            path,
            format!("Starting {} wipe on {} ({})", method, path, human_size(device.size_bytes)),
        );

        let unmount_policy = if *method == WipeMethod::Nist && self.config.nist_requires_unmount {
            FailurePolicy::Required
        } else {
            FailurePolicy::BestEffort
        };
        unmount::unmount_device(self.runner, self.sink, self.cancel, path, unmount_policy)?;

        if options.memory_wipe {
            self.wipe_memory(path)?;
        }
        if options.thermal_stress {
            self.stress_test(path)?;
        }
        if options.key_wipe {
            self.wipe_keys(path)?;
        }

        if *method == WipeMethod::NullDrive {
            return self.secure_erase(&mut device);
        }

        self.best_effort(CommandSpec::new("wipefs").args(["-a", path]))?;
        if options.discard && device.flash {
            self.sink.log(format!("Discarding all blocks on {}", path));
            self.best_effort(CommandSpec::new("blkdiscard").args(["-f", path]))?;
        }

        let passes = PassRunner::new(self.runner, self.sink, self.cancel, &device, options);
        match method {
            WipeMethod::Gutmann => passes.run_shred(35, true)?,
            _ => passes.run_passes(&method.pass_sources())?,
        }
        self.best_effort(CommandSpec::new("sync"))?;

        if options.bootloader_wipe {
            self.wipe_bootloader(path)?;
        }

        let verification = if options.verify {
            self.verify(&device)?
        } else {
            None
        };
        if let Some(result) = &verification {
            if !result.passed {
                return Err(EngineError::VerificationFailure(result.detail.clone()));
            }
        }

        Ok((format!("{} wipe of {} completed", method, path), verification))
    }

    fn best_effort(&self, cmd: CommandSpec) -> EngineResult<()> {
        let outcome = self.runner.run(
            &cmd,
            &mut |line| self.sink.tool_output(line),
            FailurePolicy::BestEffort,
            self.cancel,
        )?;
        if let Some(warning) = outcome.warning {
            self.sink.warn(warning);
        }
        Ok(())
    }

    /// Flush dirty pages and drop the page, dentry and inode caches.
    fn wipe_memory(&self, path: &str) -> EngineResult<()> {
        self.sink.log("Wiping volatile memory");
        let outcome = self.runner.run(
            &CommandSpec::pipeline("sync && echo 3 > /proc/sys/vm/drop_caches"),
            &mut |line| self.sink.tool_output(line),
            FailurePolicy::BestEffort,
            self.cancel,
        )?;
        match outcome.warning {
            Some(warning) => self.sink.warn(format!("could not wipe volatile memory: {}", warning)),
            None => self.tamper_event("memory_wipe", path, "Volatile memory wiped"),
        }
        Ok(())
    }

    fn stress_test(&self, path: &str) -> EngineResult<()> {
        let options = &self.request.options;
        self.tamper_event(
            "stress_test_start",
            path,
            format!(
                "Thermal stress test started on {} ({}s, target {}°C)",
                path, options.stress_duration_secs, options.stress_temp_c
            ),
        );
        let completed = ThermalStress::new(options.stress_duration_secs, options.stress_temp_c).run(
            self.runner,
            self.sink,
            self.cancel,
            path,
        )?;
        if completed {
            self.tamper_event(
                "stress_test_complete",
                path,
                format!("Thermal stress test completed on {}", path),
            );
        }
        Ok(())
    }

    fn wipe_keys(&self, path: &str) -> EngineResult<()> {
        let is_luks = self
            .runner
            .capture(&CommandSpec::new("cryptsetup").args(["isLuks", path]), self.cancel)
            .map(|out| out.success())
            .unwrap_or(false);
        if is_luks {
            self.sink.log(format!("Erasing LUKS key slots on {}", path));
            self.best_effort(CommandSpec::new("cryptsetup").args(["luksErase", "-q", path]))?;
        }
        self.best_effort(CommandSpec::new("wipefs").args(["-a", path]))?;
        self.tamper_event("key_wipe", path, format!("Cryptographic keys wiped on {}", path));
        Ok(())
    }

    fn wipe_bootloader(&self, path: &str) -> EngineResult<()> {
        self.sink.log(format!("Wiping boot sectors of {}", path));
        self.best_effort(CommandSpec::new("dd").args([
            "if=/dev/zero".to_string(),
            format!("of={}", path),
            "bs=512".to_string(),
            "count=4096".to_string(),
            "conv=fsync".to_string(),
        ]))?;
        self.tamper_event("bootloader_wipe", path, format!("Bootloader wiped on {}", path));
        Ok(())
    }

    fn secure_erase(&self, device: &mut Device) -> EngineResult<(String, Option<VerificationResult>)> {
        let options = &self.request.options;
        let report = SecureEraseDispatcher::new(self.runner, self.sink, self.cancel, self.config).erase(
            device,
            options.post_erase,
            options.lock_password.as_deref(),
        )?;

        let message = format!(
            "type={} method={} pre_hash={} post_hash={} verification={}",
            report.bus_type,
            report.method,
            report.pre_hash.as_deref().unwrap_or("N/A"),
            report.post_hash.as_deref().unwrap_or("N/A"),
            if report.verification.passed { "PASSED" } else { "FAILED" }
        );
        self.tamper_event("secure_erase", &report.device, message);

        if !report.verification.passed {
            return Err(EngineError::VerificationFailure(report.verification.detail));
        }
        Ok((
            format!("NULLDRIVE secure erase of {} completed ({})", report.device, report.method),
            Some(report.verification),
        ))
    }

    fn verify(&self, device: &Device) -> EngineResult<Option<VerificationResult>> {
        let mode = match self.request.options.verification_mode {
            VerificationMode::Auto => match self.request.method.auto_verification() {
                Some(mode) => mode,
                None => {
                    self.sink
                        .log("Final pass is a fixed pattern; skipping verification");
                    return Ok(None);
                }
            },
            explicit => explicit,
        };

        self.sink.log(format!("Verifying wipe of {}", device.path));
        let result = match mode {
            VerificationMode::Entropy => {
                let threshold = self
                    .request
                    .options
                    .entropy_threshold
                    .unwrap_or(self.config.entropy_threshold);
                EntropyCheck::new(self.config.entropy_sample_mb, threshold).run(
                    self.runner,
                    &device.path,
                    self.cancel,
                )?
            }
            _ => SampleVerifier::new(self.runner, self.sink, self.cancel)
                .with_samples(self.config.verify_samples)
                .verify(device)?,
        };
        self.sink.log(format!("Verification: {}", result.detail));
        Ok(Some(result))
    }
}
