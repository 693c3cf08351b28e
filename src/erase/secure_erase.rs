//! Hardware secure erase ("NULLDRIVE").
//!
//! NVMe drives get a sanitize block erase, a secure format or a plain
//! format, in that order of preference. ATA drives get a security erase
//! (enhanced when reported) under a temporary password. Anything that
//! cannot be erased in hardware is shredded instead. A SHA-256 of the
//! leading region is taken before and after to confirm the content changed.

use super::freeze::FreezeMitigation;
use super::passes::run_shred_command;
use super::PostErase;
use crate::config::EngineConfig;
use crate::device::{BusType, Device};
use crate::events::EventSink;
use crate::parsers::{AtaSecurityState, NvmeCapabilities, SanitizeStatus};
use crate::process::{CancelToken, CommandSpec, FailurePolicy, ToolRunner};
use crate::verification::{hash_region, HashAlgorithm, HashRecord, VerificationMethod, VerificationResult};
use crate::{EngineError, EngineResult};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// The erase that actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EraseMethod {
    NvmeSanitize,
    NvmeSecureFormat,
    NvmeFormat,
    AtaEnhancedErase,
    AtaErase,
    Shred,
}

impl fmt::Display for EraseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EraseMethod::NvmeSanitize => "NVMe sanitize (block erase)",
            EraseMethod::NvmeSecureFormat => "NVMe format (user data erase)",
            EraseMethod::NvmeFormat => "NVMe format",
            EraseMethod::AtaEnhancedErase => "ATA enhanced security erase",
            EraseMethod::AtaErase => "ATA security erase",
            EraseMethod::Shred => "shred (random, random, zero)",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecureEraseReport {
    pub device: String,
    pub bus_type: BusType,
    pub method: EraseMethod,
    pub pre_hash: Option<String>,
    pub post_hash: Option<String>,
    pub verification: VerificationResult,
    pub elapsed: Duration,
}

/// Shred arguments for the software fallback: two random passes and a zero pass.
pub fn shred_fallback_command(device: &str) -> CommandSpec {
    CommandSpec::new("shred").args(["-v", "-n", "2", "-z", device])
}

fn hdparm_security(action: &str, password: &str, device: &str) -> CommandSpec {
    CommandSpec::new("hdparm").args(["--user-master", "u", action, password, device])
}

/// Compare the pre- and post-erase digests.
///
/// An unchanged digest always fails. A missing digest passes with a warning
/// unless `strict` is set.
pub fn compare_hashes(pre: Option<&str>, post: Option<&str>, strict: bool) -> VerificationResult {
    let (passed, detail) = match (pre, post) {
        (Some(pre), Some(post)) if pre != post => (true, "device content changed".to_string()),
        (Some(_), Some(_)) => (false, "device content appears unchanged after erase".to_string()),
        _ if strict => (false, "could not hash the device before and after erase".to_string()),
        _ => (
            true,
            "hash comparison unavailable; erase assumed successful".to_string(),
        ),
    };

    let mut result = VerificationResult::new(VerificationMethod::HashComparison, passed, detail);
    if let Some(post) = post {
        result.hashes.push(HashRecord {
            algorithm: HashAlgorithm::Sha256,
            source: pre.map(str::to_string),
            destination: post.to_string(),
        });
    }
    result
}

pub struct SecureEraseDispatcher<'a> {
    runner: &'a dyn ToolRunner,
    sink: &'a EventSink,
    cancel: &'a CancelToken,
    config: &'a EngineConfig,
}

impl<'a> SecureEraseDispatcher<'a> {
    pub fn new(
        runner: &'a dyn ToolRunner,
        sink: &'a EventSink,
        cancel: &'a CancelToken,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            runner,
            sink,
            cancel,
            config,
        }
    }

    fn sample_hash(&self, device: &str) -> EngineResult<Option<String>> {
        match hash_region(self.runner, device, self.config.hash_sample_mb, self.cancel) {
            Ok(digest) => Ok(Some(digest)),
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(err) => {
                self.sink.warn(format!("could not hash {}: {}", device, err));
                Ok(None)
            }
        }
    }

    pub fn erase(
        &self,
        device: &mut Device,
        post_erase: PostErase,
        lock_password: Option<&str>,
    ) -> EngineResult<SecureEraseReport> {
        self.sink.log("=== NULLDRIVE SECURE ERASE INITIATED ===");
        self.sink.log(format!(
            "Target device: {} ({}, {} bytes)",
            device.path, device.bus_type, device.size_bytes
        ));

        let pre_hash = self.sample_hash(&device.path)?;
        let started = Instant::now();

        let method = match device.bus_type {
            BusType::Nvme => self.erase_nvme(device)?,
            BusType::Ata => self.erase_ata(device)?,
        };
        let elapsed = started.elapsed();
        self.sink.log(format!(
            "Secure erase ({}) completed in {}",
            method,
            humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
        ));

        let post_hash = self.sample_hash(&device.path)?;
        let verification = compare_hashes(
            pre_hash.as_deref(),
            post_hash.as_deref(),
            self.config.strict_erase_hash,
        );
        if verification.passed {
            self.sink.log(format!("Hash verification: {}", verification.detail));
        } else {
            self.sink.warn(format!("Hash verification: {}", verification.detail));
        }

        self.apply_post_erase(device, post_erase, lock_password)?;

        Ok(SecureEraseReport {
            device: device.path.clone(),
            bus_type: device.bus_type,
            method,
            pre_hash,
            post_hash,
            verification,
            elapsed,
        })
    }

    /// Erase candidates for a controller, most thorough first.
    pub fn nvme_candidates(caps: &NvmeCapabilities) -> Vec<EraseMethod> {
        let mut candidates = Vec::with_capacity(3);
        if caps.sanitize_block_erase {
            candidates.push(EraseMethod::NvmeSanitize);
        }
        if caps.format_nvm {
            candidates.push(EraseMethod::NvmeSecureFormat);
        }
        candidates.push(EraseMethod::NvmeFormat);
        candidates
    }

    fn erase_nvme(&self, device: &Device) -> EngineResult<EraseMethod> {
        let id = self
            .runner
            .capture(&CommandSpec::new("nvme").args(["id-ctrl", device.path.as_str()]), self.cancel)?;
        let caps = if id.success() {
            NvmeCapabilities::parse(&id.stdout)
        } else {
            self.sink.warn(format!(
                "nvme id-ctrl failed for {}: {}",
                device.path,
                id.stderr.trim()
            ));
            NvmeCapabilities::default()
        };
        tracing::info!(device = %device.path, ?caps, "NVMe erase capabilities");

        for method in Self::nvme_candidates(&caps) {
            self.cancel.check()?;
            self.sink.log(format!("Using {}", method));
            let attempt = match method {
                EraseMethod::NvmeSanitize => self.nvme_sanitize(&device.path),
                EraseMethod::NvmeSecureFormat => self.nvme_format(&device.path, 1),
                _ => self.nvme_format(&device.path, 0),
            };
            match attempt {
                Ok(()) => return Ok(method),
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => self.sink.warn(format!("{} failed: {}", method, err)),
            }
        }

        self.sink
            .warn("no NVMe erase succeeded; falling back to shred");
        self.shred(&device.path)
    }

    fn nvme_sanitize(&self, device: &str) -> EngineResult<()> {
        let cmd = CommandSpec::new("nvme").args(["sanitize", device, "--sanact=2", "--ause"]);
        self.runner
            .run(&cmd, &mut |line| self.sink.tool_output(line), FailurePolicy::Required, self.cancel)?;

        let poll = Duration::from_secs(self.config.sanitize_poll_secs.max(1));
        let deadline = Instant::now() + Duration::from_secs(self.config.sanitize_timeout_secs);
        loop {
            let log = self
                .runner
                .capture(&CommandSpec::new("nvme").args(["sanitize-log", device]), self.cancel)?;
            match SanitizeStatus::parse(&log.stdout) {
                Some(SanitizeStatus::Completed) => return Ok(()),
                Some(SanitizeStatus::Failed) => {
                    return Err(EngineError::Internal(format!(
                        "sanitize reported failure on {}",
                        device
                    )))
                }
                Some(status) => tracing::debug!(device = %device, ?status, "Sanitize in progress"),
                None => {
                    return Err(EngineError::Internal(format!(
                        "sanitize log of {} is unreadable",
                        device
                    )))
                }
            }

            if Instant::now() >= deadline {
                return Err(EngineError::Timeout(format!(
                    "sanitize of {} did not finish within {}",
                    device,
                    humantime::format_duration(Duration::from_secs(self.config.sanitize_timeout_secs))
                )));
            }
            self.sink.log("Sanitize in progress...");
            self.cancel.sleep(poll)?;
        }
    }

    fn nvme_format(&self, device: &str, ses: u8) -> EngineResult<()> {
        let cmd = CommandSpec::new("nvme")
            .args(["format", device])
            .arg(format!("--ses={}", ses))
            .arg("--force");
        self.runner
            .run(&cmd, &mut |line| self.sink.tool_output(line), FailurePolicy::Required, self.cancel)?;
        Ok(())
    }

    fn erase_ata(&self, device: &mut Device) -> EngineResult<EraseMethod> {
        let mut state = FreezeMitigation::query(self.runner, &device.path, self.cancel)?;

        if state.map_or(false, |s| s.frozen) {
            device.frozen = true;
            let delay = Duration::from_secs(self.config.frozen_recheck_delay_secs);
            match FreezeMitigation::wait_for_thaw(self.runner, self.sink, &device.path, delay, self.cancel) {
                Ok(thawed) => {
                    device.frozen = false;
                    state = thawed;
                }
                Err(EngineError::DeviceFrozen(detail)) if self.config.frozen_fallback_to_shred => {
                    self.sink
                        .warn(format!("{}; erasing with shred instead", detail));
                    return self.shred(&device.path);
                }
                Err(err) => return Err(err),
            }
        }

        let Some(security) = state.filter(|s| s.supported) else {
            self.sink
                .log("ATA security erase not supported; using shred");
            return self.shred(&device.path);
        };
        if security.locked {
            return Err(EngineError::UnsupportedDevice(format!(
                "{} is security locked",
                device.path
            )));
        }

        self.ata_security_erase(&device.path, &security)
    }

    fn ata_security_erase(&self, device: &str, security: &AtaSecurityState) -> EngineResult<EraseMethod> {
        let password = self.config.erase_password.as_str();
        let (method, action) = if security.enhanced_erase {
            (EraseMethod::AtaEnhancedErase, "--security-erase-enhanced")
        } else {
            (EraseMethod::AtaErase, "--security-erase")
        };
        self.sink.log(format!("Using {}", method));

        let mut log = |line: &str| self.sink.tool_output(line);
        self.runner.run(
            &hdparm_security("--security-set-pass", password, device),
            &mut log,
            FailurePolicy::Required,
            self.cancel,
        )?;

        self.sink.log("=== WARNING: SECURE ERASE IN PROGRESS, DO NOT INTERRUPT ===");
        let erase = self.runner.run(
            &hdparm_security(action, password, device),
            &mut log,
            FailurePolicy::Required,
            self.cancel,
        );
        if let Err(err) = erase {
            // Leave the drive usable when the erase never started. Runs even
            // after a stop request so the password is not left behind.
            let disable = self.runner.run(
                &hdparm_security("--security-disable", password, device),
                &mut log,
                FailurePolicy::BestEffort,
                &CancelToken::new(),
            );
            match disable {
                Ok(outcome) if outcome.succeeded() => {
                    self.sink.log(format!("Security password removed from {}", device))
                }
                Ok(outcome) => self.sink.warn(format!(
                    "could not remove the security password from {}; the drive may stay locked: {}",
                    device,
                    outcome.warning.unwrap_or_else(|| "no output".to_string())
                )),
                Err(disable_err) => self.sink.warn(format!(
                    "could not remove the security password from {}; the drive may stay locked: {}",
                    device, disable_err
                )),
            }
            return Err(err);
        }
        Ok(method)
    }

    fn shred(&self, device: &str) -> EngineResult<EraseMethod> {
        run_shred_command(self.runner, self.sink, self.cancel, &shred_fallback_command(device))?;
        Ok(EraseMethod::Shred)
    }

    fn apply_post_erase(
        &self,
        device: &Device,
        post_erase: PostErase,
        lock_password: Option<&str>,
    ) -> EngineResult<()> {
        if post_erase == PostErase::None {
            return Ok(());
        }
        if device.is_nvme() {
            self.sink
                .warn("post-erase lock applies to ATA drives only; skipping");
            return Ok(());
        }
        let password = lock_password.filter(|p| !p.is_empty()).ok_or_else(|| {
            EngineError::InvalidOptions("post-erase lock requires a password".to_string())
        })?;

        let mut log = |line: &str| self.sink.tool_output(line);
        let set_pass = hdparm_security("--security-set-pass", password, &device.path);

        match post_erase {
            PostErase::Lock => {
                self.sink.log("=== APPLYING POST-ERASE LOCK ===");
                let outcome = self.runner.run(&set_pass, &mut log, FailurePolicy::BestEffort, self.cancel)?;
                match outcome.warning {
                    Some(warning) => self.sink.warn(format!("failed to set ATA password: {}", warning)),
                    None => self
                        .sink
                        .log("Drive locked; it now requires the password to access"),
                }
            }
            PostErase::Brick => {
                self.sink.log("=== APPLYING PERMANENT BRICK LOCK ===");
                self.runner.run(&set_pass, &mut log, FailurePolicy::Required, self.cancel)?;

                // This erase is expected to hang or fail
                let erase = hdparm_security("--security-erase", password, &device.path)
                    .with_timeout(Duration::from_secs(self.config.brick_erase_timeout_secs));
                let outcome = self.runner.run(&erase, &mut log, FailurePolicy::BestEffort, self.cancel)?;
                if let Some(warning) = outcome.warning {
                    tracing::debug!(device = %device.path, %warning, "Brick erase step ended");
                }

                self.runner.run(&set_pass, &mut log, FailurePolicy::Required, self.cancel)?;
                self.sink
                    .warn("drive is now permanently locked and cannot be unlocked");
            }
            PostErase::None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nvme_candidates_order() {
        let all = NvmeCapabilities {
            format_nvm: true,
            sanitize_block_erase: true,
            ..Default::default()
        };
        assert_eq!(
            SecureEraseDispatcher::nvme_candidates(&all),
            vec![
                EraseMethod::NvmeSanitize,
                EraseMethod::NvmeSecureFormat,
                EraseMethod::NvmeFormat
            ]
        );
        assert_eq!(
            SecureEraseDispatcher::nvme_candidates(&NvmeCapabilities::default()),
            vec![EraseMethod::NvmeFormat]
        );
    }

    #[test]
    fn test_compare_hashes() {
        assert!(compare_hashes(Some("aa"), Some("bb"), false).passed);
        assert!(!compare_hashes(Some("aa"), Some("aa"), false).passed);
        assert!(compare_hashes(None, Some("aa"), false).passed);
        assert!(!compare_hashes(None, Some("aa"), true).passed);
        assert!(!compare_hashes(Some("aa"), None, true).passed);

        let result = compare_hashes(Some("aa"), Some("bb"), false);
        assert_eq!(result.method, VerificationMethod::HashComparison);
        assert_eq!(result.hashes[0].source.as_deref(), Some("aa"));
    }

    #[test]
    fn test_shred_fallback_is_three_passes() {
        assert_eq!(
            shred_fallback_command("/dev/sdb").to_string(),
            "shred -v -n 2 -z /dev/sdb"
        );
    }
}
