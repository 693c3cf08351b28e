//! Zero-fill verification by sampling.
//!
//! The first MiB must read back as zeros, then up to `samples` random 4 KiB
//! blocks are compared against `/dev/zero` with `cmp`.

use super::{VerificationMethod, VerificationResult};
use crate::device::Device;
use crate::events::EventSink;
use crate::parsers::SanitizeStatus;
use crate::process::{shell_quote, CancelToken, CommandSpec, ToolRunner};
use crate::{EngineError, EngineResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const HEAD_BYTES: u64 = 1024 * 1024;
const SAMPLE_BYTES: u64 = 4096;

pub struct SampleVerifier<'a> {
    runner: &'a dyn ToolRunner,
    sink: &'a EventSink,
    cancel: &'a CancelToken,
    samples: u32,
    seed: Option<u64>,
}

impl<'a> SampleVerifier<'a> {
    pub fn new(runner: &'a dyn ToolRunner, sink: &'a EventSink, cancel: &'a CancelToken) -> Self {
        Self {
            runner,
            sink,
            cancel,
            samples: 100,
            seed: None,
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    /// Fixed seed for reproducible sample offsets.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Aligned offsets of the random blocks checked on a device of `size` bytes.
    pub fn sample_offsets(&self, size: u64) -> Vec<u64> {
        let count = (self.samples as u64).min(size / HEAD_BYTES);
        let blocks = size / SAMPLE_BYTES;
        if count == 0 || blocks == 0 {
            return Vec::new();
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        (0..count)
            .map(|_| rng.gen_range(0..blocks) * SAMPLE_BYTES)
            .collect()
    }

    /// `Ok(true)` when `len` bytes at `offset` are all zero.
    fn is_zero(&self, device: &str, offset: u64, len: u64) -> EngineResult<bool> {
        let cmd = CommandSpec::new("cmp").args([
            "-n".to_string(),
            len.to_string(),
            "-i".to_string(),
            format!("{}:0", offset),
            device.to_string(),
            "/dev/zero".to_string(),
        ]);
        let output = self.runner.capture(&cmd, self.cancel)?;
        match output.exit_code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(EngineError::VerificationFailure(format!(
                "cmp could not read {} at offset {}: {}",
                device,
                offset,
                output.stderr.trim()
            ))),
        }
    }

    fn dump_head(&self, device: &str) {
        let cmd = CommandSpec::feed(format!(
            "dd if={} bs=512 count=1 status=none | hexdump -C | head -20",
            shell_quote(device)
        ));
        match self.runner.capture(&cmd, self.cancel) {
            Ok(output) => {
                self.sink.log("First sector after wipe:");
                for line in output.stdout.lines() {
                    self.sink.log(line);
                }
            }
            Err(err) => self.sink.warn(format!("could not dump first sector: {}", err)),
        }
    }

    fn report_sanitize_log(&self, device: &str) {
        let cmd = CommandSpec::new("nvme").args(["sanitize-log", device]);
        match self.runner.capture(&cmd, self.cancel) {
            Ok(output) => match SanitizeStatus::parse(&output.stdout) {
                Some(status) => self.sink.log(format!("NVMe sanitize status: {:?}", status)),
                None => self.sink.log("NVMe sanitize log unavailable"),
            },
            Err(err) => self.sink.warn(format!("could not read sanitize log: {}", err)),
        }
    }

    pub fn verify(&self, device: &Device) -> EngineResult<VerificationResult> {
        if device.is_nvme() {
            self.report_sanitize_log(&device.path);
        }

        let head = HEAD_BYTES.min(device.size_bytes);
        if head > 0 && !self.is_zero(&device.path, 0, head)? {
            self.dump_head(&device.path);
            return Ok(VerificationResult::new(
                VerificationMethod::Sample,
                false,
                "non-zero data found in the first MiB",
            ));
        }

        let offsets = self.sample_offsets(device.size_bytes);
        let total = offsets.len();
        for (idx, offset) in offsets.into_iter().enumerate() {
            self.cancel.check()?;
            if !self.is_zero(&device.path, offset, SAMPLE_BYTES)? {
                return Ok(VerificationResult::new(
                    VerificationMethod::Sample,
                    false,
                    format!("non-zero data found at offset {}", offset),
                ));
            }
            if (idx + 1) % 10 == 0 {
                self.sink.log(format!("Verified {}/{} samples", idx + 1, total));
            }
        }

        Ok(VerificationResult::new(
            VerificationMethod::Sample,
            true,
            format!("first MiB and {} random blocks are zero", total),
        ))
    }
}
