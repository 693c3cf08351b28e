use super::{VerificationMethod, VerificationResult};
use crate::parsers::capture::parse_ent_output;
use crate::process::{shell_quote, CancelToken, CommandSpec, FailurePolicy, ToolRunner};
use crate::{EngineError, EngineResult};

/// Shannon entropy of the leading sample of a device, measured by `ent`.
pub struct EntropyCheck {
    pub sample_mb: u64,
    /// Minimum bits per byte for the check to pass
    pub threshold: f64,
}

impl EntropyCheck {
    pub fn new(sample_mb: u64, threshold: f64) -> Self {
        Self {
            sample_mb,
            threshold,
        }
    }

    pub fn command(&self, device: &str) -> CommandSpec {
        CommandSpec::pipeline(format!(
            "dd if={} bs=1M count={} status=none | ent -t",
            shell_quote(device),
            self.sample_mb
        ))
    }

    pub fn run(
        &self,
        runner: &dyn ToolRunner,
        device: &str,
        cancel: &CancelToken,
    ) -> EngineResult<VerificationResult> {
        let (_, lines) = runner.run_collect(&self.command(device), FailurePolicy::Required, cancel)?;
        let entropy = parse_ent_output(&lines.join("\n")).ok_or_else(|| {
            EngineError::VerificationFailure(format!("ent produced no entropy value for {}", device))
        })?;

        let passed = entropy >= self.threshold;
        tracing::info!(device, entropy, threshold = self.threshold, passed, "Entropy check");

        let mut result = VerificationResult::new(
            VerificationMethod::Entropy,
            passed,
            format!(
                "entropy {:.6} bits/byte (threshold {:.2})",
                entropy, self.threshold
            ),
        );
        result.entropy = Some(entropy);
        Ok(result)
    }
}
