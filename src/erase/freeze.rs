use crate::events::EventSink;
use crate::parsers::AtaSecurityState;
use crate::process::{CancelToken, CommandSpec, ToolRunner};
use crate::{EngineError, EngineResult};
use serde::Serialize;
use std::time::Duration;

/// ATA security freeze state as reported by `hdparm -I`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FreezeStatus {
    NotFrozen,
    Frozen,
    SecurityLocked,
    /// No security feature set in the identify output
    Unsupported,
}

impl FreezeStatus {
    pub fn from_security(state: Option<&AtaSecurityState>) -> Self {
        match state {
            None => FreezeStatus::Unsupported,
            Some(s) if !s.supported => FreezeStatus::Unsupported,
            Some(s) if s.frozen => FreezeStatus::Frozen,
            Some(s) if s.locked => FreezeStatus::SecurityLocked,
            Some(_) => FreezeStatus::NotFrozen,
        }
    }
}

/// Frozen-drive detection. The engine never tries to force a drive out of
/// the frozen state; it reports it, waits once, and checks again.
pub struct FreezeMitigation;

impl FreezeMitigation {
    /// Run `hdparm -I` and parse its security section.
    pub fn query(
        runner: &dyn ToolRunner,
        device: &str,
        cancel: &CancelToken,
    ) -> EngineResult<Option<AtaSecurityState>> {
        let output = runner.capture(&CommandSpec::new("hdparm").args(["-I", device]), cancel)?;
        if !output.success() {
            tracing::warn!(device = %device, stderr = %output.stderr.trim(), "hdparm -I failed");
            return Ok(None);
        }
        Ok(AtaSecurityState::parse(&output.stdout))
    }

    pub fn get_freeze_status(
        runner: &dyn ToolRunner,
        device: &str,
        cancel: &CancelToken,
    ) -> EngineResult<FreezeStatus> {
        let state = Self::query(runner, device, cancel)?;
        Ok(FreezeStatus::from_security(state.as_ref()))
    }

    /// Report a frozen drive, wait `delay` and re-check once.
    ///
    /// Returns the security state after the re-check, or `DeviceFrozen`
    /// when the drive is still frozen.
    pub fn wait_for_thaw(
        runner: &dyn ToolRunner,
        sink: &EventSink,
        device: &str,
        delay: Duration,
        cancel: &CancelToken,
    ) -> EngineResult<Option<AtaSecurityState>> {
        tracing::warn!(device = %device, "Drive security is frozen");
        sink.frozen_drive(device);
        sink.log("The drive security is frozen and cannot be erased in this state.");
        sink.log("Suspend and resume the machine or power cycle the drive, then retry.");

        cancel.sleep(delay)?;

        let state = Self::query(runner, device, cancel)?;
        if state.map_or(false, |s| s.frozen) {
            return Err(EngineError::DeviceFrozen(format!(
                "{} is still frozen after {}",
                device,
                humantime::format_duration(delay)
            )));
        }
        sink.log("Drive is no longer frozen");
        Ok(state)
    }
}
