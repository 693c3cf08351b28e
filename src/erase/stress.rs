//! Thermal stress pass: sustained random I/O against the drive before it
//! is wiped, run as back-to-back time-based `fio` rounds.

use crate::events::EventSink;
use crate::process::{CancelToken, CommandSpec, FailurePolicy, ToolRunner};
use crate::EngineResult;

/// Length of one fio round in seconds.
const ROUND_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalStress {
    duration_secs: u64,
    target_temp_c: u32,
}

impl ThermalStress {
    pub fn new(duration_secs: u64, target_temp_c: u32) -> Self {
        Self {
            duration_secs,
            target_temp_c,
        }
    }

    /// Runtime of each fio round; the last one takes what is left.
    pub fn rounds(&self) -> Vec<u64> {
        let mut rounds = Vec::new();
        let mut remaining = self.duration_secs;
        while remaining > 0 {
            let runtime = remaining.min(ROUND_SECS);
            rounds.push(runtime);
            remaining -= runtime;
        }
        rounds
    }

    pub fn command(device: &str, runtime_secs: u64) -> CommandSpec {
        CommandSpec::new("fio").args([
            "--name=stress".to_string(),
            format!("--filename={}", device),
            "--rw=randrw".to_string(),
            "--bs=4k".to_string(),
            "--direct=1".to_string(),
            "--ioengine=libaio".to_string(),
            "--iodepth=32".to_string(),
            format!("--runtime={}", runtime_secs),
            "--time_based".to_string(),
            "--exitall".to_string(),
        ])
    }

    /// Run every round. `Ok(false)` when fio is missing or a round fails;
    /// the wipe goes ahead either way.
    pub fn run(
        &self,
        runner: &dyn ToolRunner,
        sink: &EventSink,
        cancel: &CancelToken,
        device: &str,
    ) -> EngineResult<bool> {
        if !runner.has_tool("fio") {
            sink.warn("fio is not installed; skipping thermal stress test");
            return Ok(false);
        }

        sink.log(format!(
            "Starting thermal stress test on {} for {}s (target {}°C)",
            device, self.duration_secs, self.target_temp_c
        ));

        let mut elapsed = 0;
        for runtime in self.rounds() {
            cancel.check()?;
            let outcome = runner.run(
                &Self::command(device, runtime),
                &mut |line| sink.tool_output(line),
                FailurePolicy::BestEffort,
                cancel,
            )?;
            if let Some(warning) = outcome.warning {
                sink.warn(format!("thermal stress test stopped: {}", warning));
                return Ok(false);
            }
            elapsed += runtime;
            sink.log(format!(
                "Thermal stress test in progress ({}%)",
                elapsed * 100 / self.duration_secs.max(1)
            ));
        }
        Ok(true)
    }
}
