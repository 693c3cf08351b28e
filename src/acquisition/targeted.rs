//! Per-range recovery of what ddrescue could not read, using dc3dd.

use super::bad_sectors::BadSectorRange;
use crate::events::EventSink;
use crate::process::{CancelToken, CommandSpec, FailurePolicy, ToolRunner};
use crate::stats::weighted_percent;
use crate::EngineResult;
use std::path::Path;

/// `dc3dd` invocation copying one sector range in place.
pub fn range_command(source: &str, destination: &Path, range: &BadSectorRange) -> CommandSpec {
    CommandSpec::new("dc3dd").args([
        format!("if={}", source),
        format!("of={}", destination.display()),
        "ssz=512".to_string(),
        format!("iskip={}", range.start_sector),
        format!("oskip={}", range.start_sector),
        format!("cnt={}", range.size_in_sectors()),
        "rec=off".to_string(),
        "verb=on".to_string(),
        "nwspc=on".to_string(),
    ])
}

/// Try every range once. Returns the number of sectors recovered.
///
/// Failures of individual ranges are expected on a dying drive and only
/// logged; cancellation stops the loop.
pub fn recover_ranges(
    runner: &dyn ToolRunner,
    source: &str,
    destination: &Path,
    ranges: &[BadSectorRange],
    sink: &EventSink,
    cancel: &CancelToken,
) -> EngineResult<u64> {
    let total = ranges.len() as u32;
    let mut recovered = 0u64;

    for (idx, range) in ranges.iter().enumerate() {
        cancel.check()?;
        let outcome = runner.run(
            &range_command(source, destination, range),
            &mut |line| sink.tool_output(line),
            FailurePolicy::BestEffort,
            cancel,
        )?;

        if outcome.succeeded() {
            recovered += range.size_in_sectors();
            sink.log(format!(
                "Recovered sectors {}-{}",
                range.start_sector, range.end_sector
            ));
        } else {
            tracing::debug!(
                start = range.start_sector,
                end = range.end_sector,
                "Targeted recovery failed for range"
            );
        }

        sink.progress(
            weighted_percent(idx as u32 + 1, total, 100.0).min(99.0),
            format!("Targeted recovery: range {}/{}", idx + 1, total),
        );
    }

    Ok(recovered)
}
