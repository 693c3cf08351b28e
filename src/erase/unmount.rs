use crate::events::EventSink;
use crate::process::{CancelToken, CommandSpec, FailurePolicy, ToolRunner};
use crate::{EngineError, EngineResult};

/// Mount points of `device` and its partitions, as listed by `lsblk`.
pub fn mount_points(runner: &dyn ToolRunner, device: &str, cancel: &CancelToken) -> EngineResult<Vec<String>> {
    let output = runner.capture(&CommandSpec::new("lsblk").args(["-nro", "MOUNTPOINT", device]), cancel)?;
    if !output.success() {
        return Ok(Vec::new());
    }
    Ok(parse_mount_points(&output.stdout))
}

/// Non-empty, de-duplicated mount points. Swap (`[SWAP]`) is not a mount.
pub fn parse_mount_points(output: &str) -> Vec<String> {
    let mut points: Vec<String> = Vec::new();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('[') {
            continue;
        }
        // lsblk -r escapes spaces as \x20
        let point = line.replace("\\x20", " ");
        if !points.contains(&point) {
            points.push(point);
        }
    }
    points
}

/// Unmount every partition of `device`.
///
/// With `policy == Required` the first failure aborts with
/// `UnmountFailure`; otherwise failures are logged as warnings.
pub fn unmount_device(
    runner: &dyn ToolRunner,
    sink: &EventSink,
    cancel: &CancelToken,
    device: &str,
    policy: FailurePolicy,
) -> EngineResult<()> {
    let points = match mount_points(runner, device, cancel) {
        Ok(points) => points,
        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
        Err(err) if policy == FailurePolicy::BestEffort => {
            sink.warn(format!("could not list mount points of {}: {}", device, err));
            return Ok(());
        }
        Err(err) => {
            return Err(EngineError::UnmountFailure {
                device: device.to_string(),
                detail: err.to_string(),
            })
        }
    };

    if points.is_empty() {
        sink.log(format!("No mounted partitions found on {}", device));
        return Ok(());
    }

    sink.log(format!(
        "Unmounting {} partition(s) on {}",
        points.len(),
        device
    ));
    for point in &points {
        cancel.check()?;
        let outcome = runner.run(
            &CommandSpec::new("umount").arg(point.clone()),
            &mut |line| sink.tool_output(line),
            FailurePolicy::BestEffort,
            cancel,
        )?;
        if outcome.succeeded() {
            continue;
        }

        let detail = outcome
            .warning
            .unwrap_or_else(|| format!("umount {} failed", point));
        if policy == FailurePolicy::Required {
            return Err(EngineError::UnmountFailure {
                device: device.to_string(),
                detail,
            });
        }
        sink.warn(format!("failed to unmount {}: {}", point, detail));
    }
    Ok(())
}
