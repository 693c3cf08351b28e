//! Overwrite passes for the software wipe methods.

use super::WipeOptions;
use crate::device::Device;
use crate::events::EventSink;
use crate::parsers::shred::ShredProgress;
use crate::parsers::{Dialect, ToolEvent};
use crate::process::{shell_quote, CancelToken, CommandSpec, FailurePolicy, ToolRunner};
use crate::size::human_size;
use crate::stats::{weighted_percent, Throughput};
use crate::EngineResult;
use anyhow::Context;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tempfile::NamedTempFile;

/// What a single dd pass writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassSource {
    Zeros,
    /// 0xFF bytes
    Ones,
    Random,
    Pattern(Vec<u8>),
}

impl PassSource {
    pub fn describe(&self) -> String {
        match self {
            PassSource::Zeros => "zeros".to_string(),
            PassSource::Ones => "ones (0xFF)".to_string(),
            PassSource::Random => "random data".to_string(),
            PassSource::Pattern(bytes) => format!(
                "pattern {}",
                bytes
                    .iter()
                    .map(|b| format!("{:02X}", b))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        }
    }
}

/// Output half of a wipe dd: stops at exactly `size` bytes.
fn dd_output_args(device: &str, size: u64, options: &WipeOptions) -> Vec<String> {
    let mut args = vec![
        format!("of={}", device),
        format!("bs={}", options.block_size),
        format!("count={}", size),
        "iflag=fullblock,count_bytes".to_string(),
        "status=progress".to_string(),
    ];
    if options.direct_io {
        args.push("oflag=direct".to_string());
    }
    let mut conv = Vec::new();
    if options.sync_writes {
        conv.push("fsync");
    }
    if options.quick_erase {
        conv.push("noerror");
    }
    if !conv.is_empty() {
        args.push(format!("conv={}", conv.join(",")));
    }
    args
}

/// Command for one overwrite pass. `pattern_file` must hold the block-sized
/// pattern when `source` is a pattern.
pub fn write_command(
    device: &str,
    size: u64,
    source: &PassSource,
    options: &WipeOptions,
    pattern_file: Option<&Path>,
) -> CommandSpec {
    let output = dd_output_args(device, size, options);
    match source {
        PassSource::Zeros => CommandSpec::new("dd").arg("if=/dev/zero").args(output),
        PassSource::Random => CommandSpec::new("dd").arg("if=/dev/urandom").args(output),
        PassSource::Ones => CommandSpec::feed(format!(
            "tr '\\000' '\\377' < /dev/zero | dd {}",
            quoted(&output)
        )),
        PassSource::Pattern(_) => {
            let file = pattern_file
                .map(|p| shell_quote(&p.to_string_lossy()))
                .unwrap_or_else(|| "/dev/null".to_string());
            CommandSpec::feed(format!(
                "while cat {}; do :; done | dd {}",
                file,
                quoted(&output)
            ))
        }
    }
}

fn quoted(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Temporary file holding `pattern` repeated to at least `block_bytes`.
pub fn pattern_file(pattern: &[u8], block_bytes: u64) -> anyhow::Result<NamedTempFile> {
    anyhow::ensure!(!pattern.is_empty(), "wipe pattern is empty");
    let mut file = NamedTempFile::new().context("Failed to create pattern file")?;
    let repeats = (block_bytes.max(1) as usize).div_ceil(pattern.len());
    let block: Vec<u8> = pattern.iter().copied().cycle().take(repeats * pattern.len()).collect();
    file.write_all(&block).context("Failed to write pattern file")?;
    file.flush()?;
    Ok(file)
}

/// Runs a sequence of dd passes over one device with weighted progress.
pub struct PassRunner<'a> {
    runner: &'a dyn ToolRunner,
    sink: &'a EventSink,
    cancel: &'a CancelToken,
    device: &'a Device,
    options: &'a WipeOptions,
}

impl<'a> PassRunner<'a> {
    pub fn new(
        runner: &'a dyn ToolRunner,
        sink: &'a EventSink,
        cancel: &'a CancelToken,
        device: &'a Device,
        options: &'a WipeOptions,
    ) -> Self {
        Self {
            runner,
            sink,
            cancel,
            device,
            options,
        }
    }

    pub fn run_passes(&self, sources: &[PassSource]) -> EngineResult<()> {
        let total = sources.len() as u32;
        let block_bytes = crate::size::parse_size(&self.options.block_size).max(512);

        for (idx, source) in sources.iter().enumerate() {
            self.cancel.check()?;
            let pass = idx as u32 + 1;
            self.sink.log(format!(
                "Pass {}/{}: writing {} to {}",
                pass,
                total,
                source.describe(),
                self.device.path
            ));

            let pattern = match source {
                PassSource::Pattern(bytes) => Some(pattern_file(bytes, block_bytes)?),
                _ => None,
            };
            let cmd = write_command(
                &self.device.path,
                self.device.size_bytes,
                source,
                self.options,
                pattern.as_ref().map(NamedTempFile::path),
            );
            self.run_pass(&cmd, pass, total)?;
        }
        Ok(())
    }

    fn run_pass(&self, cmd: &CommandSpec, pass: u32, total: u32) -> EngineResult<()> {
        let size = self.device.size_bytes.max(1);
        let mut meter = Throughput::new();
        let sink = self.sink;

        self.runner.run(
            cmd,
            &mut |line| {
                sink.tool_output(line);
                if let Some(ToolEvent::BytesCopied(bytes)) = Dialect::Dd.parse(line) {
                    let pass_percent = (bytes as f64 / size as f64 * 100.0).min(100.0);
                    let speed = meter
                        .sample(Instant::now(), bytes)
                        .map(|bps| format!(" at {}/s", human_size(bps as u64)))
                        .unwrap_or_default();
                    sink.progress(
                        weighted_percent(pass, total, pass_percent),
                        format!(
                            "Pass {}/{}: {} of {}{}",
                            pass,
                            total,
                            human_size(bytes),
                            human_size(size),
                            speed
                        ),
                    );
                }
            },
            FailurePolicy::Required,
            self.cancel,
        )?;

        sink.progress(
            weighted_percent(pass, total, 100.0),
            format!("Pass {}/{} complete", pass, total),
        );
        Ok(())
    }

    /// `shred -v -n <passes> [-z] <device>` with per-pass progress.
    pub fn run_shred(&self, passes: u32, zero: bool) -> EngineResult<()> {
        let mut cmd = CommandSpec::new("shred")
            .arg("-v")
            .args(["-n".to_string(), passes.to_string()]);
        if zero {
            cmd = cmd.arg("-z");
        }
        cmd = cmd.arg(self.device.path.clone());
        run_shred_command(self.runner, self.sink, self.cancel, &cmd)
    }
}

/// Stream a shred command through the shred parser into progress events.
pub fn run_shred_command(
    runner: &dyn ToolRunner,
    sink: &EventSink,
    cancel: &CancelToken,
    cmd: &CommandSpec,
) -> EngineResult<()> {
    let mut progress = ShredProgress::new();
    sink.log(format!("Running: {}", cmd));
    runner.run(
        cmd,
        &mut |line| {
            sink.tool_output(line);
            let Some(event) = Dialect::Shred.parse(line) else {
                return;
            };
            if let Some(overall) = progress.update(&event) {
                let (pass, total) = progress.pass();
                sink.progress(overall, format!("shred pass {}/{}", pass, total));
            }
        },
        FailurePolicy::Required,
        cancel,
    )?;
    Ok(())
}
