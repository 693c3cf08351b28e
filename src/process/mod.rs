//! External tool execution.
//!
//! Every tool the engine drives goes through a [`ToolRunner`]. Production code
//! uses [`SystemRunner`]; tests substitute a scripted runner so the state
//! machines can be exercised without touching a disk.

pub mod system;
pub mod tools;

pub use system::SystemRunner;
pub use tools::{ToolInventory, ToolStatus};

use crate::{EngineError, EngineResult};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lines of output kept for failure diagnostics.
const TAIL_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandKind {
    Exec { program: String, args: Vec<String> },
    Shell { script: String, pipefail: bool },
}

/// One external invocation: a program with arguments, or a bash pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    kind: CommandKind,
    timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Exec {
                program: program.into(),
                args: Vec::new(),
            },
            timeout: None,
        }
    }

    /// A pipeline run with `bash -o pipefail -c`.
    pub fn pipeline(script: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Shell {
                script: script.into(),
                pipefail: true,
            },
            timeout: None,
        }
    }

    /// A pipeline whose status is that of its last stage.
    ///
    /// For feeds like `tr ... | dd ...` where the producer is expected to die
    /// of SIGPIPE once `dd` has written `count` bytes.
    pub fn feed(script: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Shell {
                script: script.into(),
                pipefail: false,
            },
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        if let CommandKind::Exec { args, .. } = &mut self.kind {
            args.push(arg.into());
        }
        self
    }

    pub fn args<I, S>(mut self, new_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let CommandKind::Exec { args, .. } = &mut self.kind {
            args.extend(new_args.into_iter().map(Into::into));
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_pipeline(&self) -> bool {
        matches!(self.kind, CommandKind::Shell { .. })
    }

    /// Executable that gets spawned.
    pub fn program(&self) -> &str {
        match &self.kind {
            CommandKind::Exec { program, .. } => program,
            CommandKind::Shell { .. } => "bash",
        }
    }

    /// Arguments passed to [`program`](Self::program).
    pub fn argv(&self) -> Vec<String> {
        match &self.kind {
            CommandKind::Exec { args, .. } => args.clone(),
            CommandKind::Shell { script, pipefail } => {
                let mut argv = Vec::with_capacity(4);
                if *pipefail {
                    argv.push("-o".to_string());
                    argv.push("pipefail".to_string());
                }
                argv.push("-c".to_string());
                argv.push(script.clone());
                argv
            }
        }
    }

    /// The tool a reader would name: the program, or the pipeline's first word.
    pub fn tool_name(&self) -> &str {
        match &self.kind {
            CommandKind::Exec { program, .. } => program,
            CommandKind::Shell { script, .. } => {
                script.split_whitespace().next().unwrap_or("bash")
            }
        }
    }

    pub fn script(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::Shell { script, .. } => Some(script),
            CommandKind::Exec { .. } => None,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::Exec { program, args } => {
                write!(f, "{}", program)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            CommandKind::Shell { script, .. } => write!(f, "{}", script),
        }
    }
}

/// Quote `value` for inclusion in a bash script.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,+@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// What a non-zero exit means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Failure aborts the operation
    Required,
    /// Failure is reported as a warning and the operation continues
    BestEffort,
}

impl FailurePolicy {
    fn settle(self, err: EngineError) -> EngineResult<RunOutcome> {
        match self {
            FailurePolicy::Required => Err(err),
            FailurePolicy::BestEffort => {
                tracing::warn!(error = %err, "Best-effort step failed");
                Ok(RunOutcome {
                    exit_code: err.exit_code(),
                    warning: Some(err.to_string()),
                })
            }
        }
    }
}

/// Result of a command that was allowed to finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    /// Set when a best-effort command failed
    pub warning: Option<String>,
}

impl RunOutcome {
    pub fn clean() -> Self {
        Self {
            exit_code: Some(0),
            warning: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && self.warning.is_none()
    }
}

/// Collected output of a short, non-streaming command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Shared cancellation flag for one job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep in short slices, returning early on cancellation.
    pub fn sleep(&self, duration: Duration) -> EngineResult<()> {
        let slice = Duration::from_millis(50);
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.check()?;
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining -= step;
        }
        self.check()
    }
}

pub trait ToolRunner: Send + Sync {
    /// Spawn `cmd`, feed each output line to `on_line`, return its exit code.
    ///
    /// `None` means the child was killed by a signal. Implementations stop the
    /// child and return `Cancelled` once `cancel` is set, `Timeout` when the
    /// command's timeout elapses and `ToolMissing` when the program does not
    /// exist.
    fn execute(
        &self,
        cmd: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> EngineResult<Option<i32>>;

    /// Run a short command to completion and collect its output.
    ///
    /// Cancellation and timeouts stop the child the same way as for
    /// [`execute`](Self::execute).
    fn capture(&self, cmd: &CommandSpec, cancel: &CancelToken) -> EngineResult<CapturedOutput>;

    /// Whether `program` can be found on `PATH`.
    fn has_tool(&self, program: &str) -> bool;

    /// [`execute`](Self::execute) with a failure policy applied.
    fn run(
        &self,
        cmd: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
        policy: FailurePolicy,
        cancel: &CancelToken,
    ) -> EngineResult<RunOutcome> {
        cancel.check()?;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        let result = {
            let mut record = |line: &str| {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    if tail.len() == TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(trimmed.to_string());
                }
                on_line(line);
            };
            self.execute(cmd, &mut record, cancel)
        };

        match result {
            Ok(Some(0)) => Ok(RunOutcome::clean()),
            Ok(code) => {
                let detail = if tail.is_empty() {
                    "no output".to_string()
                } else {
                    tail.into_iter().collect::<Vec<_>>().join("; ")
                };
                policy.settle(EngineError::ProcessFailure {
                    command: cmd.to_string(),
                    code,
                    detail,
                })
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(err @ (EngineError::ToolMissing(_) | EngineError::Timeout(_))) => {
                policy.settle(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Run and collect every output line.
    fn run_collect(
        &self,
        cmd: &CommandSpec,
        policy: FailurePolicy,
        cancel: &CancelToken,
    ) -> EngineResult<(RunOutcome, Vec<String>)> {
        let mut lines = Vec::new();
        let outcome = self.run(cmd, &mut |line| lines.push(line.to_string()), policy, cancel)?;
        Ok((outcome, lines))
    }
}
