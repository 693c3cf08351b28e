/// Mock command execution infrastructure for testing
///
/// `MockToolRunner` stands in for `SystemRunner`: every command the engine
/// would spawn is matched against registered responses instead, so the
/// acquisition and wipe state machines run without touching a disk.
use blackstorm_engine::process::{CapturedOutput, CommandSpec};
use blackstorm_engine::{CancelToken, EngineError, EngineResult, ToolRunner};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Mock command output
#[derive(Clone, Debug, Default)]
pub struct MockCommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` simulates a child killed by a signal
    pub exit_code: Option<i32>,
    writes: Vec<(PathBuf, String)>,
    cancel: Option<CancelToken>,
    panic: Option<String>,
    hang: bool,
}

#[allow(dead_code)]
impl MockCommandOutput {
    pub fn success(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(stderr: &str) -> Self {
        Self {
            stderr: stderr.to_string(),
            exit_code: Some(1),
            ..Default::default()
        }
    }

    /// Output on stderr, the way dd and shred report progress.
    pub fn progress(stderr: &str) -> Self {
        Self {
            stderr: stderr.to_string(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Write `contents` to `path` when the command runs (a ddrescue map, say).
    pub fn writes_file(mut self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.writes.push((path.into(), contents.to_string()));
        self
    }

    /// Cancel `token` once the first output line has been delivered.
    pub fn then_cancel(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// A command that runs until the job is cancelled.
    pub fn waits_for_cancel() -> Self {
        Self {
            exit_code: Some(0),
            hang: true,
            ..Default::default()
        }
    }

    pub fn panics(message: &str) -> Self {
        Self {
            panic: Some(message.to_string()),
            ..Default::default()
        }
    }
}

struct Rule {
    pattern: String,
    responses: VecDeque<MockCommandOutput>,
}

impl Rule {
    /// The next response; the last one repeats.
    fn next(&mut self) -> MockCommandOutput {
        if self.responses.len() > 1 {
            self.responses.pop_front().unwrap_or_default()
        } else {
            self.responses.front().cloned().unwrap_or_default()
        }
    }
}

/// Scripted `ToolRunner`.
///
/// Rules match on a substring of the rendered command line and are tried in
/// registration order. Commands without a rule succeed silently.
#[derive(Default)]
pub struct MockToolRunner {
    rules: Mutex<Vec<Rule>>,
    history: Mutex<Vec<String>>,
    missing: Mutex<HashSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[allow(dead_code)]
impl MockToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mock command response
    pub fn register(&self, pattern: &str, output: MockCommandOutput) -> &Self {
        self.register_sequence(pattern, vec![output])
    }

    /// Responses handed out one per call, the last one repeating.
    pub fn register_sequence(&self, pattern: &str, outputs: Vec<MockCommandOutput>) -> &Self {
        lock(&self.rules).push(Rule {
            pattern: pattern.to_string(),
            responses: outputs.into(),
        });
        self
    }

    /// Pretend `program` is not installed.
    pub fn without_tool(&self, program: &str) -> &Self {
        lock(&self.missing).insert(program.to_string());
        self
    }

    /// Every command line run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.history).clone()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.count(fragment) > 0
    }

    pub fn count(&self, fragment: &str) -> usize {
        lock(&self.history).iter().filter(|c| c.contains(fragment)).count()
    }

    /// Position of the first command containing `fragment`.
    pub fn position(&self, fragment: &str) -> Option<usize> {
        lock(&self.history).iter().position(|c| c.contains(fragment))
    }

    fn respond(&self, cmd: &CommandSpec) -> EngineResult<MockCommandOutput> {
        let line = cmd.to_string();
        lock(&self.history).push(line.clone());

        if lock(&self.missing).contains(cmd.tool_name()) {
            return Err(EngineError::ToolMissing(cmd.tool_name().to_string()));
        }

        let output = lock(&self.rules)
            .iter_mut()
            .find(|rule| line.contains(&rule.pattern))
            .map(Rule::next)
            .unwrap_or_else(|| MockCommandOutput::success(""));

        for (path, contents) in &output.writes {
            std::fs::write(path, contents)?;
        }
        if let Some(message) = &output.panic {
            panic!("{}", message);
        }
        Ok(output)
    }
}

impl ToolRunner for MockToolRunner {
    fn execute(
        &self,
        cmd: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> EngineResult<Option<i32>> {
        cancel.check()?;
        let output = self.respond(cmd)?;

        for line in output.stdout.lines().chain(output.stderr.lines()) {
            on_line(line);
            if let Some(token) = &output.cancel {
                token.cancel();
            }
            cancel.check()?;
        }
        while output.hang {
            cancel.check()?;
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(output.exit_code)
    }

    fn capture(&self, cmd: &CommandSpec, cancel: &CancelToken) -> EngineResult<CapturedOutput> {
        cancel.check()?;
        let output = self.respond(cmd)?;
        if let Some(token) = &output.cancel {
            token.cancel();
        }
        Ok(CapturedOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn has_tool(&self, program: &str) -> bool {
        !lock(&self.missing).contains(program)
    }
}
