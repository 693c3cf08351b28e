//! Process runner backed by real child processes.

use super::{CancelToken, CapturedOutput, CommandSpec, ToolRunner};
use crate::config::EngineConfig;
use crate::{EngineError, EngineResult};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 4096;

/// Spawns tools as their own process group and streams their output.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    poll_interval: Duration,
    termination_grace: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            termination_grace: config.termination_grace(),
        }
    }

    fn command(cmd: &CommandSpec) -> Command {
        let mut command = Command::new(cmd.program());
        command.args(cmd.argv()).stdin(Stdio::null());
        command
    }

    /// SIGTERM the child's process group, then SIGKILL after the grace period.
    fn terminate(&self, child: &mut Child) {
        let pgid = Pid::from_raw(child.id() as i32);
        if let Err(err) = killpg(pgid, Signal::SIGTERM) {
            tracing::debug!(error = %err, "SIGTERM to process group failed");
        }

        let deadline = Instant::now() + self.termination_grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(_) => break,
            }
        }

        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = child.kill();
        let _ = child.wait();
    }

    fn wait(&self, child: &mut Child, cmd: &CommandSpec, cancel: &CancelToken, started: Instant) -> EngineResult<ExitStatus> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            self.interrupt_if_needed(child, cmd, cancel, started)?;
            thread::sleep(self.poll_interval);
        }
    }

    fn interrupt_if_needed(
        &self,
        child: &mut Child,
        cmd: &CommandSpec,
        cancel: &CancelToken,
        started: Instant,
    ) -> EngineResult<()> {
        if cancel.is_cancelled() {
            tracing::info!(command = %cmd.tool_name(), "Terminating child after cancellation");
            self.terminate(child);
            return Err(EngineError::Cancelled);
        }
        if let Some(timeout) = cmd.timeout() {
            if started.elapsed() >= timeout {
                tracing::warn!(command = %cmd.tool_name(), ?timeout, "Terminating child after timeout");
                self.terminate(child);
                return Err(EngineError::Timeout(format!(
                    "{} did not finish within {}",
                    cmd.tool_name(),
                    humantime::format_duration(timeout)
                )));
            }
        }
        Ok(())
    }
}

fn spawn_error(cmd: &CommandSpec, err: io::Error) -> EngineError {
    if err.kind() == io::ErrorKind::NotFound {
        EngineError::ToolMissing(cmd.program().to_string())
    } else {
        EngineError::IoError(err)
    }
}

/// Forward `reader` to `tx` one line at a time.
///
/// Both `\n` and `\r` end a line: dd and ddrescue redraw their status with
/// carriage returns.
fn spawn_reader<R: Read + Send + 'static>(mut reader: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; READ_CHUNK];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            for &byte in &chunk[..read] {
                if byte == b'\n' || byte == b'\r' {
                    if !pending.is_empty() {
                        let line = String::from_utf8_lossy(&pending).into_owned();
                        pending.clear();
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                } else {
                    pending.push(byte);
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
        }
    })
}

/// Read `reader` to the end on its own thread so a chatty child never blocks
/// on a full pipe.
fn spawn_collector<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = reader.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn collected(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

impl ToolRunner for SystemRunner {
    fn execute(
        &self,
        cmd: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> EngineResult<Option<i32>> {
        cancel.check()?;
        tracing::debug!(command = %cmd, "Spawning");

        let mut child = Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| spawn_error(cmd, e))?;
        let started = Instant::now();

        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone()));
        }
        drop(tx);

        loop {
            self.interrupt_if_needed(&mut child, cmd, cancel, started)?;
            match rx.recv_timeout(self.poll_interval) {
                Ok(line) => on_line(&line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = self.wait(&mut child, cmd, cancel, started)?;
        for reader in readers {
            let _ = reader.join();
        }

        tracing::debug!(command = %cmd.tool_name(), code = ?status.code(), "Child exited");
        Ok(status.code())
    }

    fn capture(&self, cmd: &CommandSpec, cancel: &CancelToken) -> EngineResult<CapturedOutput> {
        cancel.check()?;
        tracing::debug!(command = %cmd, "Capturing");

        let mut child = Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| spawn_error(cmd, e))?;
        let started = Instant::now();

        let stdout = child.stdout.take().map(spawn_collector);
        let stderr = child.stderr.take().map(spawn_collector);
        let status = self.wait(&mut child, cmd, cancel, started)?;

        Ok(CapturedOutput {
            exit_code: status.code(),
            stdout: collected(stdout),
            stderr: collected(stderr),
        })
    }

    fn has_tool(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
