//! Job facade: every acquisition or wipe runs on its own worker thread and
//! talks to the caller only through its event stream and cancel token.

use crate::acquisition::{AcquisitionJob, AcquisitionOutcome, AcquisitionRequest, BadSectorLog};
use crate::config::EngineConfig;
use crate::erase::{WipeJob, WipeOutcome, WipeRequest};
use crate::events::{EventSink, JobEvent};
use crate::logging::{device_slug, file_timestamp, ActivityLog};
use crate::process::{CancelToken, SystemRunner, ToolInventory, ToolRunner, ToolStatus};
use crate::{EngineError, EngineResult};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

#[derive(Clone)]
pub struct Engine {
    runner: Arc<dyn ToolRunner>,
    config: Arc<EngineConfig>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let runner = Arc::new(SystemRunner::from_config(&config));
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: EngineConfig, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            runner,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runner(&self) -> &dyn ToolRunner {
        self.runner.as_ref()
    }

    pub fn tools(&self) -> Vec<ToolStatus> {
        ToolInventory::scan(self.runner.as_ref())
    }

    pub fn start_acquisition(&self, request: AcquisitionRequest) -> EngineResult<JobHandle<AcquisitionOutcome>> {
        let slug = device_slug(&request.source);
        let stamp = file_timestamp();
        let dir = self.config.acquisition_log_dir();
        let activity = dir.join(format!("acquisition_{}_{}.log", slug, stamp));
        let bad_sectors = request
            .options
            .log_bad_sectors
            .then(|| BadSectorLog::new(BadSectorLog::default_path(&dir, &slug, &stamp), request.source.clone()));

        let image_path = request.destination.clone();
        self.spawn(
            "acquisition",
            activity,
            move |runner, config, sink, cancel| {
                let mut job = AcquisitionJob::new(runner, config, sink, cancel, request);
                if let Some(log) = bad_sectors {
                    job = job.with_bad_sector_log(log);
                }
                job.run()
            },
            move |message| AcquisitionOutcome::aborted(message, image_path),
        )
    }

    pub fn start_wipe(&self, request: WipeRequest) -> EngineResult<JobHandle<WipeOutcome>> {
        let slug = request
            .devices
            .first()
            .map(|d| device_slug(d))
            .unwrap_or_else(|| "none".to_string());
        let activity = self
            .config
            .wipe_log_dir()
            .join(format!("wipe_{}_{}.log", slug, file_timestamp()));

        self.spawn(
            "wipe",
            activity,
            move |runner, config, sink, cancel| WipeJob::new(runner, config, sink, cancel, request).run(),
            |message| WipeOutcome {
                success: false,
                message,
                results: Vec::new(),
            },
        )
    }

    /// Run `job` on a named worker thread.
    ///
    /// A panicking job still produces a final `Finished(false)` event and an
    /// outcome built by `on_panic`.
    fn spawn<T, F, P>(&self, kind: &str, activity_path: PathBuf, job: F, on_panic: P) -> EngineResult<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ToolRunner, &EngineConfig, &EventSink, &CancelToken) -> T + Send + 'static,
        P: FnOnce(String) -> T + Send + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let (sink, events) = EventSink::channel();

        let runner = Arc::clone(&self.runner);
        let config = Arc::clone(&self.config);
        let worker_cancel = cancel.clone();
        let kind_name = kind.to_string();

        let thread = std::thread::Builder::new()
            .name(format!("{}-{}", kind, &id.simple().to_string()[..8]))
            .spawn(move || {
                let sink = sink.with_activity_log(ActivityLog::create_or_disabled(activity_path));
                let span = tracing::info_span!("job", %id, kind = %kind_name);
                let _entered = span.enter();
                tracing::info!("Job started");

                let result = catch_unwind(AssertUnwindSafe(|| job(runner.as_ref(), &config, &sink, &worker_cancel)));
                match result {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let message = format!("{} aborted: internal error: {}", kind_name, panic_message(&payload));
                        tracing::error!(%message, "Job panicked");
                        sink.finished(false, message.clone(), None);
                        on_panic(message)
                    }
                }
            })
            .map_err(|e| EngineError::Internal(format!("failed to spawn {} worker: {}", kind, e)))?;

        Ok(JobHandle {
            id,
            cancel,
            events,
            thread,
        })
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Caller's side of a running job.
///
/// The event stream ends after `Finished`, once the worker has dropped its
/// sender.
pub struct JobHandle<T> {
    id: Uuid,
    cancel: CancelToken,
    events: UnboundedReceiver<JobEvent>,
    thread: JoinHandle<T>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. The job stops its child process and finishes
    /// with a cancelled message.
    pub fn stop(&self) {
        tracing::info!(id = %self.id, "Stop requested");
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn events_mut(&mut self) -> &mut UnboundedReceiver<JobEvent> {
        &mut self.events
    }

    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Blocking receive for callers outside an async runtime.
    pub fn blocking_next_event(&mut self) -> Option<JobEvent> {
        self.events.blocking_recv()
    }

    /// Drain whatever has been sent so far.
    pub fn try_events(&mut self) -> Vec<JobEvent> {
        let mut drained = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => drained.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        drained
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker and return its outcome.
    pub fn join(self) -> EngineResult<T> {
        self.thread
            .join()
            .map_err(|payload| EngineError::Internal(format!("worker thread panicked: {}", panic_message(&payload))))
    }
}
