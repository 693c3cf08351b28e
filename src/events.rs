//! The event stream a job reports through.

use crate::acquisition::RecoveryMode;
use crate::logging::ActivityLog;
use crate::stats::RecoveryStats;
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        percent: u8,
        message: String,
    },
    Log {
        message: String,
    },
    Stats {
        stats: RecoveryStats,
    },
    ModeChanged {
        mode: RecoveryMode,
        /// Numeric level of `mode`, 0 (standard) to 4 (forensic)
        level: u8,
        reason: String,
    },
    FrozenDrive {
        device: String,
    },
    DeviceFinished {
        device: String,
        success: bool,
        message: String,
    },
    Finished {
        success: bool,
        message: String,
        stats: Option<RecoveryStats>,
    },
}

/// Producer side of a job's event stream plus its activity log.
///
/// Sends never fail: a caller that dropped its receiver simply stops
/// seeing events while the job runs to completion.
pub struct EventSink {
    tx: UnboundedSender<JobEvent>,
    activity: ActivityLog,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<JobEvent>) -> Self {
        Self {
            tx,
            activity: ActivityLog::disabled(),
        }
    }

    /// A connected sink/receiver pair.
    pub fn channel() -> (Self, UnboundedReceiver<JobEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn with_activity_log(mut self, activity: ActivityLog) -> Self {
        self.activity = activity;
        self
    }

    pub fn activity_log(&self) -> &ActivityLog {
        &self.activity
    }

    fn send(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    pub fn progress(&self, percent: f64, message: impl Into<String>) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0).floor() as u8
        } else {
            0
        };
        self.send(JobEvent::Progress {
            percent,
            message: message.into(),
        });
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.activity.write(&message);
        self.send(JobEvent::Log { message });
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = format!("Warning: {}", message.as_ref());
        tracing::warn!("{}", message);
        self.activity.write(&message);
        self.send(JobEvent::Log { message });
    }

    /// Raw tool output: activity log only, the event stream stays readable.
    pub fn tool_output(&self, line: &str) {
        tracing::trace!(line, "tool output");
        self.activity.write(line);
    }

    pub fn stats(&self, stats: &RecoveryStats) {
        self.send(JobEvent::Stats {
            stats: stats.clone(),
        });
    }

    pub fn mode_changed(&self, mode: RecoveryMode, reason: impl Into<String>) {
        let reason = reason.into();
        self.activity.write(&format!(
            "Escalating to {} mode: {}",
            mode.name(),
            reason
        ));
        self.send(JobEvent::ModeChanged {
            mode,
            level: mode.level(),
            reason,
        });
    }

    pub fn frozen_drive(&self, device: impl Into<String>) {
        let device = device.into();
        self.activity
            .write(&format!("Drive {} is in a security frozen state", device));
        self.send(JobEvent::FrozenDrive { device });
    }

    pub fn device_finished(&self, device: impl Into<String>, success: bool, message: impl Into<String>) {
        let device = device.into();
        let message = message.into();
        self.activity.write(&format!("{}: {}", device, message));
        self.send(JobEvent::DeviceFinished {
            device,
            success,
            message,
        });
    }

    pub fn finished(&self, success: bool, message: impl Into<String>, stats: Option<RecoveryStats>) {
        let message = message.into();
        self.activity.write(&message);
        self.send(JobEvent::Finished {
            success,
            message,
            stats,
        });
    }
}
