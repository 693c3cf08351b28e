// Allow uppercase acronyms for industry-standard terms like ATA, NVMe, NIST
#![allow(clippy::upper_case_acronyms)]

pub mod acquisition;
pub mod config;
pub mod device;
pub mod engine;
pub mod erase;
pub mod events;
pub mod logging;
pub mod parsers;
pub mod process;
pub mod size;
pub mod stats;
pub mod verification;

// Re-export the job entry points for convenience
pub use acquisition::{AcquisitionOptions, AcquisitionOutcome, AcquisitionRequest, RecoveryMode};
pub use config::EngineConfig;
pub use engine::{Engine, JobHandle};
pub use erase::{PostErase, WipeMethod, WipeOptions, WipeOutcome, WipeRequest};
pub use events::JobEvent;
pub use process::{CancelToken, CommandSpec, FailurePolicy, SystemRunner, ToolRunner};
pub use stats::RecoveryStats;
pub use verification::VerificationResult;

use thiserror::Error;

/// Every failure an acquisition or wipe job can surface.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Required tool not found: {0}")]
    ToolMissing(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to unmount {device}: {detail}")]
    UnmountFailure { device: String, detail: String },

    #[error("Command `{command}` failed (exit code {}): {detail}", display_code(*.code))]
    ProcessFailure {
        command: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("Verification failed: {0}")]
    VerificationFailure(String),

    #[error("Drive is frozen and cannot be erased: {0}")]
    DeviceFrozen(String),

    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Exit code carried by a process failure, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            EngineError::ProcessFailure { code, .. } => *code,
            _ => None,
        }
    }
}

// Manual Clone implementation because std::io::Error doesn't implement Clone
impl Clone for EngineError {
    fn clone(&self) -> Self {
        match self {
            EngineError::IoError(e) => {
                EngineError::IoError(std::io::Error::new(e.kind(), e.to_string()))
            }
            EngineError::ToolMissing(s) => EngineError::ToolMissing(s.clone()),
            EngineError::DeviceNotFound(s) => EngineError::DeviceNotFound(s.clone()),
            EngineError::UnmountFailure { device, detail } => EngineError::UnmountFailure {
                device: device.clone(),
                detail: detail.clone(),
            },
            EngineError::ProcessFailure {
                command,
                code,
                detail,
            } => EngineError::ProcessFailure {
                command: command.clone(),
                code: *code,
                detail: detail.clone(),
            },
            EngineError::Cancelled => EngineError::Cancelled,
            EngineError::VerificationFailure(s) => EngineError::VerificationFailure(s.clone()),
            EngineError::DeviceFrozen(s) => EngineError::DeviceFrozen(s.clone()),
            EngineError::UnsupportedDevice(s) => EngineError::UnsupportedDevice(s.clone()),
            EngineError::Timeout(s) => EngineError::Timeout(s.clone()),
            EngineError::InvalidOptions(s) => EngineError::InvalidOptions(s.clone()),
            EngineError::Config(s) => EngineError::Config(s.clone()),
            EngineError::Internal(s) => EngineError::Internal(s.clone()),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(format!("{:#}", err))
    }
}

impl From<::config::ConfigError> for EngineError {
    fn from(err: ::config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
