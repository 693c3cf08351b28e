/// Shared test fixtures: configuration, event draining and canned tool output
use blackstorm_engine::{EngineConfig, JobEvent};
use std::path::Path;
use tokio::sync::mpsc::UnboundedReceiver;

/// Configuration writing every log under `dir` with no real waiting.
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        log_dir: dir.to_path_buf(),
        frozen_recheck_delay_secs: 0,
        sanitize_poll_secs: 1,
        verify_samples: 4,
        entropy_sample_mb: 1,
        ..Default::default()
    }
}

/// Everything sent on `rx` so far.
pub fn drain(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[allow(dead_code)]
pub fn finished_events(events: &[JobEvent]) -> Vec<(bool, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Finished { success, message, .. } => Some((*success, message.clone())),
            _ => None,
        })
        .collect()
}

#[allow(dead_code)]
pub fn progress_values(events: &[JobEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

#[allow(dead_code)]
pub fn log_messages(events: &[JobEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Log { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// `hdparm -I` of an ATA SSD whose security feature set is usable.
#[allow(dead_code)]
pub const HDPARM_NOT_FROZEN: &str = "\
/dev/sdz:

ATA device, with non-removable media
\tModel Number:       Samsung SSD 860 EVO 500GB
Security:
\tMaster password revision code = 65534
\t\tsupported
\tnot\tenabled
\tnot\tlocked
\tnot\tfrozen
\tnot\texpired: security count
\t\tsupported: enhanced erase
\t2min for SECURITY ERASE UNIT. 2min for ENHANCED SECURITY ERASE UNIT.
";

#[allow(dead_code)]
pub fn hdparm_frozen() -> String {
    HDPARM_NOT_FROZEN.replace("\tnot\tfrozen", "\t\tfrozen")
}

#[allow(dead_code)]
pub fn hdparm_locked() -> String {
    HDPARM_NOT_FROZEN.replace("\tnot\tlocked", "\t\tlocked")
}

/// `sha256sum` output for a digest made of `c` repeated.
#[allow(dead_code)]
pub fn sha256_line(c: char, path: &str) -> String {
    format!("{}  {}\n", c.to_string().repeat(64), path)
}
