use crate::prelude::*;

/// Receives import progress as a percentage in `[0, 100]`.
///
/// Reporting is best-effort: implementations must not block iteration.
pub trait ProgressSink: Send + Sync {
    fn set(&self, percent: u8);
}

/// `round(index / total * 100)`, clamped to 100. An unknown (zero) total reports 0.
pub fn progress_percent(index: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (index as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

impl ProgressSink for indicatif::ProgressBar {
    fn set(&self, percent: u8) {
        self.set_position(u64::from(percent));
    }
}

/// Keeps every reported percentage, in order.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    reported: Mutex<Vec<u8>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reported(&self) -> Vec<u8> {
        self.reported
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<u8> {
        self.reported().last().copied()
    }
}

impl ProgressSink for RecordingProgress {
    fn set(&self, percent: u8) {
        if let Ok(mut reported) = self.reported.lock() {
            reported.push(percent);
        }
    }
}
