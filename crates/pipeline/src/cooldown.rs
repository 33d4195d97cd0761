//! Wake word cooldown
//!
//! Process-wide service mapping pipeline id to the time of its last wake word
//! detection. Every run holds a handle to the same instance; all access goes
//! through one mutex so check-then-record is atomic.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of recording a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionRecord {
    /// First detection in the window; timestamp updated
    Fresh,
    /// Another run detected within the window; timestamp left alone
    Duplicate,
}

#[derive(Debug)]
pub struct WakeWordCooldown {
    window: Duration,
    last_detection: Mutex<HashMap<String, Instant>>,
}

impl WakeWordCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_detection: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether detection for this pipeline should be skipped right now
    pub fn in_cooldown(&self, pipeline_id: &str) -> bool {
        let now = Instant::now();
        let last = self.last_detection.lock();
        self.within_window(last.get(pipeline_id), now)
    }

    /// Record an actual detection.
    ///
    /// A detection landing inside the window of an earlier one is reported
    /// as a duplicate and does not extend the window.
    pub fn record_detection(&self, pipeline_id: &str) -> DetectionRecord {
        let now = Instant::now();
        let mut last = self.last_detection.lock();
        if self.within_window(last.get(pipeline_id), now) {
            return DetectionRecord::Duplicate;
        }
        last.insert(pipeline_id.to_string(), now);
        DetectionRecord::Fresh
    }

    /// Forget the detection for one pipeline
    pub fn reset(&self, pipeline_id: &str) {
        self.last_detection.lock().remove(pipeline_id);
    }

    pub fn reset_all(&self) {
        self.last_detection.lock().clear();
    }

    fn within_window(&self, last: Option<&Instant>, now: Instant) -> bool {
        match last {
            Some(at) => now.saturating_duration_since(*at) < self.window,
            None => false,
        }
    }
}
