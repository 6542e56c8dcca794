//! Fixed, epoch-aligned counting windows.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time window a counter is bucketed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    /// One-second burst bucket
    Burst,
    /// Per-minute quota window
    Minute,
    /// Per-hour quota window
    Hour,
}

impl TimeWindow {
    /// Quota windows evaluated by `allow`, in evaluation order.
    pub const QUOTA_WINDOWS: [TimeWindow; 2] = [TimeWindow::Minute, TimeWindow::Hour];

    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds() as u64)
    }

    fn seconds(&self) -> i64 {
        match self {
            TimeWindow::Burst => 1,
            TimeWindow::Minute => 60,
            TimeWindow::Hour => 3600,
        }
    }

    /// Label used in counter keys.
    pub fn label(&self) -> &'static str {
        match self {
            TimeWindow::Burst => "burst",
            TimeWindow::Minute => "minute",
            TimeWindow::Hour => "hour",
        }
    }

    /// Index of the window containing `now`, counted from the Unix epoch.
    pub fn bucket(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.seconds())
    }

    /// Instant the window containing `now` ends.
    pub fn reset_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let end = (self.bucket(now) + 1) * self.seconds();
        DateTime::from_timestamp(end, 0).unwrap_or(now)
    }
}
