use std::time::{Duration, Instant};

use serde::Serialize;

use crate::motion::MotionScore;
use crate::retention::RetentionStats;

/// Counters for the encode direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStats {
    pub frames: u64,
    pub bytes_sent: u64,
    pub config_headers_sent: u64,
    pub config_headers_suppressed: u64,
    pub motion_messages: u64,
    pub last_motion: u8,
    pub max_motion: u8,
    pub alarms: u64,
    pub retention: RetentionStats,
    pub elapsed_ms: u64,
    pub fps: f64,
}

/// Counters for the decode direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub messages: u64,
    pub frames: u64,
    pub config_headers: u64,
    pub bytes_received: u64,
    pub buffers_sent: u64,
    pub motion_messages: u64,
    pub last_motion: u8,
    pub alarms: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Running frame-rate measurement over a sliding one-second window.
#[derive(Debug)]
pub struct StatsTracker {
    stats: StreamStats,
    started: Instant,
    window_start: Instant,
    window_frames: u64,
    fps: f64,
}

const FPS_WINDOW: Duration = Duration::from_secs(1);

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            stats: StreamStats::default(),
            started: now,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
        }
    }

    pub fn record_frame(&mut self, len: usize) {
        self.stats.frames += 1;
        self.stats.bytes_sent += len as u64;
        self.window_frames += 1;

        let elapsed = self.window_start.elapsed();
        if elapsed >= FPS_WINDOW {
            self.fps = self.window_frames as f64 / elapsed.as_secs_f64();
            self.window_start = Instant::now();
            self.window_frames = 0;
        }
    }

    pub fn record_config(&mut self, sent: bool) {
        if sent {
            self.stats.config_headers_sent += 1;
        } else {
            self.stats.config_headers_suppressed += 1;
        }
    }

    pub fn record_motion(&mut self, score: MotionScore, alarm: bool) {
        self.stats.motion_messages += 1;
        self.stats.last_motion = score.0;
        self.stats.max_motion = self.stats.max_motion.max(score.0);
        if alarm {
            self.stats.alarms += 1;
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// On-frame annotation: `FPS=<fps>, <frames>, <motion>, <skipped>`.
    pub fn annotation(&self, skipped: u64) -> String {
        annotation_text(self.fps, self.stats.frames, self.stats.last_motion, skipped)
    }

    /// Final snapshot including retention counters.
    pub fn snapshot(&self, retention: RetentionStats) -> StreamStats {
        let elapsed = self.started.elapsed();
        let mut stats = self.stats.clone();
        stats.retention = retention;
        stats.elapsed_ms = elapsed.as_millis() as u64;
        stats.fps = if elapsed.as_secs_f64() > 0.0 {
            stats.frames as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        stats
    }
}

pub fn annotation_text(fps: f64, frames: u64, motion: u8, skipped: u64) -> String {
    format!("FPS={fps:.1}, {frames}, {motion}, {skipped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_format() {
        assert_eq!(annotation_text(29.97, 120, 14, 3), "FPS=30.0, 120, 14, 3");
    }

    #[test]
    fn tracker_counts_frames_and_motion() {
        let mut tracker = StatsTracker::new();
        tracker.record_frame(100);
        tracker.record_frame(50);
        tracker.record_config(true);
        tracker.record_config(false);
        tracker.record_motion(MotionScore(9), false);
        tracker.record_motion(MotionScore(4), true);

        let stats = tracker.snapshot(RetentionStats {
            skipped: 2,
            ..RetentionStats::default()
        });
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.bytes_sent, 150);
        assert_eq!(stats.config_headers_sent, 1);
        assert_eq!(stats.config_headers_suppressed, 1);
        assert_eq!(stats.last_motion, 4);
        assert_eq!(stats.max_motion, 9);
        assert_eq!(stats.alarms, 1);
        assert_eq!(stats.retention.skipped, 2);
        assert_eq!(tracker.annotation(2), "FPS=0.0, 2, 4, 2");
    }
}
