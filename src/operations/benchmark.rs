use log::{info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Measures consecutive stages of one cycle.
#[derive(Debug)]
pub struct StageTimer {
    last: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        StageTimer { last: Instant::now() }
    }

    /// Milliseconds since the previous lap (or start), restarting the clock.
    pub fn lap_ms(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        duration_ms(elapsed)
    }
}

pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Stage timings of one processed frame (pipeline) or one cycle (synchronous).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchmarkRecord {
    pub camera: String,
    pub total_time_ms: f64,
    pub fps: f64,
    /// Dequeue to ready-to-write, including filename construction.
    pub grab_ms: f64,
    pub save_ms: f64,
    pub write_metadata_ms: f64,
    pub convert_ms: f64,
    pub export_ms: f64,
    pub queue_size: usize,
}

impl BenchmarkRecord {
    /// Fills the total and the rate it implies from the stage timings.
    pub fn finish(mut self) -> Self {
        self.total_time_ms = self.grab_ms + self.save_ms + self.write_metadata_ms + self.convert_ms + self.export_ms;
        self.fps = if self.total_time_ms > 0.0 { 1000.0 / self.total_time_ms } else { 0.0 };
        self
    }

    pub fn log(&self) {
        info!(
            "⏱️ [{}] total time (ms): {:.1}\tFPS: {:.1}",
            self.camera, self.total_time_ms, self.fps
        );
        info!(
            "⏱️ [{}] Times (ms):- grab: {:.1}, save: {:.1}, metadata: {:.1}, convert: {:.1}, export: {:.1}, queue: {}",
            self.camera, self.grab_ms, self.save_ms, self.write_metadata_ms, self.convert_ms, self.export_ms, self.queue_size
        );
    }
}

/// True when every frame id in the set is the same. Logs a warning otherwise.
pub fn check_frame_ids(frame_ids: &[u64]) -> bool {
    let consistent = frame_ids.windows(2).all(|w| w[0] == w[1]);
    if !consistent {
        warn!("⚠️ Frame IDs for grabbed set of images did not match! {:?}", frame_ids);
    }
    consistent
}

/// Achieved rate from a cycle duration; zero for an empty duration.
pub fn rate_hz(cycle: Duration) -> f64 {
    let secs = cycle.as_secs_f64();
    if secs > 0.0 {
        1.0 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_sums_stages() {
        let record = BenchmarkRecord { grab_ms: 1.0, save_ms: 2.0, write_metadata_ms: 1.0, ..Default::default() }.finish();
        assert_eq!(record.total_time_ms, 4.0);
        assert_eq!(record.fps, 250.0);
    }

    #[test]
    fn mismatched_ids_are_reported() {
        assert!(check_frame_ids(&[4, 4, 4]));
        assert!(check_frame_ids(&[]));
        assert!(!check_frame_ids(&[4, 5, 4]));
    }

    #[test]
    fn rate_of_zero_duration_is_zero() {
        assert_eq!(rate_hz(Duration::ZERO), 0.0);
        assert_eq!(rate_hz(Duration::from_millis(100)), 10.0);
    }
}
