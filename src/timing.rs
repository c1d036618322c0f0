//! Lifecycle phase timing.

use std::time::{Duration, Instant};
use tracing::info;

use crate::customizer::Stage;

/// Measures the phase that ends in `stage`.
pub struct Timer {
    stage: Stage,
    start: Instant,
}

impl Timer {
    pub fn start(stage: Stage) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    /// Log the time it took to reach the stage and return it.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        let secs = elapsed.as_secs_f64();
        if secs >= 60.0 {
            info!("[{:.1}m] {}", secs / 60.0, self.stage);
        } else {
            info!("[{:.1}s] {}", secs, self.stage);
        }
        elapsed
    }
}
