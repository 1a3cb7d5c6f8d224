//! Wall-clock timing of the registration stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Timing breakdown for a single registration call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    /// Normals + FPFH for both point sets
    pub feature_extraction: Duration,
    /// Reciprocal matching + tuple pruning
    pub correspondence: Duration,
    /// GNC pose optimization
    pub optimization: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.feature_extraction + self.correspondence + self.optimization
    }
}

impl fmt::Display for StageTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        writeln!(f, "Feature extraction: {:>10.3} ms", ms(self.feature_extraction))?;
        writeln!(f, "Correspondences:    {:>10.3} ms", ms(self.correspondence))?;
        writeln!(f, "Optimization:       {:>10.3} ms", ms(self.optimization))?;
        write!(f, "Total:              {:>10.3} ms", ms(self.total()))
    }
}

/// Run `f` and return its output together with the elapsed time.
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_sums_stages() {
        let t = StageTimings {
            feature_extraction: Duration::from_millis(3),
            correspondence: Duration::from_millis(2),
            optimization: Duration::from_millis(5),
        };
        assert_eq!(t.total(), Duration::from_millis(10));
        assert_eq!(t.to_string().lines().count(), 4);
    }

    #[test]
    fn test_timed_returns_value() {
        let (v, elapsed) = timed(|| 21 * 2);
        assert_eq!(v, 42);
        assert!(elapsed <= Duration::from_secs(1));
    }
}
