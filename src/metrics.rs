use std::sync::Mutex;

use serde::Serialize;

/// Point-in-time copy of the request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub accepted_requests: u64,
    pub rejected_requests: u64,
    pub avg_processing_time_ms: f64,
}

/// Process-wide request counters. All four fields change together under one
/// lock so a snapshot never observes a half-applied update.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, accepted: bool, duration_ms: f64) {
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };
        let mut m = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        m.total_requests += 1;
        if accepted {
            m.accepted_requests += 1;
        } else {
            m.rejected_requests += 1;
        }
        let total = m.total_requests as f64;
        let avg = m.avg_processing_time_ms + (duration_ms - m.avg_processing_time_ms) / total;
        m.avg_processing_time_ms = avg.max(0.0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.inner.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn running_average_matches_arithmetic_mean() {
        let m = MetricsRecorder::new();
        m.record(true, 100.0);
        m.record(false, 0.0);
        m.record(true, 200.0);
        let s = m.snapshot();
        assert_eq!(s.total_requests, 3);
        assert_eq!(s.accepted_requests, 2);
        assert_eq!(s.rejected_requests, 1);
        assert!((s.avg_processing_time_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn bogus_durations_are_clamped() {
        let m = MetricsRecorder::new();
        m.record(false, -50.0);
        m.record(false, f64::NAN);
        let s = m.snapshot();
        assert_eq!(s.avg_processing_time_ms, 0.0);
        assert_eq!(s.rejected_requests, 2);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let m = Arc::new(MetricsRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for j in 0..500 {
                        m.record((i + j) % 3 != 0, j as f64);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = m.snapshot();
        assert_eq!(s.total_requests, 4000);
        assert_eq!(s.accepted_requests + s.rejected_requests, s.total_requests);
        assert!(s.avg_processing_time_ms >= 0.0);
    }
}
