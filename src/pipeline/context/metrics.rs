use std::time::{Duration, Instant};

/// Counters collected while one video is being analyzed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub analyzed: usize,
    pub failed: usize,
    pub unreadable: usize,
    /// Dispatched or pending frames dropped because the run stopped early.
    pub abandoned: bool,
    pub deadline_expired: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_analyzed(&mut self) {
        self.analyzed += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn record_unreadable(&mut self) {
        self.unreadable += 1;
    }

    pub fn record_deadline(&mut self) {
        self.deadline_expired = true;
        self.abandoned = true;
    }

    pub fn record_cancel(&mut self) {
        self.cancelled = true;
        self.abandoned = true;
    }

    pub fn finalize(&mut self, start_time: Instant) {
        self.elapsed = start_time.elapsed();
    }

    pub fn attempted(&self) -> usize {
        self.analyzed + self.failed + self.unreadable
    }

    /// True when every sampled frame was either analyzed, failed or skipped.
    pub fn is_complete(&self) -> bool {
        !self.abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_flags() {
        let mut stats = RunStats::new();
        stats.record_analyzed();
        stats.record_analyzed();
        stats.record_failed();
        stats.record_unreadable();
        assert_eq!(stats.attempted(), 4);
        assert!(stats.is_complete());

        stats.record_deadline();
        assert!(stats.deadline_expired);
        assert!(!stats.cancelled);
        assert!(!stats.is_complete());
    }
}
