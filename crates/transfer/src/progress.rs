use std::sync::Mutex;
use std::time::Instant;

/// Snapshot of how far a transfer got.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
    pub bytes_per_second: f64,
}

impl TransferProgress {
    pub fn is_complete(&self) -> bool {
        self.transferred >= self.total
    }
}

/// Per-file byte counters for a multi-file transfer. Safe to update from
/// concurrent upload tasks.
///
/// The rate is the average over everything recorded since the first chunk.
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
}

struct TrackerState {
    /// `(transferred, total)` per file.
    files: Vec<(u64, u64)>,
    first_chunk_at: Option<Instant>,
}

impl TrackerState {
    fn sum(&self) -> (u64, u64) {
        self.files
            .iter()
            .fold((0, 0), |(done, size), (file_done, file_size)| {
                (done + file_done, size + file_size)
            })
    }

    fn rate(&self, now: Instant) -> f64 {
        let Some(start) = self.first_chunk_at else {
            return 0.0;
        };
        let elapsed = now.duration_since(start);
        if elapsed.is_zero() {
            return 0.0;
        }
        self.sum().0 as f64 / elapsed.as_secs_f64()
    }
}

impl ProgressTracker {
    /// Starts tracking one file per declared size in `totals`.
    pub fn new(totals: impl IntoIterator<Item = u64>) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                files: totals.into_iter().map(|total| (0, total)).collect(),
                first_chunk_at: None,
            }),
        }
    }

    /// Adds `bytes` to file `index` and returns its updated progress.
    ///
    /// Returns `None` for an index that is not tracked.
    pub fn record(&self, index: usize, bytes: usize) -> Option<TransferProgress> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let file = state.files.get_mut(index)?;
        file.0 += bytes as u64;
        let (transferred, total) = *file;
        state.first_chunk_at.get_or_insert(now);
        Some(TransferProgress {
            transferred,
            total,
            bytes_per_second: state.rate(now),
        })
    }

    /// Progress summed over all files.
    pub fn overall(&self) -> TransferProgress {
        let state = self.state.lock().unwrap();
        let (transferred, total) = state.sum();
        TransferProgress {
            transferred,
            total,
            bytes_per_second: state.rate(Instant::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn tracker_counts_per_file() {
        let tracker = ProgressTracker::new([10, 20]);

        let p = tracker.record(1, 5).unwrap();
        assert_eq!((p.transferred, p.total), (5, 20));
        assert!(!p.is_complete());
        assert!(tracker.record(0, 10).unwrap().is_complete());

        let all = tracker.overall();
        assert_eq!((all.transferred, all.total), (15, 30));
        assert!(!all.is_complete());
    }

    #[test]
    fn tracker_ignores_unknown_index() {
        let tracker = ProgressTracker::new([1]);
        assert!(tracker.record(3, 1).is_none());
        assert_eq!(tracker.overall().transferred, 0);
    }

    #[test]
    fn empty_transfer_is_complete() {
        let tracker = ProgressTracker::new([0]);
        assert!(tracker.overall().is_complete());
    }

    #[test]
    fn no_rate_before_first_chunk() {
        let tracker = ProgressTracker::new([100]);
        assert_eq!(tracker.overall().bytes_per_second, 0.0);
    }

    #[test]
    fn rate_grows_once_time_passes() {
        let tracker = ProgressTracker::new([1000]);
        tracker.record(0, 500);
        std::thread::sleep(Duration::from_millis(20));
        let p = tracker.record(0, 500).unwrap();
        assert!(p.bytes_per_second > 0.0);
        // 1000 bytes over at least 20 ms.
        assert!(p.bytes_per_second <= 50_000.0);
    }

    #[test]
    fn tracker_concurrent_records() {
        let tracker = Arc::new(ProgressTracker::new([0; 4]));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.record(i, 2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.overall().transferred, 800);
    }
}
