use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight counters for pipeline execution.
///
/// # Example
/// ```rust
/// use pixpipe_core::metrics::PipelineCounters;
///
/// let counters = PipelineCounters::default();
/// counters.frame(614_400);
/// counters.failure();
/// assert_eq!(counters.frames(), 1);
/// assert_eq!(counters.bytes(), 614_400);
/// ```
#[derive(Debug, Default)]
pub struct PipelineCounters {
    frames: AtomicU64,
    failures: AtomicU64,
    bytes: AtomicU64,
}

impl PipelineCounters {
    /// Record a successfully converted frame.
    pub fn frame(&self, bytes_written: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(bytes_written as u64, Ordering::Relaxed);
    }

    /// Record a failed frame.
    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of converted frames.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Snapshot of failed frames.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Snapshot of output bytes written.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl Clone for PipelineCounters {
    fn clone(&self) -> Self {
        let cloned = PipelineCounters::default();
        cloned.frames.store(self.frames(), Ordering::Relaxed);
        cloned.failures.store(self.failures(), Ordering::Relaxed);
        cloned.bytes.store(self.bytes(), Ordering::Relaxed);
        cloned
    }
}
