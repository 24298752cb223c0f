use std::fmt;

/// Counters kept by a [`crate::Heap`].
///
/// The heap is single threaded, so these are plain integers. They are
/// diagnostics only and are reset by [`crate::Heap::initialize`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Regions requested from the page provider.
    pub pages_acquired: usize,
    /// Bytes requested from the page provider.
    pub bytes_acquired: usize,
    /// Successful calls to `allocate`.
    pub allocations: usize,
    /// Calls to `release`.
    pub releases: usize,
    /// Free blocks that were split to satisfy a request.
    pub splits: usize,
    /// Payload bytes currently handed out.
    pub live_bytes: usize,
    /// Bytes lost behind allocations because the remainder could not host a
    /// header. They are never recovered.
    pub slack_bytes: usize,
}

impl HeapStats {
    /// Allocations that were not released yet. Releases of blocks handed
    /// out before the last reset are not told apart, hence the saturation.
    pub fn live_allocations(&self) -> usize {
        self.allocations.saturating_sub(self.releases)
    }

    /// Share of the acquired bytes currently handed out, from 0 to 1.
    pub fn utilization(&self) -> f64 {
        if self.bytes_acquired == 0 {
            return 0.0;
        }

        self.live_bytes as f64 / self.bytes_acquired as f64
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages ({} bytes), {} live allocations ({} bytes, {:.1}% used), {} splits, {} slack bytes",
            self.pages_acquired,
            self.bytes_acquired,
            self.live_allocations(),
            self.live_bytes,
            self.utilization() * 100.0,
            self.splits,
            self.slack_bytes,
        )
    }
}
