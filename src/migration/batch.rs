//! Fixed-size batches with a pause in between

use std::time::Duration;
use tracing::info;

/// Default number of items per bulk request
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Pause between dashboard batches
pub const DASHBOARD_PAUSE: Duration = Duration::from_secs(10);

/// Pause between data model batches
pub const DATAMODEL_PAUSE: Duration = Duration::from_secs(5);

/// How a long list is split into bulk requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub pause: Duration,
}

impl BatchPlan {
    /// A batch size of 0 is treated as 1
    pub fn new(batch_size: usize, pause: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pause,
        }
    }

    /// Batches over `items`, in order
    pub fn batches<'a, T>(&self, items: &'a [T]) -> std::slice::Chunks<'a, T> {
        items.chunks(self.batch_size.max(1))
    }

    /// Number of batches for `len` items
    pub fn batch_count(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size.max(1))
    }

    /// Whether to pause after batch `index` (0-based). Never after the last one.
    pub fn pauses_after(&self, index: usize, len: usize) -> bool {
        !self.pause.is_zero() && index + 1 < self.batch_count(len)
    }

    /// Sleep after batch `index` unless it was the last
    pub async fn pause_after(&self, index: usize, len: usize) {
        if self.pauses_after(index, len) {
            info!(seconds = self.pause.as_secs_f64(), "pausing before the next batch");
            tokio::time::sleep(self.pause).await;
        }
    }
}
