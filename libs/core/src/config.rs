use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for the rebuild pipeline and the per-subscriber queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Publish a progress snapshot at least every N processed documents.
    pub progress_every: usize,
    /// ... or once this much time has passed since the last snapshot.
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,
    /// Bounded queue length per subscriber before older events are superseded.
    pub subscriber_capacity: usize,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            progress_every: 10,
            progress_interval: Duration::from_millis(250),
            subscriber_capacity: 32,
        }
    }
}
