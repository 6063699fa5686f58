use std::time::Duration;

/// Buffer pool sizing knobs
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames held in memory
    pub pool_size: usize,
    /// The K in LRU-K victim selection
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
        }
    }
}

/// Lock manager knobs
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Cadence of the background deadlock detector
    pub detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(50),
        }
    }
}
