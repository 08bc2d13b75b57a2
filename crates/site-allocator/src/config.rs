//! Allocator tuning

use std::time::Duration;

/// Bounds on how long one allocation may wait and how often it retries
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Longest wait for the region/cluster locks before a conflict is reported
    pub lock_timeout: Duration,
    /// Attempts per allocation, including the first (at least 1)
    pub max_attempts: u32,
    /// First retry delay
    pub backoff_min: Duration,
    /// Cap on retry delays
    pub backoff_max: Duration,
    /// Recorded as `created_by` when a request names no requester
    pub default_requester: String,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5000),
            max_attempts: 3,
            backoff_min: Duration::from_millis(50),
            backoff_max: Duration::from_millis(500),
            default_requester: "system".to_string(),
        }
    }
}
