//! Millisecond clock shared by a client, its adapter and its connections.

use tokio::time::Instant;

/// Monotonic milliseconds since the clock was created.
///
/// Backed by `tokio::time::Instant` so paused-time tests drive it.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
