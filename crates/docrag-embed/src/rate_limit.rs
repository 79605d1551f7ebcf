use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::warn;

struct Window { started: Instant, count: u32 }

/// Fixed-window request budget. Callers over budget wait for the window to
/// reset instead of failing.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn per_minute(rpm: u32) -> Self { Self::new(rpm, Duration::from_secs(60)) }

    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests: max_requests.max(1), window, state: Mutex::new(Window { started: Instant::now(), count: 0 }) }
    }

    /// Take one request slot, sleeping until the window resets when exhausted.
    pub async fn acquire(&self) {
        // held across the sleep so waiters queue in order
        let mut state = self.state.lock().await;
        let elapsed = state.started.elapsed();
        if elapsed >= self.window {
            state.started = Instant::now();
            state.count = 0;
        } else if state.count >= self.max_requests {
            let wait = self.window - elapsed;
            warn!(wait_secs = wait.as_secs_f64(), limit = self.max_requests, "rate limit reached, waiting");
            sleep(wait).await;
            state.started = Instant::now();
            state.count = 0;
        }
        state.count += 1;
    }

    pub fn max_requests(&self) -> u32 { self.max_requests }
}
