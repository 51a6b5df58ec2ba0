use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

/// Blocking rate limiter that spaces booru requests and adapts the spacing
/// to observed response times.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    state: Mutex<RateLimiterState>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Delay between requests when the API is responsive
    pub base_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Response time at or above which a request counts as slow
    pub slow_request_threshold: Duration,
    pub backoff_multiplier: f64,
    pub recovery_multiplier: f64,
    /// Consecutive slow responses before the delay grows
    pub slow_request_tolerance: u32,
    /// Consecutive fast responses before the delay shrinks
    pub fast_request_tolerance: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            slow_request_threshold: Duration::from_secs(2),
            backoff_multiplier: 1.5,
            recovery_multiplier: 0.8,
            slow_request_tolerance: 2,
            fast_request_tolerance: 3,
        }
    }
}

#[derive(Debug)]
struct RateLimiterState {
    current_delay: Duration,
    consecutive_slow: u32,
    consecutive_fast: u32,
    last_request: Option<Instant>,
}

impl AdaptiveRateLimiter {
    pub fn new() -> Self {
        Self::with_config(RateLimiterConfig::default())
    }

    pub fn with_config(config: RateLimiterConfig) -> Self {
        let state = RateLimiterState {
            current_delay: config.base_delay,
            consecutive_slow: 0,
            consecutive_fast: 0,
            last_request: None,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Blocks until at least the current delay has passed since the previous
    /// request, then stamps the new request. Returns the time slept.
    pub fn wait_for_request(&self) -> Duration {
        let mut state = self.state.lock();
        let waited = match state.last_request {
            Some(last) => state.current_delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        if !waited.is_zero() {
            debug!("Rate limiter waiting for {:?}", waited);
            std::thread::sleep(waited);
        }
        state.last_request = Some(Instant::now());
        waited
    }

    /// Feeds the response time of a finished request back into the delay.
    pub fn record_response_time(&self, response_time: Duration) {
        let mut state = self.state.lock();
        let is_slow = response_time >= self.config.slow_request_threshold;
        let is_fast = response_time < self.config.slow_request_threshold / 2;

        if is_slow {
            state.consecutive_slow += 1;
            state.consecutive_fast = 0;
            warn!("Slow booru response: {:?}", response_time);
        } else if is_fast {
            state.consecutive_fast += 1;
            state.consecutive_slow = 0;
        } else {
            state.consecutive_slow = 0;
            state.consecutive_fast = 0;
        }

        let old_delay = state.current_delay;
        if state.consecutive_slow >= self.config.slow_request_tolerance {
            state.current_delay = Duration::from_secs_f64(
                old_delay.as_secs_f64() * self.config.backoff_multiplier,
            )
            .min(self.config.max_delay);
            state.consecutive_slow = 0;
            info!(
                "Booru responding slowly, request delay {:?} -> {:?}",
                old_delay, state.current_delay
            );
        } else if state.consecutive_fast >= self.config.fast_request_tolerance {
            state.current_delay = Duration::from_secs_f64(
                old_delay.as_secs_f64() * self.config.recovery_multiplier,
            )
            .max(self.config.min_delay);
            state.consecutive_fast = 0;
            debug!(
                "Booru responding quickly, request delay {:?} -> {:?}",
                old_delay, state.current_delay
            );
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.state.lock().current_delay
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
