//! Log throttling
//!
//! Limits how often the same log message is recorded, so a chatty client or
//! a repeating failure cannot flood the log.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Log throttler keyed by message identity
pub struct LogThrottler {
    last_logged: Mutex<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if `key` has not been logged within the interval,
    /// and records this call as the latest log time.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget `key`, so the next occurrence logs immediately
    pub fn clear(&self, key: &str) {
        self.last_logged.lock().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("joystick"));
        assert!(!throttler.should_log("joystick"));
        // Different keys are independent
        assert!(throttler.should_log("servo"));
        assert!(!throttler.should_log("servo"));

        sleep(Duration::from_millis(150));
        assert!(throttler.should_log("joystick"));
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(60);

        assert!(throttler.should_log("write_sample"));
        assert!(!throttler.should_log("write_sample"));

        throttler.clear("write_sample");
        assert!(throttler.should_log("write_sample"));
    }
}
