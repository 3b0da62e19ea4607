use std::cmp::min;
use std::time::Duration;

use crate::config::CircuitConfig;

/// Wait times for the attempts of one reliable send: the first wait is the reliable timeout,
///  each following one is longer by a factor (in eighths) up to a maximum
pub struct ResendBackoff {
    attempt: u32,
    timeout: Duration,

    config_max_timeout: Duration,
    config_factor_eighths: u32,
    config_max_resends: u32,
}

impl ResendBackoff {
    pub fn new(config: &CircuitConfig) -> ResendBackoff {
        let result = ResendBackoff {
            attempt: 0,
            timeout: config.reliable_timeout,
            config_max_timeout: config.max_resend_timeout,
            config_factor_eighths: config.resend_backoff_factor_eighths,
            config_max_resends: config.max_resends,
        };

        assert!(result.config_factor_eighths >= 8);

        result
    }

    /// Number of attempts started so far; the first one is the original send
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The time to wait for an ack for the next attempt, or `None` if all resends are used up
    #[must_use]
    pub fn next_timeout(&mut self) -> Option<Duration> {
        if self.attempt > self.config_max_resends {
            return None;
        }

        let result = if self.attempt == 0 {
            self.timeout
        }
        else {
            self.timeout = min(self.timeout * self.config_factor_eighths / 8, self.config_max_timeout);
            self.timeout
        };
        self.attempt += 1;
        Some(result)
    }
}
