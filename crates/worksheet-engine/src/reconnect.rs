//! Reconnect countdown with capped exponential backoff.
//!
//! A [`Reconnector`] exists only while the connection is down. Each tick of
//! the periodic timer decrements the countdown; when it reaches zero the
//! backoff grows for the *next* failure and an attempt is made. A failed
//! attempt (automatic or manual) restarts the countdown from the current
//! backoff, never from the initial value.

use serde::{Deserialize, Serialize};

/// Backoff parameters, configurable through the client settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Countdown used for the first failure of a cycle.
    pub initial_backoff_secs: u64,
    pub backoff_factor: f64,
    pub max_backoff_secs: u64,
    /// Length of one countdown step.
    pub tick_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 2,
            backoff_factor: 1.75,
            max_backoff_secs: 200,
            tick_ms: 1000,
        }
    }
}

/// Outcome of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep waiting; this many steps remain.
    Wait(u64),
    /// Countdown elapsed, attempt a reconnect now.
    Attempt,
}

#[derive(Debug, Clone)]
pub struct Reconnector {
    left: u64,
    backoff: u64,
    policy: ReconnectPolicy,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let initial = policy.initial_backoff_secs.max(1);
        Self {
            left: initial,
            backoff: initial,
            policy,
        }
    }

    pub fn seconds_left(&self) -> u64 {
        self.left
    }

    pub fn backoff(&self) -> u64 {
        self.backoff
    }

    pub fn tick(&mut self) -> Tick {
        self.left = self.left.saturating_sub(1);
        if self.left > 0 {
            return Tick::Wait(self.left);
        }
        if self.backoff < self.policy.max_backoff_secs {
            let grown = (self.backoff as f64 * self.policy.backoff_factor).round() as u64;
            self.backoff = grown.clamp(self.backoff, self.policy.max_backoff_secs);
        }
        Tick::Attempt
    }

    /// The attempt (scheduled or manual) failed: restart from the current backoff.
    pub fn attempt_failed(&mut self) {
        self.left = self.backoff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_until_attempt(r: &mut Reconnector) -> u64 {
        let start = r.seconds_left();
        let mut steps = 0;
        loop {
            steps += 1;
            if r.tick() == Tick::Attempt {
                break;
            }
        }
        assert_eq!(steps, start);
        start
    }

    #[test]
    fn test_backoff_sequence() {
        let mut r = Reconnector::new(ReconnectPolicy::default());
        let mut countdowns = Vec::new();
        for _ in 0..10 {
            countdowns.push(run_until_attempt(&mut r));
            r.attempt_failed();
        }
        assert_eq!(countdowns, vec![2, 4, 7, 12, 21, 37, 65, 114, 200, 200]);
    }

    #[test]
    fn test_tick_reports_remaining() {
        let mut r = Reconnector::new(ReconnectPolicy::default());
        assert_eq!(r.seconds_left(), 2);
        assert_eq!(r.tick(), Tick::Wait(1));
        assert_eq!(r.tick(), Tick::Attempt);
        assert_eq!(r.backoff(), 4);
    }

    #[test]
    fn test_manual_retry_failure_uses_current_backoff() {
        let mut r = Reconnector::new(ReconnectPolicy::default());
        run_until_attempt(&mut r);
        r.attempt_failed();
        run_until_attempt(&mut r);
        r.attempt_failed();
        assert_eq!(r.seconds_left(), 7);

        // Manual try-now mid-countdown that fails again.
        assert_eq!(r.tick(), Tick::Wait(6));
        r.attempt_failed();
        assert_eq!(r.seconds_left(), 7);
    }

    #[test]
    fn test_backoff_never_decreases() {
        let mut r = Reconnector::new(ReconnectPolicy::default());
        let mut last = r.backoff();
        for _ in 0..12 {
            run_until_attempt(&mut r);
            r.attempt_failed();
            assert!(r.backoff() >= last);
            assert!(r.backoff() <= 200);
            last = r.backoff();
        }
        assert_eq!(last, 200);
    }

    #[test]
    fn test_custom_policy() {
        let policy = ReconnectPolicy {
            initial_backoff_secs: 1,
            backoff_factor: 2.0,
            max_backoff_secs: 5,
            tick_ms: 10,
        };
        let mut r = Reconnector::new(policy);
        let mut countdowns = Vec::new();
        for _ in 0..5 {
            countdowns.push(run_until_attempt(&mut r));
            r.attempt_failed();
        }
        assert_eq!(countdowns, vec![1, 2, 4, 5, 5]);
    }
}
