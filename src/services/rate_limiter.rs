//! Single-slot cooldown per (credential, action class).
//!
//! An allowed action sets `next_allowed = now + window`. No bursts, no token
//! bucket, and a rejected attempt leaves the slot untouched.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Slots are swept of stale entries once the map grows past this.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Upload,
    Shorten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Wait(Duration),
}

impl RateDecision {
    #[cfg(test)]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    upload_window: Duration,
    shorten_window: Duration,
    slots: Mutex<HashMap<(ActionClass, String), Instant>>,
}

impl RateLimiter {
    pub fn new(upload_window: Duration, shorten_window: Duration) -> Self {
        Self {
            upload_window,
            shorten_window,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self, class: ActionClass) -> Duration {
        match class {
            ActionClass::Upload => self.upload_window,
            ActionClass::Shorten => self.shorten_window,
        }
    }

    pub fn check(&self, credential: &str, class: ActionClass) -> RateDecision {
        self.check_at(credential, class, Instant::now())
    }

    /// Check-and-consume with a caller-supplied monotonic instant.
    pub fn check_at(&self, credential: &str, class: ActionClass, now: Instant) -> RateDecision {
        let mut slots = self.slots.lock();
        let key = (class, credential.to_string());

        match slots.get(&key) {
            Some(next_allowed) if *next_allowed > now => {
                return RateDecision::Wait(*next_allowed - now);
            }
            _ => {}
        }

        if slots.len() >= SWEEP_THRESHOLD {
            slots.retain(|_, next_allowed| *next_allowed > now);
        }
        slots.insert(key, now + self.window(class));
        RateDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_millis(1000), Duration::from_millis(2500))
    }

    #[test]
    fn second_action_inside_window_waits() {
        let limiter = limiter();
        let t0 = Instant::now();
        assert!(limiter.check_at("key", ActionClass::Upload, t0).is_allowed());

        let t1 = t0 + Duration::from_millis(400);
        match limiter.check_at("key", ActionClass::Upload, t1) {
            RateDecision::Wait(wait) => {
                assert!(wait <= Duration::from_millis(1000));
                assert_eq!(wait, Duration::from_millis(600));
            }
            RateDecision::Allowed => panic!("second upload inside the window must wait"),
        }

        let t2 = t0 + Duration::from_millis(1000);
        assert!(limiter.check_at("key", ActionClass::Upload, t2).is_allowed());
    }

    #[test]
    fn rejection_does_not_extend_window() {
        let limiter = limiter();
        let t0 = Instant::now();
        limiter.check_at("key", ActionClass::Upload, t0);
        for ms in [100, 500, 999] {
            assert!(!limiter.check_at("key", ActionClass::Upload, t0 + Duration::from_millis(ms)).is_allowed());
        }
        assert!(limiter.check_at("key", ActionClass::Upload, t0 + Duration::from_millis(1000)).is_allowed());
    }

    #[test]
    fn classes_and_credentials_are_independent() {
        let limiter = limiter();
        let t0 = Instant::now();
        assert!(limiter.check_at("a", ActionClass::Upload, t0).is_allowed());
        assert!(limiter.check_at("a", ActionClass::Shorten, t0).is_allowed());
        assert!(limiter.check_at("b", ActionClass::Upload, t0).is_allowed());

        let later = t0 + Duration::from_millis(1500);
        assert!(limiter.check_at("a", ActionClass::Upload, later).is_allowed());
        assert_eq!(
            limiter.check_at("a", ActionClass::Shorten, later),
            RateDecision::Wait(Duration::from_millis(1000))
        );
    }
}
