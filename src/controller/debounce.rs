//! Coalescing of change notifications into update passes.
//!
//! A burst of notifications is swallowed until either `limit` of them have
//! arrived or the burst has lasted `window`, whichever comes first. A burst
//! that stops short of both is flushed once `window` has passed without a
//! new notification.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Run an update pass now
    Flush { force: bool },
    /// Wait; flush at `until` unless another notification arrives
    Defer { until: Instant },
}

#[derive(Debug, Clone)]
pub struct DebounceWindow {
    limit: usize,
    window: Duration,
    count: usize,
    burst_start: Option<Instant>,
    last: Option<Instant>,
    // Any forced notification in the burst forces the flush
    force: bool,
}

impl DebounceWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            count: 0,
            burst_start: None,
            last: None,
            force: false,
        }
    }

    pub fn record(&mut self, now: Instant, force: bool) -> Verdict {
        self.count += 1;
        self.force |= force;
        let start = *self.burst_start.get_or_insert(now);
        self.last = Some(now);

        if self.count >= self.limit || now.saturating_duration_since(start) >= self.window {
            return Verdict::Flush {
                force: self.reset(),
            };
        }
        Verdict::Defer {
            until: now + self.window,
        }
    }

    /// When the swallowed burst must be flushed, if one is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.last.map(|last| last + self.window)
    }

    /// Flush a pending burst whose deadline has passed.
    ///
    /// Returns the force flag of the flushed burst.
    pub fn expire(&mut self, now: Instant) -> Option<bool> {
        match self.deadline() {
            Some(at) if at <= now => Some(self.reset()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.count > 0
    }

    /// Drop the pending burst, e.g. after an update pass ran for another reason
    pub fn clear(&mut self) {
        self.reset();
    }

    fn reset(&mut self) -> bool {
        self.count = 0;
        self.burst_start = None;
        self.last = None;
        std::mem::take(&mut self.force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_short_burst_flushes_once_after_silence() {
        let t0 = Instant::now();
        let mut window = DebounceWindow::new(5, ms(10));

        for i in 0..3 {
            let verdict = window.record(t0 + ms(2 * i), false);
            assert!(matches!(verdict, Verdict::Defer { .. }));
        }
        assert_eq!(window.deadline(), Some(t0 + ms(14)));

        assert_eq!(window.expire(t0 + ms(13)), None);
        assert_eq!(window.expire(t0 + ms(14)), Some(false));
        assert!(!window.is_pending());
        assert_eq!(window.expire(t0 + ms(100)), None);
    }

    #[test]
    fn test_count_bound_flushes_immediately() {
        let t0 = Instant::now();
        let mut window = DebounceWindow::new(3, ms(1000));

        assert!(matches!(window.record(t0, false), Verdict::Defer { .. }));
        assert!(matches!(window.record(t0, false), Verdict::Defer { .. }));
        assert_eq!(window.record(t0, false), Verdict::Flush { force: false });
        assert!(!window.is_pending());
    }

    #[test]
    fn test_duration_bound_flushes_long_burst() {
        let t0 = Instant::now();
        let mut window = DebounceWindow::new(100, ms(10));

        for i in 0..4 {
            assert!(matches!(
                window.record(t0 + ms(3 * i), false),
                Verdict::Defer { .. }
            ));
        }
        assert_eq!(
            window.record(t0 + ms(12), false),
            Verdict::Flush { force: false }
        );
    }

    #[test]
    fn test_force_is_sticky_within_burst() {
        let t0 = Instant::now();
        let mut window = DebounceWindow::new(5, ms(10));

        window.record(t0, true);
        window.record(t0 + ms(1), false);
        assert_eq!(window.expire(t0 + ms(20)), Some(true));

        window.record(t0 + ms(30), false);
        assert_eq!(window.expire(t0 + ms(50)), Some(false));
    }

    #[test]
    fn test_limit_of_one_never_defers() {
        let t0 = Instant::now();
        let mut window = DebounceWindow::new(1, ms(10));
        assert_eq!(window.record(t0, true), Verdict::Flush { force: true });

        let mut window = DebounceWindow::new(5, Duration::ZERO);
        assert_eq!(window.record(t0, false), Verdict::Flush { force: false });
    }
}
