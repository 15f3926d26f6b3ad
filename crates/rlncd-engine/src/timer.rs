//! Idle tracking for coder lifecycles.
//!
//! Each coder carries one generation timestamp (refreshed on any useful
//! activity) and one per-packet timestamp (refreshed on every accepted
//! frame). The housekeeping sweep turns expiry into `TIMEOUT` events.

use std::sync::Mutex;
use std::time::Instant;

/// Whether `elapsed` seconds of idle exceed `timeout`. Strictly greater,
/// so a zero-second timeout still requires measurable idle time.
pub fn has_expired(elapsed: f64, timeout: f64) -> bool {
    elapsed > timeout
}

struct TimerInner {
    generation: Instant,
    packet: Instant,
}

/// Activity timestamps with configured expiry windows.
pub struct ActivityTimer {
    inner: Mutex<TimerInner>,
    timeout: f64,
    packet_timeout: f64,
}

impl ActivityTimer {
    pub fn new(timeout: f64, packet_timeout: f64) -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(TimerInner {
                generation: now,
                packet: now,
            }),
            timeout,
            packet_timeout,
        }
    }

    /// Refresh the generation timestamp.
    pub fn touch(&self) {
        self.inner.lock().expect("timer poisoned").generation = Instant::now();
    }

    /// Refresh the per-packet timestamp.
    pub fn touch_packet(&self) {
        self.inner.lock().expect("timer poisoned").packet = Instant::now();
    }

    /// Whether the configured generation timeout has passed.
    pub fn is_timed_out(&self) -> bool {
        self.is_timed_out_after(self.timeout)
    }

    /// Whether `timeout` seconds have passed since the last activity.
    pub fn is_timed_out_after(&self, timeout: f64) -> bool {
        let inner = self.inner.lock().expect("timer poisoned");
        has_expired(inner.generation.elapsed().as_secs_f64(), timeout)
    }

    /// Whether the per-packet idle window has passed.
    pub fn packet_timed_out(&self) -> bool {
        let inner = self.inner.lock().expect("timer poisoned");
        has_expired(inner.packet.elapsed().as_secs_f64(), self.packet_timeout)
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // -----------------------------------------------------------------------
    // has_expired
    // -----------------------------------------------------------------------

    #[test]
    fn under_threshold() {
        assert!(!has_expired(0.9, 1.0));
    }

    #[test]
    fn over_threshold() {
        assert!(has_expired(1.1, 1.0));
    }

    #[test]
    fn exact_boundary_not_expired() {
        assert!(!has_expired(1.0, 1.0));
    }

    #[test]
    fn zero_timeout_requires_positive_idle() {
        assert!(!has_expired(0.0, 0.0));
        assert!(has_expired(0.001, 0.0));
    }

    // -----------------------------------------------------------------------
    // ActivityTimer
    // -----------------------------------------------------------------------

    #[test]
    fn fresh_timer_not_expired() {
        let t = ActivityTimer::new(10.0, 10.0);
        assert!(!t.is_timed_out());
        assert!(!t.packet_timed_out());
    }

    #[test]
    fn touch_resets_expiry() {
        let t = ActivityTimer::new(0.0, 0.0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(t.is_timed_out());
        assert!(t.packet_timed_out());

        t.touch();
        t.touch_packet();
        assert!(!t.is_timed_out_after(1.0));
    }

    #[test]
    fn packet_and_generation_are_independent() {
        let t = ActivityTimer::new(60.0, 0.0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(t.packet_timed_out());
        assert!(!t.is_timed_out());
    }

    #[test]
    fn scaled_window_for_blocked_coders() {
        let t = ActivityTimer::new(0.001, 1.0);
        std::thread::sleep(Duration::from_millis(10));
        assert!(t.is_timed_out());
        assert!(!t.is_timed_out_after(60.0));
    }
}
