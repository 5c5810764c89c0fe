use std::sync::Mutex;
use std::time::{Duration, Instant};

struct WindowState {
    window_start: Instant,
    admitted: u32,
}

/// Global fixed-window admission gate shared by every dispatcher
/// worker: at most `max_per_window` sends are admitted per window, and
/// once the cap is hit every caller is refused until the window
/// advances. The downstream channel enforces its own rate limits, so
/// admission is capped client-side before a send is ever attempted.
///
/// There is no per-job state — a single counter behind a mutex gates
/// all workers.
pub struct FixedWindowLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl FixedWindowLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                admitted: 0,
            }),
        }
    }

    /// Create a limiter with a specific window start (for testing).
    #[cfg(test)]
    fn with_time(max_per_window: u32, window: Duration, now: Instant) -> Self {
        Self {
            max_per_window,
            window,
            state: Mutex::new(WindowState {
                window_start: now,
                admitted: 0,
            }),
        }
    }

    /// Try to admit one send. Returns true and counts the admission if
    /// the current window has capacity; returns false without side
    /// effects otherwise.
    pub fn try_admit(&self) -> bool {
        self.try_admit_at(Instant::now())
    }

    /// `try_admit` against an explicit clock.
    pub fn try_admit_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.admitted = 0;
        }
        if state.admitted < self.max_per_window {
            state.admitted += 1;
            true
        } else {
            false
        }
    }

    /// Time until the current window rolls over and admissions resume.
    /// Zero when the window has already elapsed.
    pub fn retry_after(&self) -> Duration {
        self.retry_after_at(Instant::now())
    }

    /// `retry_after` against an explicit clock.
    pub fn retry_after_at(&self, now: Instant) -> Duration {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.window
            .saturating_sub(now.duration_since(state.window_start))
    }
}
