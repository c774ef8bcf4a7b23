//! Fixed-window counter backing the statistic nodes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default statistic window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// A counter that tracks events within a fixed time window.
///
/// Every access checks for window rollover under a short lock; the count
/// itself is updated atomically. Counts booked for the next window (see [`WindowCounter::occupy_next`])
/// become the starting count once the current window expires.
#[derive(Debug)]
pub struct WindowCounter {
    /// Count in the current window
    count: AtomicU64,
    /// Count already booked against the next window
    next: AtomicU64,
    /// Window length
    window: Duration,
    /// When the current window started
    window_start: Mutex<Instant>,
}

impl WindowCounter {
    /// Create a counter with the given window length.
    pub fn new(window: Duration) -> Self {
        Self {
            count: AtomicU64::new(0),
            next: AtomicU64::new(0),
            window,
            window_start: Mutex::new(Instant::now()),
        }
    }

    /// Add to the current window and return the new total.
    pub fn add(&self, amount: u64) -> u64 {
        self.maybe_reset_window();
        self.count.fetch_add(amount, Ordering::SeqCst) + amount
    }

    /// Get the count in the current window.
    pub fn current(&self) -> u64 {
        self.maybe_reset_window();
        self.count.load(Ordering::SeqCst)
    }

    /// Add `amount` only if the window total stays within `limit`.
    ///
    /// Returns `true` if the amount was recorded.
    pub fn try_add(&self, amount: u64, limit: u64) -> bool {
        self.maybe_reset_window();
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let total = current.checked_add(amount)?;
                (total <= limit).then_some(total)
            })
            .is_ok()
    }

    /// Book `amount` against the next window if it stays within `limit` there.
    ///
    /// Returns `true` if the amount was booked.
    pub fn occupy_next(&self, amount: u64, limit: u64) -> bool {
        self.maybe_reset_window();
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |booked| {
                let total = booked.checked_add(amount)?;
                (total <= limit).then_some(total)
            })
            .is_ok()
    }

    /// Get the count already booked for the next window.
    pub fn occupied_next(&self) -> u64 {
        self.maybe_reset_window();
        self.next.load(Ordering::SeqCst)
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the duration until the current window resets.
    pub fn duration_until_reset(&self) -> Duration {
        let window_start = self.window_start.lock();
        self.window.saturating_sub(window_start.elapsed())
    }

    /// Reset the window if it has expired.
    fn maybe_reset_window(&self) {
        let mut window_start = self.window_start.lock();
        let elapsed = window_start.elapsed();

        if elapsed >= self.window {
            // A window skipped entirely drops anything booked for it.
            let carried = if elapsed >= self.window * 2 {
                self.next.store(0, Ordering::SeqCst);
                0
            } else {
                self.next.swap(0, Ordering::SeqCst)
            };
            self.count.store(carried, Ordering::SeqCst);
            *window_start = Instant::now();
        }
    }
}

impl Default for WindowCounter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
