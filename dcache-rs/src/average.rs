//! Provides a lock free sliding average, used to track the latency of request handlers.
//!
//! # Example
//!
//! ```
//! # use dcache::average::Average;
//! let avg = Average::new();
//! avg.add(10);
//! avg.add(20);
//! avg.add(30);
//!
//! assert_eq!(avg.avg(), 20);
//! assert_eq!(avg.count(), 3);
//! ```
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::fmt::format_micros;

/// Number of samples after which older samples start to fade out.
const WINDOW: i32 = 100;

/// Computes a sliding average of a series of values (usually durations in microseconds).
///
/// Sum and count of the current window are packed into a single **AtomicU64** (the upper half
/// holding the sum, the lower one the count) so that both are always updated together. Once the
/// window is full or the sum would overflow, both are halved, which lets older samples fade out.
/// A second counter keeps the total number of samples ever recorded.
#[derive(Default)]
pub struct Average {
    window: AtomicU64,
    total: AtomicU64,
}

impl Clone for Average {
    fn clone(&self) -> Self {
        Average {
            window: AtomicU64::new(self.window.load(Ordering::Relaxed)),
            total: AtomicU64::new(self.total.load(Ordering::Relaxed)),
        }
    }
}

fn unpack(window: u64) -> (i32, i32) {
    ((window >> 32) as u32 as i32, window as u32 as i32)
}

fn pack(sum: i32, count: i32) -> u64 {
    (sum as u32 as u64) << 32 | count as u32 as u64
}

impl Average {
    /// Creates a new average.
    pub fn new() -> Average {
        Average::default()
    }

    /// Records a value.
    pub fn add(&self, value: i32) {
        let _ = self.total.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .window
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |window| {
                let (mut sum, mut count) = unpack(window);
                while count > WINDOW || sum as i64 + value as i64 > i32::MAX as i64 {
                    sum = (sum as i64 * (count / 2) as i64 / count as i64) as i32;
                    count /= 2;
                }

                Some(pack(sum + value, count + 1))
            });
    }

    /// Records the given duration in microseconds.
    pub fn add_duration(&self, duration: Duration) {
        self.add(duration.as_micros().min(i32::MAX as u128) as i32);
    }

    /// Returns the total number of recorded values.
    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Returns the average of the current window.
    pub fn avg(&self) -> i32 {
        match unpack(self.window.load(Ordering::Relaxed)) {
            (_, 0) => 0,
            (sum, count) => sum / count,
        }
    }
}

impl Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_micros(self.avg(), f)?;
        write!(f, " ({})", self.count())
    }
}

#[cfg(test)]
mod test {
    use crate::average::Average;
    use std::time::Duration;

    #[test]
    fn empty_averages_are_zero() {
        let avg = Average::new();
        assert_eq!(avg.avg(), 0);
        assert_eq!(avg.count(), 0);
        assert_eq!(format!("{}", avg), "0 us (0)");
    }

    #[test]
    fn averages_are_computed() {
        let avg = Average::new();
        for i in 1..=10 {
            avg.add(i);
        }
        assert_eq!(avg.avg(), 5);
        assert_eq!(avg.count(), 10);
    }

    #[test]
    fn durations_are_recorded_in_micros() {
        let avg = Average::new();
        avg.add_duration(Duration::from_micros(10_123));
        assert_eq!(format!("{}", avg), "10.1 ms (1)");
    }

    #[test]
    fn old_values_fade_out() {
        let avg = Average::new();
        for _ in 0..1000 {
            avg.add(10);
        }
        for _ in 0..1000 {
            avg.add(1000);
        }
        assert_eq!(avg.avg() > 900, true);
        assert_eq!(avg.count(), 2000);
    }

    #[test]
    fn large_values_do_not_overflow() {
        let avg = Average::new();
        avg.add(i32::MAX);
        assert_eq!(avg.avg(), i32::MAX);
        avg.add(i32::MAX);
        assert_eq!(avg.avg(), i32::MAX);
        avg.add(i32::MAX / 2);
        avg.add(i32::MAX / 2);
        assert_eq!(avg.avg(), i32::MAX / 2);
    }
}
