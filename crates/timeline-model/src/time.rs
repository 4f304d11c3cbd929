//! Nanosecond timestamps and frame-grid arithmetic.
//!
//! All timeline positions, clip offsets and frame presentation times are
//! signed nanosecond counts. Arithmetic is exact integer math so that frame
//! alignment never drifts; results outside the `i64` range saturate at
//! [`Timestamp::MIN`] / [`Timestamp::MAX`].

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

/// Signed 64-bit nanosecond timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    pub const MAX: Timestamp = Timestamp(i64::MAX);
    pub const ONE_SECOND: Timestamp = Timestamp(NANOS_PER_SEC);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * NANOS_PER_MILLI)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * NANOS_PER_SEC)
    }

    /// Converts fractional seconds, rounding to the nearest nanosecond.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Largest multiple of `dt` that is `<= self`.
    ///
    /// Uses the euclidean remainder so negative positions round toward
    /// negative infinity as well.
    pub fn align_down(self, dt: Timestamp) -> Timestamp {
        if dt.0 <= 0 {
            return self;
        }
        Timestamp(self.0 - self.0.rem_euclid(dt.0))
    }

    /// Nearest multiple of `dt`; exact halves round up.
    pub fn snap_nearest(self, dt: Timestamp) -> Timestamp {
        if dt.0 <= 0 {
            return self;
        }
        let steps = self.0.saturating_add(dt.0 / 2).div_euclid(dt.0);
        // Only the lowest grid step can fall below i64::MIN.
        let nanos = steps
            .checked_mul(dt.0)
            .unwrap_or_else(|| (steps + 1) * dt.0);
        Timestamp(nanos)
    }

    /// Number of whole `dt` steps needed to cover `self` (rounds up).
    pub fn frames_ceil(self, dt: Timestamp) -> u64 {
        if dt.0 <= 0 || self.0 <= 0 {
            return 0;
        }
        (self.0 / dt.0 + i64::from(self.0 % dt.0 != 0)) as u64
    }

    pub fn saturating_add(self, rhs: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

/// Duration of one frame at `fps` frames per second (integer nanoseconds).
///
/// A zero frame rate is treated as 1 fps.
pub fn frame_interval(fps: u32) -> Timestamp {
    Timestamp(NANOS_PER_SEC / i64::from(fps.max(1)))
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timestamp) -> Timestamp {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Timestamp {
    fn add_assign(&mut self, rhs: Timestamp) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Timestamp {
    fn sub_assign(&mut self, rhs: Timestamp) {
        *self = *self - rhs;
    }
}

impl Mul<i64> for Timestamp {
    type Output = Timestamp;

    fn mul(self, rhs: i64) -> Timestamp {
        Timestamp(self.0.saturating_mul(rhs))
    }
}

impl Neg for Timestamp {
    type Output = Timestamp;

    fn neg(self) -> Timestamp {
        Timestamp(self.0.saturating_neg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_interval_is_integer_division() {
        assert_eq!(frame_interval(30).as_nanos(), 33_333_333);
        assert_eq!(frame_interval(25).as_nanos(), 40_000_000);
        assert_eq!(frame_interval(0), Timestamp::ONE_SECOND);
    }

    #[test]
    fn test_align_down_negative() {
        let dt = Timestamp::from_millis(40);
        assert_eq!(
            Timestamp::from_millis(-10).align_down(dt),
            Timestamp::from_millis(-40)
        );
        assert_eq!(
            Timestamp::from_millis(80).align_down(dt),
            Timestamp::from_millis(80)
        );
    }

    #[test]
    fn test_snap_nearest_rounds_half_up() {
        let dt = Timestamp::from_millis(40);
        assert_eq!(
            Timestamp::from_millis(19).snap_nearest(dt),
            Timestamp::ZERO
        );
        assert_eq!(
            Timestamp::from_millis(20).snap_nearest(dt),
            Timestamp::from_millis(40)
        );
        assert_eq!(
            Timestamp::from_millis(61).snap_nearest(dt),
            Timestamp::from_millis(80)
        );
    }

    #[test]
    fn test_frames_ceil() {
        let dt = frame_interval(10);
        assert_eq!(Timestamp::from_secs(1).frames_ceil(dt), 10);
        assert_eq!(Timestamp::from_millis(1_050).frames_ceil(dt), 11);
        assert_eq!(Timestamp::ZERO.frames_ceil(dt), 0);
    }

    #[test]
    fn test_arithmetic_saturates_at_range_ends() {
        let dt = frame_interval(30);
        assert_eq!(Timestamp::MAX + Timestamp::ONE_SECOND, Timestamp::MAX);
        assert_eq!(Timestamp::MIN - Timestamp::ONE_SECOND, Timestamp::MIN);
        assert_eq!(Timestamp::MAX * 2, Timestamp::MAX);
        assert_eq!(-Timestamp::MIN, Timestamp::MAX);

        let snapped = Timestamp::MAX.snap_nearest(dt);
        assert_eq!(snapped.as_nanos().rem_euclid(dt.as_nanos()), 0);
        assert!(Timestamp::MAX - snapped < dt);
        assert_eq!(Timestamp::MIN.snap_nearest(dt).as_nanos() % dt.as_nanos(), 0);
        assert!(Timestamp::MAX.frames_ceil(dt) > 0);

        let mut t = Timestamp::MAX;
        t += dt;
        assert_eq!(t, Timestamp::MAX);
    }

    #[test]
    fn test_display_in_seconds() {
        assert_eq!(Timestamp::from_millis(1_500).to_string(), "1.500000s");
    }

    proptest! {
        #[test]
        fn aligned_position_is_on_grid_and_close(
            p in -1_000_000_000_000i64..1_000_000_000_000i64,
            fps in 1u32..240,
        ) {
            let dt = frame_interval(fps);
            let aligned = Timestamp::from_nanos(p).align_down(dt);
            prop_assert_eq!(aligned.as_nanos().rem_euclid(dt.as_nanos()), 0);
            prop_assert!(aligned.as_nanos() <= p);
            prop_assert!(p - aligned.as_nanos() < dt.as_nanos());
        }

        #[test]
        fn snapped_position_is_nearest_multiple(
            p in -1_000_000_000_000i64..1_000_000_000_000i64,
            fps in 1u32..240,
        ) {
            let dt = frame_interval(fps);
            let snapped = Timestamp::from_nanos(p).snap_nearest(dt);
            prop_assert_eq!(snapped.as_nanos().rem_euclid(dt.as_nanos()), 0);
            prop_assert!((snapped.as_nanos() - p).abs() <= dt.as_nanos() / 2 + 1);
        }
    }
}
