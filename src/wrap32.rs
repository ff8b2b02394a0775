//! 32-bit wrapping sequence numbers, as used on the wire by TCP.
//!
//! A [`Wrap32`] is a point in a sequence space that repeats every 2^32 values.
//! [`Wrap32::unwrap`] recovers the unique 64-bit absolute sequence number that
//! wraps to a given `Wrap32`, nearest to a caller-supplied checkpoint.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrap32 {
    raw_value: u32,
}

impl Wrap32 {
    pub const fn new(raw_value: u32) -> Self {
        Wrap32 { raw_value }
    }

    pub const fn raw_value(&self) -> u32 {
        self.raw_value
    }

    /// Construct a `Wrap32` given an absolute sequence number `n` and the zero point.
    pub fn wrap(n: u64, zero_point: Wrap32) -> Wrap32 {
        Wrap32::new(zero_point.raw_value.wrapping_add(n as u32))
    }

    /// Return the absolute sequence number that wraps to this `Wrap32`, given the zero
    /// point and a checkpoint (another absolute sequence number near the desired answer).
    pub fn unwrap(&self, zero_point: Wrap32, checkpoint: u64) -> u64 {
        const MOD: u64 = 1u64 << 32;
        let offset = (self.raw_value.wrapping_sub(zero_point.raw_value)) as u64;

        let base = checkpoint - (checkpoint % MOD) + offset;
        let mut best = base;
        let mut best_dist = base.abs_diff(checkpoint);

        for candidate in [base.checked_sub(MOD), base.checked_add(MOD)]
            .into_iter()
            .flatten()
        {
            let dist = candidate.abs_diff(checkpoint);
            if dist < best_dist || (dist == best_dist && candidate < best) {
                best = candidate;
                best_dist = dist;
            }
        }
        best
    }
}

impl std::ops::Add<u32> for Wrap32 {
    type Output = Wrap32;
    fn add(self, rhs: u32) -> Wrap32 {
        Wrap32::new(self.raw_value.wrapping_add(rhs))
    }
}

impl fmt::Display for Wrap32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_basic() {
        let zero = Wrap32::new(0);
        assert_eq!(Wrap32::wrap(0, zero), Wrap32::new(0));
        assert_eq!(Wrap32::wrap(1, zero), Wrap32::new(1));
    }

    #[test]
    fn wrap_overflows_at_2_32() {
        assert_eq!(Wrap32::wrap(1u64 << 32, Wrap32::new(0)), Wrap32::new(0));
    }

    #[test]
    fn unwrap_boundary_from_spec() {
        let got = Wrap32::new(1).unwrap(Wrap32::new((1u64 << 32) as u32 - 1), 1u64 << 32);
        assert_eq!(got, (1u64 << 32) + 2);
    }

    #[test]
    fn round_trip_near_checkpoint() {
        for &(n, z, c) in &[
            (1000u64, 500u32, 1000u64),
            (0, 0, 0),
            (u32::MAX as u64, 0, u32::MAX as u64),
            (1u64 << 31, 0, 1u64 << 31),
        ] {
            let zero = Wrap32::new(z);
            let wrapped = Wrap32::wrap(n, zero);
            assert_eq!(wrapped.unwrap(zero, c), n);
        }
    }

    #[test]
    fn unwrap_picks_smaller_on_tie() {
        // Checkpoint sits exactly halfway between two equidistant candidates (0 and 2^32);
        // the smaller one wins.
        let zero = Wrap32::new(0);
        let checkpoint = 1u64 << 31;
        let raw = Wrap32::wrap(0, zero);
        assert_eq!(raw.unwrap(zero, checkpoint), 0);
    }

    #[test]
    fn unwrap_never_underflows() {
        let zero = Wrap32::new(0);
        let raw = Wrap32::new(u32::MAX);
        assert_eq!(raw.unwrap(zero, 0), u32::MAX as u64);
    }
}
