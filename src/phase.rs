//! Pulse phase with separate integer and fractional parts.
//!
//! A millisecond pulsar accumulates ~10¹¹ turns per decade, so an `f64` phase
//! would keep only ~10⁻⁵ turns of resolution. [`Phase`] stores the integer
//! number of turns and the fractional turn separately, and [`Phase::from_product`]
//! evaluates `F · Δt` with a fused multiply-add so that the rounding error of
//! the product is carried into the fractional part instead of being lost.

use std::ops::{Add, Neg, Sub};

/// Pulse phase in turns, `int + frac` with `frac ∈ [-0.5, 0.5)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Phase {
    pub int: f64,
    pub frac: f64,
}

impl Phase {
    /// Build a phase from two arbitrary parts, renormalising so `frac ∈ [-0.5, 0.5)`.
    pub fn new(int: f64, frac: f64) -> Self {
        let int_whole = int.round();
        let frac = frac + (int - int_whole);
        let carry = (frac + 0.5).floor();
        Phase {
            int: int_whole + carry,
            frac: frac - carry,
        }
    }

    pub fn from_f64(value: f64) -> Self {
        Phase::new(value, 0.0)
    }

    /// `a · b` carried exactly: the rounding error of the product goes into `frac`.
    pub fn from_product(a: f64, b: f64) -> Self {
        let p = a * b;
        let err = a.mul_add(b, -p);
        Phase::new(p, err)
    }

    /// The phase as a single (lossy) `f64`.
    pub fn value(&self) -> f64 {
        self.int + self.frac
    }
}

impl Add for Phase {
    type Output = Phase;

    fn add(self, other: Phase) -> Phase {
        Phase::new(self.int + other.int, self.frac + other.frac)
    }
}

impl Sub for Phase {
    type Output = Phase;

    fn sub(self, other: Phase) -> Phase {
        Phase::new(self.int - other.int, self.frac - other.frac)
    }
}

impl Neg for Phase {
    type Output = Phase;

    fn neg(self) -> Phase {
        Phase::new(-self.int, -self.frac)
    }
}

impl Add<f64> for Phase {
    type Output = Phase;

    fn add(self, other: f64) -> Phase {
        self + Phase::from_f64(other)
    }
}

#[cfg(test)]
mod phase_test {
    use super::*;

    #[test]
    fn test_normalisation() {
        let p = Phase::new(10.0, 0.75);
        assert_eq!(p.int, 11.0);
        assert_eq!(p.frac, -0.25);

        let p = Phase::new(3.4, 0.0);
        assert_eq!(p.int, 3.0);
        assert!((p.frac - 0.4).abs() < 1e-15);
    }

    #[test]
    fn test_product_keeps_fraction() {
        // (1 + 2^-30)² = 1 + 2^-29 + 2^-60: the last term is lost by a plain product
        let a = 1.0 + 2f64.powi(-30);
        let p = Phase::from_product(a, a);
        assert_eq!(p.int, 1.0);
        assert_eq!(p.frac, 2f64.powi(-29) + 2f64.powi(-60));
    }

    #[test]
    fn test_add_sub_roundtrip() {
        let a = Phase::new(1.0e10, 0.3);
        let b = Phase::new(5.0, -0.45);
        let c = (a + b) - b;
        assert_eq!(c.int, a.int);
        assert!((c.frac - a.frac).abs() < 1e-15);
    }
}
