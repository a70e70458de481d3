//! Position/velocity pair returned by ephemeris lookups.
//!
//! Units
//! -----------------
//! * `position`: kilometers (km)
//! * `velocity`: kilometers per day (km/day)
//!
//! Use [`StateVector::to_light_seconds`] to get the light-second / units-of-c
//! form consumed by the delay components.

use std::ops::{Add, Div, Mul, Neg, Sub};

use nalgebra::Vector3;

use crate::constants::{SECONDS_PER_DAY, VLIGHT};

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct StateVector {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl StateVector {
    pub fn new(position: Vector3<f64>, velocity: Vector3<f64>) -> Self {
        StateVector { position, velocity }
    }

    /// Position in light-seconds and velocity in units of c.
    pub fn to_light_seconds(&self) -> (Vector3<f64>, Vector3<f64>) {
        (
            self.position / VLIGHT,
            self.velocity / (SECONDS_PER_DAY * VLIGHT),
        )
    }
}

impl Add for StateVector {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        StateVector {
            position: self.position + other.position,
            velocity: self.velocity + other.velocity,
        }
    }
}

impl Sub for StateVector {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        StateVector {
            position: self.position - other.position,
            velocity: self.velocity - other.velocity,
        }
    }
}

impl Neg for StateVector {
    type Output = Self;

    fn neg(self) -> Self::Output {
        StateVector {
            position: -self.position,
            velocity: -self.velocity,
        }
    }
}

impl Mul<f64> for StateVector {
    type Output = Self;

    fn mul(self, k: f64) -> Self::Output {
        StateVector {
            position: self.position * k,
            velocity: self.velocity * k,
        }
    }
}

impl Div<f64> for StateVector {
    type Output = Self;

    fn div(self, k: f64) -> Self::Output {
        StateVector {
            position: self.position / k,
            velocity: self.velocity / k,
        }
    }
}
