//! Tabulated state vectors with cubic Hermite interpolation.
//!
//! Positions and velocities are both tabulated, so each interval between two
//! samples is interpolated by the unique cubic matching position and velocity at
//! both ends. This is used for solar-system bodies given as state tables and for
//! spacecraft orbits supplied by mission data.
//!
//! ## CSV layout
//!
//! ```text
//! mjd_tdb,x,y,z,vx,vy,vz
//! 58000.0,1.4e8,4.2e7,1.8e7,-9.1,26.3,11.4
//! ```
//!
//! Positions in km, velocities in km/s.

use std::io::Read;

use camino::Utf8Path;
use itertools::Itertools;
use nalgebra::Vector3;
use serde::Deserialize;
use tracing::debug;

use super::state_vector::StateVector;
use crate::constants::{MJD, SECONDS_PER_DAY};
use crate::pulsefit_errors::PulsefitError;

#[derive(Debug, Deserialize)]
struct StateRow {
    mjd_tdb: f64,
    x: f64,
    y: f64,
    z: f64,
    vx: f64,
    vy: f64,
    vz: f64,
}

/// Strictly increasing samples `(mjd, state)` for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct HermiteTable {
    name: String,
    mjd: Vec<MJD>,
    states: Vec<StateVector>,
}

impl HermiteTable {
    /// Errors
    /// ----------
    /// * [`PulsefitError::DimensionMismatch`] if the columns differ in length.
    /// * [`PulsefitError::InvalidConfiguration`] with fewer than two samples or
    ///   non-increasing MJDs.
    pub fn new(
        name: impl Into<String>,
        mjd: Vec<MJD>,
        states: Vec<StateVector>,
    ) -> Result<Self, PulsefitError> {
        let name = name.into();
        if mjd.len() != states.len() {
            return Err(PulsefitError::DimensionMismatch {
                expected: mjd.len(),
                got: states.len(),
            });
        }
        if mjd.len() < 2 {
            return Err(PulsefitError::InvalidConfiguration(format!(
                "table '{name}' needs at least two samples"
            )));
        }
        if mjd.iter().tuple_windows().any(|(a, b)| b <= a) {
            return Err(PulsefitError::InvalidConfiguration(format!(
                "table '{name}' must have strictly increasing MJDs"
            )));
        }
        Ok(HermiteTable { name, mjd, states })
    }

    /// Read samples from CSV (`mjd_tdb,x,y,z,vx,vy,vz`, km and km/s).
    pub fn from_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self, PulsefitError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut mjd = Vec::new();
        let mut states = Vec::new();
        for row in rdr.deserialize() {
            let row: StateRow = row?;
            mjd.push(row.mjd_tdb);
            states.push(StateVector::new(
                Vector3::new(row.x, row.y, row.z),
                Vector3::new(row.vx, row.vy, row.vz) * SECONDS_PER_DAY,
            ));
        }
        let table = HermiteTable::new(name, mjd, states)?;
        debug!(table = %table.name, samples = table.mjd.len(), "loaded state table");
        Ok(table)
    }

    pub fn from_csv(name: impl Into<String>, path: &Utf8Path) -> Result<Self, PulsefitError> {
        let file = std::fs::File::open(path)?;
        HermiteTable::from_reader(name, file)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coverage(&self) -> (MJD, MJD) {
        (self.mjd[0], self.mjd[self.mjd.len() - 1])
    }

    /// Interpolated state at `mjd`, or [`PulsefitError::EphemerisRangeError`].
    pub fn state(&self, mjd: MJD) -> Result<StateVector, PulsefitError> {
        let (start, end) = self.coverage();
        if !(start..=end).contains(&mjd) {
            return Err(PulsefitError::EphemerisRangeError {
                body: self.name.clone(),
                mjd,
                start,
                end,
            });
        }

        let i = segment(&self.mjd, mjd);
        let (t0, t1) = (self.mjd[i - 1], self.mjd[i]);
        let (s0, s1) = (&self.states[i - 1], &self.states[i]);

        let h = t1 - t0;
        let ([h00, h10, h01, h11], [d00, d10, d01, d11]) = hermite_basis((mjd - t0) / h);

        let position = s0.position * h00
            + s0.velocity * (h10 * h)
            + s1.position * h01
            + s1.velocity * (h11 * h);
        let velocity = (s0.position * d00 + s1.position * d01) / h
            + s0.velocity * d10
            + s1.velocity * d11;

        Ok(StateVector { position, velocity })
    }
}

/// Index `i` of the sample interval `[mjd[i - 1], mjd[i]]` holding `t`.
pub(super) fn segment(mjd: &[MJD], t: MJD) -> usize {
    mjd.partition_point(|&m| m <= t).clamp(1, mjd.len() - 1)
}

/// Cubic Hermite basis `[h00, h10, h01, h11]` at `s ∈ [0, 1]` and its derivative in `s`.
pub(super) fn hermite_basis(s: f64) -> ([f64; 4], [f64; 4]) {
    let s2 = s * s;
    let s3 = s2 * s;
    (
        [2.0 * s3 - 3.0 * s2 + 1.0, s3 - 2.0 * s2 + s, -2.0 * s3 + 3.0 * s2, s3 - s2],
        [6.0 * s2 - 6.0 * s, 3.0 * s2 - 4.0 * s + 1.0, -6.0 * s2 + 6.0 * s, 3.0 * s2 - 2.0 * s],
    )
}

#[cfg(test)]
mod tabulated_test {
    use super::*;
    use approx::assert_relative_eq;

    fn cubic(t: f64) -> StateVector {
        // x(t) = t³ - 2t, exactly representable by a cubic Hermite segment
        StateVector::new(
            Vector3::new(t * t * t - 2.0 * t, 3.0, -t),
            Vector3::new(3.0 * t * t - 2.0, 0.0, -1.0),
        )
    }

    #[test]
    fn test_hermite_is_exact_for_cubics() {
        let mjd = vec![0.0, 1.0, 3.0];
        let states = mjd.iter().map(|&t| cubic(t)).collect();
        let table = HermiteTable::new("cubic", mjd, states).unwrap();
        for t in [0.0, 0.25, 1.0, 2.2, 3.0] {
            let s = table.state(t).unwrap();
            assert_relative_eq!(s.position, cubic(t).position, epsilon = 1e-12);
            assert_relative_eq!(s.velocity, cubic(t).velocity, epsilon = 1e-12);
        }
        assert!(table.state(3.1).is_err());
    }

    #[test]
    fn test_csv_reader_converts_velocity() {
        let csv = "mjd_tdb,x,y,z,vx,vy,vz\n58000.0,1.0,2.0,3.0,1.0,0.0,0.0\n58001.0,86401.0,2.0,3.0,1.0,0.0,0.0\n";
        let table = HermiteTable::from_reader("orbit", csv.as_bytes()).unwrap();
        let s = table.state(58000.5).unwrap();
        assert_relative_eq!(s.position.x, 43201.0, epsilon = 1e-9);
        assert_relative_eq!(s.velocity.x, SECONDS_PER_DAY, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_unsorted() {
        let states = vec![StateVector::default(); 2];
        assert!(HermiteTable::new("bad", vec![1.0, 1.0], states).is_err());
    }
}
