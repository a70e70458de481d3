//! Chebyshev-polynomial ephemeris segments.
//!
//! Each [`ChebyshevSegment`] covers `[start, end]` (MJD, TDB) and stores one set
//! of coefficients per Cartesian axis. Position is the Chebyshev series in the
//! normalised time `tc ∈ [-1, 1]`; velocity is its analytic derivative, scaled
//! by `dtc/dt = 2 / (end − start)`.
//!
//! [`ChebyshevTable`] strings segments together for one body.

use nalgebra::Vector3;

use super::state_vector::StateVector;
use super::Body;
use crate::constants::MJD;
use crate::pulsefit_errors::PulsefitError;

#[derive(Debug, PartialEq, Clone)]
pub struct ChebyshevSegment {
    pub start: MJD,
    pub end: MJD,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl ChebyshevSegment {
    /// Build a segment from coefficient vectors (km).
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::InvalidConfiguration`] if `end <= start`, the axes have
    ///   different lengths, or no coefficient is given.
    pub fn new(
        start: MJD,
        end: MJD,
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<f64>,
    ) -> Result<Self, PulsefitError> {
        if end <= start {
            return Err(PulsefitError::InvalidConfiguration(format!(
                "Chebyshev segment must have end > start (got {start}..{end})"
            )));
        }
        if x.is_empty() || x.len() != y.len() || x.len() != z.len() {
            return Err(PulsefitError::InvalidConfiguration(
                "Chebyshev segment axes must have the same, non-zero number of coefficients"
                    .into(),
            ));
        }
        Ok(ChebyshevSegment { start, end, x, y, z })
    }

    /// Fit `n_coeffs` Chebyshev coefficients per axis to a position function.
    ///
    /// The function is sampled at the `n_coeffs` Chebyshev nodes of the segment,
    /// which makes the fit an interpolation at those nodes (discrete Chebyshev
    /// transform).
    ///
    /// Arguments
    /// -----------------
    /// * `start`, `end`: segment bounds in MJD (TDB).
    /// * `n_coeffs`: number of coefficients per axis (≥ 1).
    /// * `position`: position in km as a function of MJD.
    pub fn fit<F>(start: MJD, end: MJD, n_coeffs: usize, position: F) -> Result<Self, PulsefitError>
    where
        F: Fn(MJD) -> Vector3<f64>,
    {
        if n_coeffs == 0 {
            return Err(PulsefitError::InvalidConfiguration(
                "Chebyshev fit needs at least one coefficient".into(),
            ));
        }
        let n = n_coeffs as f64;
        let half = 0.5 * (end - start);
        let mid = 0.5 * (end + start);

        let nodes: Vec<(f64, Vector3<f64>)> = (0..n_coeffs)
            .map(|k| {
                let theta = std::f64::consts::PI * (k as f64 + 0.5) / n;
                (theta, position(mid + half * theta.cos()))
            })
            .collect();

        let mut coeffs = vec![Vector3::zeros(); n_coeffs];
        for (j, c) in coeffs.iter_mut().enumerate() {
            let sum: Vector3<f64> = nodes
                .iter()
                .map(|(theta, p)| p * (j as f64 * theta).cos())
                .sum();
            *c = sum * (2.0 / n);
        }
        coeffs[0] *= 0.5;

        ChebyshevSegment::new(
            start,
            end,
            coeffs.iter().map(|c| c.x).collect(),
            coeffs.iter().map(|c| c.y).collect(),
            coeffs.iter().map(|c| c.z).collect(),
        )
    }

    pub fn contains(&self, mjd: MJD) -> bool {
        (self.start..=self.end).contains(&mjd)
    }

    /// Position (km) and velocity (km/day) at `mjd`.
    ///
    /// No range check is made; callers go through [`ChebyshevTable::state`].
    pub fn evaluate(&self, mjd: MJD) -> StateVector {
        let n_coeff = self.x.len();
        let tc = 2.0 * (mjd - self.start) / (self.end - self.start) - 1.0;
        let twot = tc + tc;

        let mut tcheb = vec![0.0; n_coeff.max(2)];
        tcheb[0] = 1.0;
        tcheb[1] = tc;
        for i in 2..n_coeff {
            tcheb[i] = twot * tcheb[i - 1] - tcheb[i - 2];
        }

        let mut tcheb_deriv = vec![0.0; n_coeff.max(3)];
        tcheb_deriv[1] = 1.0;
        tcheb_deriv[2] = twot + twot;
        for i in 3..n_coeff {
            tcheb_deriv[i] = twot * tcheb_deriv[i - 1] + 2.0 * tcheb[i - 1] - tcheb_deriv[i - 2];
        }

        let vfac = 2.0 / (self.end - self.start);

        let eval = |coeffs: &[f64], basis: &[f64]| -> f64 {
            coeffs.iter().zip(basis.iter()).map(|(c, b)| c * b).sum()
        };

        StateVector {
            position: Vector3::new(
                eval(&self.x, &tcheb),
                eval(&self.y, &tcheb),
                eval(&self.z, &tcheb),
            ),
            velocity: Vector3::new(
                vfac * eval(&self.x, &tcheb_deriv),
                vfac * eval(&self.y, &tcheb_deriv),
                vfac * eval(&self.z, &tcheb_deriv),
            ),
        }
    }
}

/// Contiguous Chebyshev segments for one body, sorted by start time.
#[derive(Debug, PartialEq, Clone)]
pub struct ChebyshevTable {
    body: Body,
    segments: Vec<ChebyshevSegment>,
}

impl ChebyshevTable {
    /// Errors
    /// ----------
    /// * [`PulsefitError::InvalidConfiguration`] if there are no segments or they
    ///   are not sorted.
    pub fn new(body: Body, mut segments: Vec<ChebyshevSegment>) -> Result<Self, PulsefitError> {
        if segments.is_empty() {
            return Err(PulsefitError::InvalidConfiguration(format!(
                "no Chebyshev segment for {body}"
            )));
        }
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        if segments.windows(2).any(|w| w[1].start < w[0].end) {
            return Err(PulsefitError::InvalidConfiguration(format!(
                "overlapping Chebyshev segments for {body}"
            )));
        }
        Ok(ChebyshevTable { body, segments })
    }

    /// Build a table of equal-length segments by fitting a position function.
    pub fn fit<F>(
        body: Body,
        start: MJD,
        end: MJD,
        segment_days: f64,
        n_coeffs: usize,
        position: F,
    ) -> Result<Self, PulsefitError>
    where
        F: Fn(MJD) -> Vector3<f64>,
    {
        if !(segment_days > 0.0) || end <= start {
            return Err(PulsefitError::InvalidConfiguration(
                "Chebyshev table needs end > start and a positive segment length".into(),
            ));
        }
        let n_segments = ((end - start) / segment_days).ceil() as usize;
        let segments = (0..n_segments)
            .map(|i| {
                let s = start + i as f64 * segment_days;
                let e = (s + segment_days).min(end);
                ChebyshevSegment::fit(s, e, n_coeffs, &position)
            })
            .collect::<Result<Vec<_>, _>>()?;
        ChebyshevTable::new(body, segments)
    }

    pub fn body(&self) -> Body {
        self.body
    }

    pub fn coverage(&self) -> (MJD, MJD) {
        (
            self.segments[0].start,
            self.segments[self.segments.len() - 1].end,
        )
    }

    /// State at `mjd` (TDB), or [`PulsefitError::EphemerisRangeError`] outside coverage
    /// or in a gap between segments.
    pub fn state(&self, mjd: MJD) -> Result<StateVector, PulsefitError> {
        let i = self.segments.partition_point(|s| s.end < mjd);
        match self.segments.get(i) {
            Some(segment) if segment.contains(mjd) => Ok(segment.evaluate(mjd)),
            _ => {
                let (start, end) = self.coverage();
                Err(PulsefitError::EphemerisRangeError {
                    body: self.body.to_string(),
                    mjd,
                    start,
                    end,
                })
            }
        }
    }
}

#[cfg(test)]
mod chebyshev_test {
    use super::*;
    use approx::assert_relative_eq;

    fn circle(mjd: MJD) -> Vector3<f64> {
        let w = 2.0 * std::f64::consts::PI / 365.25;
        Vector3::new(1.5e8 * (w * mjd).cos(), 1.5e8 * (w * mjd).sin(), 0.0)
    }

    #[test]
    fn test_fit_reproduces_position_and_velocity() {
        let seg = ChebyshevSegment::fit(58000.0, 58032.0, 14, circle).unwrap();
        let w = 2.0 * std::f64::consts::PI / 365.25;
        for mjd in [58000.0, 58003.3, 58016.0, 58031.9, 58032.0] {
            let s = seg.evaluate(mjd);
            assert_relative_eq!(s.position, circle(mjd), epsilon = 1e-3);
            let v = Vector3::new(-1.5e8 * w * (w * mjd).sin(), 1.5e8 * w * (w * mjd).cos(), 0.0);
            assert_relative_eq!(s.velocity, v, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_constant_segment() {
        let seg = ChebyshevSegment::new(0.0, 1.0, vec![5.0], vec![6.0], vec![7.0]).unwrap();
        let s = seg.evaluate(0.3);
        assert_eq!(s.position, Vector3::new(5.0, 6.0, 7.0));
        assert_eq!(s.velocity, Vector3::zeros());
    }

    #[test]
    fn test_table_range() {
        let table = ChebyshevTable::fit(Body::Earth, 58000.0, 58100.0, 32.0, 12, circle).unwrap();
        assert_eq!(table.coverage(), (58000.0, 58100.0));
        assert!(table.state(58099.5).is_ok());
        let err = table.state(58100.5).unwrap_err();
        assert!(matches!(err, PulsefitError::EphemerisRangeError { .. }));
        assert!(table.state(57999.0).is_err());
    }
}
