//! White-noise model: per-selector uncertainty scaling and epoch-correlated jitter.
//!
//! - `EFACn` (dimensionless) and `EQUADn` (µs) rescale the uncertainty of the
//!   TOAs their selector picks: `σ' = EFAC · √(σ² + EQUAD²)`. When several
//!   terms of the same kind match a TOA, the first one added wins.
//! - `ECORRn` (µs) adds a fully correlated jitter term to TOAs of the same
//!   observing epoch: TOAs matched by the same ECORR whose raw times fall
//!   within one day of the first TOA of the epoch. This turns the diagonal
//!   weights into a block-diagonal covariance.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};

use crate::constants::Second;
use crate::fitter::noise_covariance::NoiseCovariance;
use crate::model::parameter::{ParamSnapshot, Parameter, Unit};
use crate::pulsefit_errors::PulsefitError;
use crate::toa::{Toa, ToaSelector};

/// Width of an ECORR observing epoch, days.
const ECORR_EPOCH_DAYS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    Efac,
    Equad,
    Ecorr,
}

impl NoiseKind {
    fn prefix(&self) -> &'static str {
        match self {
            NoiseKind::Efac => "EFAC",
            NoiseKind::Equad => "EQUAD",
            NoiseKind::Ecorr => "ECORR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseTerm {
    pub kind: NoiseKind,
    pub name: String,
    pub selector: ToaSelector,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoiseModel {
    terms: Vec<NoiseTerm>,
}

impl NoiseModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[NoiseTerm] {
        &self.terms
    }

    pub fn has_ecorr(&self) -> bool {
        self.terms.iter().any(|t| t.kind == NoiseKind::Ecorr)
    }

    /// Register a noise term and return its parameter (EFAC dimensionless,
    /// EQUAD/ECORR in µs).
    pub fn add(&mut self, kind: NoiseKind, selector: ToaSelector, value: f64) -> Parameter {
        let n = self.terms.iter().filter(|t| t.kind == kind).count() + 1;
        let name = format!("{}{n}", kind.prefix());
        self.terms.push(NoiseTerm {
            kind,
            name: name.clone(),
            selector,
        });
        match kind {
            NoiseKind::Efac => Parameter::float(name, value, Unit::Dimensionless, "Uncertainty multiplier")
                .with_range(f64::MIN_POSITIVE, f64::INFINITY),
            NoiseKind::Equad => Parameter::float(name, value, Unit::Microsecond, "Uncertainty added in quadrature")
                .with_range(0.0, f64::INFINITY),
            NoiseKind::Ecorr => Parameter::float(name, value, Unit::Microsecond, "Epoch-correlated jitter")
                .with_range(0.0, f64::INFINITY),
        }
    }

    fn first_match(&self, kind: NoiseKind, toa: &Toa) -> Option<(usize, &NoiseTerm)> {
        self.terms
            .iter()
            .enumerate()
            .find(|(_, t)| t.kind == kind && t.selector.matches(toa))
    }

    /// Scaled 1σ uncertainty of a TOA, seconds.
    pub fn scaled_sigma(&self, toa: &Toa, snap: &ParamSnapshot) -> Result<Second, PulsefitError> {
        let efac = match self.first_match(NoiseKind::Efac, toa) {
            Some((_, t)) => snap.value(&t.name)?,
            None => 1.0,
        };
        let equad = match self.first_match(NoiseKind::Equad, toa) {
            Some((_, t)) => snap.value(&t.name)? * 1e-6,
            None => 0.0,
        };
        Ok(efac * toa.uncertainty.hypot(equad))
    }

    /// Noise covariance of a set of TOAs.
    ///
    /// Arguments
    /// -----------------
    /// * `toas`: the TOAs, in row order of the fit.
    /// * `sigmas`: their scaled uncertainties ([`NoiseModel::scaled_sigma`]).
    /// * `snap`: parameter values.
    ///
    /// Return
    /// ----------
    /// * [`NoiseCovariance::Diagonal`] without ECORR terms,
    ///   [`NoiseCovariance::Full`] otherwise.
    pub fn covariance(
        &self,
        toas: &[&Toa],
        sigmas: &[Second],
        snap: &ParamSnapshot,
    ) -> Result<NoiseCovariance, PulsefitError> {
        if toas.len() != sigmas.len() {
            return Err(PulsefitError::DimensionMismatch {
                expected: toas.len(),
                got: sigmas.len(),
            });
        }
        if !self.has_ecorr() {
            return Ok(NoiseCovariance::Diagonal(DVector::from_column_slice(sigmas)));
        }

        let n = toas.len();
        let mut cov = DMatrix::from_diagonal(&DVector::from_iterator(n, sigmas.iter().map(|s| s * s)));

        // Rows grouped by the ECORR term they belong to, sorted in time
        let by_term = (0..n)
            .filter_map(|row| self.first_match(NoiseKind::Ecorr, toas[row]).map(|(term, _)| (term, row)))
            .into_group_map();

        for (term, mut rows) in by_term.into_iter().sorted_by_key(|(term, _)| *term) {
            let jitter = snap.value(&self.terms[term].name)? * 1e-6;
            let variance = jitter * jitter;
            rows.sort_by(|&a, &b| toas[a].mjd.partial_cmp(&toas[b].mjd).unwrap_or(std::cmp::Ordering::Equal));

            let mut start = 0;
            while start < rows.len() {
                let first = toas[rows[start]].mjd.to_mjd();
                let end = rows[start..]
                    .iter()
                    .position(|&r| toas[r].mjd.to_mjd() - first >= ECORR_EPOCH_DAYS)
                    .map_or(rows.len(), |p| start + p);
                for &i in &rows[start..end] {
                    for &j in &rows[start..end] {
                        cov[(i, j)] += variance;
                    }
                }
                start = end;
            }
        }
        Ok(NoiseCovariance::Full(cov))
    }
}

#[cfg(test)]
mod noise_test {
    use super::*;
    use crate::model::parameter::ParameterTable;
    use crate::time::SplitMjd;
    use approx::assert_relative_eq;

    fn toa(mjd: f64, backend: &str) -> Toa {
        Toa::new(SplitMjd::from_mjd(mjd), "gbt", 1400.0, 3.0)
            .unwrap()
            .with_flag("be", backend)
    }

    #[test]
    fn test_efac_equad_scaling() {
        let mut noise = NoiseModel::new();
        let mut table = ParameterTable::new();
        table.insert(noise.add(NoiseKind::Efac, ToaSelector::flag("be", "A"), 2.0));
        table.insert(noise.add(NoiseKind::Efac, ToaSelector::All, 5.0));
        table.insert(noise.add(NoiseKind::Equad, ToaSelector::flag("be", "A"), 4.0));
        assert!(table.contains("EFAC2"));
        let snap = table.snapshot();

        // 2 · √(3² + 4²) µs
        assert_relative_eq!(noise.scaled_sigma(&toa(55000.0, "A"), &snap).unwrap(), 10e-6, max_relative = 1e-12);
        assert_relative_eq!(noise.scaled_sigma(&toa(55000.0, "B"), &snap).unwrap(), 15e-6, max_relative = 1e-12);
    }

    #[test]
    fn test_ecorr_blocks() {
        let mut noise = NoiseModel::new();
        let mut table = ParameterTable::new();
        table.insert(noise.add(NoiseKind::Ecorr, ToaSelector::flag("be", "A"), 1.0));
        let snap = table.snapshot();

        let toas = [toa(55000.1, "A"), toa(55003.0, "A"), toa(55000.3, "A"), toa(55000.2, "B")];
        let refs: Vec<&Toa> = toas.iter().collect();
        let sigmas = [3e-6; 4];
        let cov = noise.covariance(&refs, &sigmas, &snap).unwrap();
        let NoiseCovariance::Full(m) = cov else {
            panic!("expected a full covariance");
        };
        assert_relative_eq!(m[(0, 0)], 10e-12, max_relative = 1e-12);
        assert_relative_eq!(m[(0, 2)], 1e-12, max_relative = 1e-12);
        assert_eq!(m[(0, 1)], 0.0);
        assert_eq!(m[(0, 3)], 0.0);
        assert_relative_eq!(m[(3, 3)], 9e-12, max_relative = 1e-12);
    }

    #[test]
    fn test_diagonal_without_ecorr() {
        let noise = NoiseModel::new();
        let snap = ParameterTable::new().snapshot();
        let t = toa(55000.0, "A");
        let cov = noise.covariance(&[&t], &[1e-6], &snap).unwrap();
        assert!(matches!(cov, NoiseCovariance::Diagonal(_)));
        assert!(noise.covariance(&[&t], &[], &snap).is_err());
    }
}
