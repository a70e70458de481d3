//! # Times of arrival
//!
//! - [`Toa`]: one observed pulse arrival time, immutable once built.
//! - [`ToaBatch`]: an ordered, shared, read-only sequence of TOAs with a unique
//!   version number. A new batch (new version) is the only way to change TOAs;
//!   derived data is cached per version.
//! - [`ToaSelector`]: predicate picking a subset of TOAs (for jumps and noise
//!   parameters).
//! - [`PreparedToas`]: the clock-corrected, barycentric kinematics of a batch,
//!   computed once per version. TOAs whose clock or ephemeris data is missing
//!   are recorded as [`RejectedToa`] instead of aborting the whole batch.
//!
//! ## Preparation pipeline
//!
//! ```text
//! raw timestamp ──clock chain──▶ UTC ──leap s──▶ TT ──(+BIPM)──▶ TT
//!      │                                                          │
//!      └──────── observatory ──ITRF→GCRS + ephemeris────────▶ SSB kinematics, TDB
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::constants::{FastMap, MHz, ObsCode, Second, MJD};
use crate::env_state::TimingData;
use crate::observatories::site_position::{position_velocity, SiteKinematics};
use crate::observatories::Observatory;
use crate::pulsefit_errors::PulsefitError;
use crate::time::{SplitMjd, TimeScaleTag};

/// What to do with TOAs that cannot be evaluated (missing clock or ephemeris
/// coverage, delay fixed-point failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchPolicy {
    /// The first per-TOA failure is the error of the whole call.
    Strict,
    /// Failed TOAs are dropped and listed; the rest of the batch proceeds.
    #[default]
    SkipInvalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toa {
    pub mjd: SplitMjd,
    pub scale: TimeScaleTag,
    pub observatory: ObsCode,
    /// Observing frequency in MHz; `f64::INFINITY` for infinite-frequency TOAs.
    pub frequency: MHz,
    /// 1σ timing uncertainty in seconds.
    pub uncertainty: Second,
    pub flags: FastMap<String, String>,
    pub pulse_number: Option<i64>,
}

impl Toa {
    /// Build a TOA recorded on the observatory clock.
    ///
    /// Arguments
    /// -----------------
    /// * `mjd`: raw timestamp.
    /// * `observatory`: observatory code or alias.
    /// * `frequency`: observing frequency in MHz (> 0, may be infinite).
    /// * `uncertainty_us`: 1σ uncertainty in microseconds (> 0).
    pub fn new(
        mjd: SplitMjd,
        observatory: impl Into<String>,
        frequency: MHz,
        uncertainty_us: f64,
    ) -> Result<Self, PulsefitError> {
        if !(frequency > 0.0) {
            return Err(PulsefitError::InvalidParameter {
                name: "frequency".into(),
                reason: format!("observing frequency must be > 0 MHz, got {frequency}"),
            });
        }
        if !(uncertainty_us > 0.0) || !uncertainty_us.is_finite() {
            return Err(PulsefitError::InvalidParameter {
                name: "uncertainty".into(),
                reason: format!("TOA uncertainty must be finite and > 0, got {uncertainty_us}"),
            });
        }
        Ok(Toa {
            mjd,
            scale: TimeScaleTag::Observatory,
            observatory: observatory.into(),
            frequency,
            uncertainty: uncertainty_us * 1e-6,
            flags: FastMap::default(),
            pulse_number: None,
        })
    }

    #[must_use]
    pub fn with_scale(mut self, scale: TimeScaleTag) -> Self {
        self.scale = scale;
        self
    }

    #[must_use]
    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_pulse_number(mut self, pulse_number: i64) -> Self {
        self.pulse_number = Some(pulse_number);
        self
    }

    pub fn flag(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }
}

static NEXT_BATCH_VERSION: AtomicU64 = AtomicU64::new(1);

/// Ordered, immutable, shareable TOAs.
///
/// Cloning a batch is cheap and keeps the version: clones are the same data.
#[derive(Debug, Clone)]
pub struct ToaBatch {
    toas: Arc<[Toa]>,
    version: u64,
}

impl ToaBatch {
    /// Errors
    /// ----------
    /// * [`PulsefitError::EmptyBatch`] if `toas` is empty.
    pub fn new(toas: Vec<Toa>) -> Result<Self, PulsefitError> {
        if toas.is_empty() {
            return Err(PulsefitError::EmptyBatch);
        }
        Ok(ToaBatch {
            toas: toas.into(),
            version: NEXT_BATCH_VERSION.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.toas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toas.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Toa> {
        self.toas.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Toa> {
        self.toas.iter()
    }

    pub fn toas(&self) -> &[Toa] {
        &self.toas
    }

    /// Indices of the TOAs sorted by raw timestamp (stable for equal times).
    pub fn time_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.toas.len()).collect();
        order.sort_by(|&a, &b| {
            self.toas[a]
                .mjd
                .partial_cmp(&self.toas[b].mjd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    /// A new batch (new version) whose TOAs are produced by `f`.
    pub fn map<F>(&self, f: F) -> Result<ToaBatch, PulsefitError>
    where
        F: FnMut(&Toa) -> Toa,
    {
        ToaBatch::new(self.toas.iter().map(f).collect())
    }
}

impl std::ops::Index<usize> for ToaBatch {
    type Output = Toa;

    fn index(&self, index: usize) -> &Toa {
        &self.toas[index]
    }
}

/// Subset of TOAs a jump or noise parameter applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToaSelector {
    All,
    /// TOAs carrying `-key value`.
    Flag { key: String, value: String },
    /// TOAs from one observatory (code or alias as written on the TOA).
    Observatory(String),
    /// Observing frequency in `[min, max)` MHz.
    FreqRange { min: MHz, max: MHz },
    /// Raw MJD in `[start, end)`.
    MjdRange { start: MJD, end: MJD },
}

impl ToaSelector {
    pub fn flag(key: impl Into<String>, value: impl Into<String>) -> Self {
        ToaSelector::Flag {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, toa: &Toa) -> bool {
        match self {
            ToaSelector::All => true,
            ToaSelector::Flag { key, value } => toa.flag(key) == Some(value.as_str()),
            ToaSelector::Observatory(code) => toa.observatory.eq_ignore_ascii_case(code),
            ToaSelector::FreqRange { min, max } => (*min..*max).contains(&toa.frequency),
            ToaSelector::MjdRange { start, end } => (*start..*end).contains(&toa.mjd.to_mjd()),
        }
    }
}

/// A TOA that could not be evaluated, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedToa {
    pub index: usize,
    pub error: PulsefitError,
}

/// Barycentric data of one TOA.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedToa {
    pub index: usize,
    pub tt: SplitMjd,
    /// Barycentric TDB at the site, `kinematics.tdb`.
    pub kinematics: SiteKinematics,
    pub clock_correction: Second,
    pub observatory: Arc<Observatory>,
}

impl PreparedToa {
    pub fn tdb(&self) -> SplitMjd {
        self.kinematics.tdb
    }
}

/// Prepared form of a [`ToaBatch`], tied to its version.
#[derive(Debug, Clone)]
pub struct PreparedToas {
    version: u64,
    entries: Vec<Option<PreparedToa>>,
    rejected: Vec<RejectedToa>,
}

impl PreparedToas {
    /// Clock-correct and barycentre every TOA of a batch.
    ///
    /// Per-TOA failures ([`PulsefitError::is_per_toa`]) are recorded in
    /// [`PreparedToas::rejected`]; apply a [`BatchPolicy`] with
    /// [`PreparedToas::check`].
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::UnknownObservatory`] for an unregistered code.
    /// * [`PulsefitError::InvalidConfiguration`] for a TDB TOA at a site that is
    ///   neither the barycentre nor the geocentre.
    pub fn prepare(batch: &ToaBatch, data: &TimingData) -> Result<Self, PulsefitError> {
        let observatories = batch
            .iter()
            .map(|toa| data.observatories.get(&toa.observatory))
            .collect::<Result<Vec<_>, _>>()?;

        for (toa, obs) in batch.iter().zip(&observatories) {
            if toa.scale == TimeScaleTag::Tdb && obs.itrf().is_some() {
                return Err(PulsefitError::InvalidConfiguration(format!(
                    "TDB timestamps are only valid at the barycentre or geocentre, not at {}",
                    obs.code()
                )));
            }
        }

        let prepare_one = |index: usize| prepare_toa(index, &batch[index], &observatories[index], data);

        #[cfg(feature = "parallel")]
        let results: Vec<Result<PreparedToa, PulsefitError>> =
            (0..batch.len()).into_par_iter().map(prepare_one).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<PreparedToa, PulsefitError>> =
            (0..batch.len()).map(prepare_one).collect();

        let mut entries = Vec::with_capacity(results.len());
        let mut rejected = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(p) => entries.push(Some(p)),
                Err(error) if error.is_per_toa() => {
                    warn!(toa = index, %error, "TOA rejected during preparation");
                    rejected.push(RejectedToa { index, error });
                    entries.push(None);
                }
                Err(error) => return Err(error),
            }
        }

        debug!(
            version = batch.version(),
            toas = batch.len(),
            rejected = rejected.len(),
            "prepared TOA batch"
        );

        Ok(PreparedToas {
            version: batch.version(),
            entries,
            rejected,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PreparedToa> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    /// Successfully prepared TOAs, in batch order.
    pub fn valid(&self) -> impl Iterator<Item = &PreparedToa> {
        self.entries.iter().flatten()
    }

    pub fn rejected(&self) -> &[RejectedToa] {
        &self.rejected
    }

    /// Apply a batch policy: under [`BatchPolicy::Strict`] the first rejection is an error.
    pub fn check(&self, policy: BatchPolicy) -> Result<(), PulsefitError> {
        match (policy, self.rejected.first()) {
            (BatchPolicy::Strict, Some(r)) => Err(r.error.clone()),
            _ if self.entries.iter().all(Option::is_none) => Err(PulsefitError::NoValidToas {
                rejected: self.rejected.len(),
            }),
            _ => Ok(()),
        }
    }
}

fn prepare_toa(
    index: usize,
    toa: &Toa,
    observatory: &Arc<Observatory>,
    data: &TimingData,
) -> Result<PreparedToa, PulsefitError> {
    let prepared = |tt: SplitMjd, kinematics: SiteKinematics, clock_correction: Second| PreparedToa {
        index,
        tt,
        kinematics,
        clock_correction,
        observatory: Arc::clone(observatory),
    };

    if toa.scale == TimeScaleTag::Tdb && observatory.is_barycentric() {
        return Ok(prepared(toa.mjd, SiteKinematics::barycentric(toa.mjd), 0.0));
    }

    let corrected = data.clock.correct(&toa.mjd, toa.scale, observatory)?;
    let mut kinematics = position_velocity(
        observatory,
        &corrected.tt,
        corrected.ut1().to_mjd(),
        data.ephemeris()?,
    )?;
    if toa.scale == TimeScaleTag::Tdb {
        kinematics.tdb = toa.mjd;
    }
    Ok(prepared(corrected.tt, kinematics, corrected.clock_correction))
}

#[cfg(test)]
mod toa_test {
    use super::*;

    fn toa(mjd: f64) -> Toa {
        Toa::new(SplitMjd::from_mjd(mjd), "gbt", 1400.0, 1.0).unwrap()
    }

    #[test]
    fn test_toa_validation() {
        assert!(Toa::new(SplitMjd::from_mjd(55000.0), "gbt", 0.0, 1.0).is_err());
        assert!(Toa::new(SplitMjd::from_mjd(55000.0), "gbt", 1400.0, -1.0).is_err());
        let t = Toa::new(SplitMjd::from_mjd(55000.0), "gbt", f64::INFINITY, 2.0).unwrap();
        assert_eq!(t.uncertainty, 2.0e-6);
    }

    #[test]
    fn test_batch_versions_are_unique() {
        let a = ToaBatch::new(vec![toa(55000.0)]).unwrap();
        let b = ToaBatch::new(vec![toa(55000.0)]).unwrap();
        assert_ne!(a.version(), b.version());
        assert_eq!(a.clone().version(), a.version());
        assert_eq!(ToaBatch::new(vec![]).unwrap_err(), PulsefitError::EmptyBatch);
    }

    #[test]
    fn test_time_order() {
        let batch = ToaBatch::new(vec![toa(55002.0), toa(55000.0), toa(55001.0)]).unwrap();
        assert_eq!(batch.time_order(), vec![1, 2, 0]);
    }

    #[test]
    fn test_selectors() {
        let t = toa(55000.5).with_flag("be", "GUPPI");
        assert!(ToaSelector::All.matches(&t));
        assert!(ToaSelector::flag("be", "GUPPI").matches(&t));
        assert!(!ToaSelector::flag("be", "PUPPI").matches(&t));
        assert!(ToaSelector::Observatory("GBT".into()).matches(&t));
        assert!(ToaSelector::FreqRange { min: 1000.0, max: 2000.0 }.matches(&t));
        assert!(!ToaSelector::MjdRange { start: 55001.0, end: 55002.0 }.matches(&t));
    }
}
