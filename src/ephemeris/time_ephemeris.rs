//! TDB − TT carried by a planetary ephemeris.
//!
//! Recent JPL ephemerides integrate the time transformation together with the
//! bodies and publish TDB − TT (geocentric) alongside the states. Given such
//! samples, [`super::Ephemeris::tdb_minus_tt`] uses them instead of the
//! analytic series in [`crate::time::tdb_minus_tt`].
//!
//! Samples hold the offset and its rate at TT epochs and are interpolated by
//! cubic Hermite segments, as the state tables in [`super::tabulated`].
//!
//! ## CSV layout
//!
//! ```text
//! mjd_tt,tdb_minus_tt,rate
//! 58000.0,-1.2812e-3,1.71e-7
//! ```
//!
//! Offsets in seconds, rates in seconds per day.

use std::io::Read;

use camino::Utf8Path;
use itertools::Itertools;
use serde::Deserialize;
use tracing::debug;

use super::tabulated::{hermite_basis, segment};
use crate::constants::{Second, MJD};
use crate::pulsefit_errors::PulsefitError;

/// Name under which range errors report the table.
pub const TDB_MINUS_TT: &str = "TDB-TT";

#[derive(Debug, Deserialize)]
struct OffsetRow {
    mjd_tt: f64,
    tdb_minus_tt: f64,
    rate: f64,
}

/// Strictly increasing samples of TDB − TT and its rate.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEphemeris {
    mjd: Vec<MJD>,
    offset: Vec<Second>,
    rate: Vec<f64>,
}

impl TimeEphemeris {
    /// Errors
    /// ----------
    /// * [`PulsefitError::DimensionMismatch`] if the columns differ in length.
    /// * [`PulsefitError::InvalidConfiguration`] with fewer than two samples or
    ///   non-increasing MJDs.
    pub fn new(mjd: Vec<MJD>, offset: Vec<Second>, rate: Vec<f64>) -> Result<Self, PulsefitError> {
        for column in [&offset, &rate] {
            if column.len() != mjd.len() {
                return Err(PulsefitError::DimensionMismatch {
                    expected: mjd.len(),
                    got: column.len(),
                });
            }
        }
        if mjd.len() < 2 {
            return Err(PulsefitError::InvalidConfiguration(
                "the TDB - TT table needs at least two samples".into(),
            ));
        }
        if mjd.iter().tuple_windows().any(|(a, b)| b <= a) {
            return Err(PulsefitError::InvalidConfiguration(
                "the TDB - TT table must have strictly increasing MJDs".into(),
            ));
        }
        Ok(TimeEphemeris { mjd, offset, rate })
    }

    /// Tabulate `offset` every `step` days over `[start, end]`, with rates
    /// from central differences.
    pub fn sample(
        start: MJD,
        end: MJD,
        step: f64,
        offset: impl Fn(MJD) -> Second,
    ) -> Result<Self, PulsefitError> {
        if !(step > 0.0 && end > start) {
            return Err(PulsefitError::InvalidConfiguration(format!(
                "cannot sample TDB - TT over {start}..{end} every {step} d"
            )));
        }
        let n = ((end - start) / step).ceil() as usize;
        let mut mjd = (0..=n)
            .map(|k| (start + k as f64 * step).min(end))
            .collect_vec();
        mjd.dedup();
        let h = step.min(1.0) * 1e-2;
        let values = mjd.iter().map(|&t| offset(t)).collect();
        let rates = mjd
            .iter()
            .map(|&t| (offset(t + h) - offset(t - h)) / (2.0 * h))
            .collect();
        TimeEphemeris::new(mjd, values, rates)
    }

    /// Read samples from CSV (`mjd_tt,tdb_minus_tt,rate`, s and s/day).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PulsefitError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let (mut mjd, mut offset, mut rate) = (Vec::new(), Vec::new(), Vec::new());
        for row in rdr.deserialize() {
            let row: OffsetRow = row?;
            mjd.push(row.mjd_tt);
            offset.push(row.tdb_minus_tt);
            rate.push(row.rate);
        }
        let table = TimeEphemeris::new(mjd, offset, rate)?;
        debug!(samples = table.mjd.len(), "loaded TDB - TT table");
        Ok(table)
    }

    pub fn from_csv(path: &Utf8Path) -> Result<Self, PulsefitError> {
        TimeEphemeris::from_reader(std::fs::File::open(path)?)
    }

    pub fn coverage(&self) -> (MJD, MJD) {
        (self.mjd[0], self.mjd[self.mjd.len() - 1])
    }

    /// Interpolated TDB − TT (s) at `mjd_tt`, or
    /// [`PulsefitError::EphemerisRangeError`] outside the table.
    pub fn tdb_minus_tt(&self, mjd_tt: MJD) -> Result<Second, PulsefitError> {
        let (start, end) = self.coverage();
        if !(start..=end).contains(&mjd_tt) {
            return Err(PulsefitError::EphemerisRangeError {
                body: TDB_MINUS_TT.into(),
                mjd: mjd_tt,
                start,
                end,
            });
        }
        let i = segment(&self.mjd, mjd_tt);
        let h = self.mjd[i] - self.mjd[i - 1];
        let ([h00, h10, h01, h11], _) = hermite_basis((mjd_tt - self.mjd[i - 1]) / h);
        Ok(self.offset[i - 1] * h00
            + self.rate[i - 1] * h10 * h
            + self.offset[i] * h01
            + self.rate[i] * h11 * h)
    }
}
