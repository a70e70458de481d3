//! # Observatory clock corrections
//!
//! A radio observatory time-stamps pulses with its own maser clock. Turning that
//! timestamp into UTC requires one or more **clock correction tables** (for example
//! `site → GPS` followed by `GPS → UTC`), each giving an offset in seconds as a
//! piecewise-linear function of MJD.
//!
//! ## Contents
//!
//! - [`ClockFile`]: one correction table, with linear interpolation and
//!   discontinuities encoded as repeated MJDs.
//! - [`OutOfRangePolicy`]: what to do when a time falls outside a table's coverage.
//! - [`ClockFile::merge`]: sum of several tables on the union of their grids.
//! - [`clock_reader`], [`clock_writer`]: TEMPO and TEMPO2 text formats.
//! - [`corrector`]: per-observatory chains, BIPM and UT1 tables, and the
//!   full `local → UTC → TT` conversion.
//!
//! Silent defaulting of a missing correction would corrupt sub-microsecond timing:
//! under [`OutOfRangePolicy::Error`] (the default) every uncovered lookup is a
//! [`PulsefitError::ClockDataMissing`].
pub mod clock_reader;
pub mod clock_writer;
pub mod corrector;

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{Second, MJD};
use crate::pulsefit_errors::PulsefitError;

/// Behaviour of a clock lookup outside the tabulated range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutOfRangePolicy {
    /// Fail with [`PulsefitError::ClockDataMissing`].
    #[default]
    Error,
    /// Use the nearest endpoint value and emit a warning.
    Extrapolate,
}

/// A tabulated clock correction, `correction(mjd)` in seconds.
///
/// MJDs are non-decreasing. Two consecutive rows with the same MJD describe a
/// step: the first row is the value just before the step, the second the value
/// from the step onwards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClockFile {
    name: String,
    mjd: Vec<MJD>,
    correction: Vec<Second>,
    timescale_from: Option<String>,
    timescale_to: Option<String>,
    comments: Vec<String>,
}

impl ClockFile {
    /// Build a clock file from parallel MJD / correction columns.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::DimensionMismatch`] if the columns differ in length.
    /// * [`PulsefitError::ClockFileOutOfOrder`] if the MJDs decrease.
    /// * [`PulsefitError::InvalidClockFile`] on non-finite values.
    pub fn new(
        name: impl Into<String>,
        mjd: Vec<MJD>,
        correction: Vec<Second>,
    ) -> Result<Self, PulsefitError> {
        let name = name.into();
        if mjd.len() != correction.len() {
            return Err(PulsefitError::DimensionMismatch {
                expected: mjd.len(),
                got: correction.len(),
            });
        }
        if mjd.iter().chain(correction.iter()).any(|v| !v.is_finite()) {
            return Err(PulsefitError::InvalidClockFile {
                name,
                reason: "non-finite MJD or correction".into(),
            });
        }
        if mjd.iter().tuple_windows().any(|(a, b)| b < a) {
            return Err(PulsefitError::ClockFileOutOfOrder(name));
        }

        Ok(ClockFile {
            name,
            mjd,
            correction,
            timescale_from: None,
            timescale_to: None,
            comments: Vec::new(),
        })
    }

    /// Attach the `from → to` timescale pair declared by the file header.
    #[must_use]
    pub fn with_timescales(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.timescale_from = Some(from.into());
        self.timescale_to = Some(to.into());
        self
    }

    #[must_use]
    pub fn with_comments(mut self, comments: Vec<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mjd(&self) -> &[MJD] {
        &self.mjd
    }

    pub fn correction(&self) -> &[Second] {
        &self.correction
    }

    pub fn timescales(&self) -> Option<(&str, &str)> {
        Some((self.timescale_from.as_deref()?, self.timescale_to.as_deref()?))
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn is_empty(&self) -> bool {
        self.mjd.is_empty()
    }

    /// Covered MJD interval, `None` for an empty file.
    pub fn coverage(&self) -> Option<(MJD, MJD)> {
        Some((*self.mjd.first()?, *self.mjd.last()?))
    }

    /// Last MJD with a correction, `-∞` for an empty file.
    pub fn last_correction_mjd(&self) -> MJD {
        self.mjd.last().copied().unwrap_or(f64::NEG_INFINITY)
    }

    fn missing(&self, mjd: MJD, reason: String) -> PulsefitError {
        PulsefitError::ClockDataMissing {
            observatory: self.name.clone(),
            mjd,
            reason,
        }
    }

    /// Correction at `mjd`, linearly interpolated.
    ///
    /// At a step the value from the step onwards is returned.
    ///
    /// Arguments
    /// -----------------
    /// * `mjd`: epoch of the lookup, in the timescale the file corrects from.
    /// * `policy`: behaviour outside the covered interval.
    ///
    /// Return
    /// ----------
    /// * The correction in seconds, or [`PulsefitError::ClockDataMissing`] when
    ///   `mjd` is not covered and `policy` is [`OutOfRangePolicy::Error`]. The
    ///   `observatory` field of the error holds the file name; the corrector
    ///   replaces it with the observatory code.
    pub fn evaluate(&self, mjd: MJD, policy: OutOfRangePolicy) -> Result<Second, PulsefitError> {
        let Some((start, end)) = self.coverage() else {
            let reason = format!("no data points in clock file '{}'", self.name);
            return match policy {
                OutOfRangePolicy::Error => Err(self.missing(mjd, reason)),
                OutOfRangePolicy::Extrapolate => {
                    warn!(clock_file = %self.name, mjd, "{reason}, using zero correction");
                    Ok(0.0)
                }
            };
        };

        if mjd < start || mjd > end {
            let reason = format!(
                "MJD outside clock file '{}' coverage {start}..{end}",
                self.name
            );
            return match policy {
                OutOfRangePolicy::Error => Err(self.missing(mjd, reason)),
                OutOfRangePolicy::Extrapolate => {
                    warn!(clock_file = %self.name, mjd, "{reason}, extrapolating");
                    Ok(if mjd < start {
                        self.correction[0]
                    } else {
                        self.correction[self.correction.len() - 1]
                    })
                }
            };
        }

        Ok(self.right_value(mjd))
    }

    /// Value at `mjd` approached from the left, clamped to the endpoints.
    fn left_value(&self, mjd: MJD) -> Second {
        let i = self.mjd.partition_point(|&m| m < mjd);
        if i == 0 {
            return self.correction[0];
        }
        if i == self.mjd.len() {
            return self.correction[i - 1];
        }
        if self.mjd[i] == mjd {
            return self.correction[i];
        }
        self.interpolate(i - 1, mjd)
    }

    /// Value at `mjd` approached from the right, clamped to the endpoints.
    fn right_value(&self, mjd: MJD) -> Second {
        let i = self.mjd.partition_point(|&m| m <= mjd);
        if i == 0 {
            return self.correction[0];
        }
        if i == self.mjd.len() {
            return self.correction[i - 1];
        }
        self.interpolate(i - 1, mjd)
    }

    fn interpolate(&self, j: usize, mjd: MJD) -> Second {
        let (m0, m1) = (self.mjd[j], self.mjd[j + 1]);
        let (c0, c1) = (self.correction[j], self.correction[j + 1]);
        if m1 == m0 {
            return c1;
        }
        c0 + (c1 - c0) * (mjd - m0) / (m1 - m0)
    }

    /// Whether the file has a step at exactly `mjd`.
    fn has_step_at(&self, mjd: MJD) -> bool {
        self.mjd
            .iter()
            .tuple_windows()
            .any(|(a, b)| *a == mjd && *b == mjd)
    }

    /// Combine several clock files into one whose correction is their **sum**.
    ///
    /// The merged grid is the union of all input MJDs; a step in any input is
    /// kept as a step in the output. Outside an input's coverage its endpoint
    /// value is used.
    ///
    /// Arguments
    /// -----------------
    /// * `files`: the files to add together.
    /// * `trim`: restrict the result to the interval covered by every input.
    ///
    /// Return
    /// ----------
    /// * The merged file, or [`PulsefitError::InvalidClockFile`] when there is
    ///   nothing to merge, an input is empty, or the trimmed range is empty.
    pub fn merge(files: &[&ClockFile], trim: bool) -> Result<ClockFile, PulsefitError> {
        let name = format!(
            "merged({})",
            files.iter().map(|f| f.name.as_str()).join(", ")
        );
        if files.is_empty() || files.iter().any(|f| f.is_empty()) {
            return Err(PulsefitError::InvalidClockFile {
                name,
                reason: "cannot merge empty clock files".into(),
            });
        }

        let grid: Vec<MJD> = files
            .iter()
            .flat_map(|f| f.mjd.iter().copied())
            .sorted_by(|a, b| a.total_cmp(b))
            .dedup()
            .collect();

        let (lo, hi) = if trim {
            let lo = files
                .iter()
                .map(|f| f.mjd[0])
                .fold(f64::NEG_INFINITY, f64::max);
            let hi = files
                .iter()
                .map(|f| f.last_correction_mjd())
                .fold(f64::INFINITY, f64::min);
            if lo > hi {
                return Err(PulsefitError::InvalidClockFile {
                    name,
                    reason: format!("no common coverage ({lo} > {hi})"),
                });
            }
            (lo, hi)
        } else {
            (f64::NEG_INFINITY, f64::INFINITY)
        };

        let mut mjd = Vec::with_capacity(grid.len());
        let mut correction = Vec::with_capacity(grid.len());
        for m in grid.into_iter().filter(|m| (lo..=hi).contains(m)) {
            let after: Second = files.iter().map(|f| f.right_value(m)).sum();
            if files.iter().any(|f| f.has_step_at(m)) {
                let before: Second = files.iter().map(|f| f.left_value(m)).sum();
                mjd.push(m);
                correction.push(before);
            }
            mjd.push(m);
            correction.push(after);
        }

        ClockFile::new(name, mjd, correction)
    }
}

impl fmt::Display for ClockFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scales = match self.timescales() {
            Some((from, to)) => format!(" [{from} -> {to}]"),
            None => String::new(),
        };
        match self.coverage() {
            Some((start, end)) => write!(
                f,
                "ClockFile '{}'{scales}: {} points, MJD {start}..{end}",
                self.name,
                self.mjd.len()
            ),
            None => write!(f, "ClockFile '{}'{scales}: empty", self.name),
        }
    }
}
