//! Full `observatory clock → UTC → TT` conversion.
//!
//! The [`ClockCorrector`] holds every loaded clock table by name. Each
//! [`Observatory`] declares the ordered list of tables (its *clock chain*) that
//! bring its local clock to UTC, for example `["ao2gps", "gps2utc"]`. The chain
//! is evaluated in order and summed.
//!
//! From UTC the leap-second table of [`hifitime`] gives TAI, TT(TAI) follows by
//! adding 32.184 s, and an optional BIPM realisation table refines TT(TAI) into
//! TT(BIPMxx). An optional UT1 − UTC table feeds the sidereal angle used for the
//! observatory rotation.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ClockFile, OutOfRangePolicy};
use crate::constants::{FastMap, Second, TT_MINUS_TAI};
use crate::observatories::Observatory;
use crate::pulsefit_errors::PulsefitError;
use crate::time::{tai_minus_utc, tdb_minus_tt, utc_to_tt, SplitMjd, TimeScaleTag};

/// Configuration of the clock correction chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockConfig {
    /// Behaviour outside a clock table's coverage.
    pub out_of_range: OutOfRangePolicy,
    /// With [`OutOfRangePolicy::Extrapolate`], how far past the end of a table
    /// the endpoint value may still be used, in days.
    pub max_extrapolation_days: f64,
    /// Refine TT(TAI) with the BIPM table for observatories that request it.
    pub include_bipm: bool,
    /// Use the UT1 − UTC table for the Earth rotation angle (otherwise UT1 = UTC).
    pub include_ut1: bool,
}

impl ClockConfig {
    pub fn builder() -> ClockConfigBuilder {
        ClockConfigBuilder::new()
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            out_of_range: OutOfRangePolicy::Error,
            max_extrapolation_days: f64::INFINITY,
            include_bipm: false,
            include_ut1: false,
        }
    }
}

impl fmt::Display for ClockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ClockConfig:")?;
        writeln!(f, "  out_of_range           = {:?}", self.out_of_range)?;
        writeln!(f, "  max_extrapolation_days = {}", self.max_extrapolation_days)?;
        writeln!(f, "  include_bipm           = {}", self.include_bipm)?;
        write!(f, "  include_ut1            = {}", self.include_ut1)
    }
}

#[derive(Debug, Clone)]
pub struct ClockConfigBuilder {
    params: ClockConfig,
}

impl Default for ClockConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockConfigBuilder {
    pub fn new() -> Self {
        Self {
            params: ClockConfig::default(),
        }
    }

    pub fn out_of_range(mut self, v: OutOfRangePolicy) -> Self {
        self.params.out_of_range = v;
        self
    }

    pub fn max_extrapolation_days(mut self, v: f64) -> Self {
        self.params.max_extrapolation_days = v;
        self
    }

    pub fn include_bipm(mut self, v: bool) -> Self {
        self.params.include_bipm = v;
        self
    }

    pub fn include_ut1(mut self, v: bool) -> Self {
        self.params.include_ut1 = v;
        self
    }

    /// Validate and return the configuration.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::InvalidConfiguration`] if `max_extrapolation_days` is
    ///   negative or NaN.
    pub fn build(self) -> Result<ClockConfig, PulsefitError> {
        let p = &self.params;
        if p.max_extrapolation_days.is_nan() || p.max_extrapolation_days < 0.0 {
            return Err(PulsefitError::InvalidConfiguration(
                "max_extrapolation_days must be >= 0".into(),
            ));
        }
        Ok(self.params)
    }
}

/// A timestamp after clock correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectedTime {
    pub utc: SplitMjd,
    pub tt: SplitMjd,
    /// Sum of the site clock chain, in seconds (zero unless the tag was `Observatory`).
    pub clock_correction: Second,
    /// UT1 − UTC in seconds (zero when no table is used).
    pub ut1_minus_utc: Second,
}

impl CorrectedTime {
    pub fn ut1(&self) -> SplitMjd {
        self.utc.add_seconds(self.ut1_minus_utc)
    }
}

/// Read-only store of clock tables and the conversion chain.
#[derive(Debug, Clone, Default)]
pub struct ClockCorrector {
    config: ClockConfig,
    files: FastMap<String, Arc<ClockFile>>,
    bipm: Option<Arc<ClockFile>>,
    ut1: Option<Arc<ClockFile>>,
}

impl ClockCorrector {
    pub fn new(config: ClockConfig) -> Self {
        ClockCorrector {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Register a clock table under its name, replacing any table of the same name.
    pub fn add_clock_file(&mut self, file: ClockFile) {
        debug!(clock_file = file.name(), "registering clock file");
        self.files.insert(file.name().to_string(), Arc::new(file));
    }

    /// Register the TT(BIPMxx) − TAI table (TEMPO2 `tai2tt_bipm*.clk` convention).
    pub fn set_bipm(&mut self, file: ClockFile) {
        self.bipm = Some(Arc::new(file));
    }

    /// Register the UT1 − UTC table.
    pub fn set_ut1(&mut self, file: ClockFile) {
        self.ut1 = Some(Arc::new(file));
    }

    pub fn clock_file(&self, name: &str) -> Option<&ClockFile> {
        self.files.get(name).map(|f| f.as_ref())
    }

    fn lookup(
        &self,
        file: &ClockFile,
        mjd: f64,
        observatory: &str,
    ) -> Result<Second, PulsefitError> {
        let missing = |reason: String| PulsefitError::ClockDataMissing {
            observatory: observatory.to_string(),
            mjd,
            reason,
        };

        if let (OutOfRangePolicy::Extrapolate, Some((start, end))) =
            (self.config.out_of_range, file.coverage())
        {
            let distance = (start - mjd).max(mjd - end);
            if distance > self.config.max_extrapolation_days {
                return Err(missing(format!(
                    "MJD is {distance:.1} days outside clock file '{}' (limit {} days)",
                    file.name(),
                    self.config.max_extrapolation_days
                )));
            }
        }

        file.evaluate(mjd, self.config.out_of_range)
            .map_err(|err| match err {
                PulsefitError::ClockDataMissing { reason, .. } => missing(reason),
                other => other,
            })
    }

    /// Total correction of an observatory's clock chain at `mjd`, in seconds.
    pub fn site_correction(
        &self,
        mjd: f64,
        observatory: &Observatory,
    ) -> Result<Second, PulsefitError> {
        observatory.clock_chain().iter().try_fold(0.0, |acc, name| {
            let file = self
                .files
                .get(name)
                .ok_or_else(|| PulsefitError::ClockDataMissing {
                    observatory: observatory.code().to_string(),
                    mjd,
                    reason: format!("clock file '{name}' is not loaded"),
                })?;
            Ok(acc + self.lookup(file, mjd, observatory.code())?)
        })
    }

    /// Convert a raw timestamp to UTC and TT.
    ///
    /// Arguments
    /// -----------------
    /// * `timestamp`: raw TOA timestamp.
    /// * `tag`: timescale of `timestamp`.
    /// * `observatory`: the site, providing the clock chain and BIPM flag.
    ///
    /// Return
    /// ----------
    /// * A [`CorrectedTime`], or [`PulsefitError::ClockDataMissing`] when a clock
    ///   table, the leap-second table, the BIPM table or the UT1 table does not
    ///   cover the epoch.
    pub fn correct(
        &self,
        timestamp: &SplitMjd,
        tag: TimeScaleTag,
        observatory: &Observatory,
    ) -> Result<CorrectedTime, PulsefitError> {
        let code = observatory.code();
        let no_leap = |mjd: f64| PulsefitError::ClockDataMissing {
            observatory: code.to_string(),
            mjd,
            reason: "no leap-second data (UTC before 1972)".into(),
        };

        let (utc, tt, clock_correction) = match tag {
            TimeScaleTag::Observatory => {
                let corr = self.site_correction(timestamp.to_mjd(), observatory)?;
                let utc = timestamp.add_seconds(corr);
                let tt = utc_to_tt(&utc).ok_or_else(|| no_leap(utc.to_mjd()))?;
                (utc, tt, corr)
            }
            TimeScaleTag::Utc => {
                let tt = utc_to_tt(timestamp).ok_or_else(|| no_leap(timestamp.to_mjd()))?;
                (*timestamp, tt, 0.0)
            }
            TimeScaleTag::Tt | TimeScaleTag::Tdb => {
                let tt = if tag == TimeScaleTag::Tdb {
                    timestamp.add_seconds(-tdb_minus_tt(timestamp.to_mjd()))
                } else {
                    *timestamp
                };
                let leap = tai_minus_utc(tt.to_mjd()).ok_or_else(|| no_leap(tt.to_mjd()))?;
                (tt.add_seconds(-(leap + TT_MINUS_TAI)), tt, 0.0)
            }
        };

        let tt = if self.config.include_bipm && observatory.apply_bipm() && tag != TimeScaleTag::Tdb
        {
            let bipm = self.bipm.as_ref().ok_or_else(|| PulsefitError::ClockDataMissing {
                observatory: code.to_string(),
                mjd: tt.to_mjd(),
                reason: "BIPM correction requested but no table is loaded".into(),
            })?;
            let value = self.lookup(bipm, tt.to_mjd(), code)?;
            tt.add_seconds(value - TT_MINUS_TAI)
        } else {
            tt
        };

        let ut1_minus_utc = if self.config.include_ut1 {
            match self.ut1.as_ref() {
                Some(table) => self.lookup(table, utc.to_mjd(), code)?,
                None => {
                    warn!(observatory = code, "UT1 correction requested but no table is loaded, using UT1 = UTC");
                    0.0
                }
            }
        } else {
            0.0
        };

        Ok(CorrectedTime {
            utc,
            tt,
            clock_correction,
            ut1_minus_utc,
        })
    }
}
