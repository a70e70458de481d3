use thiserror::Error;

use crate::constants::MJD;
use crate::fitter::FitState;
use crate::residuals::AmbiguousPulse;

#[derive(Error, Debug)]
pub enum PulsefitError {
    #[error("No clock correction coverage for observatory {observatory} at MJD {mjd}: {reason}")]
    ClockDataMissing {
        observatory: String,
        mjd: MJD,
        reason: String,
    },

    #[error("Ephemeris has no coverage for {body} at MJD {mjd} (covered range {start}..{end})")]
    EphemerisRangeError {
        body: String,
        mjd: MJD,
        start: MJD,
        end: MJD,
    },

    #[error(
        "Delay fixed-point did not converge for TOA {toa_index} after {iterations} iterations (last change {last_change:e} s)"
    )]
    DelayConvergenceError {
        toa_index: usize,
        iterations: usize,
        last_change: f64,
    },

    #[error("Pulse number ambiguity on {} TOA(s)", .0.len())]
    PulseNumberAmbiguity(Vec<AmbiguousPulse>),

    #[error("Fit did not converge after {iterations} iterations (chi2 = {chi2})")]
    FitNotConverged {
        iterations: usize,
        chi2: f64,
        best: Box<FitState>,
    },

    #[error("Design matrix is degenerate (condition number {condition:e}); involved parameters: {parameters:?}")]
    FitDegenerate {
        condition: f64,
        parameters: Vec<String>,
        best: Option<Box<FitState>>,
    },

    #[error("Invalid value for parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Unknown observatory: {0}")]
    UnknownObservatory(String),

    #[error("Component already registered: {0}")]
    DuplicateComponent(String),

    #[error("Timing model has no {0} component")]
    MissingComponent(String),

    #[error("Invalid clock file {name}: {reason}")]
    InvalidClockFile { name: String, reason: String },

    #[error("Clock file {0} is out of order")]
    ClockFileOutOfOrder(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV reading error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Error during the nom parsing: {0}")]
    NomParsingError(String),

    #[error("Gaussian noise generation failed: {0:?}")]
    NoiseInjectionError(rand_distr::NormalError),

    #[error("TOA batch is empty")]
    EmptyBatch,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("No valid TOA left after rejecting {rejected} TOA(s)")]
    NoValidToas { rejected: usize },
}

impl From<rand_distr::NormalError> for PulsefitError {
    fn from(err: rand_distr::NormalError) -> Self {
        PulsefitError::NoiseInjectionError(err)
    }
}

impl Clone for PulsefitError {
    /// I/O and CSV errors are not `Clone`; they are rebuilt from their kind and message.
    fn clone(&self) -> Self {
        use PulsefitError::*;
        match self {
            ClockDataMissing {
                observatory,
                mjd,
                reason,
            } => ClockDataMissing {
                observatory: observatory.clone(),
                mjd: *mjd,
                reason: reason.clone(),
            },
            EphemerisRangeError {
                body,
                mjd,
                start,
                end,
            } => EphemerisRangeError {
                body: body.clone(),
                mjd: *mjd,
                start: *start,
                end: *end,
            },
            DelayConvergenceError {
                toa_index,
                iterations,
                last_change,
            } => DelayConvergenceError {
                toa_index: *toa_index,
                iterations: *iterations,
                last_change: *last_change,
            },
            PulseNumberAmbiguity(v) => PulseNumberAmbiguity(v.clone()),
            FitNotConverged {
                iterations,
                chi2,
                best,
            } => FitNotConverged {
                iterations: *iterations,
                chi2: *chi2,
                best: best.clone(),
            },
            FitDegenerate {
                condition,
                parameters,
                best,
            } => FitDegenerate {
                condition: *condition,
                parameters: parameters.clone(),
                best: best.clone(),
            },
            InvalidParameter { name, reason } => InvalidParameter {
                name: name.clone(),
                reason: reason.clone(),
            },
            UnknownParameter(s) => UnknownParameter(s.clone()),
            UnknownObservatory(s) => UnknownObservatory(s.clone()),
            DuplicateComponent(s) => DuplicateComponent(s.clone()),
            MissingComponent(s) => MissingComponent(s.clone()),
            InvalidClockFile { name, reason } => InvalidClockFile {
                name: name.clone(),
                reason: reason.clone(),
            },
            ClockFileOutOfOrder(s) => ClockFileOutOfOrder(s.clone()),
            InvalidConfiguration(s) => InvalidConfiguration(s.clone()),
            IoError(e) => IoError(std::io::Error::new(e.kind(), e.to_string())),
            CsvError(e) => CsvError(csv::Error::from(std::io::Error::other(e.to_string()))),
            NomParsingError(s) => NomParsingError(s.clone()),
            NoiseInjectionError(e) => NoiseInjectionError(*e),
            EmptyBatch => EmptyBatch,
            DimensionMismatch { expected, got } => DimensionMismatch {
                expected: *expected,
                got: *got,
            },
            NoValidToas { rejected } => NoValidToas {
                rejected: *rejected,
            },
        }
    }
}

impl From<ordered_float::FloatIsNan> for PulsefitError {
    fn from(_: ordered_float::FloatIsNan) -> Self {
        PulsefitError::InvalidConfiguration("NaN in a value that must be a number".into())
    }
}

impl PulsefitError {
    /// Whether the error only concerns a single TOA, so the rest of the batch may proceed.
    pub fn is_per_toa(&self) -> bool {
        matches!(
            self,
            PulsefitError::ClockDataMissing { .. }
                | PulsefitError::EphemerisRangeError { .. }
                | PulsefitError::DelayConvergenceError { .. }
        )
    }

    /// Best available fit state carried by a fit-level failure, if any.
    pub fn best_fit_state(&self) -> Option<&FitState> {
        match self {
            PulsefitError::FitNotConverged { best, .. } => Some(best),
            PulsefitError::FitDegenerate { best, .. } => best.as_deref(),
            _ => None,
        }
    }
}

impl PartialEq for PulsefitError {
    fn eq(&self, other: &Self) -> bool {
        use PulsefitError::*;
        match (self, other) {
            (
                ClockDataMissing {
                    observatory: a,
                    mjd: m1,
                    ..
                },
                ClockDataMissing {
                    observatory: b,
                    mjd: m2,
                    ..
                },
            ) => a == b && m1 == m2,
            (EphemerisRangeError { body: a, mjd: m1, .. }, EphemerisRangeError { body: b, mjd: m2, .. }) => {
                a == b && m1 == m2
            }
            (
                DelayConvergenceError { toa_index: a, .. },
                DelayConvergenceError { toa_index: b, .. },
            ) => a == b,
            (PulseNumberAmbiguity(a), PulseNumberAmbiguity(b)) => a == b,
            (FitNotConverged { iterations: a, .. }, FitNotConverged { iterations: b, .. }) => a == b,
            (FitDegenerate { parameters: a, .. }, FitDegenerate { parameters: b, .. }) => a == b,
            (InvalidParameter { name: a, .. }, InvalidParameter { name: b, .. }) => a == b,
            (UnknownParameter(a), UnknownParameter(b)) => a == b,
            (UnknownObservatory(a), UnknownObservatory(b)) => a == b,
            (DuplicateComponent(a), DuplicateComponent(b)) => a == b,
            (MissingComponent(a), MissingComponent(b)) => a == b,
            (InvalidClockFile { name: a, .. }, InvalidClockFile { name: b, .. }) => a == b,
            (ClockFileOutOfOrder(a), ClockFileOutOfOrder(b)) => a == b,
            (InvalidConfiguration(a), InvalidConfiguration(b)) => a == b,
            (NomParsingError(a), NomParsingError(b)) => a == b,
            (NoiseInjectionError(a), NoiseInjectionError(b)) => a == b,
            (DimensionMismatch { expected: a, got: c }, DimensionMismatch { expected: b, got: d }) => {
                a == b && c == d
            }
            (NoValidToas { rejected: a }, NoValidToas { rejected: b }) => a == b,

            // Not comparable: same variant is enough
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,

            (EmptyBatch, EmptyBatch) => true,

            _ => false,
        }
    }
}
