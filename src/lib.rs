//! Pulsar timing core: clock corrections, barycentric delays, pulse-phase
//! residuals and weighted least-squares fitting of timing models.
//!
//! The pipeline runs, for a [`toa::ToaBatch`] and a [`model::TimingModel`]:
//!
//! ```text
//! TOAs ──clock──▶ TT ──ephemeris──▶ site TDB + SSB kinematics     (toa::PreparedToas)
//!      ──delay chain──▶ emission time                             (delay_engine)
//!      ──spin model──▶ phase, pulse numbers, residuals            (residuals)
//!      ──design matrix + WLS──▶ updated parameters                (fitter)
//! ```
//!
//! [`pulsefit::Pulsefit`] wires the stages together and caches prepared TOAs.

pub mod clock;
pub mod constants;
pub mod delay_engine;
pub mod earth_orientation;
pub mod env_state;
pub mod ephemeris;
pub mod fitter;
mod kepler;
pub mod model;
pub mod observatories;
pub mod phase;
pub mod pulsefit;
pub mod pulsefit_errors;
pub mod residuals;
pub mod simulation;
pub mod time;
pub mod toa;
