//! # Shared tabulated data
//!
//! [`TimingData`] bundles the read-only inputs of every timing computation:
//! clock tables, the solar-system ephemeris and the observatory registry.
//! It is built once, wrapped in an [`Arc`] and never mutated afterwards, so a
//! single copy can serve any number of concurrent evaluations.
//!
//! A process-wide slot gives the data an explicit lifecycle:
//!
//! ```text
//! install_shared_data(data)  ──▶  shared_data() … shared_data()  ──▶  teardown_shared_data()
//! ```
//!
//! Installing again replaces the slot; evaluations already holding the
//! previous `Arc` keep using it until they finish.
//!
//! ## Usage
//!
//! ```rust, no_run
//! use pulsefit::env_state::{install_shared_data, shared_data, teardown_shared_data, TimingData};
//! use pulsefit::ephemeris::Ephemeris;
//!
//! let mut data = TimingData::barycentric_only();
//! data.ephemeris = Some(Ephemeris::analytic(54000.0, 60000.0)?);
//! install_shared_data(data);
//!
//! let data = shared_data()?;
//! assert!(data.observatories.get("gbt").is_ok());
//! teardown_shared_data();
//! # Ok::<(), pulsefit::pulsefit_errors::PulsefitError>(())
//! ```

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::clock::corrector::{ClockConfig, ClockCorrector};
use crate::ephemeris::Ephemeris;
use crate::observatories::ObservatoryRegistry;
use crate::pulsefit_errors::PulsefitError;

/// Read-only data shared by all timing computations.
#[derive(Debug, Clone)]
pub struct TimingData {
    pub clock: ClockCorrector,
    /// Solar-system ephemeris; only TOAs already at the barycentre can be
    /// prepared without one.
    pub ephemeris: Option<Ephemeris>,
    pub observatories: ObservatoryRegistry,
}

impl TimingData {
    pub fn new(clock: ClockCorrector, ephemeris: Ephemeris, observatories: ObservatoryRegistry) -> Self {
        TimingData {
            clock,
            ephemeris: Some(ephemeris),
            observatories,
        }
    }

    /// Default observatories and clock configuration, no clock tables and no
    /// ephemeris: enough for TDB TOAs at the barycentre.
    pub fn barycentric_only() -> Self {
        TimingData {
            clock: ClockCorrector::new(ClockConfig::default()),
            ephemeris: None,
            observatories: ObservatoryRegistry::with_defaults(),
        }
    }

    pub fn ephemeris(&self) -> Result<&Ephemeris, PulsefitError> {
        self.ephemeris
            .as_ref()
            .ok_or_else(|| PulsefitError::InvalidConfiguration("no solar-system ephemeris loaded".into()))
    }
}

static SHARED_DATA: Lazy<RwLock<Option<Arc<TimingData>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide data, replacing any previous one.
pub fn install_shared_data(data: TimingData) -> Arc<TimingData> {
    let data = Arc::new(data);
    let mut slot = SHARED_DATA.write().unwrap_or_else(|e| e.into_inner());
    if slot.replace(Arc::clone(&data)).is_some() {
        debug!("replaced shared timing data");
    } else {
        debug!(observatories = data.observatories.len(), "installed shared timing data");
    }
    data
}

/// The process-wide data.
///
/// Errors
/// ----------
/// * [`PulsefitError::InvalidConfiguration`] if nothing is installed.
pub fn shared_data() -> Result<Arc<TimingData>, PulsefitError> {
    SHARED_DATA
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .ok_or_else(|| PulsefitError::InvalidConfiguration("no shared timing data installed".into()))
}

/// Empty the process-wide slot and return what it held.
pub fn teardown_shared_data() -> Option<Arc<TimingData>> {
    let taken = SHARED_DATA.write().unwrap_or_else(|e| e.into_inner()).take();
    if taken.is_some() {
        debug!("tore down shared timing data");
    }
    taken
}
