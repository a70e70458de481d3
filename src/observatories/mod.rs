//! # Observatories
//!
//! An [`Observatory`] is the place a TOA was recorded. It carries:
//!
//! - its **kind** ([`ObservatoryKind`]): a fixed terrestrial site (ITRF
//!   coordinates), the geocentre, the solar-system barycentre (for TOAs that are
//!   already barycentred), or a spacecraft whose geocentric orbit is supplied
//!   externally;
//! - its **clock chain**: the ordered names of the clock tables that bring its
//!   local clock to UTC (see [`crate::clock::corrector`]);
//! - whether the BIPM realisation of TT should be applied.
//!
//! The [`ObservatoryRegistry`] maps TOA observatory codes (and aliases) to
//! observatories. [`ObservatoryRegistry::with_defaults`] knows the barycentre,
//! the geocentre and a handful of large radio telescopes.
//!
//! Site kinematics relative to the barycentre are computed in [`site_position`].
pub mod site_position;

use std::fmt;
use std::sync::Arc;

use nalgebra::Vector3;
use ordered_float::NotNan;

use crate::constants::{Degree, FastMap, Meter, EARTH_MAJOR_AXIS, EARTH_MINOR_AXIS, RADEG};
use crate::ephemeris::tabulated::HermiteTable;
use crate::pulsefit_errors::PulsefitError;

/// Where an observatory is.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservatoryKind {
    /// Fixed terrestrial site, ITRF Cartesian coordinates in metres.
    Geodetic { itrf: Vector3<NotNan<f64>> },
    /// The centre of the Earth.
    Geocenter,
    /// The solar-system barycentre: TOAs are already barycentric (TDB).
    Barycenter,
    /// Spacecraft with a geocentric GCRS orbit (km, km/day) tabulated at TT epochs.
    Spacecraft { orbit: Arc<HermiteTable> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observatory {
    code: String,
    aliases: Vec<String>,
    kind: ObservatoryKind,
    clock_chain: Vec<String>,
    apply_bipm: bool,
}

impl Observatory {
    pub fn new(code: impl Into<String>, kind: ObservatoryKind) -> Self {
        Observatory {
            code: code.into(),
            aliases: Vec::new(),
            kind,
            clock_chain: Vec::new(),
            apply_bipm: false,
        }
    }

    /// Terrestrial site from ITRF coordinates in metres.
    pub fn from_itrf(code: impl Into<String>, x: Meter, y: Meter, z: Meter) -> Result<Self, PulsefitError> {
        let itrf = Vector3::new(NotNan::new(x)?, NotNan::new(y)?, NotNan::new(z)?);
        Ok(Observatory::new(code, ObservatoryKind::Geodetic { itrf }))
    }

    /// Terrestrial site from geodetic coordinates on the WGS84 ellipsoid.
    ///
    /// Arguments
    /// -----------------
    /// * `longitude`: east longitude in degrees.
    /// * `latitude`: geodetic latitude in degrees.
    /// * `height`: height above the ellipsoid in metres.
    pub fn from_geodetic(
        code: impl Into<String>,
        longitude: Degree,
        latitude: Degree,
        height: Meter,
    ) -> Result<Self, PulsefitError> {
        let xyz = geodetic_to_itrf(longitude, latitude, height);
        Observatory::from_itrf(code, xyz.x, xyz.y, xyz.z)
    }

    /// Spacecraft observatory from its geocentric orbit samples.
    pub fn spacecraft(code: impl Into<String>, orbit: HermiteTable) -> Self {
        Observatory::new(
            code,
            ObservatoryKind::Spacecraft {
                orbit: Arc::new(orbit),
            },
        )
    }

    #[must_use]
    pub fn with_clock_chain(mut self, chain: Vec<String>) -> Self {
        self.clock_chain = chain;
        self
    }

    #[must_use]
    pub fn with_bipm(mut self, apply: bool) -> Self {
        self.apply_bipm = apply;
        self
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn kind(&self) -> &ObservatoryKind {
        &self.kind
    }

    pub fn clock_chain(&self) -> &[String] {
        &self.clock_chain
    }

    pub fn apply_bipm(&self) -> bool {
        self.apply_bipm
    }

    /// ITRF position in metres for terrestrial sites.
    pub fn itrf(&self) -> Option<Vector3<f64>> {
        match &self.kind {
            ObservatoryKind::Geodetic { itrf } => Some(itrf.map(|c| c.into_inner())),
            _ => None,
        }
    }

    pub fn is_barycentric(&self) -> bool {
        matches!(self.kind, ObservatoryKind::Barycenter)
    }
}

impl fmt::Display for Observatory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ObservatoryKind::Geodetic { itrf } => format!(
                "ITRF ({:.3}, {:.3}, {:.3}) m",
                itrf.x.into_inner(),
                itrf.y.into_inner(),
                itrf.z.into_inner()
            ),
            ObservatoryKind::Geocenter => "geocenter".into(),
            ObservatoryKind::Barycenter => "barycenter".into(),
            ObservatoryKind::Spacecraft { orbit } => format!("spacecraft ({})", orbit.name()),
        };
        write!(f, "Observatory {} [{kind}]", self.code)?;
        if !self.clock_chain.is_empty() {
            write!(f, " clock chain: {}", self.clock_chain.join(" -> "))?;
        }
        Ok(())
    }
}

/// Geodetic (WGS84) to ITRF Cartesian coordinates in metres.
pub fn geodetic_to_itrf(longitude: Degree, latitude: Degree, height: Meter) -> Vector3<f64> {
    let a = EARTH_MAJOR_AXIS;
    let b = EARTH_MINOR_AXIS;
    let e2 = 1.0 - (b * b) / (a * a);

    let (slat, clat) = (latitude * RADEG).sin_cos();
    let (slon, clon) = (longitude * RADEG).sin_cos();
    let n = a / (1.0 - e2 * slat * slat).sqrt();

    Vector3::new(
        (n + height) * clat * clon,
        (n + height) * clat * slon,
        (n * (1.0 - e2) + height) * slat,
    )
}

/// Lookup of observatories by code or alias (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct ObservatoryRegistry {
    sites: FastMap<String, Arc<Observatory>>,
    aliases: FastMap<String, String>,
}

impl ObservatoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the barycentre, the geocentre and common radio telescopes.
    ///
    /// Terrestrial sites are registered without a clock chain; attach one with
    /// [`ObservatoryRegistry::insert`] once the clock tables are known.
    pub fn with_defaults() -> Self {
        let mut registry = ObservatoryRegistry::new();
        registry.insert(
            Observatory::new("barycenter", ObservatoryKind::Barycenter).with_aliases(&["@", "ssb", "bary"]),
        );
        registry.insert(
            Observatory::new("geocenter", ObservatoryKind::Geocenter).with_aliases(&["coe", "0", "geo"]),
        );

        let sites: [(&str, &[&str], [f64; 3]); 6] = [
            ("gbt", &["1", "gb"], [882589.289, -4924872.368, 3943729.418]),
            ("arecibo", &["3", "ao", "aoutc"], [2390487.080, -5564731.357, 1994720.633]),
            ("parkes", &["7", "pks"], [-4554231.533, 2816759.109, -3454036.323]),
            ("jodrell", &["8", "jb"], [3822625.769, -154105.255, 5086486.256]),
            ("effelsberg", &["g", "eff"], [4033947.146, 486990.898, 4900431.067]),
            ("meerkat", &["m", "mk"], [5109360.133, 2006852.586, -3238948.127]),
        ];
        for (code, aliases, [x, y, z]) in sites {
            if let Ok(obs) = Observatory::from_itrf(code, x, y, z) {
                registry.insert(obs.with_aliases(aliases).with_bipm(true));
            }
        }
        registry
    }

    /// Register an observatory, replacing any previous entry with the same code.
    pub fn insert(&mut self, observatory: Observatory) {
        let code = observatory.code.to_lowercase();
        for alias in &observatory.aliases {
            self.aliases.insert(alias.to_lowercase(), code.clone());
        }
        self.sites.insert(code, Arc::new(observatory));
    }

    /// Find an observatory by code or alias.
    pub fn get(&self, code: &str) -> Result<Arc<Observatory>, PulsefitError> {
        let key = code.to_lowercase();
        let key = self.aliases.get(&key).unwrap_or(&key);
        self.sites
            .get(key)
            .cloned()
            .ok_or_else(|| PulsefitError::UnknownObservatory(code.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
