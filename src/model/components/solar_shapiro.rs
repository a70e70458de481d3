//! Shapiro delay of the pulse passing the Sun.

use nalgebra::Vector3;

use crate::constants::{Second, AU_LIGHT_SECONDS, T_SUN};
use crate::observatories::site_position::SiteKinematics;

/// Solar-system Shapiro delay; parameter-free, needs the pulsar direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolarSystemShapiro;

impl SolarSystemShapiro {
    /// `−2 T☉ ln((|r☉| − r☉·n̂) / 1 AU)`, with `r☉` the site→Sun vector.
    ///
    /// Zero at the barycentre (no Sun vector).
    pub fn delay(kin: &SiteKinematics, direction: &Vector3<f64>) -> Second {
        match kin.sun_position {
            Some(rs) => {
                let r = rs.norm();
                let arg = (r - rs.dot(direction)) / AU_LIGHT_SECONDS;
                if arg > 0.0 {
                    -2.0 * T_SUN * arg.ln()
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}
