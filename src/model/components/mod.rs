//! # Timing-model components
//!
//! Components are a closed set of variants evaluated in a fixed, declared
//! order. Each one
//!
//! - declares its parameters with default values ([`Component::parameters`]),
//! - resolves them from a [`ParamSnapshot`] into plain numbers once per
//!   evaluation (`*Terms` structs),
//! - computes its delay and, where a closed form exists, its partial
//!   derivatives.
//!
//! Delay order (rank) and what each delay sees:
//!
//! | rank | component            | time argument                         |
//! |------|----------------------|---------------------------------------|
//! | 0    | astrometry           | site TDB                              |
//! | 1    | solar-system Shapiro | site TDB                              |
//! | 2    | dispersion           | site TDB, SSB-frame frequency         |
//! | 3    | binary               | TDB minus all upstream delays         |
//! | 4    | jumps                | none (per-TOA offset)                 |
//!
//! Spin-down has no delay: it turns the total delay into a phase.

pub mod astrometry;
pub mod binary;
pub mod dispersion;
pub mod jump;
pub mod solar_shapiro;
pub mod spindown;

use std::fmt;

use crate::model::parameter::Parameter;

use self::astrometry::Astrometry;
use self::binary::Binary;
use self::dispersion::Dispersion;
use self::jump::PhaseJump;
use self::solar_shapiro::SolarSystemShapiro;
use self::spindown::Spindown;

/// Identity of a component; one component of each kind per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Astrometry,
    SolarSystemShapiro,
    Dispersion,
    Binary,
    PhaseJump,
    Spindown,
}

impl ComponentKind {
    /// Evaluation order; spin-down comes last, after every delay.
    pub fn rank(&self) -> u8 {
        match self {
            ComponentKind::Astrometry => 0,
            ComponentKind::SolarSystemShapiro => 1,
            ComponentKind::Dispersion => 2,
            ComponentKind::Binary => 3,
            ComponentKind::PhaseJump => 4,
            ComponentKind::Spindown => 5,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Astrometry => "astrometry",
            ComponentKind::SolarSystemShapiro => "solar-system Shapiro",
            ComponentKind::Dispersion => "dispersion",
            ComponentKind::Binary => "binary",
            ComponentKind::PhaseJump => "phase jump",
            ComponentKind::Spindown => "spin-down",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Astrometry(Astrometry),
    SolarSystemShapiro(SolarSystemShapiro),
    Dispersion(Dispersion),
    Binary(Binary),
    PhaseJump(PhaseJump),
    Spindown(Spindown),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Astrometry(_) => ComponentKind::Astrometry,
            Component::SolarSystemShapiro(_) => ComponentKind::SolarSystemShapiro,
            Component::Dispersion(_) => ComponentKind::Dispersion,
            Component::Binary(_) => ComponentKind::Binary,
            Component::PhaseJump(_) => ComponentKind::PhaseJump,
            Component::Spindown(_) => ComponentKind::Spindown,
        }
    }

    /// Parameters of the component, with their initial values.
    pub fn parameters(&self) -> Vec<Parameter> {
        match self {
            Component::Astrometry(c) => c.parameters(),
            Component::SolarSystemShapiro(_) => Vec::new(),
            Component::Dispersion(c) => c.parameters(),
            Component::Binary(c) => c.parameters(),
            Component::PhaseJump(c) => c.parameters(),
            Component::Spindown(c) => c.parameters(),
        }
    }

    /// Finite-difference step for a parameter of this component without a
    /// closed-form derivative.
    pub fn fd_step(&self, name: &str) -> Option<f64> {
        match self {
            Component::Binary(_) => Binary::fd_step(name),
            // Epochs of astrometry and dispersion: days
            Component::Astrometry(_) if name == "POSEPOCH" => Some(1e-2),
            Component::Dispersion(_) if name == "DMEPOCH" => Some(1e-2),
            _ => None,
        }
    }
}

impl From<Astrometry> for Component {
    fn from(c: Astrometry) -> Self {
        Component::Astrometry(c)
    }
}

impl From<SolarSystemShapiro> for Component {
    fn from(c: SolarSystemShapiro) -> Self {
        Component::SolarSystemShapiro(c)
    }
}

impl From<Dispersion> for Component {
    fn from(c: Dispersion) -> Self {
        Component::Dispersion(c)
    }
}

impl From<Binary> for Component {
    fn from(c: Binary) -> Self {
        Component::Binary(c)
    }
}

impl From<PhaseJump> for Component {
    fn from(c: PhaseJump) -> Self {
        Component::PhaseJump(c)
    }
}

impl From<Spindown> for Component {
    fn from(c: Spindown) -> Self {
        Component::Spindown(c)
    }
}
