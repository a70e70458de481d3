//! # Timing model registry
//!
//! [`TimingModel`] owns the ordered component list, the [`ParameterTable`]
//! and the [`NoiseModel`]. It is the only owner of parameter state:
//!
//! - **read phase**: [`TimingModel::snapshot`] freezes the parameters into a
//!   [`ParamSnapshot`], and [`TimingModel::resolve`] turns a snapshot into a
//!   [`ResolvedModel`] consumed by the delay engine;
//! - **write phase**: the fitter calls [`TimingModel::apply_update`] between
//!   evaluations.
//!
//! ## Example
//!
//! ```rust, no_run
//! use pulsefit::model::TimingModel;
//! use pulsefit::model::components::{dispersion::Dispersion, spindown::Spindown};
//! use pulsefit::time::SplitMjd;
//! use pulsefit::toa::ToaSelector;
//!
//! let pepoch = SplitMjd::new(55000, 0.0);
//! let mut model = TimingModel::new("J0000+0000");
//! model.add_component(Spindown::new(&[100.0, -1e-15], pepoch)?)?;
//! model.add_component(Dispersion::new(&[15.0], pepoch)?)?;
//! let jump = model.add_jump(ToaSelector::flag("be", "GUPPI"), 0.0)?;
//! model.set_free(&["F0", "F1", "DM", jump.as_str()])?;
//! # Ok::<(), pulsefit::pulsefit_errors::PulsefitError>(())
//! ```

pub mod components;
pub mod noise;
pub mod parameter;

use crate::constants::FastMap;
use crate::pulsefit_errors::PulsefitError;
use crate::toa::ToaSelector;

use self::components::astrometry::{Astrometry, AstrometryTerms};
use self::components::binary::BinaryTerms;
use self::components::dispersion::DispersionTerms;
use self::components::jump::{JumpTerms, PhaseJump};
use self::components::spindown::SpinTerms;
use self::components::{Component, ComponentKind};
use self::noise::{NoiseKind, NoiseModel};
use self::parameter::{ParamSnapshot, ParamValue, ParameterSpec, ParameterTable};

#[derive(Debug, Clone, PartialEq)]
pub struct TimingModel {
    name: String,
    components: Vec<Component>,
    params: ParameterTable,
    noise: NoiseModel,
}

impl TimingModel {
    pub fn new(name: impl Into<String>) -> Self {
        TimingModel {
            name: name.into(),
            components: Vec::new(),
            params: ParameterTable::new(),
            noise: NoiseModel::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Components in evaluation order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, kind: ComponentKind) -> Option<&Component> {
        self.components.iter().find(|c| c.kind() == kind)
    }

    pub fn has(&self, kind: ComponentKind) -> bool {
        self.component(kind).is_some()
    }

    /// Register a component and its parameters.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::DuplicateComponent`] if a component of the same kind
    ///   is already registered.
    /// * [`PulsefitError::InvalidParameter`] if one of its parameters is
    ///   already defined or its initial value is out of range.
    pub fn add_component(&mut self, component: impl Into<Component>) -> Result<(), PulsefitError> {
        let component = component.into();
        let kind = component.kind();
        if self.has(kind) {
            return Err(PulsefitError::DuplicateComponent(kind.to_string()));
        }

        let params = component.parameters();
        for p in &params {
            if self.params.contains(&p.name) {
                return Err(PulsefitError::InvalidParameter {
                    name: p.name.clone(),
                    reason: format!("already defined when adding the {kind} component"),
                });
            }
            if let ParamValue::Float(v) = p.value {
                p.check_value(v)?;
            }
        }
        params.into_iter().for_each(|p| self.params.insert(p));

        let at = self
            .components
            .iter()
            .position(|c| c.kind().rank() > kind.rank())
            .unwrap_or(self.components.len());
        self.components.insert(at, component);
        Ok(())
    }

    /// Remove a component together with its parameters.
    pub fn remove_component(&mut self, kind: ComponentKind) -> Result<Component, PulsefitError> {
        let at = self
            .components
            .iter()
            .position(|c| c.kind() == kind)
            .ok_or_else(|| PulsefitError::MissingComponent(kind.to_string()))?;
        let component = self.components.remove(at);
        for p in component.parameters() {
            self.params.remove(&p.name);
        }
        Ok(component)
    }

    /// Add a time jump (seconds) on the selected TOAs; returns the new `JUMPn` name.
    pub fn add_jump(&mut self, selector: ToaSelector, value: f64) -> Result<String, PulsefitError> {
        if !self.has(ComponentKind::PhaseJump) {
            self.add_component(PhaseJump::new())?;
        }
        let Some(Component::PhaseJump(jumps)) = self
            .components
            .iter_mut()
            .find(|c| c.kind() == ComponentKind::PhaseJump)
        else {
            return Err(PulsefitError::MissingComponent(ComponentKind::PhaseJump.to_string()));
        };
        let name = jumps.add(selector, value);
        if let Some(p) = jumps.parameters().into_iter().find(|p| p.name == name) {
            self.params.insert(p);
        }
        Ok(name)
    }

    /// Add an EFAC (dimensionless), EQUAD or ECORR (µs) term; returns its name.
    pub fn add_noise(&mut self, kind: NoiseKind, selector: ToaSelector, value: f64) -> Result<String, PulsefitError> {
        let mut noise = self.noise.clone();
        let param = noise.add(kind, selector, value);
        param.check_value(value)?;
        let name = param.name.clone();
        self.params.insert(param);
        self.noise = noise;
        Ok(name)
    }

    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    pub fn params(&self) -> &ParameterTable {
        &self.params
    }

    /// Mutable access to the parameters, for the write phase between evaluations.
    pub fn params_mut(&mut self) -> &mut ParameterTable {
        &mut self.params
    }

    /// Mark parameters as free (fitted).
    pub fn set_free(&mut self, names: &[&str]) -> Result<(), PulsefitError> {
        for name in names {
            self.params.get(name)?;
        }
        for name in names {
            self.params.set_frozen(name, false)?;
        }
        Ok(())
    }

    /// Mark parameters as frozen.
    pub fn freeze(&mut self, names: &[&str]) -> Result<(), PulsefitError> {
        for name in names {
            self.params.get(name)?;
        }
        for name in names {
            self.params.set_frozen(name, true)?;
        }
        Ok(())
    }

    pub fn free_parameters(&self) -> Vec<String> {
        self.params.free_parameters()
    }

    pub fn snapshot(&self) -> ParamSnapshot {
        self.params.snapshot()
    }

    /// Write fitted values and uncertainties back into the table.
    ///
    /// All deltas are validated first; a failing update changes nothing.
    pub fn apply_update(&mut self, names: &[String], deltas: &[f64], sigmas: &[f64]) -> Result<(), PulsefitError> {
        if names.len() != deltas.len() || names.len() != sigmas.len() {
            return Err(PulsefitError::DimensionMismatch {
                expected: names.len(),
                got: deltas.len().min(sigmas.len()),
            });
        }
        let mut updated = self.params.clone();
        for ((name, delta), sigma) in names.iter().zip(deltas).zip(sigmas) {
            updated.shift(name, *delta)?;
            updated.set_uncertainty(name, *sigma)?;
        }
        self.params = updated;
        Ok(())
    }

    pub fn to_map(&self) -> FastMap<String, ParameterSpec> {
        self.params.to_map()
    }

    pub fn update_from_map(&mut self, map: &FastMap<String, ParameterSpec>) -> Result<(), PulsefitError> {
        self.params.update_from_map(map)
    }

    /// Component owning a parameter.
    pub fn owner(&self, name: &str) -> Option<ComponentKind> {
        self.components
            .iter()
            .find(|c| c.parameters().iter().any(|p| p.name == name))
            .map(Component::kind)
    }

    /// Declared finite-difference step of a parameter without an analytic derivative.
    pub fn fd_step(&self, name: &str) -> Option<f64> {
        self.components.iter().find_map(|c| c.fd_step(name))
    }

    /// Resolve every component against a snapshot.
    ///
    /// Errors
    /// ----------
    /// * [`PulsefitError::MissingComponent`] without a spin-down component.
    /// * [`PulsefitError::UnknownParameter`] if the snapshot lacks a parameter.
    pub fn resolve(&self, snap: &ParamSnapshot) -> Result<ResolvedModel, PulsefitError> {
        let mut astrometry = None;
        let mut solar_shapiro = false;
        let mut dispersion = None;
        let mut binary = None;
        let mut jumps = None;
        let mut spin = None;

        for component in &self.components {
            match component {
                Component::Astrometry(_) => astrometry = Some(Astrometry::resolve(snap)?),
                Component::SolarSystemShapiro(_) => solar_shapiro = true,
                Component::Dispersion(c) => dispersion = Some(c.resolve(snap)?),
                Component::Binary(c) => binary = Some(c.resolve(snap)?),
                Component::PhaseJump(c) => jumps = Some(c.resolve(snap)?),
                Component::Spindown(c) => spin = Some(c.resolve(snap)?),
            }
        }

        Ok(ResolvedModel {
            snapshot: snap.clone(),
            astrometry,
            solar_shapiro,
            dispersion,
            binary,
            jumps,
            spin: spin.ok_or_else(|| PulsefitError::MissingComponent(ComponentKind::Spindown.to_string()))?,
        })
    }
}

/// All components of a model evaluated at one parameter point.
///
/// Fields follow the evaluation order of the delay chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub snapshot: ParamSnapshot,
    pub astrometry: Option<AstrometryTerms>,
    pub solar_shapiro: bool,
    pub dispersion: Option<DispersionTerms>,
    pub binary: Option<BinaryTerms>,
    pub jumps: Option<JumpTerms>,
    pub spin: SpinTerms,
}

#[cfg(test)]
mod timing_model_test {
    use super::*;
    use crate::model::components::binary::Binary;
    use crate::model::components::dispersion::Dispersion;
    use crate::model::components::solar_shapiro::SolarSystemShapiro;
    use crate::model::components::spindown::Spindown;
    use crate::model::parameter::Unit;
    use crate::time::SplitMjd;

    fn model() -> TimingModel {
        let epoch = SplitMjd::new(55000, 0.0);
        let mut m = TimingModel::new("J1234+5678");
        m.add_component(Spindown::new(&[100.0, -1e-15], epoch).unwrap()).unwrap();
        m.add_component(Dispersion::new(&[10.0], epoch).unwrap()).unwrap();
        m.add_component(Astrometry::new(1.0, 0.2, epoch)).unwrap();
        m
    }

    #[test]
    fn test_components_are_ordered_and_unique() {
        let mut m = model();
        m.add_component(SolarSystemShapiro).unwrap();
        let kinds: Vec<_> = m.components().iter().map(Component::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ComponentKind::Astrometry,
                ComponentKind::SolarSystemShapiro,
                ComponentKind::Dispersion,
                ComponentKind::Spindown
            ]
        );
        let err = m.add_component(Dispersion::new(&[1.0], SplitMjd::new(55000, 0.0)).unwrap()).unwrap_err();
        assert_eq!(err, PulsefitError::DuplicateComponent("dispersion".into()));
    }

    #[test]
    fn test_remove_component_drops_parameters() {
        let mut m = model();
        m.remove_component(ComponentKind::Dispersion).unwrap();
        assert!(!m.params().contains("DM"));
        assert!(!m.params().contains("DMEPOCH"));
        assert!(m.remove_component(ComponentKind::Binary).is_err());
    }

    #[test]
    fn test_jumps_and_noise_names() {
        let mut m = model();
        assert_eq!(m.add_jump(ToaSelector::flag("be", "A"), 0.0).unwrap(), "JUMP1");
        assert_eq!(m.add_jump(ToaSelector::flag("be", "B"), 1e-6).unwrap(), "JUMP2");
        assert_eq!(m.params().value("JUMP2").unwrap(), 1e-6);
        assert_eq!(m.owner("JUMP2"), Some(ComponentKind::PhaseJump));

        assert_eq!(m.add_noise(NoiseKind::Efac, ToaSelector::All, 1.1).unwrap(), "EFAC1");
        assert!(m.add_noise(NoiseKind::Efac, ToaSelector::All, -1.0).is_err());
        assert_eq!(m.noise().terms().len(), 1);
    }

    #[test]
    fn test_free_and_update() {
        let mut m = model();
        m.set_free(&["F0", "DM"]).unwrap();
        assert_eq!(m.free_parameters(), vec!["F0".to_string(), "DM".to_string()]);
        assert!(m.set_free(&["F0", "NOPE"]).is_err());
        assert_eq!(m.free_parameters().len(), 2);

        m.apply_update(&m.free_parameters(), &[1e-6, 0.5], &[1e-9, 1e-3]).unwrap();
        assert_eq!(m.params().value("DM").unwrap(), 10.5);
        assert_eq!(m.params().get("F0").unwrap().uncertainty, 1e-9);
    }

    #[test]
    fn test_resolve_needs_spindown() {
        let mut m = TimingModel::new("psr");
        m.add_component(Binary::ell1(1.0, 1.0, SplitMjd::new(55000, 0.0), 0.0, 0.0)).unwrap();
        assert_eq!(
            m.resolve(&m.snapshot()).unwrap_err(),
            PulsefitError::MissingComponent("spin-down".into())
        );
        assert_eq!(m.fd_step("PB"), Some(1e-9));
        assert_eq!(m.fd_step("F0"), None);

        let m = model();
        let resolved = m.resolve(&m.snapshot()).unwrap();
        assert!(resolved.astrometry.is_some() && resolved.binary.is_none());
        assert!(m.clone().params_mut().set_value("DM", 3.0, Unit::Second).is_err());
    }
}
