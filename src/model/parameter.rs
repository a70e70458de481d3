//! Model parameters and the parameter table.
//!
//! A [`Parameter`] has a name, a value with a physical [`Unit`], a 1σ
//! uncertainty, a frozen/free flag and an optional valid range. Epoch-valued
//! parameters (PEPOCH, T0, TASC, …) keep full [`SplitMjd`] precision and are
//! fitted in days.
//!
//! The [`ParameterTable`] is owned by the [`TimingModel`](crate::model::TimingModel).
//! Evaluations read an immutable [`ParamSnapshot`]; the fitter writes new
//! values into the table only between evaluations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::FastMap;
use crate::pulsefit_errors::PulsefitError;
use crate::time::SplitMjd;

/// Physical unit of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Dimensionless,
    Second,
    Microsecond,
    Day,
    Mjd,
    /// Spin frequency derivative of order k: Hz/s^k.
    SpinDerivative(u8),
    Radian,
    Degree,
    DegreePerYear,
    Mas,
    MasPerYear,
    /// Dispersion-measure derivative of order k: pc cm⁻³ / yr^k.
    DispersionMeasure(u8),
    LightSecond,
    LightSecondPerSecond,
    SolarMass,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Dimensionless => write!(f, ""),
            Unit::Second => write!(f, "s"),
            Unit::Microsecond => write!(f, "us"),
            Unit::Day => write!(f, "d"),
            Unit::Mjd => write!(f, "MJD"),
            Unit::SpinDerivative(0) => write!(f, "Hz"),
            Unit::SpinDerivative(k) => write!(f, "Hz/s^{k}"),
            Unit::Radian => write!(f, "rad"),
            Unit::Degree => write!(f, "deg"),
            Unit::DegreePerYear => write!(f, "deg/yr"),
            Unit::Mas => write!(f, "mas"),
            Unit::MasPerYear => write!(f, "mas/yr"),
            Unit::DispersionMeasure(0) => write!(f, "pc/cm3"),
            Unit::DispersionMeasure(k) => write!(f, "pc/cm3/yr^{k}"),
            Unit::LightSecond => write!(f, "ls"),
            Unit::LightSecondPerSecond => write!(f, "ls/s"),
            Unit::SolarMass => write!(f, "Msun"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f64),
    Epoch(SplitMjd),
}

impl ParamValue {
    /// Value as `f64` (an epoch gives its low-precision MJD).
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Float(v) => *v,
            ParamValue::Epoch(t) => t.to_mjd(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{v:.15e}"),
            ParamValue::Epoch(t) => write!(f, "{t}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
    pub unit: Unit,
    pub uncertainty: f64,
    pub frozen: bool,
    /// Inclusive valid interval for `Float` values.
    pub range: Option<(f64, f64)>,
    pub description: String,
}

impl Parameter {
    /// A frozen float parameter.
    pub fn float(name: impl Into<String>, value: f64, unit: Unit, description: &str) -> Self {
        Parameter {
            name: name.into(),
            value: ParamValue::Float(value),
            unit,
            uncertainty: 0.0,
            frozen: true,
            range: None,
            description: description.to_string(),
        }
    }

    /// A frozen epoch parameter (unit MJD).
    pub fn epoch(name: impl Into<String>, value: SplitMjd, description: &str) -> Self {
        Parameter {
            name: name.into(),
            value: ParamValue::Epoch(value),
            unit: Unit::Mjd,
            uncertainty: 0.0,
            frozen: true,
            range: None,
            description: description.to_string(),
        }
    }

    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub(crate) fn check_value(&self, value: f64) -> Result<(), PulsefitError> {
        if !value.is_finite() {
            return Err(PulsefitError::InvalidParameter {
                name: self.name.clone(),
                reason: format!("value must be finite, got {value}"),
            });
        }
        if let Some((min, max)) = self.range {
            if !(min..=max).contains(&value) {
                return Err(PulsefitError::InvalidParameter {
                    name: self.name.clone(),
                    reason: format!("value {value} outside valid range [{min}, {max}]"),
                });
            }
        }
        Ok(())
    }

    fn check_unit(&self, unit: Unit) -> Result<(), PulsefitError> {
        if unit != self.unit {
            return Err(PulsefitError::InvalidParameter {
                name: self.name.clone(),
                reason: format!("expected unit '{}', got '{unit}'", self.unit),
            });
        }
        Ok(())
    }

    /// Shift the value by `delta` (days for epochs), with range checking.
    fn shift(&mut self, delta: f64) -> Result<(), PulsefitError> {
        match self.value {
            ParamValue::Float(v) => {
                self.check_value(v + delta)?;
                self.value = ParamValue::Float(v + delta);
            }
            ParamValue::Epoch(t) => {
                if !delta.is_finite() {
                    return Err(PulsefitError::InvalidParameter {
                        name: self.name.clone(),
                        reason: "epoch shift must be finite".into(),
                    });
                }
                self.value = ParamValue::Epoch(t.add_days(delta));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:>28} {:>10} +/- {:.3e} {}",
            self.name,
            self.value.to_string(),
            self.unit.to_string(),
            self.uncertainty,
            if self.frozen { "" } else { "(free)" }
        )
    }
}

/// External (file-format independent) form of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub value: ParamValue,
    pub uncertainty: f64,
    pub unit: Unit,
    pub frozen: bool,
}

/// Ordered parameter storage with lookup by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    params: Vec<Parameter>,
    index: FastMap<String, usize>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter; an existing parameter of the same name is kept.
    pub fn insert(&mut self, param: Parameter) {
        if self.index.contains_key(&param.name) {
            return;
        }
        self.index.insert(param.name.clone(), self.params.len());
        self.params.push(param);
    }

    /// Remove a parameter by name.
    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        let i = self.index.remove(name)?;
        let removed = self.params.remove(i);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(removed)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Parameter, PulsefitError> {
        self.index
            .get(name)
            .map(|&i| &self.params[i])
            .ok_or_else(|| PulsefitError::UnknownParameter(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Parameter, PulsefitError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.params[i]),
            None => Err(PulsefitError::UnknownParameter(name.to_string())),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Float value of a parameter.
    pub fn value(&self, name: &str) -> Result<f64, PulsefitError> {
        match self.get(name)?.value {
            ParamValue::Float(v) => Ok(v),
            ParamValue::Epoch(_) => Err(PulsefitError::InvalidParameter {
                name: name.to_string(),
                reason: "is an epoch, not a float".into(),
            }),
        }
    }

    /// Epoch value of a parameter.
    pub fn epoch(&self, name: &str) -> Result<SplitMjd, PulsefitError> {
        match self.get(name)?.value {
            ParamValue::Epoch(t) => Ok(t),
            ParamValue::Float(_) => Err(PulsefitError::InvalidParameter {
                name: name.to_string(),
                reason: "is a float, not an epoch".into(),
            }),
        }
    }

    /// Set a float value, checking unit and range.
    pub fn set_value(&mut self, name: &str, value: f64, unit: Unit) -> Result<(), PulsefitError> {
        let p = self.get_mut(name)?;
        p.check_unit(unit)?;
        if let ParamValue::Epoch(_) = p.value {
            return Err(PulsefitError::InvalidParameter {
                name: name.to_string(),
                reason: "is an epoch; use set_epoch".into(),
            });
        }
        p.check_value(value)?;
        p.value = ParamValue::Float(value);
        Ok(())
    }

    pub fn set_epoch(&mut self, name: &str, value: SplitMjd) -> Result<(), PulsefitError> {
        let p = self.get_mut(name)?;
        if let ParamValue::Float(_) = p.value {
            return Err(PulsefitError::InvalidParameter {
                name: name.to_string(),
                reason: "is a float; use set_value".into(),
            });
        }
        p.value = ParamValue::Epoch(value);
        Ok(())
    }

    pub fn set_frozen(&mut self, name: &str, frozen: bool) -> Result<(), PulsefitError> {
        self.get_mut(name)?.frozen = frozen;
        Ok(())
    }

    pub fn set_uncertainty(&mut self, name: &str, uncertainty: f64) -> Result<(), PulsefitError> {
        self.get_mut(name)?.uncertainty = uncertainty;
        Ok(())
    }

    /// Add `delta` to a parameter (days for epochs).
    pub fn shift(&mut self, name: &str, delta: f64) -> Result<(), PulsefitError> {
        self.get_mut(name)?.shift(delta)
    }

    /// Names of the free parameters, in table order.
    pub fn free_parameters(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| !p.frozen)
            .map(|p| p.name.clone())
            .collect()
    }

    /// External mapping `name → (value, uncertainty, unit, frozen)`.
    pub fn to_map(&self) -> FastMap<String, ParameterSpec> {
        self.params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    ParameterSpec {
                        value: p.value,
                        uncertainty: p.uncertainty,
                        unit: p.unit,
                        frozen: p.frozen,
                    },
                )
            })
            .collect()
    }

    /// Update values from an external mapping.
    ///
    /// Every entry is validated before anything is written, so a failing update
    /// leaves the table unchanged.
    pub fn update_from_map(&mut self, map: &FastMap<String, ParameterSpec>) -> Result<(), PulsefitError> {
        for (name, spec) in map {
            let p = self.get(name)?;
            p.check_unit(spec.unit)?;
            match (p.value, spec.value) {
                (ParamValue::Float(_), ParamValue::Float(v)) => p.check_value(v)?,
                (ParamValue::Epoch(_), ParamValue::Epoch(_)) => {}
                _ => {
                    return Err(PulsefitError::InvalidParameter {
                        name: name.clone(),
                        reason: "value kind (float/epoch) does not match".into(),
                    })
                }
            }
        }
        for (name, spec) in map {
            let p = self.get_mut(name)?;
            p.value = spec.value;
            p.uncertainty = spec.uncertainty;
            p.frozen = spec.frozen;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> ParamSnapshot {
        ParamSnapshot(Arc::new(self.clone()))
    }
}

/// Immutable view of the parameter table used during one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSnapshot(Arc<ParameterTable>);

impl ParamSnapshot {
    pub fn table(&self) -> &ParameterTable {
        &self.0
    }

    pub fn value(&self, name: &str) -> Result<f64, PulsefitError> {
        self.0.value(name)
    }

    pub fn epoch(&self, name: &str) -> Result<SplitMjd, PulsefitError> {
        self.0.epoch(name)
    }

    /// A copy of this snapshot with one parameter shifted (days for epochs).
    ///
    /// Used for finite-difference derivatives; range limits are not enforced so
    /// that a parameter at its bound can still be differentiated.
    pub fn with_shift(&self, name: &str, delta: f64) -> Result<ParamSnapshot, PulsefitError> {
        let mut table = (*self.0).clone();
        let p = table.get_mut(name)?;
        p.value = match p.value {
            ParamValue::Float(v) => ParamValue::Float(v + delta),
            ParamValue::Epoch(t) => ParamValue::Epoch(t.add_days(delta)),
        };
        Ok(ParamSnapshot(Arc::new(table)))
    }
}

impl std::ops::Deref for ParamSnapshot {
    type Target = ParameterTable;

    fn deref(&self) -> &ParameterTable {
        &self.0
    }
}

#[cfg(test)]
mod parameter_test {
    use super::*;

    fn table() -> ParameterTable {
        let mut t = ParameterTable::new();
        t.insert(Parameter::float("F0", 100.0, Unit::SpinDerivative(0), "spin frequency"));
        t.insert(Parameter::float("ECC", 0.1, Unit::Dimensionless, "eccentricity").with_range(0.0, 1.0));
        t.insert(Parameter::epoch("PEPOCH", SplitMjd::new(55000, 0.0), "spin epoch"));
        t
    }

    #[test]
    fn test_unit_and_range_checks() {
        let mut t = table();
        assert!(t.set_value("F0", 101.0, Unit::SpinDerivative(0)).is_ok());
        let err = t.set_value("F0", 101.0, Unit::Second).unwrap_err();
        assert!(matches!(err, PulsefitError::InvalidParameter { .. }));
        assert!(t.set_value("ECC", 1.5, Unit::Dimensionless).is_err());
        assert_eq!(t.value("ECC").unwrap(), 0.1);
        assert!(t.set_value("PEPOCH", 1.0, Unit::Mjd).is_err());
        assert_eq!(
            t.value("NOPE").unwrap_err(),
            PulsefitError::UnknownParameter("NOPE".into())
        );
    }

    #[test]
    fn test_epoch_shift() {
        let mut t = table();
        t.shift("PEPOCH", 1.5).unwrap();
        assert_eq!(t.epoch("PEPOCH").unwrap(), SplitMjd::new(55001, 0.5));
    }

    #[test]
    fn test_map_roundtrip_is_atomic() {
        let mut t = table();
        let mut map = t.to_map();
        map.get_mut("F0").unwrap().value = ParamValue::Float(99.0);
        map.get_mut("ECC").unwrap().value = ParamValue::Float(2.0);
        assert!(t.update_from_map(&map).is_err());
        assert_eq!(t.value("F0").unwrap(), 100.0);

        map.get_mut("ECC").unwrap().value = ParamValue::Float(0.2);
        map.get_mut("F0").unwrap().frozen = false;
        t.update_from_map(&map).unwrap();
        assert_eq!(t.value("F0").unwrap(), 99.0);
        assert_eq!(t.free_parameters(), vec!["F0".to_string()]);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let mut t = table();
        let snap = t.snapshot();
        t.set_value("F0", 50.0, Unit::SpinDerivative(0)).unwrap();
        assert_eq!(snap.value("F0").unwrap(), 100.0);
        let shifted = snap.with_shift("F0", 1.0).unwrap();
        assert_eq!(shifted.value("F0").unwrap(), 101.0);
    }

    #[test]
    fn test_remove_keeps_index() {
        let mut t = table();
        t.remove("F0").unwrap();
        assert_eq!(t.value("ECC").unwrap(), 0.1);
        assert!(t.epoch("PEPOCH").is_ok());
    }
}
