//! Time offsets applied to selected TOAs.

use crate::constants::Second;
use crate::model::parameter::{ParamSnapshot, Parameter, Unit};
use crate::pulsefit_errors::PulsefitError;
use crate::toa::{Toa, ToaSelector};

/// One `JUMPn` parameter and the TOAs it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct Jump {
    pub name: String,
    pub selector: ToaSelector,
    initial: Second,
}

/// Set of jumps; a positive JUMP delays the model, so it is subtracted from the arrival time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseJump {
    jumps: Vec<Jump>,
}

impl PhaseJump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a jump named `JUMP{n}` with the next free index; returns the name.
    pub fn add(&mut self, selector: ToaSelector, value: Second) -> String {
        let name = format!("JUMP{}", self.jumps.len() + 1);
        self.jumps.push(Jump {
            name: name.clone(),
            selector,
            initial: value,
        });
        name
    }

    pub fn jumps(&self) -> &[Jump] {
        &self.jumps
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        self.jumps
            .iter()
            .map(|j| Parameter::float(j.name.clone(), j.initial, Unit::Second, "Phase jump"))
            .collect()
    }

    pub fn resolve(&self, snap: &ParamSnapshot) -> Result<JumpTerms, PulsefitError> {
        let values = self
            .jumps
            .iter()
            .map(|j| Ok((j.selector.clone(), snap.value(&j.name)?)))
            .collect::<Result<Vec<_>, PulsefitError>>()?;
        let names = self.jumps.iter().map(|j| j.name.clone()).collect();
        Ok(JumpTerms { names, values })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JumpTerms {
    names: Vec<String>,
    values: Vec<(ToaSelector, Second)>,
}

impl JumpTerms {
    pub fn delay(&self, toa: &Toa) -> Second {
        self.values
            .iter()
            .filter(|(sel, _)| sel.matches(toa))
            .map(|(_, v)| -v)
            .sum()
    }

    pub fn delay_derivative(&self, name: &str, toa: &Toa) -> Option<f64> {
        let i = self.names.iter().position(|n| n == name)?;
        Some(if self.values[i].0.matches(toa) { -1.0 } else { 0.0 })
    }
}

#[cfg(test)]
mod jump_test {
    use super::*;
    use crate::model::parameter::ParameterTable;
    use crate::time::SplitMjd;

    #[test]
    fn test_jumps_apply_to_selected_toas() {
        let mut jumps = PhaseJump::new();
        assert_eq!(jumps.add(ToaSelector::flag("be", "A"), 1e-3), "JUMP1");
        assert_eq!(jumps.add(ToaSelector::Observatory("ao".into()), 2e-3), "JUMP2");

        let mut table = ParameterTable::new();
        jumps.parameters().into_iter().for_each(|p| table.insert(p));
        let terms = jumps.resolve(&table.snapshot()).unwrap();

        let a = Toa::new(SplitMjd::new(55000, 0.0), "gbt", 1400.0, 1.0).unwrap().with_flag("be", "A");
        let b = Toa::new(SplitMjd::new(55000, 0.0), "ao", 1400.0, 1.0).unwrap().with_flag("be", "A");
        let c = Toa::new(SplitMjd::new(55000, 0.0), "gbt", 1400.0, 1.0).unwrap();

        assert_eq!(terms.delay(&a), -1e-3);
        approx::assert_relative_eq!(terms.delay(&b), -3e-3, max_relative = 1e-15);
        assert_eq!(terms.delay(&c), 0.0);
        assert_eq!(terms.delay_derivative("JUMP2", &b), Some(-1.0));
        assert_eq!(terms.delay_derivative("JUMP2", &a), Some(0.0));
        assert_eq!(terms.delay_derivative("JUMP3", &a), None);
    }
}
