//! Explicit forward Euler.

use crate::equation::{Equation, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet};
use crate::mesh::Geometry;

use super::{Forcing, StepperState, TimeStepper};

/// First-order explicit Euler step,
/// `M u_{n+1} = M u_n + dt R(u_n)`.
pub struct ForwardEuler<E: Equation> {
    equation: E,
    field: FieldId,
    solution_old: Vec<f64>,
    fields_old: Option<FieldSet>,
    residual: Vec<f64>,
    rhs: Vec<f64>,
    state: StepperState,
}

impl<E: Equation> ForwardEuler<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            solution_old: vec![0.0; n],
            fields_old: None,
            residual: vec![0.0; n],
            rhs: vec![0.0; n],
            state: StepperState::Uninitialized,
        }
    }
}

impl<E: Equation> TimeStepper for ForwardEuler<E> {
    fn name(&self) -> &'static str {
        "ForwardEuler"
    }

    fn initialize(&mut self, fields: &FieldSet) -> Result<()> {
        fields.require(self.field)?;
        let values = fields.values(self.field);
        if values.len() != self.equation.n_dofs() {
            return Err(ModelError::ShapeMismatch {
                field: self.field,
                actual: values.len(),
                expected: self.equation.n_dofs(),
            });
        }
        self.solution_old.copy_from_slice(values);
        self.fields_old = Some(fields.clone());
        self.state = StepperState::Ready;
        Ok(())
    }

    fn advance(
        &mut self,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()> {
        self.state.ensure_ready(self.name())?;
        if let Some(f) = forcing {
            f(t + dt);
        }

        let geometry = Geometry::capture(fields);
        self.solution_old.copy_from_slice(fields.values(self.field));

        let fields_old = self.fields_old.as_ref().ok_or(ModelError::NotInitialized(
            "ForwardEuler",
        ))?;
        self.equation.residual(
            TermGroup::All,
            &self.solution_old,
            &self.solution_old,
            fields_old,
            fields_old,
            t,
            &mut self.residual,
        );
        self.equation
            .apply_mass(&geometry, &self.solution_old, &mut self.rhs);
        fields::axpy(&mut self.rhs, dt, &self.residual);
        self.equation
            .solve_mass(&geometry, &self.rhs, fields.values_mut(self.field))?;

        if let Some(old) = self.fields_old.as_mut() {
            *old = fields.clone();
        }
        Ok(())
    }
}
