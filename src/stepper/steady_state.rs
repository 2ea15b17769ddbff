//! Steady-state solve by pseudo-timestepping.

use crate::equation::{Equation, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet};
use crate::mesh::Geometry;
use crate::solver::{picard_solve, SolverOptions};

use super::{Forcing, StepperState, TimeStepper};

/// Drives the residual to zero instead of advancing in time.
///
/// Each `advance` call iterates `u ← u + τ M⁻¹ R(u)` until the update
/// stalls; `dt` is ignored. Used for spin-up problems where only the
/// equilibrium state is of interest.
pub struct SteadyState<E: Equation> {
    equation: E,
    field: FieldId,
    pseudo_step: f64,
    solver: SolverOptions,
    fields_old: Option<FieldSet>,
    residual: Vec<f64>,
    increment: Vec<f64>,
    state: StepperState,
}

impl<E: Equation> SteadyState<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            pseudo_step: 1.0,
            solver: SolverOptions::default(),
            fields_old: None,
            residual: vec![0.0; n],
            increment: vec![0.0; n],
            state: StepperState::Uninitialized,
        }
    }

    /// Pseudo-time step τ of the relaxation iteration.
    pub fn with_pseudo_step(mut self, tau: f64) -> Self {
        self.pseudo_step = tau;
        self
    }

    pub fn with_solver_options(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }
}

impl<E: Equation> TimeStepper for SteadyState<E> {
    fn name(&self) -> &'static str {
        "SteadyState"
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
        self.fields_old = Some(fields.clone());
        self.state = StepperState::Ready;
        Ok(())
    }

    fn advance(
        &mut self,
        t: f64,
        _dt: f64,
        fields: &mut FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()> {
        self.state.ensure_ready(self.name())?;
        if let Some(f) = forcing {
            f(t);
        }

        let geometry = Geometry::capture(fields);
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("SteadyState")),
        };

        let tau = self.pseudo_step;
        let mut u = fields.values(self.field).to_vec();
        picard_solve("SteadyState", 0, &self.solver, &mut u, |x, out| {
            self.equation.residual(
                TermGroup::All,
                x,
                x,
                fields,
                fields_old,
                t,
                &mut self.residual,
            );
            self.equation
                .solve_mass(&geometry, &self.residual, &mut self.increment)?;
            out.copy_from_slice(x);
            fields::axpy(out, tau, &self.increment);
            Ok(())
        })?;
        fields.values_mut(self.field).copy_from_slice(&u);

        if let Some(old) = self.fields_old.as_mut() {
            *old = fields.clone();
        }
        Ok(())
    }
}
