//! θ-weighted Crank–Nicolson.

use crate::equation::{Equation, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet};
use crate::mesh::Geometry;
use crate::solver::{picard_solve, SolverOptions};

use super::{Forcing, StepperState, TimeStepper};

/// Implicit θ-scheme,
/// `M u_{n+1} = M u_n + dt [θ R(u_{n+1}) + (1-θ) R(u_n)]`.
///
/// `θ = 0.5` is the classical trapezoidal rule; `θ = 1` is backward
/// Euler. In semi-implicit mode the nonlinear coefficients are frozen at
/// the step-start state, so one Picard sweep linearizes the stage.
pub struct CrankNicolson<E: Equation> {
    equation: E,
    field: FieldId,
    theta: f64,
    semi_implicit: bool,
    solver: SolverOptions,
    solution_old: Vec<f64>,
    fields_old: Option<FieldSet>,
    rhs: Vec<f64>,
    residual: Vec<f64>,
    tmp: Vec<f64>,
    state: StepperState,
}

impl<E: Equation> CrankNicolson<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            theta: 0.5,
            semi_implicit: false,
            solver: SolverOptions::default(),
            solution_old: vec![0.0; n],
            fields_old: None,
            rhs: vec![0.0; n],
            residual: vec![0.0; n],
            tmp: vec![0.0; n],
            state: StepperState::Uninitialized,
        }
    }

    /// Implicitness weight θ ∈ (0, 1].
    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    /// Freeze nonlinear coefficients at the step-start state.
    pub fn with_semi_implicit(mut self) -> Self {
        self.semi_implicit = true;
        self
    }

    pub fn with_solver_options(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }
}

impl<E: Equation> TimeStepper for CrankNicolson<E> {
    fn name(&self) -> &'static str {
        "CrankNicolson"
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
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("CrankNicolson")),
        };

        // Explicit part: M u_n + dt (1-θ) R(u_n).
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
        fields::axpy(&mut self.rhs, dt * (1.0 - self.theta), &self.residual);

        let theta = self.theta;
        let semi_implicit = self.semi_implicit;
        let mut u = fields.values(self.field).to_vec();
        picard_solve("CrankNicolson", 0, &self.solver, &mut u, |x, out| {
            let u_nl = if semi_implicit { &self.solution_old[..] } else { x };
            self.equation.residual(
                TermGroup::All,
                x,
                u_nl,
                fields,
                fields_old,
                t + dt,
                &mut self.residual,
            );
            self.tmp.copy_from_slice(&self.rhs);
            fields::axpy(&mut self.tmp, dt * theta, &self.residual);
            self.equation.solve_mass(&geometry, &self.tmp, out)
        })?;
        fields.values_mut(self.field).copy_from_slice(&u);

        if let Some(old) = self.fields_old.as_mut() {
            *old = fields.clone();
        }
        Ok(())
    }
}
