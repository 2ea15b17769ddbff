//! Pressure-projection θ-scheme with outer Picard iterations.

use crate::equation::{Equation, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, solution2d, FieldId, FieldSet};
use crate::mesh::Geometry;
use crate::solver::{picard_solve, SolverOptions};

use super::{Forcing, StepperState, TimeStepper};

/// θ-scheme for the 2D shallow-water system split into a momentum
/// predictor and a free-surface pressure solve.
///
/// `equation` is the wave system over the packed `(u, v, η)` solution and
/// must contain only the terms treated in the projection step (surface
/// pressure gradient and depth-integrated divergence); `equation_mom`
/// carries the remaining momentum terms (advection, friction, viscosity)
/// over the `(u, v)` sub-vector. Each outer Picard iteration lags the
/// nonlinearities at the previous iterate:
///
/// ```text
/// M_uv uv* = M_uv uvⁿ + dt [θ R_mom(uv*, lag) + (1-θ) R_mom(uvⁿ)]
/// M x      = M (uv*, ηⁿ) + dt [θ R_sys(x, lag) + (1-θ) R_sys(uⁿ)]
/// ```
///
/// Two outer iterations recover second-order coupling between the
/// predictor and the projection.
pub struct PressureProjectionPicard<E: Equation, M: Equation> {
    equation: E,
    equation_mom: M,
    field: FieldId,
    theta: f64,
    iterations: usize,
    solver: SolverOptions,
    solution_old: Vec<f64>,
    solution_lag: Vec<f64>,
    uv_old: Vec<f64>,
    uv_lag: Vec<f64>,
    uv_star: Vec<f64>,
    rhs_mom: Vec<f64>,
    rhs_sys: Vec<f64>,
    residual_sys: Vec<f64>,
    residual_mom: Vec<f64>,
    tmp_sys: Vec<f64>,
    tmp_mom: Vec<f64>,
    fields_old: Option<FieldSet>,
    state: StepperState,
}

impl<E: Equation, M: Equation> std::fmt::Debug for PressureProjectionPicard<E, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureProjectionPicard").finish_non_exhaustive()
    }
}

/// Extract the `(u, v)` sub-vector from a packed `(u, v, η)` solution.
fn gather_uv(solution: &[f64], uv: &mut [f64]) {
    for c in 0..uv.len() / 2 {
        uv[2 * c] = solution[3 * c + solution2d::U];
        uv[2 * c + 1] = solution[3 * c + solution2d::V];
    }
}

fn scatter_uv(uv: &[f64], solution: &mut [f64]) {
    for c in 0..uv.len() / 2 {
        solution[3 * c + solution2d::U] = uv[2 * c];
        solution[3 * c + solution2d::V] = uv[2 * c + 1];
    }
}

impl<E: Equation, M: Equation> PressureProjectionPicard<E, M> {
    pub fn new(equation: E, equation_mom: M, field: FieldId) -> Result<Self> {
        let n = equation.n_dofs();
        let n_uv = 2 * (n / 3);
        if equation_mom.n_dofs() != n_uv {
            return Err(ModelError::ShapeMismatch {
                field,
                actual: equation_mom.n_dofs(),
                expected: n_uv,
            });
        }
        Ok(Self {
            equation,
            equation_mom,
            field,
            theta: 0.5,
            iterations: 2,
            solver: SolverOptions::default(),
            solution_old: vec![0.0; n],
            solution_lag: vec![0.0; n],
            uv_old: vec![0.0; n_uv],
            uv_lag: vec![0.0; n_uv],
            uv_star: vec![0.0; n_uv],
            rhs_mom: vec![0.0; n_uv],
            rhs_sys: vec![0.0; n],
            residual_sys: vec![0.0; n],
            residual_mom: vec![0.0; n_uv],
            tmp_sys: vec![0.0; n],
            tmp_mom: vec![0.0; n_uv],
            fields_old: None,
            state: StepperState::Uninitialized,
        })
    }

    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    /// Number of outer Picard iterations (default 2).
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn with_solver_options(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }
}

impl<E: Equation, M: Equation> TimeStepper for PressureProjectionPicard<E, M> {
    fn name(&self) -> &'static str {
        "PressureProjectionPicard"
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
        gather_uv(&self.solution_old, &mut self.uv_old);
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("PressureProjectionPicard")),
        };
        let theta = self.theta;

        // step-start contributions, fixed across the outer iterations
        self.equation_mom.residual(
            TermGroup::All,
            &self.uv_old,
            &self.uv_old,
            fields_old,
            fields_old,
            t,
            &mut self.residual_mom,
        );
        self.equation_mom
            .apply_mass(&geometry, &self.uv_old, &mut self.rhs_mom);
        fields::axpy(&mut self.rhs_mom, dt * (1.0 - theta), &self.residual_mom);

        self.equation.residual(
            TermGroup::All,
            &self.solution_old,
            &self.solution_old,
            fields_old,
            fields_old,
            t,
            &mut self.rhs_sys,
        );

        for _ in 0..self.iterations {
            self.solution_lag.copy_from_slice(fields.values(self.field));
            gather_uv(&self.solution_lag, &mut self.uv_lag);

            // momentum predictor with lagged nonlinearities
            self.uv_star.copy_from_slice(&self.uv_lag);
            {
                let equation_mom = &self.equation_mom;
                let rhs_mom = &self.rhs_mom;
                let uv_lag = &self.uv_lag;
                let residual_mom = &mut self.residual_mom;
                let tmp_mom = &mut self.tmp_mom;
                let geometry_ref = &geometry;
                picard_solve(
                    "PressureProjectionPicard",
                    0,
                    &self.solver,
                    &mut self.uv_star,
                    |x, out| {
                        equation_mom.residual(
                            TermGroup::All,
                            x,
                            uv_lag,
                            fields,
                            fields_old,
                            t + dt,
                            residual_mom,
                        );
                        tmp_mom.copy_from_slice(rhs_mom);
                        fields::axpy(tmp_mom, dt * theta, residual_mom);
                        equation_mom.solve_mass(geometry_ref, tmp_mom, out)
                    },
                )?;
            }

            // free-surface projection from the predicted velocity
            self.tmp_sys.copy_from_slice(&self.solution_old);
            scatter_uv(&self.uv_star, &mut self.tmp_sys);
            let mut mass_star = vec![0.0; self.tmp_sys.len()];
            self.equation
                .apply_mass(&geometry, &self.tmp_sys, &mut mass_star);

            let mut x = fields.values(self.field).to_vec();
            {
                let equation = &self.equation;
                let rhs_sys = &self.rhs_sys;
                let solution_lag = &self.solution_lag;
                let residual_sys = &mut self.residual_sys;
                let tmp_sys = &mut self.tmp_sys;
                let geometry_ref = &geometry;
                picard_solve(
                    "PressureProjectionPicard",
                    1,
                    &self.solver,
                    &mut x,
                    |x_it, out| {
                        equation.residual(
                            TermGroup::All,
                            x_it,
                            solution_lag,
                            fields,
                            fields_old,
                            t + dt,
                            residual_sys,
                        );
                        tmp_sys.copy_from_slice(&mass_star);
                        fields::axpy(tmp_sys, dt * theta, residual_sys);
                        fields::axpy(tmp_sys, dt * (1.0 - theta), rhs_sys);
                        equation.solve_mass(geometry_ref, tmp_sys, out)
                    },
                )?;
            }
            fields.values_mut(self.field).copy_from_slice(&x);
        }

        if let Some(old) = self.fields_old.as_mut() {
            *old = fields.clone();
        }
        Ok(())
    }
}
