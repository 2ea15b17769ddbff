//! Three-stage third-order SSP Runge–Kutta in Shu–Osher form.

use crate::equation::{Equation, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet};
use crate::mesh::Geometry;
use crate::solver::{picard_solve, SolverOptions};

use super::{reborrow, Forcing, StageStepper, StepperState, TimeStepper};

/// Weight of the step-start value in each stage's convex combination.
const ALPHA: [f64; 3] = [0.0, 0.75, 1.0 / 3.0];
/// Coefficient of `dt M⁻¹ R` in each stage.
const BETA: [f64; 3] = [1.0, 0.25, 2.0 / 3.0];

fn stage_time(stage: usize, t: f64, dt: f64) -> f64 {
    match stage {
        0 => t,
        1 => t + dt,
        _ => t + 0.5 * dt,
    }
}

/// Explicit SSPRK(3,3) driven stage by stage:
///
/// ```text
/// u¹ = uⁿ + dt M⁻¹ R(uⁿ)
/// u² = 3/4 uⁿ + 1/4 [u¹ + dt M⁻¹ R(u¹)]
/// uⁿ⁺¹ = 1/3 uⁿ + 2/3 [u² + dt M⁻¹ R(u²)]
/// ```
///
/// Stage residuals are evaluated at times `t`, `t + dt`, `t + dt/2`.
pub struct Ssprk33Stage<E: Equation> {
    equation: E,
    field: FieldId,
    solution_n: Vec<f64>,
    residual: Vec<f64>,
    increment: Vec<f64>,
    fields_old: Option<FieldSet>,
    state: StepperState,
}

impl<E: Equation> Ssprk33Stage<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            solution_n: vec![0.0; n],
            residual: vec![0.0; n],
            increment: vec![0.0; n],
            fields_old: None,
            state: StepperState::Uninitialized,
        }
    }
}

impl<E: Equation> TimeStepper for Ssprk33Stage<E> {
    fn name(&self) -> &'static str {
        "SSPRK33"
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
        self.solution_n.copy_from_slice(values);
        self.fields_old = Some(fields.clone());
        self.state = StepperState::Ready;
        Ok(())
    }

    fn advance(
        &mut self,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        mut forcing: Forcing<'_>,
    ) -> Result<()> {
        for stage in 0..self.n_stages() {
            self.solve_stage(stage, t, dt, fields, reborrow(&mut forcing))?;
        }
        Ok(())
    }
}

impl<E: Equation> StageStepper for Ssprk33Stage<E> {
    fn n_stages(&self) -> usize {
        3
    }

    fn solve_stage(
        &mut self,
        stage: usize,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()> {
        self.state.ensure_ready(self.name())?;
        if stage == 0 {
            self.solution_n.copy_from_slice(fields.values(self.field));
        }
        let ts = stage_time(stage, t, dt);
        if let Some(f) = forcing {
            f(ts);
        }

        let geometry = Geometry::capture(fields);
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("SSPRK33")),
        };
        {
            let current = fields.values(self.field);
            self.equation.residual(
                TermGroup::All,
                current,
                current,
                fields,
                fields_old,
                ts,
                &mut self.residual,
            );
        }
        self.equation
            .solve_mass(&geometry, &self.residual, &mut self.increment)?;

        let u = fields.values_mut(self.field);
        fields::axpy(u, dt, &self.increment);
        fields::blend(u, ALPHA[stage], &self.solution_n);
        // blend scales the increment by (1 - α); compensate so the stage
        // carries β dt M⁻¹ R exactly.
        debug_assert!(((1.0 - ALPHA[stage]) - BETA[stage]).abs() < 1e-14);

        if stage == 2 {
            if let Some(old) = self.fields_old.as_mut() {
                *old = fields.clone();
            }
        }
        Ok(())
    }
}

/// Whole-step wrapper around [`Ssprk33Stage`].
pub struct Ssprk33<E: Equation> {
    inner: Ssprk33Stage<E>,
}

impl<E: Equation> Ssprk33<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        Self {
            inner: Ssprk33Stage::new(equation, field),
        }
    }
}

impl<E: Equation> TimeStepper for Ssprk33<E> {
    fn name(&self) -> &'static str {
        "SSPRK33"
    }

    fn initialize(&mut self, fields: &FieldSet) -> Result<()> {
        self.inner.initialize(fields)
    }

    fn advance(
        &mut self,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()> {
        self.inner.advance(t, dt, fields, forcing)
    }
}

/// SSPRK(3,3) with implicit stages.
///
/// Each stage solves `x = blend + β dt M⁻¹ R(x, x_lag)` by Picard
/// iteration, with the nonlinear coefficients lagged at the stage-start
/// value. Used for the 3D momentum equation in semi-implicit mode-split
/// runs where the barotropic step size would otherwise bind.
pub struct Ssprk33StageSemiImplicit<E: Equation> {
    equation: E,
    field: FieldId,
    solver: SolverOptions,
    solution_n: Vec<f64>,
    solution_lag: Vec<f64>,
    base: Vec<f64>,
    residual: Vec<f64>,
    tmp: Vec<f64>,
    fields_old: Option<FieldSet>,
    state: StepperState,
}

impl<E: Equation> Ssprk33StageSemiImplicit<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            solver: SolverOptions::default(),
            solution_n: vec![0.0; n],
            solution_lag: vec![0.0; n],
            base: vec![0.0; n],
            residual: vec![0.0; n],
            tmp: vec![0.0; n],
            fields_old: None,
            state: StepperState::Uninitialized,
        }
    }

    pub fn with_solver_options(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }
}

impl<E: Equation> TimeStepper for Ssprk33StageSemiImplicit<E> {
    fn name(&self) -> &'static str {
        "SSPRK33SemiImplicit"
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
        self.solution_n.copy_from_slice(values);
        self.fields_old = Some(fields.clone());
        self.state = StepperState::Ready;
        Ok(())
    }

    fn advance(
        &mut self,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        mut forcing: Forcing<'_>,
    ) -> Result<()> {
        for stage in 0..self.n_stages() {
            self.solve_stage(stage, t, dt, fields, reborrow(&mut forcing))?;
        }
        Ok(())
    }
}

impl<E: Equation> StageStepper for Ssprk33StageSemiImplicit<E> {
    fn n_stages(&self) -> usize {
        3
    }

    fn solve_stage(
        &mut self,
        stage: usize,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()> {
        self.state.ensure_ready(self.name())?;
        if stage == 0 {
            self.solution_n.copy_from_slice(fields.values(self.field));
        }
        let ts = stage_time(stage, t, dt);
        if let Some(f) = forcing {
            f(ts);
        }

        let geometry = Geometry::capture(fields);
        self.solution_lag.copy_from_slice(fields.values(self.field));
        self.base.copy_from_slice(&self.solution_lag);
        fields::blend(&mut self.base, ALPHA[stage], &self.solution_n);

        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("SSPRK33SemiImplicit")),
        };
        let beta = BETA[stage];
        let mut u = fields.values(self.field).to_vec();
        picard_solve("SSPRK33SemiImplicit", stage, &self.solver, &mut u, |x, out| {
            self.equation.residual(
                TermGroup::All,
                x,
                &self.solution_lag,
                fields,
                fields_old,
                ts,
                &mut self.residual,
            );
            self.equation
                .solve_mass(&geometry, &self.residual, &mut self.tmp)?;
            out.copy_from_slice(&self.base);
            fields::axpy(out, beta * dt, &self.tmp);
            Ok(())
        })?;
        fields.values_mut(self.field).copy_from_slice(&u);

        if stage == 2 {
            if let Some(old) = self.fields_old.as_mut() {
                *old = fields.clone();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{scalar_fields, Decay, SOLUTION};
    use super::*;

    fn explicit_reference(lambda: f64, dt: f64, u0: f64) -> f64 {
        let g = 1.0 - lambda * dt;
        let u1 = g * u0;
        let u2 = 0.75 * u0 + 0.25 * g * u1;
        u0 / 3.0 + 2.0 / 3.0 * g * u2
    }

    #[test]
    fn advance_matches_shu_osher_recurrence() {
        let (lambda, dt) = (2.0, 0.1);
        let mut stepper = Ssprk33::new(Decay::new(lambda, 2), SOLUTION);
        let mut fields = scalar_fields(2, 1.0);
        stepper.initialize(&fields).unwrap();
        stepper.advance(0.0, dt, &mut fields, None).unwrap();

        let expected = explicit_reference(lambda, dt, 1.0);
        for &u in fields.values(SOLUTION) {
            assert!((u - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn stage_driving_equals_whole_step() {
        let (lambda, dt) = (1.5, 0.05);
        let mut whole = Ssprk33::new(Decay::new(lambda, 1), SOLUTION);
        let mut staged = Ssprk33Stage::new(Decay::new(lambda, 1), SOLUTION);
        let mut fa = scalar_fields(1, 2.0);
        let mut fb = scalar_fields(1, 2.0);
        whole.initialize(&fa).unwrap();
        staged.initialize(&fb).unwrap();

        whole.advance(0.0, dt, &mut fa, None).unwrap();
        for stage in 0..3 {
            staged.solve_stage(stage, 0.0, dt, &mut fb, None).unwrap();
        }
        assert!((fa.values(SOLUTION)[0] - fb.values(SOLUTION)[0]).abs() < 1e-14);
    }

    #[test]
    fn stage_forcing_times_follow_the_tableau() {
        let dt = 0.5;
        let mut stepper = Ssprk33Stage::new(Decay::new(0.0, 1), SOLUTION);
        let mut fields = scalar_fields(1, 1.0);
        stepper.initialize(&fields).unwrap();

        let mut times = Vec::new();
        let mut cb = |t: f64| times.push(t);
        for stage in 0..3 {
            stepper
                .solve_stage(stage, 1.0, dt, &mut fields, Some(&mut cb))
                .unwrap();
        }
        assert_eq!(times, vec![1.0, 1.5, 1.25]);
    }

    #[test]
    fn semi_implicit_matches_implicit_recurrence() {
        let (lambda, dt) = (2.0, 0.1);
        let mut stepper = Ssprk33StageSemiImplicit::new(Decay::new(lambda, 1), SOLUTION);
        let mut fields = scalar_fields(1, 1.0);
        stepper.initialize(&fields).unwrap();
        stepper.advance(0.0, dt, &mut fields, None).unwrap();

        // stage solves x = blend - beta dt lambda x
        let mut prev = 1.0;
        let u0 = 1.0;
        for stage in 0..3 {
            let base = ALPHA[stage] * u0 + (1.0 - ALPHA[stage]) * prev;
            prev = base / (1.0 + BETA[stage] * dt * lambda);
        }
        assert!((fields.values(SOLUTION)[0] - prev).abs() < 1e-8);
    }
}
