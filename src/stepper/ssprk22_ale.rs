//! Two-stage second-order SSP schemes: the ALE-capable Heun scheme and
//! an implicit-corrector trapezoid variant.

use crate::equation::{Equation, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet};
use crate::mesh::Geometry;
use crate::solver::{picard_solve, SolverOptions};

use super::{reborrow, Forcing, StageStepper, StepperState, TimeStepper};

/// Stage evaluation time fractions shared by both schemes.
const C: [f64; 2] = [0.0, 1.0];

/// SSPRK(2,2) in mass-conservative ALE form.
///
/// Each stage is split so a mesh update can run in between:
///
/// - [`prepare_stage`](Self::prepare_stage) assembles the stage
///   right-hand side on the current (pre-update) geometry,
///
///   ```text
///   stage 0:  μ = M uⁿ + dt R(uⁿ)
///   stage 1:  μ = ½ M uⁿ|old + ½ M u¹ + ½ dt R(u¹)
///   ```
///
/// - [`finish_stage`](Self::finish_stage) solves `M_new u = μ` on
///   whatever geometry is then in the field set.
///
/// On a fixed mesh the split collapses to plain Heun's method.
pub struct Ssprk22Ale<E: Equation> {
    equation: E,
    field: FieldId,
    mu: Vec<f64>,
    mu_old: Vec<f64>,
    tendency: Vec<f64>,
    residual: Vec<f64>,
    fields_old: Option<FieldSet>,
    state: StepperState,
}

impl<E: Equation> Ssprk22Ale<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            mu: vec![0.0; n],
            mu_old: vec![0.0; n],
            tendency: vec![0.0; n],
            residual: vec![0.0; n],
            fields_old: None,
            state: StepperState::Uninitialized,
        }
    }

    /// Assemble the stage right-hand side on the current geometry.
    pub fn prepare_stage(
        &mut self,
        stage: usize,
        t: f64,
        dt: f64,
        fields: &FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()> {
        self.state.ensure_ready(self.name())?;
        let ts = t + C[stage] * dt;
        if let Some(f) = forcing {
            f(ts);
        }

        let geometry = Geometry::capture(fields);
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("SSPRK22ALE")),
        };
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
        self.tendency.copy_from_slice(&self.residual);
        fields::scale(&mut self.tendency, dt);

        if stage == 0 {
            self.equation
                .apply_mass(&geometry, current, &mut self.mu_old);
            self.mu.copy_from_slice(&self.mu_old);
            fields::axpy(&mut self.mu, 1.0, &self.tendency);
        } else {
            self.equation.apply_mass(&geometry, current, &mut self.mu);
            fields::scale(&mut self.mu, 0.5);
            fields::axpy(&mut self.mu, 0.5, &self.mu_old);
            fields::axpy(&mut self.mu, 0.5, &self.tendency);
        }
        Ok(())
    }

    /// Mass solve on the geometry currently in `fields`.
    pub fn finish_stage(&mut self, stage: usize, fields: &mut FieldSet) -> Result<()> {
        self.state.ensure_ready(self.name())?;
        let geometry = Geometry::capture(fields);
        self.equation
            .solve_mass(&geometry, &self.mu, fields.values_mut(self.field))?;
        if stage == 1 {
            if let Some(old) = self.fields_old.as_mut() {
                *old = fields.clone();
            }
        }
        Ok(())
    }
}

impl<E: Equation> TimeStepper for Ssprk22Ale<E> {
    fn name(&self) -> &'static str {
        "SSPRK22ALE"
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

impl<E: Equation> StageStepper for Ssprk22Ale<E> {
    fn n_stages(&self) -> usize {
        2
    }

    fn solve_stage(
        &mut self,
        stage: usize,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()> {
        self.prepare_stage(stage, t, dt, fields, forcing)?;
        self.finish_stage(stage, fields)
    }
}

/// Explicit predictor / implicit trapezoidal corrector.
///
/// Stage 0 is a forward-Euler predictor; stage 1 solves
/// `u = uⁿ + dt/2 [M⁻¹ R(uⁿ) + M⁻¹ R(u)]` by Picard iteration, which on
/// linear problems reproduces the trapezoidal rule.
pub struct TwoStageTrapezoid<E: Equation> {
    equation: E,
    field: FieldId,
    solver: SolverOptions,
    solution_n: Vec<f64>,
    rhs_old: Vec<f64>,
    residual: Vec<f64>,
    tmp: Vec<f64>,
    fields_old: Option<FieldSet>,
    state: StepperState,
}

impl<E: Equation> TwoStageTrapezoid<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            solver: SolverOptions::default(),
            solution_n: vec![0.0; n],
            rhs_old: vec![0.0; n],
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

impl<E: Equation> TimeStepper for TwoStageTrapezoid<E> {
    fn name(&self) -> &'static str {
        "TwoStageTrapezoid"
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

impl<E: Equation> StageStepper for TwoStageTrapezoid<E> {
    fn n_stages(&self) -> usize {
        2
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
        let ts = t + C[stage] * dt;
        if let Some(f) = forcing {
            f(ts);
        }
        let geometry = Geometry::capture(fields);
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("TwoStageTrapezoid")),
        };

        if stage == 0 {
            self.solution_n.copy_from_slice(fields.values(self.field));
            self.equation.residual(
                TermGroup::All,
                &self.solution_n,
                &self.solution_n,
                fields,
                fields_old,
                ts,
                &mut self.residual,
            );
            self.equation
                .solve_mass(&geometry, &self.residual, &mut self.rhs_old)?;
            let u = fields.values_mut(self.field);
            fields::axpy(u, dt, &self.rhs_old);
        } else {
            let mut u = fields.values(self.field).to_vec();
            picard_solve("TwoStageTrapezoid", stage, &self.solver, &mut u, |x, out| {
                self.equation.residual(
                    TermGroup::All,
                    x,
                    x,
                    fields,
                    fields_old,
                    ts,
                    &mut self.residual,
                );
                self.equation
                    .solve_mass(&geometry, &self.residual, &mut self.tmp)?;
                out.copy_from_slice(&self.solution_n);
                fields::axpy(out, 0.5 * dt, &self.rhs_old);
                fields::axpy(out, 0.5 * dt, &self.tmp);
                Ok(())
            })?;
            fields.values_mut(self.field).copy_from_slice(&u);
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

    #[test]
    fn fixed_mesh_step_is_heuns_method() {
        let (lambda, dt) = (2.0, 0.1);
        let mut stepper = Ssprk22Ale::new(Decay::new(lambda, 2), SOLUTION);
        let mut fields = scalar_fields(2, 1.0);
        stepper.initialize(&fields).unwrap();
        stepper.advance(0.0, dt, &mut fields, None).unwrap();

        let g = 1.0 - lambda * dt;
        let u1 = g * 1.0;
        let expected = 0.5 * 1.0 + 0.5 * g * u1;
        for &u in fields.values(SOLUTION) {
            assert!((u - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn stage_split_conserves_mass_across_mesh_updates() {
        use crate::equation::{Equation, EquationKind, TermGroup};
        use crate::fields::{FieldId, FieldSet, Grid};
        use crate::mesh::Geometry;

        struct ThicknessMass;
        impl Equation for ThicknessMass {
            fn kind(&self) -> EquationKind {
                EquationKind::Tracer3d
            }
            fn n_dofs(&self) -> usize {
                1
            }
            fn apply_mass(&self, g: &Geometry, u: &[f64], out: &mut [f64]) {
                let h = g.heights().map_or(1.0, |h| h[0]);
                out[0] = h * u[0];
            }
            fn solve_mass(&self, g: &Geometry, rhs: &[f64], out: &mut [f64]) -> Result<()> {
                let h = g.heights().map_or(1.0, |h| h[0]);
                out[0] = rhs[0] / h;
                Ok(())
            }
            fn residual(
                &self,
                _group: TermGroup,
                _u: &[f64],
                _u_nl: &[f64],
                _fields: &FieldSet,
                _fields_old: &FieldSet,
                _t: f64,
                out: &mut [f64],
            ) {
                out.fill(0.0);
            }
        }

        let grid = Grid::new(1, 1, 1.0);
        let mut fields = FieldSet::new(grid);
        fields.register(FieldId::Salinity3d);
        fields.register(FieldId::ElemHeight3d);
        fields.values_mut(SOLUTION)[0] = 3.0;
        fields.values_mut(FieldId::ElemHeight3d)[0] = 2.0;

        let mut stepper = Ssprk22Ale::new(ThicknessMass, SOLUTION);
        stepper.initialize(&fields).unwrap();
        for stage in 0..2 {
            stepper
                .prepare_stage(stage, 0.0, 0.1, &fields, None)
                .unwrap();
            // move the mesh between assembly and mass solve
            let h = fields.values(FieldId::ElemHeight3d)[0];
            fields.values_mut(FieldId::ElemHeight3d)[0] = h * 1.5;
            stepper.finish_stage(stage, &mut fields).unwrap();
        }
        let h = fields.values(FieldId::ElemHeight3d)[0];
        let u = fields.values(SOLUTION)[0];
        assert!((h * u - 2.0 * 3.0).abs() < 1e-12);
    }

    #[test]
    fn trapezoid_corrector_matches_the_trapezoidal_rule() {
        let (lambda, dt) = (2.0, 0.1);
        let mut stepper = TwoStageTrapezoid::new(Decay::new(lambda, 1), SOLUTION);
        let mut fields = scalar_fields(1, 1.0);
        stepper.initialize(&fields).unwrap();
        stepper.advance(0.0, dt, &mut fields, None).unwrap();

        let expected = (1.0 - 0.5 * lambda * dt) / (1.0 + 0.5 * lambda * dt);
        assert!((fields.values(SOLUTION)[0] - expected).abs() < 1e-9);
    }
}
