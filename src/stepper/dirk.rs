//! Diagonally implicit RK, L-stable second-order (LSPUM2).

use crate::equation::{Equation, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet};
use crate::mesh::Geometry;
use crate::solver::{picard_solve, SolverOptions};

use super::{reborrow, Forcing, StageStepper, StepperState, TimeStepper};

pub(crate) const A: [[f64; 3]; 3] = [
    [2.0 / 11.0, 0.0, 0.0],
    [205.0 / 462.0, 2.0 / 11.0, 0.0],
    [2033.0 / 4620.0, 21.0 / 110.0, 2.0 / 11.0],
];
pub(crate) const B: [f64; 3] = [24.0 / 55.0, 0.2, 4.0 / 11.0];
pub(crate) const C: [f64; 3] = [2.0 / 11.0, 289.0 / 462.0, 751.0 / 924.0];

/// L-stable three-stage DIRK with a singly-diagonal coefficient 2/11.
///
/// Each stage solves `Uᵢ = uⁿ + dt Σ_{j<i} aᵢⱼ kⱼ + dt aᵢᵢ M⁻¹ R(Uᵢ)` by
/// Picard iteration. Driven stage-wise the field carries the stage value
/// `Uᵢ` after intermediate stages and the b-weighted combination after the
/// last, so a coupled driver can interleave dependency updates.
pub struct DirkLspum2<E: Equation> {
    equation: E,
    field: FieldId,
    solver: SolverOptions,
    solution_n: Vec<f64>,
    k: [Vec<f64>; 3],
    base: Vec<f64>,
    residual: Vec<f64>,
    tmp: Vec<f64>,
    fields_old: Option<FieldSet>,
    state: StepperState,
}

impl<E: Equation> DirkLspum2<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            solver: SolverOptions::default(),
            solution_n: vec![0.0; n],
            k: [vec![0.0; n], vec![0.0; n], vec![0.0; n]],
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

impl<E: Equation> TimeStepper for DirkLspum2<E> {
    fn name(&self) -> &'static str {
        "DIRKLSPUM2"
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

impl<E: Equation> StageStepper for DirkLspum2<E> {
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
        let ts = t + C[stage] * dt;
        if let Some(f) = forcing {
            f(ts);
        }

        let geometry = Geometry::capture(fields);
        self.base.copy_from_slice(&self.solution_n);
        for j in 0..stage {
            fields::axpy(&mut self.base, dt * A[stage][j], &self.k[j]);
        }
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("DIRKLSPUM2")),
        };

        let a_diag = A[stage][stage];
        let mut u = self.base.clone();
        picard_solve("DIRKLSPUM2", stage, &self.solver, &mut u, |x, out| {
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
            out.copy_from_slice(&self.base);
            fields::axpy(out, dt * a_diag, &self.tmp);
            Ok(())
        })?;

        // stage derivative at the converged stage value
        self.equation.residual(
            TermGroup::All,
            &u,
            &u,
            fields,
            fields_old,
            ts,
            &mut self.residual,
        );
        self.equation
            .solve_mass(&geometry, &self.residual, &mut self.k[stage])?;

        if stage == 2 {
            let out = fields.values_mut(self.field);
            out.copy_from_slice(&self.solution_n);
            for j in 0..3 {
                fields::axpy(out, dt * B[j], &self.k[j]);
            }
            if let Some(old) = self.fields_old.as_mut() {
                *old = fields.clone();
            }
        } else {
            fields.values_mut(self.field).copy_from_slice(&u);
        }
        Ok(())
    }
}
