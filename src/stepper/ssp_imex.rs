//! SSP-IMEX pairing of an explicit ERK with the LSPUM2 DIRK.

use crate::equation::{Equation, EquationKind, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet};
use crate::mesh::Geometry;
use crate::solver::{picard_solve, SolverOptions};

use super::{dirk, reborrow, Forcing, StageStepper, StepperState, TimeStepper};

/// Explicit (ERK LSPUM2) tableau; shares `b` with the implicit part.
pub(crate) const A_EXPL: [[f64; 3]; 3] = [
    [0.0, 0.0, 0.0],
    [5.0 / 6.0, 0.0, 0.0],
    [11.0 / 24.0, 11.0 / 24.0, 0.0],
];
pub(crate) const C_EXPL: [f64; 3] = [0.0, 5.0 / 6.0, 11.0 / 12.0];

/// Second-order SSP IMEX scheme.
///
/// The stiff [`TermGroup::Implicit`] part is integrated with the LSPUM2
/// DIRK and the non-stiff [`TermGroup::Explicit`] part with its paired
/// ERK; both share the `b` weights so the stage states coincide.
///
/// The scheme splits horizontal from vertical terms itself, so pairing it
/// with a vertical-momentum equation (whose whole residual is the stiff
/// part) is rejected at construction.
pub struct SspImex<E: Equation> {
    equation: E,
    field: FieldId,
    solver: SolverOptions,
    solution_n: Vec<f64>,
    k_expl: [Vec<f64>; 3],
    k_impl: [Vec<f64>; 3],
    base: Vec<f64>,
    residual: Vec<f64>,
    tmp: Vec<f64>,
    fields_old: Option<FieldSet>,
    state: StepperState,
}

impl<E: Equation> std::fmt::Debug for SspImex<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SspImex").finish_non_exhaustive()
    }
}

impl<E: Equation> SspImex<E> {
    pub fn new(equation: E, field: FieldId) -> Result<Self> {
        if equation.kind() == EquationKind::VerticalMomentum3d {
            return Err(ModelError::UnsupportedEquation {
                scheme: "SSPIMEX",
                kind: equation.kind(),
            });
        }
        let n = equation.n_dofs();
        Ok(Self {
            equation,
            field,
            solver: SolverOptions::default(),
            solution_n: vec![0.0; n],
            k_expl: [vec![0.0; n], vec![0.0; n], vec![0.0; n]],
            k_impl: [vec![0.0; n], vec![0.0; n], vec![0.0; n]],
            base: vec![0.0; n],
            residual: vec![0.0; n],
            tmp: vec![0.0; n],
            fields_old: None,
            state: StepperState::Uninitialized,
        })
    }

    pub fn with_solver_options(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }
}

impl<E: Equation> TimeStepper for SspImex<E> {
    fn name(&self) -> &'static str {
        "SSPIMEX"
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

impl<E: Equation> StageStepper for SspImex<E> {
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
        let ts = t + C_EXPL[stage] * dt;
        if let Some(f) = forcing {
            f(ts);
        }

        let geometry = Geometry::capture(fields);
        self.base.copy_from_slice(&self.solution_n);
        for j in 0..stage {
            fields::axpy(&mut self.base, dt * A_EXPL[stage][j], &self.k_expl[j]);
            fields::axpy(&mut self.base, dt * dirk::A[stage][j], &self.k_impl[j]);
        }
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("SSPIMEX")),
        };

        let a_diag = dirk::A[stage][stage];
        let mut u = self.base.clone();
        picard_solve("SSPIMEX", stage, &self.solver, &mut u, |x, out| {
            self.equation.residual(
                TermGroup::Implicit,
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

        // stage derivatives of both splits at the converged stage value
        self.equation.residual(
            TermGroup::Implicit,
            &u,
            &u,
            fields,
            fields_old,
            ts,
            &mut self.residual,
        );
        self.equation
            .solve_mass(&geometry, &self.residual, &mut self.k_impl[stage])?;
        self.equation.residual(
            TermGroup::Explicit,
            &u,
            &u,
            fields,
            fields_old,
            ts,
            &mut self.residual,
        );
        self.equation
            .solve_mass(&geometry, &self.residual, &mut self.k_expl[stage])?;

        if stage == 2 {
            let out = fields.values_mut(self.field);
            out.copy_from_slice(&self.solution_n);
            for j in 0..3 {
                fields::axpy(out, dt * dirk::B[j], &self.k_expl[j]);
                fields::axpy(out, dt * dirk::B[j], &self.k_impl[j]);
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
