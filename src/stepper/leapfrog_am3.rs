//! Leapfrog trapezoidal predictor / third-order Adams–Moulton corrector.

use crate::equation::{Equation, TermGroup};
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet};
use crate::mesh::Geometry;

use super::{Forcing, StepperState, TimeStepper};

const GAMMA: f64 = 1.0 / 12.0;

/// ALE-capable LF-AM3 scheme.
///
/// One step runs in three phases that a coupled driver may interleave
/// with a mesh update:
///
/// 1. [`predict`](Self::predict) — half-step predictor on the **old**
///    geometry,
///    `M uⁿ⁺¹ᐟ² = M [(½-2γ) uⁿ⁻¹ + (½+2γ) uⁿ] + (1-2γ) dt R(uⁿ)`;
/// 2. [`eval_rhs`](Self::eval_rhs) — corrector right-hand side
///    `dt R(uⁿ⁺¹ᐟ²)`, still on the old geometry;
/// 3. [`correct`](Self::correct) — mass solve on the **new** geometry,
///    `M_new uⁿ⁺¹ = (M uⁿ)_old + dt R(uⁿ⁺¹ᐟ²)`.
///
/// Carrying `(M uⁿ)_old` across the mesh update is what makes the scheme
/// conservative on a moving mesh. On a fixed mesh [`advance`]
/// runs the three phases back to back.
///
/// [`advance`]: TimeStepper::advance
pub struct LeapFrogAm3<E: Equation> {
    equation: E,
    field: FieldId,
    solution_old: Vec<f64>,
    msolution_old: Vec<f64>,
    rhs: Vec<f64>,
    residual: Vec<f64>,
    tmp: Vec<f64>,
    fields_old: Option<FieldSet>,
    state: StepperState,
}

impl<E: Equation> LeapFrogAm3<E> {
    pub fn new(equation: E, field: FieldId) -> Self {
        let n = equation.n_dofs();
        Self {
            equation,
            field,
            solution_old: vec![0.0; n],
            msolution_old: vec![0.0; n],
            rhs: vec![0.0; n],
            residual: vec![0.0; n],
            tmp: vec![0.0; n],
            fields_old: None,
            state: StepperState::Uninitialized,
        }
    }

    /// Predictor phase: leave the half-step state `uⁿ⁺¹ᐟ²` in the field
    /// and bank `M uⁿ` for the corrector.
    pub fn predict(
        &mut self,
        t: f64,
        dt: f64,
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
            None => return Err(ModelError::NotInitialized("LeapFrogAM3")),
        };
        {
            let current = fields.values(self.field);
            self.equation
                .apply_mass(&geometry, current, &mut self.msolution_old);
            self.equation.residual(
                TermGroup::All,
                current,
                current,
                fields,
                fields_old,
                t,
                &mut self.residual,
            );
        }

        // rhs = M [(1/2 - 2γ) u_{n-1} + (1/2 + 2γ) u_n] + (1 - 2γ) dt R(u_n)
        self.equation
            .apply_mass(&geometry, &self.solution_old, &mut self.rhs);
        fields::scale(&mut self.rhs, 0.5 - 2.0 * GAMMA);
        fields::axpy(&mut self.rhs, 0.5 + 2.0 * GAMMA, &self.msolution_old);
        fields::axpy(&mut self.rhs, (1.0 - 2.0 * GAMMA) * dt, &self.residual);

        self.solution_old.copy_from_slice(fields.values(self.field));
        self.tmp.copy_from_slice(&self.rhs);
        self.equation
            .solve_mass(&geometry, &self.tmp, fields.values_mut(self.field))?;
        Ok(())
    }

    /// Corrector right-hand side `dt R(uⁿ⁺¹ᐟ²)`, evaluated before any
    /// mesh update.
    pub fn eval_rhs(
        &mut self,
        t: f64,
        dt: f64,
        fields: &FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()> {
        self.state.ensure_ready(self.name())?;
        if let Some(f) = forcing {
            f(t + 0.5 * dt);
        }
        let fields_old = match self.fields_old.as_ref() {
            Some(f) => f,
            None => return Err(ModelError::NotInitialized("LeapFrogAM3")),
        };
        let current = fields.values(self.field);
        self.equation.residual(
            TermGroup::All,
            current,
            current,
            fields,
            fields_old,
            t + 0.5 * dt,
            &mut self.residual,
        );
        self.rhs.copy_from_slice(&self.residual);
        fields::scale(&mut self.rhs, dt);
        Ok(())
    }

    /// Corrector mass solve on the geometry currently in `fields`.
    pub fn correct(&mut self, fields: &mut FieldSet) -> Result<()> {
        self.state.ensure_ready(self.name())?;
        let geometry = Geometry::capture(fields);
        self.tmp.copy_from_slice(&self.msolution_old);
        fields::axpy(&mut self.tmp, 1.0, &self.rhs);
        self.equation
            .solve_mass(&geometry, &self.tmp, fields.values_mut(self.field))?;
        if let Some(old) = self.fields_old.as_mut() {
            *old = fields.clone();
        }
        Ok(())
    }
}

impl<E: Equation> TimeStepper for LeapFrogAm3<E> {
    fn name(&self) -> &'static str {
        "LeapFrogAM3"
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
        let geometry = Geometry::capture(fields);
        self.equation
            .apply_mass(&geometry, values, &mut self.msolution_old);
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
        self.predict(t, dt, fields, super::reborrow(&mut forcing))?;
        self.eval_rhs(t, dt, fields, super::reborrow(&mut forcing))?;
        self.correct(fields)
    }
}
