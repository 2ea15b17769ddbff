//! Equation contract consumed by the time integrators.
//!
//! An [`Equation`] is an opaque residual evaluator: the weak-form assembly
//! of the physical equations (momentum, shallow water, tracer transport,
//! turbulence) lives outside this crate. Steppers only need to
//!
//! - evaluate the spatial residual for a term group,
//! - apply the mass operator built on a given [`Geometry`] snapshot, and
//! - solve against that mass operator.
//!
//! Splitting `apply_mass`/`solve_mass` by geometry snapshot is what makes
//! the ALE schemes expressible: the predictor/RHS side of a step can be
//! evaluated on the pre-step geometry while the mass solve runs on the
//! post-step geometry.

use crate::error::Result;
use crate::fields::FieldSet;
use crate::mesh::Geometry;

/// Term subset selected by split schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermGroup {
    /// All terms.
    All,
    /// Terms treated implicitly (stiff part).
    Implicit,
    /// Terms treated explicitly (non-stiff part).
    Explicit,
}

/// Kind tag used for construction-time scheme/equation compatibility
/// checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EquationKind {
    /// Depth-averaged shallow-water system (2D mode).
    ShallowWater2d,
    /// 3D horizontal momentum.
    Momentum3d,
    /// Vertical diffusion of 3D momentum.
    VerticalMomentum3d,
    /// Scalar tracer transport.
    Tracer3d,
    /// Transported turbulence quantity (TKE or psi).
    TurbulenceQuantity3d,
}

/// Opaque residual evaluator advanced by the steppers.
///
/// Implementations own their boundary conditions and discretization; the
/// stepper sees only flat solution buffers of length [`Equation::n_dofs`].
pub trait Equation {
    /// Kind tag for compatibility checks.
    fn kind(&self) -> EquationKind;

    /// Length of the solution buffer.
    fn n_dofs(&self) -> usize;

    /// Apply the mass operator built on `geometry`: `out = M u`.
    fn apply_mass(&self, geometry: &Geometry, u: &[f64], out: &mut [f64]);

    /// Solve `M x = rhs` with the mass operator built on `geometry`,
    /// writing `x` into `out`.
    ///
    /// For fully-discontinuous representations the mass operator is
    /// (block-)diagonal and this degenerates to a pointwise multiply.
    fn solve_mass(&self, geometry: &Geometry, rhs: &[f64], out: &mut [f64]) -> Result<()>;

    /// Evaluate the spatial residual of the selected term group.
    ///
    /// `u` is the state the residual is linear in, `u_nl` the state the
    /// nonlinear coefficients are evaluated at (semi-implicit schemes lag
    /// it), `fields`/`fields_old` the current and lagged coefficient
    /// fields, and `t` the evaluation time.
    #[allow(clippy::too_many_arguments)]
    fn residual(
        &self,
        group: TermGroup,
        u: &[f64],
        u_nl: &[f64],
        fields: &FieldSet,
        fields_old: &FieldSet,
        t: f64,
        out: &mut [f64],
    );
}

impl<E: Equation + ?Sized> Equation for Box<E> {
    fn kind(&self) -> EquationKind {
        (**self).kind()
    }

    fn n_dofs(&self) -> usize {
        (**self).n_dofs()
    }

    fn apply_mass(&self, geometry: &Geometry, u: &[f64], out: &mut [f64]) {
        (**self).apply_mass(geometry, u, out)
    }

    fn solve_mass(&self, geometry: &Geometry, rhs: &[f64], out: &mut [f64]) -> Result<()> {
        (**self).solve_mass(geometry, rhs, out)
    }

    fn residual(
        &self,
        group: TermGroup,
        u: &[f64],
        u_nl: &[f64],
        fields: &FieldSet,
        fields_old: &FieldSet,
        t: f64,
        out: &mut [f64],
    ) {
        (**self).residual(group, u, u_nl, fields, fields_old, t, out)
    }
}
