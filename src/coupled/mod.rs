//! Coupled mode-split time integrators.
//!
//! A coupled integrator (a *recipe*) advances the 2D barotropic system,
//! the 3D baroclinic equations and the optional tracer/turbulence
//! systems through one macro step, interleaving the stage solves with
//! [`DependencyUpdatePipeline`](crate::pipeline::DependencyUpdatePipeline)
//! runs so every equation sees consistent coefficient fields.
//!
//! The recipes differ in how the barotropic mode is advanced:
//!
//! - [`CoupledSsprkSync`] — explicit SSPRK(3,3) everywhere, 2D
//!   sub-cycled inside each stage window;
//! - [`CoupledSsprkSemiImplicit`] — 2D stages solved semi-implicitly so
//!   no sub-cycling is needed;
//! - [`CoupledSsprkSingleMode`] — everything at the barotropic step, 2D
//!   velocity assigned from the 3D depth average;
//! - [`CoupledSspImex`] — IMEX stages advancing all systems
//!   synchronously;
//! - [`CoupledMacroStep`] — 2D advanced once over a double macro step
//!   with time averaging.

use std::rc::Rc;

use crate::config::{ModelOptions, PhysicalConstants};
use crate::equation::Equation;
use crate::error::{ModelError, Result};
use crate::fields::FieldSet;
use crate::limiter::TracerLimiter;
use crate::stepper::Forcing;
use crate::turbulence::TurbulenceClosure;

mod macro_step;
mod ssp_imex;
mod ssprk_semi_implicit;
mod ssprk_single_mode;
mod ssprk_sync;
pub mod stages;

pub use macro_step::CoupledMacroStep;
pub use ssp_imex::CoupledSspImex;
pub use ssprk_semi_implicit::CoupledSsprkSemiImplicit;
pub use ssprk_single_mode::CoupledSsprkSingleMode;
pub use ssprk_sync::CoupledSsprkSync;

/// A coupled integrator advancing all systems through one macro step.
pub trait CoupledStepper {
    fn name(&self) -> &'static str;

    /// Seed the derived fields and initialize all owned steppers.
    fn initialize(&mut self, fields: &mut FieldSet) -> Result<()>;

    /// Advance from `t` by the integrator's macro step.
    ///
    /// `forcing_2d`/`forcing_3d` refresh time-dependent forcing fields
    /// of the barotropic and baroclinic systems respectively.
    fn advance(
        &mut self,
        t: f64,
        fields: &mut FieldSet,
        forcing_2d: Forcing<'_>,
        forcing_3d: Forcing<'_>,
    ) -> Result<()>;
}

/// Turbulence-closure pieces supplied to a recipe.
pub struct TurbulenceProblem {
    pub closure: Box<dyn TurbulenceClosure>,
    /// Vertical-diffusion/production equation of the TKE field.
    pub eq_tke: Box<dyn Equation>,
    /// Vertical-diffusion/production equation of the psi field.
    pub eq_psi: Box<dyn Equation>,
    /// Explicit advection of the TKE field, if transported.
    pub eq_tke_adv: Option<Box<dyn Equation>>,
    /// Explicit advection of the psi field, if transported.
    pub eq_psi_adv: Option<Box<dyn Equation>>,
}

/// Equation bundle a recipe is built from.
///
/// Option-gated equations must be present exactly when the
/// corresponding [`ModelOptions`] switch is on; recipes validate this at
/// construction and fail with [`ModelError::MissingEquation`].
pub struct CoupledProblem {
    pub options: ModelOptions,
    pub constants: PhysicalConstants,
    /// Depth-averaged shallow-water system over the packed 2D solution.
    pub eq_sw: Box<dyn Equation>,
    /// 3D horizontal momentum.
    pub eq_momentum: Box<dyn Equation>,
    /// Implicit vertical diffusion of 3D momentum.
    pub eq_vert_momentum: Option<Box<dyn Equation>>,
    /// Salinity transport.
    pub eq_salt: Option<Box<dyn Equation>>,
    pub turbulence: Option<TurbulenceProblem>,
    pub limiter: Option<Rc<dyn TracerLimiter>>,
}

impl CoupledProblem {
    pub fn new(
        options: ModelOptions,
        constants: PhysicalConstants,
        eq_sw: Box<dyn Equation>,
        eq_momentum: Box<dyn Equation>,
    ) -> Self {
        Self {
            options,
            constants,
            eq_sw,
            eq_momentum,
            eq_vert_momentum: None,
            eq_salt: None,
            turbulence: None,
            limiter: None,
        }
    }

    pub fn with_vert_momentum(mut self, eq: Box<dyn Equation>) -> Self {
        self.eq_vert_momentum = Some(eq);
        self
    }

    pub fn with_salt(mut self, eq: Box<dyn Equation>) -> Self {
        self.eq_salt = Some(eq);
        self
    }

    pub fn with_turbulence(mut self, turbulence: TurbulenceProblem) -> Self {
        self.turbulence = Some(turbulence);
        self
    }

    pub fn with_limiter(mut self, limiter: Rc<dyn TracerLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Check that every option-gated equation was supplied.
    pub(crate) fn validate(&self, recipe: &'static str) -> Result<()> {
        if self.options.solve_salt && self.eq_salt.is_none() {
            return Err(ModelError::MissingEquation {
                recipe,
                equation: "salinity transport",
            });
        }
        if self.options.solve_vert_diffusion && self.eq_vert_momentum.is_none() {
            return Err(ModelError::MissingEquation {
                recipe,
                equation: "vertical momentum diffusion",
            });
        }
        if self.options.use_turbulence && self.turbulence.is_none() {
            return Err(ModelError::MissingEquation {
                recipe,
                equation: "turbulence closure",
            });
        }
        if self.options.use_turbulence_advection {
            let has_adv = self
                .turbulence
                .as_ref()
                .is_some_and(|t| t.eq_tke_adv.is_some() && t.eq_psi_adv.is_some());
            if !has_adv {
                return Err(ModelError::MissingEquation {
                    recipe,
                    equation: "turbulence advection",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! A miniature two-mode problem used by the recipe tests.
    //!
    //! The 2D system is the amplitude system of a standing gravity wave
    //! (`du/dt = g η`, `dη/dt = -H u`, which conserves `H u² + g η²`);
    //! the 3D momentum relaxes towards zero and the tracer decays.
    //! Simple enough that hand-derived invariants hold, rich enough to
    //! exercise the coupling paths.

    use crate::equation::{Equation, EquationKind, TermGroup};
    use crate::error::Result;
    use crate::fields::{solution2d, FieldId, FieldSet, Grid};
    use crate::mesh::Geometry;
    use crate::pipeline::required_fields;

    pub(crate) struct Swe2d {
        pub g: f64,
        pub depth: f64,
        pub n_columns: usize,
    }

    impl Equation for Swe2d {
        fn kind(&self) -> EquationKind {
            EquationKind::ShallowWater2d
        }
        fn n_dofs(&self) -> usize {
            3 * self.n_columns
        }
        fn apply_mass(&self, _g: &Geometry, u: &[f64], out: &mut [f64]) {
            out.copy_from_slice(u);
        }
        fn solve_mass(&self, _g: &Geometry, rhs: &[f64], out: &mut [f64]) -> Result<()> {
            out.copy_from_slice(rhs);
            Ok(())
        }
        fn residual(
            &self,
            _group: TermGroup,
            u: &[f64],
            _u_nl: &[f64],
            _fields: &FieldSet,
            _fields_old: &FieldSet,
            _t: f64,
            out: &mut [f64],
        ) {
            for c in 0..self.n_columns {
                out[3 * c + solution2d::U] = self.g * u[3 * c + solution2d::ETA];
                out[3 * c + solution2d::V] = 0.0;
                out[3 * c + solution2d::ETA] = -self.depth * u[3 * c + solution2d::U];
            }
        }
    }

    pub(crate) struct Relax3d {
        pub kind: EquationKind,
        pub rate: f64,
        pub n: usize,
    }

    impl Equation for Relax3d {
        fn kind(&self) -> EquationKind {
            self.kind
        }
        fn n_dofs(&self) -> usize {
            self.n
        }
        fn apply_mass(&self, _g: &Geometry, u: &[f64], out: &mut [f64]) {
            out.copy_from_slice(u);
        }
        fn solve_mass(&self, _g: &Geometry, rhs: &[f64], out: &mut [f64]) -> Result<()> {
            out.copy_from_slice(rhs);
            Ok(())
        }
        fn residual(
            &self,
            _group: TermGroup,
            u: &[f64],
            _u_nl: &[f64],
            _fields: &FieldSet,
            _fields_old: &FieldSet,
            _t: f64,
            out: &mut [f64],
        ) {
            for (o, ui) in out.iter_mut().zip(u) {
                *o = -self.rate * ui;
            }
        }
    }

    pub(crate) fn problem_fields(options: &crate::config::ModelOptions) -> FieldSet {
        let grid = Grid::new(2, 3, 100.0);
        let mut f = FieldSet::new(grid);
        f.register_all(&required_fields(options));
        f.values_mut(FieldId::Bathymetry2d).fill(15.0);
        f.values_mut(FieldId::ElemHeight3d).fill(5.0);
        f.values_mut(FieldId::ElemHeight2d).fill(5.0);
        f
    }
}
