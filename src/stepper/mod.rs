//! Single-equation time steppers.
//!
//! Every stepper advances one [`Equation`](crate::equation::Equation) over
//! one flat solution buffer stored in a [`FieldSet`]. Two contracts exist:
//!
//! - [`TimeStepper`] advances a whole step `t → t + dt`;
//! - [`StageStepper`] additionally exposes the individual stages so a
//!   coupled driver can interleave 2D sub-cycling and dependency updates
//!   between them.
//!
//! All steppers must be initialized against the field registry before the
//! first step; advancing an uninitialized stepper is a fatal
//! [`ModelError::NotInitialized`](crate::error::ModelError::NotInitialized).

use crate::error::{ModelError, Result};
use crate::fields::FieldSet;

mod crank_nicolson;
mod dirk;
mod forward_euler;
mod leapfrog_am3;
mod pressure_projection;
mod ssp_imex;
mod ssprk22_ale;
mod ssprk33;
mod steady_state;

pub use crank_nicolson::CrankNicolson;
pub use dirk::DirkLspum2;
pub use forward_euler::ForwardEuler;
pub use leapfrog_am3::LeapFrogAm3;
pub use pressure_projection::PressureProjectionPicard;
pub use ssp_imex::SspImex;
pub use ssprk22_ale::{Ssprk22Ale, TwoStageTrapezoid};
pub use ssprk33::{Ssprk33, Ssprk33Stage, Ssprk33StageSemiImplicit};
pub use steady_state::SteadyState;

/// Optional callback updating time-dependent forcing fields before a
/// residual evaluation at the given time.
pub type Forcing<'a> = Option<&'a mut dyn FnMut(f64)>;

/// Reborrow a forcing callback so it can be handed to several stages.
pub(crate) fn reborrow<'a>(forcing: &'a mut Forcing<'_>) -> Forcing<'a> {
    match forcing {
        Some(f) => Some(&mut **f),
        None => None,
    }
}

/// Initialization state shared by all steppers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StepperState {
    Uninitialized,
    Ready,
}

impl StepperState {
    pub(crate) fn ensure_ready(self, name: &'static str) -> Result<()> {
        match self {
            StepperState::Ready => Ok(()),
            StepperState::Uninitialized => Err(ModelError::NotInitialized(name)),
        }
    }
}

/// A scheme advancing one equation by whole steps.
pub trait TimeStepper {
    /// Scheme name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Capture the initial solution and allocate internal buffers.
    fn initialize(&mut self, fields: &FieldSet) -> Result<()>;

    /// Advance the solution from `t` to `t + dt` in place.
    fn advance(&mut self, t: f64, dt: f64, fields: &mut FieldSet, forcing: Forcing<'_>)
        -> Result<()>;
}

/// A multi-stage scheme whose stages can be driven individually.
///
/// Calling [`StageStepper::solve_stage`] for `k = 0..n_stages()` in order
/// is equivalent to one [`TimeStepper::advance`]; stages must be driven in
/// order and exactly once per step.
pub trait StageStepper: TimeStepper {
    fn n_stages(&self) -> usize;

    fn solve_stage(
        &mut self,
        stage: usize,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        forcing: Forcing<'_>,
    ) -> Result<()>;
}
