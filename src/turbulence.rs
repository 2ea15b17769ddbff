//! Turbulence closure coupling.
//!
//! The engine does not assemble turbulence physics itself; a
//! [`TurbulenceClosure`] computes the algebraic pieces (shear/buoyancy
//! frequencies before the solves, stability functions and eddy
//! viscosity/diffusivity after), while the two transported quantities
//! (TKE and the generic length-scale variable psi) are advanced by
//! ordinary [`TimeStepper`]s owned by the [`TurbulenceUpdater`].

use std::rc::Rc;

use crate::error::Result;
use crate::fields::FieldSet;
use crate::limiter::TracerLimiter;
use crate::stepper::TimeStepper;

/// Algebraic part of a two-equation turbulence closure.
pub trait TurbulenceClosure {
    /// Update source-term fields consumed by the TKE/psi equations.
    fn preprocess(&mut self, fields: &mut FieldSet);

    /// Update eddy viscosity/diffusivity from the advanced quantities.
    fn postprocess(&mut self, fields: &mut FieldSet);
}

/// Advances the turbulence quantities and brackets them with the
/// closure's algebraic updates.
///
/// The psi equation is solved before the TKE equation: its source terms
/// depend on the TKE field from the previous update, while the TKE solve
/// may already consume the new length scale.
pub struct TurbulenceUpdater {
    closure: Box<dyn TurbulenceClosure>,
    psi_stepper: Box<dyn TimeStepper>,
    tke_stepper: Box<dyn TimeStepper>,
    limiter: Option<Rc<dyn TracerLimiter>>,
}

impl TurbulenceUpdater {
    pub fn new(
        closure: Box<dyn TurbulenceClosure>,
        psi_stepper: Box<dyn TimeStepper>,
        tke_stepper: Box<dyn TimeStepper>,
    ) -> Self {
        Self {
            closure,
            psi_stepper,
            tke_stepper,
            limiter: None,
        }
    }

    /// Limit both quantities after their solves (positivity floor).
    pub fn with_limiter(mut self, limiter: Rc<dyn TracerLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn initialize(&mut self, fields: &FieldSet) -> Result<()> {
        self.psi_stepper.initialize(fields)?;
        self.tke_stepper.initialize(fields)
    }

    /// One turbulence update over `[t, t + dt]`.
    pub fn update(&mut self, t: f64, dt: f64, fields: &mut FieldSet) -> Result<()> {
        self.closure.preprocess(fields);
        self.psi_stepper.advance(t, dt, fields, None)?;
        self.tke_stepper.advance(t, dt, fields, None)?;
        if let Some(limiter) = &self.limiter {
            limiter.apply(fields.values_mut(crate::fields::FieldId::Psi3d));
            limiter.apply(fields.values_mut(crate::fields::FieldId::Tke3d));
        }
        self.closure.postprocess(fields);
        Ok(())
    }
}
