//! Mode-split integrator advancing all systems with IMEX stages.

use std::rc::Rc;

use crate::config::ModelOptions;
use crate::equation::{Equation, EquationKind};
use crate::error::{ModelError, Result};
use crate::fields::{FieldId, FieldSet};
use crate::limiter::TracerLimiter;
use crate::pipeline::{DependencyFlags, DependencyUpdatePipeline};
use crate::stepper::{reborrow, Forcing, SspImex, StageStepper, TimeStepper};
use crate::turbulence::TurbulenceClosure;

use super::{CoupledProblem, CoupledStepper};

/// Additive SSP-IMEX stages for every system, advanced synchronously.
///
/// All equations share the three-stage tableau, so every system sits at
/// the same stage time and no blending or sub-cycling is needed. Stiff
/// terms belong in the equations' implicit groups; a separate vertical
/// diffusion step does not exist here and requesting one is a
/// construction error.
///
/// The turbulence quantities are advanced inside the stage loop (psi
/// before TKE), bracketed by the closure update so each stage sees eddy
/// coefficients consistent with the newest solution.
pub struct CoupledSspImex {
    stepper_2d: SspImex<Box<dyn Equation>>,
    stepper_mom: SspImex<Box<dyn Equation>>,
    stepper_salt: Option<SspImex<Box<dyn Equation>>>,
    turbulence: Option<ImexTurbulence>,
    limiter: Option<Rc<dyn TracerLimiter>>,
    pipeline: DependencyUpdatePipeline,
    dt: f64,
}

impl std::fmt::Debug for CoupledSspImex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoupledSspImex").finish_non_exhaustive()
    }
}

struct ImexTurbulence {
    closure: Box<dyn TurbulenceClosure>,
    stepper_psi: SspImex<Box<dyn Equation>>,
    stepper_tke: SspImex<Box<dyn Equation>>,
    stepper_psi_adv: Option<SspImex<Box<dyn Equation>>>,
    stepper_tke_adv: Option<SspImex<Box<dyn Equation>>>,
}

impl CoupledSspImex {
    pub fn new(problem: CoupledProblem, fields: &FieldSet) -> Result<Self> {
        problem.validate("CoupledSspImex")?;
        if problem.options.solve_vert_diffusion {
            // vertical diffusion must live in the momentum equation's
            // implicit group here
            return Err(ModelError::UnsupportedEquation {
                scheme: "CoupledSspImex",
                kind: EquationKind::VerticalMomentum3d,
            });
        }
        let CoupledProblem {
            options,
            constants,
            eq_sw,
            eq_momentum,
            eq_vert_momentum: _,
            eq_salt,
            turbulence,
            limiter,
        } = problem;
        let dt = options.dt;
        tracing::debug!(dt, "synchronous IMEX stages for all systems");

        let turbulence = match turbulence {
            Some(turb) => Some(ImexTurbulence {
                closure: turb.closure,
                stepper_psi: SspImex::new(turb.eq_psi, FieldId::Psi3d)?,
                stepper_tke: SspImex::new(turb.eq_tke, FieldId::Tke3d)?,
                stepper_psi_adv: turb
                    .eq_psi_adv
                    .map(|eq| SspImex::new(eq, FieldId::Psi3d))
                    .transpose()?,
                stepper_tke_adv: turb
                    .eq_tke_adv
                    .map(|eq| SspImex::new(eq, FieldId::Tke3d))
                    .transpose()?,
            }),
            None => None,
        };

        let mut pipeline = DependencyUpdatePipeline::new(options, constants, fields)?;
        if let Some(limiter) = &limiter {
            pipeline = pipeline.with_limiter(limiter.clone());
        }

        Ok(Self {
            stepper_2d: SspImex::new(eq_sw, FieldId::Solution2d)?,
            stepper_mom: SspImex::new(eq_momentum, FieldId::Velocity3d)?,
            stepper_salt: eq_salt
                .map(|eq| SspImex::new(eq, FieldId::Salinity3d))
                .transpose()?,
            turbulence,
            limiter,
            pipeline,
            dt,
        })
    }

    fn options(&self) -> &ModelOptions {
        self.pipeline.options()
    }

    fn solve_turbulence_advection_stage(
        &mut self,
        stage: usize,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
    ) -> Result<()> {
        let Some(turb) = self.turbulence.as_mut() else {
            return Ok(());
        };
        if let Some(stepper) = turb.stepper_psi_adv.as_mut() {
            stepper.solve_stage(stage, t, dt, fields, None)?;
        }
        if let Some(stepper) = turb.stepper_tke_adv.as_mut() {
            stepper.solve_stage(stage, t, dt, fields, None)?;
        }
        Ok(())
    }

    fn solve_turbulence_stage(
        &mut self,
        stage: usize,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
    ) -> Result<()> {
        let Some(turb) = self.turbulence.as_mut() else {
            return Ok(());
        };
        turb.stepper_psi.solve_stage(stage, t, dt, fields, None)?;
        turb.stepper_tke.solve_stage(stage, t, dt, fields, None)?;
        if let Some(limiter) = &self.limiter {
            limiter.apply(fields.values_mut(FieldId::Psi3d));
            limiter.apply(fields.values_mut(FieldId::Tke3d));
        }
        turb.closure.postprocess(fields);
        turb.closure.preprocess(fields);
        Ok(())
    }
}

impl CoupledStepper for CoupledSspImex {
    fn name(&self) -> &'static str {
        "CoupledSspImex"
    }

    fn initialize(&mut self, fields: &mut FieldSet) -> Result<()> {
        self.pipeline.initialize(fields)?;
        self.stepper_2d.initialize(fields)?;
        self.stepper_mom.initialize(fields)?;
        if let Some(stepper) = self.stepper_salt.as_mut() {
            stepper.initialize(fields)?;
        }
        if let Some(turb) = self.turbulence.as_mut() {
            if let Some(stepper) = turb.stepper_psi_adv.as_mut() {
                stepper.initialize(fields)?;
            }
            if let Some(stepper) = turb.stepper_tke_adv.as_mut() {
                stepper.initialize(fields)?;
            }
            turb.stepper_psi.initialize(fields)?;
            turb.stepper_tke.initialize(fields)?;
            turb.closure.preprocess(fields);
        }
        Ok(())
    }

    fn advance(
        &mut self,
        t: f64,
        fields: &mut FieldSet,
        mut forcing_2d: Forcing<'_>,
        mut forcing_3d: Forcing<'_>,
    ) -> Result<()> {
        let dt = self.dt;
        for stage in 0..3 {
            let last = stage == 2;

            if let Some(stepper) = self.stepper_salt.as_mut() {
                stepper.solve_stage(stage, t, dt, fields, reborrow(&mut forcing_3d))?;
                if last {
                    self.pipeline.limit_tracers(fields);
                }
            }
            if self.options().use_turbulence_advection {
                self.solve_turbulence_advection_stage(stage, t, dt, fields)?;
            }
            self.stepper_mom
                .solve_stage(stage, t, dt, fields, reborrow(&mut forcing_3d))?;
            self.stepper_2d
                .solve_stage(stage, t, dt, fields, reborrow(&mut forcing_2d))?;
            if self.options().use_turbulence {
                self.solve_turbulence_stage(stage, t, dt, fields)?;
            }

            let flags = DependencyFlags {
                do_vert_diffusion: false,
                do_2d_coupling: last,
                do_ale_update: last,
                do_stab_params: last,
                do_turbulence: false,
            };
            self.pipeline.run(t, dt, fields, flags)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::config::{ModelOptions, PhysicalConstants};
    use crate::equation::EquationKind;
    use crate::fields::FieldId;
    use crate::limiter::ClampLimiter;
    use crate::stepper::testutil::Decay;

    use super::super::testutil::{problem_fields, Relax3d, Swe2d};
    use super::super::TurbulenceProblem;
    use super::*;

    fn base_problem(options: ModelOptions) -> CoupledProblem {
        CoupledProblem::new(
            options,
            PhysicalConstants::default(),
            Box::new(Swe2d {
                g: 0.0,
                depth: 0.0,
                n_columns: 2,
            }),
            Box::new(
                Decay::split(0.02, 0.05, 12).with_kind(EquationKind::Momentum3d),
            ),
        )
    }

    #[test]
    fn a_separate_vertical_diffusion_step_is_rejected() {
        let options = ModelOptions::new(10.0, 10.0).with_vert_diffusion();
        let fields = problem_fields(&options);
        let problem = base_problem(options).with_vert_momentum(Box::new(Relax3d {
            kind: EquationKind::VerticalMomentum3d,
            rate: 1.0,
            n: 12,
        }));
        let err = CoupledSspImex::new(problem, &fields).unwrap_err();
        assert!(matches!(
            err,
            ModelError::UnsupportedEquation {
                kind: EquationKind::VerticalMomentum3d,
                ..
            }
        ));
    }

    #[test]
    fn momentum_matches_a_standalone_imex_advance() {
        let options = ModelOptions::new(10.0, 10.0);
        let mut fields = problem_fields(&options);
        // zero depth average, so the mode-split correction cannot shift
        // the profile
        {
            let grid = *fields.grid();
            let uv = fields.values_mut(FieldId::Velocity3d);
            for c in 0..2 {
                uv[grid.idx3(c, 0, 2, 0)] = 1.0;
                uv[grid.idx3(c, 2, 2, 0)] = -1.0;
            }
        }
        let mut reference = fields.clone();

        let mut coupled = CoupledSspImex::new(base_problem(options), &fields).unwrap();
        coupled.initialize(&mut fields).unwrap();
        coupled.advance(0.0, &mut fields, None, None).unwrap();

        let mut standalone = SspImex::new(
            Decay::split(0.02, 0.05, 12).with_kind(EquationKind::Momentum3d),
            FieldId::Velocity3d,
        )
        .unwrap();
        standalone.initialize(&reference).unwrap();
        standalone
            .advance(0.0, 10.0, &mut reference, None)
            .unwrap();

        for (a, b) in fields
            .values(FieldId::Velocity3d)
            .iter()
            .zip(reference.values(FieldId::Velocity3d))
        {
            assert!((a - b).abs() < 1e-10);
        }
        // the 2D solution stayed at rest
        assert!(fields
            .values(FieldId::Solution2d)
            .iter()
            .all(|&v| v == 0.0));
    }

    #[test]
    fn turbulence_is_updated_once_per_stage() {
        struct CountingClosure {
            log: Rc<RefCell<Vec<&'static str>>>,
        }
        impl TurbulenceClosure for CountingClosure {
            fn preprocess(&mut self, _fields: &mut FieldSet) {
                self.log.borrow_mut().push("pre");
            }
            fn postprocess(&mut self, _fields: &mut FieldSet) {
                self.log.borrow_mut().push("post");
            }
        }

        let options = ModelOptions::new(10.0, 10.0)
            .with_turbulence()
            .with_tracer_limiter();
        let mut fields = problem_fields(&options);
        fields.values_mut(FieldId::Tke3d).fill(1.0e-4);
        fields.values_mut(FieldId::Psi3d).fill(1.0e-4);

        let log = Rc::new(RefCell::new(Vec::new()));
        let problem = base_problem(options)
            .with_turbulence(TurbulenceProblem {
                closure: Box::new(CountingClosure { log: log.clone() }),
                eq_tke: Box::new(Relax3d {
                    kind: EquationKind::TurbulenceQuantity3d,
                    rate: 0.01,
                    n: 12,
                }),
                eq_psi: Box::new(Relax3d {
                    kind: EquationKind::TurbulenceQuantity3d,
                    rate: 0.01,
                    n: 12,
                }),
                eq_tke_adv: None,
                eq_psi_adv: None,
            })
            .with_limiter(Rc::new(ClampLimiter::floor(1.0e-6)));
        let mut stepper = CoupledSspImex::new(problem, &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();
        stepper.advance(0.0, &mut fields, None, None).unwrap();

        // one preprocess at initialization, then post/pre per stage
        assert_eq!(
            *log.borrow(),
            vec!["pre", "post", "pre", "post", "pre", "post", "pre"]
        );
        assert!(fields
            .values(FieldId::Tke3d)
            .iter()
            .all(|&v| v >= 1.0e-6));
    }
}
