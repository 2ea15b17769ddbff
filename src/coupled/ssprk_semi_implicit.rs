//! Mode-split integrator with a semi-implicit barotropic mode.

use crate::equation::Equation;
use crate::error::Result;
use crate::fields::{FieldId, FieldSet};
use crate::pipeline::{DependencyFlags, DependencyUpdatePipeline};
use crate::stepper::{
    reborrow, DirkLspum2, Forcing, Ssprk33Stage, Ssprk33StageSemiImplicit, StageStepper,
    TimeStepper,
};
use crate::turbulence::TurbulenceUpdater;

use super::{CoupledProblem, CoupledStepper};

/// SSPRK(3,3) stages for the 3D systems with the matching 2D stage
/// solved semi-implicitly, so the barotropic mode needs no sub-cycling.
///
/// The implicit vertical solves (momentum diffusion, turbulence
/// quantities) use the L-stable DIRK pair so stiff vertical diffusion
/// cannot destabilize the stage loop.
pub struct CoupledSsprkSemiImplicit {
    stepper_2d: Ssprk33StageSemiImplicit<Box<dyn Equation>>,
    stepper_mom: Ssprk33Stage<Box<dyn Equation>>,
    stepper_salt: Option<Ssprk33Stage<Box<dyn Equation>>>,
    stepper_psi_adv: Option<Ssprk33Stage<Box<dyn Equation>>>,
    stepper_tke_adv: Option<Ssprk33Stage<Box<dyn Equation>>>,
    pipeline: DependencyUpdatePipeline,
    dt: f64,
}

impl CoupledSsprkSemiImplicit {
    pub fn new(problem: CoupledProblem, fields: &FieldSet) -> Result<Self> {
        problem.validate("CoupledSsprkSemiImplicit")?;
        let CoupledProblem {
            options,
            constants,
            eq_sw,
            eq_momentum,
            eq_vert_momentum,
            eq_salt,
            turbulence,
            limiter,
        } = problem;
        let dt = options.dt;
        tracing::debug!(dt, "semi-implicit barotropic stages, no sub-cycling");

        let mut pipeline = DependencyUpdatePipeline::new(options, constants, fields)?;
        if let Some(eq) = eq_vert_momentum {
            pipeline = pipeline
                .with_vert_diffusion(Box::new(DirkLspum2::new(eq, FieldId::Velocity3d)));
        }
        let mut stepper_psi_adv = None;
        let mut stepper_tke_adv = None;
        if let Some(turb) = turbulence {
            stepper_psi_adv = turb
                .eq_psi_adv
                .map(|eq| Ssprk33Stage::new(eq, FieldId::Psi3d));
            stepper_tke_adv = turb
                .eq_tke_adv
                .map(|eq| Ssprk33Stage::new(eq, FieldId::Tke3d));
            let mut updater = TurbulenceUpdater::new(
                turb.closure,
                Box::new(DirkLspum2::new(turb.eq_psi, FieldId::Psi3d)),
                Box::new(DirkLspum2::new(turb.eq_tke, FieldId::Tke3d)),
            );
            if let Some(limiter) = &limiter {
                updater = updater.with_limiter(limiter.clone());
            }
            pipeline = pipeline.with_turbulence(updater);
        }
        if let Some(limiter) = limiter {
            pipeline = pipeline.with_limiter(limiter);
        }

        Ok(Self {
            stepper_2d: Ssprk33StageSemiImplicit::new(eq_sw, FieldId::Solution2d),
            stepper_mom: Ssprk33Stage::new(eq_momentum, FieldId::Velocity3d),
            stepper_salt: eq_salt.map(|eq| Ssprk33Stage::new(eq, FieldId::Salinity3d)),
            stepper_psi_adv,
            stepper_tke_adv,
            pipeline,
            dt,
        })
    }
}

impl CoupledStepper for CoupledSsprkSemiImplicit {
    fn name(&self) -> &'static str {
        "CoupledSsprkSemiImplicit"
    }

    fn initialize(&mut self, fields: &mut FieldSet) -> Result<()> {
        self.pipeline.initialize(fields)?;
        self.stepper_2d.initialize(fields)?;
        self.stepper_mom.initialize(fields)?;
        if let Some(stepper) = self.stepper_salt.as_mut() {
            stepper.initialize(fields)?;
        }
        if let Some(stepper) = self.stepper_psi_adv.as_mut() {
            stepper.initialize(fields)?;
        }
        if let Some(stepper) = self.stepper_tke_adv.as_mut() {
            stepper.initialize(fields)?;
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
                self.pipeline.limit_tracers(fields);
            }
            if let Some(stepper) = self.stepper_psi_adv.as_mut() {
                stepper.solve_stage(stage, t, dt, fields, None)?;
            }
            if let Some(stepper) = self.stepper_tke_adv.as_mut() {
                stepper.solve_stage(stage, t, dt, fields, None)?;
            }
            self.stepper_mom
                .solve_stage(stage, t, dt, fields, reborrow(&mut forcing_3d))?;
            self.stepper_2d
                .solve_stage(stage, t, dt, fields, reborrow(&mut forcing_2d))?;

            self.pipeline
                .run(t, dt, fields, DependencyFlags::last_step(last))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ModelOptions, PhysicalConstants};
    use crate::equation::EquationKind;
    use crate::fields::{solution2d, FieldId};

    use super::super::testutil::{problem_fields, Relax3d, Swe2d};
    use super::*;

    fn base_problem(options: ModelOptions) -> CoupledProblem {
        CoupledProblem::new(
            options,
            PhysicalConstants::default(),
            Box::new(Swe2d {
                g: 0.002,
                depth: 0.08,
                n_columns: 2,
            }),
            Box::new(Relax3d {
                kind: EquationKind::Momentum3d,
                rate: 0.01,
                n: 12,
            }),
        )
    }

    #[test]
    fn barotropic_stage_never_amplifies_the_wave_energy() {
        // each implicit stage is a contraction in the energy norm, so the
        // Shu–Osher combination cannot amplify the standing wave
        let (g, depth) = (0.01, 0.25);
        let options = ModelOptions::new(10.0, 10.0);
        let mut fields = problem_fields(&options);
        fields.values_mut(FieldId::Solution2d)[solution2d::ETA] = 0.5;

        let problem = CoupledProblem::new(
            options,
            PhysicalConstants::default(),
            Box::new(Swe2d {
                g,
                depth,
                n_columns: 2,
            }),
            Box::new(Relax3d {
                kind: EquationKind::Momentum3d,
                rate: 0.01,
                n: 12,
            }),
        );
        let mut stepper = CoupledSsprkSemiImplicit::new(problem, &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();

        let energy = |f: &FieldSet| {
            let sol = f.values(FieldId::Solution2d);
            (0..2)
                .map(|c| {
                    let u = sol[3 * c + solution2d::U];
                    let eta = sol[3 * c + solution2d::ETA];
                    depth * u * u + g * eta * eta
                })
                .sum::<f64>()
        };
        let e0 = energy(&fields);
        for step in 0..5 {
            stepper
                .advance(step as f64 * 10.0, &mut fields, None, None)
                .unwrap();
        }
        assert!(energy(&fields) <= e0 * (1.0 + 1e-8));
        assert!(fields
            .values(FieldId::Solution2d)
            .iter()
            .all(|v| v.is_finite()));
    }

    #[test]
    fn stage_forcing_follows_the_shu_osher_times() {
        let options = ModelOptions::new(10.0, 10.0);
        let mut fields = problem_fields(&options);
        let mut stepper = CoupledSsprkSemiImplicit::new(base_problem(options), &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();

        let mut times = Vec::new();
        let mut record = |t: f64| times.push(t);
        stepper
            .advance(0.0, &mut fields, Some(&mut record), None)
            .unwrap();
        assert_eq!(times, vec![0.0, 10.0, 5.0]);
    }
}
