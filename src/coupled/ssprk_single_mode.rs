//! Unsplit integrator running every system at the barotropic step.

use crate::equation::Equation;
use crate::error::Result;
use crate::fields::{FieldId, FieldSet};
use crate::pipeline::{CouplingMode, DependencyFlags, DependencyUpdatePipeline};
use crate::stepper::{
    reborrow, CrankNicolson, Forcing, Ssprk33Stage, StageStepper, TimeStepper,
};
use crate::turbulence::TurbulenceUpdater;

use super::{CoupledProblem, CoupledStepper};

/// SSPRK(3,3) for both modes at the barotropic step `dt_2d`.
///
/// No mode splitting takes place: the macro step of this integrator is
/// `dt_2d` itself, the free surface comes from the 2D stage solve and
/// the 2D velocity is overwritten by the 3D depth average after every
/// stage. Accurate and simple, but every 3D system pays the barotropic
/// step restriction.
pub struct CoupledSsprkSingleMode {
    stepper_2d: Ssprk33Stage<Box<dyn Equation>>,
    stepper_mom: Ssprk33Stage<Box<dyn Equation>>,
    stepper_salt: Option<Ssprk33Stage<Box<dyn Equation>>>,
    pipeline: DependencyUpdatePipeline,
    dt_2d: f64,
}

impl CoupledSsprkSingleMode {
    pub fn new(problem: CoupledProblem, fields: &FieldSet) -> Result<Self> {
        problem.validate("CoupledSsprkSingleMode")?;
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
        let dt_2d = options.dt_2d;
        tracing::debug!(dt_2d, "single-mode run, every system at the barotropic step");

        let mut pipeline = DependencyUpdatePipeline::new(options, constants, fields)?
            .with_coupling_mode(CouplingMode::AssignDepthAverage);
        if let Some(eq) = eq_vert_momentum {
            pipeline = pipeline.with_vert_diffusion(Box::new(
                CrankNicolson::new(eq, FieldId::Velocity3d)
                    .with_theta(0.6)
                    .with_semi_implicit(),
            ));
        }
        if let Some(turb) = turbulence {
            let mut updater = TurbulenceUpdater::new(
                turb.closure,
                Box::new(
                    CrankNicolson::new(turb.eq_psi, FieldId::Psi3d)
                        .with_theta(0.6)
                        .with_semi_implicit(),
                ),
                Box::new(
                    CrankNicolson::new(turb.eq_tke, FieldId::Tke3d)
                        .with_theta(0.6)
                        .with_semi_implicit(),
                ),
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
            stepper_2d: Ssprk33Stage::new(eq_sw, FieldId::Solution2d),
            stepper_mom: Ssprk33Stage::new(eq_momentum, FieldId::Velocity3d),
            stepper_salt: eq_salt.map(|eq| Ssprk33Stage::new(eq, FieldId::Salinity3d)),
            pipeline,
            dt_2d,
        })
    }
}

impl CoupledStepper for CoupledSsprkSingleMode {
    fn name(&self) -> &'static str {
        "CoupledSsprkSingleMode"
    }

    fn initialize(&mut self, fields: &mut FieldSet) -> Result<()> {
        self.pipeline.initialize(fields)?;
        self.stepper_2d.initialize(fields)?;
        self.stepper_mom.initialize(fields)?;
        if let Some(stepper) = self.stepper_salt.as_mut() {
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
        let dt = self.dt_2d;
        for stage in 0..3 {
            let last = stage == 2;

            if let Some(stepper) = self.stepper_salt.as_mut() {
                stepper.solve_stage(stage, t, dt, fields, reborrow(&mut forcing_3d))?;
                self.pipeline.limit_tracers(fields);
            }
            self.stepper_mom
                .solve_stage(stage, t, dt, fields, reborrow(&mut forcing_3d))?;
            self.stepper_2d
                .solve_stage(stage, t, dt, fields, reborrow(&mut forcing_2d))?;

            // the free surface must feed back into the 3D fields on every
            // stage; the expensive groups wait for the last one
            let flags = DependencyFlags {
                do_vert_diffusion: last,
                do_2d_coupling: true,
                do_ale_update: last,
                do_stab_params: last,
                do_turbulence: last,
            };
            self.pipeline.run(t, dt, fields, flags)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ModelOptions, PhysicalConstants};
    use crate::equation::EquationKind;
    use crate::fields::{self, solution2d, FieldId};

    use super::super::testutil::{problem_fields, Relax3d, Swe2d};
    use super::*;

    const TOL: f64 = 1e-12;

    fn base_problem(options: ModelOptions) -> CoupledProblem {
        CoupledProblem::new(
            options,
            PhysicalConstants::default(),
            Box::new(Swe2d {
                g: 0.01,
                depth: 0.25,
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
    fn the_2d_velocity_is_overwritten_by_the_depth_average() {
        let options = ModelOptions::new(10.0, 3.0);
        let mut fields = problem_fields(&options);
        {
            let grid = *fields.grid();
            let uv = fields.values_mut(FieldId::Velocity3d);
            for c in 0..2 {
                for l in 0..3 {
                    uv[grid.idx3(c, l, 2, 0)] = 0.2 * (l as f64 + 1.0);
                }
            }
        }
        fields.values_mut(FieldId::Solution2d)[solution2d::U] = 99.0;

        let mut stepper = CoupledSsprkSingleMode::new(base_problem(options), &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();
        stepper.advance(0.0, &mut fields, None, None).unwrap();

        let grid = *fields.grid();
        let heights = fields.values(FieldId::ElemHeight3d).to_vec();
        let mut dav = vec![0.0; 4];
        fields::depth_average(
            &grid,
            2,
            fields.values(FieldId::Velocity3d),
            &heights,
            &mut dav,
        );
        let sol = fields.values(FieldId::Solution2d);
        for c in 0..2 {
            assert!((sol[3 * c + solution2d::U] - dav[2 * c]).abs() < TOL);
            assert!((sol[3 * c + solution2d::V] - dav[2 * c + 1]).abs() < TOL);
        }
    }

    #[test]
    fn stages_run_at_the_barotropic_step() {
        let options = ModelOptions::new(10.0, 3.0);
        let mut fields = problem_fields(&options);
        let mut stepper = CoupledSsprkSingleMode::new(base_problem(options), &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();

        let mut times = Vec::new();
        let mut record = |t: f64| times.push(t);
        stepper
            .advance(6.0, &mut fields, Some(&mut record), None)
            .unwrap();
        assert_eq!(times, vec![6.0, 9.0, 7.5]);
    }
}
