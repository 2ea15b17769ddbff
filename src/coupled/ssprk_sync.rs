//! Fully explicit mode-split integrator with synchronized 2D sub-cycling.

use crate::equation::Equation;
use crate::error::Result;
use crate::fields::{self, FieldId, FieldSet};
use crate::pipeline::{DependencyFlags, DependencyUpdatePipeline};
use crate::stepper::{
    reborrow, CrankNicolson, Forcing, Ssprk33, Ssprk33Stage, StageStepper, TimeStepper,
};
use crate::turbulence::TurbulenceUpdater;

use super::stages::{subcycles, StageWeights, SubCycle};
use super::{CoupledProblem, CoupledStepper};

/// SSPRK(3,3) for the 3D systems with the barotropic system sub-cycled
/// inside each stage window.
///
/// Per stage `k` the 3D tracer and momentum stages are solved first, then
/// the 2D solution is reset to the Shu–Osher blend of the step-start
/// value and sub-cycled with `n_steps[k]` whole SSPRK(3,3) steps across
/// the stage window. Dependency updates run after every stage, with the
/// expensive groups deferred to the last one.
pub struct CoupledSsprkSync {
    stepper_2d: Ssprk33<Box<dyn Equation>>,
    stepper_mom: Ssprk33Stage<Box<dyn Equation>>,
    stepper_salt: Option<Ssprk33Stage<Box<dyn Equation>>>,
    pipeline: DependencyUpdatePipeline,
    weights: StageWeights,
    cycles: [SubCycle; 3],
    dt: f64,
    sol2d_n: Vec<f64>,
}

impl std::fmt::Debug for CoupledSsprkSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoupledSsprkSync").finish_non_exhaustive()
    }
}

impl CoupledSsprkSync {
    pub fn new(problem: CoupledProblem, fields: &FieldSet) -> Result<Self> {
        problem.validate("CoupledSsprkSync")?;
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

        let weights = StageWeights::ssprk33();
        let cycles = subcycles(&weights, &options);
        let dt = options.dt;

        let mut pipeline = DependencyUpdatePipeline::new(options, constants, fields)?;
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

        let n_sol2d = eq_sw.n_dofs();
        Ok(Self {
            stepper_2d: Ssprk33::new(eq_sw, FieldId::Solution2d),
            stepper_mom: Ssprk33Stage::new(eq_momentum, FieldId::Velocity3d),
            stepper_salt: eq_salt.map(|eq| Ssprk33Stage::new(eq, FieldId::Salinity3d)),
            pipeline,
            weights,
            cycles,
            dt,
            sol2d_n: vec![0.0; n_sol2d],
        })
    }
}

impl CoupledStepper for CoupledSsprkSync {
    fn name(&self) -> &'static str {
        "CoupledSsprkSync"
    }

    fn initialize(&mut self, fields: &mut FieldSet) -> Result<()> {
        self.pipeline.initialize(fields)?;
        self.stepper_2d.initialize(fields)?;
        self.stepper_mom.initialize(fields)?;
        if let Some(stepper) = self.stepper_salt.as_mut() {
            stepper.initialize(fields)?;
        }
        self.sol2d_n
            .copy_from_slice(fields.values(FieldId::Solution2d));
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
        self.sol2d_n
            .copy_from_slice(fields.values(FieldId::Solution2d));

        for stage in 0..3 {
            let last = stage == 2;

            if let Some(stepper) = self.stepper_salt.as_mut() {
                stepper.solve_stage(stage, t, dt, fields, reborrow(&mut forcing_3d))?;
                self.pipeline.limit_tracers(fields);
            }
            self.stepper_mom
                .solve_stage(stage, t, dt, fields, reborrow(&mut forcing_3d))?;

            // reset the 2D solution to the Shu–Osher blend, then tile the
            // stage window with whole barotropic steps
            let w = self.weights.stage_w[stage];
            fields::blend(fields.values_mut(FieldId::Solution2d), w, &self.sol2d_n);
            let cycle = self.cycles[stage];
            let t_rhs = t + self.weights.start_frac[stage] * dt;
            for i in 0..cycle.n_steps {
                self.stepper_2d.advance(
                    t_rhs + i as f64 * cycle.dt_inner,
                    cycle.dt_inner,
                    fields,
                    reborrow(&mut forcing_2d),
                )?;
            }

            self.pipeline
                .run(t, dt, fields, DependencyFlags::last_step(last))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::config::{ModelOptions, PhysicalConstants};
    use crate::equation::EquationKind;
    use crate::error::ModelError;
    use crate::fields::{solution2d, FieldId};
    use crate::limiter::ClampLimiter;

    use super::super::testutil::{problem_fields, Relax3d, Swe2d};
    use super::*;

    const TOL: f64 = 1e-12;

    fn base_problem(options: ModelOptions) -> CoupledProblem {
        CoupledProblem::new(
            options,
            PhysicalConstants::default(),
            Box::new(Swe2d {
                g: 9.81,
                depth: 15.0,
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
    fn construction_rejects_a_missing_salt_equation() {
        let options = ModelOptions::new(10.0, 3.0).with_salt();
        let fields = problem_fields(&options);
        let err = CoupledSsprkSync::new(base_problem(options), &fields).unwrap_err();
        assert!(matches!(err, ModelError::MissingEquation { .. }));
    }

    #[test]
    fn subcycling_visits_every_stage_window() {
        let options = ModelOptions::new(10.0, 3.0);
        let mut fields = problem_fields(&options);
        let mut stepper = CoupledSsprkSync::new(base_problem(options), &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();

        let mut times = Vec::new();
        let mut record = |t: f64| times.push(t);
        stepper
            .advance(0.0, &mut fields, Some(&mut record), None)
            .unwrap();

        // M = [4, 1, 3]: each inner step evaluates three stage residuals
        assert_eq!(times.len(), 3 * (4 + 1 + 3));
        assert_eq!(times[0], 0.0);
        // last inner step of the last stage starts at 1/3*10 + 2*20/9
        let last_start = 10.0 / 3.0 + 2.0 * 20.0 / 9.0;
        assert!((times[times.len() - 3] - last_start).abs() < 1e-10);
        // the final stage residual never looks past the macro step by more
        // than the inner step length
        for &ts in &times {
            assert!(ts <= 10.0 + 10.0 / 3.0 + TOL);
        }
    }

    #[test]
    fn coupling_leaves_the_3d_depth_average_on_the_2d_velocity() {
        let options = ModelOptions::new(10.0, 3.0);
        let mut fields = problem_fields(&options);
        {
            let grid = *fields.grid();
            let uv = fields.values_mut(FieldId::Velocity3d);
            for c in 0..2 {
                for l in 0..3 {
                    uv[grid.idx3(c, l, 2, 0)] = 0.1 * (l as f64 + 1.0);
                }
            }
        }
        let mut stepper = CoupledSsprkSync::new(base_problem(options), &fields).unwrap();
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
            assert!((dav[2 * c] - sol[3 * c + solution2d::U]).abs() < TOL);
            assert!((dav[2 * c + 1] - sol[3 * c + solution2d::V]).abs() < TOL);
        }
    }

    #[test]
    fn tracer_limiter_clamps_after_every_stage() {
        let options = ModelOptions::new(10.0, 3.0).with_salt().with_tracer_limiter();
        let mut fields = problem_fields(&options);
        fields.values_mut(FieldId::Salinity3d).fill(-5.0);

        let problem = base_problem(options)
            .with_salt(Box::new(Relax3d {
                kind: EquationKind::Tracer3d,
                rate: 0.0,
                n: 12,
            }))
            .with_limiter(Rc::new(ClampLimiter::new(0.0, 35.0)));
        let mut stepper = CoupledSsprkSync::new(problem, &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();
        stepper.advance(0.0, &mut fields, None, None).unwrap();

        assert!(fields.values(FieldId::Salinity3d).iter().all(|&s| s >= 0.0));
    }
}
