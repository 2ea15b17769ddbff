//! Mode-split integrator with a time-averaged barotropic mode.

use std::rc::Rc;

use crate::config::{ModelOptions, PhysicalConstants};
use crate::diagnostics;
use crate::equation::Equation;
use crate::error::Result;
use crate::fields::{self, solution2d, FieldId, FieldSet};
use crate::limiter::TracerLimiter;
use crate::mesh;
use crate::pipeline::required_fields;
use crate::stepper::{reborrow, CrankNicolson, Forcing, Ssprk33, TimeStepper};

use super::{CoupledProblem, CoupledStepper};

/// Barotropic averaging integrator.
///
/// The 2D system is stepped `2M` times across the double window
/// `[t, t + 2 dt]`; the macro-step solution is the flat time average of
/// the visited states (filtering the fast gravity waves the 3D step
/// cannot resolve) and the mid-step free surface is the average over the
/// first half window. The 3D systems then take one whole step against
/// the averaged, hand-sequenced dependency fields, and the 2D velocity
/// restarts from the new 3D depth average.
pub struct CoupledMacroStep {
    stepper_2d: Ssprk33<Box<dyn Equation>>,
    stepper_mom: Ssprk33<Box<dyn Equation>>,
    stepper_salt: Option<Ssprk33<Box<dyn Equation>>>,
    vert_diffusion: Option<Box<dyn TimeStepper>>,
    limiter: Option<Rc<dyn TracerLimiter>>,
    options: ModelOptions,
    constants: PhysicalConstants,
    /// 2D steps per half window.
    n_substeps: usize,
    dt_inner: f64,
    sum: Vec<f64>,
    sum_half: Vec<f64>,
}

impl std::fmt::Debug for CoupledMacroStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoupledMacroStep").finish_non_exhaustive()
    }
}

impl CoupledMacroStep {
    pub fn new(problem: CoupledProblem, fields: &FieldSet) -> Result<Self> {
        problem.validate("CoupledMacroStep")?;
        let CoupledProblem {
            options,
            constants,
            eq_sw,
            eq_momentum,
            eq_vert_momentum,
            eq_salt,
            turbulence: _,
            limiter,
        } = problem;
        for id in required_fields(&options) {
            fields.require(id)?;
        }
        fields.require(FieldId::Elevation3dNplusHalf)?;

        let n_substeps = (options.dt / options.dt_2d).ceil().max(1.0) as usize;
        let dt_inner = options.dt / n_substeps as f64;
        tracing::info!(n_substeps, dt_inner, "barotropic averaging schedule");

        let n_sol2d = eq_sw.n_dofs();
        Ok(Self {
            stepper_2d: Ssprk33::new(eq_sw, FieldId::Solution2d),
            stepper_mom: Ssprk33::new(eq_momentum, FieldId::Velocity3d),
            stepper_salt: eq_salt.map(|eq| Ssprk33::new(eq, FieldId::Salinity3d)),
            vert_diffusion: eq_vert_momentum.map(|eq| {
                Box::new(
                    CrankNicolson::new(eq, FieldId::Velocity3d)
                        .with_theta(0.6)
                        .with_semi_implicit(),
                ) as Box<dyn TimeStepper>
            }),
            limiter,
            options,
            constants,
            n_substeps,
            dt_inner,
            sum: vec![0.0; n_sol2d],
            sum_half: vec![0.0; n_sol2d],
        })
    }

    /// Sub-cycle the 2D system over `[t, t + 2 dt]` and replace its state
    /// by the window average; returns the half-window elevation average.
    fn advance_2d_averaged(
        &mut self,
        t: f64,
        fields: &mut FieldSet,
        mut forcing_2d: Forcing<'_>,
    ) -> Result<Vec<f64>> {
        let m = self.n_substeps;
        self.sum.copy_from_slice(fields.values(FieldId::Solution2d));
        self.sum_half.copy_from_slice(&self.sum);

        for i in 0..2 * m {
            self.stepper_2d.advance(
                t + i as f64 * self.dt_inner,
                self.dt_inner,
                fields,
                reborrow(&mut forcing_2d),
            )?;
            let sol = fields.values(FieldId::Solution2d);
            fields::axpy(&mut self.sum, 1.0, sol);
            if i < m {
                fields::axpy(&mut self.sum_half, 1.0, sol);
            }
        }
        fields::scale(&mut self.sum, 1.0 / (2 * m + 1) as f64);
        fields::scale(&mut self.sum_half, 1.0 / (m + 1) as f64);

        fields
            .values_mut(FieldId::Solution2d)
            .copy_from_slice(&self.sum);
        let n_columns = fields.grid().n_columns;
        Ok((0..n_columns)
            .map(|c| self.sum_half[3 * c + solution2d::ETA])
            .collect())
    }

    fn broadcast_elevations(&self, fields: &mut FieldSet, eta_half: &[f64]) {
        let grid = *fields.grid();
        let eta: Vec<f64> = (0..grid.n_columns)
            .map(|c| fields.values(FieldId::Solution2d)[3 * c + solution2d::ETA])
            .collect();
        fields::copy_surface_to_volume(&grid, 1, &eta, fields.values_mut(FieldId::Elevation3d));
        fields::copy_surface_to_volume(
            &grid,
            1,
            eta_half,
            fields.values_mut(FieldId::Elevation3dNplusHalf),
        );
    }

    /// Restart the 2D velocity from the new 3D depth average.
    fn restart_2d_from_depth_average(&self, fields: &mut FieldSet) {
        let grid = *fields.grid();
        let heights = fields.values(FieldId::ElemHeight3d).to_vec();
        let mut dav = vec![0.0; grid.n_columns * 2];
        fields::depth_average(
            &grid,
            2,
            fields.values(FieldId::Velocity3d),
            &heights,
            &mut dav,
        );
        fields
            .values_mut(FieldId::DepthAvgVelocity2d)
            .copy_from_slice(&dav);
        {
            let sol = fields.values_mut(FieldId::Solution2d);
            for c in 0..grid.n_columns {
                sol[3 * c + solution2d::U] = dav[2 * c];
                sol[3 * c + solution2d::V] = dav[2 * c + 1];
            }
        }
        fields::copy_surface_to_volume(
            &grid,
            2,
            &dav,
            fields.values_mut(FieldId::DepthAvgVelocity3d),
        );
    }
}

impl CoupledStepper for CoupledMacroStep {
    fn name(&self) -> &'static str {
        "CoupledMacroStep"
    }

    fn initialize(&mut self, fields: &mut FieldSet) -> Result<()> {
        if fields.has(FieldId::HElemSize3d) {
            diagnostics::init_h_elem_size(fields);
        }
        if self.options.use_ale_moving_mesh {
            mesh::init_reference_coordinates(fields);
            mesh::update_coordinates(fields);
        }
        self.stepper_2d.initialize(fields)?;
        self.stepper_mom.initialize(fields)?;
        if let Some(stepper) = self.stepper_salt.as_mut() {
            stepper.initialize(fields)?;
        }
        if let Some(stepper) = self.vert_diffusion.as_mut() {
            stepper.initialize(fields)?;
        }
        Ok(())
    }

    fn advance(
        &mut self,
        t: f64,
        fields: &mut FieldSet,
        forcing_2d: Forcing<'_>,
        mut forcing_3d: Forcing<'_>,
    ) -> Result<()> {
        let dt = self.options.dt;

        let eta_half = self.advance_2d_averaged(t, fields, forcing_2d)?;
        self.broadcast_elevations(fields, &eta_half);
        if self.options.use_ale_moving_mesh {
            mesh::update_coordinates(fields);
        }
        if self.options.use_bottom_friction {
            diagnostics::compute_bottom_friction(fields, &self.constants);
            if self.options.use_parabolic_viscosity {
                diagnostics::compute_parabolic_viscosity(fields, &self.constants);
            }
        }
        if self.options.baroclinic {
            diagnostics::compute_baroclinic_head(fields, &self.constants);
        }

        self.stepper_mom
            .advance(t, dt, fields, reborrow(&mut forcing_3d))?;
        if self.options.solve_vert_diffusion {
            if let Some(stepper) = self.vert_diffusion.as_mut() {
                stepper.advance(t, dt, fields, None)?;
            }
        }
        diagnostics::compute_vert_velocity(fields);
        if self.options.use_ale_moving_mesh {
            mesh::compute_mesh_velocity(fields);
        }

        if let Some(stepper) = self.stepper_salt.as_mut() {
            stepper.advance(t, dt, fields, reborrow(&mut forcing_3d))?;
            if self.options.use_limiter_for_tracers {
                if let Some(limiter) = &self.limiter {
                    limiter.apply(fields.values_mut(FieldId::Salinity3d));
                }
            }
        }

        self.restart_2d_from_depth_average(fields);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ModelOptions, PhysicalConstants};
    use crate::equation::{EquationKind, TermGroup};
    use crate::mesh::Geometry;

    use super::super::testutil::{problem_fields, Relax3d};
    use super::*;

    const TOL: f64 = 1e-12;

    /// Free surface rising at a constant rate; velocity frozen.
    struct Ramp2d {
        rate: f64,
        n_columns: usize,
    }

    impl Equation for Ramp2d {
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
            _u: &[f64],
            _u_nl: &[f64],
            _fields: &FieldSet,
            _fields_old: &FieldSet,
            _t: f64,
            out: &mut [f64],
        ) {
            for c in 0..self.n_columns {
                out[3 * c + solution2d::U] = 0.0;
                out[3 * c + solution2d::V] = 0.0;
                out[3 * c + solution2d::ETA] = self.rate;
            }
        }
    }

    fn ramp_problem(options: ModelOptions, rate: f64) -> CoupledProblem {
        CoupledProblem::new(
            options,
            PhysicalConstants::default(),
            Box::new(Ramp2d {
                rate,
                n_columns: 2,
            }),
            Box::new(Relax3d {
                kind: EquationKind::Momentum3d,
                rate: 0.05,
                n: 12,
            }),
        )
    }

    fn macro_fields(options: &ModelOptions) -> FieldSet {
        let mut f = problem_fields(options);
        f.register(FieldId::Elevation3dNplusHalf);
        f
    }

    #[test]
    fn averaging_centers_the_free_surface_on_the_macro_step() {
        // on a linear ramp the flat average over [t, t + 2 dt] lands
        // exactly on t + dt, and the half-window average on t + dt/2
        let rate = 0.1;
        let options = ModelOptions::new(10.0, 3.0);
        let mut fields = macro_fields(&options);
        for c in 0..2 {
            fields.values_mut(FieldId::Solution2d)[3 * c + solution2d::ETA] = 1.0;
        }
        let mut stepper = CoupledMacroStep::new(ramp_problem(options, rate), &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();
        stepper.advance(0.0, &mut fields, None, None).unwrap();

        let sol = fields.values(FieldId::Solution2d);
        for c in 0..2 {
            assert!((sol[3 * c + solution2d::ETA] - 2.0).abs() < TOL);
        }
        for &eta in fields.values(FieldId::Elevation3d) {
            assert!((eta - 2.0).abs() < TOL);
        }
        for &eta in fields.values(FieldId::Elevation3dNplusHalf) {
            assert!((eta - 1.5).abs() < TOL);
        }
    }

    #[test]
    fn the_2d_velocity_restarts_from_the_3d_depth_average() {
        let options = ModelOptions::new(10.0, 3.0);
        let mut fields = macro_fields(&options);
        {
            let grid = *fields.grid();
            let uv = fields.values_mut(FieldId::Velocity3d);
            for c in 0..2 {
                for l in 0..3 {
                    uv[grid.idx3(c, l, 2, 0)] = 0.3 * (l as f64 + 1.0);
                }
            }
        }
        let mut stepper = CoupledMacroStep::new(ramp_problem(options, 0.0), &fields).unwrap();
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
        }
    }

    #[test]
    fn the_2d_window_covers_a_double_macro_step() {
        let options = ModelOptions::new(10.0, 3.0);
        let mut fields = macro_fields(&options);
        let mut stepper = CoupledMacroStep::new(ramp_problem(options, 0.0), &fields).unwrap();
        stepper.initialize(&mut fields).unwrap();

        let mut times = Vec::new();
        let mut record = |t: f64| times.push(t);
        stepper
            .advance(5.0, &mut fields, Some(&mut record), None)
            .unwrap();

        // 2 * ceil(10/3) = 8 substeps, three residuals each
        assert_eq!(times.len(), 24);
        assert_eq!(times[0], 5.0);
        for &ts in &times {
            assert!(ts >= 5.0 - TOL && ts <= 25.0 + TOL);
        }
    }

    #[test]
    fn missing_mid_step_elevation_field_is_rejected() {
        let options = ModelOptions::new(10.0, 3.0);
        let fields = problem_fields(&options);
        let err = CoupledMacroStep::new(ramp_problem(options, 0.0), &fields).unwrap_err();
        assert!(matches!(err, crate::error::ModelError::MissingField(_)));
    }
}
