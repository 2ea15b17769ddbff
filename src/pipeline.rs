//! Ordered dependency updates run between coupled stages.
//!
//! After any stage of a coupled step the derived fields must be refreshed
//! in a fixed order, since each group feeds the next: elevation first
//! (the mesh follows the free surface), then the moving mesh, implicit
//! vertical diffusion, 2D/3D velocity coupling, the diagnosed vertical
//! velocity, turbulence, mesh velocity, bottom friction, baroclinicity
//! and finally the stabilization parameters. [`DependencyFlags`] gates
//! the groups a recipe wants after a particular stage; [`ModelOptions`]
//! gates the groups that exist at all.

use std::rc::Rc;

use crate::config::{ModelOptions, PhysicalConstants};
use crate::diagnostics;
use crate::error::Result;
use crate::fields::{self, solution2d, FieldId, FieldSet};
use crate::limiter::TracerLimiter;
use crate::mesh;
use crate::stepper::TimeStepper;
use crate::turbulence::TurbulenceUpdater;

/// Update groups requested after a stage.
///
/// Expensive groups (vertical diffusion, turbulence, stabilization) are
/// typically requested only after the last stage of a macro step; the
/// cheap kinematic groups run after every stage.
#[derive(Clone, Copy, Debug)]
pub struct DependencyFlags {
    pub do_vert_diffusion: bool,
    pub do_2d_coupling: bool,
    pub do_ale_update: bool,
    pub do_stab_params: bool,
    pub do_turbulence: bool,
}

impl DependencyFlags {
    pub fn all() -> Self {
        Self {
            do_vert_diffusion: true,
            do_2d_coupling: true,
            do_ale_update: true,
            do_stab_params: true,
            do_turbulence: true,
        }
    }

    pub fn none() -> Self {
        Self {
            do_vert_diffusion: false,
            do_2d_coupling: false,
            do_ale_update: false,
            do_stab_params: false,
            do_turbulence: false,
        }
    }

    /// Every group gated on being the last stage of the macro step.
    pub fn last_step(last: bool) -> Self {
        if last {
            Self::all()
        } else {
            Self::none()
        }
    }

    /// Kinematics after every stage, expensive groups on the last one.
    pub fn stage(last: bool) -> Self {
        Self {
            do_vert_diffusion: last,
            do_2d_coupling: true,
            do_ale_update: true,
            do_stab_params: last,
            do_turbulence: last,
        }
    }
}

/// How the 2D solution feeds back into the 3D velocity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CouplingMode {
    /// Replace the depth average of the 3D velocity by the 2D velocity
    /// (the mode-split correction).
    Correction,
    /// Overwrite the 2D velocity with the depth average of the 3D
    /// velocity (single-mode runs where the 2D system is not solved).
    AssignDepthAverage,
}

/// Runs the ordered dependency updates between coupled stages.
pub struct DependencyUpdatePipeline {
    options: ModelOptions,
    constants: PhysicalConstants,
    coupling_mode: CouplingMode,
    vert_diffusion: Option<Box<dyn TimeStepper>>,
    turbulence: Option<TurbulenceUpdater>,
    limiter: Option<Rc<dyn TracerLimiter>>,
}

impl std::fmt::Debug for DependencyUpdatePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyUpdatePipeline").finish_non_exhaustive()
    }
}

/// Fields a pipeline with the given options reads or writes.
pub fn required_fields(options: &ModelOptions) -> Vec<FieldId> {
    let mut ids = vec![
        FieldId::Solution2d,
        FieldId::Elevation3d,
        FieldId::Velocity3d,
        FieldId::VertVelocity3d,
        FieldId::DepthAvgVelocity2d,
        FieldId::DepthAvgVelocity3d,
        FieldId::Bathymetry2d,
        FieldId::ElemHeight2d,
        FieldId::ElemHeight3d,
    ];
    if options.use_ale_moving_mesh {
        ids.extend([
            FieldId::Bathymetry3d,
            FieldId::ZCoord3d,
            FieldId::ZCoordRef3d,
            FieldId::MeshVelocity3d,
            FieldId::MeshVelocitySurf3d,
            FieldId::MeshVelocitySurf2d,
            FieldId::MeshVelocityDz3d,
        ]);
    }
    if options.use_bottom_friction || options.use_parabolic_viscosity {
        ids.extend([
            FieldId::ZBottom2d,
            FieldId::ZBottom3d,
            FieldId::BottomDrag2d,
            FieldId::BottomDrag3d,
            FieldId::BottomVelocity2d,
            FieldId::BottomVelocity3d,
        ]);
    }
    if options.use_parabolic_viscosity {
        ids.push(FieldId::ParabViscosity3d);
    }
    if options.solve_salt {
        ids.push(FieldId::Salinity3d);
    }
    if options.baroclinic {
        ids.extend([
            FieldId::Salinity3d,
            FieldId::BaroHead3d,
            FieldId::BaroHeadInt3d,
            FieldId::BaroHead2d,
        ]);
    }
    if options.smagorinsky_factor.is_some() || options.salt_jump_diff_factor.is_some() {
        ids.extend([FieldId::VelocityMag3d, FieldId::HElemSize3d]);
    }
    if options.smagorinsky_factor.is_some() {
        ids.extend([FieldId::VelocityP1_3d, FieldId::SmagViscosity3d]);
    }
    if options.salt_jump_diff_factor.is_some() {
        ids.extend([FieldId::Salinity3d, FieldId::JumpDiffusivity3d]);
    }
    if options.use_turbulence {
        ids.extend([FieldId::Tke3d, FieldId::Psi3d]);
    }
    ids.sort_by_key(|id| id.index());
    ids.dedup();
    ids
}

impl DependencyUpdatePipeline {
    /// Validate that every field the enabled groups touch is registered.
    pub fn new(
        options: ModelOptions,
        constants: PhysicalConstants,
        fields: &FieldSet,
    ) -> Result<Self> {
        for id in required_fields(&options) {
            fields.require(id)?;
        }
        Ok(Self {
            options,
            constants,
            coupling_mode: CouplingMode::Correction,
            vert_diffusion: None,
            turbulence: None,
            limiter: None,
        })
    }

    pub fn with_coupling_mode(mut self, mode: CouplingMode) -> Self {
        self.coupling_mode = mode;
        self
    }

    /// Implicit vertical-diffusion stepper for the 3D velocity, run when
    /// both the option and the stage flag enable it.
    pub fn with_vert_diffusion(mut self, stepper: Box<dyn TimeStepper>) -> Self {
        self.vert_diffusion = Some(stepper);
        self
    }

    pub fn with_turbulence(mut self, updater: TurbulenceUpdater) -> Self {
        self.turbulence = Some(updater);
        self
    }

    pub fn with_limiter(mut self, limiter: Rc<dyn TracerLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn constants(&self) -> &PhysicalConstants {
        &self.constants
    }

    pub fn limiter(&self) -> Option<&Rc<dyn TracerLimiter>> {
        self.limiter.as_ref()
    }

    /// Seed the static derived fields and initialize the owned steppers.
    pub fn initialize(&mut self, fields: &mut FieldSet) -> Result<()> {
        if fields.has(FieldId::HElemSize3d) {
            diagnostics::init_h_elem_size(fields);
        }
        if self.options.use_ale_moving_mesh {
            mesh::init_reference_coordinates(fields);
            mesh::update_coordinates(fields);
        }
        if let Some(stepper) = self.vert_diffusion.as_mut() {
            stepper.initialize(fields)?;
        }
        if let Some(turbulence) = self.turbulence.as_mut() {
            turbulence.initialize(fields)?;
        }
        Ok(())
    }

    /// Apply the tracer limiter to the salinity field, if both exist.
    pub fn limit_tracers(&self, fields: &mut FieldSet) {
        if !self.options.use_limiter_for_tracers {
            return;
        }
        if let Some(limiter) = &self.limiter {
            if self.options.solve_salt {
                limiter.apply(fields.values_mut(FieldId::Salinity3d));
            }
        }
    }

    /// Run the enabled update groups in their fixed order.
    pub fn run(
        &mut self,
        t: f64,
        dt: f64,
        fields: &mut FieldSet,
        flags: DependencyFlags,
    ) -> Result<()> {
        tracing::trace!(t, ?flags, "dependency update");

        self.update_3d_elevation(fields);
        if flags.do_ale_update && self.options.use_ale_moving_mesh {
            mesh::update_coordinates(fields);
        }
        if flags.do_vert_diffusion && self.options.solve_vert_diffusion {
            if let Some(stepper) = self.vert_diffusion.as_mut() {
                stepper.advance(t, dt, fields, None)?;
            }
        }
        if flags.do_2d_coupling {
            self.update_2d_coupling(fields);
        }
        diagnostics::compute_vert_velocity(fields);
        if flags.do_turbulence && self.options.use_turbulence {
            if let Some(turbulence) = self.turbulence.as_mut() {
                turbulence.update(t, dt, fields)?;
            }
        }
        if flags.do_ale_update && self.options.use_ale_moving_mesh {
            mesh::compute_mesh_velocity(fields);
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
        if flags.do_stab_params {
            self.update_stabilization(fields);
        }
        Ok(())
    }

    /// Broadcast the 2D elevation down the 3D columns.
    fn update_3d_elevation(&self, fields: &mut FieldSet) {
        let grid = *fields.grid();
        let eta: Vec<f64> = (0..grid.n_columns)
            .map(|c| fields.values(FieldId::Solution2d)[3 * c + solution2d::ETA])
            .collect();
        fields::copy_surface_to_volume(&grid, 1, &eta, fields.values_mut(FieldId::Elevation3d));
    }

    /// Exchange velocity information between the 2D and 3D modes.
    fn update_2d_coupling(&self, fields: &mut FieldSet) {
        let grid = *fields.grid();
        let heights = fields.values(FieldId::ElemHeight3d).to_vec();

        let mut dav2d = vec![0.0; grid.n_columns * 2];
        fields::depth_average(
            &grid,
            2,
            fields.values(FieldId::Velocity3d),
            &heights,
            &mut dav2d,
        );
        fields.values_mut(FieldId::DepthAvgVelocity2d)
            .copy_from_slice(&dav2d);

        match self.coupling_mode {
            CouplingMode::Correction => {
                // shift the 3D depth average onto the 2D solution
                let uv2d: Vec<f64> = {
                    let sol = fields.values(FieldId::Solution2d);
                    (0..grid.n_columns * 2)
                        .map(|i| sol[3 * (i / 2) + (i % 2)])
                        .collect()
                };
                {
                    let uv3d = fields.values_mut(FieldId::Velocity3d);
                    for c in 0..grid.n_columns {
                        for m in 0..2 {
                            let shift = uv2d[2 * c + m] - dav2d[2 * c + m];
                            for l in 0..grid.n_levels {
                                uv3d[grid.idx3(c, l, 2, m)] += shift;
                            }
                        }
                    }
                }
                fields::copy_surface_to_volume(
                    &grid,
                    2,
                    &uv2d,
                    fields.values_mut(FieldId::DepthAvgVelocity3d),
                );
            }
            CouplingMode::AssignDepthAverage => {
                {
                    let sol = fields.values_mut(FieldId::Solution2d);
                    for c in 0..grid.n_columns {
                        sol[3 * c + solution2d::U] = dav2d[2 * c];
                        sol[3 * c + solution2d::V] = dav2d[2 * c + 1];
                    }
                }
                fields::copy_surface_to_volume(
                    &grid,
                    2,
                    &dav2d,
                    fields.values_mut(FieldId::DepthAvgVelocity3d),
                );
            }
        }
    }

    /// Refresh the stabilization parameter fields.
    fn update_stabilization(&self, fields: &mut FieldSet) {
        let needs_magnitude = self.options.smagorinsky_factor.is_some()
            || self.options.salt_jump_diff_factor.is_some();
        if needs_magnitude {
            diagnostics::compute_velocity_magnitude(fields);
        }
        if let Some(factor) = self.options.smagorinsky_factor {
            diagnostics::project_velocity_p1(fields);
            diagnostics::compute_smagorinsky_viscosity(fields, factor);
        }
        if let Some(factor) = self.options.salt_jump_diff_factor {
            diagnostics::compute_jump_diffusivity(fields, factor, self.options.salt_range);
        }
    }
}
