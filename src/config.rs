//! Run-time configuration for the coupled integrator.
//!
//! All physical constants and model switches are passed explicitly into
//! constructors; there is no ambient global state. [`ModelOptions`] mirrors
//! the solver-context switches that select which sub-systems exist and
//! which dependency updates run.

/// Physical constants, passed explicitly (never looked up globally).
#[derive(Clone, Copy, Debug)]
pub struct PhysicalConstants {
    /// Gravitational acceleration (m/s²).
    pub g: f64,
    /// Reference density (kg/m³).
    pub rho_0: f64,
    /// Von Karman constant (bottom friction log layer).
    pub von_karman: f64,
    /// Bottom roughness length (m).
    pub z0_friction: f64,
    /// Haline contraction coefficient of the linear equation of state
    /// (1/psu).
    pub beta_saline: f64,
    /// Reference salinity of the linear equation of state (psu).
    pub salt_ref: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            g: 9.81,
            rho_0: 1025.0,
            von_karman: 0.4,
            z0_friction: 1.5e-3,
            beta_saline: 7.6e-4,
            salt_ref: 34.0,
        }
    }
}

/// Model switches and time steps consumed by the coupled recipes.
///
/// `dt` is the outer (3D, baroclinic) time step; `dt_2d` is the *target*
/// inner (barotropic) step. Sub-cycling recipes derive the actual inner
/// step per stage so that an integer number of inner steps exactly tiles
/// each stage interval.
#[derive(Clone, Debug)]
pub struct ModelOptions {
    /// Outer (3D) time step (s).
    pub dt: f64,
    /// Target inner (barotropic) time step (s).
    pub dt_2d: f64,
    /// Solve the salinity tracer equation.
    pub solve_salt: bool,
    /// Solve vertical diffusion of 3D momentum as a separate implicit step.
    pub solve_vert_diffusion: bool,
    /// Update the moving (ALE) mesh to follow the free surface.
    pub use_ale_moving_mesh: bool,
    /// Run the two-equation turbulence closure.
    pub use_turbulence: bool,
    /// Advect the turbulence quantities explicitly (IMEX/semi-implicit
    /// recipes only).
    pub use_turbulence_advection: bool,
    /// Apply the monotonicity limiter to tracers and turbulence quantities.
    pub use_limiter_for_tracers: bool,
    /// Compute the baroclinic pressure head from the tracer field.
    pub baroclinic: bool,
    /// Recompute bottom-friction fields after each sub-stage.
    pub use_bottom_friction: bool,
    /// Derive a parabolic eddy-viscosity profile from bottom friction.
    pub use_parabolic_viscosity: bool,
    /// Smagorinsky coefficient; `Some` enables Smagorinsky viscosity.
    pub smagorinsky_factor: Option<f64>,
    /// Tracer-jump diffusivity coefficient; `Some` enables jump diffusion.
    pub salt_jump_diff_factor: Option<f64>,
    /// Expected salinity range for jump-diffusivity scaling (PSU).
    pub salt_range: f64,
}

impl ModelOptions {
    /// Create options with the given time steps and everything disabled.
    pub fn new(dt: f64, dt_2d: f64) -> Self {
        Self {
            dt,
            dt_2d,
            solve_salt: false,
            solve_vert_diffusion: false,
            use_ale_moving_mesh: false,
            use_turbulence: false,
            use_turbulence_advection: false,
            use_limiter_for_tracers: false,
            baroclinic: false,
            use_bottom_friction: false,
            use_parabolic_viscosity: false,
            smagorinsky_factor: None,
            salt_jump_diff_factor: None,
            salt_range: 30.0,
        }
    }

    /// Enable the salinity equation.
    pub fn with_salt(mut self) -> Self {
        self.solve_salt = true;
        self
    }

    /// Enable the implicit vertical-diffusion step.
    pub fn with_vert_diffusion(mut self) -> Self {
        self.solve_vert_diffusion = true;
        self
    }

    /// Enable the ALE moving mesh.
    pub fn with_ale_moving_mesh(mut self) -> Self {
        self.use_ale_moving_mesh = true;
        self
    }

    /// Enable the turbulence closure.
    pub fn with_turbulence(mut self) -> Self {
        self.use_turbulence = true;
        self
    }

    /// Enable the tracer limiter.
    pub fn with_tracer_limiter(mut self) -> Self {
        self.use_limiter_for_tracers = true;
        self
    }

    /// Enable baroclinic pressure-head computation.
    pub fn with_baroclinic(mut self) -> Self {
        self.baroclinic = true;
        self
    }

    /// Enable bottom-friction recomputation.
    pub fn with_bottom_friction(mut self) -> Self {
        self.use_bottom_friction = true;
        self
    }

    /// Enable the parabolic eddy-viscosity profile.
    pub fn with_parabolic_viscosity(mut self) -> Self {
        self.use_parabolic_viscosity = true;
        self
    }

    /// Enable turbulence-quantity advection alongside the closure.
    pub fn with_turbulence_advection(mut self) -> Self {
        self.use_turbulence_advection = true;
        self
    }

    /// Enable Smagorinsky viscosity with the given coefficient.
    pub fn with_smagorinsky(mut self, factor: f64) -> Self {
        self.smagorinsky_factor = Some(factor);
        self
    }

    /// Enable tracer-jump diffusivity with the given coefficient.
    pub fn with_jump_diffusivity(mut self, factor: f64) -> Self {
        self.salt_jump_diff_factor = Some(factor);
        self
    }
}
