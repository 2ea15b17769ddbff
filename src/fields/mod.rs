//! Field arena with typed handles.
//!
//! State and diagnostic fields are stored in a [`FieldSet`] arena owned by
//! the coupled orchestrator. Each field is addressed by a [`FieldId`]
//! handle resolved once at setup; the per-stage hot loop never performs
//! string lookups.
//!
//! # Memory layout
//!
//! All field data lives in contiguous `Vec<f64>` buffers for
//! cache-friendly access and LLVM auto-vectorization. A 3D (volume) field
//! with `n_comp` components is laid out column-major:
//! `value(column, level, comp) = data[(column * n_levels + level) * n_comp + comp]`.
//! Level 0 is the bottom cell, level `n_levels - 1` the surface cell.
//! A 2D (surface) field drops the level index.

mod ops;

pub use ops::*;

use crate::error::{ModelError, Result};

/// Component indices of the packed 2D mode solution
/// [`FieldId::Solution2d`].
pub mod solution2d {
    /// x-velocity component.
    pub const U: usize = 0;
    /// y-velocity component.
    pub const V: usize = 1;
    /// Free-surface elevation component.
    pub const ETA: usize = 2;
}

/// Spatial support of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldLocation {
    /// 2D surface field: one value set per column.
    Surface,
    /// 3D extruded field: one value set per column and level.
    Volume,
}

/// Typed handle of a state or diagnostic field.
///
/// The packed 2D mode solution [`FieldId::Solution2d`] carries three
/// components `(u, v, eta)` per column, mirroring the mixed
/// velocity–elevation solution of the shallow-water system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldId {
    /// Packed 2D mode solution `(u, v, eta)`.
    Solution2d,
    /// Free-surface elevation projected to the 3D mesh.
    Elevation3d,
    /// Free-surface elevation at `t_{n+1/2}` (macro-step recipe only).
    Elevation3dNplusHalf,
    /// 3D horizontal velocity `(u, v)`.
    Velocity3d,
    /// Vertical velocity diagnosed from continuity.
    VertVelocity3d,
    /// Depth-averaged 3D velocity on the 2D mesh `(u, v)`.
    DepthAvgVelocity2d,
    /// Depth-averaged 3D velocity broadcast back to the 3D mesh `(u, v)`.
    DepthAvgVelocity3d,
    /// Salinity tracer.
    Salinity3d,
    /// Turbulent kinetic energy.
    Tke3d,
    /// Second turbulence quantity (generic length scale).
    Psi3d,
    /// Bathymetry (positive depth) on the 2D mesh.
    Bathymetry2d,
    /// Bathymetry broadcast to the 3D mesh.
    Bathymetry3d,
    /// Current vertical coordinate of each 3D cell center.
    ZCoord3d,
    /// Reference (rest state) vertical coordinate.
    ZCoordRef3d,
    /// Vertical element size on the 2D mesh (surface value).
    ElemHeight2d,
    /// Vertical element size on the 3D mesh.
    ElemHeight3d,
    /// Horizontal element size on the 3D mesh.
    HElemSize3d,
    /// Near-bottom horizontal velocity on the 2D mesh `(u, v)`.
    BottomVelocity2d,
    /// Near-bottom horizontal velocity on the 3D mesh `(u, v)`.
    BottomVelocity3d,
    /// Height of the near-bottom evaluation point above the bed (2D).
    ZBottom2d,
    /// Height of the near-bottom evaluation point above the bed (3D).
    ZBottom3d,
    /// Bottom drag coefficient on the 2D mesh.
    BottomDrag2d,
    /// Bottom drag coefficient on the 3D mesh.
    BottomDrag3d,
    /// Baroclinic pressure head.
    BaroHead3d,
    /// Depth-averaged baroclinic head on the 2D mesh.
    BaroHead2d,
    /// Vertical integral of the baroclinic head.
    BaroHeadInt3d,
    /// Horizontal velocity magnitude.
    VelocityMag3d,
    /// P1-projected horizontal velocity `(u, v)` used by stabilization.
    VelocityP1_3d,
    /// Smagorinsky eddy viscosity.
    SmagViscosity3d,
    /// Tracer-jump horizontal diffusivity.
    JumpDiffusivity3d,
    /// Upper bound for horizontal diffusivity.
    MaxHDiffusivity3d,
    /// Parabolic eddy-viscosity profile from bottom friction.
    ParabViscosity3d,
    /// ALE mesh velocity.
    MeshVelocity3d,
    /// ALE mesh velocity at the free surface (3D).
    MeshVelocitySurf3d,
    /// ALE mesh velocity at the free surface (2D).
    MeshVelocitySurf2d,
    /// Vertical derivative of the ALE mesh velocity.
    MeshVelocityDz3d,
}

impl FieldId {
    /// Spatial support of the field.
    pub fn location(self) -> FieldLocation {
        use FieldId::*;
        match self {
            Solution2d | DepthAvgVelocity2d | Bathymetry2d | ElemHeight2d | BottomVelocity2d
            | ZBottom2d | BottomDrag2d | BaroHead2d | MeshVelocitySurf2d => FieldLocation::Surface,
            _ => FieldLocation::Volume,
        }
    }

    /// Number of components per value set.
    pub fn n_comp(self) -> usize {
        use FieldId::*;
        match self {
            Solution2d => 3,
            Velocity3d | DepthAvgVelocity2d | DepthAvgVelocity3d | BottomVelocity2d
            | BottomVelocity3d | VelocityP1_3d => 2,
            _ => 1,
        }
    }

    /// Stable human-readable name, used in logs and error messages.
    pub fn name(self) -> &'static str {
        use FieldId::*;
        match self {
            Solution2d => "solution_2d",
            Elevation3d => "elev_3d",
            Elevation3dNplusHalf => "elev_3d_nplushalf",
            Velocity3d => "uv_3d",
            VertVelocity3d => "w_3d",
            DepthAvgVelocity2d => "uv_dav_2d",
            DepthAvgVelocity3d => "uv_dav_3d",
            Salinity3d => "salt_3d",
            Tke3d => "tke_3d",
            Psi3d => "psi_3d",
            Bathymetry2d => "bathymetry_2d",
            Bathymetry3d => "bathymetry_3d",
            ZCoord3d => "z_coord_3d",
            ZCoordRef3d => "z_coord_ref_3d",
            ElemHeight2d => "v_elem_size_2d",
            ElemHeight3d => "v_elem_size_3d",
            HElemSize3d => "h_elem_size_3d",
            BottomVelocity2d => "uv_bottom_2d",
            BottomVelocity3d => "uv_bottom_3d",
            ZBottom2d => "z_bottom_2d",
            ZBottom3d => "z_bottom_3d",
            BottomDrag2d => "bottom_drag_2d",
            BottomDrag3d => "bottom_drag_3d",
            BaroHead3d => "baro_head_3d",
            BaroHead2d => "baro_head_2d",
            BaroHeadInt3d => "baro_head_int_3d",
            VelocityMag3d => "uv_mag_3d",
            VelocityP1_3d => "uv_p1_3d",
            SmagViscosity3d => "smag_viscosity_3d",
            JumpDiffusivity3d => "jump_diffusivity_3d",
            MaxHDiffusivity3d => "max_h_diffusivity_3d",
            ParabViscosity3d => "parab_viscosity_3d",
            MeshVelocity3d => "w_mesh_3d",
            MeshVelocitySurf3d => "w_mesh_surf_3d",
            MeshVelocitySurf2d => "w_mesh_surf_2d",
            MeshVelocityDz3d => "dw_mesh_dz_3d",
        }
    }

    const ALL: [FieldId; 36] = [
        FieldId::Solution2d,
        FieldId::Elevation3d,
        FieldId::Elevation3dNplusHalf,
        FieldId::Velocity3d,
        FieldId::VertVelocity3d,
        FieldId::DepthAvgVelocity2d,
        FieldId::DepthAvgVelocity3d,
        FieldId::Salinity3d,
        FieldId::Tke3d,
        FieldId::Psi3d,
        FieldId::Bathymetry2d,
        FieldId::Bathymetry3d,
        FieldId::ZCoord3d,
        FieldId::ZCoordRef3d,
        FieldId::ElemHeight2d,
        FieldId::ElemHeight3d,
        FieldId::HElemSize3d,
        FieldId::BottomVelocity2d,
        FieldId::BottomVelocity3d,
        FieldId::ZBottom2d,
        FieldId::ZBottom3d,
        FieldId::BottomDrag2d,
        FieldId::BottomDrag3d,
        FieldId::BaroHead3d,
        FieldId::BaroHead2d,
        FieldId::BaroHeadInt3d,
        FieldId::VelocityMag3d,
        FieldId::VelocityP1_3d,
        FieldId::SmagViscosity3d,
        FieldId::JumpDiffusivity3d,
        FieldId::MaxHDiffusivity3d,
        FieldId::ParabViscosity3d,
        FieldId::MeshVelocity3d,
        FieldId::MeshVelocitySurf3d,
        FieldId::MeshVelocitySurf2d,
        FieldId::MeshVelocityDz3d,
    ];

    pub(crate) fn index(self) -> usize {
        Self::ALL.iter().position(|&id| id == self).unwrap()
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Column/level extent of the discretization.
///
/// Columns are arranged along a line with uniform spacing `dx`; this is
/// the minimal horizontal connectivity needed by the diagnostic
/// recomputations (divergence, gradients, jumps).
#[derive(Clone, Copy, Debug)]
pub struct Grid {
    /// Number of horizontal columns.
    pub n_columns: usize,
    /// Number of vertical levels per column.
    pub n_levels: usize,
    /// Horizontal column spacing (m).
    pub dx: f64,
}

impl Grid {
    /// Create a grid with the given extent and spacing.
    pub fn new(n_columns: usize, n_levels: usize, dx: f64) -> Self {
        assert!(n_columns > 0 && n_levels > 0);
        assert!(dx > 0.0);
        Self {
            n_columns,
            n_levels,
            dx,
        }
    }

    /// Number of scalar values a field with this support and component
    /// count holds.
    pub fn n_values(&self, location: FieldLocation, n_comp: usize) -> usize {
        match location {
            FieldLocation::Surface => self.n_columns * n_comp,
            FieldLocation::Volume => self.n_columns * self.n_levels * n_comp,
        }
    }

    /// Flat index of `(column, level, comp)` in a volume field.
    #[inline]
    pub fn idx3(&self, column: usize, level: usize, n_comp: usize, comp: usize) -> usize {
        (column * self.n_levels + level) * n_comp + comp
    }
}

/// A named, mutable discretized array.
#[derive(Clone, Debug)]
pub struct Field {
    id: FieldId,
    data: Vec<f64>,
}

impl Field {
    /// Allocate a zero-initialized field for `id` on `grid`.
    pub fn zeros(id: FieldId, grid: &Grid) -> Self {
        let len = grid.n_values(id.location(), id.n_comp());
        Self {
            id,
            data: vec![0.0; len],
        }
    }

    /// Handle of this field.
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Field values.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.data
    }

    /// Mutable field values.
    #[inline]
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Overwrite this field from `other`.
    pub fn assign(&mut self, other: &[f64]) {
        self.data.copy_from_slice(other);
    }
}

/// Arena of registered fields, owned by the orchestrator.
///
/// Sub-integrators and pipeline steps borrow the set mutably for the
/// duration of a call; exclusivity is enforced by call order (the
/// execution model is single-threaded).
#[derive(Clone, Debug)]
pub struct FieldSet {
    grid: Grid,
    slots: Vec<Option<Field>>,
}

impl FieldSet {
    /// Create an empty field set on `grid`.
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            slots: (0..FieldId::ALL.len()).map(|_| None).collect(),
        }
    }

    /// Grid the fields are discretized on.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Register (allocate) a field; re-registering is a no-op.
    pub fn register(&mut self, id: FieldId) -> &mut Self {
        let slot = &mut self.slots[id.index()];
        if slot.is_none() {
            *slot = Some(Field::zeros(id, &self.grid));
        }
        self
    }

    /// Register several fields at once.
    pub fn register_all(&mut self, ids: &[FieldId]) -> &mut Self {
        for &id in ids {
            self.register(id);
        }
        self
    }

    /// Whether `id` is registered.
    pub fn has(&self, id: FieldId) -> bool {
        self.slots[id.index()].is_some()
    }

    /// Fail with [`ModelError::MissingField`] unless `id` is registered.
    pub fn require(&self, id: FieldId) -> Result<()> {
        if self.has(id) {
            Ok(())
        } else {
            Err(ModelError::MissingField(id))
        }
    }

    /// Values of a registered field.
    ///
    /// # Panics
    /// Panics if the field is not registered; registration is validated
    /// with [`FieldSet::require`] at construction time.
    #[inline]
    pub fn values(&self, id: FieldId) -> &[f64] {
        self.slots[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("field `{}` is not registered", id))
            .values()
    }

    /// Mutable values of a registered field.
    #[inline]
    pub fn values_mut(&mut self, id: FieldId) -> &mut [f64] {
        self.slots[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("field `{}` is not registered", id))
            .values_mut()
    }

    /// Remove a field from the arena to operate on it while reading
    /// other fields. Must be paired with [`FieldSet::put`].
    pub fn take(&mut self, id: FieldId) -> Field {
        self.slots[id.index()]
            .take()
            .unwrap_or_else(|| panic!("field `{}` is not registered", id))
    }

    /// Return a field taken with [`FieldSet::take`].
    pub fn put(&mut self, field: Field) {
        let idx = field.id().index();
        self.slots[idx] = Some(field);
    }

    /// Run `f` with mutable access to `id` and shared access to the rest
    /// of the set.
    pub fn with_field_mut<R>(&mut self, id: FieldId, f: impl FnOnce(&mut Field, &FieldSet) -> R) -> R {
        let mut field = self.take(id);
        let result = f(&mut field, self);
        self.put(field);
        result
    }
}
