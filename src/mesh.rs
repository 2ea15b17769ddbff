//! Vertical mesh geometry for the ALE moving mesh.
//!
//! The extruded mesh follows terrain-following sigma coordinates with
//! σ ∈ [-1, 0]: the physical cell-center coordinate is
//!
//! ```text
//! z = z_ref + η (1 + z_ref / H)
//! ```
//!
//! where `z_ref = σ H` is the rest-state coordinate, η the free-surface
//! elevation and H the bathymetry (positive depth). When the free surface
//! moves, [`update_coordinates`] recomputes `z` and the vertical element
//! sizes; [`compute_mesh_velocity`] diagnoses the resulting mesh velocity.
//!
//! [`Geometry`] is an immutable snapshot of the vertical element sizes.
//! ALE schemes evaluate their right-hand side against one snapshot and
//! their mass operator against another; capturing the snapshot makes that
//! old/new-geometry contract explicit.

use crate::fields::{
    self, solution2d, FieldId, FieldSet,
};

/// Immutable snapshot of the vertical element sizes.
///
/// A geometry without heights (the *unit* geometry) corresponds to a
/// fixed unit-mass mesh; equations on fixed meshes may ignore the
/// snapshot entirely.
#[derive(Clone, Debug)]
pub struct Geometry {
    heights: Option<Vec<f64>>,
}

impl Geometry {
    /// Unit geometry (no moving mesh).
    pub fn unit() -> Self {
        Self { heights: None }
    }

    /// Snapshot the current vertical element sizes from `fields`, or the
    /// unit geometry if the mesh does not move.
    pub fn capture(fields: &FieldSet) -> Self {
        if fields.has(FieldId::ElemHeight3d) {
            Self {
                heights: Some(fields.values(FieldId::ElemHeight3d).to_vec()),
            }
        } else {
            Self::unit()
        }
    }

    /// Vertical element size per 3D cell, if the mesh moves.
    pub fn heights(&self) -> Option<&[f64]> {
        self.heights.as_deref()
    }
}

/// Seed the reference coordinates and rest-state element sizes.
///
/// Must be called once after the bathymetry has been assigned and before
/// the first macro step. Broadcasts the 2D bathymetry to the 3D mesh and
/// fills `z_coord_ref_3d` with the uniform-sigma rest-state coordinates.
pub fn init_reference_coordinates(f: &mut FieldSet) {
    let grid = *f.grid();
    let bath_2d = f.values(FieldId::Bathymetry2d).to_vec();

    if f.has(FieldId::Bathymetry3d) {
        fields::copy_surface_to_volume(&grid, 1, &bath_2d, f.values_mut(FieldId::Bathymetry3d));
    }

    let z_ref = f.values_mut(FieldId::ZCoordRef3d);
    for c in 0..grid.n_columns {
        let h = bath_2d[c];
        for l in 0..grid.n_levels {
            // cell-center sigma, level 0 at the bottom
            let sigma = -1.0 + (l as f64 + 0.5) / grid.n_levels as f64;
            z_ref[c * grid.n_levels + l] = sigma * h;
        }
    }
}

/// Recompute mesh vertical coordinates and element heights from the
/// current elevation and bathymetry.
///
/// Writes `z_coord_3d`, `v_elem_size_3d` and `v_elem_size_2d`.
pub fn update_coordinates(f: &mut FieldSet) {
    let grid = *f.grid();
    let n_levels = grid.n_levels;

    let eta: Vec<f64> = (0..grid.n_columns)
        .map(|c| f.values(FieldId::Solution2d)[c * 3 + solution2d::ETA])
        .collect();
    let bath = f.values(FieldId::Bathymetry2d).to_vec();
    let z_ref = f.values(FieldId::ZCoordRef3d).to_vec();

    {
        let z = f.values_mut(FieldId::ZCoord3d);
        for c in 0..grid.n_columns {
            let h = bath[c];
            for l in 0..n_levels {
                let idx = c * n_levels + l;
                let zr = z_ref[idx];
                z[idx] = if h > 0.0 { zr + eta[c] * (1.0 + zr / h) } else { zr };
            }
        }
    }

    {
        let heights = f.values_mut(FieldId::ElemHeight3d);
        for c in 0..grid.n_columns {
            let total = (eta[c] + bath[c]).max(0.0);
            let dz = total / n_levels as f64;
            for l in 0..n_levels {
                heights[c * n_levels + l] = dz;
            }
        }
    }

    let heights_3d = f.values(FieldId::ElemHeight3d).to_vec();
    fields::copy_volume_surface_value(&grid, 1, &heights_3d, f.values_mut(FieldId::ElemHeight2d));
}

/// Recompute the ALE mesh velocity from elevation, horizontal velocity
/// and the diagnosed vertical velocity.
///
/// The mesh velocity is linear in the water column: it equals the
/// free-surface kinematic velocity at the top and vanishes at the bed,
///
/// ```text
/// w_mesh(z) = w_surf (z + H) / (η + H),    dw_mesh/dz = w_surf / (η + H)
/// ```
///
/// Writes `w_mesh_surf_2d`, `w_mesh_surf_3d`, `w_mesh_3d`, `dw_mesh_dz_3d`.
pub fn compute_mesh_velocity(f: &mut FieldSet) {
    let grid = *f.grid();
    let n_levels = grid.n_levels;
    let top = n_levels - 1;

    // Surface kinematic condition: w_surf = w - uv . grad(eta) at the top cell.
    let mut deta_dx = vec![0.0; grid.n_columns * n_levels];
    {
        let elev_3d = f.values(FieldId::Elevation3d);
        let mut elev_copy = vec![0.0; elev_3d.len()];
        elev_copy.copy_from_slice(elev_3d);
        fields::horizontal_derivative(&grid, 1, 0, &elev_copy, &mut deta_dx);
    }

    let mut w_surf = vec![0.0; grid.n_columns];
    {
        let w = f.values(FieldId::VertVelocity3d);
        let uv = f.values(FieldId::Velocity3d);
        for c in 0..grid.n_columns {
            let u_top = uv[grid.idx3(c, top, 2, 0)];
            w_surf[c] = w[c * n_levels + top] - u_top * deta_dx[c * n_levels + top];
        }
    }

    f.values_mut(FieldId::MeshVelocitySurf2d).copy_from_slice(&w_surf);
    let w_surf_3d: Vec<f64> = {
        let mut buf = vec![0.0; grid.n_columns * n_levels];
        fields::copy_surface_to_volume(&grid, 1, &w_surf, &mut buf);
        buf
    };
    f.values_mut(FieldId::MeshVelocitySurf3d).copy_from_slice(&w_surf_3d);

    let eta: Vec<f64> = (0..grid.n_columns)
        .map(|c| f.values(FieldId::Solution2d)[c * 3 + solution2d::ETA])
        .collect();
    let bath = f.values(FieldId::Bathymetry2d).to_vec();
    let z = f.values(FieldId::ZCoord3d).to_vec();

    {
        let w_mesh = f.values_mut(FieldId::MeshVelocity3d);
        for c in 0..grid.n_columns {
            let depth = eta[c] + bath[c];
            for l in 0..n_levels {
                let idx = c * n_levels + l;
                w_mesh[idx] = if depth > 0.0 {
                    w_surf[c] * (z[idx] + bath[c]) / depth
                } else {
                    0.0
                };
            }
        }
    }
    {
        let dw_dz = f.values_mut(FieldId::MeshVelocityDz3d);
        for c in 0..grid.n_columns {
            let depth = eta[c] + bath[c];
            for l in 0..n_levels {
                dw_dz[c * n_levels + l] = if depth > 0.0 { w_surf[c] / depth } else { 0.0 };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Grid;

    fn ale_fields(n_columns: usize, n_levels: usize, h: f64, eta: f64) -> FieldSet {
        let grid = Grid::new(n_columns, n_levels, 100.0);
        let mut f = FieldSet::new(grid);
        f.register_all(&[
            FieldId::Solution2d,
            FieldId::Bathymetry2d,
            FieldId::Bathymetry3d,
            FieldId::ZCoord3d,
            FieldId::ZCoordRef3d,
            FieldId::ElemHeight2d,
            FieldId::ElemHeight3d,
        ]);
        f.values_mut(FieldId::Bathymetry2d).fill(h);
        for c in 0..n_columns {
            f.values_mut(FieldId::Solution2d)[c * 3 + solution2d::ETA] = eta;
        }
        init_reference_coordinates(&mut f);
        f
    }

    #[test]
    fn rest_state_coordinates_span_the_depth() {
        let f = ale_fields(2, 4, 20.0, 0.0);
        let z_ref = f.values(FieldId::ZCoordRef3d);
        // bottom cell center at -H + H/(2 n), top cell center at -H/(2 n)
        assert!((z_ref[0] - (-20.0 + 2.5)).abs() < 1e-12);
        assert!((z_ref[3] - (-2.5)).abs() < 1e-12);
    }

    #[test]
    fn elevated_surface_stretches_the_column() {
        let mut f = ale_fields(1, 4, 20.0, 2.0);
        update_coordinates(&mut f);

        let heights = f.values(FieldId::ElemHeight3d);
        for &h in heights {
            assert!((h - 22.0 / 4.0).abs() < 1e-12);
        }
        assert!((f.values(FieldId::ElemHeight2d)[0] - 5.5).abs() < 1e-12);

        // top cell center moves up with the free surface
        let z = f.values(FieldId::ZCoord3d);
        let z_ref = f.values(FieldId::ZCoordRef3d);
        assert!(z[3] > z_ref[3]);
        // z = z_ref + eta (1 + z_ref / H)
        assert!((z[3] - (z_ref[3] + 2.0 * (1.0 + z_ref[3] / 20.0))).abs() < 1e-12);
    }

    #[test]
    fn geometry_capture_snapshots_heights() {
        let mut f = ale_fields(1, 2, 10.0, 0.0);
        update_coordinates(&mut f);
        let geom = Geometry::capture(&f);
        let before = geom.heights().unwrap().to_vec();

        // mutate the live field; the snapshot must not change
        for c in 0..1 {
            f.values_mut(FieldId::Solution2d)[c * 3 + solution2d::ETA] = 5.0;
        }
        update_coordinates(&mut f);
        assert_eq!(geom.heights().unwrap(), before.as_slice());
        assert_ne!(f.values(FieldId::ElemHeight3d), before.as_slice());
    }

    #[test]
    fn mesh_velocity_is_linear_in_the_column() {
        let grid = Grid::new(1, 4, 100.0);
        let mut f = FieldSet::new(grid);
        f.register_all(&[
            FieldId::Solution2d,
            FieldId::Bathymetry2d,
            FieldId::Bathymetry3d,
            FieldId::ZCoord3d,
            FieldId::ZCoordRef3d,
            FieldId::ElemHeight2d,
            FieldId::ElemHeight3d,
            FieldId::Elevation3d,
            FieldId::Velocity3d,
            FieldId::VertVelocity3d,
            FieldId::MeshVelocity3d,
            FieldId::MeshVelocitySurf3d,
            FieldId::MeshVelocitySurf2d,
            FieldId::MeshVelocityDz3d,
        ]);
        f.values_mut(FieldId::Bathymetry2d).fill(20.0);
        init_reference_coordinates(&mut f);
        update_coordinates(&mut f);
        // uniform rising surface: w = 0.1 everywhere, flat elevation
        f.values_mut(FieldId::VertVelocity3d).fill(0.1);

        compute_mesh_velocity(&mut f);

        assert!((f.values(FieldId::MeshVelocitySurf2d)[0] - 0.1).abs() < 1e-12);
        let w_mesh = f.values(FieldId::MeshVelocity3d);
        // monotone from bed to surface
        assert!(w_mesh[0] < w_mesh[3]);
        assert!(w_mesh[3] <= 0.1 + 1e-12);
        let dw_dz = f.values(FieldId::MeshVelocityDz3d);
        assert!((dw_dz[0] - 0.1 / 20.0).abs() < 1e-12);
    }
}
