//! Diagnostic field computations run by the dependency pipeline.
//!
//! Each routine reads registered fields, writes one or more derived
//! fields in place and touches nothing else, so the pipeline can sequence
//! them freely. All routines assume the fields they name are registered;
//! the pipeline validates registration at construction time.

use crate::config::PhysicalConstants;
use crate::error::{ModelError, Result};
use crate::fields::{self, FieldId, FieldSet, SurfaceValue};

/// Diagnose the vertical velocity from the continuity equation.
///
/// Integrates `∂w/∂z = -∂u/∂x` upward from the impermeable bed.
pub fn compute_vert_velocity(f: &mut FieldSet) {
    let grid = *f.grid();
    let n_levels = grid.n_levels;

    let mut du_dx = vec![0.0; grid.n_columns * n_levels];
    {
        let uv = f.values(FieldId::Velocity3d).to_vec();
        fields::horizontal_derivative(&grid, 2, 0, &uv, &mut du_dx);
    }
    let heights = f.values(FieldId::ElemHeight3d).to_vec();

    let w = f.values_mut(FieldId::VertVelocity3d);
    for c in 0..grid.n_columns {
        let mut w_below = 0.0;
        for l in 0..n_levels {
            let idx = c * n_levels + l;
            w_below -= heights[idx] * du_dx[idx];
            w[idx] = w_below;
        }
    }
}

/// Recompute the bottom log-layer drag and the near-bed velocity fields.
///
/// The drag follows the law of the wall evaluated at the bottom cell
/// center, `C_D = (κ / ln((z_b + z₀)/z₀))²`.
pub fn compute_bottom_friction(f: &mut FieldSet, constants: &PhysicalConstants) {
    let grid = *f.grid();

    let mut z_bot = vec![0.0; grid.n_columns];
    {
        let heights = f.values(FieldId::ElemHeight3d);
        for c in 0..grid.n_columns {
            // bottom cell center sits half a cell above the bed
            z_bot[c] = 0.5 * heights[grid.idx3(c, 0, 1, 0)];
        }
    }
    f.values_mut(FieldId::ZBottom2d).copy_from_slice(&z_bot);
    {
        let z_bot_3d = {
            let mut buf = vec![0.0; grid.n_columns * grid.n_levels];
            fields::copy_surface_to_volume(&grid, 1, &z_bot, &mut buf);
            buf
        };
        f.values_mut(FieldId::ZBottom3d).copy_from_slice(&z_bot_3d);
    }

    let z0 = constants.z0_friction;
    let kappa = constants.von_karman;
    let mut drag = vec![0.0; grid.n_columns];
    for c in 0..grid.n_columns {
        let log = ((z_bot[c] + z0) / z0).ln();
        drag[c] = if log > 0.0 { (kappa / log).powi(2) } else { 0.0 };
    }
    f.values_mut(FieldId::BottomDrag2d).copy_from_slice(&drag);
    {
        let mut drag_3d = vec![0.0; grid.n_columns * grid.n_levels];
        fields::copy_surface_to_volume(&grid, 1, &drag, &mut drag_3d);
        f.values_mut(FieldId::BottomDrag3d).copy_from_slice(&drag_3d);
    }

    let mut uv_bot = vec![0.0; grid.n_columns * 2];
    {
        let uv = f.values(FieldId::Velocity3d);
        fields::copy_volume_to_surface(&grid, 2, uv, &mut uv_bot, SurfaceValue::Bottom);
    }
    f.values_mut(FieldId::BottomVelocity2d)
        .copy_from_slice(&uv_bot);
    {
        let mut uv_bot_3d = vec![0.0; grid.n_columns * grid.n_levels * 2];
        fields::copy_surface_to_volume(&grid, 2, &uv_bot, &mut uv_bot_3d);
        f.values_mut(FieldId::BottomVelocity3d)
            .copy_from_slice(&uv_bot_3d);
    }
}

const NU_MIN: f64 = 1.0e-10;

/// Parabolic eddy-viscosity profile from the bottom friction velocity,
/// `ν(z') = κ u* z' (1 - z'/D)` with `z'` the height above the bed.
///
/// Requires [`compute_bottom_friction`] to have run first.
pub fn compute_parabolic_viscosity(f: &mut FieldSet, constants: &PhysicalConstants) {
    let grid = *f.grid();
    let n_levels = grid.n_levels;

    let drag = f.values(FieldId::BottomDrag2d).to_vec();
    let uv_bot = f.values(FieldId::BottomVelocity2d).to_vec();
    let heights = f.values(FieldId::ElemHeight3d).to_vec();

    let nu = f.values_mut(FieldId::ParabViscosity3d);
    for c in 0..grid.n_columns {
        let speed = (uv_bot[2 * c].powi(2) + uv_bot[2 * c + 1].powi(2)).sqrt();
        let u_star = drag[c].sqrt() * speed;
        let mut depth = 0.0;
        for l in 0..n_levels {
            depth += heights[c * n_levels + l];
        }
        let mut z = 0.0;
        for l in 0..n_levels {
            let h = heights[c * n_levels + l];
            let z_mid = z + 0.5 * h;
            z += h;
            let value = if depth > 0.0 {
                constants.von_karman * u_star * z_mid * (1.0 - z_mid / depth)
            } else {
                0.0
            };
            nu[c * n_levels + l] = value.max(NU_MIN);
        }
    }
}

/// Baroclinic head from the salinity field under a linear equation of
/// state, `ρ' = ρ₀ β (S - S_ref)`.
///
/// Writes the head `r = (1/ρ₀) ∫_z^η ρ' dz` into `baro_head_3d`, its
/// vertical integral from the bed into `baro_head_int_3d` and its depth
/// average into `baro_head_2d`.
pub fn compute_baroclinic_head(f: &mut FieldSet, constants: &PhysicalConstants) {
    let grid = *f.grid();
    let n_levels = grid.n_levels;

    let salt = f.values(FieldId::Salinity3d).to_vec();
    let heights = f.values(FieldId::ElemHeight3d).to_vec();

    {
        let head = f.values_mut(FieldId::BaroHead3d);
        for c in 0..grid.n_columns {
            // integrate density anomaly downward from the free surface
            let mut integral = 0.0;
            for l in (0..n_levels).rev() {
                let idx = c * n_levels + l;
                let rho_prime =
                    constants.rho_0 * constants.beta_saline * (salt[idx] - constants.salt_ref);
                integral += rho_prime * heights[idx];
                head[idx] = integral / constants.rho_0;
            }
        }
    }

    let head = f.values(FieldId::BaroHead3d).to_vec();
    {
        let head_int = f.values_mut(FieldId::BaroHeadInt3d);
        for c in 0..grid.n_columns {
            let mut integral = 0.0;
            for l in 0..n_levels {
                let idx = c * n_levels + l;
                integral += head[idx] * heights[idx];
                head_int[idx] = integral;
            }
        }
    }
    {
        let mut head_2d = vec![0.0; grid.n_columns];
        fields::depth_average(&grid, 1, &head, &heights, &mut head_2d);
        f.values_mut(FieldId::BaroHead2d).copy_from_slice(&head_2d);
    }
}

/// Pointwise velocity magnitude; includes the vertical component when
/// the vertical velocity is registered.
pub fn compute_velocity_magnitude(f: &mut FieldSet) {
    let grid = *f.grid();
    let uv = f.values(FieldId::Velocity3d).to_vec();
    let w = if f.has(FieldId::VertVelocity3d) {
        Some(f.values(FieldId::VertVelocity3d).to_vec())
    } else {
        None
    };

    let mag = f.values_mut(FieldId::VelocityMag3d);
    for c in 0..grid.n_columns {
        for l in 0..grid.n_levels {
            let idx = c * grid.n_levels + l;
            let mut sq = uv[2 * idx].powi(2) + uv[2 * idx + 1].powi(2);
            if let Some(w) = &w {
                sq += w[idx].powi(2);
            }
            mag[idx] = sq.sqrt();
        }
    }
}

/// Project the discontinuous velocity onto a continuous representation
/// by 1-2-1 averaging over horizontal neighbors.
pub fn project_velocity_p1(f: &mut FieldSet) {
    let grid = *f.grid();
    let nc = grid.n_columns;
    let uv = f.values(FieldId::Velocity3d).to_vec();

    let p1 = f.values_mut(FieldId::VelocityP1_3d);
    for c in 0..nc {
        let (cm, cp) = (c.saturating_sub(1), (c + 1).min(nc - 1));
        for l in 0..grid.n_levels {
            for m in 0..2 {
                let v = uv[grid.idx3(cm, l, 2, m)]
                    + 2.0 * uv[grid.idx3(c, l, 2, m)]
                    + uv[grid.idx3(cp, l, 2, m)];
                p1[grid.idx3(c, l, 2, m)] = v / 4.0;
            }
        }
    }
}

/// Fill the horizontal element size field from the grid spacing.
pub fn init_h_elem_size(f: &mut FieldSet) {
    let dx = f.grid().dx;
    f.values_mut(FieldId::HElemSize3d).fill(dx);
}

/// Smagorinsky eddy viscosity, `ν = (C Δx)² |∂u/∂x|`, from the projected
/// velocity.
pub fn compute_smagorinsky_viscosity(f: &mut FieldSet, factor: f64) {
    let grid = *f.grid();
    let n = grid.n_columns * grid.n_levels;

    let mut du_dx = vec![0.0; n];
    let mut dv_dx = vec![0.0; n];
    {
        let p1 = f.values(FieldId::VelocityP1_3d).to_vec();
        fields::horizontal_derivative(&grid, 2, 0, &p1, &mut du_dx);
        fields::horizontal_derivative(&grid, 2, 1, &p1, &mut dv_dx);
    }
    let h_elem = f.values(FieldId::HElemSize3d).to_vec();

    let nu = f.values_mut(FieldId::SmagViscosity3d);
    for i in 0..n {
        let strain = (du_dx[i].powi(2) + dv_dx[i].powi(2)).sqrt();
        nu[i] = ((factor * h_elem[i]).powi(2) * strain).max(NU_MIN);
    }
}

/// Shock-capturing diffusivity from horizontal salinity jumps,
/// `κ_j = C (ΔS / S_range) |u| Δx`, optionally capped by the maximum
/// horizontal diffusivity field.
pub fn compute_jump_diffusivity(f: &mut FieldSet, factor: f64, salt_range: f64) {
    let grid = *f.grid();
    let nc = grid.n_columns;
    let salt = f.values(FieldId::Salinity3d).to_vec();
    let mag = f.values(FieldId::VelocityMag3d).to_vec();
    let h_elem = f.values(FieldId::HElemSize3d).to_vec();
    let cap = if f.has(FieldId::MaxHDiffusivity3d) {
        Some(f.values(FieldId::MaxHDiffusivity3d).to_vec())
    } else {
        None
    };

    let diff = f.values_mut(FieldId::JumpDiffusivity3d);
    for c in 0..nc {
        let (cm, cp) = (c.saturating_sub(1), (c + 1).min(nc - 1));
        for l in 0..grid.n_levels {
            let idx = c * grid.n_levels + l;
            let s = salt[idx];
            let jump = (s - salt[cm * grid.n_levels + l])
                .abs()
                .max((salt[cp * grid.n_levels + l] - s).abs());
            let mut value = factor * (jump / salt_range) * mag[idx] * h_elem[idx];
            if let Some(cap) = &cap {
                value = value.min(cap[idx]);
            }
            diff[idx] = value;
        }
    }
}

/// Largest advective time step `dt = C Δx / max|u|` permitted by the
/// current velocity field.
pub fn compute_advective_dt(f: &FieldSet, cfl: f64) -> Result<f64> {
    let max_speed = fields::max_abs(f.values(FieldId::VelocityMag3d));
    if max_speed == 0.0 {
        return Err(ModelError::ZeroVelocityScale);
    }
    Ok(cfl * f.grid().dx / max_speed)
}

#[cfg(test)]
mod tests {
    use crate::fields::Grid;

    use super::*;

    fn volume_fields(n_columns: usize, n_levels: usize, ids: &[FieldId]) -> FieldSet {
        let grid = Grid::new(n_columns, n_levels, 100.0);
        let mut f = FieldSet::new(grid);
        f.register_all(ids);
        f
    }

    #[test]
    fn vertical_velocity_balances_divergence() {
        let mut f = volume_fields(
            3,
            2,
            &[
                FieldId::Velocity3d,
                FieldId::ElemHeight3d,
                FieldId::VertVelocity3d,
            ],
        );
        f.values_mut(FieldId::ElemHeight3d).fill(5.0);
        // u = x / 100 so du/dx = 0.01 at every cell
        {
            let grid = *f.grid();
            let uv = f.values_mut(FieldId::Velocity3d);
            for c in 0..3 {
                for l in 0..2 {
                    uv[grid.idx3(c, l, 2, 0)] = c as f64;
                }
            }
        }
        compute_vert_velocity(&mut f);
        let w = f.values(FieldId::VertVelocity3d);
        // each cell adds -h * du/dx = -0.05
        assert!((w[0] - (-0.05)).abs() < 1e-12);
        assert!((w[1] - (-0.10)).abs() < 1e-12);
    }

    #[test]
    fn log_layer_drag_decreases_with_cell_height() {
        let consts = PhysicalConstants::default();
        let ids = [
            FieldId::Velocity3d,
            FieldId::ElemHeight3d,
            FieldId::ZBottom2d,
            FieldId::ZBottom3d,
            FieldId::BottomDrag2d,
            FieldId::BottomDrag3d,
            FieldId::BottomVelocity2d,
            FieldId::BottomVelocity3d,
        ];
        let mut thin = volume_fields(1, 2, &ids);
        thin.values_mut(FieldId::ElemHeight3d).fill(0.5);
        compute_bottom_friction(&mut thin, &consts);

        let mut thick = volume_fields(1, 2, &ids);
        thick.values_mut(FieldId::ElemHeight3d).fill(5.0);
        compute_bottom_friction(&mut thick, &consts);

        let c_thin = thin.values(FieldId::BottomDrag2d)[0];
        let c_thick = thick.values(FieldId::BottomDrag2d)[0];
        assert!(c_thin > c_thick);
        assert!(c_thick > 0.0);
    }

    #[test]
    fn parabolic_viscosity_vanishes_at_bed_and_surface() {
        let consts = PhysicalConstants::default();
        let mut f = volume_fields(
            1,
            8,
            &[
                FieldId::Velocity3d,
                FieldId::ElemHeight3d,
                FieldId::ZBottom2d,
                FieldId::ZBottom3d,
                FieldId::BottomDrag2d,
                FieldId::BottomDrag3d,
                FieldId::BottomVelocity2d,
                FieldId::BottomVelocity3d,
                FieldId::ParabViscosity3d,
            ],
        );
        f.values_mut(FieldId::ElemHeight3d).fill(2.0);
        // uniform flow of 1 m/s
        {
            let grid = *f.grid();
            let uv = f.values_mut(FieldId::Velocity3d);
            for c in 0..1 {
                for l in 0..8 {
                    uv[grid.idx3(c, l, 2, 0)] = 1.0;
                }
            }
        }
        compute_bottom_friction(&mut f, &consts);
        compute_parabolic_viscosity(&mut f, &consts);

        let nu = f.values(FieldId::ParabViscosity3d);
        let mid = nu[4];
        assert!(nu[0] < mid);
        assert!(nu[7] < mid);
        assert!(nu.iter().all(|&v| v >= NU_MIN));
    }

    #[test]
    fn baroclinic_head_grows_towards_the_bed() {
        let consts = PhysicalConstants::default();
        let mut f = volume_fields(
            1,
            4,
            &[
                FieldId::Salinity3d,
                FieldId::ElemHeight3d,
                FieldId::BaroHead3d,
                FieldId::BaroHeadInt3d,
                FieldId::BaroHead2d,
            ],
        );
        f.values_mut(FieldId::ElemHeight3d).fill(2.0);
        // uniformly saltier than the reference: positive anomaly
        f.values_mut(FieldId::Salinity3d)
            .fill(consts.salt_ref + 1.0);
        compute_baroclinic_head(&mut f, &consts);

        let head = f.values(FieldId::BaroHead3d);
        assert!(head[0] > head[3]);
        // full-depth head: beta * dS * D
        let expected = consts.beta_saline * 1.0 * 8.0;
        assert!((head[0] - expected).abs() < 1e-12);
        assert!(f.values(FieldId::BaroHead2d)[0] > 0.0);
    }

    #[test]
    fn advective_dt_requires_nonzero_velocity() {
        let mut f = volume_fields(2, 2, &[FieldId::VelocityMag3d]);
        let err = compute_advective_dt(&f, 1.0).unwrap_err();
        assert!(matches!(err, ModelError::ZeroVelocityScale));

        f.values_mut(FieldId::VelocityMag3d).fill(2.0);
        let dt = compute_advective_dt(&f, 0.5).unwrap();
        assert!((dt - 0.5 * 100.0 / 2.0).abs() < 1e-12);
    }

    #[test]
    fn jump_diffusivity_peaks_at_the_front() {
        let mut f = volume_fields(
            4,
            1,
            &[
                FieldId::Salinity3d,
                FieldId::VelocityMag3d,
                FieldId::HElemSize3d,
                FieldId::JumpDiffusivity3d,
            ],
        );
        init_h_elem_size(&mut f);
        f.values_mut(FieldId::VelocityMag3d).fill(1.0);
        // salinity front between columns 1 and 2
        f.values_mut(FieldId::Salinity3d)
            .copy_from_slice(&[10.0, 10.0, 20.0, 20.0]);
        compute_jump_diffusivity(&mut f, 1.0, 10.0);

        let diff = f.values(FieldId::JumpDiffusivity3d);
        assert!(diff[1] > diff[0]);
        assert!(diff[2] > diff[3]);
        assert!((diff[1] - 1.0 * (10.0 / 10.0) * 1.0 * 100.0).abs() < 1e-12);
    }
}
