//! Array kernels shared by steppers and the dependency pipeline.
//!
//! All kernels operate on raw slices plus [`Grid`] metadata so they can be
//! applied to any registered field. 2D↔3D transfer follows the extruded
//! mesh convention: a surface field is broadcast down each column, and a
//! volume field is restricted by taking either the surface cell value or
//! a thickness-weighted depth average.

use super::Grid;

/// Which cell a 3D→2D restriction samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceValue {
    /// Surface (top) cell.
    Top,
    /// Bottom cell.
    Bottom,
}

/// y += a * x
#[inline]
pub fn axpy(y: &mut [f64], a: f64, x: &[f64]) {
    debug_assert_eq!(y.len(), x.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}

/// x *= c
#[inline]
pub fn scale(x: &mut [f64], c: f64) {
    for xi in x.iter_mut() {
        *xi *= c;
    }
}

/// x = w * x_start + (1 - w) * x
///
/// Weighted blend used to construct SSP stage initial conditions from the
/// step-start snapshot.
#[inline]
pub fn blend(x: &mut [f64], w: f64, x_start: &[f64]) {
    debug_assert_eq!(x.len(), x_start.len());
    for (xi, si) in x.iter_mut().zip(x_start) {
        *xi = w * si + (1.0 - w) * *xi;
    }
}

/// max_i |x_i|
#[inline]
pub fn max_abs(x: &[f64]) -> f64 {
    x.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

/// max_i |x_i - y_i|
#[inline]
pub fn max_abs_diff(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter()
        .zip(y)
        .fold(0.0_f64, |m, (a, b)| m.max((a - b).abs()))
}

/// Broadcast a surface field down every column of a volume field.
///
/// `src` holds `n_comp` components per column, `dst` `n_comp` components
/// per cell.
pub fn copy_surface_to_volume(grid: &Grid, n_comp: usize, src: &[f64], dst: &mut [f64]) {
    debug_assert_eq!(src.len(), grid.n_columns * n_comp);
    debug_assert_eq!(dst.len(), grid.n_columns * grid.n_levels * n_comp);
    for c in 0..grid.n_columns {
        for l in 0..grid.n_levels {
            for m in 0..n_comp {
                dst[grid.idx3(c, l, n_comp, m)] = src[c * n_comp + m];
            }
        }
    }
}

/// Restrict a volume field to the 2D mesh by sampling the requested cell.
pub fn copy_volume_to_surface(
    grid: &Grid,
    n_comp: usize,
    src: &[f64],
    dst: &mut [f64],
    sample: SurfaceValue,
) {
    debug_assert_eq!(dst.len(), grid.n_columns * n_comp);
    let level = match sample {
        SurfaceValue::Top => grid.n_levels - 1,
        SurfaceValue::Bottom => 0,
    };
    for c in 0..grid.n_columns {
        for m in 0..n_comp {
            dst[c * n_comp + m] = src[grid.idx3(c, level, n_comp, m)];
        }
    }
}

/// Restrict a volume field by sampling the surface cell.
pub fn copy_volume_surface_value(grid: &Grid, n_comp: usize, src: &[f64], dst: &mut [f64]) {
    copy_volume_to_surface(grid, n_comp, src, dst, SurfaceValue::Top);
}

/// Thickness-weighted depth average of a volume field onto the 2D mesh.
///
/// `heights` holds one vertical element size per 3D cell; columns with
/// zero total thickness average to zero.
pub fn depth_average(grid: &Grid, n_comp: usize, src: &[f64], heights: &[f64], dst: &mut [f64]) {
    debug_assert_eq!(heights.len(), grid.n_columns * grid.n_levels);
    debug_assert_eq!(dst.len(), grid.n_columns * n_comp);
    for c in 0..grid.n_columns {
        let mut total = 0.0;
        let mut sums = [0.0_f64; 4];
        debug_assert!(n_comp <= 4);
        for l in 0..grid.n_levels {
            let h = heights[c * grid.n_levels + l];
            total += h;
            for (m, sum) in sums.iter_mut().enumerate().take(n_comp) {
                *sum += h * src[grid.idx3(c, l, n_comp, m)];
            }
        }
        for m in 0..n_comp {
            dst[c * n_comp + m] = if total > 0.0 { sums[m] / total } else { 0.0 };
        }
    }
}

/// Column-parallel variant of [`depth_average`].
#[cfg(feature = "parallel")]
pub fn depth_average_parallel(
    grid: &Grid,
    n_comp: usize,
    src: &[f64],
    heights: &[f64],
    dst: &mut [f64],
) {
    use rayon::prelude::*;

    let n_levels = grid.n_levels;
    dst.par_chunks_mut(n_comp)
        .enumerate()
        .for_each(|(c, out)| {
            let mut total = 0.0;
            let mut sums = [0.0_f64; 4];
            for l in 0..n_levels {
                let h = heights[c * n_levels + l];
                total += h;
                for (m, sum) in sums.iter_mut().enumerate().take(n_comp) {
                    *sum += h * src[(c * n_levels + l) * n_comp + m];
                }
            }
            for (m, o) in out.iter_mut().enumerate() {
                *o = if total > 0.0 { sums[m] / total } else { 0.0 };
            }
        });
}

/// Centered horizontal derivative of component `comp` of a volume field,
/// one-sided at the domain ends.
pub fn horizontal_derivative(
    grid: &Grid,
    n_comp: usize,
    comp: usize,
    src: &[f64],
    dst: &mut [f64],
) {
    debug_assert_eq!(dst.len(), grid.n_columns * grid.n_levels);
    let nc = grid.n_columns;
    for c in 0..nc {
        let (cm, cp, span) = if nc == 1 {
            (0, 0, 1.0)
        } else if c == 0 {
            (0, 1, 1.0)
        } else if c == nc - 1 {
            (nc - 2, nc - 1, 1.0)
        } else {
            (c - 1, c + 1, 2.0)
        };
        for l in 0..grid.n_levels {
            let vm = src[grid.idx3(cm, l, n_comp, comp)];
            let vp = src[grid.idx3(cp, l, n_comp, comp)];
            dst[c * grid.n_levels + l] = (vp - vm) / (span * grid.dx);
        }
    }
}
