//! Matrix-free solve of implicit stage systems.
//!
//! Every implicit stage in this crate has fixed-point form `u = G(u)`
//! where one application of `G` costs a residual evaluation and a mass
//! solve. [`picard_solve`] iterates the map with optional under-relaxation
//! until the update stalls below tolerance. A stage that fails to
//! converge is **fatal**: the error propagates and the macro step is
//! aborted — there is no retry and no partial-failure path.

use crate::error::{ModelError, Result};
use crate::fields;

/// Options controlling the fixed-point iteration of implicit stages.
#[derive(Clone, Copy, Debug)]
pub struct SolverOptions {
    /// Relative update tolerance.
    pub tolerance: f64,
    /// Iteration cap; exceeding it raises [`ModelError::SolveDiverged`].
    pub max_iterations: usize,
    /// Under-relaxation factor in (0, 1]; 1.0 disables damping.
    pub relaxation: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 100,
            relaxation: 1.0,
        }
    }
}

/// Solve `u = G(u)` by damped Picard iteration, starting from the value
/// already in `u`.
///
/// `apply` must write `G(u)` into its second argument. `scheme`/`stage`
/// identify the caller in the error and in trace logs.
pub fn picard_solve(
    scheme: &'static str,
    stage: usize,
    opts: &SolverOptions,
    u: &mut [f64],
    mut apply: impl FnMut(&[f64], &mut [f64]) -> Result<()>,
) -> Result<usize> {
    let mut next = vec![0.0; u.len()];

    for iteration in 0..opts.max_iterations {
        apply(u, &mut next)?;

        if opts.relaxation < 1.0 {
            let w = opts.relaxation;
            for (n, old) in next.iter_mut().zip(u.iter()) {
                *n = w * *n + (1.0 - w) * old;
            }
        }

        let update = fields::max_abs_diff(u, &next);
        let scale = 1.0 + fields::max_abs(&next);
        u.copy_from_slice(&next);

        if update <= opts.tolerance * scale {
            tracing::trace!(scheme, stage, iteration, update, "implicit stage converged");
            return Ok(iteration + 1);
        }
    }

    // report the residual of one extra application
    apply(u, &mut next)?;
    let residual = fields::max_abs_diff(u, &next);
    Err(ModelError::SolveDiverged {
        scheme,
        stage,
        iterations: opts.max_iterations,
        residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_contraction() {
        // u = 0.5 u + 1 has fixed point 2
        let opts = SolverOptions::default();
        let mut u = vec![0.0];
        let iters = picard_solve("test", 0, &opts, &mut u, |x, out| {
            out[0] = 0.5 * x[0] + 1.0;
            Ok(())
        })
        .unwrap();
        assert!((u[0] - 2.0).abs() < 1e-8);
        assert!(iters > 1);
    }

    #[test]
    fn diverging_map_is_fatal() {
        let opts = SolverOptions {
            max_iterations: 20,
            ..SolverOptions::default()
        };
        let mut u = vec![1.0];
        let err = picard_solve("test", 2, &opts, &mut u, |x, out| {
            out[0] = 2.0 * x[0] + 1.0;
            Ok(())
        })
        .unwrap_err();
        match err {
            ModelError::SolveDiverged {
                stage, iterations, ..
            } => {
                assert_eq!(stage, 2);
                assert_eq!(iterations, 20);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn damping_preserves_the_fixed_point() {
        // u = -0.9 u + 1 has fixed point 10/19
        let opts = SolverOptions {
            relaxation: 0.5,
            ..SolverOptions::default()
        };
        let mut u = vec![0.0];
        picard_solve("test", 0, &opts, &mut u, |x, out| {
            out[0] = -0.9 * x[0] + 1.0;
            Ok(())
        })
        .unwrap();
        assert!((u[0] - 10.0 / 19.0).abs() < 1e-8);
    }
}
