//! Stage tables and 2D sub-cycling schedule for the mode-split recipes.

use crate::config::ModelOptions;

/// SSPRK(3,3) stage geometry on the macro-step time axis.
///
/// Stage `k` advances the solution over
/// `[t + start_frac[k] dt, t + (start_frac[k] + dt_frac[k]) dt]`; its
/// initial value is the blend `w uⁿ + (1-w) u` with `w = stage_w[k]`,
/// which turns the end state of the previous stage into the Shu–Osher
/// convex combination.
#[derive(Clone, Copy, Debug)]
pub struct StageWeights {
    /// Length of each stage as a fraction of the macro step.
    pub dt_frac: [f64; 3],
    /// Start of each stage as a fraction of the macro step.
    pub start_frac: [f64; 3],
    /// Weight of the step-start solution in the stage initial blend.
    pub stage_w: [f64; 3],
}

impl StageWeights {
    pub fn ssprk33() -> Self {
        let dt_frac = [1.0, 0.25, 2.0 / 3.0];
        let start_frac = [0.0, 0.25, 1.0 / 3.0];
        let mut stage_w = [1.0 - start_frac[0], 0.0, 0.0];
        for k in 1..3 {
            let prev_end = start_frac[k - 1] + dt_frac[k - 1];
            stage_w[k] = prev_end * (1.0 - start_frac[k]);
        }
        Self {
            dt_frac,
            start_frac,
            stage_w,
        }
    }
}

/// 2D sub-cycling schedule of one stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubCycle {
    /// Number of 2D steps within the stage.
    pub n_steps: usize,
    /// Length of each 2D step; `n_steps * dt_inner` tiles the stage
    /// window exactly.
    pub dt_inner: f64,
}

/// Compute the per-stage sub-cycling schedule.
///
/// Each stage window `dt_frac[k] * dt` is tiled with the largest inner
/// step not exceeding the barotropic step `dt_2d`.
pub fn subcycles(weights: &StageWeights, options: &ModelOptions) -> [SubCycle; 3] {
    let mut out = [SubCycle {
        n_steps: 0,
        dt_inner: 0.0,
    }; 3];
    for (k, &frac) in weights.dt_frac.iter().enumerate() {
        let window = frac * options.dt;
        let n_steps = (window / options.dt_2d).ceil().max(1.0) as usize;
        let dt_inner = window / n_steps as f64;
        tracing::info!(stage = k, frac, n_steps, dt_inner, "2D sub-cycling schedule");
        out[k] = SubCycle { n_steps, dt_inner };
    }
    out
}
