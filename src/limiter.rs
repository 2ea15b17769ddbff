//! Slope/range limiters applied to transported scalars.

/// Post-step limiter applied in place to a tracer buffer.
///
/// Implementations must be idempotent: applying the limiter to an
/// already-limited buffer must not change it.
pub trait TracerLimiter {
    fn apply(&self, values: &mut [f64]);
}

/// Clamp every value into a fixed physical range.
///
/// The simplest positivity/range guard, used for salinity and for the
/// turbulence quantities (which must stay above a small positive floor).
#[derive(Clone, Copy, Debug)]
pub struct ClampLimiter {
    pub min: f64,
    pub max: f64,
}

impl ClampLimiter {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Lower bound only; the upper bound is unconstrained.
    pub fn floor(min: f64) -> Self {
        Self {
            min,
            max: f64::INFINITY,
        }
    }
}

impl TracerLimiter for ClampLimiter {
    fn apply(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            *v = v.clamp(self.min, self.max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_into_range_and_is_idempotent() {
        let limiter = ClampLimiter::new(0.0, 35.0);
        let mut values = vec![-1.0, 10.0, 40.0];
        limiter.apply(&mut values);
        assert_eq!(values, vec![0.0, 10.0, 35.0]);
        let before = values.clone();
        limiter.apply(&mut values);
        assert_eq!(values, before);
    }

    #[test]
    fn floor_leaves_the_upper_range_open() {
        let limiter = ClampLimiter::floor(1.0e-6);
        let mut values = vec![0.0, 1.0e3];
        limiter.apply(&mut values);
        assert_eq!(values, vec![1.0e-6, 1.0e3]);
    }
}
