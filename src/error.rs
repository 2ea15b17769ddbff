//! Error types for the time integration engine.
//!
//! The error taxonomy distinguishes three failure classes:
//!
//! - **Configuration errors** surface at construction time
//!   ([`ModelError::UnsupportedEquation`], [`ModelError::MissingField`],
//!   [`ModelError::MissingEquation`]) and indicate an invalid recipe wiring.
//! - **Numerical errors** surface at solve time
//!   ([`ModelError::SolveDiverged`], [`ModelError::ZeroVelocityScale`]) and
//!   are fatal: the macro step is aborted and fields may be left in a
//!   partially updated state. Recovery (e.g. reducing dt and retrying) is
//!   the responsibility of an external driver.
//! - **Precondition errors** ([`ModelError::NotInitialized`],
//!   [`ModelError::ShapeMismatch`]) indicate incorrect call sequencing.

use thiserror::Error;

use crate::equation::EquationKind;
use crate::fields::FieldId;

/// Error type for stepper and orchestrator operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A time integration scheme was paired with an equation it does not
    /// support (e.g. a vertical-momentum equation under SSP-IMEX).
    #[error("scheme `{scheme}` does not support the {kind:?} equation")]
    UnsupportedEquation {
        /// Name of the rejecting scheme.
        scheme: &'static str,
        /// Kind of the offending equation.
        kind: EquationKind,
    },

    /// A required field is not registered in the field set.
    #[error("required field `{0}` is not registered")]
    MissingField(FieldId),

    /// A recipe requires an equation that was not supplied.
    #[error("recipe `{recipe}` requires the {equation} equation")]
    MissingEquation {
        /// Name of the recipe.
        recipe: &'static str,
        /// Human-readable equation name.
        equation: &'static str,
    },

    /// `advance`/`solve_stage` was called before `initialize`.
    #[error("stepper `{0}` was advanced before initialize()")]
    NotInitialized(&'static str),

    /// An embedded algebraic solve failed to converge. Fatal: the caller
    /// must not continue timestepping.
    #[error(
        "`{scheme}` stage {stage}: solve did not converge after {iterations} \
         iterations (residual {residual:.3e})"
    )]
    SolveDiverged {
        /// Scheme that issued the solve.
        scheme: &'static str,
        /// Stage index within the scheme (0 for whole-step schemes).
        stage: usize,
        /// Iterations performed before giving up.
        iterations: usize,
        /// Final residual norm.
        residual: f64,
    },

    /// Advective time-step computation was requested with an identically
    /// zero velocity-magnitude scale.
    #[error("velocity scale is identically zero; cannot compute advective time step")]
    ZeroVelocityScale,

    /// A field buffer has a different length than the consumer expects.
    #[error("field `{field}` has {actual} values, expected {expected}")]
    ShapeMismatch {
        /// Offending field.
        field: FieldId,
        /// Length found in the field set.
        actual: usize,
        /// Length the consumer requires.
        expected: usize,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ModelError>;
