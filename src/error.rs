/// The least-squares system had (numerically) dependent columns.
///
/// Returned by [`crate::linalg::lstsq`] instead of a garbage solution so the
/// caller can decide whether a regularized retry is allowed for its method.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("least-squares system is singular or near-singular")]
pub struct SingularSystem;

/// Errors raised when building a mixing method from configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The method name didn't match any supported mixing variant.
    #[error("unsupported method {0:?}, expected one of \"vanilla\", \"paqr\", \"faa\"")]
    UnsupportedMethod(String),
}

/// Errors raised while performing a single accelerated step.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum StepError {
    /// The filtered variant's mixing solve failed. Unlike vanilla mixing,
    /// this branch has no ridge fallback, so the failure surfaces here.
    #[error("filtered mixing solve failed: {0}")]
    SingularMixingSystem(#[from] SingularSystem),
    /// Pivoted QR deleted every history column. The accumulated history is
    /// degenerate, which usually means the pivot tolerance is far too loose.
    #[error("pivoted QR deleted all {ncols} history columns (tol = {tol:e})")]
    RankCollapse {
        /// How many columns the history held before deletion.
        ncols: usize,
        /// The relative deletion tolerance in use.
        tol: f64,
    },
    /// The historical state passed in belongs to a different method variant.
    #[error("historical state is for method {found:?} but the stepper runs {expected:?}")]
    HistoryMismatch {
        /// The method the stepper was built for.
        expected: &'static str,
        /// The variant of the state that was passed in.
        found: &'static str,
    },
}
