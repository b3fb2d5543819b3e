//! Configuration for the fold/unfold pass.

/// Knobs for one run of [`crate::analyze_module`].
#[derive(Debug, Clone)]
pub struct FoldConfig {
    /// Record a step-by-step [`crate::trace::FoldStep`] trace.
    pub trace: bool,
    /// Warn when an accumulator fold uses its `@` binder other than as a callee.
    pub accumulator_warnings: bool,
    /// Errors kept per definition; the rest are dropped.
    pub max_errors_per_definition: usize,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            trace: false,
            accumulator_warnings: true,
            max_errors_per_definition: 8,
        }
    }
}
