//! Compile-time configuration.
//!
//! Mirrors `ouros`'s `ResourceLimits` pattern of naming tunables as
//! constants/struct fields instead of scattering magic numbers through the
//! compiler, even though this crate's limits are far narrower than a full
//! interpreter's resource tracker.

/// Maximum nesting depth of `function`/`lambda` definitions the binder and
/// lowering passes will walk recursively before giving up.
///
/// Mirrors `ouros`'s debug/release split on stack-hungry recursive passes
/// (`parse::MAX_NESTING_DEPTH`): debug builds use a lower limit because
/// unoptimized recursive descent consumes far more stack per frame.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: u32 = 512;
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: u32 = 100;

/// Options controlling a single `block_compile` invocation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Recursion guard for binder/lowering passes over nested closures.
    pub max_nesting_depth: u32,
    /// Always `true`: backward branches are rejected (§9, Design Notes).
    /// Kept as a named field rather than an inline `assert!` so a future
    /// loop-supporting backend can flip it without hunting through
    /// `lower.rs`.
    pub reject_backward_branches: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_nesting_depth: MAX_NESTING_DEPTH,
            reject_backward_branches: true,
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_nesting_depth(mut self, depth: u32) -> Self {
        self.max_nesting_depth = depth;
        self
    }
}
