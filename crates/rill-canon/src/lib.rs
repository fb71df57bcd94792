//! Canonicalizer for the rill stream dialect.
//!
//! Applies local rewrite patterns and folds to fixed point over a module:
//! subview fusion, splat/clone/slice propagation, static copy-on-write
//! materialization, timepoint simplification, and execution-region cleanup.
//! The result is normalized IR ready for buffer allocation and scheduling.

mod conversion;
mod driver;
mod fold;
pub mod patterns;
mod rewriter;

pub use conversion::{ConversionDialectInterface, ConversionTarget, TypeConverter};
pub use patterns::{PatternSet, RewritePattern, populate_canonicalization_patterns};
pub use rewriter::{MatchFailure, RewriteResult, Rewriter};

use rill_ir::{Diagnostic, Module};

/// Canonicalization failed; the module is left in its most recent
/// consistent state.
#[derive(Debug, thiserror::Error)]
pub enum CanonError {
    /// The engine exceeded its rewrite cap, indicating a pattern cycle.
    #[error("canonicalization did not converge after {steps} rewrites (recently: {})",
            .recent.join(", "))]
    Diverged {
        steps: usize,
        recent: Vec<&'static str>,
    },

    /// Post-quiescence verification found a broken invariant.
    #[error("canonicalized IR failed verification: {} ({} total)",
            .diagnostics[0], .diagnostics.len())]
    VerifyFailed { diagnostics: Vec<Diagnostic> },
}

/// Tuning knobs for the fixed-point driver.
#[derive(Clone, Copy, Debug)]
pub struct CanonicalizeOptions {
    /// The rewrite cap is `iteration_factor * (ops + operand edges)`.
    pub iteration_factor: usize,
}

impl Default for CanonicalizeOptions {
    fn default() -> Self {
        Self {
            iteration_factor: 8,
        }
    }
}

/// The canonicalization pass: the full pattern library plus driver options.
pub struct Canonicalizer {
    patterns: PatternSet,
    options: CanonicalizeOptions,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Canonicalizer {
    /// A canonicalizer with the whole stream pattern library registered.
    pub fn new() -> Self {
        Self::with_options(CanonicalizeOptions::default())
    }

    pub fn with_options(options: CanonicalizeOptions) -> Self {
        let mut patterns = PatternSet::new();
        patterns::populate_all_patterns(&mut patterns);
        Self { patterns, options }
    }

    /// Pass entry point. Failure is fatal to the compilation.
    pub fn run_on_module(&self, module: &mut Module) -> Result<(), CanonError> {
        log::debug!(
            "canonicalizing module: {} ops, {} patterns",
            module.ops.len(),
            self.patterns.len()
        );
        driver::run(module, &self.patterns, &self.options)
    }
}

/// Convenience wrapper: canonicalizes with default options.
pub fn canonicalize(module: &mut Module) -> Result<(), CanonError> {
    Canonicalizer::new().run_on_module(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_canonicalizes() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = rill_ir::Builder::at_end(&mut module, entry);
        b.ret(&[]);
        canonicalize(&mut module).expect("clean run");
    }

    #[test]
    fn library_is_registered() {
        let canon = Canonicalizer::new();
        assert!(canon.patterns.len() >= 30);
    }
}
